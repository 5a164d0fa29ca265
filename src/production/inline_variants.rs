//! Variant-spec parsing and Cartesian expansion.
//!
//! A variant spec is one of:
//! - a literal list `[a, b, c]` (tokens may be quoted),
//! - a numeric `Range(start, end, step)` with half-open semantics: the
//!   values are `start, start+step, ...` strictly below `end`,
//! - a bare scalar or comma-separated scalars.

use std::collections::BTreeMap;

use super::ProductionError;
use crate::constants::MAX_VARIANTS_PER_KEY;

/// Parse one variant spec into its list of discrete string values.
///
/// A blank spec parses to an empty list; the caller decides whether that is
/// an error. `Range(10,21,5)` yields `["10", "15", "20"]`: the stop bound
/// is excluded whether or not it is exactly reachable by the step.
pub fn parse_variants(spec: &str) -> Result<Vec<String>, ProductionError> {
    let s = spec.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }

    let lower = s.to_ascii_lowercase();
    let variants = if let Some(inner) = s.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| ProductionError::BrokenVariantSpec {
            spec: spec.to_string(),
            reason: "array definition must end with ']'".into(),
        })?;
        split_values(inner)
    } else if lower.starts_with("range") || s.starts_with('(') {
        parse_range(s, &lower)?
    } else {
        split_values(s)
    };

    if variants.len() > MAX_VARIANTS_PER_KEY {
        return Err(ProductionError::TooManyVariants {
            spec: spec.to_string(),
            count: variants.len(),
        });
    }
    Ok(variants)
}

fn parse_range(spec: &str, lower: &str) -> Result<Vec<String>, ProductionError> {
    let rest = lower.strip_prefix("range").unwrap_or(lower).trim_start();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| ProductionError::BrokenVariantSpec {
            spec: spec.to_string(),
            reason: "range must be 'Range(start, end, step)'".into(),
        })?;

    let mut numbers = inner.split(',').map(|part| {
        part.trim()
            .parse::<i64>()
            .map_err(|_| ProductionError::BrokenVariantSpec {
                spec: spec.to_string(),
                reason: format!("'{}' is not an integer", part.trim()),
            })
    });
    let mut next_number = || {
        numbers.next().unwrap_or_else(|| {
            Err(ProductionError::BrokenVariantSpec {
                spec: spec.to_string(),
                reason: "range needs start, end and step".into(),
            })
        })
    };
    let start = next_number()?;
    let end = next_number()?;
    let step = next_number()?;
    if step <= 0 {
        return Err(ProductionError::BrokenVariantSpec {
            spec: spec.to_string(),
            reason: "step must be positive".into(),
        });
    }

    let mut values = Vec::new();
    let mut i = start;
    while i < end {
        values.push(i.to_string());
        if values.len() > MAX_VARIANTS_PER_KEY {
            return Err(ProductionError::TooManyVariants {
                spec: spec.to_string(),
                count: values.len(),
            });
        }
        i += step;
    }
    Ok(values)
}

/// Split a comma-separated value list, honoring single or double quotes
/// around individual tokens and dropping blanks.
fn split_values(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let unquoted = token
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .or_else(|| token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')));
            unquoted.unwrap_or(token).to_string()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Expand an inline key -> spec map into the Cartesian set of all variant
/// combinations, one map per combination. Keys whose spec parses to an
/// empty list are skipped. Order is stable: keys ascending, earlier keys
/// vary slowest.
pub fn all_inline_variants(
    inlines: &BTreeMap<String, String>,
) -> Result<Vec<BTreeMap<String, String>>, ProductionError> {
    let mut lists = BTreeMap::new();
    for (key, spec) in inlines {
        let variants = parse_variants(spec)?;
        if !variants.is_empty() {
            lists.insert(key.clone(), variants);
        }
    }
    Ok(cartesian_combinations(&lists))
}

/// Cartesian product over named variant lists.
pub fn cartesian_combinations(
    lists: &BTreeMap<String, Vec<String>>,
) -> Vec<BTreeMap<String, String>> {
    if lists.is_empty() {
        return Vec::new();
    }
    let mut combinations: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    for (key, values) in lists {
        combinations = combinations
            .into_iter()
            .flat_map(|combination| {
                values.iter().map(move |value| {
                    let mut next = combination.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combinations
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_and_csv() {
        assert_eq!(parse_variants("10").unwrap(), vec!["10"]);
        assert_eq!(parse_variants("a, b ,c").unwrap(), vec!["a", "b", "c"]);
        assert!(parse_variants("  ").unwrap().is_empty());
    }

    #[test]
    fn test_literal_list() {
        assert_eq!(parse_variants("[x, y]").unwrap(), vec!["x", "y"]);
        assert_eq!(
            parse_variants("['aaa', \"bbb\", ccc]").unwrap(),
            vec!["aaa", "bbb", "ccc"]
        );
        assert!(matches!(
            parse_variants("[x, y"),
            Err(ProductionError::BrokenVariantSpec { .. })
        ));
    }

    #[test]
    fn test_range_half_open() {
        // the authoritative contract: stop 21 excluded, 20 is the last
        // value reachable by step 5 from 10
        assert_eq!(parse_variants("Range(10,21,5)").unwrap(), vec!["10", "15", "20"]);
        // stop exactly reachable is still excluded
        assert_eq!(parse_variants("Range(10,20,5)").unwrap(), vec!["10", "15"]);
        assert_eq!(parse_variants("range (0, 3, 1)").unwrap(), vec!["0", "1", "2"]);
        assert_eq!(parse_variants("(1,4,2)").unwrap(), vec!["1", "3"]);
        assert!(parse_variants("Range(5,5,1)").unwrap().is_empty());
    }

    #[test]
    fn test_range_errors() {
        assert!(matches!(
            parse_variants("Range(1,10)"),
            Err(ProductionError::BrokenVariantSpec { .. })
        ));
        assert!(matches!(
            parse_variants("Range(1,10,x)"),
            Err(ProductionError::BrokenVariantSpec { .. })
        ));
        assert!(matches!(
            parse_variants("Range(1,10,0)"),
            Err(ProductionError::BrokenVariantSpec { .. })
        ));
        assert!(matches!(
            parse_variants("Range(0,1000,1)"),
            Err(ProductionError::TooManyVariants { .. })
        ));
    }

    #[test]
    fn test_all_inline_variants_cartesian() {
        let mut inlines = BTreeMap::new();
        inlines.insert("alpha".to_string(), "[0.1, 0.2]".to_string());
        inlines.insert("beta".to_string(), "Range(1,4,1)".to_string());

        let combos = all_inline_variants(&inlines).unwrap();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0]["alpha"], "0.1");
        assert_eq!(combos[0]["beta"], "1");
        assert_eq!(combos[5]["alpha"], "0.2");
        assert_eq!(combos[5]["beta"], "3");
        // every combination is unique
        let unique: std::collections::BTreeSet<_> = combos.iter().collect();
        assert_eq!(unique.len(), combos.len());
    }

    #[test]
    fn test_empty_lists_are_skipped() {
        let mut inlines = BTreeMap::new();
        inlines.insert("a".to_string(), "[x, y]".to_string());
        inlines.insert("blank".to_string(), "".to_string());
        let combos = all_inline_variants(&inlines).unwrap();
        assert_eq!(combos.len(), 2);
        assert!(!combos[0].contains_key("blank"));
    }

    proptest! {
        #[test]
        fn prop_combination_count_is_product(
            a in 1usize..5, b in 1usize..5, c in 1usize..5,
        ) {
            let mut lists = BTreeMap::new();
            lists.insert("a".to_string(), (0..a).map(|i| i.to_string()).collect::<Vec<_>>());
            lists.insert("b".to_string(), (0..b).map(|i| i.to_string()).collect::<Vec<_>>());
            lists.insert("c".to_string(), (0..c).map(|i| i.to_string()).collect::<Vec<_>>());
            prop_assert_eq!(cartesian_combinations(&lists).len(), a * b * c);
        }

        #[test]
        fn prop_range_stays_below_end(start in -50i64..50, len in 0i64..40, step in 1i64..9) {
            let end = start + len;
            let spec = format!("Range({start},{end},{step})");
            let values = parse_variants(&spec).unwrap();
            for v in values {
                let n: i64 = v.parse().unwrap();
                prop_assert!(n >= start && n < end);
            }
        }
    }
}
