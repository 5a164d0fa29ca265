//! Named data artifacts and their dispatcher-side registry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::exec_context::ExecContextId;
use super::task_context::TaskContextId;
use crate::transfer::checksum::Checksum;

pub type VariableId = i64;

/// A named data artifact flowing between tasks.
///
/// Local variables exist per exec context and task-context id; one is
/// created for each fan-out branch when the branch is produced. Global
/// variables are shared read-only inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub scope: VariableScope,
    pub sourcing: VariableSourcing,
    pub inited: bool,
    pub nullified: bool,
    pub checksum: Option<Checksum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Local {
        exec_context_id: ExecContextId,
        task_context_id: TaskContextId,
    },
    Global,
}

/// Where a variable's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VariableSourcing {
    /// Blob stored by the dispatcher and moved over the transfer service.
    Dispatcher,
    Git {
        repo: String,
        commit: String,
        path: String,
    },
    Disk {
        path: String,
    },
}

/// Dispatcher-side variable registry with lookup by (name, context).
///
/// Lookup walks up the task-context path: a variable declared in `#1` is
/// visible from `#1.2`, which is how fan-out branches see their parent's
/// inputs while keeping their own locals private.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    by_id: DashMap<VariableId, Variable>,
    payloads: DashMap<VariableId, Vec<u8>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, variable: Variable) {
        self.by_id.insert(variable.id, variable);
    }

    pub fn insert_with_payload(&self, variable: Variable, payload: Vec<u8>) {
        self.payloads.insert(variable.id, payload);
        self.by_id.insert(variable.id, variable);
    }

    pub fn get(&self, id: VariableId) -> Option<Variable> {
        self.by_id.get(&id).map(|v| v.clone())
    }

    pub fn payload(&self, id: VariableId) -> Option<Vec<u8>> {
        self.payloads.get(&id).map(|p| p.clone())
    }

    /// Find a local variable visible from `task_context_id`, preferring the
    /// deepest declaration, falling back to a global of the same name.
    pub fn find_visible(
        &self,
        name: &str,
        exec_context_id: ExecContextId,
        task_context_id: &TaskContextId,
    ) -> Option<Variable> {
        let mut best: Option<Variable> = None;
        for entry in self.by_id.iter() {
            let v = entry.value();
            if v.name != name {
                continue;
            }
            match &v.scope {
                VariableScope::Local {
                    exec_context_id: ctx,
                    task_context_id: declared,
                } if *ctx == exec_context_id && declared.contains(task_context_id) => {
                    let deeper = best.as_ref().is_none_or(|b| match &b.scope {
                        VariableScope::Local {
                            task_context_id: best_ctx,
                            ..
                        } => best_ctx.as_str().len() < declared.as_str().len(),
                        VariableScope::Global => true,
                    });
                    if deeper {
                        best = Some(v.clone());
                    }
                }
                VariableScope::Global if best.is_none() => {
                    best = Some(v.clone());
                }
                _ => {}
            }
        }
        best
    }

    /// All local variables with the given name declared at or below
    /// `ancestor`, in context order. Aggregation over fan-out branches
    /// reads its inputs through this.
    pub fn find_all_under(
        &self,
        name: &str,
        exec_context_id: ExecContextId,
        ancestor: &TaskContextId,
    ) -> Vec<Variable> {
        let mut found: Vec<Variable> = self
            .by_id
            .iter()
            .filter_map(|entry| {
                let v = entry.value();
                if v.name != name {
                    return None;
                }
                match &v.scope {
                    VariableScope::Local {
                        exec_context_id: ctx,
                        task_context_id: declared,
                    } if *ctx == exec_context_id && ancestor.contains(declared) => {
                        Some(v.clone())
                    }
                    _ => None,
                }
            })
            .collect();
        found.sort_by(|a, b| match (&a.scope, &b.scope) {
            (
                VariableScope::Local {
                    task_context_id: left,
                    ..
                },
                VariableScope::Local {
                    task_context_id: right,
                    ..
                },
            ) => left.cmp(right).then(a.id.cmp(&b.id)),
            _ => a.id.cmp(&b.id),
        });
        found
    }

    pub fn remove(&self, id: VariableId) -> Option<Variable> {
        self.payloads.remove(&id);
        self.by_id.remove(&id).map(|(_, v)| v)
    }

    pub fn remove_context(&self, exec_context_id: ExecContextId) {
        self.by_id.retain(|_, v| match &v.scope {
            VariableScope::Local {
                exec_context_id: ctx,
                ..
            } => *ctx != exec_context_id,
            VariableScope::Global => true,
        });
        self.payloads
            .retain(|id, _| self.by_id.contains_key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: VariableId, name: &str, ctx: &TaskContextId) -> Variable {
        Variable {
            id,
            name: name.into(),
            scope: VariableScope::Local {
                exec_context_id: 1,
                task_context_id: ctx.clone(),
            },
            sourcing: VariableSourcing::Dispatcher,
            inited: true,
            nullified: false,
            checksum: None,
        }
    }

    #[test]
    fn test_visibility_walks_up_the_context_path() {
        let registry = VariableRegistry::new();
        let root = TaskContextId::root();
        let branch = root.child(2);

        registry.insert(local(1, "items", &root));
        registry.insert(local(2, "items", &branch));

        // from the branch, the deepest declaration wins
        let found = registry.find_visible("items", 1, &branch).unwrap();
        assert_eq!(found.id, 2);

        // from the root only the root declaration is visible
        let found = registry.find_visible("items", 1, &root).unwrap();
        assert_eq!(found.id, 1);
    }

    #[test]
    fn test_find_all_under_collects_branch_locals() {
        let registry = VariableRegistry::new();
        let root = TaskContextId::root();
        registry.insert(local(1, "score", &root.child(1)));
        registry.insert(local(2, "score", &root.child(2)));
        registry.insert(local(3, "other", &root.child(1)));

        let found = registry.find_all_under("score", 1, &root);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[1].id, 2);
        // a sibling branch sees only its own subtree
        assert_eq!(registry.find_all_under("score", 1, &root.child(2)).len(), 1);
    }

    #[test]
    fn test_global_fallback() {
        let registry = VariableRegistry::new();
        registry.insert(Variable {
            id: 7,
            name: "model".into(),
            scope: VariableScope::Global,
            sourcing: VariableSourcing::Dispatcher,
            inited: true,
            nullified: false,
            checksum: None,
        });
        let found = registry
            .find_visible("model", 1, &TaskContextId::root())
            .unwrap();
        assert_eq!(found.id, 7);
        assert!(registry.find_visible("absent", 1, &TaskContextId::root()).is_none());
    }
}
