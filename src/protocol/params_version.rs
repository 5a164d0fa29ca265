//! Versioned task-params codec.
//!
//! Task params cross the wire as `{ "version": N, "params": {...} }`. The
//! dispatcher always writes the current version; the decoder accepts every
//! version it knows and upgrades older documents through a chain of pure
//! per-version conversions, so a dispatcher restart never strands a task
//! that was serialized under an older layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::TASK_PARAMS_VERSION;
use crate::models::task::VariableRef;
use crate::models::{TaskParams, VariableSourcing};

#[derive(Error, Debug)]
pub enum ParamsVersionError {
    #[error("Unsupported task params version {0}")]
    UnsupportedVersion(u32),

    #[error("Malformed task params document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionedDoc {
    version: u32,
    params: serde_json::Value,
}

/// Serialize params under the current wire version.
pub fn encode_task_params(params: &TaskParams) -> Result<String, ParamsVersionError> {
    let doc = VersionedDoc {
        version: TASK_PARAMS_VERSION,
        params: serde_json::to_value(params)?,
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decode a versioned params document, upgrading old versions in place.
pub fn decode_task_params(text: &str) -> Result<TaskParams, ParamsVersionError> {
    let doc: VersionedDoc = serde_json::from_str(text)?;
    match doc.version {
        1 => Ok(upgrade_v1(serde_json::from_value(doc.params)?)),
        TASK_PARAMS_VERSION => Ok(serde_json::from_value(doc.params)?),
        other => Err(ParamsVersionError::UnsupportedVersion(other)),
    }
}

/// Version 1 layout: variable refs carried no sourcing and params carried
/// no clean-work-dir flag.
#[derive(Debug, Deserialize)]
struct TaskParamsV1 {
    function_code: String,
    #[serde(default)]
    inputs: Vec<VariableRefV1>,
    #[serde(default)]
    outputs: Vec<VariableRefV1>,
    tries_after_error: u32,
}

#[derive(Debug, Deserialize)]
struct VariableRefV1 {
    id: i64,
    name: String,
}

fn upgrade_v1(old: TaskParamsV1) -> TaskParams {
    let upgrade_ref = |r: VariableRefV1| VariableRef {
        id: r.id,
        name: r.name,
        sourcing: VariableSourcing::Dispatcher,
    };
    TaskParams {
        function_code: old.function_code,
        inputs: old.inputs.into_iter().map(upgrade_ref).collect(),
        outputs: old.outputs.into_iter().map(upgrade_ref).collect(),
        tries_after_error: old.tries_after_error,
        clean_work_dir: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TaskParams {
        TaskParams {
            function_code: "fn.fit-model".into(),
            inputs: vec![VariableRef {
                id: 5,
                name: "dataset".into(),
                sourcing: VariableSourcing::Dispatcher,
            }],
            outputs: vec![],
            tries_after_error: 3,
            clean_work_dir: true,
        }
    }

    #[test]
    fn test_current_version_round_trip() {
        let encoded = encode_task_params(&params()).unwrap();
        assert!(encoded.contains("\"version\":2"));
        let decoded = decode_task_params(&encoded).unwrap();
        assert_eq!(decoded, params());
    }

    #[test]
    fn test_v1_documents_upgrade() {
        let doc = r#"{
            "version": 1,
            "params": {
                "function_code": "fn.fit-model",
                "inputs": [{"id": 5, "name": "dataset"}],
                "tries_after_error": 3
            }
        }"#;
        let decoded = decode_task_params(doc).unwrap();
        assert_eq!(decoded.function_code, "fn.fit-model");
        assert_eq!(decoded.inputs[0].sourcing, VariableSourcing::Dispatcher);
        assert!(!decoded.clean_work_dir);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let doc = r#"{"version": 7, "params": {}}"#;
        assert!(matches!(
            decode_task_params(doc),
            Err(ParamsVersionError::UnsupportedVersion(7))
        ));
    }
}
