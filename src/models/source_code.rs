//! Immutable pipeline templates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A static pipeline template: an ordered list of process definitions,
/// validated once and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCode {
    pub id: i64,
    /// Human-readable unique identifier, e.g. `"assembly-line-1.0"`.
    pub uid: String,
    pub processes: Vec<Process>,
    /// Inline variable groups: group key -> (variable key -> variant spec).
    #[serde(default)]
    pub inline: HashMap<String, HashMap<String, String>>,
}

impl SourceCode {
    /// Validate the template before it may be instantiated.
    pub fn validate(&self) -> Result<(), String> {
        if self.processes.is_empty() {
            return Err(format!("SourceCode '{}' has no processes", self.uid));
        }
        let mut seen = std::collections::HashSet::new();
        for process in self.iter_all_processes() {
            if !seen.insert(process.code.as_str()) {
                return Err(format!(
                    "SourceCode '{}' declares duplicate process code '{}'",
                    self.uid, process.code
                ));
            }
        }
        Ok(())
    }

    pub fn find_process(&self, code: &str) -> Option<&Process> {
        self.iter_all_processes().find(|p| p.code == code)
    }

    /// Depth-first iteration over every process, nested ones included.
    pub fn iter_all_processes(&self) -> impl Iterator<Item = &Process> {
        let mut stack: Vec<&Process> = self.processes.iter().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.sub_processes.iter().rev());
            Some(next)
        })
    }
}

/// One template node; maps to one or more tasks at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub code: String,
    pub name: String,
    /// Code of the function this process executes. Codes under the `mh.`
    /// prefix are dispatcher-internal and never leave the dispatcher.
    pub function_code: String,
    #[serde(default)]
    pub logic: ProcessLogic,
    #[serde(default)]
    pub inputs: Vec<VariableDecl>,
    #[serde(default)]
    pub outputs: Vec<VariableDecl>,
    /// How many times an errored task may be re-offered before it breaks.
    #[serde(default = "default_tries")]
    pub tries_after_error: u32,
    /// Name of a variable that must be inited for this process to run.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub skip_policy: SkipPolicy,
    #[serde(default)]
    pub metas: Vec<Meta>,
    #[serde(default)]
    pub sub_processes: Vec<Process>,
}

fn default_tries() -> u32 {
    1
}

impl Process {
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.metas
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    pub fn meta_is_true(&self, key: &str) -> bool {
        self.meta_value(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn is_internal_function(&self) -> bool {
        self.function_code.starts_with("mh.")
    }
}

/// Chaining discipline for a process's sub-processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessLogic {
    /// Each sub-process depends on the previous one.
    Sequential,
    /// All sub-processes share the same predecessor.
    Parallel,
}

impl Default for ProcessLogic {
    fn default() -> Self {
        Self::Sequential
    }
}

/// What to do when a process's condition does not hold at production time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Produce the task regardless; the condition is advisory.
    Execute,
    /// Drop the task and splice its ancestors to its descendants.
    Skip,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::Execute
    }
}

/// Declared input or output of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default)]
    pub global: bool,
}

/// Free-form key/value attached to a process definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub key: String,
    pub value: String,
}

impl Meta {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
