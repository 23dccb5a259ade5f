//! Output scopes: where a published artifact is visible.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Visibility level of a published output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeLevel {
    Step,
    Stage,
    Pipeline,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Step => "step",
            ScopeLevel::Stage => "stage",
            ScopeLevel::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete scope: one execution, one level, one owning node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputScope {
    pub execution_id: String,
    pub level: ScopeLevel,
    /// Identifier of the step, stage, or pipeline that owns the scope.
    pub owner: String,
}

impl OutputScope {
    pub fn new(execution_id: &str, level: ScopeLevel, owner: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            level,
            owner: owner.to_string(),
        }
    }

    /// Storage key for `name` within this scope. Components are escaped so
    /// distinct scopes never render the same key.
    pub fn key(&self, name: &str) -> String {
        format!(
            "{}{}/{}/{}",
            execution_prefix(&self.execution_id),
            self.level,
            escape_component(&self.owner),
            escape_component(name)
        )
    }
}

/// Key prefix shared by every output of one execution.
pub fn execution_prefix(execution_id: &str) -> String {
    format!("{}/", escape_component(execution_id))
}

/// Percent-escape `%` and `/` so a component cannot span a separator.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

/// The ancestry of a running step inside one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionScope {
    pub execution_id: String,
    pub pipeline: String,
    pub stage: String,
    pub step: String,
}

impl ExecutionScope {
    pub fn new(execution_id: &str, pipeline: &str, stage: &str, step: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            pipeline: pipeline.to_string(),
            stage: stage.to_string(),
            step: step.to_string(),
        }
    }

    /// The same stage, positioned at a different step.
    pub fn for_step(&self, step: &str) -> Self {
        Self {
            step: step.to_string(),
            ..self.clone()
        }
    }

    pub fn at(&self, level: ScopeLevel) -> OutputScope {
        let owner = match level {
            ScopeLevel::Step => &self.step,
            ScopeLevel::Stage => &self.stage,
            ScopeLevel::Pipeline => &self.pipeline,
        };
        OutputScope::new(&self.execution_id, level, owner)
    }

    /// Scopes in lookup order: nearest first.
    pub fn lookup_chain(&self) -> [OutputScope; 3] {
        [
            self.at(ScopeLevel::Step),
            self.at(ScopeLevel::Stage),
            self.at(ScopeLevel::Pipeline),
        ]
    }
}
