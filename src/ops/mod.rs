// Declared operations and fact-diff planning

pub mod files;
pub mod packages;
pub mod shell;
pub mod spec;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::facts::{FactQuery, Value};
use crate::output::errors::TidewayError;

pub use files::Directory;
pub use packages::Package;
pub use shell::Shell;
pub use spec::{load_deploy_file, parse_deploy, DeployPlan};

/// A single shell command emitted by planning
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command: String,
    /// Escalate with sudo before dispatch
    pub sudo: bool,
    pub sudo_user: Option<String>,
    /// Per-command deadline override
    pub timeout: Option<Duration>,
    /// A non-zero exit is recorded but does not fail the operation
    pub ignore_failure: bool,
}

impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Command {
            command: command.into(),
            sudo: false,
            sudo_user: None,
            timeout: None,
            ignore_failure: false,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn with_sudo_user(mut self, user: impl Into<String>) -> Self {
        self.sudo_user = Some(user.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

/// Immutable snapshot of fetched facts handed to planning
#[derive(Debug, Default)]
pub struct FactView {
    values: HashMap<String, Value>,
}

impl FactView {
    pub fn new() -> Self {
        FactView {
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, query: &FactQuery, value: Value) {
        self.values.insert(query.cache_key(), value);
    }

    pub fn get(&self, query: &FactQuery) -> Option<&Value> {
        self.values.get(&query.cache_key())
    }

    /// Fetch a fact the operation declared; absence is a programming error
    pub fn require(&self, query: &FactQuery) -> Result<&Value, TidewayError> {
        self.get(query).ok_or_else(|| TidewayError::DeploySpec {
            message: format!("operation used undeclared fact: {}", query.cache_key()),
            suggestion: Some("add the fact to required_facts()".to_string()),
        })
    }
}

/// A declared unit of desired state
///
/// Planning is a pure function of the pre-fetched facts: no transport calls,
/// and re-planning against already-satisfied state yields no commands.
pub trait Operation: Send + Sync {
    fn name(&self) -> String;

    /// Facts that must be fetched before `plan` runs
    fn required_facts(&self) -> Vec<FactQuery> {
        Vec::new()
    }

    /// Ordered commands needed to reach the declared state
    fn plan(&self, facts: &FactView) -> Result<Vec<Command>, TidewayError>;
}

/// An operation with its display label, as declared in a deploy file
#[derive(Clone)]
pub struct DeclaredOp {
    pub label: String,
    pub op: Arc<dyn Operation>,
}

impl std::fmt::Debug for DeclaredOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeclaredOp")
            .field("label", &self.label)
            .finish()
    }
}

impl DeclaredOp {
    pub fn new(op: Arc<dyn Operation>) -> Self {
        DeclaredOp {
            label: op.name(),
            op,
        }
    }

    pub fn labeled(label: impl Into<String>, op: Arc<dyn Operation>) -> Self {
        DeclaredOp {
            label: label.into(),
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("systemctl restart nginx")
            .with_sudo(true)
            .with_timeout(Duration::from_secs(60))
            .ignoring_failure();

        assert!(cmd.sudo);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(60)));
        assert!(cmd.ignore_failure);
    }

    #[test]
    fn test_fact_view_require() {
        let query = FactQuery::bare("os");
        let mut view = FactView::new();
        view.insert(&query, Value::String("Linux".to_string()));

        assert!(view.require(&query).is_ok());
        assert!(view.require(&FactQuery::bare("arch")).is_err());
    }
}
