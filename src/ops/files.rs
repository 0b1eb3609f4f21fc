// Filesystem operations

use crate::connectors::shell_quote;
use crate::facts::{FactQuery, Value};
use crate::output::errors::TidewayError;

use super::{Command, FactView, Operation};

/// Declared state: a directory exists (optionally with a mode) or is absent
pub struct Directory {
    pub path: String,
    pub present: bool,
    pub mode: Option<String>,
    pub sudo: bool,
}

impl Directory {
    pub fn present(path: impl Into<String>) -> Self {
        Directory {
            path: path.into(),
            present: true,
            mode: None,
            sudo: false,
        }
    }

    pub fn absent(path: impl Into<String>) -> Self {
        Directory {
            path: path.into(),
            present: false,
            mode: None,
            sudo: false,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    fn stat_query(&self) -> FactQuery {
        FactQuery::new("file_stat", vec![self.path.clone()])
    }
}

impl Operation for Directory {
    fn name(&self) -> String {
        format!(
            "directory {} {}",
            self.path,
            if self.present { "present" } else { "absent" }
        )
    }

    fn required_facts(&self) -> Vec<FactQuery> {
        vec![self.stat_query()]
    }

    fn plan(&self, facts: &FactView) -> Result<Vec<Command>, TidewayError> {
        let stat = facts.require(&self.stat_query())?;
        let quoted = shell_quote(&self.path);

        // file_stat is Bool(false) for a missing path, a stat dict otherwise
        let existing = stat.as_dict();

        let mut commands = Vec::new();

        if self.present {
            match existing {
                None => {
                    commands.push(Command::new(format!("mkdir -p {}", quoted)).with_sudo(self.sudo));
                    if let Some(ref mode) = self.mode {
                        commands.push(
                            Command::new(format!("chmod {} {}", mode, quoted)).with_sudo(self.sudo),
                        );
                    }
                }
                Some(stat) => {
                    // Present with the right mode: nothing to do. A mode
                    // mismatch only needs the chmod.
                    if let Some(ref mode) = self.mode {
                        let current = stat.get("mode").and_then(Value::as_str).unwrap_or("");
                        if current != mode {
                            commands.push(
                                Command::new(format!("chmod {} {}", mode, quoted))
                                    .with_sudo(self.sudo),
                            );
                        }
                    }
                }
            }
        } else if existing.is_some() {
            commands.push(Command::new(format!("rm -rf {}", quoted)).with_sudo(self.sudo));
        }

        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stat_dict(kind: &str, mode: &str) -> Value {
        let mut stat = HashMap::new();
        stat.insert("type".to_string(), Value::String(kind.to_string()));
        stat.insert("mode".to_string(), Value::String(mode.to_string()));
        stat.insert("user".to_string(), Value::String("root".to_string()));
        stat.insert("group".to_string(), Value::String("root".to_string()));
        stat.insert("size".to_string(), Value::Int(4096));
        Value::Dict(stat)
    }

    fn view_for(op: &Directory, stat: Value) -> FactView {
        let mut view = FactView::new();
        view.insert(&op.stat_query(), stat);
        view
    }

    #[test]
    fn test_plan_creates_missing_directory_ordered() {
        let op = Directory::present("/var/lib/app").with_mode("750");
        let commands = op.plan(&view_for(&op, Value::Bool(false))).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(commands[0].command.starts_with("mkdir -p"));
        assert!(commands[1].command.starts_with("chmod 750"));
    }

    #[test]
    fn test_plan_is_idempotent_when_satisfied() {
        let op = Directory::present("/var/lib/app").with_mode("750");
        let commands = op
            .plan(&view_for(&op, stat_dict("directory", "750")))
            .unwrap();
        assert!(commands.is_empty());

        let op = Directory::absent("/var/lib/app");
        let commands = op.plan(&view_for(&op, Value::Bool(false))).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_plan_fixes_mode_only() {
        let op = Directory::present("/var/lib/app").with_mode("750");
        let commands = op
            .plan(&view_for(&op, stat_dict("directory", "755")))
            .unwrap();

        assert_eq!(commands.len(), 1);
        assert!(commands[0].command.starts_with("chmod 750"));
    }

    #[test]
    fn test_plan_removes_existing() {
        let op = Directory::absent("/var/lib/app");
        let commands = op
            .plan(&view_for(&op, stat_dict("directory", "755")))
            .unwrap();

        assert_eq!(commands.len(), 1);
        assert!(commands[0].command.starts_with("rm -rf"));
    }

    #[test]
    fn test_plan_quotes_path() {
        let op = Directory::present("/var/lib/my app");
        let commands = op.plan(&view_for(&op, Value::Bool(false))).unwrap();
        assert!(commands[0].command.contains("'/var/lib/my app'"));
    }
}
