// Raw shell operation

use std::time::Duration;

use crate::output::errors::TidewayError;

use super::{Command, FactView, Operation};

/// An imperative command with no declared state
///
/// Always plans its command; idempotence is the author's responsibility.
pub struct Shell {
    pub command: String,
    pub sudo: bool,
    pub sudo_user: Option<String>,
    pub timeout: Option<Duration>,
    pub ignore_failure: bool,
}

impl Shell {
    pub fn new(command: impl Into<String>) -> Self {
        Shell {
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

impl Operation for Shell {
    fn name(&self) -> String {
        format!("shell: {}", self.command)
    }

    fn plan(&self, _facts: &FactView) -> Result<Vec<Command>, TidewayError> {
        let mut command = Command::new(&self.command).with_sudo(self.sudo);
        command.sudo_user = self.sudo_user.clone();
        command.timeout = self.timeout;
        command.ignore_failure = self.ignore_failure;
        Ok(vec![command])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_plans_its_command() {
        let op = Shell::new("systemctl reload nginx")
            .with_sudo(true)
            .ignoring_failure();

        let commands = op.plan(&FactView::new()).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "systemctl reload nginx");
        assert!(commands[0].sudo);
        assert!(commands[0].ignore_failure);
    }

    #[test]
    fn test_shell_requires_no_facts() {
        assert!(Shell::new("true").required_facts().is_empty());
    }
}
