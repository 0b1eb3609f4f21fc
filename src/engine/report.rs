// Run results - append-only during apply, immutable once produced

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Terminal state of one host's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One executed (or faulted) command
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: String,
    /// None when the command faulted (timeout, transport) before exiting
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

/// Result of one operation on one host
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub operation: String,
    pub commands: Vec<CommandRecord>,
    /// Whether any command was dispatched (an empty plan means no change)
    pub changed: bool,
    pub failed: bool,
}

/// One host's complete outcome
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: String,
    pub status: HostStatus,
    pub error: Option<String>,
    pub operations: Vec<OperationResult>,
    pub finished_at: DateTime<Utc>,
}

impl HostReport {
    pub fn skipped(host: &str, reason: impl Into<String>) -> Self {
        HostReport {
            host: host.to_string(),
            status: HostStatus::Skipped,
            error: Some(reason.into()),
            operations: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(host: &str, reason: impl Into<String>, operations: Vec<OperationResult>) -> Self {
        HostReport {
            host: host.to_string(),
            status: HostStatus::Failed,
            error: Some(reason.into()),
            operations,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(host: &str, operations: Vec<OperationResult>) -> Self {
        HostReport {
            host: host.to_string(),
            status: HostStatus::Succeeded,
            error: None,
            operations,
            finished_at: Utc::now(),
        }
    }

    /// ok / changed / failed counts for the recap line
    pub fn counts(&self) -> (usize, usize, usize) {
        let ok = self.operations.iter().filter(|o| !o.failed).count();
        let changed = self
            .operations
            .iter()
            .filter(|o| o.changed && !o.failed)
            .count();
        let failed = self.operations.iter().filter(|o| o.failed).count();
        (ok, changed, failed)
    }
}

/// The aggregated run report
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub deploy: String,
    pub hosts: Vec<HostReport>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.hosts.iter().any(|h| h.status == HostStatus::Failed)
    }

    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let report = HostReport::succeeded(
            "web1",
            vec![
                OperationResult {
                    operation: "a".to_string(),
                    commands: Vec::new(),
                    changed: false,
                    failed: false,
                },
                OperationResult {
                    operation: "b".to_string(),
                    commands: Vec::new(),
                    changed: true,
                    failed: false,
                },
                OperationResult {
                    operation: "c".to_string(),
                    commands: Vec::new(),
                    changed: true,
                    failed: true,
                },
            ],
        );

        assert_eq!(report.counts(), (2, 1, 1));
    }

    #[test]
    fn test_any_failed() {
        let report = RunReport {
            deploy: "test".to_string(),
            hosts: vec![
                HostReport::succeeded("a", Vec::new()),
                HostReport::skipped("b", "cancelled"),
            ],
            started_at: Utc::now(),
            duration_secs: 0.1,
        };
        assert!(!report.any_failed());

        let mut report = report;
        report.hosts.push(HostReport::failed("c", "boom", Vec::new()));
        assert!(report.any_failed());
    }
}
