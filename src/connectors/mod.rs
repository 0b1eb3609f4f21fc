// Connector capability contract shared by all transports

pub mod known_hosts;
pub mod local;
pub mod ssh;
pub mod ssh_config;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::inventory::Host;
use crate::output::errors::TidewayError;

pub use known_hosts::HostKeyPolicy;
pub use local::{LocalConnection, LocalConnector};
pub use ssh::{SshConnection, SshConnector};
pub use ssh_config::ResolvedHostConfig;

/// Result of executing a command
///
/// A non-zero exit code is a normal result, not a transport fault.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execution options for a single command
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    /// Escalate with sudo before dispatch
    pub sudo: bool,
    /// Run as this user (via sudo -u)
    pub sudo_user: Option<String>,
    /// Per-command deadline; the connector default applies when unset
    pub timeout: Option<Duration>,
    /// Data to feed to the command's stdin
    pub stdin: Option<String>,
}

impl ExecOpts {
    /// Apply privilege escalation to a command, if requested
    pub fn effective_command(&self, cmd: &str) -> String {
        if self.sudo {
            if let Some(ref user) = self.sudo_user {
                format!("sudo -n -u {} -- sh -c {}", user, shell_quote(cmd))
            } else {
                format!("sudo -n -- sh -c {}", shell_quote(cmd))
            }
        } else {
            cmd.to_string()
        }
    }
}

/// Quote a string for use as a single sh word
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

/// Transport factory
///
/// `connect` either yields a fully established session or fails; it never
/// returns a partially open connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Connection>, TidewayError>;
}

/// A live session on one host
///
/// Owned by a single host worker; never shared across hosts.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a command and capture its output
    async fn exec(&self, cmd: &str, opts: &ExecOpts) -> Result<CommandOutput, TidewayError>;

    /// Upload a local file to the remote path with the given mode
    async fn put_file(&self, local: &Path, remote: &str, mode: i32) -> Result<(), TidewayError>;

    /// Download a remote file to a local path
    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), TidewayError>;

    /// Close the session. Idempotent; safe to call after transport faults.
    fn disconnect(&self);

    fn host_name(&self) -> &str;
}

/// Connector that routes each host to the right transport
///
/// Local hosts get the local shell; everything else goes over SSH.
pub struct AutoConnector {
    ssh: SshConnector,
    local: LocalConnector,
}

impl AutoConnector {
    pub fn new(ssh: SshConnector) -> Self {
        AutoConnector {
            ssh,
            local: LocalConnector::new(),
        }
    }
}

#[async_trait]
impl Connector for AutoConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Connection>, TidewayError> {
        if host.is_local() {
            self.local.connect(host).await
        } else {
            self.ssh.connect(host).await
        }
    }
}

/// Simple home directory lookup
pub(crate) mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }

    /// Expand a leading `~` to the home directory
    pub fn expand_tilde(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = home_dir() {
                return home.join(rest);
            }
        } else if path == "~" {
            if let Some(home) = home_dir() {
                return home;
            }
        }
        PathBuf::from(path)
    }
}
