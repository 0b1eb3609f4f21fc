// Local shell transport for hosts that resolve to the control machine

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CommandOutput, Connection, Connector, ExecOpts};
use crate::inventory::Host;
use crate::output::errors::TidewayError;

/// Connector for hosts that resolve to the control machine itself
pub struct LocalConnector {
    command_timeout: Duration,
}

impl LocalConnector {
    pub fn new() -> Self {
        LocalConnector {
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Connection>, TidewayError> {
        Ok(Box::new(LocalConnection {
            host_name: host.name.clone(),
            command_timeout: self.command_timeout,
        }))
    }
}

/// Connection that executes commands on localhost
pub struct LocalConnection {
    host_name: String,
    command_timeout: Duration,
}

impl LocalConnection {
    pub fn new(host_name: impl Into<String>) -> Self {
        LocalConnection {
            host_name: host_name.into(),
            command_timeout: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn exec(&self, cmd: &str, opts: &ExecOpts) -> Result<CommandOutput, TidewayError> {
        let cmd = opts.effective_command(cmd);
        let timeout = opts.timeout.unwrap_or(self.command_timeout);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if opts.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn().map_err(|e| TidewayError::Transport {
            host: self.host_name.clone(),
            message: format!("failed to spawn local command: {}", e),
            suggestion: Some("check that 'sh' is available on the system".to_string()),
        })?;

        if let Some(ref stdin) = opts.stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(stdin.as_bytes())
                    .await
                    .map_err(|e| TidewayError::Transport {
                        host: self.host_name.clone(),
                        message: format!("failed to write stdin: {}", e),
                        suggestion: None,
                    })?;
            }
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| TidewayError::Transport {
                host: self.host_name.clone(),
                message: format!("failed to wait for command: {}", e),
                suggestion: None,
            })?,
            Err(_) => {
                return Err(TidewayError::CommandTimeout {
                    host: self.host_name.clone(),
                    command: cmd,
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn put_file(&self, local: &Path, remote: &str, mode: i32) -> Result<(), TidewayError> {
        tokio::fs::copy(local, remote)
            .await
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to copy file: {}", e),
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(remote, std::fs::Permissions::from_mode(mode as u32))
                .await
                .map_err(|e| TidewayError::Transfer {
                    host: self.host_name.clone(),
                    path: remote.to_string(),
                    message: format!("failed to set mode: {}", e),
                })?;
        }

        Ok(())
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), TidewayError> {
        tokio::fs::copy(remote, local)
            .await
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to copy file: {}", e),
            })?;
        Ok(())
    }

    fn disconnect(&self) {}

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_exec() {
        let conn = LocalConnection::new("localhost");
        let result = conn
            .exec("echo 'hello world'", &ExecOpts::default())
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_exec_failure_is_data() {
        let conn = LocalConnection::new("localhost");
        let result = conn.exec("exit 3", &ExecOpts::default()).await.unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_local_exec_stdin() {
        let conn = LocalConnection::new("localhost");
        let opts = ExecOpts {
            stdin: Some("from stdin\n".to_string()),
            ..Default::default()
        };
        let result = conn.exec("cat", &opts).await.unwrap();

        assert_eq!(result.stdout, "from stdin\n");
    }

    #[tokio::test]
    async fn test_local_exec_timeout() {
        let conn = LocalConnection::new("localhost");
        let opts = ExecOpts {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };

        let err = conn.exec("sleep 5", &opts).await.unwrap_err();
        match err {
            TidewayError::CommandTimeout { timeout_secs, .. } => assert_eq!(timeout_secs, 0),
            other => panic!("expected CommandTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_file_transfer_roundtrip() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let remote = dir.path().join("remote.txt");
        let back = dir.path().join("back.txt");
        std::fs::write(&src, "transfer me").unwrap();

        let conn = LocalConnection::new("localhost");
        conn.put_file(&src, remote.to_str().unwrap(), 0o644)
            .await
            .unwrap();
        conn.get_file(remote.to_str().unwrap(), &back).await.unwrap();

        assert_eq!(std::fs::read_to_string(&back).unwrap(), "transfer me");
    }
}
