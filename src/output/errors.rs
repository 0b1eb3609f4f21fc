// Human-readable error messages for Tideway

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Check if stderr is a TTY (errors are typically written to stderr)
    std::io::stderr().is_terminal()
}

/// All error types in Tideway
///
/// Per-host failures (everything except `DeploySpec` and `Cancelled`) are
/// caught by that host's worker and folded into its report entry; they never
/// abort other hosts.
#[derive(Debug, Clone)]
pub enum TidewayError {
    /// SSH config line that could not be parsed
    ConfigParse {
        file: PathBuf,
        line: String,
        message: String,
    },

    /// SSH config Include cycle
    ConfigLoop { file: PathBuf },

    /// Connection establishment failures (unreachable, handshake)
    Connect {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// All authentication methods exhausted
    Auth {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// Host key rejected by the trust policy or changed
    HostKeyRejected {
        host: String,
        fingerprint: String,
        message: String,
    },

    /// Fact output did not decode into the expected shape
    FactDecode {
        host: String,
        fact: String,
        message: String,
    },

    /// A command exceeded its individual timeout
    CommandTimeout {
        host: String,
        command: String,
        timeout_secs: u64,
    },

    /// Connection dropped or broke mid-command
    Transport {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// File transfer failure
    Transfer {
        host: String,
        path: String,
        message: String,
    },

    /// Inventory errors
    Inventory {
        message: String,
        suggestion: Option<String>,
    },

    /// Local I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Malformed deploy input (programmer error, run-fatal)
    DeploySpec {
        message: String,
        suggestion: Option<String>,
    },

    /// Run cancelled by the operator
    Cancelled,
}

impl std::error::Error for TidewayError {}

impl fmt::Display for TidewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        let use_colors = should_use_colors();
        if !use_colors {
            colored::control::set_override(false);
        }

        match self {
            TidewayError::ConfigParse {
                file,
                line,
                message,
            } => {
                writeln!(f, "{}: {}", "SSH CONFIG ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "File:".dimmed(), file.display())?;
                writeln!(f, "  {} {}", "Line:".dimmed(), line)?;
                Ok(())
            }

            TidewayError::ConfigLoop { file } => {
                writeln!(
                    f,
                    "{}: include loop detected in ssh config file: {}",
                    "SSH CONFIG ERROR".red().bold(),
                    file.display()
                )?;
                writeln!(
                    f,
                    "{}: remove the Include directive that references an already-included file",
                    "Hint".yellow().bold()
                )?;
                Ok(())
            }

            TidewayError::Connect {
                host,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONNECT ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            TidewayError::Auth {
                host,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "AUTH ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            TidewayError::HostKeyRejected {
                host,
                fingerprint,
                message,
            } => {
                writeln!(f, "{}: {}", "HOST KEY REJECTED".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                writeln!(f, "  {} {}", "Fingerprint:".dimmed(), fingerprint)?;
                Ok(())
            }

            TidewayError::FactDecode {
                host,
                fact,
                message,
            } => {
                writeln!(f, "{}: {}", "FACT DECODE ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Fact:".dimmed(), fact)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                Ok(())
            }

            TidewayError::CommandTimeout {
                host,
                command,
                timeout_secs,
            } => {
                writeln!(
                    f,
                    "{}: command timed out after {}s",
                    "TIMEOUT".red().bold(),
                    timeout_secs
                )?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                writeln!(f, "  {} {}", "Command:".dimmed(), command)?;
                Ok(())
            }

            TidewayError::Transport {
                host,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "TRANSPORT ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            TidewayError::Transfer {
                host,
                path,
                message,
            } => {
                writeln!(f, "{}: {}", "TRANSFER ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                writeln!(f, "  {} {}", "Path:".dimmed(), path)?;
                Ok(())
            }

            TidewayError::Inventory {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "INVENTORY ERROR".red().bold(), message)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            TidewayError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            TidewayError::DeploySpec {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "DEPLOY ERROR".red().bold(), message)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            TidewayError::Cancelled => {
                writeln!(f, "{}: run cancelled by operator", "CANCELLED".red().bold())
            }
        }
    }
}

impl TidewayError {
    /// Short one-line summary used in report entries
    pub fn summary(&self) -> String {
        match self {
            TidewayError::ConfigParse { line, message, .. } => {
                format!("ssh config: {} ({})", message, line)
            }
            TidewayError::ConfigLoop { file } => format!(
                "include loop detected in ssh config file: {}",
                file.display()
            ),
            TidewayError::Connect { message, .. } => format!("connect: {}", message),
            TidewayError::Auth { message, .. } => format!("auth: {}", message),
            TidewayError::HostKeyRejected { message, .. } => {
                format!("host key rejected: {}", message)
            }
            TidewayError::FactDecode { fact, message, .. } => {
                format!("fact {}: {}", fact, message)
            }
            TidewayError::CommandTimeout {
                command,
                timeout_secs,
                ..
            } => format!("command timed out after {}s: {}", timeout_secs, command),
            TidewayError::Transport { message, .. } => format!("transport: {}", message),
            TidewayError::Transfer { path, message, .. } => {
                format!("transfer {}: {}", path, message)
            }
            TidewayError::Inventory { message, .. } => format!("inventory: {}", message),
            TidewayError::Io { message, .. } => format!("io: {}", message),
            TidewayError::DeploySpec { message, .. } => format!("deploy: {}", message),
            TidewayError::Cancelled => "run cancelled".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = TidewayError::Connect {
            host: "web1".to_string(),
            message: "Connection refused".to_string(),
            suggestion: Some("Ensure SSH service is running on the target host".to_string()),
        };

        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("Connection refused"));
        assert!(clean_output.contains("web1"));
        assert!(clean_output.contains("Ensure SSH service"));
    }

    #[test]
    fn test_config_loop_display_names_file() {
        let err = TidewayError::ConfigLoop {
            file: PathBuf::from("other_file"),
        };

        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("include loop detected in ssh config file: other_file"));
    }

    #[test]
    fn test_summary_is_single_line() {
        let err = TidewayError::CommandTimeout {
            host: "db1".to_string(),
            command: "apt-get update".to_string(),
            timeout_secs: 30,
        };

        let summary = err.summary();
        assert!(!summary.contains('\n'));
        assert!(summary.contains("30s"));
    }
}
