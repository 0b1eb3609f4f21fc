// Deploy file loading - YAML entries into registered operations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::output::errors::TidewayError;

use super::files::Directory;
use super::packages::Package;
use super::shell::Shell;
use super::DeclaredOp;

/// A loaded deploy: its name and ordered operations
#[derive(Debug)]
pub struct DeployPlan {
    pub name: String,
    pub operations: Vec<DeclaredOp>,
}

/// Load a deploy file from disk
pub fn load_deploy_file(path: &Path) -> Result<DeployPlan, TidewayError> {
    let content = std::fs::read_to_string(path).map_err(|e| TidewayError::Io {
        message: format!("failed to read deploy file: {}", e),
        path: Some(path.to_path_buf()),
    })?;

    let mut plan = parse_deploy(&content)?;
    if plan.name.is_empty() {
        plan.name = path.display().to_string();
    }
    Ok(plan)
}

/// Parse a deploy document
pub fn parse_deploy(content: &str) -> Result<DeployPlan, TidewayError> {
    let file: DeployFile = serde_yaml::from_str(content).map_err(|e| TidewayError::DeploySpec {
        message: format!("invalid deploy file: {}", e),
        suggestion: Some("expected an `operations:` list".to_string()),
    })?;

    let mut operations = Vec::with_capacity(file.operations.len());
    for (index, entry) in file.operations.into_iter().enumerate() {
        operations.push(entry.into_declared(index)?);
    }

    Ok(DeployPlan {
        name: file.name.unwrap_or_default(),
        operations,
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeployFile {
    name: Option<String>,
    operations: Vec<OpEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpEntry {
    name: Option<String>,
    package: Option<PackageSpec>,
    directory: Option<DirectorySpec>,
    shell: Option<ShellSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageSpec {
    name: String,
    #[serde(default = "default_state")]
    state: String,
    #[serde(default = "default_true")]
    sudo: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectorySpec {
    path: String,
    #[serde(default = "default_state")]
    state: String,
    mode: Option<String>,
    #[serde(default)]
    sudo: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellSpec {
    command: String,
    #[serde(default)]
    sudo: bool,
    sudo_user: Option<String>,
    /// Seconds
    timeout: Option<u64>,
    #[serde(default)]
    ignore_failure: bool,
}

fn default_state() -> String {
    "present".to_string()
}

fn default_true() -> bool {
    true
}

fn parse_state(state: &str, index: usize) -> Result<bool, TidewayError> {
    match state {
        "present" => Ok(true),
        "absent" => Ok(false),
        other => Err(TidewayError::DeploySpec {
            message: format!("operation {}: unknown state `{}`", index + 1, other),
            suggestion: Some("use `present` or `absent`".to_string()),
        }),
    }
}

impl OpEntry {
    fn into_declared(self, index: usize) -> Result<DeclaredOp, TidewayError> {
        let op: Arc<dyn super::Operation> = match (self.package, self.directory, self.shell) {
            (Some(spec), None, None) => Arc::new(Package {
                present: parse_state(&spec.state, index)?,
                name: spec.name,
                sudo: spec.sudo,
            }),
            (None, Some(spec), None) => Arc::new(Directory {
                present: parse_state(&spec.state, index)?,
                path: spec.path,
                mode: spec.mode,
                sudo: spec.sudo,
            }),
            (None, None, Some(spec)) => Arc::new(Shell {
                command: spec.command,
                sudo: spec.sudo,
                sudo_user: spec.sudo_user,
                timeout: spec.timeout.map(Duration::from_secs),
                ignore_failure: spec.ignore_failure,
            }),
            _ => {
                return Err(TidewayError::DeploySpec {
                    message: format!(
                        "operation {}: expected exactly one of package/directory/shell",
                        index + 1
                    ),
                    suggestion: None,
                })
            }
        };

        Ok(match self.name {
            Some(name) => DeclaredOp::labeled(name, op),
            None => DeclaredOp::new(op),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let content = r#"
name: Provision web tier
operations:
  - name: nginx installed
    package:
      name: nginx
  - directory:
      path: /var/www/app
      mode: "755"
      sudo: true
  - shell:
      command: systemctl reload nginx
      sudo: true
      ignore_failure: true
      timeout: 60
"#;
        let plan = parse_deploy(content).unwrap();

        assert_eq!(plan.name, "Provision web tier");
        assert_eq!(plan.operations.len(), 3);
        assert_eq!(plan.operations[0].label, "nginx installed");
        assert_eq!(plan.operations[1].label, "directory /var/www/app present");
    }

    #[test]
    fn test_parse_deploy_rejects_multiple_modules() {
        let content = r#"
operations:
  - package:
      name: nginx
    shell:
      command: echo hi
"#;
        let err = parse_deploy(content).unwrap_err();
        assert!(err.summary().contains("exactly one"));
    }

    #[test]
    fn test_parse_deploy_rejects_unknown_module() {
        let content = r#"
operations:
  - frobnicate:
      level: 11
"#;
        assert!(parse_deploy(content).is_err());
    }

    #[test]
    fn test_parse_deploy_rejects_bad_state() {
        let content = r#"
operations:
  - package:
      name: nginx
      state: sideways
"#;
        let err = parse_deploy(content).unwrap_err();
        assert!(err.summary().contains("sideways"));
    }
}
