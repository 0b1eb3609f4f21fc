// Core system facts

use std::collections::HashMap;
use std::sync::Arc;

use crate::connectors::shell_quote;

use super::{DecodeError, DerivedFact, Fact, FactRegistry, Value};

pub fn register(registry: &mut FactRegistry) {
    registry.register(Arc::new(Os));
    registry.register(Arc::new(Arch));
    registry.register(Arc::new(Kernel));
    registry.register(Arc::new(Hostname));
    registry.register(Arc::new(Which));
    registry.register(Arc::new(SystemdUnits));
    registry.register_derived(DerivedFact {
        kind: "systemd_service_status",
        source: "systemd_units",
        project: project_service_status,
    });
}

fn trimmed_string(output: &str) -> Result<Value, DecodeError> {
    Ok(Value::String(output.trim().to_string()))
}

/// Operating system name (`uname -s`)
pub struct Os;

impl Fact for Os {
    fn kind(&self) -> &'static str {
        "os"
    }

    fn command(&self, _args: &[String]) -> String {
        "uname -s".to_string()
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        trimmed_string(output)
    }
}

/// Machine architecture (`uname -m`)
pub struct Arch;

impl Fact for Arch {
    fn kind(&self) -> &'static str {
        "arch"
    }

    fn command(&self, _args: &[String]) -> String {
        "uname -m".to_string()
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        trimmed_string(output)
    }
}

/// Kernel release (`uname -r`)
pub struct Kernel;

impl Fact for Kernel {
    fn kind(&self) -> &'static str {
        "kernel"
    }

    fn command(&self, _args: &[String]) -> String {
        "uname -r".to_string()
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        trimmed_string(output)
    }
}

pub struct Hostname;

impl Fact for Hostname {
    fn kind(&self) -> &'static str {
        "hostname"
    }

    fn command(&self, _args: &[String]) -> String {
        "hostname -f 2>/dev/null || hostname".to_string()
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        trimmed_string(output)
    }
}

/// Resolved path of a binary, empty string when not installed
pub struct Which;

impl Fact for Which {
    fn kind(&self) -> &'static str {
        "which"
    }

    fn command(&self, args: &[String]) -> String {
        let bin = args.first().map(String::as_str).unwrap_or("");
        format!("command -v -- {} || true", shell_quote(bin))
    }

    fn missing_default(&self) -> Option<Value> {
        Some(Value::String(String::new()))
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        trimmed_string(output)
    }
}

/// All systemd units with their active state
///
/// Dict of unit name to active state (`active`, `inactive`, `failed`).
pub struct SystemdUnits;

impl Fact for SystemdUnits {
    fn kind(&self) -> &'static str {
        "systemd_units"
    }

    fn command(&self, _args: &[String]) -> String {
        "systemctl list-units --all --no-pager --no-legend --plain".to_string()
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("systemctl")
    }

    fn missing_default(&self) -> Option<Value> {
        Some(Value::Dict(HashMap::new()))
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        let mut units = HashMap::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // UNIT LOAD ACTIVE SUB DESCRIPTION...
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(DecodeError::FieldCount {
                    expected: 4,
                    found: fields.len(),
                    record: line.to_string(),
                });
            }

            units.insert(
                fields[0].to_string(),
                Value::String(fields[2].to_string()),
            );
        }

        Ok(Value::Dict(units))
    }
}

fn project_service_status(source: &Value, args: &[String]) -> Result<Value, DecodeError> {
    let unit = args
        .first()
        .ok_or_else(|| DecodeError::Other("systemd_service_status requires a unit name".into()))?;

    let units = source
        .as_dict()
        .ok_or_else(|| DecodeError::Other("systemd_units did not decode to a dict".into()))?;

    let name = if unit.contains('.') {
        unit.clone()
    } else {
        format!("{}.service", unit)
    };

    Ok(units
        .get(&name)
        .cloned()
        .unwrap_or_else(|| Value::String("unknown".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_which_quotes_argument() {
        let cmd = Which.command(&["my bin".to_string()]);
        assert!(cmd.contains("'my bin'"));
    }

    #[test]
    fn test_systemd_units_decode() {
        let output = "\
sshd.service    loaded active running OpenSSH server daemon
cron.service    loaded inactive dead   Regular background program processing
";
        let value = SystemdUnits.decode(output).unwrap();
        let units = value.as_dict().unwrap();

        assert_eq!(
            units.get("sshd.service"),
            Some(&Value::String("active".to_string()))
        );
        assert_eq!(
            units.get("cron.service"),
            Some(&Value::String("inactive".to_string()))
        );
    }

    #[test]
    fn test_systemd_units_decode_bad_record() {
        let err = SystemdUnits.decode("sshd.service loaded\n").unwrap_err();
        assert!(err.to_string().contains("expected 4 fields"));
    }

    #[test]
    fn test_service_status_projection() {
        let mut units = HashMap::new();
        units.insert(
            "nginx.service".to_string(),
            Value::String("active".to_string()),
        );
        let source = Value::Dict(units);

        let status = project_service_status(&source, &["nginx".to_string()]).unwrap();
        assert_eq!(status, Value::String("active".to_string()));

        let missing = project_service_status(&source, &["mysql".to_string()]).unwrap();
        assert_eq!(missing, Value::String("unknown".to_string()));
    }
}
