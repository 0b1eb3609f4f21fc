// Package manager and installed-package facts

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DecodeError, DerivedFact, Fact, FactRegistry, Value};

pub fn register(registry: &mut FactRegistry) {
    registry.register(Arc::new(PackageManager));
    registry.register(Arc::new(DebPackages));
    registry.register(Arc::new(RpmPackages));
    registry.register_derived(DerivedFact {
        kind: "deb_package",
        source: "deb_packages",
        project: project_package,
    });
    registry.register_derived(DerivedFact {
        kind: "rpm_package",
        source: "rpm_packages",
        project: project_package,
    });
}

static PACKAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+) (\S+)$").expect("package regex"));

/// Parse `name version` lines into a dict of name -> list of versions
fn parse_packages(output: &str) -> Result<Value, DecodeError> {
    let mut packages: HashMap<String, Value> = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let captures = PACKAGE_REGEX.captures(line).ok_or_else(|| DecodeError::Record {
            record: line.to_string(),
            message: "expected `name version`".to_string(),
        })?;

        let name = captures[1].to_string();
        let version = Value::String(captures[2].to_string());

        match packages.entry(name).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(versions) => versions.push(version),
            _ => unreachable!(),
        }
    }

    Ok(Value::Dict(packages))
}

/// First available package manager on the host
pub struct PackageManager;

impl Fact for PackageManager {
    fn kind(&self) -> &'static str {
        "package_manager"
    }

    fn command(&self, _args: &[String]) -> String {
        "for m in apt-get dnf yum zypper pacman apk; do \
         command -v $m >/dev/null 2>&1 && { echo $m; break; }; done"
            .to_string()
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        let manager = output.trim();
        if manager.is_empty() {
            return Err(DecodeError::Other(
                "could not detect a supported package manager".to_string(),
            ));
        }

        let name = if manager == "apt-get" { "apt" } else { manager };
        Ok(Value::String(name.to_string()))
    }
}

/// Installed dpkg packages: dict of name -> list of versions
pub struct DebPackages;

impl Fact for DebPackages {
    fn kind(&self) -> &'static str {
        "deb_packages"
    }

    fn command(&self, _args: &[String]) -> String {
        r"dpkg-query --show --showformat '${Package} ${Version}\n'".to_string()
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("dpkg-query")
    }

    fn missing_default(&self) -> Option<Value> {
        Some(Value::Dict(HashMap::new()))
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        parse_packages(output)
    }
}

/// Installed rpm packages: dict of name -> list of versions
pub struct RpmPackages;

impl Fact for RpmPackages {
    fn kind(&self) -> &'static str {
        "rpm_packages"
    }

    fn command(&self, _args: &[String]) -> String {
        r"rpm --queryformat '%{NAME} %{VERSION}-%{RELEASE}\n' -qa".to_string()
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("rpm")
    }

    fn missing_default(&self) -> Option<Value> {
        Some(Value::Dict(HashMap::new()))
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        parse_packages(output)
    }
}

/// Narrow a package dict down to one package's versions
///
/// `Bool(false)` when the package is not installed.
fn project_package(source: &Value, args: &[String]) -> Result<Value, DecodeError> {
    let name = args
        .first()
        .ok_or_else(|| DecodeError::Other("package projection requires a package name".into()))?;

    let packages = source
        .as_dict()
        .ok_or_else(|| DecodeError::Other("package fact did not decode to a dict".into()))?;

    Ok(packages.get(name).cloned().unwrap_or(Value::Bool(false)))
}
