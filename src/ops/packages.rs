// Package operations

use crate::facts::{FactQuery, Value};
use crate::output::errors::TidewayError;

use super::{Command, FactView, Operation};

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Pacman,
    Apk,
}

impl PackageManager {
    pub fn from_fact(name: &str) -> Option<Self> {
        match name {
            "apt" => Some(PackageManager::Apt),
            "dnf" => Some(PackageManager::Dnf),
            "yum" => Some(PackageManager::Yum),
            "zypper" => Some(PackageManager::Zypper),
            "pacman" => Some(PackageManager::Pacman),
            "apk" => Some(PackageManager::Apk),
            _ => None,
        }
    }

    pub fn install_cmd(&self, package: &str) -> String {
        match self {
            PackageManager::Dnf => format!("dnf install -y {}", package),
            PackageManager::Yum => format!("yum install -y {}", package),
            PackageManager::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                package
            ),
            PackageManager::Zypper => format!("zypper install -y {}", package),
            PackageManager::Pacman => format!("pacman -S --needed --noconfirm {}", package),
            PackageManager::Apk => format!("apk add {}", package),
        }
    }

    pub fn remove_cmd(&self, package: &str) -> String {
        match self {
            PackageManager::Dnf => format!("dnf remove -y {}", package),
            PackageManager::Yum => format!("yum remove -y {}", package),
            PackageManager::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get remove -y {}",
                package
            ),
            PackageManager::Zypper => format!("zypper remove -y {}", package),
            PackageManager::Pacman => format!("pacman -R --noconfirm {}", package),
            PackageManager::Apk => format!("apk del {}", package),
        }
    }

    /// Which installed-package fact answers for this manager
    fn package_fact(&self) -> &'static str {
        match self {
            PackageManager::Apt => "deb_package",
            PackageManager::Dnf | PackageManager::Yum | PackageManager::Zypper => "rpm_package",
            // No package listing fact; the install command is itself
            // idempotent for these managers.
            PackageManager::Pacman | PackageManager::Apk => "deb_package",
        }
    }
}

/// Declared state: a package is installed or absent
pub struct Package {
    pub name: String,
    pub present: bool,
    pub sudo: bool,
}

impl Package {
    pub fn present(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            present: true,
            sudo: true,
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            present: false,
            sudo: true,
        }
    }

    fn manager_query(&self) -> FactQuery {
        FactQuery::bare("package_manager")
    }

    fn deb_query(&self) -> FactQuery {
        FactQuery::new("deb_package", vec![self.name.clone()])
    }

    fn rpm_query(&self) -> FactQuery {
        FactQuery::new("rpm_package", vec![self.name.clone()])
    }
}

impl Operation for Package {
    fn name(&self) -> String {
        format!(
            "package {} {}",
            self.name,
            if self.present { "present" } else { "absent" }
        )
    }

    fn required_facts(&self) -> Vec<FactQuery> {
        vec![self.manager_query(), self.deb_query(), self.rpm_query()]
    }

    fn plan(&self, facts: &FactView) -> Result<Vec<Command>, TidewayError> {
        let manager = facts.require(&self.manager_query())?;
        let manager = manager
            .as_str()
            .and_then(PackageManager::from_fact)
            .ok_or_else(|| TidewayError::DeploySpec {
                message: format!("unsupported package manager fact: {}", manager),
                suggestion: None,
            })?;

        let installed_query = match manager.package_fact() {
            "rpm_package" => self.rpm_query(),
            _ => self.deb_query(),
        };

        // A missing package projects to Bool(false); anything else is a
        // version list.
        let installed = !matches!(facts.require(&installed_query)?, Value::Bool(false));

        let commands = match (self.present, installed) {
            (true, false) => vec![Command::new(manager.install_cmd(&self.name)).with_sudo(self.sudo)],
            (false, true) => vec![Command::new(manager.remove_cmd(&self.name)).with_sudo(self.sudo)],
            _ => Vec::new(),
        };

        Ok(commands)
    }
}
