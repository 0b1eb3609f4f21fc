// Hosts, groups and variable overlays

use std::collections::HashMap;
use std::path::Path;

use crate::facts::Value;
use crate::output::errors::TidewayError;

/// A single host in the inventory
///
/// Connection parameters left unset here are completed from the SSH config
/// cascade at connect time.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub vars: HashMap<String, Value>,
    pub groups: Vec<String>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Host {
            address: name.clone(),
            name,
            port: None,
            user: None,
            vars: HashMap::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Check if this host should use the local connector
    pub fn is_local(&self) -> bool {
        if let Some(Value::String(conn)) = self.vars.get("connection") {
            if conn == "local" {
                return true;
            }
        }

        self.name == "localhost"
            || self.name == "127.0.0.1"
            || self.name == "::1"
            || self.address == "localhost"
            || self.address == "127.0.0.1"
            || self.address == "::1"
    }

    /// Create a localhost host
    pub fn localhost() -> Self {
        Host::new("localhost")
            .with_address("127.0.0.1")
            .with_var("connection", Value::String("local".to_string()))
    }
}

/// A group of hosts
#[derive(Debug, Clone, Default)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
    pub children: Vec<String>,
    pub vars: HashMap<String, Value>,
}

impl HostGroup {
    pub fn new(name: impl Into<String>) -> Self {
        HostGroup {
            name: name.into(),
            hosts: Vec::new(),
            children: Vec::new(),
            vars: HashMap::new(),
        }
    }
}

/// The complete inventory
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub hosts: HashMap<String, Host>,
    pub groups: HashMap<String, HostGroup>,
    host_order: Vec<String>,
}

impl Inventory {
    pub fn new() -> Self {
        let mut inv = Inventory::default();
        // Always have an "all" group
        inv.groups.insert("all".to_string(), HostGroup::new("all"));
        inv
    }

    /// Load inventory from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, TidewayError> {
        let content = std::fs::read_to_string(path).map_err(|e| TidewayError::Io {
            message: format!("failed to read inventory: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        Self::parse_str(&content)
    }

    /// Load inventory from a YAML string
    pub fn parse_str(content: &str) -> Result<Self, TidewayError> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| TidewayError::Inventory {
                message: format!("invalid inventory YAML: {}", e),
                suggestion: Some("check inventory file syntax".to_string()),
            })?;

        let mut inv = Inventory::new();

        if yaml.as_mapping().is_none() {
            return Err(TidewayError::Inventory {
                message: "inventory must be a YAML mapping".to_string(),
                suggestion: Some("start with `hosts:`".to_string()),
            });
        }

        if let Some(hosts) = yaml.get("hosts").and_then(|v| v.as_mapping()) {
            for (host_name, host_val) in hosts {
                let name = host_name.as_str().ok_or_else(|| TidewayError::Inventory {
                    message: "host names must be strings".to_string(),
                    suggestion: None,
                })?;

                let mut host = Host::new(name);
                if let Some(address) = host_val.get("address").and_then(|v| v.as_str()) {
                    host = host.with_address(address);
                }
                if let Some(port) = host_val.get("port").and_then(|v| v.as_u64()) {
                    host = host.with_port(port as u16);
                }
                if let Some(user) = host_val.get("user").and_then(|v| v.as_str()) {
                    host = host.with_user(user);
                }
                if let Some(vars) = host_val.get("vars").and_then(|v| v.as_mapping()) {
                    for (key, value) in vars {
                        if let Some(key) = key.as_str() {
                            host = host.with_var(key, yaml_to_value(value.clone()));
                        }
                    }
                }
                inv.add_host(host);
            }
        }

        if let Some(groups) = yaml.get("groups").and_then(|v| v.as_mapping()) {
            for (group_name, group_val) in groups {
                let name = group_name.as_str().ok_or_else(|| TidewayError::Inventory {
                    message: "group names must be strings".to_string(),
                    suggestion: None,
                })?;

                let mut group = HostGroup::new(name);

                if let Some(hosts) = group_val.get("hosts").and_then(|v| v.as_sequence()) {
                    for host_name in hosts.iter().filter_map(|v| v.as_str()) {
                        if !inv.hosts.contains_key(host_name) {
                            return Err(TidewayError::Inventory {
                                message: format!(
                                    "group {} references unknown host: {}",
                                    name, host_name
                                ),
                                suggestion: Some("declare the host under `hosts:`".to_string()),
                            });
                        }
                        group.hosts.push(host_name.to_string());
                        if let Some(host) = inv.hosts.get_mut(host_name) {
                            if !host.groups.contains(&name.to_string()) {
                                host.groups.push(name.to_string());
                            }
                        }
                    }
                }

                if let Some(children) = group_val.get("children").and_then(|v| v.as_sequence()) {
                    group.children = children
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect();
                }

                if let Some(vars) = group_val.get("vars").and_then(|v| v.as_mapping()) {
                    for (key, value) in vars {
                        if let Some(key) = key.as_str() {
                            group.vars.insert(key.to_string(), yaml_to_value(value.clone()));
                        }
                    }
                }

                inv.add_group(group);
            }
        }

        Ok(inv)
    }

    /// Build an ad-hoc inventory from a comma-separated `--hosts` value
    pub fn from_cli_hosts(hosts_str: &str, default_user: Option<&str>) -> Self {
        let mut inv = Inventory::new();

        for host_str in hosts_str.split(',') {
            let host_str = host_str.trim();
            if host_str.is_empty() {
                continue;
            }

            let mut host = Host::new(host_str).with_address(host_str);
            if let Some(user) = default_user {
                host = host.with_user(user);
            }

            inv.add_host(host);
        }

        inv
    }

    /// Add a host to the inventory
    pub fn add_host(&mut self, host: Host) {
        let name = host.name.clone();

        // Add to "all" group
        if let Some(all) = self.groups.get_mut("all") {
            if !all.hosts.contains(&name) {
                all.hosts.push(name.clone());
            }
        }

        for group_name in &host.groups {
            self.groups
                .entry(group_name.clone())
                .or_insert_with(|| HostGroup::new(group_name))
                .hosts
                .push(name.clone());
        }

        if !self.host_order.contains(&name) {
            self.host_order.push(name.clone());
        }
        self.hosts.insert(name, host);
    }

    /// Add a group to the inventory
    pub fn add_group(&mut self, group: HostGroup) {
        self.groups.insert(group.name.clone(), group);
    }

    /// Get hosts matching a pattern: "all", a group name, a host name, or a
    /// comma-separated union of these. Declaration order is preserved.
    pub fn get_hosts(&self, pattern: &str) -> Vec<&Host> {
        let mut selected: Vec<&str> = Vec::new();

        for part in pattern.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if part == "all" {
                for name in &self.host_order {
                    if !selected.contains(&name.as_str()) {
                        selected.push(name);
                    }
                }
            } else if let Some(group) = self.groups.get(part) {
                for host in self.expand_group(group) {
                    if !selected.contains(&host.name.as_str()) {
                        selected.push(&host.name);
                    }
                }
            } else if self.hosts.contains_key(part) {
                if !selected.contains(&part) {
                    selected.push(part);
                }
            }
        }

        selected
            .into_iter()
            .filter_map(|name| self.hosts.get(name))
            .collect()
    }

    /// Get a single host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Expand a group to its hosts (including children)
    fn expand_group<'a>(&'a self, group: &'a HostGroup) -> Vec<&'a Host> {
        let mut hosts = Vec::new();

        for host_name in &group.hosts {
            if let Some(host) = self.hosts.get(host_name) {
                hosts.push(host);
            }
        }

        for child_name in &group.children {
            if let Some(child) = self.groups.get(child_name) {
                hosts.extend(self.expand_group(child));
            }
        }

        // Deduplicate
        let mut seen = std::collections::HashSet::new();
        hosts.retain(|h| seen.insert(h.name.clone()));

        hosts
    }

    /// Get effective variables for a host (all < group vars < host vars)
    pub fn get_host_vars(&self, host: &Host) -> HashMap<String, Value> {
        let mut vars = HashMap::new();

        if let Some(all) = self.groups.get("all") {
            vars.extend(all.vars.clone());
        }

        for group_name in &host.groups {
            if let Some(group) = self.groups.get(group_name) {
                vars.extend(group.vars.clone());
            }
        }

        vars.extend(host.vars.clone());

        vars
    }

    /// Get the total number of hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// All group names
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }
}

fn yaml_to_value(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::String(n.to_string())
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::List(seq.into_iter().map(yaml_to_value).collect())
        }
        serde_yaml::Value::Mapping(map) => Value::Dict(
            map.into_iter()
                .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), yaml_to_value(v))))
                .collect(),
        ),
        _ => Value::String(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_creation() {
        let host = Host::new("app1")
            .with_address("10.20.0.4")
            .with_port(2222)
            .with_user("deploy")
            .with_var("tier", Value::String("staging".to_string()));

        assert_eq!(host.name, "app1");
        assert_eq!(host.address, "10.20.0.4");
        assert_eq!(host.port, Some(2222));
        assert_eq!(host.user.as_deref(), Some("deploy"));
        assert!(!host.is_local());
        assert!(Host::localhost().is_local());
    }

    #[test]
    fn test_parse_yaml_inventory() {
        let content = r#"
hosts:
  web1:
    address: 192.168.1.10
    user: admin
  web2:
    address: 192.168.1.11
  db1:
    address: 192.168.1.20
    port: 2222

groups:
  webservers:
    hosts: [web1, web2]
    vars:
      role: web
  databases:
    hosts: [db1]
"#;
        let inv = Inventory::parse_str(content).unwrap();

        assert_eq!(inv.host_count(), 3);
        assert_eq!(inv.get_hosts("webservers").len(), 2);
        assert_eq!(inv.get_hosts("all").len(), 3);

        let web1 = inv.get_host("web1").unwrap();
        let vars = inv.get_host_vars(web1);
        assert_eq!(vars.get("role"), Some(&Value::String("web".to_string())));
    }

    #[test]
    fn test_parse_yaml_inventory_unknown_host_in_group() {
        let content = r#"
hosts:
  web1: {}
groups:
  webservers:
    hosts: [web1, ghost]
"#;
        let err = Inventory::parse_str(content).unwrap_err();
        assert!(err.summary().contains("ghost"));
    }

    #[test]
    fn test_get_hosts_union_and_order() {
        let content = r#"
hosts:
  web1: {}
  web2: {}
  db1: {}
groups:
  webservers:
    hosts: [web1, web2]
"#;
        let inv = Inventory::parse_str(content).unwrap();

        let hosts = inv.get_hosts("db1,webservers");
        let names: Vec<&str> = hosts.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["db1", "web1", "web2"]);

        // Host order for "all" follows declaration order
        let all: Vec<&str> = inv.get_hosts("all").iter().map(|h| h.name.as_str()).collect();
        assert_eq!(all, vec!["web1", "web2", "db1"]);
    }

    #[test]
    fn test_from_cli_hosts() {
        let inv = Inventory::from_cli_hosts("a.example.com, b.example.com", Some("deploy"));

        assert_eq!(inv.host_count(), 2);
        let host = inv.get_host("a.example.com").unwrap();
        assert_eq!(host.user.as_deref(), Some("deploy"));
    }
}
