// SSH client configuration resolution

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::dirs;
use crate::output::errors::TidewayError;

/// Process-wide parse memo, keyed by config path
///
/// Created on first access from any host worker; the DashMap entry lock
/// guarantees a file is parsed at most once under concurrency. Cleared
/// explicitly (tests) or when the process exits.
static PARSE_CACHE: Lazy<DashMap<PathBuf, Arc<SshConfigFile>>> = Lazy::new(DashMap::new);

/// Drop all memoized config parses
pub fn clear_parse_cache() {
    PARSE_CACHE.clear();
}

/// One `Host` block: patterns plus settings in file order
#[derive(Debug, Clone, Default)]
struct HostBlock {
    patterns: Vec<String>,
    settings: Vec<(String, String)>,
}

/// A parsed SSH config with includes flattened, block order preserved
#[derive(Debug, Clone, Default)]
pub struct SshConfigFile {
    path: PathBuf,
    blocks: Vec<HostBlock>,
}

/// Resolved connection parameters for one target host
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHostConfig {
    pub user: Option<String>,
    pub port: u16,
    /// Accumulated across all matching blocks, in file order
    pub identity_files: Vec<PathBuf>,
    pub proxy_command: Option<String>,
    pub proxy_jump: Option<String>,
    pub forward_agent: bool,
    pub known_hosts_file: PathBuf,
}

impl Default for ResolvedHostConfig {
    fn default() -> Self {
        ResolvedHostConfig {
            user: None,
            port: 22,
            identity_files: Vec::new(),
            proxy_command: None,
            proxy_jump: None,
            forward_agent: false,
            known_hosts_file: dirs::expand_tilde("~/.ssh/known_hosts"),
        }
    }
}

/// How the connection to the target is proxied
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyDirective {
    /// Tunnel through a jump host
    Jump(JumpSpec),
    /// Shell out and speak SSH over the subprocess's stdio
    Command(String),
}

/// A `ProxyJump` destination: `[user@]host[:port]`
#[derive(Debug, Clone, PartialEq)]
pub struct JumpSpec {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl ResolvedHostConfig {
    /// The proxy route for this host. ProxyJump wins over ProxyCommand when
    /// both are configured.
    pub fn proxy(&self) -> Option<ProxyDirective> {
        if let Some(ref jump) = self.proxy_jump {
            return Some(ProxyDirective::Jump(parse_jump_spec(jump)));
        }
        self.proxy_command.clone().map(ProxyDirective::Command)
    }
}

/// Parse a ProxyJump destination. Only the first hop of a comma-separated
/// chain is taken here; further hops come from that host's own config.
pub fn parse_jump_spec(spec: &str) -> JumpSpec {
    let first = spec.split(',').next().unwrap_or(spec).trim();

    let (user, rest) = match first.split_once('@') {
        Some((user, rest)) => (Some(user.to_string()), rest),
        None => (None, first),
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()),
        None => (rest, None),
    };

    JumpSpec {
        user,
        host: host.to_string(),
        port,
    }
}

/// Resolve connection parameters for a target hostname
///
/// Uses the explicit config path when given, otherwise `~/.ssh/config` when
/// present, otherwise defaults only.
pub fn resolve(target: &str, config_path: Option<&Path>) -> Result<ResolvedHostConfig, TidewayError> {
    load(config_path)?.resolve(target)
}

/// Load (and memoize) a config file
pub fn load(config_path: Option<&Path>) -> Result<Arc<SshConfigFile>, TidewayError> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => match dirs::home_dir() {
            Some(home) => home.join(".ssh").join("config"),
            None => return Ok(Arc::new(SshConfigFile::default())),
        },
    };

    match PARSE_CACHE.entry(path.clone()) {
        dashmap::mapref::entry::Entry::Occupied(entry) => Ok(entry.get().clone()),
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            let parsed = Arc::new(SshConfigFile::parse_path(&path)?);
            entry.insert(parsed.clone());
            Ok(parsed)
        }
    }
}

impl SshConfigFile {
    /// Parse a config file, following Include directives
    pub fn parse_path(path: &Path) -> Result<Self, TidewayError> {
        let mut config = SshConfigFile {
            path: path.to_path_buf(),
            blocks: Vec::new(),
        };

        // Directives before any Host block apply to every host
        config.blocks.push(HostBlock {
            patterns: vec!["*".to_string()],
            settings: Vec::new(),
        });

        if path.exists() {
            let mut visited = HashSet::new();
            visited.insert(path.to_path_buf());
            parse_into(path, &mut visited, &mut config.blocks)?;
        }

        Ok(config)
    }

    /// Resolve parameters for a target hostname against this config
    pub fn resolve(&self, target: &str) -> Result<ResolvedHostConfig, TidewayError> {
        let mut resolved = ResolvedHostConfig::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for block in &self.blocks {
            if !block.patterns.iter().any(|p| pattern_matches(p, target)) {
                continue;
            }

            for (key, value) in &block.settings {
                match key.as_str() {
                    // IdentityFile accumulates; everything else first-match-wins
                    "identityfile" => {
                        resolved.identity_files.push(dirs::expand_tilde(value));
                    }
                    "user" => {
                        if seen.insert("user") {
                            resolved.user = Some(value.clone());
                        }
                    }
                    "port" => {
                        if seen.insert("port") {
                            resolved.port =
                                value.parse().map_err(|_| TidewayError::ConfigParse {
                                    file: self.path.clone(),
                                    line: format!("Port {}", value),
                                    message: format!("invalid port: {}", value),
                                })?;
                        }
                    }
                    "proxycommand" => {
                        if seen.insert("proxycommand") {
                            resolved.proxy_command = Some(value.clone());
                        }
                    }
                    "proxyjump" => {
                        if seen.insert("proxyjump") {
                            resolved.proxy_jump = Some(value.clone());
                        }
                    }
                    "forwardagent" => {
                        if seen.insert("forwardagent") {
                            resolved.forward_agent = value.eq_ignore_ascii_case("yes");
                        }
                    }
                    "userknownhostsfile" => {
                        if seen.insert("userknownhostsfile") {
                            resolved.known_hosts_file = dirs::expand_tilde(value);
                        }
                    }
                    // Unrecognized but well-formed keywords are ignored
                    _ => {}
                }
            }
        }

        Ok(resolved)
    }
}

fn parse_into(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    blocks: &mut Vec<HostBlock>,
) -> Result<(), TidewayError> {
    let content = std::fs::read_to_string(path).map_err(|e| TidewayError::Io {
        message: format!("failed to read ssh config: {}", e),
        path: Some(path.to_path_buf()),
    })?;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = split_config_line(line).ok_or_else(|| TidewayError::ConfigParse {
            file: path.to_path_buf(),
            line: line.to_string(),
            message: format!("unparsable line {}", line),
        })?;

        match key.as_str() {
            "host" => {
                blocks.push(HostBlock {
                    patterns: value.split_whitespace().map(unquote).collect(),
                    settings: Vec::new(),
                });
            }
            "include" => {
                for target in value.split_whitespace() {
                    let include_path = resolve_include_path(target);
                    if visited.contains(&include_path) {
                        return Err(TidewayError::ConfigLoop { file: include_path });
                    }
                    if include_path.is_file() {
                        visited.insert(include_path.clone());
                        parse_into(&include_path, visited, blocks)?;
                    }
                }
            }
            _ => {
                if let Some(block) = blocks.last_mut() {
                    block.settings.push((key, unquote(value)));
                }
            }
        }
    }

    Ok(())
}

/// Split a config line into a lowercased keyword and its argument
///
/// Accepts both `Key Value` and `Key=Value` forms. Returns None for lines
/// with no argument (unparsable).
fn split_config_line(line: &str) -> Option<(String, &str)> {
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = &line[..split_at];

    let mut rest = line[split_at..].trim_start();
    rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();

    if key.is_empty() || rest.is_empty() {
        return None;
    }

    Some((key.to_lowercase(), rest))
}

fn unquote(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('"')
        .trim_end_matches('"')
        .to_string()
}

/// Relative include paths resolve under ~/.ssh, matching client behavior
fn resolve_include_path(target: &str) -> PathBuf {
    let expanded = dirs::expand_tilde(target);
    if expanded.is_absolute() {
        return expanded;
    }
    match dirs::home_dir() {
        Some(home) => home.join(".ssh").join(expanded),
        None => expanded,
    }
}

/// Glob-style host pattern match supporting `*` and `?`
fn pattern_matches(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_config() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no_such_config");

        let config = SshConfigFile::parse_path(&missing).unwrap();
        let resolved = config.resolve("127.0.0.1").unwrap();

        assert_eq!(resolved.port, 22);
        assert_eq!(resolved.user, None);
        assert!(resolved.identity_files.is_empty());
    }

    #[test]
    fn test_basic_resolution_and_identity_accumulation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "config",
            "\
# Comment
Host 127.0.0.1
    IdentityFile /id_rsa
    IdentityFile /id_rsa2
    User testuser
    Port 33
    ProxyCommand echo thing
",
        );

        let config = SshConfigFile::parse_path(&path).unwrap();
        let resolved = config.resolve("127.0.0.1").unwrap();

        assert_eq!(
            resolved.identity_files,
            vec![PathBuf::from("/id_rsa"), PathBuf::from("/id_rsa2")]
        );
        assert_eq!(resolved.user.as_deref(), Some("testuser"));
        assert_eq!(resolved.port, 33);
        assert_eq!(resolved.proxy_command.as_deref(), Some("echo thing"));
        assert!(!resolved.forward_agent);

        // Non-matching host gets defaults
        let other = config.resolve("10.0.0.1").unwrap();
        assert_eq!(other.port, 22);
        assert_eq!(other.user, None);
    }

    #[test]
    fn test_identity_accumulates_across_blocks() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "config",
            "\
Host web*
    IdentityFile /first_key
    Port 2222

Host web1
    IdentityFile /second_key
    Port 9999
",
        );

        let config = SshConfigFile::parse_path(&path).unwrap();
        let resolved = config.resolve("web1").unwrap();

        assert_eq!(
            resolved.identity_files,
            vec![PathBuf::from("/first_key"), PathBuf::from("/second_key")]
        );
        // First match wins for everything but IdentityFile
        assert_eq!(resolved.port, 2222);
    }

    #[test]
    fn test_include_and_quoted_values() {
        let dir = TempDir::new().unwrap();
        let other = write_config(
            &dir,
            "other_file",
            "\
Host 192.168.1.1
    User \"otheruser\"
    ForwardAgent yes
    UserKnownHostsFile /known/hosts3
",
        );
        let path = write_config(
            &dir,
            "config",
            &format!(
                "\
Host 127.0.0.1
    User testuser

Include {}
",
                other.display()
            ),
        );

        let config = SshConfigFile::parse_path(&path).unwrap();
        let resolved = config.resolve("192.168.1.1").unwrap();

        assert_eq!(resolved.user.as_deref(), Some("otheruser"));
        assert!(resolved.forward_agent);
        assert_eq!(resolved.known_hosts_file, PathBuf::from("/known/hosts3"));
    }

    #[test]
    fn test_unparsable_line() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "config", "\n&\n");

        let err = SshConfigFile::parse_path(&path).unwrap_err();
        match err {
            TidewayError::ConfigParse { line, message, .. } => {
                assert_eq!(line, "&");
                assert!(message.contains("unparsable line &"));
            }
            other => panic!("expected ConfigParse, got {:?}", other),
        }
    }

    #[test]
    fn test_include_loop_detected() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("other_file");
        let path = write_config(
            &dir,
            "config",
            &format!("Include {}\n", other.display()),
        );
        fs::write(&other, format!("Include {}\n", other.display())).unwrap();

        let err = SshConfigFile::parse_path(&path).unwrap_err();
        match err {
            TidewayError::ConfigLoop { file } => assert_eq!(file, other),
            other => panic!("expected ConfigLoop, got {:?}", other),
        }
    }

    #[test]
    fn test_proxy_jump_beats_proxy_command() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "config",
            "\
Host 192.168.1.2
    ProxyCommand ssh -W %h:%p bastion
    ProxyJump nottestuser@127.0.0.1:33
",
        );

        let config = SshConfigFile::parse_path(&path).unwrap();
        let resolved = config.resolve("192.168.1.2").unwrap();

        match resolved.proxy() {
            Some(ProxyDirective::Jump(jump)) => {
                assert_eq!(jump.user.as_deref(), Some("nottestuser"));
                assert_eq!(jump.host, "127.0.0.1");
                assert_eq!(jump.port, Some(33));
            }
            other => panic!("expected ProxyJump to win, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_jump_spec_forms() {
        assert_eq!(
            parse_jump_spec("bastion"),
            JumpSpec {
                user: None,
                host: "bastion".to_string(),
                port: None,
            }
        );
        assert_eq!(
            parse_jump_spec("ops@bastion:2222,second@other"),
            JumpSpec {
                user: Some("ops".to_string()),
                host: "bastion".to_string(),
                port: Some(2222),
            }
        );
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("web*", "web1"));
        assert!(pattern_matches("web?", "web1"));
        assert!(!pattern_matches("web?", "web12"));
        assert!(!pattern_matches("db*", "web1"));
        assert!(pattern_matches("10.0.?.1", "10.0.3.1"));
    }

    #[test]
    fn test_parse_cache_memoizes() {
        clear_parse_cache();

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "config", "Host a\n    Port 33\n");

        let first = load(Some(&path)).unwrap();
        let second = load(Some(&path)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        clear_parse_cache();
        let third = load(Some(&path)).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_key_equals_value_form() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "config", "Host a\n    Port=44\n");

        let resolved = SshConfigFile::parse_path(&path)
            .unwrap()
            .resolve("a")
            .unwrap();
        assert_eq!(resolved.port, 44);
    }
}
