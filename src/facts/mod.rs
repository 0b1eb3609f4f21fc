// Fact system - typed remote-state queries, decoded and cached per run

pub mod files;
pub mod packages;
pub mod server;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::connectors::{Connection, ExecOpts};
use crate::output::errors::TidewayError;

/// A decoded fact value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Dict(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Convert to a serde_json value for machine output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(|v| v.to_json()).collect()),
            Value::Dict(d) => serde_json::Value::Object(
                d.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Error from a fact decoder
///
/// Converted into `TidewayError::FactDecode` with host context at the engine
/// boundary.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected {expected} fields, found {found} in record `{record}`")]
    FieldCount {
        expected: usize,
        found: usize,
        record: String,
    },

    #[error("unparsable record `{record}`: {message}")]
    Record { record: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// A typed remote-state query
///
/// Facts are read-only snapshots. `decode` must be a pure function of the
/// command output.
pub trait Fact: Send + Sync {
    /// Registry kind, e.g. `deb_packages`
    fn kind(&self) -> &'static str;

    /// Shell command whose output feeds `decode`
    fn command(&self, args: &[String]) -> String;

    /// Binary that must exist for the command to be meaningful
    ///
    /// When set, the command is gated so a missing binary produces empty
    /// output (and the missing default) in a single transport round-trip.
    fn requires_command(&self) -> Option<&'static str> {
        None
    }

    /// Value used when the underlying command is missing or produced no output
    fn missing_default(&self) -> Option<Value> {
        None
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError>;
}

/// A fact computed by projecting another fact's cached value
///
/// No transport call of its own: the source fact is fetched (and cached)
/// once, then `project` runs against the cached value.
pub struct DerivedFact {
    pub kind: &'static str,
    pub source: &'static str,
    pub project: fn(&Value, &[String]) -> Result<Value, DecodeError>,
}

enum Registered {
    Remote(Arc<dyn Fact>),
    Derived(DerivedFact),
}

/// Registry of all known fact kinds
pub struct FactRegistry {
    facts: HashMap<&'static str, Registered>,
}

impl FactRegistry {
    pub fn new() -> Self {
        FactRegistry {
            facts: HashMap::new(),
        }
    }

    /// Registry with all built-in facts
    pub fn builtin() -> Self {
        let mut registry = FactRegistry::new();
        server::register(&mut registry);
        packages::register(&mut registry);
        files::register(&mut registry);
        registry
    }

    pub fn register(&mut self, fact: Arc<dyn Fact>) {
        self.facts.insert(fact.kind(), Registered::Remote(fact));
    }

    pub fn register_derived(&mut self, fact: DerivedFact) {
        self.facts.insert(fact.kind, Registered::Derived(fact));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.facts.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.facts.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for FactRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Query descriptor: fact kind plus normalized arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactQuery {
    pub kind: String,
    pub args: Vec<String>,
}

impl FactQuery {
    pub fn new(kind: impl Into<String>, args: Vec<String>) -> Self {
        FactQuery {
            kind: kind.into(),
            args,
        }
    }

    pub fn bare(kind: impl Into<String>) -> Self {
        FactQuery {
            kind: kind.into(),
            args: Vec::new(),
        }
    }

    /// Cache key: kind plus normalized arguments
    pub fn cache_key(&self) -> String {
        if self.args.is_empty() {
            self.kind.clone()
        } else {
            format!("{}({})", self.kind, self.args.join(","))
        }
    }
}

struct CachedEntry {
    value: Value,
    #[allow(dead_code)]
    fetched_at: Instant,
}

/// Per-host, per-run fact cache
///
/// Owned by the host's sequential worker: exactly one writer, so no locking.
/// Entries are never invalidated intra-run; an operation that needs fresh
/// state after a mutating command must declare a distinct query.
#[derive(Default)]
pub struct FactCache {
    entries: HashMap<String, CachedEntry>,
}

impl FactCache {
    pub fn new() -> Self {
        FactCache {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(
            key,
            CachedEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fetch a fact value through a connection, memoized in `cache`
///
/// Cache hit returns immediately with no transport call. A miss issues
/// exactly one command through the connection.
pub async fn fetch(
    registry: &FactRegistry,
    cache: &mut FactCache,
    conn: &dyn Connection,
    host: &str,
    query: &FactQuery,
) -> Result<Value, TidewayError> {
    let key = query.cache_key();
    if let Some(value) = cache.get(&key) {
        return Ok(value.clone());
    }

    let value = match registry.facts.get(query.kind.as_str()) {
        None => {
            return Err(TidewayError::DeploySpec {
                message: format!("unknown fact kind: {}", query.kind),
                suggestion: Some("register the fact before declaring it".to_string()),
            })
        }
        Some(Registered::Remote(fact)) => {
            fetch_remote(fact.as_ref(), conn, host, &query.args, &key).await?
        }
        Some(Registered::Derived(derived)) => {
            let source = match registry.facts.get(derived.source) {
                Some(Registered::Remote(fact)) => fact,
                _ => {
                    return Err(TidewayError::DeploySpec {
                        message: format!(
                            "derived fact {} names a non-remote source: {}",
                            derived.kind, derived.source
                        ),
                        suggestion: None,
                    })
                }
            };

            // The source is a broader fact with no arguments of its own; it
            // lands in the cache so later derivations skip the transport.
            let source_key = derived.source.to_string();
            let source_value = match cache.get(&source_key) {
                Some(value) => value.clone(),
                None => {
                    let value =
                        fetch_remote(source.as_ref(), conn, host, &[], &source_key).await?;
                    cache.insert(source_key, value.clone());
                    value
                }
            };

            (derived.project)(&source_value, &query.args).map_err(|e| {
                TidewayError::FactDecode {
                    host: host.to_string(),
                    fact: key.clone(),
                    message: e.to_string(),
                }
            })?
        }
    };

    cache.insert(key, value.clone());
    Ok(value)
}

async fn fetch_remote(
    fact: &dyn Fact,
    conn: &dyn Connection,
    host: &str,
    args: &[String],
    key: &str,
) -> Result<Value, TidewayError> {
    let command = fact.command(args);
    let command = match fact.requires_command() {
        Some(bin) => format!("! command -v {} >/dev/null 2>&1 || {{ {}; }}", bin, command),
        None => command,
    };

    tracing::debug!(host, fact = key, %command, "fetching fact");

    let output = conn.exec(&command, &ExecOpts::default()).await?;

    if !output.success() || output.stdout.trim().is_empty() {
        if let Some(default) = fact.missing_default() {
            return Ok(default);
        }
    }

    if !output.success() {
        return Err(TidewayError::FactDecode {
            host: host.to_string(),
            fact: key.to_string(),
            message: format!(
                "command exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
        });
    }

    fact.decode(&output.stdout)
        .map_err(|e| TidewayError::FactDecode {
            host: host.to_string(),
            fact: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(FactQuery::bare("os").cache_key(), "os");
        assert_eq!(
            FactQuery::new("file_stat", vec!["/etc".to_string()]).cache_key(),
            "file_stat(/etc)"
        );
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = FactCache::new();
        assert!(cache.get("os").is_none());

        cache.insert("os".to_string(), Value::String("Linux".to_string()));
        assert_eq!(cache.get("os"), Some(&Value::String("Linux".to_string())));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_builtin_registry_contains_core_facts() {
        let registry = FactRegistry::builtin();

        for kind in [
            "os",
            "arch",
            "kernel",
            "which",
            "package_manager",
            "deb_packages",
            "rpm_packages",
            "deb_package",
            "rpm_package",
            "file_stat",
            "systemd_units",
            "systemd_service_status",
        ] {
            assert!(registry.contains(kind), "missing builtin fact: {}", kind);
        }
    }

    #[test]
    fn test_value_json_roundtrip_shape() {
        let mut dict = HashMap::new();
        dict.insert("mode".to_string(), Value::String("755".to_string()));
        dict.insert("size".to_string(), Value::Int(4096));

        let json = Value::Dict(dict).to_json();
        assert_eq!(json["mode"], "755");
        assert_eq!(json["size"], 4096);
    }
}
