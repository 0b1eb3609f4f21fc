// Filesystem facts

use std::collections::HashMap;
use std::sync::Arc;

use crate::connectors::shell_quote;

use super::{DecodeError, Fact, FactRegistry, Value};

pub fn register(registry: &mut FactRegistry) {
    registry.register(Arc::new(FileStat));
}

/// Stat record for one path
///
/// Decodes to a dict of type/mode/user/group/size, or `Bool(false)` when the
/// path does not exist.
pub struct FileStat;

impl Fact for FileStat {
    fn kind(&self) -> &'static str {
        "file_stat"
    }

    fn command(&self, args: &[String]) -> String {
        let path = args.first().map(String::as_str).unwrap_or("");
        format!(
            "stat -c '%F\t%a\t%U\t%G\t%s' -- {} 2>/dev/null || true",
            shell_quote(path)
        )
    }

    fn missing_default(&self) -> Option<Value> {
        Some(Value::Bool(false))
    }

    fn decode(&self, output: &str) -> Result<Value, DecodeError> {
        let record = output.trim();
        let fields: Vec<&str> = record.split('\t').collect();

        if fields.len() != 5 {
            return Err(DecodeError::FieldCount {
                expected: 5,
                found: fields.len(),
                record: record.to_string(),
            });
        }

        let size: i64 = fields[4].parse().map_err(|_| DecodeError::Record {
            record: record.to_string(),
            message: format!("invalid size field `{}`", fields[4]),
        })?;

        let mut stat = HashMap::new();
        stat.insert("type".to_string(), Value::String(fields[0].to_string()));
        stat.insert("mode".to_string(), Value::String(fields[1].to_string()));
        stat.insert("user".to_string(), Value::String(fields[2].to_string()));
        stat.insert("group".to_string(), Value::String(fields[3].to_string()));
        stat.insert("size".to_string(), Value::Int(size));

        Ok(Value::Dict(stat))
    }
}
