// Machine-readable NDJSON output

use serde_json::json;

use crate::engine::report::{OperationResult, RunReport};
use crate::engine::HostPlan;
use crate::facts::Value;
use crate::output::errors::TidewayError;

/// Writes one JSON object per line to stdout
pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        JsonOutput
    }

    fn emit(&self, value: serde_json::Value) {
        println!("{}", value);
    }

    pub fn print_run_header(&self, deploy: &str, hosts_count: usize) {
        self.emit(json!({
            "event": "run_start",
            "deploy": deploy,
            "hosts": hosts_count,
        }));
    }

    pub fn print_op_result(&self, host: &str, result: &OperationResult) {
        self.emit(json!({
            "event": "operation",
            "host": host,
            "result": result,
        }));
    }

    pub fn print_host_error(&self, host: &str, error: &TidewayError) {
        self.emit(json!({
            "event": "host_error",
            "host": host,
            "error": error.summary(),
        }));
    }

    pub fn print_recap(&self, report: &RunReport) {
        self.emit(json!({
            "event": "recap",
            "report": report,
        }));
    }

    pub fn print_host_plan(&self, plan: &HostPlan) {
        let operations: Vec<serde_json::Value> = plan
            .operations
            .iter()
            .map(|(operation, commands)| {
                json!({
                    "operation": operation,
                    "commands": commands
                        .iter()
                        .map(|c| json!({
                            "command": c.command,
                            "sudo": c.sudo,
                            "ignore_failure": c.ignore_failure,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();

        self.emit(json!({
            "event": "plan",
            "host": plan.host,
            "error": plan.error,
            "operations": operations,
        }));
    }

    pub fn print_fact(&self, host: &str, fact: &str, value: &Value) {
        self.emit(json!({
            "event": "fact",
            "host": host,
            "fact": fact,
            "value": value.to_json(),
        }));
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}
