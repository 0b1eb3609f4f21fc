// Output module for Tideway

use indicatif::ProgressBar;

pub mod errors;
pub mod json;
pub mod terminal;

pub use errors::TidewayError;
pub use json::JsonOutput;
pub use terminal::TerminalOutput;

use crate::engine::report::{OperationResult, RunReport};
use crate::engine::HostPlan;
use crate::facts::Value;

/// Output format for Tideway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors
    #[default]
    Text,
    /// Machine-readable JSON output (NDJSON format)
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(()),
        }
    }
}

/// Unified output writer supporting both text and JSON formats
pub enum OutputWriter {
    Text(TerminalOutput),
    Json(JsonOutput),
}

impl OutputWriter {
    pub fn new(format: OutputFormat, verbose: bool, quiet: bool) -> Self {
        match format {
            OutputFormat::Text => OutputWriter::Text(TerminalOutput::new(verbose, quiet)),
            OutputFormat::Json => OutputWriter::Json(JsonOutput::new()),
        }
    }

    pub fn print_run_header(&self, deploy: &str, hosts_count: usize) {
        match self {
            OutputWriter::Text(output) => output.print_run_header(deploy, hosts_count),
            OutputWriter::Json(output) => output.print_run_header(deploy, hosts_count),
        }
    }

    pub fn create_host_progress(&self, host: &str) -> ProgressBar {
        match self {
            OutputWriter::Text(output) => output.create_host_progress(host),
            OutputWriter::Json(_) => ProgressBar::hidden(),
        }
    }

    pub fn print_op_result(&self, host: &str, result: &OperationResult) {
        match self {
            OutputWriter::Text(output) => output.print_op_result(host, result),
            OutputWriter::Json(output) => output.print_op_result(host, result),
        }
    }

    pub fn print_host_error(&self, host: &str, error: &TidewayError) {
        match self {
            OutputWriter::Text(output) => output.print_host_error(host, error),
            OutputWriter::Json(output) => output.print_host_error(host, error),
        }
    }

    pub fn print_recap(&self, report: &RunReport) {
        match self {
            OutputWriter::Text(output) => output.print_recap(report),
            OutputWriter::Json(output) => output.print_recap(report),
        }
    }

    pub fn print_host_plan(&self, plan: &HostPlan) {
        match self {
            OutputWriter::Text(output) => output.print_host_plan(plan),
            OutputWriter::Json(output) => output.print_host_plan(plan),
        }
    }

    pub fn print_fact(&self, host: &str, fact: &str, value: &Value) {
        match self {
            OutputWriter::Text(output) => output.print_fact(host, fact, value),
            OutputWriter::Json(output) => output.print_fact(host, fact, value),
        }
    }
}
