// Per-host state machine with bounded fan-out across hosts

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::connectors::{Connection, Connector, ExecOpts};
use crate::facts::{self, FactCache, FactRegistry};
use crate::inventory::Host;
use crate::ops::{Command, DeclaredOp, FactView};
use crate::output::errors::TidewayError;
use crate::output::OutputWriter;

use super::report::{CommandRecord, HostReport, OperationResult, RunReport};

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent hosts
    pub parallel: usize,
    /// Abort a host's remaining operations on its first failure
    pub fail_fast: bool,
    /// Default per-command deadline
    pub command_timeout: Duration,
    /// Escalate every command (CLI override)
    pub sudo: bool,
    pub sudo_user: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallel: 10,
            fail_fast: true,
            command_timeout: Duration::from_secs(300),
            sudo: false,
            sudo_user: None,
        }
    }
}

/// Handle for requesting run cancellation
///
/// In-flight workers finish their current command and then stop dispatching;
/// hosts not yet started are skipped.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Planned commands per host, without applying them
#[derive(Debug)]
pub struct HostPlan {
    pub host: String,
    pub error: Option<String>,
    pub operations: Vec<(String, Vec<Command>)>,
}

/// Per-host lifecycle, used for trace events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostPhase {
    Connecting,
    GatheringFacts,
    Planning,
    Applying,
}

impl HostPhase {
    fn label(&self) -> &'static str {
        match self {
            HostPhase::Connecting => "connecting",
            HostPhase::GatheringFacts => "gathering facts",
            HostPhase::Planning => "planning",
            HostPhase::Applying => "applying",
        }
    }
}

enum ApplyOutcome {
    /// All commands ran clean (or were ignored failures)
    Completed,
    /// A command failed; continuation policy decides what happens next
    Failed,
    /// The host cannot continue (transport fault, cancellation)
    Fatal,
}

/// The execution engine
pub struct Executor {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<FactRegistry>,
    output: Arc<Mutex<OutputWriter>>,
    cancel: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        output: Arc<Mutex<OutputWriter>>,
    ) -> Self {
        Executor {
            config,
            connector,
            registry: Arc::new(FactRegistry::builtin()),
            output,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_registry(mut self, registry: FactRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            flag: self.cancel.clone(),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Drive a full run: one worker per host under the global concurrency cap
    pub async fn run(&self, deploy: &str, hosts: &[Host], ops: &[DeclaredOp]) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let semaphore = Arc::new(Semaphore::new(self.config.parallel.max(1)));
        let workers = hosts
            .iter()
            .map(|host| self.run_host(host, ops, semaphore.clone()));
        let host_reports = join_all(workers).await;

        RunReport {
            deploy: deploy.to_string(),
            hosts: host_reports,
            started_at,
            duration_secs: start.elapsed().as_secs_f64(),
        }
    }

    /// Connect, gather and plan without applying
    pub async fn plan_run(&self, hosts: &[Host], ops: &[DeclaredOp]) -> Vec<HostPlan> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel.max(1)));
        let workers = hosts.iter().map(|host| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                self.plan_host(host, ops).await
            }
        });
        join_all(workers).await
    }

    async fn plan_host(&self, host: &Host, ops: &[DeclaredOp]) -> HostPlan {
        let conn = match self.connector.connect(host).await {
            Ok(conn) => conn,
            Err(e) => {
                return HostPlan {
                    host: host.name.clone(),
                    error: Some(e.summary()),
                    operations: Vec::new(),
                }
            }
        };

        let plan = match self.gather_and_plan(host, &*conn, ops).await {
            Ok(planned) => HostPlan {
                host: host.name.clone(),
                error: None,
                operations: planned,
            },
            Err(e) => HostPlan {
                host: host.name.clone(),
                error: Some(e.summary()),
                operations: Vec::new(),
            },
        };

        conn.disconnect();
        plan
    }

    async fn run_host(
        &self,
        host: &Host,
        ops: &[DeclaredOp],
        semaphore: Arc<Semaphore>,
    ) -> HostReport {
        // Pending -> Skipped when cancellation lands before dispatch
        if self.cancelled() {
            return HostReport::skipped(&host.name, "run cancelled before dispatch");
        }

        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return HostReport::skipped(&host.name, "run cancelled before dispatch"),
        };

        if self.cancelled() {
            return HostReport::skipped(&host.name, "run cancelled before dispatch");
        }

        let progress = self.output.lock().create_host_progress(&host.name);
        self.trace_phase(host, HostPhase::Connecting, &progress);

        let conn = match self.connector.connect(host).await {
            Ok(conn) => conn,
            Err(e) => {
                progress.finish_and_clear();
                self.output.lock().print_host_error(&host.name, &e);
                return HostReport::failed(&host.name, e.summary(), Vec::new());
            }
        };

        let report = self.drive_host(host, &*conn, ops, &progress).await;

        conn.disconnect();
        progress.finish_and_clear();
        report
    }

    fn trace_phase(&self, host: &Host, phase: HostPhase, progress: &indicatif::ProgressBar) {
        tracing::debug!(host = %host.name, phase = phase.label(), "host phase");
        progress.set_message(phase.label());
    }

    /// Fetch every declared fact, then plan every operation in order
    async fn gather_and_plan(
        &self,
        host: &Host,
        conn: &dyn Connection,
        ops: &[DeclaredOp],
    ) -> Result<Vec<(String, Vec<Command>)>, TidewayError> {
        let mut cache = FactCache::new();

        for declared in ops {
            for query in declared.op.required_facts() {
                facts::fetch(&self.registry, &mut cache, conn, &host.name, &query).await?;
            }
        }

        let mut planned = Vec::with_capacity(ops.len());
        for declared in ops {
            let mut view = FactView::new();
            for query in declared.op.required_facts() {
                if let Some(value) = cache.get(&query.cache_key()) {
                    view.insert(&query, value.clone());
                }
            }
            let commands = declared.op.plan(&view)?;
            planned.push((declared.label.clone(), commands));
        }

        Ok(planned)
    }

    async fn drive_host(
        &self,
        host: &Host,
        conn: &dyn Connection,
        ops: &[DeclaredOp],
        progress: &indicatif::ProgressBar,
    ) -> HostReport {
        self.trace_phase(host, HostPhase::GatheringFacts, progress);

        // GatheringFacts and Planning both block the host on error
        self.trace_phase(host, HostPhase::Planning, progress);
        let planned = match self.gather_and_plan(host, conn, ops).await {
            Ok(planned) => planned,
            Err(e) => {
                self.output.lock().print_host_error(&host.name, &e);
                return HostReport::failed(&host.name, e.summary(), Vec::new());
            }
        };

        self.trace_phase(host, HostPhase::Applying, progress);

        let mut operations = Vec::new();
        let mut host_error: Option<String> = None;

        for (label, commands) in planned {
            if self.cancelled() {
                host_error.get_or_insert_with(|| TidewayError::Cancelled.summary());
                break;
            }

            progress.set_message(label.clone());
            let (result, outcome, error) = self.apply_operation(conn, &label, commands).await;

            self.output.lock().print_op_result(&host.name, &result);
            operations.push(result);

            if let Some(error) = error {
                host_error.get_or_insert(error);
            }

            match outcome {
                ApplyOutcome::Completed => {}
                ApplyOutcome::Failed => {
                    if self.config.fail_fast {
                        break;
                    }
                }
                ApplyOutcome::Fatal => break,
            }
        }

        match host_error {
            Some(error) => HostReport::failed(&host.name, error, operations),
            None => HostReport::succeeded(&host.name, operations),
        }
    }

    /// Apply one operation's command stream, strictly in order
    async fn apply_operation(
        &self,
        conn: &dyn Connection,
        label: &str,
        commands: Vec<Command>,
    ) -> (OperationResult, ApplyOutcome, Option<String>) {
        let mut records = Vec::new();
        let mut outcome = ApplyOutcome::Completed;
        let mut error = None;

        for command in commands {
            // Finish the in-flight command on cancellation, never mid-command
            if self.cancelled() {
                outcome = ApplyOutcome::Fatal;
                error = Some(TidewayError::Cancelled.summary());
                break;
            }

            let opts = ExecOpts {
                sudo: command.sudo || self.config.sudo,
                sudo_user: command
                    .sudo_user
                    .clone()
                    .or_else(|| self.config.sudo_user.clone()),
                timeout: Some(command.timeout.unwrap_or(self.config.command_timeout)),
                stdin: None,
            };

            tracing::debug!(host = conn.host_name(), operation = label, command = %command.command, "dispatching");

            match conn.exec(&command.command, &opts).await {
                Ok(output) => {
                    let failed = !output.success() && !command.ignore_failure;
                    records.push(CommandRecord {
                        command: command.command.clone(),
                        exit_code: Some(output.exit_code),
                        stdout: output.stdout,
                        stderr: output.stderr,
                        error: None,
                    });

                    if failed {
                        outcome = ApplyOutcome::Failed;
                        error = Some(format!(
                            "command exited {}: {}",
                            output.exit_code, command.command
                        ));
                        break;
                    }
                }
                Err(e) => {
                    records.push(CommandRecord {
                        command: command.command.clone(),
                        exit_code: None,
                        stdout: String::new(),
                        stderr: String::new(),
                        error: Some(e.summary()),
                    });

                    // Timeouts fail the command; transport faults end the host
                    outcome = match e {
                        TidewayError::Transport { .. } => ApplyOutcome::Fatal,
                        _ => ApplyOutcome::Failed,
                    };
                    error = Some(e.summary());
                    break;
                }
            }
        }

        let failed = !matches!(outcome, ApplyOutcome::Completed);
        let result = OperationResult {
            operation: label.to_string(),
            changed: !records.is_empty(),
            failed,
            commands: records,
        };

        (result, outcome, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::CommandOutput;
    use crate::engine::report::HostStatus;
    use crate::facts::FactQuery;
    use crate::ops::{FactView, Operation, Shell};
    use crate::output::OutputFormat;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    type ExecHook = Arc<dyn Fn(&str) + Send + Sync>;

    /// Scripted connector: canned outputs, connection counting, failure hosts
    struct MockConnector {
        fail_connect: Vec<String>,
        responses: Vec<(String, CommandOutput)>,
        exec_delay: Duration,
        exec_hook: Option<ExecHook>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        exec_log: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockConnector {
        fn new() -> Self {
            MockConnector {
                fail_connect: Vec::new(),
                responses: Vec::new(),
                exec_delay: Duration::ZERO,
                exec_hook: None,
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                exec_log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_exec_hook(mut self, hook: ExecHook) -> Self {
            self.exec_hook = Some(hook);
            self
        }

        fn fail_connect(mut self, host: &str) -> Self {
            self.fail_connect.push(host.to_string());
            self
        }

        fn respond(mut self, needle: &str, exit_code: i32, stdout: &str) -> Self {
            self.responses.push((
                needle.to_string(),
                CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code,
                },
            ));
            self
        }

        fn with_exec_delay(mut self, delay: Duration) -> Self {
            self.exec_delay = delay;
            self
        }

        fn commands_matching(&self, needle: &str) -> usize {
            self.exec_log
                .lock()
                .iter()
                .filter(|(_, cmd)| cmd.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, host: &Host) -> Result<Box<dyn Connection>, TidewayError> {
            if self.fail_connect.contains(&host.name) {
                return Err(TidewayError::Connect {
                    host: host.name.clone(),
                    message: "connection refused".to_string(),
                    suggestion: None,
                });
            }

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);

            Ok(Box::new(MockConnection {
                host_name: host.name.clone(),
                responses: self.responses.clone(),
                exec_delay: self.exec_delay,
                exec_hook: self.exec_hook.clone(),
                active: self.active.clone(),
                exec_log: self.exec_log.clone(),
                closed: AtomicBool::new(false),
            }))
        }
    }

    struct MockConnection {
        host_name: String,
        responses: Vec<(String, CommandOutput)>,
        exec_delay: Duration,
        exec_hook: Option<ExecHook>,
        active: Arc<AtomicUsize>,
        exec_log: Arc<Mutex<Vec<(String, String)>>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn exec(&self, cmd: &str, opts: &ExecOpts) -> Result<CommandOutput, TidewayError> {
            let effective = opts.effective_command(cmd);
            self.exec_log
                .lock()
                .push((self.host_name.clone(), effective.clone()));

            if let Some(ref hook) = self.exec_hook {
                hook(&effective);
            }

            if let Some(timeout) = opts.timeout {
                if self.exec_delay > timeout {
                    return Err(TidewayError::CommandTimeout {
                        host: self.host_name.clone(),
                        command: effective,
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }
            if !self.exec_delay.is_zero() {
                tokio::time::sleep(self.exec_delay).await;
            }

            for (needle, output) in &self.responses {
                if effective.contains(needle.as_str()) {
                    return Ok(output.clone());
                }
            }

            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn put_file(
            &self,
            _local: &std::path::Path,
            _remote: &str,
            _mode: i32,
        ) -> Result<(), TidewayError> {
            Ok(())
        }

        async fn get_file(
            &self,
            _remote: &str,
            _local: &std::path::Path,
        ) -> Result<(), TidewayError> {
            Ok(())
        }

        fn disconnect(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }

        fn host_name(&self) -> &str {
            &self.host_name
        }
    }

    fn quiet_output() -> Arc<Mutex<OutputWriter>> {
        Arc::new(Mutex::new(OutputWriter::new(OutputFormat::Text, false, true)))
    }

    fn shell_op(label: &str, command: &str) -> DeclaredOp {
        DeclaredOp::labeled(label, Arc::new(Shell::new(command)))
    }

    fn hosts(names: &[&str]) -> Vec<Host> {
        names.iter().map(|n| Host::new(*n)).collect()
    }

    /// Operation with a declared fact dependency, for cache tests
    struct FactProbe {
        query: FactQuery,
    }

    impl Operation for FactProbe {
        fn name(&self) -> String {
            "fact probe".to_string()
        }

        fn required_facts(&self) -> Vec<FactQuery> {
            vec![self.query.clone()]
        }

        fn plan(&self, facts: &FactView) -> Result<Vec<Command>, TidewayError> {
            facts.require(&self.query)?;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let connector = Arc::new(
            MockConnector::new()
                .fail_connect("bad")
                .respond("echo ok", 0, "ok\n"),
        );
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let hosts = hosts(&["bad", "good"]);
        let ops = vec![shell_op("say ok", "echo ok")];
        let report = executor.run("test", &hosts, &ops).await;

        let bad = report.host("bad").unwrap();
        assert_eq!(bad.status, HostStatus::Failed);
        assert!(bad.error.as_deref().unwrap().contains("connect"));
        assert!(bad.operations.is_empty());

        let good = report.host("good").unwrap();
        assert_eq!(good.status, HostStatus::Succeeded);
        assert_eq!(good.operations.len(), 1);
        assert_eq!(good.operations[0].commands[0].exit_code, Some(0));

        assert!(report.any_failed());
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let connector = Arc::new(MockConnector::new().with_exec_delay(Duration::from_millis(30)));
        let config = EngineConfig {
            parallel: 2,
            ..Default::default()
        };
        let executor = Executor::new(config, connector.clone(), quiet_output());

        let hosts = hosts(&["h1", "h2", "h3", "h4", "h5", "h6"]);
        let ops = vec![shell_op("wait", "sleep-ish")];
        let report = executor.run("test", &hosts, &ops).await;

        assert_eq!(report.hosts.len(), 6);
        assert!(!report.any_failed());
        assert!(
            connector.peak.load(Ordering::SeqCst) <= 2,
            "more than 2 hosts held connections at once"
        );
    }

    #[tokio::test]
    async fn test_fact_cache_single_transport_call() {
        let connector = Arc::new(MockConnector::new().respond("uname -s", 0, "Linux\n"));
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        // Two operations declaring the same fact: one underlying command
        let ops = vec![
            DeclaredOp::labeled(
                "probe 1",
                Arc::new(FactProbe {
                    query: FactQuery::bare("os"),
                }),
            ),
            DeclaredOp::labeled(
                "probe 2",
                Arc::new(FactProbe {
                    query: FactQuery::bare("os"),
                }),
            ),
        ];
        let hosts = hosts(&["h1"]);
        let report = executor.run("test", &hosts, &ops).await;

        assert!(!report.any_failed());
        assert_eq!(connector.commands_matching("uname -s"), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_host() {
        let connector = Arc::new(MockConnector::new().respond("exit 2", 2, ""));
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let ops = vec![shell_op("boom", "exit 2"), shell_op("after", "echo after")];
        let report = executor.run("test", &hosts(&["h1"]), &ops).await;

        let host = report.host("h1").unwrap();
        assert_eq!(host.status, HostStatus::Failed);
        assert_eq!(host.operations.len(), 1);
        assert_eq!(connector.commands_matching("echo after"), 0);
    }

    #[tokio::test]
    async fn test_continue_policy_runs_remaining_ops() {
        let connector = Arc::new(MockConnector::new().respond("exit 2", 2, ""));
        let config = EngineConfig {
            fail_fast: false,
            ..Default::default()
        };
        let executor = Executor::new(config, connector.clone(), quiet_output());

        let ops = vec![shell_op("boom", "exit 2"), shell_op("after", "echo after")];
        let report = executor.run("test", &hosts(&["h1"]), &ops).await;

        let host = report.host("h1").unwrap();
        // Failure recorded, later operation still ran
        assert_eq!(host.status, HostStatus::Failed);
        assert_eq!(host.operations.len(), 2);
        assert!(host.operations[0].failed);
        assert!(!host.operations[1].failed);
        assert_eq!(connector.commands_matching("echo after"), 1);
    }

    #[tokio::test]
    async fn test_ignored_failure_does_not_fail_host() {
        let connector = Arc::new(MockConnector::new().respond("exit 2", 2, ""));
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let ops = vec![DeclaredOp::labeled(
            "tolerated",
            Arc::new(Shell::new("exit 2").ignoring_failure()),
        )];
        let report = executor.run("test", &hosts(&["h1"]), &ops).await;

        let host = report.host("h1").unwrap();
        assert_eq!(host.status, HostStatus::Succeeded);
        assert_eq!(host.operations[0].commands[0].exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_command_timeout_recorded_as_failure() {
        let connector = Arc::new(MockConnector::new().with_exec_delay(Duration::from_secs(5)));
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let ops = vec![DeclaredOp::labeled(
            "slow",
            Arc::new(Shell::new("sleep 600").with_timeout(Duration::from_secs(1))),
        )];
        let report = executor.run("test", &hosts(&["h1"]), &ops).await;

        let host = report.host("h1").unwrap();
        assert_eq!(host.status, HostStatus::Failed);
        let record = &host.operations[0].commands[0];
        assert_eq!(record.exit_code, None);
        assert!(record.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_before_run_skips_all_hosts() {
        let connector = Arc::new(MockConnector::new());
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        executor.cancel_token().cancel();
        let report = executor
            .run("test", &hosts(&["h1", "h2"]), &[shell_op("noop", "true")])
            .await;

        for host in &report.hosts {
            assert_eq!(host.status, HostStatus::Skipped);
        }
        assert!(!report.any_failed());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_current_command() {
        // The hook fires while "step one" is executing, mimicking an
        // operator cancelling mid-apply.
        let cancelled_from: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
        let hook_slot = cancelled_from.clone();

        let connector = Arc::new(MockConnector::new().with_exec_hook(Arc::new(move |cmd| {
            if cmd.contains("step one") {
                if let Some(token) = hook_slot.lock().as_ref() {
                    token.cancel();
                }
            }
        })));
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());
        *cancelled_from.lock() = Some(executor.cancel_token());

        let ops = vec![
            shell_op("first", "echo step one"),
            shell_op("second", "echo step two"),
        ];
        let report = executor.run("test", &hosts(&["h1"]), &ops).await;

        let host = report.host("h1").unwrap();
        assert_eq!(host.status, HostStatus::Failed);
        assert_eq!(host.error.as_deref(), Some("run cancelled"));

        // The in-flight command completed; nothing further was dispatched
        assert_eq!(host.operations.len(), 1);
        assert_eq!(host.operations[0].commands[0].exit_code, Some(0));
        assert_eq!(connector.commands_matching("step two"), 0);
    }

    #[tokio::test]
    async fn test_escalated_command_is_wrapped() {
        let connector = Arc::new(MockConnector::new());
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let ops = vec![DeclaredOp::labeled(
            "restart",
            Arc::new(Shell::new("systemctl restart nginx").with_sudo(true)),
        )];
        executor.run("test", &hosts(&["h1"]), &ops).await;

        let log = connector.exec_log.lock();
        let (_, dispatched) = log
            .iter()
            .find(|(_, cmd)| cmd.contains("systemctl"))
            .unwrap();
        assert!(dispatched.starts_with("sudo -n -- sh -c"));
    }

    #[tokio::test]
    async fn test_plan_run_does_not_apply() {
        let connector = Arc::new(MockConnector::new());
        let executor = Executor::new(EngineConfig::default(), connector.clone(), quiet_output());

        let ops = vec![shell_op("would run", "echo would-run")];
        let plans = executor.plan_run(&hosts(&["h1"]), &ops).await;

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].operations[0].1.len(), 1);
        // Planned but never dispatched
        assert_eq!(connector.commands_matching("echo would-run"), 0);
    }

    #[test]
    fn test_host_phase_labels() {
        let mut labels = HashMap::new();
        for phase in [
            HostPhase::Connecting,
            HostPhase::GatheringFacts,
            HostPhase::Planning,
            HostPhase::Applying,
        ] {
            labels.insert(phase.label(), phase);
        }
        assert_eq!(labels.len(), 4);
    }
}
