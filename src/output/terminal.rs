// Rich terminal output for Tideway

use std::io::IsTerminal;
use std::time::Duration;

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::engine::report::{HostStatus, OperationResult, RunReport};
use crate::engine::HostPlan;
use crate::facts::Value;
use crate::output::errors::TidewayError;

/// Terminal output manager
pub struct TerminalOutput {
    multi_progress: MultiProgress,
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR (https://no-color.org/) and non-TTY output
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            multi_progress: MultiProgress::new(),
            verbose,
            quiet,
            is_tty,
        }
    }

    /// Print a header for a run
    pub fn print_run_header(&self, deploy: &str, hosts_count: usize) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({} hosts)",
            "DEPLOY".green().bold(),
            deploy.cyan(),
            hosts_count
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    /// Create a progress spinner for a host
    pub fn create_host_progress(&self, host: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let pb = self.multi_progress.add(ProgressBar::new_spinner());

        let style = if self.is_tty {
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix:.bold} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        } else {
            ProgressStyle::default_spinner()
                .template("{prefix} {msg}")
                .unwrap()
        };

        pb.set_style(style);
        pb.set_prefix(host.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Print one operation's result for a host
    pub fn print_op_result(&self, host: &str, result: &OperationResult) {
        if self.quiet && !result.failed {
            return;
        }

        let status = if result.failed {
            "FAILED".red().bold()
        } else if result.changed {
            "CHANGED".yellow()
        } else {
            "OK".green()
        };

        let line = format!(
            "  {} {} {} {} {}",
            status,
            "=>".dimmed(),
            host.white().bold(),
            "·".dimmed(),
            result.operation
        );
        self.multi_progress.println(&line).ok();

        if self.verbose || result.failed {
            for record in &result.commands {
                self.multi_progress
                    .println(format!("      $ {}", record.command.dimmed()))
                    .ok();

                for stream in [&record.stdout, &record.stderr] {
                    for out_line in stream.lines().take(10) {
                        self.multi_progress
                            .println(format!("      {}", out_line.dimmed()))
                            .ok();
                    }
                }

                if let Some(ref error) = record.error {
                    self.multi_progress
                        .println(format!("      {}", error.red()))
                        .ok();
                }
            }
        }
    }

    /// Print a connection-level failure for a host
    pub fn print_host_error(&self, host: &str, error: &TidewayError) {
        let line = format!(
            "  {} {} {} {} {}",
            "FAILED".red().bold(),
            "=>".dimmed(),
            host.white().bold(),
            "·".dimmed(),
            error.summary()
        );
        self.multi_progress.println(&line).ok();
    }

    /// Print the final per-host recap
    pub fn print_recap(&self, report: &RunReport) {
        if self.quiet && !report.any_failed() {
            return;
        }

        println!();
        println!("{}", "RUN RECAP".cyan().bold());
        println!("{}", "─".repeat(60).dimmed());

        for host in &report.hosts {
            let (ok, changed, failed) = host.counts();

            let status = match host.status {
                HostStatus::Succeeded => "ok".green().bold(),
                HostStatus::Failed => "failed".red().bold(),
                HostStatus::Skipped => "skipped".cyan(),
            };

            print!(
                "{:<24} {:<10} ok={} changed={} failed={}",
                host.host.white().bold(),
                status,
                ok,
                changed,
                failed
            );

            if let Some(ref error) = host.error {
                print!("  {}", error.dimmed());
            }
            println!();
        }

        println!();
        println!(
            "Finished in {:.1}s",
            report.duration_secs
        );
    }

    /// Print planned commands for one host (plan mode)
    pub fn print_host_plan(&self, plan: &HostPlan) {
        println!();
        println!("{} {}", "HOST".yellow().bold(), plan.host.white().bold());

        if let Some(ref error) = plan.error {
            println!("  {} {}", "FAILED".red().bold(), error);
            return;
        }

        let mut pending = 0;
        for (operation, commands) in &plan.operations {
            if commands.is_empty() {
                println!("  {} {}", "ok".green(), operation);
                continue;
            }

            pending += commands.len();
            println!("  {} {}", "change".yellow(), operation);
            for command in commands {
                let sudo = if command.sudo { "sudo " } else { "" };
                println!("      $ {}{}", sudo.dimmed(), command.command);
            }
        }

        println!(
            "  {} command(s) would run",
            pending.to_string().yellow().bold()
        );
    }

    /// Print a fact value for a host
    pub fn print_fact(&self, host: &str, fact: &str, value: &Value) {
        println!(
            "{} {} {}",
            host.white().bold(),
            fact.cyan(),
            value
        );
    }
}
