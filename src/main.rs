// Tideway CLI - agentless infrastructure execution

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;

use tideway::connectors::known_hosts::HostKeyPolicy;
use tideway::connectors::AutoConnector;
use tideway::engine::{EngineConfig, Executor};
use tideway::facts::{self, FactCache, FactQuery, FactRegistry};
use tideway::inventory::{Host, Inventory};
use tideway::ops::load_deploy_file;
use tideway::output::{OutputFormat, OutputWriter};
use tideway::{Connector, SshConnector};

#[derive(Parser)]
#[command(
    name = "tideway",
    about = "Agentless infrastructure execution",
    version,
    author,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    output_format: String,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Path to the inventory file
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Comma-separated host list (alternative to inventory file)
    #[arg(short = 'H', long)]
    hosts: Option<String>,

    /// Host pattern to target (all, a group, a host, or a comma union)
    #[arg(short, long, default_value = "all")]
    limit: String,

    /// Maximum parallel hosts
    #[arg(long, default_value = "10")]
    forks: usize,

    /// SSH connection timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Per-command timeout in seconds
    #[arg(long, default_value = "300")]
    command_timeout: u64,

    /// Path to SSH private key
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// SSH user (overrides inventory and ssh config)
    #[arg(short, long)]
    user: Option<String>,

    /// Prompt for SSH password
    #[arg(short = 'k', long)]
    ask_pass: bool,

    /// Path to an SSH client config (default ~/.ssh/config)
    #[arg(long)]
    ssh_config: Option<PathBuf>,

    /// Unknown host key policy: ask, accept-new or reject
    #[arg(long)]
    host_key_policy: Option<String>,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Apply a deploy file to the targeted hosts
    Apply {
        /// Path to the deploy file
        deploy: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,

        /// Run all commands with sudo
        #[arg(short = 's', long)]
        sudo: bool,

        /// Keep running a host's later operations after a failure
        #[arg(long)]
        continue_on_error: bool,

        /// Exit zero even when hosts failed
        #[arg(long)]
        no_fail_on_error: bool,
    },

    /// Show what would change without applying (connects and gathers facts)
    Plan {
        /// Path to the deploy file
        deploy: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// List hosts in the inventory
    Inventory {
        /// Path to the inventory file
        #[arg(short, long)]
        inventory: PathBuf,

        /// Host pattern to match
        #[arg(default_value = "all")]
        pattern: String,
    },

    /// Gather one fact across the targeted hosts
    Fact {
        /// Fact kind, e.g. os, package_manager, file_stat
        fact: String,

        /// Fact arguments, e.g. a path for file_stat
        args: Vec<String>,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let format: OutputFormat = cli
        .output_format
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown output format: {}", cli.output_format))?;
    let output = Arc::new(Mutex::new(OutputWriter::new(format, cli.verbose, cli.quiet)));

    let exit_code = match cli.command {
        Commands::Apply {
            deploy,
            connection,
            sudo,
            continue_on_error,
            no_fail_on_error,
        } => {
            let plan = load_deploy_file(&deploy)?;
            let hosts = select_hosts(&connection)?;

            output.lock().print_run_header(&plan.name, hosts.len());

            let config = EngineConfig {
                parallel: connection.forks,
                fail_fast: !continue_on_error,
                command_timeout: Duration::from_secs(connection.command_timeout),
                sudo,
                sudo_user: None,
            };

            let connector = Arc::new(AutoConnector::new(build_ssh_connector(&connection)?));
            let executor = Executor::new(config, connector, output.clone());

            let token = executor.cancel_token();
            let cancel_watch = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancelling run, waiting for in-flight commands...");
                    cancel_watch.cancel();
                }
            });

            let report = executor.run(&plan.name, &hosts, &plan.operations).await;
            output.lock().print_recap(&report);

            if token.is_cancelled() {
                130
            } else if report.any_failed() && !no_fail_on_error {
                2
            } else {
                0
            }
        }

        Commands::Plan { deploy, connection } => {
            let plan = load_deploy_file(&deploy)?;
            let hosts = select_hosts(&connection)?;

            output.lock().print_run_header(&plan.name, hosts.len());

            let config = EngineConfig {
                parallel: connection.forks,
                command_timeout: Duration::from_secs(connection.command_timeout),
                ..Default::default()
            };

            let connector = Arc::new(AutoConnector::new(build_ssh_connector(&connection)?));
            let executor = Executor::new(config, connector, output.clone());

            let host_plans = executor.plan_run(&hosts, &plan.operations).await;

            let mut failed = false;
            for host_plan in &host_plans {
                failed |= host_plan.error.is_some();
                output.lock().print_host_plan(host_plan);
            }

            if failed {
                2
            } else {
                0
            }
        }

        Commands::Inventory { inventory, pattern } => {
            let inv = Inventory::from_file(&inventory)?;
            let hosts = inv.get_hosts(&pattern);

            for host in &hosts {
                let groups = if host.groups.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", host.groups.join(", "))
                };
                println!("{}  {}{}", host.name, host.address, groups);
            }

            if hosts.is_empty() {
                eprintln!("no hosts matched pattern: {}", pattern);
                1
            } else {
                0
            }
        }

        Commands::Fact {
            fact,
            args,
            connection,
        } => {
            let hosts = select_hosts(&connection)?;
            let registry = FactRegistry::builtin();

            if !registry.contains(&fact) {
                anyhow::bail!(
                    "unknown fact: {} (available: {})",
                    fact,
                    registry.kinds().join(", ")
                );
            }

            let connector = AutoConnector::new(build_ssh_connector(&connection)?);
            let query = FactQuery::new(fact.clone(), args);

            let mut failed = false;
            for host in &hosts {
                let conn = match connector.connect(host).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        eprintln!("{}", e);
                        failed = true;
                        continue;
                    }
                };

                let mut cache = FactCache::new();
                match facts::fetch(&registry, &mut cache, &*conn, &host.name, &query).await {
                    Ok(value) => output.lock().print_fact(&host.name, &query.cache_key(), &value),
                    Err(e) => {
                        eprintln!("{}", e);
                        failed = true;
                    }
                }

                conn.disconnect();
            }

            if failed {
                2
            } else {
                0
            }
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Load the inventory and apply the target pattern
fn select_hosts(connection: &ConnectionArgs) -> anyhow::Result<Vec<Host>> {
    let inv = match (&connection.inventory, &connection.hosts) {
        (Some(path), _) => Inventory::from_file(path)
            .with_context(|| format!("loading inventory {}", path.display()))?,
        (None, Some(hosts)) => Inventory::from_cli_hosts(hosts, connection.user.as_deref()),
        (None, None) => anyhow::bail!("pass --inventory or --hosts to select targets"),
    };

    let hosts: Vec<Host> = inv
        .get_hosts(&connection.limit)
        .into_iter()
        .cloned()
        .collect();

    if hosts.is_empty() {
        anyhow::bail!("no hosts matched pattern: {}", connection.limit);
    }

    Ok(hosts)
}

fn build_ssh_connector(connection: &ConnectionArgs) -> anyhow::Result<SshConnector> {
    let mut ssh = SshConnector::new()
        .with_connect_timeout(Duration::from_secs(connection.timeout))
        .with_command_timeout(Duration::from_secs(connection.command_timeout));

    if let Some(ref path) = connection.ssh_config {
        ssh = ssh.with_config_file(path.clone());
    }
    if let Some(ref key) = connection.private_key {
        ssh = ssh.with_private_key(key.clone());
    }
    if let Some(ref user) = connection.user {
        ssh = ssh.with_default_user(user.clone());
    }

    if connection.ask_pass {
        let password = rpassword::prompt_password("SSH password: ")
            .context("failed to read password")?;
        ssh = ssh.with_password(password);
    }

    let policy = match connection.host_key_policy {
        Some(ref policy) => policy
            .parse::<HostKeyPolicy>()
            .map_err(|e| anyhow::anyhow!(e))?,
        // Interactive terminals get the ask flow; unattended runs reject
        None if std::io::stdin().is_terminal() => HostKeyPolicy::Ask,
        None => HostKeyPolicy::Reject,
    };
    ssh = ssh.with_host_key_policy(policy);

    Ok(ssh)
}
