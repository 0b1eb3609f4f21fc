// SSH transport - the reference connector

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{HostKeyType, KeyboardInteractivePrompt, OpenFlags, OpenType, Session};

use super::known_hosts::{self, HostKeyPolicy, KeyCheck};
use super::ssh_config::{self, ProxyDirective, ResolvedHostConfig};
use super::{CommandOutput, Connection, Connector, ExecOpts};
use crate::inventory::Host;
use crate::output::errors::TidewayError;

const MAX_JUMP_DEPTH: usize = 8;

/// SSH connector configuration
pub struct SshConnector {
    config_file: Option<PathBuf>,
    private_key: Option<PathBuf>,
    password: Option<String>,
    default_user: Option<String>,
    connect_timeout: Duration,
    command_timeout: Duration,
    host_key_policy: HostKeyPolicy,
}

impl SshConnector {
    pub fn new() -> Self {
        SshConnector {
            config_file: None,
            private_key: None,
            password: None,
            default_user: None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
            host_key_policy: HostKeyPolicy::Ask,
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn with_private_key(mut self, path: PathBuf) -> Self {
        self.private_key = Some(path);
        self
    }

    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_default_user(mut self, user: String) -> Self {
        self.default_user = Some(user);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Establish a full session to an address, following the config cascade
    ///
    /// Returns the target session plus the jump sessions and proxy processes
    /// that must stay alive for the tunnel to keep working.
    fn open_session(
        &self,
        display_name: &str,
        address: &str,
        port_override: Option<u16>,
        user_override: Option<&str>,
        depth: usize,
    ) -> Result<EstablishedSession, TidewayError> {
        if depth > MAX_JUMP_DEPTH {
            return Err(TidewayError::Connect {
                host: display_name.to_string(),
                message: format!("proxy jump chain deeper than {} hops", MAX_JUMP_DEPTH),
                suggestion: Some("check for a ProxyJump cycle in your ssh config".to_string()),
            });
        }

        let resolved = ssh_config::resolve(address, self.config_file.as_deref())?;
        let port = port_override.unwrap_or(resolved.port);

        let mut gateways = Vec::new();
        let mut proxies = Vec::new();

        let tcp = match resolved.proxy() {
            // ProxyJump wins over ProxyCommand: connect the jump host first
            // (resolving its own config), then tunnel through it.
            Some(ProxyDirective::Jump(jump)) => {
                tracing::debug!(host = display_name, jump = %jump.host, "connecting via jump host");

                let upstream = self.open_session(
                    &jump.host,
                    &jump.host,
                    jump.port,
                    jump.user.as_deref(),
                    depth + 1,
                )?;

                let channel = upstream
                    .session
                    .channel_direct_tcpip(address, port, None)
                    .map_err(|e| TidewayError::Connect {
                        host: display_name.to_string(),
                        message: format!("failed to open tunnel via {}: {}", jump.host, e),
                        suggestion: None,
                    })?;

                // The pump thread polls; the jump session goes non-blocking
                // for the rest of its life.
                upstream.session.set_blocking(false);

                gateways.push(upstream.session);
                gateways.extend(upstream.gateways);
                proxies.extend(upstream.proxies);

                bridge_channel(channel).map_err(|e| TidewayError::Connect {
                    host: display_name.to_string(),
                    message: format!("failed to bridge tunnel: {}", e),
                    suggestion: None,
                })?
            }

            Some(ProxyDirective::Command(template)) => {
                let command = template
                    .replace("%h", address)
                    .replace("%p", &port.to_string());

                tracing::debug!(host = display_name, %command, "connecting via proxy command");

                let (stream, child) =
                    bridge_proxy_command(&command).map_err(|e| TidewayError::Connect {
                        host: display_name.to_string(),
                        message: format!("proxy command failed: {}", e),
                        suggestion: Some("check the ProxyCommand in your ssh config".to_string()),
                    })?;
                proxies.push(child);
                stream
            }

            None => {
                use std::net::ToSocketAddrs;

                let target = format!("{}:{}", address, port);
                let socket_addrs: Vec<_> = target
                    .as_str()
                    .to_socket_addrs()
                    .map_err(|e| TidewayError::Connect {
                        host: display_name.to_string(),
                        message: format!("failed to resolve {}: {}", target, e),
                        suggestion: Some("check the host address".to_string()),
                    })?
                    .collect();

                let socket_addr = socket_addrs.first().ok_or_else(|| TidewayError::Connect {
                    host: display_name.to_string(),
                    message: format!("no addresses for {}", target),
                    suggestion: None,
                })?;

                TcpStream::connect_timeout(socket_addr, self.connect_timeout).map_err(|e| {
                    TidewayError::Connect {
                        host: display_name.to_string(),
                        message: format!("connection failed: {}", e),
                        suggestion: connect_suggestion(&e),
                    }
                })?
            }
        };

        let mut session = Session::new().map_err(|e| TidewayError::Connect {
            host: display_name.to_string(),
            message: format!("failed to create SSH session: {}", e),
            suggestion: None,
        })?;

        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis() as u32);

        session.handshake().map_err(|e| TidewayError::Connect {
            host: display_name.to_string(),
            message: format!("SSH handshake failed: {}", e),
            suggestion: Some("check SSH service is running on the target".to_string()),
        })?;

        self.verify_host_key(&session, display_name, address, &resolved)?;

        let user = user_override
            .map(String::from)
            .or_else(|| self.default_user.clone())
            .or_else(|| resolved.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());

        self.authenticate(&session, display_name, &user, &resolved)?;

        Ok(EstablishedSession {
            session,
            gateways,
            proxies,
        })
    }

    /// Apply the host key trust policy to a freshly handshaken session
    fn verify_host_key(
        &self,
        session: &Session,
        display_name: &str,
        address: &str,
        resolved: &ResolvedHostConfig,
    ) -> Result<(), TidewayError> {
        let (key, keytype) = session.host_key().ok_or_else(|| TidewayError::Connect {
            host: display_name.to_string(),
            message: "server presented no host key".to_string(),
            suggestion: None,
        })?;

        let keytype = keytype_name(keytype);
        let key_b64 = known_hosts::encode_key(key);
        let fingerprint = known_hosts::fingerprint(key);
        let store = &resolved.known_hosts_file;

        match known_hosts::check(store, address, keytype, &key_b64)? {
            KeyCheck::Known => Ok(()),
            KeyCheck::Mismatch => Err(TidewayError::HostKeyRejected {
                host: display_name.to_string(),
                fingerprint,
                message: "remote host key has changed".to_string(),
            }),
            KeyCheck::Unknown => match self.host_key_policy {
                HostKeyPolicy::Reject => Err(TidewayError::HostKeyRejected {
                    host: display_name.to_string(),
                    fingerprint,
                    message: "unknown host key (policy: reject)".to_string(),
                }),
                HostKeyPolicy::AcceptNew => {
                    tracing::info!(host = display_name, %fingerprint, "trusting new host key");
                    known_hosts::append_entry(store, address, keytype, &key_b64)?;
                    Ok(())
                }
                HostKeyPolicy::Ask => {
                    let accepted = known_hosts::ask_confirm(address, keytype, &fingerprint)
                        .map_err(|e| TidewayError::Io {
                            message: format!("failed to read trust decision: {}", e),
                            path: None,
                        })?;

                    if accepted {
                        known_hosts::append_entry(store, address, keytype, &key_b64)?;
                        Ok(())
                    } else {
                        Err(TidewayError::HostKeyRejected {
                            host: display_name.to_string(),
                            fingerprint,
                            message: "host key rejected by operator".to_string(),
                        })
                    }
                }
            },
        }
    }

    /// Ordered authentication attempts: explicit key, config identities,
    /// agent, then password / keyboard-interactive. First success wins.
    fn authenticate(
        &self,
        session: &Session,
        display_name: &str,
        user: &str,
        resolved: &ResolvedHostConfig,
    ) -> Result<(), TidewayError> {
        let mut key_paths: Vec<PathBuf> = Vec::new();
        if let Some(ref key) = self.private_key {
            key_paths.push(key.clone());
        }
        key_paths.extend(resolved.identity_files.iter().cloned());

        for key_path in &key_paths {
            if key_path.exists()
                && session
                    .userauth_pubkey_file(user, None, key_path, None)
                    .is_ok()
            {
                return Ok(());
            }
        }

        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() {
                agent.list_identities().ok();
                for identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(user, &identity).is_ok() {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(ref password) = self.password {
            if session.userauth_password(user, password).is_ok() {
                return Ok(());
            }

            // Some PAM setups only offer keyboard-interactive
            let mut prompter = PasswordPrompter(password.clone());
            if session
                .userauth_keyboard_interactive(user, &mut prompter)
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(TidewayError::Auth {
            host: display_name.to_string(),
            message: format!("all authentication methods exhausted for user {}", user),
            suggestion: Some(
                "add a key to the agent, pass --private-key, or use --ask-pass".to_string(),
            ),
        })
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

struct EstablishedSession {
    session: Session,
    gateways: Vec<Session>,
    proxies: Vec<Child>,
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Connection>, TidewayError> {
        let established = self.open_session(
            &host.name,
            &host.address,
            host.port,
            host.user.as_deref(),
            0,
        )?;

        Ok(Box::new(SshConnection {
            session: established.session,
            _gateways: established.gateways,
            proxies: parking_lot::Mutex::new(established.proxies),
            host_name: host.name.clone(),
            command_timeout: self.command_timeout,
            disconnected: AtomicBool::new(false),
        }))
    }
}

/// A live SSH session to one host
pub struct SshConnection {
    session: Session,
    /// Jump sessions kept alive for the lifetime of the tunnel
    _gateways: Vec<Session>,
    proxies: parking_lot::Mutex<Vec<Child>>,
    host_name: String,
    command_timeout: Duration,
    disconnected: AtomicBool,
}

impl SshConnection {
    fn classify_fault(&self, error_text: String, cmd: &str, timeout: Duration) -> TidewayError {
        if error_text.contains("timeout") || error_text.contains("timed out") {
            TidewayError::CommandTimeout {
                host: self.host_name.clone(),
                command: cmd.to_string(),
                timeout_secs: timeout.as_secs(),
            }
        } else {
            TidewayError::Transport {
                host: self.host_name.clone(),
                message: error_text,
                suggestion: Some("the connection will be discarded".to_string()),
            }
        }
    }

    fn run_command(&self, cmd: &str, opts: &ExecOpts) -> Result<CommandOutput, TidewayError> {
        let timeout = opts.timeout.unwrap_or(self.command_timeout);
        self.session.set_timeout(timeout.as_millis() as u32);

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.classify_fault(e.to_string(), cmd, timeout))?;

        channel
            .exec(cmd)
            .map_err(|e| self.classify_fault(e.to_string(), cmd, timeout))?;

        if let Some(ref stdin) = opts.stdin {
            channel
                .write_all(stdin.as_bytes())
                .and_then(|_| channel.send_eof().map_err(Into::into))
                .map_err(|e| self.classify_fault(e.to_string(), cmd, timeout))?;
        }

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel
            .read_to_string(&mut stdout)
            .map_err(|e| self.classify_fault(e.to_string(), cmd, timeout))?;
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| self.classify_fault(e.to_string(), cmd, timeout))?;

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, cmd: &str, opts: &ExecOpts) -> Result<CommandOutput, TidewayError> {
        let cmd = opts.effective_command(cmd);
        self.run_command(&cmd, opts)
    }

    async fn put_file(&self, local: &Path, remote: &str, mode: i32) -> Result<(), TidewayError> {
        let content = std::fs::read(local).map_err(|e| TidewayError::Io {
            message: format!("failed to read local file: {}", e),
            path: Some(local.to_path_buf()),
        })?;

        let sftp = self.session.sftp().map_err(|e| TidewayError::Transfer {
            host: self.host_name.clone(),
            path: remote.to_string(),
            message: format!("failed to open SFTP: {}", e),
        })?;

        let mut remote_file = sftp
            .open_mode(
                Path::new(remote),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode,
                OpenType::File,
            )
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to create remote file: {}", e),
            })?;

        remote_file
            .write_all(&content)
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to write remote file: {}", e),
            })?;

        Ok(())
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), TidewayError> {
        let sftp = self.session.sftp().map_err(|e| TidewayError::Transfer {
            host: self.host_name.clone(),
            path: remote.to_string(),
            message: format!("failed to open SFTP: {}", e),
        })?;

        let mut remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to open remote file: {}", e),
            })?;

        let mut content = Vec::new();
        remote_file
            .read_to_end(&mut content)
            .map_err(|e| TidewayError::Transfer {
                host: self.host_name.clone(),
                path: remote.to_string(),
                message: format!("failed to read remote file: {}", e),
            })?;

        std::fs::write(local, content).map_err(|e| TidewayError::Io {
            message: format!("failed to write local file: {}", e),
            path: Some(local.to_path_buf()),
        })?;

        Ok(())
    }

    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        self.session.disconnect(None, "closing", None).ok();
        for child in self.proxies.lock().iter_mut() {
            child.kill().ok();
        }
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// Wire name for an ssh2 host key type
fn keytype_name(keytype: HostKeyType) -> &'static str {
    match keytype {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed25519 => "ssh-ed25519",
        HostKeyType::Unknown => "unknown",
    }
}

fn connect_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("ensure SSH service is running on the target host".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

/// Expose a direct-tcpip channel as a loopback TcpStream
///
/// ssh2 sessions only speak over real sockets, so tunneled hops go through a
/// local listener with a pump thread shuffling bytes both ways.
fn bridge_channel(mut channel: ssh2::Channel) -> std::io::Result<TcpStream> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    std::thread::spawn(move || {
        let (mut sock, _) = match listener.accept() {
            Ok(pair) => pair,
            Err(_) => return,
        };
        sock.set_read_timeout(Some(Duration::from_millis(20))).ok();

        let mut channel_buf = [0u8; 16384];
        let mut sock_buf = [0u8; 16384];

        loop {
            let mut activity = false;

            match channel.read(&mut channel_buf) {
                Ok(0) => {
                    if channel.eof() {
                        break;
                    }
                }
                Ok(n) => {
                    if sock.write_all(&channel_buf[..n]).is_err() {
                        break;
                    }
                    activity = true;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }

            match sock.read(&mut sock_buf) {
                Ok(0) => break,
                Ok(n) => {
                    if write_all_retry(&mut channel, &sock_buf[..n]).is_err() {
                        break;
                    }
                    activity = true;
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => break,
            }

            if !activity {
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        channel.close().ok();
    });

    TcpStream::connect(addr)
}

/// Write to a non-blocking channel, retrying on WouldBlock
fn write_all_retry(channel: &mut ssh2::Channel, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "channel closed",
                ))
            }
            Ok(n) => data = &data[n..],
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Expose a ProxyCommand subprocess's stdio as a loopback TcpStream
fn bridge_proxy_command(command: &str) -> std::io::Result<(TcpStream, Child)> {
    let mut child = ProcessCommand::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture proxy stdin"))?;
    let mut child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture proxy stdout"))?;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    std::thread::spawn(move || {
        let (sock, _) = match listener.accept() {
            Ok(pair) => pair,
            Err(_) => return,
        };

        let mut sock_read = match sock.try_clone() {
            Ok(clone) => clone,
            Err(_) => return,
        };
        let mut sock_write = sock;

        let to_child = std::thread::spawn(move || {
            std::io::copy(&mut sock_read, &mut child_stdin).ok();
        });
        std::io::copy(&mut child_stdout, &mut sock_write).ok();
        to_child.join().ok();
    });

    let stream = TcpStream::connect(addr)?;
    Ok((stream, child))
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        // Return the password for each prompt (typically just one "Password:" prompt)
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}
