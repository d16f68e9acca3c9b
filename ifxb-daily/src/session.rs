//! Remote session management
//!
//! Owns the SSH connection to the source host: open, keepalive, command
//! execution, SFTP access and release. libssh2 is blocking, so every call
//! runs on the blocking thread pool and the async side just awaits it.
//!
//! # Keepalive
//! SFTP reads block with a timeout of half the keepalive interval; each
//! timeout offers libssh2 a keepalive (sent only once the interval is due)
//! and resumes. Remote command output is polled without blocking, offering
//! a keepalive on every idle poll. A silent multi-hour export therefore
//! keeps the connection warm without a second thread contending for the
//! session lock.

use crate::command::{CommandSpec, ProcessOutput};
use crate::error::{BackupError, Result};
use crate::transfer::ProgressTracker;
use async_trait::async_trait;
use ifxb_common::config::SourceConfig;
use ssh2::Session;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// SFTP and command output read size
const CHUNK_SIZE: usize = 32 * 1024;

/// Sleep between polls of an idle remote command
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A connected remote host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command to completion; a non-zero exit is returned, not raised
    async fn exec(&self, command: &CommandSpec) -> Result<ProcessOutput>;

    /// Size of a remote file in bytes
    async fn file_size(&self, remote_path: &str) -> Result<u64>;

    /// Copy a remote file to `local_path`, feeding `progress`; returns bytes copied
    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: ProgressTracker,
    ) -> Result<u64>;

    /// Close the connection (best effort)
    fn disconnect(&self);
}

/// Opens sessions to the source host
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession;

    async fn acquire(&self, source: &SourceConfig) -> Result<Self::Session>;
}

/// Scoped ownership of a session: disconnects exactly once, either on
/// [`SessionGuard::release`] or when dropped on an early-exit path.
pub struct SessionGuard<S: RemoteSession> {
    session: S,
    released: bool,
}

impl<S: RemoteSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            released: false,
        }
    }

    /// Release after the last use
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.session.disconnect();
        }
    }
}

impl<S: RemoteSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: RemoteSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.released {
            debug!("Releasing remote session on early exit");
        }
        self.release_once();
    }
}

/// Run a remote command and return its stdout, failing on a non-zero exit
pub async fn execute<S>(session: &S, command: &CommandSpec) -> Result<String>
where
    S: RemoteSession + ?Sized,
{
    info!(command = %command, "Executing remote command");
    let output = session.exec(command).await?;

    if !output.success() {
        error!(
            command = %command,
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "Remote command failed"
        );
        return Err(BackupError::Command {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    info!(stdout = %output.stdout.trim(), "Remote command succeeded");
    Ok(output.stdout)
}

/// Connector for real SSH hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl SessionConnector for SshConnector {
    type Session = SshSession;

    async fn acquire(&self, source: &SourceConfig) -> Result<SshSession> {
        let source = source.clone();
        tokio::task::spawn_blocking(move || SshSession::open(&source)).await?
    }
}

/// libssh2-backed session
pub struct SshSession {
    inner: Session,
    label: String,
}

impl SshSession {
    fn open(source: &SourceConfig) -> Result<Self> {
        let label = format!("{}:{}", source.host, source.port);
        let conn = |what: &str, e: &dyn std::fmt::Display| {
            BackupError::Connection(format!("{} {}: {}", what, label, e))
        };

        let addr = (source.host.as_str(), source.port)
            .to_socket_addrs()
            .map_err(|e| conn("Cannot resolve", &e))?
            .next()
            .ok_or_else(|| conn("No address for", &"empty resolution"))?;

        let tcp = TcpStream::connect_timeout(&addr, source.connect_timeout())
            .map_err(|e| conn("Cannot connect to", &e))?;

        let mut session = Session::new().map_err(|e| conn("Cannot create session for", &e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(source.connect_timeout()));
        session
            .handshake()
            .map_err(|e| conn("SSH handshake failed with", &e))?;

        authenticate(&session, source).map_err(|e| conn("Authentication failed for", &e))?;

        let keepalive = source.keepalive_interval();
        session.set_keepalive(false, keepalive.as_secs() as u32);
        session.set_timeout(millis(read_timeout(keepalive)));

        info!(
            "Connected to {} as {}, keepalive every {}s",
            label,
            source.username,
            keepalive.as_secs()
        );

        Ok(Self {
            inner: session,
            label,
        })
    }
}

fn authenticate(session: &Session, source: &SourceConfig) -> std::result::Result<(), String> {
    let result = if let Some(key_file) = &source.key_file {
        debug!("Authenticating with key file {}", key_file.display());
        session.userauth_pubkey_file(
            &source.username,
            None,
            key_file,
            source.key_passphrase.as_deref(),
        )
    } else if let Some(password) = &source.password {
        session.userauth_password(&source.username, password)
    } else {
        return Err("no credentials configured (set source.password or source.key_file)".to_string());
    };

    result.map_err(|e| e.to_string())?;
    if !session.authenticated() {
        return Err("server did not accept credentials".to_string());
    }
    Ok(())
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

/// Blocking read timeout: half the keepalive interval, so a due keepalive
/// is never late by more than half an interval
fn read_timeout(keepalive: Duration) -> Duration {
    (keepalive / 2).max(Duration::from_millis(500))
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        let session = self.inner.clone();
        let line = command.to_shell_line();
        tokio::task::spawn_blocking(move || exec_blocking(&session, &line)).await?
    }

    async fn file_size(&self, remote_path: &str) -> Result<u64> {
        let session = self.inner.clone();
        let path = PathBuf::from(remote_path);
        tokio::task::spawn_blocking(move || {
            let sftp = session
                .sftp()
                .map_err(|e| BackupError::Transfer(format!("Failed to open SFTP channel: {}", e)))?;
            let stat = sftp.stat(&path).map_err(|e| {
                BackupError::Transfer(format!("Failed to stat {}: {}", path.display(), e))
            })?;
            stat.size.ok_or_else(|| {
                BackupError::Transfer(format!("Server reported no size for {}", path.display()))
            })
        })
        .await?
    }

    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        mut progress: ProgressTracker,
    ) -> Result<u64> {
        let session = self.inner.clone();
        let remote = PathBuf::from(remote_path);
        let local = local_path.to_path_buf();
        tokio::task::spawn_blocking(move || fetch_blocking(&session, &remote, &local, &mut progress))
            .await?
    }

    fn disconnect(&self) {
        match self.inner.disconnect(None, "backup run complete", None) {
            Ok(()) => info!("Disconnected from {}", self.label),
            Err(e) => warn!("Error while disconnecting from {}: {}", self.label, e),
        }
    }
}

fn exec_blocking(session: &Session, line: &str) -> Result<ProcessOutput> {
    let channel_err = |e: ssh2::Error| BackupError::Connection(format!("SSH channel failure: {}", e));
    let read_err = |e: io::Error| BackupError::Connection(format!("Lost remote command output: {}", e));

    let mut channel = session.channel_session().map_err(channel_err)?;
    channel.exec(line).map_err(channel_err)?;

    // Both streams share one flow-control window; drain them together
    session.set_blocking(false);
    let drained = drain(&mut ChannelStreams {
        session,
        channel: &mut channel,
    });
    session.set_blocking(true);
    let (stdout, stderr) = drained.map_err(read_err)?;

    channel.wait_close().map_err(channel_err)?;
    let exit_code = channel.exit_status().map_err(channel_err)?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

fn fetch_blocking(
    session: &Session,
    remote: &Path,
    local: &Path,
    progress: &mut ProgressTracker,
) -> Result<u64> {
    let sftp = session
        .sftp()
        .map_err(|e| BackupError::Transfer(format!("Failed to open SFTP channel: {}", e)))?;
    let mut remote_file = sftp
        .open(remote)
        .map_err(|e| BackupError::Transfer(format!("Failed to open {}: {}", remote.display(), e)))?;
    let mut local_file = std::fs::File::create(local)
        .map_err(|e| BackupError::Transfer(format!("Failed to create {}: {}", local.display(), e)))?;

    let mut reader = KeepaliveReader::new(session, &mut remote_file);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BackupError::Transfer(format!(
                    "Read from {} failed after {} bytes: {}",
                    remote.display(),
                    transferred,
                    e
                )))
            }
        };
        local_file.write_all(&buf[..n]).map_err(|e| {
            BackupError::Transfer(format!("Write to {} failed: {}", local.display(), e))
        })?;
        transferred += n as u64;
        progress.observe(transferred);
    }

    local_file
        .sync_all()
        .map_err(|e| BackupError::Transfer(format!("Flush of {} failed: {}", local.display(), e)))?;
    Ok(transferred)
}

/// Non-blocking access to a running command's stdout and stderr
trait OutputStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Remote side closed both streams
    fn at_eof(&self) -> bool;
    /// Offer a keepalive while idle
    fn keepalive(&self) -> io::Result<()>;
}

struct ChannelStreams<'a> {
    session: &'a Session,
    channel: &'a mut ssh2::Channel,
}

impl OutputStreams for ChannelStreams<'_> {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.channel.eof()
    }

    fn keepalive(&self) -> io::Result<()> {
        match self.session.keepalive_send() {
            Ok(_) => Ok(()),
            Err(e) => match io::Error::from(e) {
                e if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Read both streams alternately until EOF
///
/// Reading one stream to completion first would stall the remote command
/// once the other fills the channel window.
fn drain<S: OutputStreams>(streams: &mut S) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let out = pump(|b| streams.read_stdout(b), &mut buf, &mut stdout)?;
        let err = pump(|b| streams.read_stderr(b), &mut buf, &mut stderr)?;
        if out + err > 0 {
            continue;
        }
        if streams.at_eof() {
            return Ok((stdout, stderr));
        }
        streams.keepalive()?;
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn pump<F>(mut read: F, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<usize>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    match read(buf) {
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// Read adapter that turns session timeouts into keepalives
struct KeepaliveReader<'a, R> {
    session: &'a Session,
    inner: R,
}

impl<'a, R: Read> KeepaliveReader<'a, R> {
    fn new(session: &'a Session, inner: R) -> Self {
        Self { session, inner }
    }
}

impl<R: Read> Read for KeepaliveReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    self.session.keepalive_send().map_err(io::Error::from)?;
                    debug!("Sent SSH keepalive while waiting for remote data");
                }
                other => return other,
            }
        }
    }
}
