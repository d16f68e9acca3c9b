//! Hand-written fakes of the pipeline's collaborator traits
//!
//! Every fake reports into a shared [`Recorder`] so tests can assert on what
//! the pipeline did after handing ownership of the fakes to it.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use ifxb_common::config::SourceConfig;
use ifxb_daily::command::{CommandSpec, ProcessOutput, ProcessRunner};
use ifxb_daily::notify::{AlertMessage, Notifier, NotifyError};
use ifxb_daily::session::{RemoteSession, SessionConnector};
use ifxb_daily::transfer::ProgressTracker;
use ifxb_daily::{BackupError, Result};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Line protocol carried by the fake artifact
pub const ARTIFACT_LINES: &str = "ess_telemetry_t,site=a v=1i 1756857600000000000\n\
                                  ess_telemetry_t,site=b v=2i 1756857601000000000\n";

/// Gzip-compressed [`ARTIFACT_LINES`]
pub fn artifact_bytes() -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(ARTIFACT_LINES.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Shared record of everything the fakes observed
#[derive(Default)]
pub struct Recorder {
    pub acquires: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fetches: AtomicUsize,
    /// Remote shell lines, in order
    pub remote: Mutex<Vec<String>>,
    /// Local argv (without the program), in order
    pub local: Mutex<Vec<Vec<String>>>,
    /// Alert contents, in order
    pub alerts: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn remote_lines(&self) -> Vec<String> {
        self.remote.lock().unwrap().clone()
    }

    /// First argument of every local command (`query`, `write`)
    pub fn local_subcommands(&self) -> Vec<String> {
        self.local
            .lock()
            .unwrap()
            .iter()
            .map(|argv| argv.first().cloned().unwrap_or_default())
            .collect()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

/// Remote host double; the export "produces" [`artifact_bytes`]
pub struct FakeSession {
    recorder: Arc<Recorder>,
    export_exit: i32,
    fetch_fails: bool,
    corrupt_artifact: bool,
}

impl FakeSession {
    fn artifact(&self) -> Vec<u8> {
        if self.corrupt_artifact {
            ARTIFACT_LINES.as_bytes().to_vec()
        } else {
            artifact_bytes()
        }
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        let line = command.to_shell_line();
        self.recorder.remote.lock().unwrap().push(line.clone());

        if line.contains("influxd") && self.export_exit != 0 {
            return Ok(ProcessOutput {
                stdout: String::new(),
                stderr: "engine locked\n".to_string(),
                exit_code: self.export_exit,
            });
        }

        Ok(ProcessOutput {
            stdout: "Thu Sep  4 01:00:07 CST 2025\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn file_size(&self, _remote_path: &str) -> Result<u64> {
        Ok(self.artifact().len() as u64)
    }

    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        mut progress: ProgressTracker,
    ) -> Result<u64> {
        self.recorder.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fetch_fails {
            return Err(BackupError::Transfer(format!(
                "Read from {} failed after 0 bytes: connection reset by peer",
                remote_path
            )));
        }
        let bytes = self.artifact();
        std::fs::write(local_path, &bytes)?;
        progress.observe(bytes.len() as u64);
        Ok(bytes.len() as u64)
    }

    fn disconnect(&self) {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out [`FakeSession`]s
pub struct FakeConnector {
    pub recorder: Arc<Recorder>,
    /// Exit code of the remote export command
    pub export_exit: i32,
    /// Refuse the connection
    pub refuse: bool,
    /// Fail every SFTP fetch
    pub fetch_fails: bool,
    /// Serve the artifact uncompressed despite its `.gz` name
    pub corrupt_artifact: bool,
}

impl FakeConnector {
    pub fn new(recorder: &Arc<Recorder>) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            export_exit: 0,
            refuse: false,
            fetch_fails: false,
            corrupt_artifact: false,
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn acquire(&self, source: &SourceConfig) -> Result<FakeSession> {
        self.recorder.acquires.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(BackupError::Connection(format!(
                "Cannot connect to {}:{}: connection refused",
                source.host, source.port
            )));
        }
        Ok(FakeSession {
            recorder: Arc::clone(&self.recorder),
            export_exit: self.export_exit,
            fetch_fails: self.fetch_fails,
            corrupt_artifact: self.corrupt_artifact,
        })
    }
}

/// Local `influx` double: queries answer from a script, writes exit as configured
pub struct ScriptedRunner {
    recorder: Arc<Recorder>,
    query_outputs: Mutex<VecDeque<String>>,
    pub write_exit: i32,
}

impl ScriptedRunner {
    pub fn new(recorder: &Arc<Recorder>, query_outputs: &[&str]) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            query_outputs: Mutex::new(query_outputs.iter().map(|s| s.to_string()).collect()),
            write_exit: 0,
        }
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        let argv: Vec<String> = command.argv().iter().map(|s| s.to_string()).collect();
        self.recorder.local.lock().unwrap().push(argv.clone());

        let output = match argv.first().map(String::as_str) {
            Some("query") => ProcessOutput {
                stdout: self.query_outputs.lock().unwrap().pop_front().unwrap_or_default(),
                stderr: String::new(),
                exit_code: 0,
            },
            Some("write") if self.write_exit != 0 => ProcessOutput {
                stdout: String::new(),
                stderr: "Error: failed to write data: unauthorized access\n".to_string(),
                exit_code: self.write_exit,
            },
            _ => ProcessOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
        };
        Ok(output)
    }
}

/// Notifier that records alerts, optionally failing delivery
pub struct RecordingNotifier {
    recorder: Arc<Recorder>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn new(recorder: &Arc<Recorder>) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            fail: false,
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &AlertMessage) -> std::result::Result<(), NotifyError> {
        self.recorder
            .alerts
            .lock()
            .unwrap()
            .push(message.content().to_string());

        if self.fail {
            return Err(NotifyError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}
