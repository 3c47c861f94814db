//! Mock service process handles
//!
//! The supervisor never touches raw PIDs directly. It launches through a
//! [`StubLauncher`] and drives the result through [`ChildProcess`], which
//! keeps the SIGTERM → poll → SIGKILL escalation independent of how the
//! process came to exist (spawned here, or adopted from an earlier run).

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::{StubKey, STUB_SCHEME};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};

/// How much captured output is carried into diagnostics
const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// Exit information of a process that is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {}", code),
            (None, Some(signal)) => write!(f, "terminated by signal {}", signal),
            (None, None) => write!(f, "exited"),
        }
    }
}

/// Owned handle on a mock service process
pub trait ChildProcess: Send + fmt::Debug {
    fn pid(&self) -> u32;

    /// `Some` once the process has exited (reaping it when it is our child)
    fn try_exit(&mut self) -> Option<ProcessExit>;

    /// Signal-zero style liveness
    fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Ask the process to shut down (SIGTERM)
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process down (SIGKILL)
    fn kill(&mut self) -> io::Result<()>;

    /// Captured stdout/stderr, for diagnostics
    fn output(&self) -> String {
        String::new()
    }
}

/// Starts mock service processes
pub trait StubLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>>;

    /// Handle on a process started by someone else, known only by PID
    fn adopt(&self, pid: u32) -> Box<dyn ChildProcess> {
        Box::new(AdoptedProcess::new(pid))
    }
}

/// Everything needed to start one mock service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub key: StubKey,
    pub host: String,
    pub port: u16,
    pub specification_version: u8,
    pub pact_dir: PathBuf,
    pub log_file: PathBuf,
    /// Where stdout/stderr of the process are captured
    pub output_file: PathBuf,
}

impl LaunchSpec {
    pub fn from_config(config: &HarnessConfig, key: &StubKey, port: u16) -> Self {
        Self {
            key: key.clone(),
            host: config.bind_address.clone(),
            port,
            specification_version: config.specification_version,
            pact_dir: config.pact_dir.clone(),
            log_file: config.provider_log_file(&key.provider),
            output_file: config.log_dir.join(format!("{}.out", key.file_stem())),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", STUB_SCHEME, self.host, self.port)
    }

    /// `pact-mock-service` arguments
    pub fn args(&self) -> Vec<String> {
        vec![
            "service".to_string(),
            "--pact-specification-version".to_string(),
            self.specification_version.to_string(),
            "--pact-dir".to_string(),
            self.pact_dir.display().to_string(),
            "--log".to_string(),
            self.log_file.display().to_string(),
            "--consumer".to_string(),
            self.key.consumer.clone(),
            "--provider".to_string(),
            self.key.provider.clone(),
            "--pact-file-write-mode".to_string(),
            "merge".to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }
}

/// Launches the real `pact-mock-service` executable
#[derive(Debug, Clone)]
pub struct MockServiceLauncher {
    executable: PathBuf,
}

impl MockServiceLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.resolve_executable())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command_line(&self, spec: &LaunchSpec) -> String {
        std::iter::once(self.executable.display().to_string())
            .chain(spec.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl StubLauncher for MockServiceLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>> {
        let command_line = self.command_line(spec);
        let spawn_error = |source: io::Error| HarnessError::Spawn {
            command: command_line.clone(),
            source,
        };

        for dir in [
            Some(spec.pact_dir.as_path()),
            spec.log_file.parent(),
            spec.output_file.parent(),
        ]
        .into_iter()
        .flatten()
        {
            fs::create_dir_all(dir).map_err(spawn_error)?;
        }

        // Output goes to a file rather than a pipe: the mock service may
        // outlive this process and must never block on a full pipe.
        let stdout = File::create(&spec.output_file).map_err(spawn_error)?;
        let stderr = stdout.try_clone().map_err(spawn_error)?;

        tracing::debug!(command = %command_line, "starting mock service");

        let child = Command::new(&self.executable)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(spawn_error)?;

        Ok(Box::new(SpawnedProcess::new(child, spec.output_file.clone())))
    }
}

/// A mock service started by this process
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Child,
    output_file: PathBuf,
}

impl SpawnedProcess {
    pub fn new(child: Child, output_file: PathBuf) -> Self {
        Self { child, output_file }
    }
}

impl ChildProcess for SpawnedProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_exit(&mut self) -> Option<ProcessExit> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_of(status)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(pid = self.pid(), error = %e, "unable to poll child status");
                None
            }
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_signal(self.pid(), nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child.kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        // Reap so the pid does not linger as a zombie
        self.child.wait().map(|_| ())
    }

    fn output(&self) -> String {
        read_tail(&self.output_file)
    }
}

/// A mock service known only by PID, e.g. reused from an earlier test run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdoptedProcess {
    pid: u32,
}

impl AdoptedProcess {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl ChildProcess for AdoptedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_exit(&mut self) -> Option<ProcessExit> {
        if is_process_running(self.pid) {
            None
        } else {
            Some(ProcessExit::default())
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_signal(self.pid, nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            kill_with_sysinfo(self.pid, sysinfo::Signal::Term)
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_signal(self.pid, nix::sys::signal::Signal::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            kill_with_sysinfo(self.pid, sysinfo::Signal::Kill)
        }
    }
}

/// Check if a process with the given PID exists
///
/// # Platform-specific behavior
///
/// - Unix: signal zero (`kill -0`)
/// - Windows: sysinfo process table
pub fn is_process_running(pid: u32) -> bool {
    // pid 0 would address our own process group
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            // Exists, but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        use sysinfo::{Pid, ProcessesToUpdate, System};

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All);
        sys.process(Pid::from_u32(pid)).is_some()
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid 0"));
    }

    kill(Pid::from_raw(pid as i32), signal).map_err(|errno| io::Error::from_raw_os_error(errno as i32))
}

#[cfg(not(unix))]
fn kill_with_sysinfo(pid: u32, signal: sysinfo::Signal) -> io::Result<()> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All);
    match sys.process(Pid::from_u32(pid)) {
        Some(process) => {
            if process.kill_with(signal).unwrap_or_else(|| process.kill()) {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::Other, format!("failed to signal pid {}", pid)))
            }
        }
        None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no process with pid {}", pid))),
    }
}

fn exit_of(status: std::process::ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessExit {
        code: status.code(),
        signal,
    }
}

fn read_tail(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(OUTPUT_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(_) => String::new(),
    }
}
