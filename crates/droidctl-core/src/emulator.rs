//! Android Virtual Device (AVD) emulator lifecycle.
//!
//! [`EmulatorManager::start`] either attaches to an emulator that is already
//! running or launches a new one, and returns an [`EmulatorHandle`] that
//! records whether this process owns the instance. Only owned instances are
//! stopped by [`EmulatorHandle::release`].
//!
//! The manager never waits for the emulated device to come up. Chain
//! [`DeviceSession::wait_for_boot`](crate::session::DeviceSession::wait_for_boot)
//! after [`start`](EmulatorManager::start) before interacting with it.
//!
//! # Example
//!
//! ```no_run
//! use droidctl_core::config::DroidConfig;
//! use droidctl_core::emulator::EmulatorManager;
//!
//! let manager = EmulatorManager::system(&DroidConfig::load());
//! let handle = manager.start("Pixel_6_API_33").unwrap();
//! // ... drive the device ...
//! handle.release();
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DroidConfig;
use crate::error::{DroidError, Result};
use crate::process::{ProcessEntry, ProcessTable, SystemProcesses};

/// Marker that every emulator process command line contains.
const EMULATOR_MARKER: &str = "emulator";

/// Host facts that must hold before an emulator can be launched.
pub trait Environment: Send + Sync {
    /// Whether `path` exists on the host.
    fn path_exists(&self, path: &Path) -> bool;

    /// Names of the configured virtual devices.
    fn list_virtual_devices(&self) -> Result<Vec<String>>;
}

/// Parses `emulator -list-avds` output, one name per line.
///
/// Newer launchers print `INFO | ...` diagnostics on stdout; lines containing
/// whitespace cannot be AVD names and are skipped.
pub fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(char::is_whitespace))
        .map(str::to_string)
        .collect()
}

/// The Android SDK on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkEnvironment {
    emulator: PathBuf,
}

impl SdkEnvironment {
    /// Uses the emulator launcher at `emulator`.
    pub fn new(emulator: impl Into<PathBuf>) -> Self {
        Self {
            emulator: emulator.into(),
        }
    }

    /// The emulator launcher path.
    pub fn emulator_path(&self) -> &Path {
        &self.emulator
    }
}

impl Environment for SdkEnvironment {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_virtual_devices(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.emulator)
            .arg("-list-avds")
            .output()
            .map_err(|e| {
                DroidError::Environment(format!(
                    "failed to run {}: {e}",
                    self.emulator.display()
                ))
            })?;
        if !output.status.success() {
            return Err(DroidError::Environment(format!(
                "{} -list-avds failed: {}",
                self.emulator.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_avd_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Whether a process command line belongs to the emulator named `name`.
///
/// The name must appear as an `-avd <name>` argument pair or an `@<name>`
/// token, so `Pixel` does not match `Pixel_6` and a command line that merely
/// mentions the name (`droidctl emulator start <name>`) is not an emulator.
pub fn is_emulator_process(args: &str, name: &str) -> bool {
    if !args.contains(EMULATOR_MARKER) {
        return false;
    }
    let tokens: Vec<&str> = args.split_whitespace().collect();
    tokens.iter().any(|token| token.strip_prefix('@') == Some(name))
        || tokens.windows(2).any(|pair| pair[0] == "-avd" && pair[1] == name)
}

/// Result of looking for a running emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeState {
    /// An emulator with that name is running.
    Running {
        /// Its process id.
        pid: u32,
    },
    /// No matching process.
    NotRunning,
}

/// Starts, finds and stops AVD emulators.
pub struct EmulatorManager<P, E> {
    processes: Arc<P>,
    environment: E,
    emulator: PathBuf,
}

impl EmulatorManager<SystemProcesses, SdkEnvironment> {
    /// A manager for the host, using the SDK located by `config`.
    pub fn system(config: &DroidConfig) -> Self {
        let emulator = config.emulator_binary();
        Self::new(
            SystemProcesses::new(),
            SdkEnvironment::new(emulator.clone()),
            emulator,
        )
    }
}

impl<P: ProcessTable, E: Environment> EmulatorManager<P, E> {
    /// Creates a manager launching `emulator`.
    pub fn new(processes: P, environment: E, emulator: impl Into<PathBuf>) -> Self {
        Self {
            processes: Arc::new(processes),
            environment,
            emulator: emulator.into(),
        }
    }

    /// The emulator launcher path.
    pub fn emulator_path(&self) -> &Path {
        &self.emulator
    }

    /// The process table handles are created with.
    pub fn processes(&self) -> &Arc<P> {
        &self.processes
    }

    fn matching(&self, name: &str) -> Result<Vec<ProcessEntry>> {
        Ok(self
            .processes
            .list()?
            .into_iter()
            .filter(|entry| is_emulator_process(&entry.args, name))
            .collect())
    }

    /// Looks for a running emulator named `name`.
    pub fn probe(&self, name: &str) -> Result<ProbeState> {
        let state = match self.matching(name)?.first() {
            Some(entry) => ProbeState::Running { pid: entry.pid },
            None => ProbeState::NotRunning,
        };
        debug!(name, ?state, "probed emulator");
        Ok(state)
    }

    /// Names of the configured virtual devices.
    pub fn list_avds(&self) -> Result<Vec<String>> {
        self.environment.list_virtual_devices()
    }

    /// Returns a handle to the emulator named `name`, launching it if needed.
    ///
    /// An already-running instance is attached to without taking ownership:
    /// releasing that handle leaves it running.
    ///
    /// # Errors
    ///
    /// - [`DroidError::Environment`] if the launcher is missing or no AVD is
    ///   named `name`; nothing is launched in that case
    /// - [`DroidError::Io`] if the launcher cannot be spawned
    pub fn start(&self, name: &str) -> Result<EmulatorHandle<P>> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DroidError::Environment(format!("invalid AVD name {name:?}")));
        }

        if let ProbeState::Running { pid } = self.probe(name)? {
            info!(name, pid, "emulator already running; handle will not stop it");
            return Ok(EmulatorHandle::new(name, Some(pid), false, Arc::clone(&self.processes)));
        }

        if !self.environment.path_exists(&self.emulator) {
            return Err(DroidError::Environment(format!(
                "emulator binary not found at {}",
                self.emulator.display()
            )));
        }
        let avds = self.environment.list_virtual_devices()?;
        if !avds.iter().any(|avd| avd == name) {
            return Err(DroidError::Environment(format!(
                "AVD {name} not found; available: {}",
                avds.join(", ")
            )));
        }

        let pid = self.processes.spawn_detached(&self.emulator, &["-avd", name])?;
        info!(name, pid, "emulator launched");
        Ok(EmulatorHandle::new(name, Some(pid), true, Arc::clone(&self.processes)))
    }

    /// Terminates every running emulator named `name`, returning their pids.
    ///
    /// Processes that vanish before they can be terminated are logged and
    /// skipped.
    pub fn stop_by_name(&self, name: &str) -> Result<Vec<u32>> {
        let mut stopped = Vec::new();
        for entry in self.matching(name)? {
            match self.processes.terminate(entry.pid) {
                Ok(()) => {
                    info!(name, pid = entry.pid, "emulator stopped");
                    stopped.push(entry.pid);
                }
                Err(e) => warn!(name, pid = entry.pid, error = %e, "failed to stop emulator"),
            }
        }
        Ok(stopped)
    }
}

/// A running emulator, optionally owned by this process.
pub struct EmulatorHandle<P: ProcessTable> {
    name: String,
    pid: Option<u32>,
    owned: bool,
    released: AtomicBool,
    processes: Arc<P>,
}

impl<P: ProcessTable> std::fmt::Debug for EmulatorHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("owned", &self.owned)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<P: ProcessTable> EmulatorHandle<P> {
    fn new(name: &str, pid: Option<u32>, owned: bool, processes: Arc<P>) -> Self {
        Self {
            name: name.to_string(),
            pid,
            owned,
            released: AtomicBool::new(false),
            processes,
        }
    }

    /// The AVD name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The emulator's process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether releasing this handle stops the emulator.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Stops the emulator if this handle owns it.
    ///
    /// Never fails: a process that is already gone is logged. Calling this
    /// more than once is a no-op after the first call.
    pub fn release(&self) {
        if !self.owned {
            info!(name = %self.name, "emulator not started by us; leaving it running");
            return;
        }
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(name = %self.name, "emulator already released");
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        match self.processes.terminate(pid) {
            Ok(()) => info!(name = %self.name, pid, "emulator stopped"),
            Err(e) => warn!(name = %self.name, pid, error = %e, "emulator was already gone"),
        }
    }
}

/// In-memory environment for tests.
pub mod testing {
    use std::path::{Path, PathBuf};

    use super::Environment;
    use crate::error::{DroidError, Result};

    /// An [`Environment`] with a fixed set of paths and AVDs.
    #[derive(Debug, Clone, Default)]
    pub struct FakeEnvironment {
        paths: Vec<PathBuf>,
        avds: Option<Vec<String>>,
    }

    impl FakeEnvironment {
        /// Nothing exists and listing AVDs fails.
        pub fn new() -> Self {
            Self::default()
        }

        /// Marks `path` as existing.
        pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
            self.paths.push(path.into());
            self
        }

        /// Sets the AVDs reported by the launcher.
        pub fn with_avds(mut self, avds: &[&str]) -> Self {
            self.avds = Some(avds.iter().map(|a| a.to_string()).collect());
            self
        }
    }

    impl Environment for FakeEnvironment {
        fn path_exists(&self, path: &Path) -> bool {
            self.paths.iter().any(|p| p == path)
        }

        fn list_virtual_devices(&self) -> Result<Vec<String>> {
            self.avds
                .clone()
                .ok_or_else(|| DroidError::Environment("emulator -list-avds failed".to_string()))
        }
    }
}
