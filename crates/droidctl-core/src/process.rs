//! Host process inspection and control.
//!
//! The emulator manager only needs three things from the host: list running
//! processes, terminate one, and launch one detached. [`ProcessTable`] is that
//! seam; [`SystemProcesses`] implements it with `ps`, `kill` and
//! [`std::process::Command`].

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DroidError, Result};

/// One live process on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    /// Process id.
    pub pid: u32,
    /// Full command line.
    pub args: String,
}

/// Inspects and controls host processes.
pub trait ProcessTable: Send + Sync {
    /// Every live (non-zombie) process.
    fn list(&self) -> Result<Vec<ProcessEntry>>;

    /// Terminates `pid`. Fails if the process does not exist.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Launches `program` with `args`, detached from our stdio, and returns
    /// its pid without waiting for it.
    fn spawn_detached(&self, program: &Path, args: &[&str]) -> Result<u32>;
}

impl<P: ProcessTable + ?Sized> ProcessTable for Arc<P> {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        (**self).list()
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        (**self).terminate(pid)
    }

    fn spawn_detached(&self, program: &Path, args: &[&str]) -> Result<u32> {
        (**self).spawn_detached(program, args)
    }
}

/// Parses `ps -eo pid=,stat=,args=` output, dropping zombies.
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (pid, rest) = line.trim().split_once(char::is_whitespace)?;
            let rest = rest.trim_start();
            let (stat, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if stat.starts_with('Z') {
                return None;
            }
            Some(ProcessEntry {
                pid: pid.parse().ok()?,
                args: args.trim().to_string(),
            })
        })
        .collect()
}

/// The real host process table.
///
/// Processes spawned through this table keep their [`Child`] handle so that
/// terminating them also reaps them.
#[derive(Debug, Default)]
pub struct SystemProcesses {
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcesses {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTable for SystemProcesses {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let output = Command::new("ps").args(["-eo", "pid=,stat=,args="]).output()?;
        if !output.status.success() {
            return Err(DroidError::Command {
                action: "ps".to_string(),
                output: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        let own = std::process::id();
        let mut entries = parse_ps_output(&String::from_utf8_lossy(&output.stdout));
        entries.retain(|entry| entry.pid != own);
        Ok(entries)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let child = self
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid);

        if let Some(mut child) = child {
            if child.try_wait()?.is_some() {
                return Err(DroidError::Command {
                    action: format!("terminate {pid}"),
                    output: "process already exited".to_string(),
                });
            }
            child.kill()?;
            let status = child.wait()?;
            debug!(pid, %status, "child reaped");
            return Ok(());
        }

        let output = Command::new("kill").args(["-TERM", &pid.to_string()]).output()?;
        if !output.status.success() {
            return Err(DroidError::Command {
                action: format!("terminate {pid}"),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn spawn_detached(&self, program: &Path, args: &[&str]) -> Result<u32> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Own process group, so a terminal Ctrl-C or hangup does not reach it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn()?;
        let pid = child.id();
        debug!(pid, program = %program.display(), "spawned");
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);
        Ok(pid)
    }
}

/// In-memory process table for tests.
pub mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::{ProcessEntry, ProcessTable};
    use crate::error::{DroidError, Result};

    #[derive(Default)]
    struct State {
        entries: Vec<ProcessEntry>,
        spawned: Vec<(PathBuf, Vec<String>)>,
        terminated: Vec<u32>,
        next_pid: u32,
    }

    /// A [`ProcessTable`] backed by a list in memory.
    ///
    /// Spawning adds an entry whose command line is the program followed by
    /// its arguments; terminating removes it.
    #[derive(Default)]
    pub struct FakeProcesses {
        state: Mutex<State>,
    }

    impl FakeProcesses {
        /// An empty process table.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a running process.
        pub fn with_process(self, pid: u32, args: &str) -> Self {
            self.lock().entries.push(ProcessEntry {
                pid,
                args: args.to_string(),
            });
            self
        }

        /// Removes a process without going through [`ProcessTable::terminate`],
        /// as if it exited on its own.
        pub fn exit(&self, pid: u32) {
            self.lock().entries.retain(|e| e.pid != pid);
        }

        /// Whether `pid` is still listed.
        pub fn is_running(&self, pid: u32) -> bool {
            self.lock().entries.iter().any(|e| e.pid == pid)
        }

        /// Every spawn request, in order.
        pub fn spawned(&self) -> Vec<(PathBuf, Vec<String>)> {
            self.lock().spawned.clone()
        }

        /// Every pid terminated through the table, in order.
        pub fn terminated(&self) -> Vec<u32> {
            self.lock().terminated.clone()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    impl ProcessTable for FakeProcesses {
        fn list(&self) -> Result<Vec<ProcessEntry>> {
            Ok(self.lock().entries.clone())
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            let mut state = self.lock();
            let before = state.entries.len();
            state.entries.retain(|e| e.pid != pid);
            if state.entries.len() == before {
                return Err(DroidError::Command {
                    action: format!("terminate {pid}"),
                    output: "no such process".to_string(),
                });
            }
            state.terminated.push(pid);
            Ok(())
        }

        fn spawn_detached(&self, program: &Path, args: &[&str]) -> Result<u32> {
            let mut state = self.lock();
            state.next_pid += 1;
            let pid = 40_000 + state.next_pid;
            let mut line = program.display().to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            state.entries.push(ProcessEntry { pid, args: line });
            state
                .spawned
                .push((program.to_path_buf(), args.iter().map(|a| a.to_string()).collect()));
            Ok(pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProcesses;
    use super::*;

    const SAMPLE_PS: &str = "    1 Ss   /sbin/init splash\n\
        4242 Sl   /home/me/Android/Sdk/emulator/qemu/linux-x86_64/qemu-system-x86_64 -avd Pixel_6_API_33\n\
        4300 Z    [emulator] <defunct>\n\
        5001 R+   ps -eo pid=,stat=,args=\n\
        \n";

    #[test]
    fn test_parse_ps_output() {
        let entries = parse_ps_output(SAMPLE_PS);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], ProcessEntry { pid: 1, args: "/sbin/init splash".to_string() });
        assert_eq!(entries[1].pid, 4242);
        assert!(entries[1].args.ends_with("-avd Pixel_6_API_33"));
    }

    #[test]
    fn test_parse_ps_output_skips_zombies_and_garbage() {
        let entries = parse_ps_output("4300 Z [x] <defunct>\nnot-a-pid S foo\n12 S\n");
        assert_eq!(entries, vec![ProcessEntry { pid: 12, args: String::new() }]);
    }

    #[test]
    fn test_fake_spawn_and_terminate() {
        let table = FakeProcesses::new();
        let pid = table
            .spawn_detached(Path::new("/sdk/emulator/emulator"), &["-avd", "Pixel"])
            .unwrap();
        assert!(table.is_running(pid));
        assert_eq!(table.list().unwrap()[0].args, "/sdk/emulator/emulator -avd Pixel");

        table.terminate(pid).unwrap();
        assert!(!table.is_running(pid));
        assert!(table.terminate(pid).is_err());
        assert_eq!(table.terminated(), vec![pid]);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_spawn_and_terminate() {
        let table = SystemProcesses::new();
        let pid = table.spawn_detached(Path::new("sleep"), &["30"]).unwrap();
        assert!(pid > 0);
        table.terminate(pid).unwrap();
        // Reaped on the first call; a second one has nothing left to kill.
        assert!(table.terminate(pid).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_list_excludes_own_process() {
        let table = SystemProcesses::new();
        let own = std::process::id();
        let entries = table.list().unwrap();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|entry| entry.pid != own));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_spawn_uses_own_process_group() {
        let table = SystemProcesses::new();
        let pid = table.spawn_detached(Path::new("sleep"), &["30"]).unwrap();
        let output = Command::new("ps")
            .args(["-o", "pgid=", "-p", &pid.to_string()])
            .output()
            .unwrap();
        let pgid: u32 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();
        assert_eq!(pgid, pid);
        table.terminate(pid).unwrap();
    }
}
