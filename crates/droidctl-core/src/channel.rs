//! The command channel every device interaction goes through.
//!
//! This module defines the [`CommandChannel`] trait, the single seam between
//! droidctl and whatever actually runs commands (a local shell, a remote shell,
//! a scripted fake in tests). Higher layers only ever see "run this command
//! string, give me its text output", which keeps all pattern matching inside
//! the sampler and parser and lets the retry and lifecycle logic be tested
//! without a device attached.
//!
//! # Example
//!
//! ```no_run
//! use droidctl_core::channel::{CommandChannel, ShellChannel};
//!
//! let channel = ShellChannel::new();
//! let output = channel.execute("adb devices").expect("adb not available");
//! println!("{output}");
//! ```

use std::process::Command;
use std::sync::Arc;

use thiserror::Error;

/// The channel failed to run a command at the transport level.
///
/// Carries the command text so the failure can be diagnosed without
/// re-running it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command `{command}` failed: {message}")]
pub struct ChannelError {
    /// The command string that was being executed.
    pub command: String,
    /// What went wrong (spawn error, exit status plus output, ...).
    pub message: String,
}

/// A synchronous text-in/text-out command execution capability.
///
/// Implementations block the calling thread for the duration of the command
/// and return the combined textual output. A failure to run the command (or a
/// command reporting failure) is a [`ChannelError`]; successful output that
/// merely contains unexpected text is not an error at this layer.
pub trait CommandChannel {
    /// Execute `command` and return its combined output.
    fn execute(&self, command: &str) -> Result<String, ChannelError>;
}

impl<C: CommandChannel + ?Sized> CommandChannel for &C {
    fn execute(&self, command: &str) -> Result<String, ChannelError> {
        (**self).execute(command)
    }
}

impl<C: CommandChannel + ?Sized> CommandChannel for Arc<C> {
    fn execute(&self, command: &str) -> Result<String, ChannelError> {
        (**self).execute(command)
    }
}

impl<C: CommandChannel + ?Sized> CommandChannel for Box<C> {
    fn execute(&self, command: &str) -> Result<String, ChannelError> {
        (**self).execute(command)
    }
}

/// Runs commands through the local POSIX shell (`sh -c`).
///
/// stdout and stderr are concatenated, matching what a user would see in a
/// terminal. A non-zero exit status is reported as a [`ChannelError`] that
/// includes the captured output.
#[derive(Debug, Clone)]
pub struct ShellChannel {
    shell: String,
}

impl Default for ShellChannel {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellChannel {
    /// Create a channel backed by `sh`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel backed by a different shell binary (e.g. `bash`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl CommandChannel for ShellChannel {
    fn execute(&self, command: &str) -> Result<String, ChannelError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| ChannelError {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ChannelError {
                command: command.to_string(),
                message: format!("{}: {}", output.status, text.trim()),
            });
        }
        Ok(text)
    }
}

/// Scripted channel for tests and dry runs.
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::{ChannelError, CommandChannel};

    type Reply = Result<String, String>;

    struct Rule {
        needle: String,
        replies: VecDeque<Reply>,
    }

    /// A [`CommandChannel`] that answers from a script instead of a device.
    ///
    /// Each rule matches commands containing a substring. Replies queued on a
    /// rule are consumed in order and the last one repeats forever. Commands
    /// that match no rule return empty output. Every issued command is
    /// recorded.
    ///
    /// ```
    /// use droidctl_core::channel::CommandChannel;
    /// use droidctl_core::channel::testing::ScriptedChannel;
    ///
    /// let channel = ScriptedChannel::new()
    ///     .respond("getprop sys.boot_completed", "\n")
    ///     .respond("getprop sys.boot_completed", "1\n");
    ///
    /// assert_eq!(channel.execute("adb shell getprop sys.boot_completed").unwrap(), "\n");
    /// assert_eq!(channel.execute("adb shell getprop sys.boot_completed").unwrap(), "1\n");
    /// assert_eq!(channel.execute("adb shell getprop sys.boot_completed").unwrap(), "1\n");
    /// ```
    #[derive(Default)]
    pub struct ScriptedChannel {
        rules: Mutex<Vec<Rule>>,
        history: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        /// An empty script: every command succeeds with no output.
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful reply for commands containing `needle`.
        pub fn respond(self, needle: &str, output: &str) -> Self {
            self.push(needle, Ok(output.to_string()))
        }

        /// Queue a transport failure for commands containing `needle`.
        pub fn fail(self, needle: &str, message: &str) -> Self {
            self.push(needle, Err(message.to_string()))
        }

        fn push(self, needle: &str, reply: Reply) -> Self {
            {
                let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
                match rules.iter_mut().find(|r| r.needle == needle) {
                    Some(rule) => rule.replies.push_back(reply),
                    None => rules.push(Rule {
                        needle: needle.to_string(),
                        replies: VecDeque::from([reply]),
                    }),
                }
            }
            self
        }

        /// All commands issued so far, in order.
        pub fn commands(&self) -> Vec<String> {
            self.history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        /// Number of issued commands containing `needle`.
        pub fn count(&self, needle: &str) -> usize {
            self.commands().iter().filter(|c| c.contains(needle)).count()
        }
    }

    impl CommandChannel for ScriptedChannel {
        fn execute(&self, command: &str) -> Result<String, ChannelError> {
            self.history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.to_string());

            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let Some(rule) = rules.iter_mut().find(|r| command.contains(&r.needle)) else {
                return Ok(String::new());
            };
            let reply = if rule.replies.len() > 1 {
                rule.replies.pop_front()
            } else {
                rule.replies.front().cloned()
            };
            match reply {
                Some(Ok(output)) => Ok(output),
                Some(Err(message)) => Err(ChannelError {
                    command: command.to_string(),
                    message,
                }),
                None => Ok(String::new()),
            }
        }
    }
}
