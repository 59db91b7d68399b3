//! Device sessions: one addressable Android device or emulator.
//!
//! A [`DeviceSession`] pairs a device serial with a [`CommandChannel`] and a
//! [`SessionConfig`]. Every adb invocation is built here, so the `-s <serial>`
//! flag is added in one place and the sampler, poller and action modules only
//! deal with the device-side part of a command.
//!
//! # Threading
//!
//! A session is owned by a single flow of control. Methods that touch the
//! cached dump path or screen size take `&mut self`; to drive several devices
//! concurrently, give each thread its own session (see [`discover`]).
//!
//! # Example
//!
//! ```no_run
//! use droidctl_core::channel::ShellChannel;
//! use droidctl_core::config::SessionConfig;
//! use droidctl_core::session::discover;
//!
//! let sessions = discover(ShellChannel::new(), &SessionConfig::default()).unwrap();
//! for session in &sessions {
//!     println!("{}", session.serial());
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::error::{DroidError, Result};
use crate::poll::Poller;
use crate::sampler::ScreenSize;

/// One line of `adb devices` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// The device serial (e.g. `emulator-5554`).
    pub serial: String,
    /// The adb state (`device`, `offline`, `unauthorized`, ...).
    pub state: String,
}

impl DeviceEntry {
    /// Whether adb can talk to this device.
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }
}

/// Parses `adb devices` output into entries, skipping the header and blank lines.
pub fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Lists every attached device that is ready, one session per device.
///
/// Offline or unauthorized devices are logged and skipped.
///
/// # Errors
///
/// - [`DroidError::Channel`] if `adb devices` cannot be run
/// - [`DroidError::NoDevices`] if no device is ready
pub fn discover<C>(channel: C, config: &SessionConfig) -> Result<Vec<DeviceSession<C>>>
where
    C: CommandChannel + Clone,
{
    let output = channel.execute(&format!("{} devices", config.adb))?;
    let mut sessions = Vec::new();
    for entry in parse_device_list(&output) {
        if entry.is_ready() {
            sessions.push(DeviceSession::new(entry.serial, channel.clone(), config.clone()));
        } else {
            warn!(serial = %entry.serial, state = %entry.state, "device is not ready");
        }
    }
    if sessions.is_empty() {
        return Err(DroidError::NoDevices);
    }
    info!(count = sessions.len(), "devices discovered");
    Ok(sessions)
}

/// Finds the adb serial of the running emulator whose AVD is `avd`.
///
/// Every ready `emulator-<port>` device is asked for its AVD name with
/// `adb -s <serial> emu avd name`. Returns `None` while the emulator has not
/// registered with adb yet.
///
/// # Errors
///
/// [`DroidError::Channel`] if `adb devices` cannot be run. Emulators that
/// fail to answer the name query are skipped.
pub fn find_emulator_serial<C: CommandChannel>(
    channel: &C,
    config: &SessionConfig,
    avd: &str,
) -> Result<Option<String>> {
    let output = channel.execute(&format!("{} devices", config.adb))?;
    for entry in parse_device_list(&output) {
        if !entry.is_ready() || !entry.serial.starts_with("emulator-") {
            continue;
        }
        let command = format!("{} -s {} emu avd name", config.adb, entry.serial);
        match channel.execute(&command) {
            Ok(reply) => {
                let name = reply.lines().map(str::trim).find(|line| !line.is_empty());
                if name == Some(avd) {
                    debug!(serial = %entry.serial, avd, "emulator serial resolved");
                    return Ok(Some(entry.serial));
                }
            }
            Err(e) => debug!(serial = %entry.serial, error = %e, "avd name query failed"),
        }
    }
    Ok(None)
}

/// A single Android device or emulator under automation.
pub struct DeviceSession<C> {
    serial: String,
    channel: C,
    config: SessionConfig,
    pub(crate) dump_path: Option<String>,
    pub(crate) screen: Option<ScreenSize>,
}

impl<C> std::fmt::Debug for DeviceSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("serial", &self.serial)
            .field("config", &self.config)
            .field("dump_path", &self.dump_path)
            .field("screen", &self.screen)
            .finish_non_exhaustive()
    }
}

impl<C: CommandChannel> DeviceSession<C> {
    /// Creates a session. An empty `serial` targets the only attached device.
    pub fn new(serial: impl Into<String>, channel: C, config: SessionConfig) -> Self {
        Self {
            serial: serial.into(),
            channel,
            config,
            dump_path: None,
            screen: None,
        }
    }

    /// The device serial; empty when targeting the only attached device.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// The session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying command channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Last screen size fetched with [`screen_size`](Self::screen_size).
    pub fn screen(&self) -> Option<ScreenSize> {
        self.screen
    }

    /// The UI dump path currently in use, once established.
    pub fn dump_path(&self) -> Option<&str> {
        self.dump_path.as_deref()
    }

    /// Builds an adb command line targeting this device.
    pub fn adb_command(&self, args: &str) -> String {
        if self.serial.is_empty() {
            format!("{} {}", self.config.adb, args)
        } else {
            format!("{} -s {} {}", self.config.adb, self.serial, args)
        }
    }

    /// Runs `adb <args>` against this device.
    pub fn adb(&self, args: &str) -> Result<String> {
        self.run(&self.adb_command(args))
    }

    /// Runs `adb shell <command>` against this device.
    pub fn shell(&self, command: &str) -> Result<String> {
        self.adb(&format!("shell {command}"))
    }

    pub(crate) fn run(&self, command: &str) -> Result<String> {
        if self.config.verbose {
            info!(serial = %self.serial, %command, "adb");
        } else {
            debug!(serial = %self.serial, %command, "adb");
        }
        Ok(self.channel.execute(command)?)
    }

    /// Duration of `units` delay units.
    pub fn delay(&self, units: u32) -> Duration {
        self.config.delay_unit() * units
    }

    /// Blocks for `units` delay units.
    pub fn sleep_units(&self, units: u32) {
        if units > 0 {
            std::thread::sleep(self.delay(units));
        }
    }

    /// The retry engine configured with this session's polling tick.
    pub fn poller(&self) -> Poller {
        Poller::new(self.config.poll_tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ScriptedChannel;
    use std::sync::Arc;

    const SAMPLE_DEVICES: &str = "List of devices attached\n\
        emulator-5554\tdevice\n\
        R58M123ABC\toffline\n\
        0123456789ABCDEF\tunauthorized\n\
        192.168.1.20:5555\tdevice\n\n";

    #[test]
    fn test_parse_device_list() {
        let entries = parse_device_list(SAMPLE_DEVICES);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].serial, "emulator-5554");
        assert!(entries[0].is_ready());
        assert_eq!(entries[1].state, "offline");
        assert!(!entries[1].is_ready());
        assert_eq!(entries[3].serial, "192.168.1.20:5555");
    }

    #[test]
    fn test_find_emulator_serial() {
        let channel = ScriptedChannel::new()
            .respond(
                "devices",
                "List of devices attached\nR58M123ABC\tdevice\nemulator-5554\tdevice\nemulator-5556\tdevice\nemulator-5558\toffline\n",
            )
            .fail("-s emulator-5554 emu", "connection refused")
            .respond("-s emulator-5556 emu", "Pixel_6_API_33\r\nOK\r\n");
        let config = SessionConfig::default();

        let serial = find_emulator_serial(&channel, &config, "Pixel_6_API_33").unwrap();
        assert_eq!(serial.as_deref(), Some("emulator-5556"));
        assert_eq!(channel.count("R58M123ABC"), 0);
        assert_eq!(channel.count("emulator-5558"), 0);

        assert_eq!(find_emulator_serial(&channel, &config, "Pixel_6").unwrap(), None);
    }

    #[test]
    fn test_parse_device_list_skips_daemon_banner() {
        let output = "* daemon not running; starting now at tcp:5037\n\
            * daemon started successfully\n\
            List of devices attached\n";
        assert!(parse_device_list(output).is_empty());
    }

    #[test]
    fn test_discover_keeps_ready_devices() {
        let channel = Arc::new(ScriptedChannel::new().respond("devices", SAMPLE_DEVICES));
        let sessions = discover(channel, &SessionConfig::default()).unwrap();
        let serials: Vec<&str> = sessions.iter().map(|s| s.serial()).collect();
        assert_eq!(serials, vec!["emulator-5554", "192.168.1.20:5555"]);
    }

    #[test]
    fn test_discover_no_devices() {
        let channel = Arc::new(ScriptedChannel::new().respond("devices", "List of devices attached\n\n"));
        let result = discover(channel, &SessionConfig::default());
        assert!(matches!(result, Err(DroidError::NoDevices)));
    }

    #[test]
    fn test_discover_channel_failure() {
        let channel = Arc::new(ScriptedChannel::new().fail("devices", "adb: not found"));
        let result = discover(channel, &SessionConfig::default());
        assert!(matches!(result, Err(DroidError::Channel(_))));
    }

    #[test]
    fn test_adb_command_with_and_without_serial() {
        let config = SessionConfig::default();
        let single = DeviceSession::new("", ScriptedChannel::new(), config.clone());
        assert_eq!(single.adb_command("shell wm size"), "adb shell wm size");

        let targeted = DeviceSession::new("emulator-5554", ScriptedChannel::new(), config);
        assert_eq!(
            targeted.adb_command("shell wm size"),
            "adb -s emulator-5554 shell wm size"
        );
    }

    #[test]
    fn test_custom_adb_program() {
        let config = SessionConfig::default().with_adb("/opt/sdk/platform-tools/adb");
        let session = DeviceSession::new("abc", ScriptedChannel::new(), config);
        session.shell("input keyevent 26").unwrap();
        assert_eq!(
            session.channel().commands(),
            vec!["/opt/sdk/platform-tools/adb -s abc shell input keyevent 26"]
        );
    }

    #[test]
    fn test_delay_is_multiple_of_unit() {
        let config = SessionConfig::default().with_delay_unit_ms(0);
        let session = DeviceSession::new("", ScriptedChannel::new(), config);
        assert_eq!(session.delay(10), Duration::from_millis(1000));
        assert_eq!(session.delay(0), Duration::ZERO);
    }
}
