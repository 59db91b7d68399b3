//! Input and app-management actions on a [`DeviceSession`].
//!
//! Each action is one or a few `adb shell` commands. Commands whose output
//! signals failure (`am start` without `Starting`, `pm clear` without
//! `Success`, ...) are reported as [`DroidError::Command`]; everything else
//! only fails when the channel does.
//!
//! Free-form arguments (text, URLs, file names) pass through two shells, the
//! host's `sh -c` and the device shell behind `adb shell`, so they are quoted
//! twice with [`device_arg`].

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::CommandChannel;
use crate::coords::{find_node, tap_point, Point};
use crate::error::{DroidError, Result};
use crate::session::DeviceSession;

/// `KEYCODE_POWER`
pub const KEYCODE_POWER: u32 = 26;
/// `KEYCODE_PAGE_UP`
pub const KEYCODE_PAGE_UP: u32 = 92;
/// `KEYCODE_PAGE_DOWN`
pub const KEYCODE_PAGE_DOWN: u32 = 93;

/// Longest recording `screenrecord` accepts, in seconds.
pub const MAX_RECORD_SECONDS: u32 = 180;

/// Quotes `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quotes `arg` so it survives both the host shell and the device shell.
pub fn device_arg(arg: &str) -> String {
    shell_quote(&shell_quote(arg))
}

/// Encodes text for `input text`, which reads `%s` as a space.
pub fn input_text_arg(text: &str) -> String {
    device_arg(&text.replace(' ', "%s"))
}

fn validate_key(code: &str) -> Result<()> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DroidError::InvalidInput(format!("invalid key code {code:?}")));
    }
    Ok(())
}

fn validate_package(package: &str) -> Result<()> {
    let valid = !package.is_empty()
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '$'));
    if !valid {
        return Err(DroidError::InvalidInput(format!("invalid package name {package:?}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Screen-off timeout
// ---------------------------------------------------------------------------

/// Screen-off timeouts accepted by the system settings UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenTimeout {
    /// 15 seconds.
    Secs15,
    /// 30 seconds.
    Secs30,
    /// 1 minute.
    Min1,
    /// 2 minutes.
    Min2,
    /// 5 minutes.
    Min5,
    /// 10 minutes.
    Min10,
    /// 30 minutes.
    Min30,
}

impl ScreenTimeout {
    /// Every accepted value, shortest first.
    pub const ALL: [ScreenTimeout; 7] = [
        Self::Secs15,
        Self::Secs30,
        Self::Min1,
        Self::Min2,
        Self::Min5,
        Self::Min10,
        Self::Min30,
    ];

    /// The setting value in milliseconds.
    pub fn millis(self) -> u32 {
        match self {
            Self::Secs15 => 15_000,
            Self::Secs30 => 30_000,
            Self::Min1 => 60_000,
            Self::Min2 => 120_000,
            Self::Min5 => 300_000,
            Self::Min10 => 600_000,
            Self::Min30 => 1_800_000,
        }
    }

    /// Short label such as `15s` or `2m`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Secs15 => "15s",
            Self::Secs30 => "30s",
            Self::Min1 => "1m",
            Self::Min2 => "2m",
            Self::Min5 => "5m",
            Self::Min10 => "10m",
            Self::Min30 => "30m",
        }
    }
}

impl std::str::FromStr for ScreenTimeout {
    type Err = DroidError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|t| t.label()).collect();
                DroidError::InvalidInput(format!(
                    "screen timeout {s:?}; expected one of {}",
                    valid.join(", ")
                ))
            })
    }
}

/// Restores a screen-off timeout changed by
/// [`DeviceSession::screen_timeout`].
#[derive(Debug)]
#[must_use = "the previous timeout is only restored by calling `restore`"]
pub struct TimeoutGuard<'a, C> {
    session: &'a DeviceSession<C>,
    previous: Option<String>,
}

impl<C: CommandChannel> TimeoutGuard<'_, C> {
    /// The value in effect before the change, if one was made.
    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// Puts the previous value back. A no-op when nothing was changed.
    pub fn restore(self) -> Result<()> {
        let Some(previous) = self.previous else {
            return Ok(());
        };
        info!(serial = %self.session.serial(), %previous, "restoring screen off timeout");
        let output = self
            .session
            .shell(&format!("settings put system screen_off_timeout {previous}"))?;
        if !output.trim().is_empty() {
            warn!(%output, "failed to restore screen off timeout");
            return Err(DroidError::Command {
                action: "restore screen_off_timeout".to_string(),
                output,
            });
        }
        Ok(())
    }
}

impl<C: CommandChannel> DeviceSession<C> {
    // -----------------------------------------------------------------------
    // Touch and keys
    // -----------------------------------------------------------------------

    /// Taps `point`, then sleeps `delay_units`.
    pub fn tap(&self, point: Point, delay_units: u32) -> Result<()> {
        debug!(x = point.x, y = point.y, "tapping");
        self.shell(&format!("input tap {} {}", point.x, point.y))?;
        self.sleep_units(delay_units);
        Ok(())
    }

    /// Taps the center of a `[x1,y1][x2,y2]` token.
    pub fn tap_bounds(&self, token: &str, delay_units: u32) -> Result<Point> {
        let point = tap_point(token)?;
        self.tap(point, delay_units)?;
        Ok(point)
    }

    /// Taps the first node whose text, description or id mentions `needle`
    /// in a fresh dump.
    pub fn tap_text(&mut self, needle: &str, delay_units: u32) -> Result<Point> {
        let screen = self.ui_dump(true)?;
        let point = find_node(&screen, needle)
            .map(|node| node.center())
            .ok_or_else(|| DroidError::Command {
                action: format!("tap {needle:?}"),
                output: "no matching node on screen".to_string(),
            })?;
        self.tap(point, delay_units)?;
        Ok(point)
    }

    /// Taps an input field and deletes about `char_count` characters from its
    /// end.
    pub fn tap_and_clear(&self, point: Point, char_count: u32) -> Result<()> {
        debug!(x = point.x, y = point.y, char_count, "tapping and clearing input");
        self.tap(point, 0)?;
        self.shell("input keyevent KEYCODE_MOVE_END")?;
        // Each long press deletes two characters.
        for _ in 0..char_count / 2 + 1 {
            self.shell("input keyevent --longpress KEYCODE_DEL KEYCODE_DEL")?;
        }
        Ok(())
    }

    /// Swipes from `from` to `to`.
    pub fn swipe(&self, from: Point, to: Point) -> Result<()> {
        debug!(?from, ?to, "swiping");
        self.shell(&format!("input swipe {} {} {} {}", from.x, from.y, to.x, to.y))?;
        Ok(())
    }

    /// Types `text` into the focused field, optionally one character per
    /// command.
    ///
    /// # Errors
    ///
    /// [`DroidError::InvalidInput`] if `text` is empty.
    pub fn input_text(&self, text: &str, per_char: bool) -> Result<()> {
        if text.is_empty() {
            return Err(DroidError::InvalidInput("text cannot be empty".to_string()));
        }
        debug!(%text, per_char, "inputting text");
        if per_char {
            let mut buf = [0u8; 4];
            for c in text.chars() {
                let arg = input_text_arg(c.encode_utf8(&mut buf));
                self.shell(&format!("input text {arg}"))?;
            }
        } else {
            self.shell(&format!("input text {}", input_text_arg(text)))?;
        }
        Ok(())
    }

    /// Sends a key event, either a numeric code or a `KEYCODE_*` name.
    pub fn key_event(&self, code: &str) -> Result<()> {
        validate_key(code)?;
        self.shell(&format!("input keyevent {code}"))?;
        Ok(())
    }

    /// Scrolls up one page.
    pub fn page_up(&self) -> Result<()> {
        self.key_event(&KEYCODE_PAGE_UP.to_string())
    }

    /// Scrolls down one page.
    pub fn page_down(&self) -> Result<()> {
        self.key_event(&KEYCODE_PAGE_DOWN.to_string())
    }

    /// Presses the power button.
    pub fn power_button(&self) -> Result<()> {
        self.key_event(&KEYCODE_POWER.to_string())
    }

    /// Wakes the device up; does nothing if the screen is already on.
    pub fn wake_up(&self) -> Result<()> {
        debug!("waking the device up");
        self.key_event("KEYCODE_WAKEUP")
    }

    // -----------------------------------------------------------------------
    // Apps
    // -----------------------------------------------------------------------

    /// Launches `activity` of `package`, passing extra `am start` options.
    ///
    /// # Errors
    ///
    /// [`DroidError::Command`] if the package is not installed or the output
    /// does not report `Starting`.
    pub fn start_app(&self, package: &str, activity: &str, options: &str) -> Result<()> {
        validate_package(package)?;
        validate_package(activity)?;
        if !self.installed(package)? {
            return Err(DroidError::Command {
                action: format!("start {package}"),
                output: "package not found".to_string(),
            });
        }
        info!(serial = %self.serial(), package, activity, "starting app");
        let mut command = format!("am start -n {package}/{activity}");
        if !options.trim().is_empty() {
            command.push(' ');
            command.push_str(options.trim());
        }
        let output = self.shell(&command)?;
        if !output.contains("Starting") {
            return Err(DroidError::Command {
                action: format!("start {package}"),
                output,
            });
        }
        Ok(())
    }

    /// Force-stops `package`.
    pub fn close_app(&self, package: &str) -> Result<()> {
        validate_package(package)?;
        info!(serial = %self.serial(), package, "closing app");
        self.shell(&format!("am force-stop {package}"))?;
        Ok(())
    }

    /// Clears all data of `package`.
    pub fn clear_app(&self, package: &str) -> Result<()> {
        validate_package(package)?;
        info!(serial = %self.serial(), package, "clearing app data");
        let output = self.shell(&format!("pm clear {package}"))?;
        if !output.contains("Success") {
            return Err(DroidError::Command {
                action: format!("clear {package}"),
                output,
            });
        }
        Ok(())
    }

    /// Opens `url` in the default browser.
    pub fn open_url(&self, url: &str) -> Result<()> {
        let output = self.shell(&format!(
            "am start -a android.intent.action.VIEW -d {}",
            device_arg(url)
        ))?;
        if output.to_lowercase().contains("error") {
            return Err(DroidError::Command {
                action: format!("open {url}"),
                output,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Saves a PNG screenshot under `/sdcard/` and returns its device path.
    ///
    /// Without a name a random one is generated.
    pub fn screen_cap(&self, name: Option<&str>) -> Result<String> {
        let name = name.map_or_else(|| format!("{}.png", Uuid::new_v4()), str::to_string);
        let path = format!("/sdcard/{name}");
        self.shell(&format!("screencap {}", device_arg(&path)))?;
        Ok(path)
    }

    /// Records the screen as mp4 for `seconds` and returns the device path.
    ///
    /// Blocks until the recording ends.
    pub fn screen_record(&self, name: Option<&str>, seconds: u32) -> Result<String> {
        if seconds == 0 || seconds > MAX_RECORD_SECONDS {
            return Err(DroidError::InvalidInput(format!(
                "recording length must be 1..={MAX_RECORD_SECONDS} seconds, got {seconds}"
            )));
        }
        let name = name.map_or_else(|| format!("{}.mp4", Uuid::new_v4()), str::to_string);
        let path = format!("/sdcard/{name}");
        self.shell(&format!(
            "screenrecord --time-limit {seconds} {}",
            device_arg(&path)
        ))?;
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // System
    // -----------------------------------------------------------------------

    /// Enables or disables auto-rotation.
    pub fn auto_rotate(&self, enabled: bool) -> Result<()> {
        self.shell(&format!(
            "content insert --uri content://settings/system --bind name:s:accelerometer_rotation --bind value:i:{}",
            u8::from(enabled)
        ))?;
        Ok(())
    }

    /// Powers the device off.
    pub fn shutdown(&self) -> Result<()> {
        info!(serial = %self.serial(), "shutting down");
        self.shell("reboot -p")?;
        Ok(())
    }

    /// Restarts adbd as root. Only works on rooted devices and emulators.
    pub fn root(&self) -> Result<()> {
        let output = self.adb("root")?;
        let lines = output.lines().filter(|l| !l.trim().is_empty()).count();
        if lines > 1 {
            return Err(DroidError::Command {
                action: "adb root".to_string(),
                output,
            });
        }
        Ok(())
    }

    /// Sets the screen-off timeout, returning a guard that can put the
    /// previous value back.
    pub fn screen_timeout(&self, timeout: ScreenTimeout) -> Result<TimeoutGuard<'_, C>> {
        let current = self
            .shell("settings get system screen_off_timeout")?
            .trim()
            .to_string();
        let wanted = timeout.millis().to_string();
        if current == wanted {
            debug!(timeout = timeout.label(), "screen off timeout already set");
            return Ok(TimeoutGuard {
                session: self,
                previous: None,
            });
        }

        info!(serial = %self.serial(), timeout = timeout.label(), "setting screen off timeout");
        let output = self.shell(&format!("settings put system screen_off_timeout {wanted}"))?;
        if !output.trim().is_empty() {
            return Err(DroidError::Command {
                action: "set screen_off_timeout".to_string(),
                output,
            });
        }
        Ok(TimeoutGuard {
            session: self,
            previous: Some(current),
        })
    }
}
