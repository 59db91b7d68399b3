//! Screen-state sampling: one adb round-trip per observation.
//!
//! Every sampler operation issues a single command through the session's
//! [`CommandChannel`] and extracts a typed result from the text it prints. The
//! extraction functions are exposed separately (`parse_*`, `*_output`) so the
//! string matching can be tested against captured device output, and so the
//! retry and lifecycle code only ever sees typed values.
//!
//! No operation here retries. Errors surface to the caller; the
//! [`poll`](crate::poll) module decides whether to try again.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::CommandChannel;
use crate::error::{DroidError, Result};
use crate::session::DeviceSession;

/// Dump location used until the device reports another one.
pub const DEFAULT_DUMP_PATH: &str = "/sdcard/window_dump.xml";

static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Physical size:\s*(\d+)x(\d+)").expect("Invalid screen size regex")
});

/// Physical screen dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// How multiple target strings are checked against a dump while waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Every target is checked on every round.
    #[default]
    Exhaustive,
    /// One randomly chosen target is checked per round; a miss removes it
    /// from the pool until every target has had a turn.
    Sampled,
}

/// Display rotation reported by the input service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Natural orientation (rotation 0).
    Portrait,
    /// Rotated 90 degrees.
    Landscape,
    /// Rotated 180 degrees.
    ReversePortrait,
    /// Rotated 270 degrees.
    ReverseLandscape,
}

/// Parses `wm size` output.
///
/// # Errors
///
/// [`DroidError::Size`] if the output lacks `Physical size: WxH`.
pub fn parse_screen_size(output: &str) -> Result<ScreenSize> {
    let size_error = || DroidError::Size {
        output: output.to_string(),
    };
    let caps = SIZE_PATTERN.captures(output).ok_or_else(size_error)?;
    let width = caps[1].parse().map_err(|_| size_error())?;
    let height = caps[2].parse().map_err(|_| size_error())?;
    Ok(ScreenSize { width, height })
}

/// Extracts the dump location from `uiautomator dump` output, if present.
pub fn parse_dump_path(output: &str) -> Option<String> {
    if let Some((_, path)) = output.split_once("dumped to:") {
        let path = path.trim();
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }
    output
        .split_whitespace()
        .find(|token| token.starts_with('/') && token.ends_with(".xml"))
        .map(str::to_string)
}

/// `getprop sys.boot_completed` output means "booted".
pub fn boot_completed_output(output: &str) -> bool {
    output.trim() == "1"
}

/// `dumpsys power` output reports the display as on.
pub fn screen_on_output(output: &str) -> bool {
    output
        .lines()
        .filter(|line| line.contains("state"))
        .any(|line| {
            line.split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| token == "ON")
        })
}

/// Lines of `dumpsys window windows` describing focus, lower-cased.
pub fn focus_output(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.contains("Focus"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
}

/// Parses the `SurfaceOrientation` value out of `dumpsys input`.
pub fn parse_orientation(output: &str) -> Result<Orientation> {
    let value = output
        .lines()
        .find_map(|line| {
            let (_, rest) = line.split_once("SurfaceOrientation")?;
            rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace())
                .split_whitespace()
                .next()
        })
        .ok_or_else(|| DroidError::parse(output, "no SurfaceOrientation entry"))?;

    match value {
        "0" => Ok(Orientation::Portrait),
        "1" => Ok(Orientation::Landscape),
        "2" => Ok(Orientation::ReversePortrait),
        "3" => Ok(Orientation::ReverseLandscape),
        other => Err(DroidError::parse(other, "unknown surface orientation")),
    }
}

/// Folds text for comparison: lower case with runs of whitespace collapsed.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether `target` appears in `screen` after normalizing both.
pub fn screen_contains(screen: &str, target: &str) -> bool {
    normalize(screen).contains(&normalize(target))
}

impl<C: CommandChannel> DeviceSession<C> {
    /// Focused-window description of the foreground app, lower-cased.
    ///
    /// Callers check containment of a package name.
    pub fn foreground(&self) -> Result<String> {
        let output = self.shell("dumpsys window windows")?;
        Ok(focus_output(&output))
    }

    /// Fetches the UI hierarchy XML.
    ///
    /// With `fresh`, a new dump is triggered first and the path it reports
    /// replaces the cached one. Without it, the last dump file is re-read.
    ///
    /// # Errors
    ///
    /// - [`DroidError::Dump`] if the dump command does not report an xml file
    /// - [`DroidError::Channel`] if either command fails to run
    pub fn ui_dump(&mut self, fresh: bool) -> Result<String> {
        if self.dump_path.is_none() {
            debug!(path = DEFAULT_DUMP_PATH, "setting default dump path");
            self.dump_path = Some(DEFAULT_DUMP_PATH.to_string());
        }

        if fresh {
            let command = self.adb_command("shell uiautomator dump");
            let output = self.run(&command)?;
            if !output.contains("xml") {
                return Err(DroidError::Dump { command, output });
            }
            if let Some(path) = parse_dump_path(&output) {
                if self.dump_path.as_deref() != Some(path.as_str()) {
                    debug!(%path, "resetting dump path");
                    self.dump_path = Some(path);
                }
            }
        }

        let path = self.dump_path.as_deref().unwrap_or(DEFAULT_DUMP_PATH);
        self.shell(&format!("cat {path}"))
    }

    /// Fetches and caches the physical screen size.
    ///
    /// On failure the previously cached size is left untouched.
    pub fn screen_size(&mut self) -> Result<ScreenSize> {
        let output = self.shell("wm size")?;
        let size = parse_screen_size(&output)?;
        self.screen = Some(size);
        Ok(size)
    }

    /// Whether the device reports `sys.boot_completed=1`.
    pub fn is_boot_completed(&self) -> Result<bool> {
        let output = self.shell("getprop sys.boot_completed")?;
        Ok(boot_completed_output(&output))
    }

    /// Whether the display is powered on.
    pub fn is_screen_on(&self) -> Result<bool> {
        let output = self.shell("dumpsys power")?;
        Ok(screen_on_output(&output))
    }

    /// Takes one fresh dump and reports whether any target appears in it.
    pub fn has_in_screen(&mut self, targets: &[&str]) -> Result<bool> {
        let screen = self.ui_dump(true)?;
        Ok(targets.iter().any(|target| screen_contains(&screen, target)))
    }

    /// Current display orientation.
    pub fn orientation(&self) -> Result<Orientation> {
        let output = self.shell("dumpsys input")?;
        parse_orientation(&output)
    }

    /// Whether `package` is installed.
    pub fn installed(&self, package: &str) -> Result<bool> {
        let output = self.shell(&format!("pm list packages {package}"))?;
        Ok(output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .any(|name| name == package))
    }

    /// Activity entries registered for `package`.
    pub fn activities(&self, package: &str) -> Result<Vec<String>> {
        let output = self.shell("dumpsys package")?;
        let needle = package.to_lowercase();
        Ok(output
            .lines()
            .filter(|line| line.to_lowercase().contains(&needle) && line.contains("Activity"))
            .map(|line| line.trim().trim_start_matches("package:").to_string())
            .collect())
    }
}
