//! # droidctl-core
//!
//! Core library for Android device and emulator automation over adb.
//!
//! This crate drives devices through a pluggable command channel: it samples
//! screen state (UI hierarchy dumps, focus, boot and power state), turns dump
//! bounds into tap targets, waits on conditions with a bounded poller, and
//! manages the lifecycle of AVD emulator processes.
//!
//! ## Modules
//!
//! - [`channel`] - The [`CommandChannel`](channel::CommandChannel) seam and its shell implementation
//! - [`session`] - Device discovery and per-device sessions
//! - [`coords`] - Bounds parsing and node extraction from hierarchy dumps
//! - [`sampler`] - Screen state queries (dump, size, focus, boot, power)
//! - [`poll`] - The bounded retry engine and the waits built on it
//! - [`actions`] - Taps, swipes, text input and app management
//! - [`process`] - Host process inspection used by the emulator manager
//! - [`emulator`] - AVD emulator start, attach and teardown
//! - [`config`] - Session settings and the persisted user configuration
//! - [`error`] - The shared error type
//!
//! ## External Dependencies
//!
//! - **adb** (Android platform-tools) on `PATH`, or configured in `~/.droidctl/config.json`
//! - **Android emulator** (Android SDK) for the [`emulator`] module
//!
//! ## Example
//!
//! ```no_run
//! use droidctl_core::channel::ShellChannel;
//! use droidctl_core::config::DroidConfig;
//! use droidctl_core::session::discover;
//!
//! let config = DroidConfig::load().session_config();
//! let mut devices = discover(ShellChannel::new(), &config).expect("No devices");
//! let device = &mut devices[0];
//!
//! device.wait_for_boot(60).expect("Device did not boot");
//! device.wait_for_text(&["Sign in"], 30).expect("Login screen not shown");
//! device.tap_text("Sign in", 5).expect("Failed to tap");
//! ```

pub mod actions;
pub mod channel;
pub mod config;
pub mod coords;
pub mod emulator;
pub mod error;
pub mod poll;
pub mod process;
pub mod sampler;
pub mod session;

pub use error::{DroidError, Result};
