//! Shared test helpers for droidctl-core integration tests.
//!
//! Devices are simulated with `ScriptedChannel`, emulators with the in-memory
//! process table and environment from the crate's `testing` modules.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use droidctl_core::channel::testing::ScriptedChannel;
use droidctl_core::config::SessionConfig;
use droidctl_core::emulator::testing::FakeEnvironment;
use droidctl_core::emulator::EmulatorManager;
use droidctl_core::process::testing::FakeProcesses;

pub const LAUNCHER: &str = "/opt/android-sdk/emulator/emulator";
pub const AVD: &str = "Pixel_6_API_33";

pub const DEVICES: &str = "List of devices attached\nemulator-5554\tdevice\n";
pub const DUMPED: &str = "UI hierchary dumped to: /sdcard/window_dump.xml\n";

pub const LOGIN_SCREEN: &str = concat!(
    r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>"#,
    r#"<hierarchy rotation="0">"#,
    r#"<node index="0" text="" class="android.widget.FrameLayout" bounds="[0,0][1080,2400]">"#,
    r#"<node index="0" text="Welcome back" class="android.widget.TextView" bounds="[100,400][980,520]" />"#,
    r#"<node index="1" text="Sign in" resource-id="com.example:id/login" class="android.widget.Button" bounds="[100,2000][980,2150]" />"#,
    r#"</node>"#,
    r#"</hierarchy>"#
);

pub const SPLASH_SCREEN: &str =
    r#"<hierarchy rotation="0"><node index="0" text="" class="android.widget.ProgressBar" bounds="[490,1150][590,1250]" /></hierarchy>"#;

/// Session settings with a 1 ms polling tick, so waits finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_delay_unit_ms(1)
        .with_poll_tick(Duration::from_millis(1))
}

/// A device that answers `adb devices` with a single ready emulator.
pub fn emulator_channel() -> ScriptedChannel {
    ScriptedChannel::new().respond("devices", DEVICES)
}

/// An emulator manager with one configured AVD and an empty process table.
pub fn emulator_manager() -> EmulatorManager<FakeProcesses, FakeEnvironment> {
    let env = FakeEnvironment::new().with_path(LAUNCHER).with_avds(&[AVD]);
    EmulatorManager::new(FakeProcesses::new(), env, LAUNCHER)
}

pub fn shared(channel: ScriptedChannel) -> Arc<ScriptedChannel> {
    Arc::new(channel)
}
