//! End-to-end device flows against a scripted adb channel.
//!
//! Each test goes through `discover` and then drives the resulting session the
//! way a test script would: wait, sample, act.

mod common;

use std::sync::Arc;
use std::thread;

use common::{fast_config, shared, DEVICES, DUMPED, LOGIN_SCREEN, SPLASH_SCREEN};

use droidctl_core::channel::testing::ScriptedChannel;
use droidctl_core::coords::{node_tokens, Point};
use droidctl_core::sampler::MatchStrategy;
use droidctl_core::session::discover;
use droidctl_core::DroidError;

fn login_flow_channel() -> ScriptedChannel {
    ScriptedChannel::new()
        .respond("devices", DEVICES)
        .respond("getprop sys.boot_completed", "\n")
        .respond("getprop sys.boot_completed", "1\n")
        .respond("wm size", "Physical size: 1080x2400\n")
        .respond("uiautomator dump", DUMPED)
        .respond("cat /sdcard/window_dump.xml", SPLASH_SCREEN)
        .respond("cat /sdcard/window_dump.xml", LOGIN_SCREEN)
}

#[test]
fn test_login_flow() {
    let channel = shared(login_flow_channel());
    let mut devices = discover(Arc::clone(&channel), &fast_config()).unwrap();
    assert_eq!(devices.len(), 1);
    let device = &mut devices[0];

    assert_eq!(device.wait_for_boot(10).unwrap(), 1);

    let size = device.screen_size().unwrap();
    assert_eq!((size.width, size.height), (1080, 2400));
    assert_eq!(device.screen(), Some(size));

    assert_eq!(device.wait_for_text(&["sign in"], 10).unwrap(), 1);
    assert_eq!(device.tap_text("Sign in", 0).unwrap(), Point::new(540, 2075));

    let taps: Vec<String> = channel
        .commands()
        .into_iter()
        .filter(|c| c.contains("input tap"))
        .collect();
    assert_eq!(taps, vec!["adb -s emulator-5554 shell input tap 540 2075"]);
}

#[test]
fn test_cached_dump_is_reread_without_new_capture() {
    let channel = shared(login_flow_channel());
    let mut devices = discover(Arc::clone(&channel), &fast_config()).unwrap();
    let device = &mut devices[0];

    device.ui_dump(true).unwrap();
    let screen = device.ui_dump(false).unwrap();
    assert_eq!(channel.count("uiautomator dump"), 1);
    assert_eq!(channel.count("cat /sdcard/window_dump.xml"), 2);
    assert_eq!(node_tokens(&screen).count(), 3);
}

#[test]
fn test_text_never_appears() {
    let channel = ScriptedChannel::new()
        .respond("devices", DEVICES)
        .respond("uiautomator dump", DUMPED)
        .respond("cat", SPLASH_SCREEN);
    let mut devices = discover(shared(channel), &fast_config()).unwrap();
    let result = devices[0].wait_for_text(&["Sign in", "Create account"], 4);
    assert!(matches!(result, Err(DroidError::RetryExhausted { attempts: 4 })));
    assert_eq!(devices[0].channel().count("uiautomator dump"), 4);
}

#[test]
fn test_sampled_strategy_checks_every_target_within_a_cycle() {
    let channel = ScriptedChannel::new()
        .respond("devices", DEVICES)
        .respond("uiautomator dump", DUMPED)
        .respond("cat", LOGIN_SCREEN);
    let config = fast_config().with_match_strategy(MatchStrategy::Sampled);
    let mut devices = discover(shared(channel), &config).unwrap();
    // Three targets, only one present: sampling without replacement reaches
    // it within three rounds.
    let result = devices[0].wait_for_text(&["Checkout", "Cart", "Welcome back"], 3);
    assert!(result.is_ok());
}

#[test]
fn test_offline_device_during_wait_surfaces_channel_error() {
    let channel = ScriptedChannel::new()
        .respond("devices", DEVICES)
        .fail("getprop", "error: device offline");
    let devices = discover(shared(channel), &fast_config()).unwrap();
    match devices[0].wait_for_boot(3) {
        Err(DroidError::Channel(e)) => assert!(e.message.contains("offline")),
        other => panic!("expected channel error, got {other:?}"),
    }
}

#[test]
fn test_sessions_on_separate_threads() {
    let devices_output = "List of devices attached\nemulator-5554\tdevice\nemulator-5556\tdevice\n";
    let channel = shared(
        ScriptedChannel::new()
            .respond("devices", devices_output)
            .respond("getprop sys.boot_completed", "1\n"),
    );
    let sessions = discover(Arc::clone(&channel), &fast_config()).unwrap();

    let handles: Vec<_> = sessions
        .into_iter()
        .map(|device| thread::spawn(move || device.wait_for_boot(5).map(|_| device.serial().to_string())))
        .collect();
    let mut serials: Vec<String> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
    serials.sort();
    assert_eq!(serials, vec!["emulator-5554", "emulator-5556"]);
    assert_eq!(channel.count("-s emulator-5554 shell getprop"), 1);
    assert_eq!(channel.count("-s emulator-5556 shell getprop"), 1);
}
