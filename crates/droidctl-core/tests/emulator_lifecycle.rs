//! Emulator start, boot wait and teardown with in-memory host fakes.

mod common;

use common::{emulator_channel, emulator_manager, fast_config, shared, AVD};

use droidctl_core::emulator::ProbeState;
use droidctl_core::session::discover;
use droidctl_core::DroidError;

#[test]
fn test_start_wait_release() {
    let manager = emulator_manager();
    let handle = manager.start(AVD).unwrap();
    assert!(handle.is_owned());

    let channel = shared(emulator_channel().respond("getprop sys.boot_completed", "1"));
    let devices = discover(channel, &fast_config()).unwrap();
    devices[0].wait_for_boot(5).unwrap();

    handle.release();
    handle.release();
    assert_eq!(manager.probe(AVD).unwrap(), ProbeState::NotRunning);
    assert_eq!(manager.processes().terminated().len(), 1);
}

#[test]
fn test_second_start_attaches_without_ownership() {
    let manager = emulator_manager();
    let owner = manager.start(AVD).unwrap();
    let guest = manager.start(AVD).unwrap();

    assert!(owner.is_owned());
    assert!(!guest.is_owned());
    assert_eq!(guest.pid(), owner.pid());
    assert_eq!(manager.processes().spawned().len(), 1);

    guest.release();
    assert!(matches!(manager.probe(AVD).unwrap(), ProbeState::Running { .. }));

    owner.release();
    assert_eq!(manager.probe(AVD).unwrap(), ProbeState::NotRunning);
}

#[test]
fn test_handle_moves_across_threads() {
    let manager = emulator_manager();
    let handle = manager.start(AVD).unwrap();
    let pid = handle.pid().unwrap();
    std::thread::spawn(move || handle.release()).join().unwrap();
    assert!(!manager.processes().is_running(pid));
}

#[test]
fn test_unknown_avd_is_environment_error() {
    let manager = emulator_manager();
    let err = manager.start("Wear_OS_Round").unwrap_err();
    assert!(matches!(err, DroidError::Environment(_)));
    assert!(err.to_string().starts_with("Cannot start AVD emulator"));
    assert!(manager.processes().spawned().is_empty());
}
