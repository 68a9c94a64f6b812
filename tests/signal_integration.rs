//! A blocking lock wait ends with `Interrupted` when one of the shutdown
//! signals arrives. Kept in its own test binary since the handlers are
//! process-wide.

mod common;

use common::{scratch_file, HeldByChild};
use mboxlock::kernel::signal::SignalHandler;
use mboxlock::{BridgeConfig, BridgeError, LockBridge, LockMode};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

#[test]
fn test_signal_interrupts_blocking_lock() {
    let (_tmp, file) = scratch_file();
    let bridge = LockBridge::from_stdin(BridgeConfig::default());
    let _held = HeldByChild::acquire(file.as_raw_fd(), LockMode::Write);

    let signals = SignalHandler::init().unwrap();
    signals.reset();

    // SAFETY: pthread_self has no preconditions.
    let waiter = unsafe { libc::pthread_self() };
    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        // SAFETY: the waiting thread outlives this one; it is joined below.
        unsafe { libc::pthread_kill(waiter, libc::SIGHUP) }
    });

    let started = Instant::now();
    let result = bridge.try_lock(&file, "rw", true);
    assert_eq!(sender.join().unwrap(), 0);

    assert!(matches!(result, Err(BridgeError::Interrupted)), "{:?}", result);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(signals.shutdown_requested());
    assert_eq!(signals.get_signal(), libc::SIGHUP as u32);
    signals.reset();
}
