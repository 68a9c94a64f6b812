use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Async-safe signal handling for commands that hold a lock until told to stop
///
/// Handlers are installed without SA_RESTART, so a thread parked in F_SETLKW
/// returns EINTR when SIGINT/SIGTERM/SIGHUP arrives.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Initialize signal handlers
    /// Must be called early in main() before any threads are spawned
    pub fn init() -> Result<Self, String> {
        Self::install_signal_handlers()?;
        Ok(Self)
    }

    /// Install signal handlers for SIGINT, SIGTERM, SIGHUP
    fn install_signal_handlers() -> Result<(), String> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );

        // SAFETY: the handler only touches atomics.
        unsafe {
            signal::sigaction(Signal::SIGINT, &sig_action)
                .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;

            signal::sigaction(Signal::SIGTERM, &sig_action)
                .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;

            signal::sigaction(Signal::SIGHUP, &sig_action)
                .map_err(|e| format!("Failed to install SIGHUP handler: {}", e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(())
    }

    /// Only performs atomic stores: no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn get_signal(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Reset shutdown flag (for testing)
    #[allow(dead_code)]
    pub fn reset(&self) {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }

    /// Wait for signal with timeout
    /// Returns true if signal received, false if timeout
    pub fn wait_for_signal(&self, timeout: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        false
    }

    /// Park until a signal arrives, running `tick` roughly every `period`
    pub fn wait_with<F: FnMut()>(&self, period: Duration, mut tick: F) -> u32 {
        while !self.wait_for_signal(period) {
            tick();
        }
        self.get_signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_handler_init() {
        let handler = SignalHandler::init();
        assert!(handler.is_ok());
    }

    #[test]
    fn test_shutdown_flag() {
        let handler = SignalHandler::init().unwrap();
        handler.reset();
        assert!(!handler.shutdown_requested());

        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(libc::SIGTERM as u32, Ordering::SeqCst);
        assert!(handler.shutdown_requested());
        assert!(handler.wait_for_signal(Duration::from_millis(10)));
        assert_eq!(handler.wait_with(Duration::from_millis(10), || {}), libc::SIGTERM as u32);

        handler.reset();
        assert!(!handler.wait_for_signal(Duration::from_millis(10)));
    }
}
