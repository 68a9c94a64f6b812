/// Background thread that keeps a held mail lock from going stale
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct LockRefresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LockRefresher {
    /// Run `task` every `interval` until the refresher is stopped or dropped
    pub fn spawn<F>(interval: Duration, mut task: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            info!("Started mail lock refresher (every {:?})", interval);
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("Refreshing mail lock");
                        task();
                    }
                    // Stop requested or the owner went away
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Mail lock refresher exiting");
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for it to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LockRefresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
