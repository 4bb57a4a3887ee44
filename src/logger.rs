//! Utilities for logging engine statistics.
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use log::{error, info};

/// Logs a snapshot of some statistics at a fixed interval, and once more when stopped.
pub struct StatisticsLogger {
    handle: JoinHandle<()>,
    stopped: Arc<Mutex<bool>>,
}

impl StatisticsLogger {
    pub fn new<T>(statistics: Arc<Mutex<T>>, interval: Duration) -> Self
    where
        T: Display + Send + 'static,
    {
        let stopped = Arc::new(Mutex::new(false));
        let stopped_thr = stopped.clone();
        let handle = thread::spawn(move || {
            let log = || info!("{}", statistics.lock().unwrap());
            let refresh = interval.min(Duration::from_millis(100));
            let mut elapsed = Duration::ZERO;
            while !*stopped_thr.lock().unwrap() {
                sleep(refresh);
                elapsed += refresh;
                if elapsed >= interval {
                    log();
                    elapsed = Duration::ZERO;
                }
            }
            log();
        });
        Self { stopped, handle }
    }

    pub fn stop(self) {
        *self.stopped.lock().unwrap() = true;
        if self.handle.join().is_err() {
            error!("statistics logger panicked");
        }
    }
}
