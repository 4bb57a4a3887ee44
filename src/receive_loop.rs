//! Deliver captured frames to a handler on a background thread.
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, trace};

use crate::receiver::Sniff;

// The pcap crate doesn't support `pcap_loop` and `pcap_breakloop`,
// so we implement our own looping mechanism.
pub struct ReceiveLoop {
    handle: JoinHandle<()>,
    stopped: Arc<Mutex<bool>>,
}

impl ReceiveLoop {
    /// Call `on_frame` with every frame produced by `sniffer`, until stopped.
    ///
    /// The stop flag is checked whenever the sniffer returns, so the sniffer
    /// must not block indefinitely.
    pub fn new<S, F>(mut sniffer: S, mut on_frame: F) -> Self
    where
        S: Sniff + Send + 'static,
        F: FnMut(&[u8], Duration) + Send + 'static,
    {
        let stopped = Arc::new(Mutex::new(false));
        let stopped_thr = stopped.clone();
        let handle = thread::spawn(move || loop {
            match sniffer.next_frame() {
                Ok(Some(frame)) => {
                    trace!("captured size={} timestamp={:?}", frame.data.len(), frame.timestamp);
                    on_frame(&frame.data, frame.timestamp);
                }
                Ok(None) => {}
                Err(error) => error!("{:?}", error),
            }
            if *stopped_thr.lock().unwrap() {
                break;
            }
        });
        ReceiveLoop { handle, stopped }
    }

    pub fn stop(self) {
        *self.stopped.lock().unwrap() = true;
        if self.handle.join().is_err() {
            error!("receive loop panicked");
        }
    }
}
