//! Timers for the retransmission of queries.
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{error, trace};

/// A callback run when a timer expires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer, for cancellation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// A facility to run a callback after a delay.
///
/// Cancelling a timer that already fired, or that was already cancelled,
/// is a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
}

struct TimerState {
    next_id: u64,
    queue: BTreeMap<(Instant, u64), TimerTask>,
    deadlines: HashMap<u64, Instant>,
    stopped: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// A [`Scheduler`] running every task on a single background thread,
/// in deadline order.
pub struct TimerThread {
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl TimerThread {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                next_id: 0,
                queue: BTreeMap::new(),
                deadlines: HashMap::new(),
                stopped: false,
            }),
            wakeup: Condvar::new(),
        });
        let shared_thr = shared.clone();
        let handle = thread::spawn(move || run(&shared_thr));
        TimerThread {
            handle: Some(handle),
            shared,
        }
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }
}

impl Default for TimerThread {
    fn default() -> Self {
        Self::new()
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    while !state.stopped {
        let now = Instant::now();
        let next = state.queue.keys().next().copied();
        match next {
            None => state = shared.wakeup.wait(state).unwrap(),
            Some((deadline, id)) if deadline <= now => {
                state.deadlines.remove(&id);
                if let Some(task) = state.queue.remove(&(deadline, id)) {
                    trace!("fire timer={}", id);
                    // Tasks may schedule or cancel other timers.
                    drop(state);
                    // A panicking task must not stop the other timers.
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("timer={} task panicked", id);
                    }
                    state = shared.state.lock().unwrap();
                }
            }
            Some((deadline, _)) => {
                state = shared.wakeup.wait_timeout(state, deadline - now).unwrap().0;
            }
        }
    }
}

impl Scheduler for TimerThread {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let deadline = Instant::now() + delay;
        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        self.shared.wakeup.notify_one();
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(deadline) = state.deadlines.remove(&handle.0) {
            state.queue.remove(&(deadline, handle.0));
            trace!("cancel timer={}", handle.0);
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.wakeup.notify_one();
        if let Some(handle) = self.handle.take() {
            // The last owner may be a task running on the timer thread itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}
