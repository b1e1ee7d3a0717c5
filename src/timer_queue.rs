//! One-shot delayed callbacks served by a background thread.
//!
//! A [`TimerScheduler`] owns the thread and the ordered set of deadlines. Nodes
//! hold a [`TimerQueue`], a handle that schedules onto the shared thread but can
//! only cancel its own timers. Every callback is invoked exactly once, either by
//! the timer thread when its deadline passes (`cancelled == false`) or by whoever
//! cancels it (`cancelled == true`).
//!
//! Callbacks run while the dispatch lock is held, so a callback must not call back
//! into the queue that scheduled it. In exchange, once [`TimerQueue::cancel_all`]
//! returns, no callback of that queue is still executing on the timer thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

type Callback = Box<dyn FnOnce(bool) + Send>;

struct Timer {
    group: u64,
    callback: Callback,
}

struct State {
    timers: BTreeMap<(Instant, u64), Timer>,
    next_seq: u64,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    /// Held while any callback runs. Always locked before `state`.
    dispatch: Mutex<()>,
    next_group: AtomicU64,
}

impl Shared {
    fn take_group(&self, group: Option<u64>) -> Vec<Timer> {
        let mut state = self.state.lock();
        let keys: Vec<_> = state
            .timers
            .iter()
            .filter(|(_, timer)| group.map_or(true, |group| timer.group == group))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| state.timers.remove(&key))
            .collect()
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if !state.running {
                return;
            }
            let Some(&(deadline, seq)) = state.timers.keys().next() else {
                self.wakeup.wait(&mut state);
                continue;
            };
            if Instant::now() < deadline {
                self.wakeup.wait_until(&mut state, deadline);
                continue;
            }

            drop(state);
            let dispatch = self.dispatch.lock();
            // The timer may have been cancelled while the locks were released.
            let timer = self.state.lock().timers.remove(&(deadline, seq));
            if let Some(timer) = timer {
                trace!(group = timer.group, "timer expired");
                (timer.callback)(false);
            }
            drop(dispatch);
            state = self.state.lock();
        }
    }
}

/// The background thread and its deadlines. Dropping the scheduler stops the
/// thread and cancels every pending timer.
pub struct TimerScheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl TimerScheduler {
    pub fn new(thread_name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                timers: BTreeMap::new(),
                next_seq: 0,
                running: true,
            }),
            wakeup: Condvar::new(),
            dispatch: Mutex::new(()),
            next_group: AtomicU64::new(0),
        });
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || thread_shared.run())?;
        debug!(thread_name, "timer thread started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// A new handle whose timers can be cancelled independently of other handles.
    pub fn queue(&self) -> TimerQueue {
        TimerQueue {
            shared: self.shared.clone(),
            group: self.shared.next_group.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().timers.len()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shared.state.lock().running = false;
        self.shared.wakeup.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("timer thread panicked");
            }
        }
        let _dispatch = self.shared.dispatch.lock();
        for timer in self.shared.take_group(None) {
            (timer.callback)(true);
        }
    }
}

/// A node's handle onto a [`TimerScheduler`]. Dropping it cancels its timers.
pub struct TimerQueue {
    shared: Arc<Shared>,
    group: u64,
}

impl TimerQueue {
    /// Schedules `callback` to run after `delay`. If the scheduler is already shut
    /// down the callback is invoked right away as cancelled.
    pub fn add(&self, delay: Duration, callback: impl FnOnce(bool) + Send + 'static) {
        let deadline = Instant::now() + delay;
        let mut state = self.shared.state.lock();
        if !state.running {
            drop(state);
            callback(true);
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.insert(
            (deadline, seq),
            Timer {
                group: self.group,
                callback: Box::new(callback),
            },
        );
        drop(state);
        debug!(group = self.group, ?delay, "timer armed");
        self.shared.wakeup.notify_all();
    }

    /// Cancels every pending timer of this queue, invoking the callbacks with
    /// `cancelled == true`. Returns how many timers were cancelled.
    pub fn cancel_all(&self) -> usize {
        let _dispatch = self.shared.dispatch.lock();
        let timers = self.shared.take_group(Some(self.group));
        let count = timers.len();
        for timer in timers {
            (timer.callback)(true);
        }
        if count > 0 {
            debug!(group = self.group, count, "timers cancelled");
            self.shared.wakeup.notify_all();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .timers
            .values()
            .filter(|timer| timer.group == self.group)
            .count()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("group", &self.group)
            .finish()
    }
}
