//! Wait primitives
//!
//! [`WaitGate`] is one spawned timed wait: a background timer thread plus a
//! completion flag. [`WaitControl`] is the behavioral contract of the external
//! blocking progress indicator; [`WaitGroup`] serializes creation of the
//! shared indicator so two near-simultaneous long waits cannot race, and
//! [`WaitControlBridge`] is the thin adapter the runtime goes through.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::host::Host;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/* ===================== Cancellation ===================== */

/// Shared cooperative-cancellation flag.
///
/// Cloned into timer threads and polled at every suspension point; no guard
/// interrupts a handler already mid-execution.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag; returns the previous value.
    pub fn set(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/* ===================== WaitGate ===================== */

/// One background timed wait. Created per interval, never reused.
///
/// Lifecycle: created -> running (timer armed) -> resolved (timed out,
/// canceled, or explicitly continued) -> discarded.
#[derive(Debug)]
pub struct WaitGate {
    deadline: DateTime<Utc>,
    done: Arc<AtomicBool>,
    _timer: JoinHandle<()>,
}

impl WaitGate {
    pub fn spawn(duration_secs: f64, message: &str, cancel: CancelToken, poll: Duration) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let deadline = Utc::now() + chrono::Duration::milliseconds((duration_secs * 1000.0) as i64);

        let timer = thread::spawn({
            let done = done.clone();
            let label = message.to_string();
            move || {
                let start = Instant::now();
                loop {
                    let elapsed = start.elapsed().as_secs_f64();
                    if elapsed >= duration_secs {
                        break;
                    }
                    if cancel.is_canceled() {
                        return;
                    }
                    let remaining = Duration::from_secs_f64(duration_secs - elapsed);
                    thread::sleep(remaining.min(poll));
                }
                if !cancel.is_canceled() {
                    info!(interval = %label, "interval timer finished");
                    done.store(true, Ordering::SeqCst);
                }
            }
        });

        Self {
            deadline,
            done,
            _timer: timer,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn done_flag(&self) -> Arc<AtomicBool> {
        self.done.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Resolve the gate early without waiting for the deadline.
    pub fn continue_now(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/* ===================== WaitControl ===================== */

/// Contract of the external blocking progress indicator.
///
/// The runtime never assumes a visual representation; a headless
/// [`TimedWaitControl`] satisfies the same contract.
pub trait WaitControl: Send + Sync {
    fn start(&self, block: bool, wait_secs: f64);
    fn join(&self);
    fn is_canceled(&self) -> bool;
    fn is_continued(&self) -> bool;
    fn stop(&self);
}

/// Headless wait control: blocks for the configured time, resolvable early by
/// `stop`, `cancel`, or `continue_run`.
pub struct TimedWaitControl {
    message: String,
    wait_secs: Mutex<f64>,
    started: Mutex<Option<Instant>>,
    canceled: AtomicBool,
    continued: AtomicBool,
    stopped: AtomicBool,
    poll: Duration,
}

impl TimedWaitControl {
    pub fn new(wait_secs: f64, message: &str, poll: Duration) -> Self {
        Self {
            message: message.to_string(),
            wait_secs: Mutex::new(wait_secs),
            started: Mutex::new(None),
            canceled: AtomicBool::new(false),
            continued: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            poll,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Operator pressed cancel.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Operator pressed continue.
    pub fn continue_run(&self) {
        self.continued.store(true, Ordering::SeqCst);
    }
}

impl WaitControl for TimedWaitControl {
    fn start(&self, block: bool, wait_secs: f64) {
        *lock_or_recover(&self.wait_secs) = wait_secs;
        *lock_or_recover(&self.started) = Some(Instant::now());
        debug!(wait_secs, message = %self.message, "wait control started");
        if block {
            self.join();
        }
    }

    fn join(&self) {
        let started = match *lock_or_recover(&self.started) {
            Some(s) => s,
            None => return,
        };
        let wait_secs = *lock_or_recover(&self.wait_secs);
        while started.elapsed().as_secs_f64() < wait_secs {
            if self.stopped.load(Ordering::SeqCst)
                || self.canceled.load(Ordering::SeqCst)
                || self.continued.load(Ordering::SeqCst)
            {
                break;
            }
            thread::sleep(self.poll);
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_continued(&self) -> bool {
        self.continued.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/* ===================== WaitGroup ===================== */

/// Shared-indicator policy: only one wait control is active at a time, and
/// creation is serialized so the first control is registered as active before
/// the next waiter looks.
#[derive(Default)]
pub struct WaitGroup {
    create_lock: Mutex<()>,
    active: Mutex<Option<Arc<dyn WaitControl>>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn creation_guard(&self) -> MutexGuard<'_, ()> {
        lock_or_recover(&self.create_lock)
    }

    pub fn set_active(&self, control: Arc<dyn WaitControl>) {
        *lock_or_recover(&self.active) = Some(control);
    }

    pub fn active(&self) -> Option<Arc<dyn WaitControl>> {
        lock_or_recover(&self.active).clone()
    }

    /// Clear the active slot if it still holds `control`.
    pub fn pop(&self, control: &Arc<dyn WaitControl>) {
        let mut active = lock_or_recover(&self.active);
        if let Some(current) = active.as_ref() {
            if Arc::ptr_eq(current, control) {
                *active = None;
            }
        }
    }
}

/* ===================== Bridge ===================== */

/// Adapter between the runtime and the host's progress indicator.
pub struct WaitControlBridge {
    host: Arc<dyn Host>,
}

impl WaitControlBridge {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Create and register a wait control under the group's creation lock, so
    /// the control has a chance to start before the next waiter asks whether
    /// the active control is running.
    pub fn acquire(&self, wait_secs: f64, message: &str) -> Arc<dyn WaitControl> {
        let group = self.host.wait_group();
        let _guard = group.creation_guard();

        let message = format!("Waiting for {:.1}s  {}", wait_secs, message);
        let control = self.host.make_wait_control(wait_secs, &message);
        group.set_active(control.clone());
        control.start(false, wait_secs);
        control
    }

    pub fn release(&self, control: &Arc<dyn WaitControl>) {
        self.host.wait_group().pop(control);
    }
}
