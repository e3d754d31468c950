//! Restartable interval timer backed by one dedicated thread, ported from
//! a `boost::asio::deadline_timer` running on its own io_context thread.
//! One `Timer` per active temporal subscription.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Fires a callback every `interval` until stopped. `set_interval` takes
/// effect on the next tick, not the in-flight one.
pub struct Timer {
    interval_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    wake: Arc<(Mutex<()>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawns the timer thread immediately, calling `on_tick` every
    /// `interval` while running.
    pub fn start<F>(interval: Duration, on_tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let interval_ms = Arc::new(AtomicU64::new(interval.as_millis() as u64));
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new((Mutex::new(()), Condvar::new()));

        let worker = {
            let interval_ms = Arc::clone(&interval_ms);
            let running = Arc::clone(&running);
            let wake = Arc::clone(&wake);
            std::thread::spawn(move || {
                let (lock, condvar) = &*wake;
                while running.load(Ordering::Acquire) {
                    let period = Duration::from_millis(interval_ms.load(Ordering::Acquire).max(1));
                    let guard = lock.lock().expect("timer wake mutex poisoned");
                    let (_guard, _timeout) = condvar
                        .wait_timeout(guard, period)
                        .expect("timer wake mutex poisoned");
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    on_tick();
                }
            })
        };

        Timer {
            interval_ms,
            running,
            wake,
            worker: Some(worker),
        }
    }

    /// Changes the tick period; applies starting with the next wait.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms.store(interval.as_millis() as u64, Ordering::Release);
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let (_lock, condvar) = &*self.wake;
        condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
