//! Periodic replay of the historical table into one connection, bypassing
//! the routing table entirely. One [`Timer`] thread per active temporal
//! subscription drives `tick()`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sttp_types::{Measurement, Ticks};
use tracing::info;
use uuid::Uuid;

use crate::error::PublisherError;
use crate::history_table::HistoryTable;
use crate::timer::Timer;

/// Default cadence: one frame every 33 ms of wall clock.
pub const DEFAULT_PROCESSING_INTERVAL_MS: u64 = 33;
/// How far the historical clock advances per tick, independent of the
/// wall-clock cadence `set_processing_interval` controls.
pub const HISTORY_INTERVAL_TICKS: i64 = 33 * Ticks::PER_MILLISECOND;

/// The publish-path surface a temporal subscriber needs from a connection.
pub trait TemporalDestination: Send + Sync {
    fn publish_measurements(&self, measurements: Vec<Measurement>);
    fn complete_temporal_subscription(&self);
}

pub struct TemporalSubscriber {
    connection: Arc<dyn TemporalDestination>,
    table: Arc<HistoryTable>,
    current_row: Mutex<usize>,
    current_timestamp: AtomicI64,
    stop_timestamp: i64,
    stopped: AtomicBool,
    timer: Mutex<Option<Timer>>,
    instance_id: Uuid,
    removal_callback: Arc<dyn Fn(Uuid) + Send + Sync>,
}

impl TemporalSubscriber {
    /// Starts replaying `table` into `connection` beginning at `start`,
    /// completing once the historical clock passes `stop`. Fails if `table`
    /// has no rows.
    pub fn start(
        connection: Arc<dyn TemporalDestination>,
        table: Arc<HistoryTable>,
        start: Ticks,
        stop: Ticks,
        instance_id: Uuid,
        removal_callback: Arc<dyn Fn(Uuid) + Send + Sync>,
    ) -> Result<Arc<Self>, PublisherError> {
        if table.is_empty() {
            return Err(PublisherError::NoHistoryAvailable);
        }

        let subscriber = Arc::new(TemporalSubscriber {
            connection,
            table,
            current_row: Mutex::new(0),
            current_timestamp: AtomicI64::new(start.0),
            stop_timestamp: stop.0,
            stopped: AtomicBool::new(false),
            timer: Mutex::new(None),
            instance_id,
            removal_callback,
        });

        let tick_target = Arc::clone(&subscriber);
        let timer = Timer::start(Duration::from_millis(DEFAULT_PROCESSING_INTERVAL_MS), move || {
            tick_target.tick();
        });
        *subscriber.timer.lock().expect("temporal subscriber timer lock poisoned") = Some(timer);

        Ok(subscriber)
    }

    /// `-1` restores the default 33ms cadence, `0` requests the fastest
    /// supported cadence (1ms), anything else is taken as a literal period.
    /// The historical clock always advances by [`HISTORY_INTERVAL_TICKS`]
    /// per tick regardless of this setting.
    pub fn set_processing_interval(&self, ms: i32) {
        let period_ms = match ms {
            -1 => DEFAULT_PROCESSING_INTERVAL_MS,
            0 => 1,
            n if n > 0 => n as u64,
            _ => DEFAULT_PROCESSING_INTERVAL_MS,
        };
        if let Some(timer) = self.timer.lock().expect("temporal subscriber timer lock poisoned").as_ref() {
            timer.set_interval(Duration::from_millis(period_ms));
        }
    }

    /// Collects every row sharing the current group's timestamp, re-stamps
    /// them with the historical clock, publishes them, then advances the
    /// clock by one history interval.
    pub fn tick(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let mut row_guard = self.current_row.lock().expect("temporal subscriber row lock poisoned");
        let start_row = *row_guard;
        let group_timestamp = self.table.row(start_row).timestamp;
        let now = Ticks::new(self.current_timestamp.load(Ordering::Acquire));

        let mut group = Vec::new();
        loop {
            let row = self.table.row(*row_guard);
            group.push(Measurement::new(row.signal_id, row.value, now));

            let next_row = if *row_guard == self.table.last_index() { 0 } else { *row_guard + 1 };
            *row_guard = next_row;

            if next_row == start_row || self.table.row(next_row).timestamp != group_timestamp {
                break;
            }
        }
        drop(row_guard);

        self.connection.publish_measurements(group);

        let advanced = now.0 + HISTORY_INTERVAL_TICKS;
        self.current_timestamp.store(advanced, Ordering::Release);
        if advanced > self.stop_timestamp {
            self.complete();
        }
    }

    /// Idempotent: tells the connection to finish, then hands the timer
    /// and the removal callback to a detached thread. `tick()` (and
    /// therefore `complete()`) runs on the timer's own worker thread, so
    /// `Timer::stop()` — which joins that worker — must never run here;
    /// joining from the detached thread instead lets this tick finish and
    /// the worker exit on its own before the join completes.
    pub fn complete(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(instance_id = %self.instance_id, "completing temporal subscription");
        let timer = self.timer.lock().expect("temporal subscriber timer lock poisoned").take();
        self.connection.complete_temporal_subscription();

        let callback = Arc::clone(&self.removal_callback);
        let instance_id = self.instance_id;
        std::thread::spawn(move || {
            if let Some(mut timer) = timer {
                timer.stop();
            }
            callback(instance_id);
        });
    }
}
