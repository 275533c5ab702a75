//! Cancellable repeating task.
//!
//! One worker thread waits `interval` on a cancel channel, runs a tick, and
//! only then starts the next wait. Cycles never overlap; a slow tick pushes
//! the next one back instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What the tick wants to happen next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Timing statistics for a repeating task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    /// Ticks whose own duration exceeded the interval.
    pub overruns: u64,
    pub worst_case: Duration,
    pub last_duration: Duration,
}

impl TickStats {
    fn record(&mut self, elapsed: Duration, interval: Duration) {
        self.ticks += 1;
        self.last_duration = elapsed;
        if elapsed > interval {
            self.overruns += 1;
        }
        if elapsed > self.worst_case {
            self.worst_case = elapsed;
        }
    }
}

/// Handle to a running repeating task.
///
/// Dropping the handle cancels the task.
pub struct RepeatingTask {
    name: String,
    interval: Duration,
    cancel: Option<Sender<()>>,
    cancelled: Arc<AtomicBool>,
    scheduled: Arc<AtomicBool>,
    stats: Arc<Mutex<TickStats>>,
    worker: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Start the task; the first tick fires one `interval` from now.
    ///
    /// `tick` receives a 1-based sequence number.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut(u64) -> TickOutcome + Send + 'static,
    {
        let name = name.into();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let scheduled = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(TickStats::default()));

        let thread_cancelled = cancelled.clone();
        let thread_scheduled = scheduled.clone();
        let thread_stats = stats.clone();
        let thread_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut seq = 0u64;
                loop {
                    match cancel_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if thread_cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    thread_scheduled.store(false, Ordering::SeqCst);

                    seq += 1;
                    let start = Instant::now();
                    let outcome = tick(seq);
                    let elapsed = start.elapsed();
                    if let Ok(mut stats) = thread_stats.lock() {
                        stats.record(elapsed, interval);
                    }
                    if elapsed > interval {
                        log::debug!(
                            "{}: tick {} took {:?}, longer than the {:?} interval",
                            thread_name,
                            seq,
                            elapsed,
                            interval
                        );
                    }

                    if outcome == TickOutcome::Stop || thread_cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    thread_scheduled.store(true, Ordering::SeqCst);
                }
                thread_scheduled.store(false, Ordering::SeqCst);
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("{}: failed to spawn worker thread: {}", name, err);
                cancelled.store(true, Ordering::SeqCst);
                scheduled.store(false, Ordering::SeqCst);
                None
            }
        };

        Self {
            name,
            interval,
            cancel: Some(cancel_tx),
            cancelled,
            scheduled,
            stats,
            worker,
        }
    }

    /// Ticks waiting to fire: 1 while a wait is pending, 0 while a tick runs or after cancel.
    pub fn pending(&self) -> usize {
        if self.is_cancelled() {
            return 0;
        }
        usize::from(self.scheduled.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TickStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Cancel without waiting. No tick starts after this returns; a tick
    /// already running finishes on its own.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.scheduled.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            // A send error only means the worker already exited.
            let _ = cancel.send(());
        }
    }

    /// Cancel and wait for the worker to exit.
    ///
    /// Must not be called from inside the tick itself.
    pub fn cancel_and_join(mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{}: worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RepeatingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatingTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("pending", &self.pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn ticks_repeat_until_stop() {
        let (tx, rx) = mpsc::channel();
        let task = RepeatingTask::spawn("test-repeat", Duration::from_millis(5), move |seq| {
            tx.send(seq).unwrap();
            if seq == 3 {
                TickOutcome::Stop
            } else {
                TickOutcome::Continue
            }
        });
        let seen: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, vec![1, 2, 3]);
        task.cancel_and_join();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn exactly_one_tick_pending_after_spawn() {
        let task = RepeatingTask::spawn("test-pending", Duration::from_secs(60), |_| {
            TickOutcome::Continue
        });
        assert_eq!(task.pending(), 1);
        assert_eq!(task.stats().ticks, 0);
        task.cancel_and_join();
    }

    #[test]
    fn cancel_before_first_tick_prevents_it() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let mut task = RepeatingTask::spawn("test-cancel", Duration::from_millis(30), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Continue
        });
        task.cancel();
        assert_eq!(task.pending(), 0);
        assert!(task.is_cancelled());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        task.cancel_and_join();
    }

    #[test]
    fn stats_record_overruns() {
        let mut stats = TickStats::default();
        stats.record(Duration::from_millis(5), Duration::from_millis(10));
        stats.record(Duration::from_millis(15), Duration::from_millis(10));
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.worst_case, Duration::from_millis(15));
        assert_eq!(stats.last_duration, Duration::from_millis(15));
    }
}
