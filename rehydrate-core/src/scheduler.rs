/*!
Debounce and auto-save timers.

Both timers are Tokio tasks owned by a [`Scheduler`]. Re-arming the debounce
aborts the pending task; replacing the auto-save interval aborts the running
ticker. Dropping the scheduler aborts everything it owns.

Each job runs on the runtime's blocking pool while its timer task waits for
it. A job that blocks (a persist backing off between retries) delays only its
own timer and never stalls a runtime worker. Aborting a timer does not stop a
job that has already started.
*/

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Owner of one debounce timer and one auto-save ticker
#[derive(Debug, Default)]
pub struct Scheduler {
    handle: OnceLock<Handle>,
    debounce: Mutex<Option<JoinHandle<()>>>,
    auto_save: Mutex<Option<JoinHandle<()>>>,
}

fn slot(slot: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    /// A scheduler with no runtime attached; timers are disabled until
    /// [`Scheduler::attach_current`] succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the Tokio runtime of the calling context, if there is one
    pub fn attach_current(&self) -> bool {
        if self.handle.get().is_some() {
            return true;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let _ = self.handle.set(handle);
                true
            }
            Err(_) => {
                warn!("No Tokio runtime available; debounce and auto-save timers are disabled");
                false
            }
        }
    }

    /// Whether timers can be spawned
    pub fn is_active(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Run `job` once `delay` has passed without another call to this method
    pub fn arm_debounce<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(handle) = self.handle.get() else {
            return;
        };

        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                warn!(error = %e, "Debounced job did not complete");
            }
        });

        if let Some(previous) = slot(&self.debounce).replace(task) {
            previous.abort();
        }
        debug!(?delay, "Debounce armed");
    }

    /// Whether a debounced job is waiting to run
    pub fn debounce_pending(&self) -> bool {
        slot(&self.debounce)
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Replace the auto-save ticker; `None` cancels it
    ///
    /// The first run happens one full `interval` after this call.
    pub fn set_auto_save<F>(&self, interval: Option<Duration>, job: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let task = match (interval, self.handle.get()) {
            (Some(period), Some(handle)) if !period.is_zero() => Some(handle.spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let job = job.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                        warn!(error = %e, "Auto-save job did not complete");
                    }
                }
            })),
            _ => None,
        };

        let mut current = slot(&self.auto_save);
        if let Some(previous) = current.take() {
            previous.abort();
        }
        *current = task;
        debug!(?interval, "Auto-save interval set");
    }

    pub fn auto_save_running(&self) -> bool {
        slot(&self.auto_save)
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn cancel_debounce(&self) {
        if let Some(task) = slot(&self.debounce).take() {
            task.abort();
        }
    }

    pub fn cancel_auto_save(&self) {
        if let Some(task) = slot(&self.auto_save).take() {
            task.abort();
        }
    }

    /// Abort every pending timer
    pub fn cancel_all(&self) {
        self.cancel_debounce();
        self.cancel_auto_save();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = {
            let count = count.clone();
            move || count.load(Ordering::SeqCst)
        };
        (count, read)
    }

    #[test]
    fn test_without_runtime_is_inactive() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.attach_current());
        assert!(!scheduler.is_active());

        scheduler.arm_debounce(Duration::from_millis(1), || {});
        assert!(!scheduler.debounce_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let scheduler = Scheduler::new();
        assert!(scheduler.attach_current());
        let (count, read) = counter();

        for _ in 0..5 {
            let count = count.clone();
            scheduler.arm_debounce(Duration::from_millis(300), move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(read(), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(read(), 1);
        assert!(!scheduler.debounce_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_debounce_never_runs() {
        let scheduler = Scheduler::new();
        scheduler.attach_current();
        let (count, read) = counter();

        scheduler.arm_debounce(Duration::from_millis(50), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.debounce_pending());
        scheduler.cancel_all();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(read(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_save_ticks_until_replaced() {
        let scheduler = Scheduler::new();
        scheduler.attach_current();
        let (count, read) = counter();

        let ticks = count.clone();
        scheduler.set_auto_save(Some(Duration::from_secs(10)), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.auto_save_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(read(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(read(), 3);

        scheduler.set_auto_save(None, || {});
        assert!(!scheduler.auto_save_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(read(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timers() {
        let (count, read) = counter();
        {
            let scheduler = Scheduler::new();
            scheduler.attach_current();
            let ticks = count.clone();
            scheduler.set_auto_save(Some(Duration::from_secs(1)), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(read(), 0);
    }

    #[tokio::test]
    async fn test_blocking_job_leaves_runtime_responsive() {
        let scheduler = Scheduler::new();
        scheduler.attach_current();
        let (count, read) = counter();

        scheduler.arm_debounce(Duration::from_millis(5), move || {
            std::thread::sleep(Duration::from_millis(400));
            count.fetch_add(1, Ordering::SeqCst);
        });

        let mut worst = Duration::ZERO;
        for _ in 0..15 {
            let started = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(10)).await;
            worst = worst.max(started.elapsed());
        }
        assert!(worst < Duration::from_millis(200), "runtime stalled for {worst:?}");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(read(), 1);
    }
}
