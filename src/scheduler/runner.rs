use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::network::Reachability;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Work performed each time the single duty-cycle timer fires.
#[async_trait]
pub trait WakeHandler: Send + Sync {
    /// Run one wake and return the next absolute wake time (unix seconds).
    async fn on_wake(&self, now: i64) -> i64;

    /// Reachability changed between wakes. Returns the next wake time.
    async fn on_reachability_changed(&self, now: i64) -> i64;
}

fn delay_until(wake: i64, now: i64, min_delay: Duration) -> Duration {
    let secs = u64::try_from(wake.saturating_sub(now)).unwrap_or(0);
    Duration::from_secs(secs).max(min_delay)
}

/// Deadline for `wake`, measured from when the handler was entered at `now`,
/// so time spent inside the handler is not added on top.
fn rearm(started: Instant, wake: i64, now: i64, min_delay: Duration) -> Instant {
    let target = started + delay_until(wake, now, Duration::ZERO);
    target.max(Instant::now() + min_delay)
}

/// Drive `handler` with exactly one outstanding timer until `cancel` fires.
/// A reachability change re-arms the timer from the handler's answer.
pub async fn duty_cycle_loop<H>(
    handler: Arc<H>,
    mut reachability: watch::Receiver<Reachability>,
    cancel: CancellationToken,
    min_delay: Duration,
) where
    H: WakeHandler + ?Sized,
{
    let mut deadline = Instant::now() + min_delay;
    let mut reachability_open = true;

    loop {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_info!("duty cycle loop shutting down");
                break;
            }
            _ = &mut timer => {
                let started = Instant::now();
                let now = Utc::now().timestamp();
                let wake = handler.on_wake(now).await;
                deadline = rearm(started, wake, now, min_delay);
                log_debug!(
                    "next wake in {}s",
                    deadline.saturating_duration_since(Instant::now()).as_secs()
                );
            }
            changed = reachability.changed(), if reachability_open => {
                if changed.is_err() {
                    reachability_open = false;
                    continue;
                }
                let current = *reachability.borrow_and_update();
                log_info!("reachability changed to {current:?}");
                let started = Instant::now();
                let now = Utc::now().timestamp();
                let wake = handler.on_reachability_changed(now).await;
                deadline = rearm(started, wake, now, min_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        interval: i64,
        wakes: AtomicUsize,
        reachability_changes: AtomicUsize,
    }

    impl CountingHandler {
        fn new(interval: i64) -> Arc<Self> {
            Arc::new(Self {
                interval,
                wakes: AtomicUsize::new(0),
                reachability_changes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WakeHandler for CountingHandler {
        async fn on_wake(&self, now: i64) -> i64 {
            self.wakes.fetch_add(1, Ordering::SeqCst);
            now + self.interval
        }

        async fn on_reachability_changed(&self, now: i64) -> i64 {
            self.reachability_changes.fetch_add(1, Ordering::SeqCst);
            now + self.interval
        }
    }

    #[test]
    fn delay_is_floored_at_minimum() {
        let min = Duration::from_secs(1);
        assert_eq!(delay_until(100, 40, min), Duration::from_secs(60));
        assert_eq!(delay_until(40, 40, min), min);
        assert_eq!(delay_until(10, 40, min), min);
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_follow_handler_schedule() {
        let handler = CountingHandler::new(5);
        let (_tx, rx) = watch::channel(Reachability::Wifi);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(duty_cycle_loop(
            handler.clone(),
            rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));

        // wakes at 1s, 6s and 11s
        tokio::time::sleep(Duration::from_secs(13)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handler.wakes.load(Ordering::SeqCst), 3);
    }

    struct SlowFirstWake {
        origin: Instant,
        wakes: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl WakeHandler for SlowFirstWake {
        async fn on_wake(&self, now: i64) -> i64 {
            let first = {
                let mut wakes = self.wakes.lock().unwrap();
                wakes.push(self.origin.elapsed().as_secs());
                wakes.len() == 1
            };
            if first {
                tokio::time::sleep(Duration::from_secs(50)).await;
            }
            now + 60
        }

        async fn on_reachability_changed(&self, now: i64) -> i64 {
            now + 60
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_does_not_push_back_the_next_wake() {
        let handler = Arc::new(SlowFirstWake {
            origin: Instant::now(),
            wakes: std::sync::Mutex::new(Vec::new()),
        });
        let (_tx, rx) = watch::channel(Reachability::Wifi);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(duty_cycle_loop(
            handler.clone(),
            rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));

        tokio::time::sleep(Duration::from_secs(70)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*handler.wakes.lock().unwrap(), vec![1, 61]);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_wake_fires_after_minimum_delay() {
        let start = Instant::now();
        let min = Duration::from_secs(1);
        tokio::time::advance(Duration::from_secs(30)).await;

        let deadline = rearm(start, 110, 100, min);

        assert_eq!(deadline, Instant::now() + min);
        assert_eq!(rearm(start, 160, 100, min), start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn reachability_change_rearms_without_waiting() {
        let handler = CountingHandler::new(1_000);
        let (tx, rx) = watch::channel(Reachability::Unreachable);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(duty_cycle_loop(
            handler.clone(),
            rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.wakes.load(Ordering::SeqCst), 1);

        tx.send(Reachability::Wifi).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.reachability_changes.load(Ordering::SeqCst), 1);
        assert_eq!(handler.wakes.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_reachability_channel_keeps_timer_running() {
        let handler = CountingHandler::new(2);
        let (tx, rx) = watch::channel(Reachability::Wifi);
        drop(tx);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(duty_cycle_loop(
            handler.clone(),
            rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));

        tokio::time::sleep(Duration::from_secs(4)).await;
        cancel.cancel();
        task.await.unwrap();

        // wakes at 1s and 3s
        assert_eq!(handler.wakes.load(Ordering::SeqCst), 2);
        assert_eq!(handler.reachability_changes.load(Ordering::SeqCst), 0);
    }
}
