//! 주기적 백그라운드 작업.
//!
//! 각 작업은 자체 `CancellationToken`을 가지며 `stop()`은 여러 번 호출해도 안전합니다.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 취소 가능한 주기 작업 핸들.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// `period`마다 `tick`을 실행하는 작업을 시작합니다.
    ///
    /// 첫 실행은 시작 직후가 아니라 한 주기가 지난 뒤입니다.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_aligned(name, period, period, tick)
    }

    /// `first_delay` 뒤에 처음 실행하고, 이후 `period`마다 `tick`을 실행합니다.
    ///
    /// UTC 자정처럼 달력 경계에 맞춰야 하는 작업에 사용합니다.
    pub fn spawn_aligned<F, Fut>(
        name: &'static str,
        first_delay: Duration,
        period: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                task = name,
                first_delay_secs = first_delay.as_secs(),
                period_secs = period.as_secs(),
                "백그라운드 작업 시작"
            );
            let mut ticker = interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "백그라운드 작업 실행");
                        tick().await;
                    }
                    _ = child.cancelled() => {
                        info!(task = name, "백그라운드 작업 종료");
                        break;
                    }
                }
            }
        });

        Self {
            name,
            token,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// 작업 이름.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 중지 신호를 보냅니다. 대기하지 않으며 반복 호출해도 됩니다.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// 중지 신호를 보내고 작업 종료를 기다립니다.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// 중지 신호를 받았는지 확인합니다.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_runs_and_stops() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = BackgroundTask::spawn_periodic("counter", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop();
        task.stop();
        task.shutdown().await;
        task.shutdown().await;
        assert!(task.is_stopped());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aligned_task_waits_for_first_delay() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = BackgroundTask::spawn_aligned(
            "aligned",
            Duration::from_secs(30),
            Duration::from_secs(100),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        task.shutdown().await;
    }
}
