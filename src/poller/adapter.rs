use std::cell::Cell;
use std::time::Duration;

use async_trait::async_trait;
use lexdraft_shared::chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::error::DocResult;

/// 抽象调度接口：负责定时任务 (Alarm)
///
/// One alarm per scheduler. Arming replaces the pending alarm.
#[async_trait(?Send)]
pub trait AlarmScheduler {
    /// 设置下一次唤醒的延迟
    async fn set_alarm(&self, delay: Duration) -> DocResult<()>;
    /// 删除当前的闹钟
    async fn delete_alarm(&self) -> DocResult<()>;
    /// Waits for the pending alarm to fire. `false` when no alarm is armed,
    /// or when the alarm was deleted while waiting.
    async fn wait_alarm(&self) -> bool;
}

/// 抽象时钟接口
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =========================================================
// 实现层: tokio 定时器
// =========================================================

/// Alarm backed by `tokio::time::sleep`.
///
/// Every arm or delete bumps a generation and wakes the waiter, which then
/// re-reads the pending delay. A sleep that completes under an old
/// generation does not count as a firing.
#[derive(Default)]
pub struct TokioAlarm {
    pending: Cell<Option<Duration>>,
    generation: Cell<u64>,
    changed: Notify,
}

impl TokioAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.get().is_some()
    }

    fn bump(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        self.changed.notify_waiters();
    }
}

#[async_trait(?Send)]
impl AlarmScheduler for TokioAlarm {
    async fn set_alarm(&self, delay: Duration) -> DocResult<()> {
        self.pending.set(Some(delay));
        self.bump();
        Ok(())
    }

    async fn delete_alarm(&self) -> DocResult<()> {
        self.pending.set(None);
        self.bump();
        Ok(())
    }

    async fn wait_alarm(&self) -> bool {
        loop {
            let Some(delay) = self.pending.get() else {
                return false;
            };
            let generation = self.generation.get();
            let changed = self.changed.notified();

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if self.generation.get() == generation {
                        self.pending.set(None);
                        return true;
                    }
                }
                _ = changed => {}
            }
        }
    }
}

// =========================================================
// 测试环境实现 (Mock)
// =========================================================

#[cfg(test)]
pub mod tests {
    use super::*;
    use lexdraft_shared::chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared manual clock; clones observe the same time.
    #[derive(Clone)]
    pub struct ManualClock(Rc<Cell<DateTime<Utc>>>);

    impl ManualClock {
        pub fn new() -> Self {
            let start = Utc
                .with_ymd_and_hms(2024, 1, 15, 10, 30, 0)
                .single()
                .unwrap();
            Self(Rc::new(Cell::new(start)))
        }

        pub fn advance(&self, by: Duration) {
            let by = lexdraft_shared::chrono::Duration::from_std(by).unwrap();
            self.0.set(self.0.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.get()
        }
    }

    /// Alarm that fires instantly, moving the shared clock forward by the
    /// armed delay.
    pub struct ManualAlarm {
        pub alarm: RefCell<Option<Duration>>,
        pub history: RefCell<Vec<Duration>>,
        pub deletes: Cell<usize>,
        clock: ManualClock,
    }

    impl ManualAlarm {
        pub fn new(clock: ManualClock) -> Self {
            Self {
                alarm: RefCell::new(None),
                history: RefCell::new(Vec::new()),
                deletes: Cell::new(0),
                clock,
            }
        }
    }

    #[async_trait(?Send)]
    impl AlarmScheduler for ManualAlarm {
        async fn set_alarm(&self, delay: Duration) -> DocResult<()> {
            *self.alarm.borrow_mut() = Some(delay);
            self.history.borrow_mut().push(delay);
            Ok(())
        }

        async fn delete_alarm(&self) -> DocResult<()> {
            *self.alarm.borrow_mut() = None;
            self.deletes.set(self.deletes.get() + 1);
            Ok(())
        }

        async fn wait_alarm(&self) -> bool {
            let next = self.alarm.borrow_mut().take();
            match next {
                Some(delay) => {
                    self.clock.advance(delay);
                    true
                }
                None => false,
            }
        }
    }

    #[tokio::test]
    async fn test_manual_alarm_advances_clock() {
        let clock = ManualClock::new();
        let alarm = ManualAlarm::new(clock.clone());
        let start = clock.now();

        assert!(!alarm.wait_alarm().await);
        alarm.set_alarm(Duration::from_secs(2)).await.unwrap();
        alarm.set_alarm(Duration::from_secs(5)).await.unwrap();
        assert!(alarm.wait_alarm().await);
        assert_eq!((clock.now() - start).num_seconds(), 5);
        assert!(!alarm.wait_alarm().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_alarm_fires_after_delay() {
        let alarm = TokioAlarm::new();
        assert!(!alarm.wait_alarm().await);

        alarm.set_alarm(Duration::from_millis(2000)).await.unwrap();
        let started = tokio::time::Instant::now();
        assert!(alarm.wait_alarm().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2010));
        assert!(!alarm.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_alarm_delete_while_waiting() {
        let alarm = Rc::new(TokioAlarm::new());
        alarm.set_alarm(Duration::from_secs(5)).await.unwrap();

        let local = tokio::task::LocalSet::new();
        let waiter = {
            let alarm = alarm.clone();
            local.spawn_local(async move { alarm.wait_alarm().await })
        };
        local
            .run_until(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                alarm.delete_alarm().await.unwrap();
            })
            .await;

        assert!(!local.run_until(waiter).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_alarm_rearm_while_waiting() {
        let alarm = Rc::new(TokioAlarm::new());
        alarm.set_alarm(Duration::from_secs(5)).await.unwrap();

        let local = tokio::task::LocalSet::new();
        let started = tokio::time::Instant::now();
        let waiter = {
            let alarm = alarm.clone();
            local.spawn_local(async move { alarm.wait_alarm().await })
        };
        local
            .run_until(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                alarm.set_alarm(Duration::from_secs(2)).await.unwrap();
            })
            .await;

        assert!(local.run_until(waiter).await.unwrap());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3010));
    }
}
