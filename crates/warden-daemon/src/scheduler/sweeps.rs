//! Periodic engine maintenance
//!
//! Four loops drive the engine: incarceration reconciliation, member lock
//! eviction, stats cleanup and activity promotion. A failing iteration is
//! logged and the loop carries on; stopping lets an in-flight iteration
//! finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use warden_engine::{Engine, EngineConfig, EngineResult};

/// Loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepIntervals {
    pub reconcile: Duration,
    pub lock_sweep: Duration,
    pub stats_cleanup: Duration,
    pub promotion: Duration,
}

impl SweepIntervals {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            reconcile: config.incarceration.poll_interval(),
            lock_sweep: Duration::from_secs(config.locks.sweep_interval_secs),
            stats_cleanup: Duration::from_secs(config.monitor.cleanup_interval_secs),
            promotion: Duration::from_secs(config.monitor.promotion_interval_secs),
        }
    }
}

/// Scheduler state
pub struct Scheduler {
    engine: Arc<Engine>,
    intervals: SweepIntervals,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, intervals: SweepIntervals) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            engine,
            intervals,
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the loops. Each runs its first iteration immediately.
    pub async fn start(&self) {
        let loops = vec![
            self.spawn_loop("reconcile", self.intervals.reconcile, |engine| async move {
                engine.reconcile().await.map(|_| ())
            }),
            self.spawn_loop("lock-sweep", self.intervals.lock_sweep, |engine| async move {
                engine.sweep_locks();
                engine.prune_reviews();
                Ok(())
            }),
            self.spawn_loop("stats-cleanup", self.intervals.stats_cleanup, |engine| async move {
                engine.cleanup_stats().await.map(|_| ())
            }),
            self.spawn_loop("promotion", self.intervals.promotion, |engine| async move {
                engine.promote_active_members().await.map(|_| ())
            }),
        ];
        self.handles.lock().await.extend(loops);
        tracing::info!(
            reconcile_secs = self.intervals.reconcile.as_secs(),
            lock_sweep_secs = self.intervals.lock_sweep.as_secs(),
            "Scheduler started"
        );
    }

    /// Signal every loop and wait for them to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background loop panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, task: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let engine = self.engine.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = period.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }

                if let Err(e) = task(engine.clone()).await {
                    tracing::error!(task = name, error = %e, "Background task failed");
                }
            }
            tracing::debug!(task = name, "Background loop exited");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use warden_engine::{InMemoryDirectory, ManualClock, MemberSnapshot, RoleLayout};
    use warden_store::InMemoryStore;
    use warden_types::{MemberId, RoleId};

    const MEMBER: MemberId = MemberId::new(100);

    fn layout() -> RoleLayout {
        RoleLayout {
            electoral: RoleId::new(1),
            approved: RoleId::new(2),
            temporary: RoleId::new(3),
            incarcerated: RoleId::new(4),
            missing: RoleId::new(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_release_overdue_members_and_stop() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .insert_member(MemberSnapshot::new(MEMBER, [RoleId::new(2)]))
            .await;
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let config = EngineConfig::new(layout());
        let intervals = SweepIntervals::from_config(&config);
        let engine = Arc::new(Engine::new(
            config,
            directory.clone(),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
        ));
        engine.load().await.unwrap();
        engine.incarcerate(MEMBER, "10m").await.unwrap();
        clock.advance(ChronoDuration::minutes(11));

        let scheduler = Scheduler::new(engine.clone(), intervals);
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let roles = directory.member_roles(MEMBER).await.unwrap();
        assert!(roles.contains(&RoleId::new(2)));
        assert!(!roles.contains(&RoleId::new(4)));

        scheduler.stop().await;
    }

    #[test]
    fn test_intervals_follow_config() {
        let intervals = SweepIntervals::from_config(&EngineConfig::new(layout()));
        assert_eq!(intervals.reconcile, Duration::from_secs(30));
        assert_eq!(intervals.lock_sweep, Duration::from_secs(600));
        assert_eq!(intervals.stats_cleanup, Duration::from_secs(3600));
        assert_eq!(intervals.promotion, Duration::from_secs(3600));
    }
}
