use crate::core::reconciler::{StatusReconciler, SyncOutcome};
use crate::domain::ports::{CarrierClient, OrderStore};
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns the periodic status sync job. Scheduled ticks and manual triggers
/// share the reconciler's run-lock, so they never overlap.
pub struct SyncScheduler<K, O>
where
    K: CarrierClient + ?Sized + 'static,
    O: OrderStore + ?Sized + 'static,
{
    reconciler: Arc<StatusReconciler<K, O>>,
    period: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl<K, O> SyncScheduler<K, O>
where
    K: CarrierClient + ?Sized + 'static,
    O: OrderStore + ?Sized + 'static,
{
    pub fn new(reconciler: Arc<StatusReconciler<K, O>>, period: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            reconciler,
            period,
            shutdown_tx,
        }
    }

    pub fn every_hours(reconciler: Arc<StatusReconciler<K, O>>, hours: u64) -> Self {
        Self::new(reconciler, Duration::from_secs(hours * 60 * 60))
    }

    /// Manual run, same semantics as a scheduled tick.
    pub async fn trigger(&self) -> Result<SyncOutcome> {
        tracing::info!("Manual status sync requested");
        self.reconciler.reconcile_once().await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Starts the job loop. The first run happens right away when
    /// `run_immediately` is set, otherwise after one full period.
    pub fn spawn(&self, run_immediately: bool) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let period = self.period;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            if !run_immediately {
                ticker.tick().await;
            }

            tracing::info!(period_secs = period.as_secs(), "⏰ Status sync scheduled");
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_logged(&reconciler).await,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Status sync scheduler stopped");
        })
    }
}

async fn run_logged<K, O>(reconciler: &StatusReconciler<K, O>)
where
    K: CarrierClient + ?Sized,
    O: OrderStore + ?Sized,
{
    match reconciler.reconcile_once().await {
        Ok(SyncOutcome::Completed(report)) => {
            tracing::debug!(updated = report.updated, "Scheduled status sync finished")
        }
        Ok(SyncOutcome::AlreadyRunning) => {}
        Err(e) => tracing::error!(
            error = %e,
            category = ?e.category(),
            "Scheduled status sync failed, waiting for next tick"
        ),
    }
}
