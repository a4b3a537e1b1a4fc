//! Background expiry and reconciliation.

use std::time::Duration;

use inventory::ReservationManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::CheckoutOrchestrator;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: usize,
    pub reservations_released: usize,
    pub reconciled: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodically expires overdue sessions, releases lapsed reservations and
/// retries flagged compensations.
///
/// Every operation it calls is conditioned on current status, so any number
/// of sweepers may run against the same stores.
#[derive(Clone)]
pub struct ExpirationSweeper {
    orchestrator: CheckoutOrchestrator,
    reservations: ReservationManager,
    interval: Duration,
    batch_size: usize,
}

impl ExpirationSweeper {
    /// Uses the orchestrator's sweeper interval and batch size.
    pub fn new(orchestrator: CheckoutOrchestrator, reservations: ReservationManager) -> Self {
        let interval = orchestrator.config().sweeper_interval;
        let batch_size = orchestrator.config().sweeper_batch_size;
        Self {
            orchestrator,
            reservations,
            interval,
            batch_size,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass: sessions first, then reservations no session released,
    /// then reconciliation.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.orchestrator.sweep_expired(self.batch_size).await {
            Ok(n) => report.sessions_expired = n,
            Err(e) => tracing::warn!(error = %e, "session sweep failed"),
        }
        match self.reservations.sweep_expired(self.batch_size).await {
            Ok(n) => report.reservations_released = n,
            Err(e) => tracing::warn!(error = %e, "reservation sweep failed"),
        }
        match self.orchestrator.reconcile_flagged(self.batch_size).await {
            Ok(n) => report.reconciled = n,
            Err(e) => tracing::warn!(error = %e, "reconciliation sweep failed"),
        }

        if !report.is_empty() {
            tracing::info!(
                sessions_expired = report.sessions_expired,
                reservations_released = report.reservations_released,
                reconciled = report.reconciled,
                "sweep finished"
            );
        }
        report
    }

    /// Runs [`run_once`](Self::run_once) every interval until the handle is
    /// shut down.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.interval, batch_size = self.batch_size, "expiration sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::info!("expiration sweeper stopped");
        });
        SweeperHandle { shutdown, task }
    }
}

/// Stops a spawned sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper and waits for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "expiration sweeper task failed");
        }
    }
}
