use crate::broker::BrokerError;
use crate::consumer::{CloseOutcome, ConsumerControlPlane};
use crate::listener::{ListenerState, ListenerStatistics};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Pausing,
    Draining,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub phase: ShutdownPhase,
    pub at: Instant,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub transitions: Vec<PhaseTransition>,
    pub close_outcomes: Vec<CloseOutcome>,
    pub client_result: Result<(), BrokerError>,
    pub wait_interrupted: bool,
    pub abandoned_workers: u64,
}

impl ShutdownReport {
    pub fn entered_at(&self, phase: ShutdownPhase) -> Option<Instant> {
        self.transitions
            .iter()
            .find(|transition| transition.phase == phase)
            .map(|transition| transition.at)
    }

    pub fn phases(&self) -> Vec<ShutdownPhase> {
        self.transitions.iter().map(|t| t.phase).collect()
    }

    pub fn is_clean(&self) -> bool {
        !self.wait_interrupted
            && self.client_result.is_ok()
            && self.close_outcomes.iter().all(|outcome| outcome.result.is_ok())
    }
}

/// Cuts the grace period short, e.g. on a second termination signal.
#[derive(Clone)]
pub struct WaitInterrupter {
    notify: Arc<Notify>,
}

impl WaitInterrupter {
    pub fn interrupt(&self) {
        self.notify.notify_one();
    }
}

/// Runs the termination sequence: pause, drain, wait the grace period, close.
///
/// The grace period is a fixed deadline; workers still running when it expires are
/// abandoned. Every failure is logged and the sequence always reaches
/// [`ShutdownPhase::Closed`].
pub struct ShutdownOrchestrator {
    control_plane: ConsumerControlPlane,
    state: ListenerState,
    grace_period: Duration,
    statistics: Vec<Arc<ListenerStatistics>>,
    phase: watch::Sender<ShutdownPhase>,
    started: AtomicBool,
    interrupt: Arc<Notify>,
}

impl ShutdownOrchestrator {
    pub fn new(
        control_plane: ConsumerControlPlane,
        state: ListenerState,
        grace_period: Duration,
    ) -> Self {
        ShutdownOrchestrator {
            control_plane,
            state,
            grace_period,
            statistics: Vec::new(),
            phase: watch::channel(ShutdownPhase::Running).0,
            started: AtomicBool::new(false),
            interrupt: Arc::new(Notify::new()),
        }
    }

    pub fn watch_statistics(&mut self, statistics: Arc<ListenerStatistics>) {
        self.statistics.push(statistics);
    }

    pub fn control_plane(&self) -> &ConsumerControlPlane {
        &self.control_plane
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub fn interrupter(&self) -> WaitInterrupter {
        WaitInterrupter {
            notify: Arc::clone(&self.interrupt),
        }
    }

    /// Returns once every resource is closed. Only the first call runs the sequence,
    /// later calls wait for it to reach [`ShutdownPhase::Closed`] and return `None`.
    pub async fn on_termination_signal(&self) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("graceful shutdown already initiated, waiting for it to complete");

            let mut phase = self.phase.subscribe();
            let _ = phase.wait_for(|phase| *phase == ShutdownPhase::Closed).await;

            return None;
        }

        info!(
            "termination signal received, initiating graceful shutdown, grace_period_ms={}",
            self.grace_period.as_millis()
        );

        let mut transitions = Vec::with_capacity(4);

        self.enter(ShutdownPhase::Pausing, &mut transitions);
        self.control_plane.pause_all();

        self.enter(ShutdownPhase::Draining, &mut transitions);
        self.state.flip_to_draining();
        info!("listener draining, queued messages will be negatively acknowledged");

        let wait_interrupted = self.wait_grace_period().await;

        let abandoned_workers = self.in_flight_workers();

        if abandoned_workers > 0 {
            warn!(
                "grace period over, abandoning {} workers still processing",
                abandoned_workers
            );
        }

        self.enter(ShutdownPhase::Closing, &mut transitions);

        info!("closing all consumers...");
        let close_outcomes = self.control_plane.close_all().await;

        let failed_closes = close_outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .count();

        if failed_closes == 0 {
            info!("successfully closed {} consumers", close_outcomes.len());
        } else {
            error!(
                "{} of {} consumers failed to close",
                failed_closes,
                close_outcomes.len()
            );
        }

        info!("closing client...");
        let client_result = self.control_plane.close_client().await;

        self.enter(ShutdownPhase::Closed, &mut transitions);
        info!("graceful shutdown complete");

        Some(ShutdownReport {
            transitions,
            close_outcomes,
            client_result,
            wait_interrupted,
            abandoned_workers,
        })
    }

    fn enter(&self, phase: ShutdownPhase, transitions: &mut Vec<PhaseTransition>) {
        let previous = self.phase.send_replace(phase);

        info!("shutdown phase {:?} -> {:?}", previous, phase);

        transitions.push(PhaseTransition {
            phase,
            at: Instant::now(),
        });
    }

    async fn wait_grace_period(&self) -> bool {
        if self.grace_period.is_zero() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.grace_period) => false,
            _ = self.interrupt.notified() => {
                error!("grace period wait interrupted, closing immediately");
                true
            }
        }
    }

    fn in_flight_workers(&self) -> u64 {
        self.statistics
            .iter()
            .map(|statistics| statistics.snapshot().in_flight())
            .sum()
    }
}
