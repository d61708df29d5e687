use crate::domain::fleet::{FleetSignals, FleetState, ScaleDecision, ScalingPolicy};
use crate::error::Result;
use crate::ports::clock::Clock;
use crate::ports::fleet::FleetOrchestrator;
use crate::ports::queue::JobQueuePort;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoscalerSettings {
    pub min_count: usize,
    pub max_count: usize,
    pub poll_interval: Duration,
    pub policy: ScalingPolicy,
    /// Compute decisions and log them without resizing the fleet.
    pub observe_only: bool,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        Self {
            min_count: 0,
            max_count: 10,
            poll_interval: Duration::from_secs(30),
            policy: ScalingPolicy::default(),
            observe_only: false,
        }
    }
}

/// Sizes the worker fleet to queue backlog. Owns the only [`FleetState`].
pub struct Autoscaler<Q, F, C> {
    queue: Q,
    fleet: F,
    clock: C,
    settings: AutoscalerSettings,
    state: Option<FleetState>,
}

impl<Q, F, C> Autoscaler<Q, F, C>
where
    Q: JobQueuePort,
    F: FleetOrchestrator,
    C: Clock,
{
    pub fn new(queue: Q, fleet: F, clock: C, settings: AutoscalerSettings) -> Self {
        Self {
            queue,
            fleet,
            clock,
            settings,
            state: None,
        }
    }

    pub fn state(&self) -> Option<&FleetState> {
        self.state.as_ref()
    }

    /// One control iteration: read signals, update state, resize on change.
    pub async fn tick(&mut self) -> Result<Option<ScaleDecision>> {
        let stats = self.queue.stats().await?;
        let current_count = self.fleet.current_count().await?;
        let signals = FleetSignals {
            queue_depth: stats.visible + stats.delayed,
            in_flight: stats.in_flight,
            current_count,
        };
        let now = self.clock.now();

        let settings = self.settings;
        let state = self.state.get_or_insert_with(|| {
            FleetState::new(settings.min_count, settings.max_count, current_count)
        });
        let previous = state.clone();
        let decision = state.observe(&settings.policy, &signals, now);
        debug!(
            queue_depth = signals.queue_depth,
            in_flight = signals.in_flight,
            current = current_count,
            desired = state.desired_count,
            "autoscaler tick"
        );

        let Some(decision) = decision else {
            return Ok(None);
        };
        info!(
            from = decision.from,
            to = decision.to,
            queue_depth = signals.queue_depth,
            in_flight = signals.in_flight,
            observe_only = settings.observe_only,
            "scaling fleet"
        );
        if !settings.observe_only {
            if let Err(e) = self.fleet.set_desired_count(decision.to).await {
                // Forget the decision so the next tick asks again.
                self.state = Some(previous);
                return Err(e);
            }
        }
        Ok(Some(decision))
    }

    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "autoscaler tick failed");
            }
        }
        info!("autoscaler stopped");
        Ok(())
    }
}
