//! Fleet sizing as a pure function of observed backlog.
//!
//! [`FleetState`] is owned by the autoscaler's control loop and threaded
//! through each iteration; nothing else mutates it.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    /// Jobs one worker is expected to drain per control cycle.
    pub jobs_per_worker: usize,
    /// Minimum time between a scale change and a following scale-in.
    pub scale_in_cooldown: Duration,
    /// How long queue depth and in-flight must both stay at zero before
    /// the fleet may shrink to zero.
    pub scale_to_zero_grace: Duration,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            jobs_per_worker: 10,
            scale_in_cooldown: Duration::from_secs(300),
            scale_to_zero_grace: Duration::from_secs(600),
        }
    }
}

/// External signals read at the start of a control iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetSignals {
    pub queue_depth: usize,
    pub in_flight: usize,
    pub current_count: usize,
}

impl FleetSignals {
    fn is_idle(&self) -> bool {
        self.queue_depth == 0 && self.in_flight == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleDecision {
    pub from: usize,
    pub to: usize,
}

impl ScaleDecision {
    pub fn is_scale_out(&self) -> bool {
        self.to > self.from
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetState {
    pub desired_count: usize,
    pub current_count: usize,
    pub min_count: usize,
    pub max_count: usize,
    pub last_scale_time: Option<Instant>,
    /// Start of the current stretch of zero backlog and zero in-flight.
    pub idle_since: Option<Instant>,
}

impl FleetState {
    pub fn new(min_count: usize, max_count: usize, current_count: usize) -> Self {
        let max_count = max_count.max(min_count);
        Self {
            desired_count: current_count.clamp(min_count, max_count),
            current_count,
            min_count,
            max_count,
            last_scale_time: None,
            idle_since: None,
        }
    }

    fn clamp(&self, n: usize) -> usize {
        n.clamp(self.min_count, self.max_count)
    }

    /// Fleet size wanted for the backlog alone, ignoring cooldown and grace.
    pub fn target_for_backlog(&self, policy: &ScalingPolicy, signals: &FleetSignals) -> usize {
        let per_worker = policy.jobs_per_worker.max(1);
        let backlog = signals.queue_depth + signals.in_flight;
        self.clamp(backlog.div_ceil(per_worker))
    }

    /// Desired count for the given observation, without mutating state.
    pub fn desired_for(&self, policy: &ScalingPolicy, signals: &FleetSignals, now: Instant) -> usize {
        let mut target = self.target_for_backlog(policy, signals);

        if target == 0 && self.desired_count > 0 {
            // An empty queue is not yet a drained fleet: keep one worker
            // until the idle stretch has lasted the full grace period.
            let idle_since = if signals.is_idle() {
                self.idle_since.unwrap_or(now)
            } else {
                now
            };
            let grace_elapsed =
                signals.is_idle() && now.duration_since(idle_since) >= policy.scale_to_zero_grace;
            if !grace_elapsed {
                target = self.clamp(1);
            }
        }

        if target < self.desired_count {
            let cooling = self
                .last_scale_time
                .map(|at| now.duration_since(at) < policy.scale_in_cooldown)
                .unwrap_or(false);
            if cooling {
                return self.desired_count;
            }
        }
        target
    }

    /// Record an observation and return a decision when the desired count changes.
    pub fn observe(
        &mut self,
        policy: &ScalingPolicy,
        signals: &FleetSignals,
        now: Instant,
    ) -> Option<ScaleDecision> {
        self.current_count = signals.current_count;
        self.idle_since = if signals.is_idle() {
            Some(self.idle_since.unwrap_or(now))
        } else {
            None
        };

        let desired = self.desired_for(policy, signals, now);
        if desired == self.desired_count {
            return None;
        }
        let decision = ScaleDecision {
            from: self.desired_count,
            to: desired,
        };
        self.desired_count = desired;
        self.last_scale_time = Some(now);
        Some(decision)
    }
}
