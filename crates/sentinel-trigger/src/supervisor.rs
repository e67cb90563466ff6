//! Hysteresis state machine over streaming indicator values.
//!
//! Each trigger runs `idle -> watching -> armed -> cooldown ->
//! watching`. A value inside the hysteresis band arms the trigger; a
//! condition met fires it; an armed trigger stuck near the threshold
//! past the near-miss timeout fires as an escalation so the decision
//! layer is re-invoked even without a clean crossing. Firing always
//! enters cooldown, whether or not the callback succeeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sentinel_telemetry::Metrics;

use crate::spec::{BoxFuture, IndicatorProvider, TriggerSpec};

/// Supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between indicator polls.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Minutes an armed trigger may sit in the near-miss band before
    /// it fires as an escalation.
    #[serde(default = "default_near_miss_timeout_minutes")]
    pub near_miss_timeout_minutes: u64,
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_near_miss_timeout_minutes() -> u64 {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            near_miss_timeout_minutes: default_near_miss_timeout_minutes(),
        }
    }
}

/// Trigger lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Watching,
    Armed { since: DateTime<Utc> },
    Cooldown { until: DateTime<Utc> },
}

impl TriggerState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Armed { .. } => "armed",
            Self::Cooldown { .. } => "cooldown",
        }
    }
}

/// Why a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    /// The operator condition was met.
    ConditionMet,
    /// Armed past the near-miss timeout without a clean crossing.
    NearMissTimeout,
}

/// Payload handed to the fire callback.
#[derive(Debug, Clone)]
pub struct FireEvent {
    pub trigger_id: String,
    pub symbol: String,
    pub reason: FireReason,
    pub value: Decimal,
    pub at: DateTime<Utc>,
}

/// Callback invoked exactly once per fire.
pub type TriggerCallback =
    Arc<dyn Fn(FireEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// State machine for one trigger.
///
/// Pure with respect to time: the caller supplies `now`, so the
/// machine is driven identically by the poll loop and by tests.
#[derive(Debug)]
pub struct TriggerMachine {
    spec: TriggerSpec,
    state: TriggerState,
    near_miss_timeout: chrono::Duration,
    previous_value: Option<Decimal>,
    last_value: Option<Decimal>,
    evaluations: u64,
    fires: u64,
}

impl TriggerMachine {
    #[must_use]
    pub fn new(spec: TriggerSpec, near_miss_timeout: chrono::Duration) -> Self {
        Self {
            spec,
            state: TriggerState::Idle,
            near_miss_timeout,
            previous_value: None,
            last_value: None,
            evaluations: 0,
            fires: 0,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> TriggerState {
        self.state
    }

    #[must_use]
    pub fn fires(&self) -> u64 {
        self.fires
    }

    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    #[must_use]
    pub fn last_value(&self) -> Option<Decimal> {
        self.last_value
    }

    /// Feed one sample. Returns the fire reason when the trigger fires;
    /// the caller must invoke the callback exactly once per returned
    /// reason. Cooldown is already entered by the time this returns.
    pub fn on_sample(&mut self, value: Decimal, now: DateTime<Utc>) -> Option<FireReason> {
        self.evaluations += 1;
        let previous = self.previous_value;
        self.previous_value = Some(value);
        self.last_value = Some(value);

        match self.state {
            TriggerState::Cooldown { until } if now < until => return None,
            TriggerState::Cooldown { .. } | TriggerState::Idle => {
                self.state = TriggerState::Watching;
            }
            _ => {}
        }

        let met = self.spec.operator.evaluate(previous, value, self.spec.value);
        match self.state {
            TriggerState::Watching => {
                if met {
                    return Some(self.fire(now, FireReason::ConditionMet));
                }
                if self.spec.is_near(value) {
                    debug!(trigger = %self.spec.id, %value, "Near miss, arming");
                    self.state = TriggerState::Armed { since: now };
                }
                None
            }
            TriggerState::Armed { since } => {
                if met {
                    return Some(self.fire(now, FireReason::ConditionMet));
                }
                if !self.spec.is_near(value) {
                    debug!(trigger = %self.spec.id, %value, "Left the near-miss band, disarming");
                    self.state = TriggerState::Watching;
                    return None;
                }
                if now - since >= self.near_miss_timeout {
                    return Some(self.fire(now, FireReason::NearMissTimeout));
                }
                None
            }
            _ => None,
        }
    }

    fn fire(&mut self, now: DateTime<Utc>, reason: FireReason) -> FireReason {
        self.fires += 1;
        let cooldown = chrono::Duration::minutes(self.spec.cooldown_minutes as i64);
        self.state = TriggerState::Cooldown {
            until: now + cooldown,
        };
        reason
    }
}

/// Snapshot of one trigger for operators.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatus {
    pub id: String,
    pub state: &'static str,
    pub last_value: Option<Decimal>,
    pub fires: u64,
}

/// Aggregate counters across a supervisor's triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    pub triggers: usize,
    pub evaluations: u64,
    pub fires: u64,
}

/// Polls indicators for one (user, strategy) pair.
///
/// Triggers are immutable once the supervisor is built; replacing a
/// strategy's triggers means replacing the supervisor through the
/// registry.
pub struct TriggerSupervisor {
    user: String,
    strategy: String,
    machines: Mutex<Vec<TriggerMachine>>,
    provider: Arc<dyn IndicatorProvider>,
    callback: TriggerCallback,
    config: SupervisorConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerSupervisor {
    pub fn new(
        user: impl Into<String>,
        strategy: impl Into<String>,
        specs: Vec<TriggerSpec>,
        provider: Arc<dyn IndicatorProvider>,
        callback: TriggerCallback,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let timeout = chrono::Duration::minutes(config.near_miss_timeout_minutes as i64);
        let machines = specs
            .into_iter()
            .map(|spec| TriggerMachine::new(spec, timeout))
            .collect();
        Arc::new(Self {
            user: user.into(),
            strategy: strategy.into(),
            machines: Mutex::new(machines),
            provider,
            callback,
            config,
            task: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Spawn the poll loop. Restarting replaces the previous loop.
    pub fn start(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(supervisor.config.poll_interval_seconds.max(1));
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                supervisor.poll_once().await;
            }
        });
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
        info!(
            user = %self.user,
            strategy = %self.strategy,
            triggers = self.machines.lock().len(),
            "Trigger supervisor started"
        );
    }

    /// Abort the poll loop. Trigger state is kept in memory so a
    /// restarted loop continues where it stopped.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!(user = %self.user, strategy = %self.strategy, "Trigger supervisor stopped");
        }
    }

    /// One evaluation pass over all triggers.
    ///
    /// An unavailable indicator skips that trigger's evaluation (fail
    /// closed, no state change). A fired trigger's callback error is
    /// logged and swallowed: cooldown was already entered, the trigger
    /// can never get stuck on a failing callback.
    pub async fn poll_once(&self) {
        let specs: Vec<TriggerSpec> = self
            .machines
            .lock()
            .iter()
            .map(|machine| machine.spec().clone())
            .collect();

        for spec in specs {
            let value = match self.provider.current_value(&spec).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(trigger = %spec.id, error = %e, "Indicator unavailable, skipping evaluation");
                    continue;
                }
            };

            let now = Utc::now();
            let fired = {
                let mut machines = self.machines.lock();
                machines
                    .iter_mut()
                    .find(|machine| machine.spec().id == spec.id)
                    .and_then(|machine| machine.on_sample(value, now))
            };

            let Some(reason) = fired else { continue };
            info!(
                user = %self.user,
                strategy = %self.strategy,
                trigger = %spec.id,
                %value,
                ?reason,
                "Trigger fired"
            );
            Metrics::trigger_fire(
                &self.strategy,
                match reason {
                    FireReason::ConditionMet => "condition_met",
                    FireReason::NearMissTimeout => "near_miss_timeout",
                },
            );
            let event = FireEvent {
                trigger_id: spec.id.clone(),
                symbol: spec.symbol.clone(),
                reason,
                value,
                at: now,
            };
            if let Err(e) = (self.callback)(event).await {
                warn!(trigger = %spec.id, error = %e, "Trigger callback failed");
            }
        }
    }

    /// Per-trigger state snapshot.
    #[must_use]
    pub fn status(&self) -> Vec<TriggerStatus> {
        self.machines
            .lock()
            .iter()
            .map(|machine| TriggerStatus {
                id: machine.spec().id.clone(),
                state: machine.state().name(),
                last_value: machine.last_value(),
                fires: machine.fires(),
            })
            .collect()
    }

    /// Aggregate counters.
    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        let machines = self.machines.lock();
        SupervisorStats {
            triggers: machines.len(),
            evaluations: machines.iter().map(TriggerMachine::evaluations).sum(),
            fires: machines.iter().map(TriggerMachine::fires).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::error::TriggerResult;
    use crate::spec::{IndicatorKind, TriggerOp};

    fn spec(operator: TriggerOp, value: Decimal, hysteresis: Decimal) -> TriggerSpec {
        TriggerSpec {
            id: "rsi-oversold".to_string(),
            symbol: "BTC".to_string(),
            indicator: IndicatorKind::Rsi,
            period: 14,
            operator,
            value,
            hysteresis,
            cooldown_minutes: 15,
        }
    }

    fn machine(operator: TriggerOp, value: Decimal, hysteresis: Decimal) -> TriggerMachine {
        TriggerMachine::new(spec(operator, value, hysteresis), chrono::Duration::minutes(5))
    }

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-08-05T12:00:00Z")
            .map(|t| t.with_timezone(&Utc) + chrono::Duration::minutes(minute))
            .expect("valid timestamp")
    }

    #[test]
    fn test_first_sample_moves_idle_to_watching() {
        let mut m = machine(TriggerOp::Lt, dec!(30), dec!(0.05));
        assert_eq!(m.state(), TriggerState::Idle);
        assert!(m.on_sample(dec!(50), at(0)).is_none());
        assert_eq!(m.state(), TriggerState::Watching);
    }

    #[test]
    fn test_near_miss_arms_then_condition_fires_once() {
        let mut m = machine(TriggerOp::Lt, dec!(30), dec!(0.05));
        m.on_sample(dec!(50), at(0));

        // Into the hysteresis band: armed
        assert!(m.on_sample(dec!(31), at(1)).is_none());
        assert!(matches!(m.state(), TriggerState::Armed { .. }));

        // Crossing fires exactly once
        assert_eq!(m.on_sample(dec!(29), at(2)), Some(FireReason::ConditionMet));
        assert_eq!(m.fires(), 1);
        assert!(matches!(m.state(), TriggerState::Cooldown { .. }));

        // Repeat crossings are ignored until the cooldown elapses
        assert!(m.on_sample(dec!(28), at(3)).is_none());
        assert!(m.on_sample(dec!(25), at(10)).is_none());
        assert_eq!(m.fires(), 1);

        // Cooldown over (15 minutes after the fire): eligible again
        assert_eq!(
            m.on_sample(dec!(25), at(18)),
            Some(FireReason::ConditionMet)
        );
        assert_eq!(m.fires(), 2);
    }

    #[test]
    fn test_leaving_band_disarms() {
        let mut m = machine(TriggerOp::Lt, dec!(30), dec!(0.05));
        m.on_sample(dec!(50), at(0));
        m.on_sample(dec!(31), at(1));
        assert!(matches!(m.state(), TriggerState::Armed { .. }));

        assert!(m.on_sample(dec!(40), at(2)).is_none());
        assert_eq!(m.state(), TriggerState::Watching);
    }

    #[test]
    fn test_stuck_near_miss_escalates() {
        let mut m = machine(TriggerOp::Lt, dec!(30), dec!(0.05));
        m.on_sample(dec!(50), at(0));
        m.on_sample(dec!(31), at(1));

        // Still in the band, inside the timeout
        assert!(m.on_sample(dec!(30.5), at(3)).is_none());
        // Past the 5-minute near-miss timeout: escalation fire
        assert_eq!(
            m.on_sample(dec!(30.5), at(7)),
            Some(FireReason::NearMissTimeout)
        );
        assert!(matches!(m.state(), TriggerState::Cooldown { .. }));
    }

    #[test]
    fn test_crossing_operator_tracks_previous_sample() {
        let mut m = machine(TriggerOp::CrossesAbove, dec!(70), dec!(0.02));
        // First sample above the threshold is not a crossing
        assert!(m.on_sample(dec!(75), at(0)).is_none());
        m = machine(TriggerOp::CrossesAbove, dec!(70), dec!(0.02));
        m.on_sample(dec!(65), at(0));
        assert_eq!(m.on_sample(dec!(71), at(1)), Some(FireReason::ConditionMet));
    }

    #[test]
    fn test_direct_fire_from_watching() {
        let mut m = machine(TriggerOp::Gt, dec!(70), dec!(0.02));
        assert_eq!(m.on_sample(dec!(80), at(0)), Some(FireReason::ConditionMet));
    }

    // ------------------------------------------------------------------
    // Supervisor
    // ------------------------------------------------------------------

    struct ScriptedProvider {
        value: Mutex<TriggerResult<Decimal>>,
    }

    impl ScriptedProvider {
        fn new(value: Decimal) -> Arc<Self> {
            Arc::new(Self {
                value: Mutex::new(Ok(value)),
            })
        }

        fn set(&self, value: TriggerResult<Decimal>) {
            *self.value.lock() = value;
        }
    }

    impl IndicatorProvider for ScriptedProvider {
        fn current_value(&self, _spec: &TriggerSpec) -> BoxFuture<'_, TriggerResult<Decimal>> {
            let value = match &*self.value.lock() {
                Ok(value) => Ok(*value),
                Err(e) => Err(crate::error::TriggerError::IndicatorUnavailable(
                    e.to_string(),
                )),
            };
            Box::pin(async move { value })
        }
    }

    fn recording_callback() -> (TriggerCallback, Arc<Mutex<Vec<FireEvent>>>) {
        let events: Arc<Mutex<Vec<FireEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: TriggerCallback = Arc::new(move |event| {
            sink.lock().push(event);
            Box::pin(async { Ok(()) })
        });
        (callback, events)
    }

    #[tokio::test]
    async fn test_poll_fires_callback_once_then_cools_down() {
        let provider = ScriptedProvider::new(dec!(25));
        let (callback, events) = recording_callback();
        let supervisor = TriggerSupervisor::new(
            "u1",
            "dip-buyer",
            vec![spec(TriggerOp::Lt, dec!(30), dec!(0.05))],
            provider.clone(),
            callback,
            SupervisorConfig::default(),
        );

        supervisor.poll_once().await;
        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].reason, FireReason::ConditionMet);

        // Condition still met, but the trigger is cooling down
        supervisor.poll_once().await;
        assert_eq!(events.lock().len(), 1);

        let stats = supervisor.stats();
        assert_eq!(stats.fires, 1);
        assert_eq!(stats.evaluations, 2);
        assert_eq!(supervisor.status()[0].state, "cooldown");
    }

    #[tokio::test]
    async fn test_callback_failure_still_enters_cooldown() {
        let provider = ScriptedProvider::new(dec!(25));
        let callback: TriggerCallback =
            Arc::new(|_| Box::pin(async { Err("decision layer down".to_string()) }));
        let supervisor = TriggerSupervisor::new(
            "u1",
            "dip-buyer",
            vec![spec(TriggerOp::Lt, dec!(30), dec!(0.05))],
            provider,
            callback,
            SupervisorConfig::default(),
        );

        supervisor.poll_once().await;
        supervisor.poll_once().await;

        // Fired once despite the failing callback, then cooled down
        assert_eq!(supervisor.stats().fires, 1);
        assert_eq!(supervisor.status()[0].state, "cooldown");
    }

    #[tokio::test]
    async fn test_unavailable_indicator_skips_evaluation() {
        let provider = ScriptedProvider::new(dec!(25));
        provider.set(Err(crate::error::TriggerError::IndicatorUnavailable(
            "feed gap".to_string(),
        )));
        let (callback, events) = recording_callback();
        let supervisor = TriggerSupervisor::new(
            "u1",
            "dip-buyer",
            vec![spec(TriggerOp::Lt, dec!(30), dec!(0.05))],
            provider.clone(),
            callback,
            SupervisorConfig::default(),
        );

        supervisor.poll_once().await;
        assert!(events.lock().is_empty());
        assert_eq!(supervisor.stats().evaluations, 0);

        // Feed recovers
        provider.set(Ok(dec!(25)));
        supervisor.poll_once().await;
        assert_eq!(events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_triggers_tracked_independently() {
        let provider = ScriptedProvider::new(dec!(75));
        let (callback, events) = recording_callback();
        let mut overbought = spec(TriggerOp::Gt, dec!(70), dec!(0.02));
        overbought.id = "rsi-overbought".to_string();
        let supervisor = TriggerSupervisor::new(
            "u1",
            "swing",
            vec![spec(TriggerOp::Lt, dec!(30), dec!(0.05)), overbought],
            provider,
            callback,
            SupervisorConfig::default(),
        );

        supervisor.poll_once().await;
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger_id, "rsi-overbought");

        let status = supervisor.status();
        assert_eq!(status[0].state, "watching");
        assert_eq!(status[1].state, "cooldown");
    }
}
