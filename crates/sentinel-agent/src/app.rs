//! Per-user engine wiring and the decision-layer boundary.
//!
//! The registry is an explicit object owned by the process, keyed by
//! user id. Each user gets an executor, an advanced-order engine
//! resumed from persisted state, and a trigger supervisor registry,
//! all sharing one exchange boundary and one metadata cache.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::info;

use sentinel_advanced::AdvancedOrderEngine;
use sentinel_core::{
    ExecutionSummary, MarketData, OpenOrder, OrderKind, Outcome, Position, RejectReason,
    SkipReason, TradingIntent,
};
use sentinel_engine::{
    BracketManager, ExecutorConfig, IntentValidator, OrderExecutor,
};
use sentinel_exchange::{BoxFuture, DynExchangeClient, MetadataCache};
use sentinel_persistence::JsonStore;
use sentinel_telemetry::Metrics;
use sentinel_trigger::SupervisorRegistry;

use crate::config::{AgentConfig, OperatingMode};
use crate::error::AppResult;

/// Snapshot handed to the decision layer each cycle.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub positions: Vec<Position>,
    pub open_orders: Vec<OpenOrder>,
    pub market_data: Vec<MarketData>,
}

/// The decision layer boundary.
///
/// An opaque intent source (ultimately an LLM); the engine validates
/// everything it returns before anything can touch the exchange.
pub trait IntentSource: Send + Sync {
    fn propose(&self, ctx: DecisionContext) -> BoxFuture<'_, Vec<TradingIntent>>;
}

/// One user's wired engines.
pub struct UserEngines {
    pub executor: Arc<OrderExecutor>,
    pub advanced: Arc<AdvancedOrderEngine>,
    pub triggers: Arc<SupervisorRegistry>,
}

/// Explicit per-user registry owned by the process.
pub struct EngineRegistry {
    config: AgentConfig,
    exchange: DynExchangeClient,
    metadata: Arc<MetadataCache>,
    engines: DashMap<String, Arc<UserEngines>>,
}

impl EngineRegistry {
    pub fn new(config: AgentConfig, exchange: DynExchangeClient) -> Self {
        Self {
            config,
            exchange,
            metadata: Arc::new(MetadataCache::new()),
            engines: DashMap::new(),
        }
    }

    /// Build and register engines for a user, replacing (and stopping)
    /// any existing ones. Persisted `active` advanced orders resume
    /// immediately.
    pub fn create(&self, user: &str) -> AppResult<Arc<UserEngines>> {
        let state_dir = Path::new(&self.config.state_dir).join(user);
        let protective_store = Arc::new(JsonStore::open(&state_dir, "protective_states")?);
        let advanced_store = Arc::new(JsonStore::open(&state_dir, "advanced_orders")?);

        let bracket = Arc::new(BracketManager::new(
            self.exchange.clone(),
            protective_store,
            self.config.bracket.clone(),
        ));
        let executor = Arc::new(OrderExecutor::new(
            self.exchange.clone(),
            self.metadata.clone(),
            IntentValidator::new(self.config.validator.clone()),
            bracket,
            ExecutorConfig {
                observation_mode: self.config.mode == OperatingMode::Observation,
                cross_margin: self.config.cross_margin,
            },
        ));
        let advanced = AdvancedOrderEngine::new(
            self.exchange.clone(),
            self.metadata.clone(),
            advanced_store,
        );
        let resumed = advanced.start();

        let engines = Arc::new(UserEngines {
            executor,
            advanced,
            triggers: Arc::new(SupervisorRegistry::new()),
        });
        if let Some(old) = self.engines.insert(user.to_string(), engines.clone()) {
            old.advanced.stop();
            old.triggers.stop_all();
        }
        info!(user, resumed_advanced_orders = resumed, "Engines created");
        Ok(engines)
    }

    #[must_use]
    pub fn get(&self, user: &str) -> Option<Arc<UserEngines>> {
        self.engines.get(user).map(|entry| entry.clone())
    }

    /// Stop one user's schedulers and drop the engines. Persisted state
    /// is untouched; resting exchange orders remain until explicitly
    /// cancelled.
    pub fn stop(&self, user: &str) -> bool {
        match self.engines.remove(user) {
            Some((_, engines)) => {
                engines.advanced.stop();
                engines.triggers.stop_all();
                info!(user, "Engines stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every user's schedulers.
    pub fn stop_all(&self) {
        self.engines.retain(|user, engines| {
            engines.advanced.stop();
            engines.triggers.stop_all();
            info!(user, "Engines stopped");
            false
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Run one decision cycle for a user: refresh exchange snapshots,
    /// ask the decision layer for intents, execute the batch.
    pub async fn run_cycle(
        &self,
        user: &str,
        source: &dyn IntentSource,
    ) -> AppResult<ExecutionSummary> {
        let engines = match self.get(user) {
            Some(engines) => engines,
            None => self.create(user)?,
        };
        let started = Instant::now();

        // Fresh snapshots for the decision layer; the executor
        // re-fetches its own ground truth per batch
        let ctx = DecisionContext {
            positions: self.exchange.positions().await?,
            open_orders: self.exchange.open_orders().await?,
            market_data: self.exchange.market_data().await?,
        };
        let protected = ctx
            .positions
            .iter()
            .filter(|p| {
                ctx.open_orders.iter().any(|o| {
                    o.symbol == p.symbol
                        && o.reduce_only
                        && matches!(o.kind, OrderKind::StopMarket { .. })
                })
            })
            .count();
        Metrics::protected_positions(protected as i64);
        let intents = source.propose(ctx).await;
        if intents.is_empty() {
            return Ok(ExecutionSummary::default());
        }

        let summary = engines.executor.execute_batch(user, intents).await;
        record_summary(&summary);
        Metrics::batch_duration(user, started.elapsed().as_secs_f64() * 1000.0);
        info!(
            user,
            total = summary.total_actions,
            ok = summary.successful_executions,
            failed = summary.failed_executions,
            skipped = summary.skipped_actions,
            "Cycle complete"
        );
        Ok(summary)
    }
}

fn record_summary(summary: &ExecutionSummary) {
    for result in &summary.results {
        let action = result.action.to_string();
        match &result.outcome {
            Outcome::Executed => Metrics::execution(&action, "executed"),
            Outcome::Skipped(reason) => {
                Metrics::execution(&action, "skipped");
                if let SkipReason::DuplicateOrder { symbol } = reason {
                    Metrics::dedup_skip(symbol);
                }
            }
            Outcome::Rejected(reason) => {
                Metrics::execution(&action, "rejected");
                Metrics::rejection(reject_label(reason));
            }
        }
    }
}

fn reject_label(reason: &RejectReason) -> &'static str {
    match reason {
        RejectReason::InvalidInput { .. } => "invalid_input",
        RejectReason::BelowMinimumNotional { .. } => "below_minimum_notional",
        RejectReason::WrongDirection { .. } => "wrong_direction",
        RejectReason::PriceUnreasonable { .. } => "price_unreasonable",
        RejectReason::MissingStopLoss { .. } => "missing_stop_loss",
        RejectReason::UnprotectedPosition { .. } => "unprotected_position",
        RejectReason::CancellationFailed { .. } => "cancellation_failed",
        RejectReason::ExchangeError { .. } => "exchange_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use sentinel_core::{AssetMetadata, IntentAction, PositionSide, Price};
    use sentinel_exchange::MockExchange;

    struct ScriptedSource {
        intents: Mutex<Vec<TradingIntent>>,
    }

    impl ScriptedSource {
        fn new(intents: Vec<TradingIntent>) -> Self {
            Self {
                intents: Mutex::new(intents),
            }
        }
    }

    impl IntentSource for ScriptedSource {
        fn propose(&self, _ctx: DecisionContext) -> BoxFuture<'_, Vec<TradingIntent>> {
            let intents = self.intents.lock().clone();
            Box::pin(async move { intents })
        }
    }

    fn intent(action: IntentAction, price_field: Option<&str>, trigger: Option<&str>) -> TradingIntent {
        TradingIntent {
            action,
            symbol: "BTC".to_string(),
            side: Some(PositionSide::Long),
            size: Some("0.1".to_string()),
            leverage: Some(5),
            entry_price: price_field.map(str::to_string),
            trigger_price: trigger.map(str::to_string),
            order_id: None,
            reasoning: None,
        }
    }

    fn setup(mode: OperatingMode) -> (Arc<MockExchange>, EngineRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(MockExchange::new());
        exchange.set_metadata(AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(dec!(0.5)),
            sz_decimals: 3,
            max_leverage: 20,
        });
        exchange.set_market_data(vec![MarketData {
            symbol: "BTC".to_string(),
            price: Price::new(dec!(60000)),
            received_at: chrono::Utc::now(),
        }]);

        let config = AgentConfig {
            mode,
            state_dir: dir.path().to_string_lossy().into_owned(),
            ..AgentConfig::default()
        };
        let registry = EngineRegistry::new(config, exchange.clone() as DynExchangeClient);
        (exchange, registry, dir)
    }

    #[tokio::test]
    async fn test_cycle_executes_bracketed_batch() {
        let (exchange, registry, _dir) = setup(OperatingMode::Trading);
        let source = ScriptedSource::new(vec![
            intent(IntentAction::Buy, Some("60000"), None),
            intent(IntentAction::StopLoss, None, Some("58000")),
            intent(IntentAction::TakeProfit, None, Some("63000")),
        ]);

        let summary = registry.run_cycle("u1", &source).await.unwrap();
        assert_eq!(summary.total_actions, 3);
        assert_eq!(summary.failed_executions, 0);
        assert_eq!(exchange.placed_brackets().len(), 1);
    }

    #[tokio::test]
    async fn test_observation_mode_places_nothing() {
        let (exchange, registry, _dir) = setup(OperatingMode::Observation);
        let source = ScriptedSource::new(vec![
            intent(IntentAction::Buy, Some("60000"), None),
            intent(IntentAction::StopLoss, None, Some("58000")),
        ]);

        let summary = registry.run_cycle("u1", &source).await.unwrap();
        assert_eq!(summary.skipped_actions, 2);
        assert!(exchange.placed().is_empty());
        assert!(exchange.placed_brackets().is_empty());
    }

    #[tokio::test]
    async fn test_empty_proposal_is_a_quiet_cycle() {
        let (exchange, registry, _dir) = setup(OperatingMode::Trading);
        let source = ScriptedSource::new(Vec::new());

        let summary = registry.run_cycle("u1", &source).await.unwrap();
        assert_eq!(summary.total_actions, 0);
        assert!(exchange.placed().is_empty());
    }

    #[tokio::test]
    async fn test_registry_create_get_stop() {
        let (_exchange, registry, _dir) = setup(OperatingMode::Trading);
        registry.create("u1").unwrap();
        registry.create("u2").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("u1").is_some());

        assert!(registry.stop("u1"));
        assert!(!registry.stop("u1"));
        assert!(registry.get("u1").is_none());

        registry.stop_all();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_replaces_existing_user_engines() {
        let (_exchange, registry, _dir) = setup(OperatingMode::Trading);
        let first = registry.create("u1").unwrap();
        let second = registry.create("u1").unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
