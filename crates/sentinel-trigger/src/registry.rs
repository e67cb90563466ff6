//! Supervisor registry keyed by (user, strategy).
//!
//! An explicit registry object owned by the process; no module-level
//! singletons. Creating a supervisor for a key that already has one
//! stops and discards the old one first, so a strategy's triggers are
//! replaced atomically.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::supervisor::TriggerSupervisor;

/// Registry of running supervisors.
#[derive(Default)]
pub struct SupervisorRegistry {
    supervisors: DashMap<(String, String), Arc<TriggerSupervisor>>,
}

impl SupervisorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a supervisor, stopping and discarding any
    /// existing one for the same (user, strategy).
    pub fn create(&self, supervisor: Arc<TriggerSupervisor>) -> Arc<TriggerSupervisor> {
        let key = (
            supervisor.user().to_string(),
            supervisor.strategy().to_string(),
        );
        if let Some((_, old)) = self.supervisors.remove(&key) {
            info!(user = %key.0, strategy = %key.1, "Replacing existing trigger supervisor");
            old.stop();
        }
        supervisor.start();
        self.supervisors.insert(key, supervisor.clone());
        supervisor
    }

    #[must_use]
    pub fn get(&self, user: &str, strategy: &str) -> Option<Arc<TriggerSupervisor>> {
        self.supervisors
            .get(&(user.to_string(), strategy.to_string()))
            .map(|entry| entry.clone())
    }

    /// Stop and remove one supervisor. Returns whether one existed.
    pub fn stop(&self, user: &str, strategy: &str) -> bool {
        match self
            .supervisors
            .remove(&(user.to_string(), strategy.to_string()))
        {
            Some((_, supervisor)) => {
                supervisor.stop();
                true
            }
            None => false,
        }
    }

    /// Stop and remove every supervisor.
    pub fn stop_all(&self) {
        self.supervisors.retain(|key, supervisor| {
            info!(user = %key.0, strategy = %key.1, "Stopping trigger supervisor");
            supervisor.stop();
            false
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::spec::{BoxFuture, IndicatorKind, IndicatorProvider, TriggerOp, TriggerSpec};
    use crate::supervisor::{SupervisorConfig, TriggerCallback};
    use crate::TriggerResult;

    struct FlatProvider;

    impl IndicatorProvider for FlatProvider {
        fn current_value(&self, _spec: &TriggerSpec) -> BoxFuture<'_, TriggerResult<Decimal>> {
            Box::pin(async { Ok(dec!(50)) })
        }
    }

    fn supervisor(user: &str, strategy: &str) -> Arc<TriggerSupervisor> {
        let callback: TriggerCallback = Arc::new(|_| Box::pin(async { Ok(()) }));
        TriggerSupervisor::new(
            user,
            strategy,
            vec![TriggerSpec {
                id: "t1".to_string(),
                symbol: "BTC".to_string(),
                indicator: IndicatorKind::Rsi,
                period: 14,
                operator: TriggerOp::Lt,
                value: dec!(30),
                hysteresis: dec!(0.05),
                cooldown_minutes: 15,
            }],
            Arc::new(FlatProvider),
            callback,
            SupervisorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_create_get_stop() {
        let registry = SupervisorRegistry::new();
        registry.create(supervisor("u1", "swing"));

        assert!(registry.get("u1", "swing").is_some());
        assert!(registry.get("u1", "other").is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.stop("u1", "swing"));
        assert!(!registry.stop("u1", "swing"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_replaces_existing_key() {
        let registry = SupervisorRegistry::new();
        let first = registry.create(supervisor("u1", "swing"));
        let second = registry.create(supervisor("u1", "swing"));

        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            &registry.get("u1", "swing").expect("registered"),
            &second
        ));
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let registry = SupervisorRegistry::new();
        registry.create(supervisor("u1", "swing"));
        registry.create(supervisor("u1", "scalp"));
        registry.create(supervisor("u2", "swing"));
        assert_eq!(registry.len(), 3);

        registry.stop_all();
        assert!(registry.is_empty());
    }
}
