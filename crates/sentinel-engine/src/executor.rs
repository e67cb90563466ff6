//! Batch execution of trading intents.
//!
//! Orchestrates one decision-layer batch end to end: safety guards,
//! validation, deduplication, entry/close/cancel execution, then
//! protective-bracket reconciliation per symbol. Within a batch all
//! non-protective exchange calls complete before any protective
//! processing starts, so a new position's bracket is reconciled against
//! state that already reflects the entry.
//!
//! Two guards are batch-fatal by design and run before any exchange
//! mutation:
//! - an entry that opens new exposure without exactly one same-batch
//!   stop-loss for its symbol
//! - an existing position with no resting stop-loss and none proposed
//!
//! Everything else resolves per-intent: one bad intent cannot abort the
//! rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sentinel_core::{
    AssetMetadata, BracketRequest, CancelRequest, ClientOrderId, ExecutionResult,
    ExecutionSummary, IntentAction, LeverageRequest, MarketContext, OpenOrder, OrderKind,
    OrderRequest, OrderSide, Position, PositionSide, RejectReason, SkipReason, SymbolContext,
    TradingIntent,
};
use sentinel_exchange::{DynExchangeClient, MetadataCache, OrderOutcome};

use crate::bracket::BracketManager;
use crate::dedup::Deduplicator;
use crate::validator::{IntentValidator, ValidatedIntent, Validation};

/// Executor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Validate and report without placing anything.
    #[serde(default)]
    pub observation_mode: bool,
    /// Use cross margin when updating leverage.
    #[serde(default)]
    pub cross_margin: bool,
}

/// Batch executor for decision-layer intents.
pub struct OrderExecutor {
    exchange: DynExchangeClient,
    metadata: Arc<MetadataCache>,
    validator: IntentValidator,
    bracket: Arc<BracketManager>,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(
        exchange: DynExchangeClient,
        metadata: Arc<MetadataCache>,
        validator: IntentValidator,
        bracket: Arc<BracketManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            exchange,
            metadata,
            validator,
            bracket,
            config,
        }
    }

    /// Execute a batch, building the market context from exchange data.
    pub async fn execute_batch(&self, user: &str, intents: Vec<TradingIntent>) -> ExecutionSummary {
        let ctx = match self.exchange.market_data().await {
            Ok(data) => {
                let mut ctx = MarketContext::new();
                for row in data {
                    ctx.insert(
                        row.symbol.clone(),
                        SymbolContext {
                            mark_price: row.price,
                            realized_vol_pct: None,
                            atr_pct: None,
                        },
                    );
                }
                ctx
            }
            // Fail closed: an empty context rejects everything priced
            Err(e) => {
                warn!(error = %e, "Market data fetch failed, validation will fail closed");
                MarketContext::new()
            }
        };
        self.execute_batch_with_context(user, intents, &ctx).await
    }

    /// Execute a batch against a caller-supplied market context
    /// (typically enriched with volatility data by analytics
    /// collaborators).
    pub async fn execute_batch_with_context(
        &self,
        user: &str,
        intents: Vec<TradingIntent>,
        ctx: &MarketContext,
    ) -> ExecutionSummary {
        let total = intents.len();
        info!(user, intents = total, "Executing intent batch");

        let mut results: Vec<Option<ExecutionResult>> = vec![None; total];

        // Ground truth for this batch, fetched fresh
        let positions = match self.exchange.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                return reject_all(
                    &intents,
                    RejectReason::ExchangeError {
                        detail: format!("failed to fetch positions: {e}"),
                    },
                )
            }
        };
        let open_orders = match self.exchange.open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                return reject_all(
                    &intents,
                    RejectReason::ExchangeError {
                        detail: format!("failed to fetch open orders: {e}"),
                    },
                )
            }
        };
        let position_by_symbol: HashMap<String, Position> = positions
            .into_iter()
            .filter(Position::is_open)
            .map(|p| (p.symbol.clone(), p))
            .collect();

        // Batch-fatal safety guards, before any exchange mutation
        if let Some(reason) = batch_guard(&intents, &position_by_symbol, &open_orders) {
            warn!(user, %reason, "Batch rejected by safety guard");
            return reject_all(&intents, reason);
        }

        // Partition: protective intents reconcile per symbol, after
        // everything else
        let mut protective_groups: HashMap<String, Vec<usize>> = HashMap::new();
        let mut non_protective: Vec<usize> = Vec::new();
        for (idx, intent) in intents.iter().enumerate() {
            if intent.action.is_protective() {
                protective_groups
                    .entry(intent.symbol.clone())
                    .or_default()
                    .push(idx);
            } else {
                non_protective.push(idx);
            }
        }

        // Pre-fetch metadata so rounding and dedup agree everywhere
        let mut metadata_by_symbol: HashMap<String, AssetMetadata> = HashMap::new();
        for intent in &intents {
            if metadata_by_symbol.contains_key(&intent.symbol) {
                continue;
            }
            match self
                .metadata
                .get_or_fetch(self.exchange.as_ref(), &intent.symbol)
                .await
            {
                Ok(metadata) => {
                    metadata_by_symbol.insert(intent.symbol.clone(), metadata);
                }
                Err(e) => {
                    debug!(symbol = %intent.symbol, error = %e, "Metadata fetch failed");
                }
            }
        }

        let mut dedup = Deduplicator::new();
        dedup.seed(&open_orders, |symbol| {
            metadata_by_symbol.get(symbol).cloned()
        });

        // Phase 1: non-protective intents, in batch order
        for idx in non_protective {
            let intent = &intents[idx];
            let group: Vec<usize> = protective_groups
                .get(&intent.symbol)
                .map(|indices| {
                    indices
                        .iter()
                        .copied()
                        .filter(|i| results[*i].is_none())
                        .collect()
                })
                .unwrap_or_default();

            let (result, consumed) = self
                .process_non_protective(
                    intent,
                    ctx,
                    &position_by_symbol,
                    &metadata_by_symbol,
                    &mut dedup,
                    &group,
                    &intents,
                )
                .await;

            results[idx] = Some(result);
            for (consumed_idx, consumed_result) in consumed {
                results[consumed_idx] = Some(consumed_result);
            }
        }

        // Phase 2: per-symbol protective reconciliation
        for (symbol, indices) in protective_groups {
            let pending: Vec<usize> = indices
                .into_iter()
                .filter(|idx| results[*idx].is_none())
                .collect();
            if pending.is_empty() {
                continue;
            }

            let metadata = match metadata_by_symbol.get(&symbol) {
                Some(metadata) => metadata.clone(),
                None => {
                    for idx in pending {
                        results[idx] = Some(ExecutionResult::rejected(
                            intents[idx].action,
                            symbol.clone(),
                            RejectReason::ExchangeError {
                                detail: format!("{symbol}: asset metadata unavailable"),
                            },
                        ));
                    }
                    continue;
                }
            };

            let mut candidates = Vec::new();
            let mut candidate_indices = Vec::new();
            for idx in pending {
                let position = position_by_symbol.get(&symbol);
                match self
                    .validator
                    .validate(&intents[idx], &metadata, ctx, position)
                {
                    Validation::Valid(validated) => {
                        candidates.push(*validated);
                        candidate_indices.push(idx);
                    }
                    Validation::Rejected(reason) => {
                        results[idx] = Some(ExecutionResult::rejected(
                            intents[idx].action,
                            symbol.clone(),
                            reason,
                        ));
                    }
                }
            }
            if candidates.is_empty() {
                continue;
            }

            if self.config.observation_mode {
                for idx in candidate_indices {
                    results[idx] = Some(ExecutionResult::skipped(
                        intents[idx].action,
                        symbol.clone(),
                        SkipReason::ObservationMode,
                    ));
                }
                continue;
            }

            let group_results = self
                .bracket
                .reconcile(user, &symbol, &metadata, candidates)
                .await;
            for (idx, result) in candidate_indices.into_iter().zip(group_results) {
                results[idx] = Some(result);
            }
        }

        // Housekeeping: drop protective state for closed positions
        let open_symbols: Vec<&str> = position_by_symbol.keys().map(String::as_str).collect();
        self.bracket.prune_closed(user, &open_symbols);

        let results: Vec<ExecutionResult> = results
            .into_iter()
            .enumerate()
            .map(|(idx, result)| {
                result.unwrap_or_else(|| {
                    ExecutionResult::rejected(
                        intents[idx].action,
                        intents[idx].symbol.clone(),
                        RejectReason::ExchangeError {
                            detail: "intent was not processed".to_string(),
                        },
                    )
                })
            })
            .collect();

        let summary = ExecutionSummary::from_results(results);
        info!(
            user,
            total = summary.total_actions,
            ok = summary.successful_executions,
            failed = summary.failed_executions,
            skipped = summary.skipped_actions,
            "Batch complete"
        );
        summary
    }

    /// Process one non-protective intent. Returns its result plus
    /// results for any protective intents it consumed (attached bracket
    /// legs, superseded stops).
    #[allow(clippy::too_many_arguments)]
    async fn process_non_protective(
        &self,
        intent: &TradingIntent,
        ctx: &MarketContext,
        positions: &HashMap<String, Position>,
        metadata_by_symbol: &HashMap<String, AssetMetadata>,
        dedup: &mut Deduplicator,
        group: &[usize],
        intents: &[TradingIntent],
    ) -> (ExecutionResult, Vec<(usize, ExecutionResult)>) {
        let symbol = intent.symbol.clone();

        if intent.action == IntentAction::Hold {
            return (
                ExecutionResult::skipped(intent.action, symbol, SkipReason::Hold),
                Vec::new(),
            );
        }

        // Fail closed when the symbol's constraints are unknown
        let metadata = match metadata_by_symbol.get(&symbol) {
            Some(metadata) => metadata,
            None => {
                return (
                    ExecutionResult::rejected(
                        intent.action,
                        symbol.clone(),
                        RejectReason::ExchangeError {
                            detail: format!("{symbol}: asset metadata unavailable"),
                        },
                    ),
                    Vec::new(),
                )
            }
        };

        let position = positions.get(&symbol);
        let validated = match self.validator.validate(intent, metadata, ctx, position) {
            Validation::Valid(validated) => *validated,
            Validation::Rejected(reason) => {
                return (
                    ExecutionResult::rejected(intent.action, symbol, reason),
                    Vec::new(),
                )
            }
        };

        match validated.action {
            IntentAction::CancelOrder => (self.execute_cancel(&validated).await, Vec::new()),
            IntentAction::Close => (
                self.execute_close(&validated, metadata, position).await,
                Vec::new(),
            ),
            IntentAction::Buy | IntentAction::Sell => {
                self.execute_entry(validated, metadata, ctx, position, dedup, group, intents)
                    .await
            }
            _ => (
                ExecutionResult::skipped(intent.action, symbol, SkipReason::Hold),
                Vec::new(),
            ),
        }
    }

    async fn execute_cancel(&self, validated: &ValidatedIntent) -> ExecutionResult {
        if self.config.observation_mode {
            return ExecutionResult::skipped(
                validated.action,
                validated.symbol.clone(),
                SkipReason::ObservationMode,
            );
        }

        let oid = validated.order_id.unwrap_or_default();
        match self
            .exchange
            .cancel_order(CancelRequest {
                symbol: validated.symbol.clone(),
                oid,
            })
            .await
        {
            Ok(()) => ExecutionResult::executed(
                validated.action,
                validated.symbol.clone(),
                format!("cancelled order {oid}"),
            ),
            Err(e) => ExecutionResult::rejected(
                validated.action,
                validated.symbol.clone(),
                RejectReason::ExchangeError {
                    detail: e.to_string(),
                },
            ),
        }
    }

    async fn execute_close(
        &self,
        validated: &ValidatedIntent,
        metadata: &AssetMetadata,
        position: Option<&Position>,
    ) -> ExecutionResult {
        if self.config.observation_mode {
            return ExecutionResult::skipped(
                validated.action,
                validated.symbol.clone(),
                SkipReason::ObservationMode,
            );
        }

        // Validation guarantees an open position here
        let side = match position.and_then(Position::side) {
            Some(PositionSide::Long) => OrderSide::Sell,
            Some(PositionSide::Short) => OrderSide::Buy,
            None => {
                return ExecutionResult::rejected(
                    validated.action,
                    validated.symbol.clone(),
                    RejectReason::InvalidInput {
                        field: "symbol".to_string(),
                        detail: "no open position to close".to_string(),
                    },
                )
            }
        };

        let request = OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: validated.symbol.clone(),
            side,
            price: metadata.round_price(validated.price),
            size: metadata.round_size(validated.size),
            reduce_only: true,
            kind: OrderKind::Market,
        };

        match self.exchange.place_order(request).await {
            Ok(OrderOutcome::Rejected { reason }) => ExecutionResult::rejected(
                validated.action,
                validated.symbol.clone(),
                RejectReason::ExchangeError { detail: reason },
            ),
            Ok(_) => ExecutionResult::executed(
                validated.action,
                validated.symbol.clone(),
                format!("closing {} of position", validated.size),
            ),
            Err(e) => ExecutionResult::rejected(
                validated.action,
                validated.symbol.clone(),
                RejectReason::ExchangeError {
                    detail: e.to_string(),
                },
            ),
        }
    }

    /// Place an entry with its stop-loss (and optionally a single
    /// take-profit) attached, so the entry never rests without its
    /// protection. Consumed protective intents get their results here;
    /// anything left is reconciled by the bracket manager in phase 2.
    #[allow(clippy::too_many_arguments)]
    async fn execute_entry(
        &self,
        validated: ValidatedIntent,
        metadata: &AssetMetadata,
        ctx: &MarketContext,
        position: Option<&Position>,
        dedup: &mut Deduplicator,
        group: &[usize],
        intents: &[TradingIntent],
    ) -> (ExecutionResult, Vec<(usize, ExecutionResult)>) {
        let symbol = validated.symbol.clone();
        let mut consumed = Vec::new();

        if dedup.is_duplicate(&validated, metadata) {
            // With no open position the resting duplicate already
            // carries its bracket; the group's protective intents are
            // duplicates too.
            if position.is_none() {
                for &idx in group {
                    consumed.push((
                        idx,
                        ExecutionResult::skipped(
                            intents[idx].action,
                            symbol.clone(),
                            SkipReason::DuplicateOrder {
                                symbol: symbol.clone(),
                            },
                        ),
                    ));
                }
            }
            return (
                ExecutionResult::skipped(
                    validated.action,
                    symbol.clone(),
                    SkipReason::DuplicateOrder { symbol },
                ),
                consumed,
            );
        }

        if self.config.observation_mode {
            return (
                ExecutionResult::skipped(validated.action, symbol, SkipReason::ObservationMode),
                consumed,
            );
        }

        let entry_side = match validated.action {
            IntentAction::Buy => PositionSide::Long,
            _ => PositionSide::Short,
        };

        // Validate the paired stop-loss before touching the exchange: a
        // stop that cannot validate is no stop, and the entry must not
        // be placed naked.
        let mut stop_candidates: Vec<(usize, ValidatedIntent)> = Vec::new();
        let mut tp_candidates: Vec<(usize, ValidatedIntent)> = Vec::new();
        for &idx in group {
            match self.validator.validate(&intents[idx], metadata, ctx, position) {
                Validation::Valid(v) => match v.action {
                    IntentAction::StopLoss => stop_candidates.push((idx, *v)),
                    IntentAction::TakeProfit => tp_candidates.push((idx, *v)),
                    _ => {}
                },
                Validation::Rejected(_) => {
                    // Phase 2 re-validates and reports the rejection
                }
            }
        }

        let opens = position.map_or(true, |p| p.side() == Some(entry_side));
        let attached_stop = match entry_side {
            PositionSide::Long => stop_candidates.iter().max_by_key(|(_, v)| v.price).cloned(),
            PositionSide::Short => stop_candidates.iter().min_by_key(|(_, v)| v.price).cloned(),
        };
        if opens && attached_stop.is_none() {
            return (
                ExecutionResult::rejected(
                    validated.action,
                    symbol.clone(),
                    RejectReason::MissingStopLoss { symbol },
                ),
                consumed,
            );
        }

        // Leverage is capped by validation; push it before the entry
        if let Err(e) = self
            .exchange
            .update_leverage(LeverageRequest {
                symbol: symbol.clone(),
                leverage: validated.leverage,
                is_cross: self.config.cross_margin,
            })
            .await
        {
            warn!(symbol = %symbol, error = %e, "Leverage update failed, continuing with current");
        }

        let order_side = match entry_side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        };
        let entry_price = metadata.round_price(validated.price);
        let entry_size = metadata.round_size(validated.size);

        let entry = OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: symbol.clone(),
            side: order_side,
            price: entry_price,
            size: entry_size,
            reduce_only: false,
            kind: OrderKind::Limit,
        };

        let stop_loss = attached_stop.as_ref().map(|(_, stop)| OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: symbol.clone(),
            side: order_side.opposite(),
            price: metadata.round_price(stop.price),
            size: entry_size,
            reduce_only: true,
            kind: OrderKind::StopMarket {
                trigger_price: metadata.round_price(stop.price),
            },
        });

        // A single take-profit travels with the entry; a multi-level
        // set is sized against the position by the bracket manager.
        let attached_tp = if tp_candidates.len() == 1 {
            tp_candidates.first().cloned()
        } else {
            None
        };
        let take_profit = attached_tp.as_ref().map(|(_, tp)| OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: symbol.clone(),
            side: order_side.opposite(),
            price: metadata.round_price(tp.price),
            size: entry_size,
            reduce_only: true,
            kind: OrderKind::TakeProfitMarket {
                trigger_price: metadata.round_price(tp.price),
            },
        });

        let request = BracketRequest {
            entry,
            stop_loss,
            take_profit,
        };

        let outcome = match self.exchange.place_bracket(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return (
                    ExecutionResult::rejected(
                        validated.action,
                        symbol,
                        RejectReason::ExchangeError {
                            detail: e.to_string(),
                        },
                    ),
                    consumed,
                )
            }
        };

        if let OrderOutcome::Rejected { reason } = &outcome.entry {
            return (
                ExecutionResult::rejected(
                    validated.action,
                    symbol,
                    RejectReason::ExchangeError {
                        detail: reason.clone(),
                    },
                ),
                consumed,
            );
        }

        // Entry accepted: settle the consumed protective intents
        if let Some((stop_idx, stop)) = &attached_stop {
            let leg_ok = outcome
                .stop_loss
                .as_ref()
                .is_some_and(OrderOutcome::is_accepted);
            if leg_ok {
                consumed.push((
                    *stop_idx,
                    ExecutionResult::executed(
                        IntentAction::StopLoss,
                        symbol.clone(),
                        format!("stop-loss attached to entry at {}", stop.price),
                    ),
                ));
                // Losing stop candidates are superseded
                for (idx, _) in &stop_candidates {
                    if idx != stop_idx {
                        consumed.push((
                            *idx,
                            ExecutionResult::skipped(
                                IntentAction::StopLoss,
                                symbol.clone(),
                                SkipReason::SupersededStop {
                                    symbol: symbol.clone(),
                                },
                            ),
                        ));
                    }
                }
            } else {
                // Leave the stop intent unconsumed so the bracket
                // manager retries it in phase 2
                warn!(symbol = %symbol, "Attached stop-loss leg was not accepted");
            }
        }
        if let Some((tp_idx, tp)) = &attached_tp {
            if outcome
                .take_profit
                .as_ref()
                .is_some_and(OrderOutcome::is_accepted)
            {
                consumed.push((
                    *tp_idx,
                    ExecutionResult::executed(
                        IntentAction::TakeProfit,
                        symbol.clone(),
                        format!("take-profit attached to entry at {}", tp.price),
                    ),
                ));
            }
        }

        (
            ExecutionResult::executed(
                validated.action,
                symbol,
                format!(
                    "entry placed at {entry_price} for {entry_size} ({}x)",
                    validated.leverage
                ),
            ),
            consumed,
        )
    }
}

/// Batch-fatal guard checks.
fn batch_guard(
    intents: &[TradingIntent],
    positions: &HashMap<String, Position>,
    open_orders: &[OpenOrder],
) -> Option<RejectReason> {
    // Every entry opening new exposure needs exactly one same-batch
    // stop-loss for its symbol
    for intent in intents {
        if !intent.action.is_entry() {
            continue;
        }
        let current_side = positions.get(&intent.symbol).and_then(Position::side);
        if !intent.opens_exposure(current_side) {
            continue;
        }
        let stop_count = intents
            .iter()
            .filter(|i| i.action == IntentAction::StopLoss && i.symbol == intent.symbol)
            .count();
        match stop_count {
            0 => {
                return Some(RejectReason::MissingStopLoss {
                    symbol: intent.symbol.clone(),
                })
            }
            1 => {}
            n => {
                return Some(RejectReason::InvalidInput {
                    field: "stop_loss".to_string(),
                    detail: format!(
                        "{}: exactly one stop-loss intent required for new exposure, got {n}",
                        intent.symbol
                    ),
                })
            }
        }
    }

    // Never proceed while a known position is unprotected
    for (symbol, _) in positions.iter() {
        let resting_stop = open_orders.iter().any(|o| {
            o.symbol == *symbol && o.reduce_only && matches!(o.kind, OrderKind::StopMarket { .. })
        });
        let proposed_stop = intents
            .iter()
            .any(|i| i.action == IntentAction::StopLoss && i.symbol == *symbol);
        if !resting_stop && !proposed_stop {
            return Some(RejectReason::UnprotectedPosition {
                symbol: symbol.clone(),
            });
        }
    }

    None
}

fn reject_all(intents: &[TradingIntent], reason: RejectReason) -> ExecutionSummary {
    let results = intents
        .iter()
        .map(|intent| {
            ExecutionResult::rejected(intent.action, intent.symbol.clone(), reason.clone())
        })
        .collect();
    ExecutionSummary::from_results(results)
}
