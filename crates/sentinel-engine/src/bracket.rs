//! Protective-bracket reconciliation.
//!
//! For each symbol with an open position, the manager makes the resting
//! reduce-only orders match policy: exactly one stop-loss, zero or more
//! take-profits whose sizes sum to the position size, with the stop
//! never closer to the liquidation price than the safety buffer.
//! Replacement only happens when the proposed set differs from what is
//! already resting beyond tolerance; a matching set is an idempotent
//! no-op so the bracket does not churn every monitoring cycle.
//!
//! Two concurrent reconciliations for the same symbol would both read
//! "no existing bracket" and each place one, so reconciliation holds a
//! per-symbol async mutex across its exchange calls.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sentinel_core::{
    AssetMetadata, ClientOrderId, ExecutionResult, IntentAction, OpenOrder, OrderKind,
    OrderRequest, OrderSide, Position, PositionSide, Price, RejectReason, Size, SkipReason,
};
use sentinel_exchange::{DynExchangeClient, OrderOutcome};
use sentinel_persistence::JsonStore;
use sentinel_telemetry::Metrics;

use crate::validator::ValidatedIntent;

/// Bracket manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketConfig {
    /// Relative price tolerance for anti-churn comparison, in percent.
    #[serde(default = "default_price_tolerance_pct")]
    pub price_tolerance_pct: Decimal,
    /// Tick-multiple floor for the price tolerance.
    #[serde(default = "default_price_tolerance_ticks")]
    pub price_tolerance_ticks: u32,
    /// Minimum stop distance from the liquidation price, in percent of
    /// the liquidation price.
    #[serde(default = "default_liquidation_buffer_pct")]
    pub liquidation_buffer_pct: Decimal,
}

fn default_price_tolerance_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05%
}

fn default_price_tolerance_ticks() -> u32 {
    2
}

fn default_liquidation_buffer_pct() -> Decimal {
    Decimal::new(15, 1) // 1.5%
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            price_tolerance_pct: default_price_tolerance_pct(),
            price_tolerance_ticks: default_price_tolerance_ticks(),
            liquidation_buffer_pct: default_liquidation_buffer_pct(),
        }
    }
}

/// Whether the stop still sits at its initial level or has trailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopLossState {
    Initial,
    Trailing,
}

/// Persisted protective-order state, keyed by `user:symbol`.
///
/// Mutated only by the bracket manager, or by a human (which sets
/// `manual_override` and freezes further automated mutation). Removed
/// when the position fully closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveOrderState {
    pub symbol: String,
    pub initial_stop_loss: Price,
    pub current_stop_loss: Price,
    pub current_take_profit: Option<Price>,
    pub stop_loss_state: StopLossState,
    #[serde(default)]
    pub manual_override: bool,
    pub last_adjusted_at: DateTime<Utc>,
}

/// One leg of the proposed protective set.
#[derive(Debug, Clone)]
struct ProposedOrder {
    is_stop: bool,
    trigger: Price,
    size: Size,
    /// Index into the candidate list; `None` for a carried-over stop
    /// that has no originating intent.
    source: Option<usize>,
}

/// Per-symbol protective-order reconciler.
pub struct BracketManager {
    exchange: DynExchangeClient,
    store: Arc<JsonStore<ProtectiveOrderState>>,
    config: BracketConfig,
    symbol_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BracketManager {
    pub fn new(
        exchange: DynExchangeClient,
        store: Arc<JsonStore<ProtectiveOrderState>>,
        config: BracketConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            config,
            symbol_locks: DashMap::new(),
        }
    }

    fn state_key(user: &str, symbol: &str) -> String {
        format!("{user}:{symbol}")
    }

    /// Persisted state for a symbol, if any.
    #[must_use]
    pub fn state(&self, user: &str, symbol: &str) -> Option<ProtectiveOrderState> {
        self.store.get(&Self::state_key(user, symbol))
    }

    /// Snapshot of all persisted protective states for a user, keyed by
    /// symbol. Refreshed by reconciliation collaborators once per cycle.
    #[must_use]
    pub fn states(&self, user: &str) -> HashMap<String, ProtectiveOrderState> {
        let prefix = format!("{user}:");
        self.store
            .load_all()
            .into_iter()
            .filter_map(|(key, state)| {
                key.strip_prefix(&prefix)
                    .map(|symbol| (symbol.to_string(), state))
            })
            .collect()
    }

    /// Mark a symbol's bracket as manually overridden.
    ///
    /// Automation must never fight a human safety override; every
    /// subsequent reconciliation skips the symbol until the flag is
    /// cleared.
    pub fn set_manual_override(&self, user: &str, symbol: &str, active: bool) {
        let key = Self::state_key(user, symbol);
        if let Some(mut state) = self.store.get(&key) {
            state.manual_override = active;
            if let Err(e) = self.store.save(key, state) {
                warn!(symbol, error = %e, "Failed to persist manual override flag");
            }
        }
    }

    /// Drop persisted state for symbols whose position has closed.
    pub fn prune_closed(&self, user: &str, open_symbols: &[&str]) {
        let prefix = format!("{user}:");
        for (key, state) in self.store.load_all() {
            if key.starts_with(&prefix) && !open_symbols.contains(&state.symbol.as_str()) {
                debug!(symbol = %state.symbol, "Pruning protective state for closed position");
                if let Err(e) = self.store.delete(&key) {
                    warn!(symbol = %state.symbol, error = %e, "Failed to prune protective state");
                }
            }
        }
    }

    /// Reconcile one symbol's protective orders against the proposed
    /// candidates, returning one result per candidate.
    ///
    /// Position and open orders are re-fetched inside the per-symbol
    /// lock; a prior cycle's view is allowed to be stale and is never
    /// trusted here.
    pub async fn reconcile(
        &self,
        user: &str,
        symbol: &str,
        metadata: &AssetMetadata,
        candidates: Vec<ValidatedIntent>,
    ) -> Vec<ExecutionResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let lock = {
            let entry = self.symbol_locks.entry(symbol.to_string()).or_default();
            entry.clone()
        };
        let _guard = lock.lock().await;

        // Manual-override gate before anything else
        let key = Self::state_key(user, symbol);
        let prior = self.store.get(&key);
        if prior.as_ref().is_some_and(|s| s.manual_override) {
            info!(symbol, "Manual override active, skipping bracket reconciliation");
            Metrics::bracket_decision(symbol, "manual_override");
            return candidates
                .iter()
                .map(|c| {
                    ExecutionResult::skipped(
                        c.action,
                        symbol,
                        SkipReason::ManualOverrideActive {
                            symbol: symbol.to_string(),
                        },
                    )
                })
                .collect();
        }

        // Fresh position; never reconcile against a cached one
        let position = match self.fetch_position(symbol).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                return candidates
                    .iter()
                    .map(|c| {
                        ExecutionResult::rejected(
                            c.action,
                            symbol,
                            RejectReason::InvalidInput {
                                field: "symbol".to_string(),
                                detail: format!("{symbol}: no open position for protective order"),
                            },
                        )
                    })
                    .collect()
            }
            Err(detail) => {
                return candidates
                    .iter()
                    .map(|c| {
                        ExecutionResult::rejected(
                            c.action,
                            symbol,
                            RejectReason::ExchangeError {
                                detail: detail.clone(),
                            },
                        )
                    })
                    .collect()
            }
        };

        let mut results: Vec<Option<ExecutionResult>> = vec![None; candidates.len()];
        let side = match position.side() {
            Some(side) => side,
            None => return Vec::new(), // unreachable: fetch_position filters flat rows
        };

        let (stop_candidates, tp_candidates) =
            self.partition_candidates(symbol, &candidates, &position, side, &mut results);

        let selected_stop = self.select_stop(
            symbol,
            side,
            &position,
            prior.as_ref(),
            stop_candidates,
            &mut results,
        );

        let mut proposed = Vec::new();
        let position_size = metadata.round_size(position.abs_size());

        if let Some((trigger, source)) = selected_stop {
            let trigger =
                self.clamp_to_liquidation_buffer(trigger, side, &position, metadata, symbol);
            proposed.push(ProposedOrder {
                is_stop: true,
                trigger: metadata.round_price(trigger),
                size: position_size,
                source,
            });
        }

        self.split_take_profits(metadata, position_size, &tp_candidates, &mut proposed);

        // Existing reduce-only orders, fetched fresh for this symbol
        let existing = match self.fetch_protective_orders(symbol).await {
            Ok(orders) => orders,
            Err(detail) => {
                fill_unresolved(&candidates, &mut results, |c| {
                    ExecutionResult::rejected(
                        c.action,
                        symbol,
                        RejectReason::ExchangeError {
                            detail: detail.clone(),
                        },
                    )
                });
                return collect(results);
            }
        };

        // Anti-churn: skip replacement entirely when the resting set
        // already matches within tolerance.
        if self.matches_existing(&proposed, &existing, metadata) {
            debug!(symbol, "Resting bracket matches proposal, skipping replacement");
            Metrics::bracket_decision(symbol, "unchanged");
            fill_unresolved(&candidates, &mut results, |c| {
                ExecutionResult::skipped(
                    c.action,
                    symbol,
                    SkipReason::BracketUnchanged {
                        symbol: symbol.to_string(),
                    },
                )
            });
            return collect(results);
        }

        // Cancel all existing protective orders first. Any failure
        // aborts the whole replacement: placing new orders over a
        // partially-cancelled state could double the bracket.
        for order in &existing {
            if let Err(e) = self
                .exchange
                .cancel_order(sentinel_core::CancelRequest {
                    symbol: symbol.to_string(),
                    oid: order.oid,
                })
                .await
            {
                warn!(symbol, oid = order.oid, error = %e, "Protective cancel failed, aborting replacement");
                fill_unresolved(&candidates, &mut results, |c| {
                    ExecutionResult::rejected(
                        c.action,
                        symbol,
                        RejectReason::CancellationFailed {
                            symbol: symbol.to_string(),
                            oid: order.oid,
                        },
                    )
                });
                return collect(results);
            }
        }

        let placed = self
            .place_proposed(symbol, side, metadata, &proposed, &candidates, &mut results)
            .await;

        if placed {
            Metrics::bracket_decision(symbol, "replaced");
            self.persist_state(&key, symbol, side, prior, &proposed, &position);
        }

        // Every candidate gets exactly one result
        fill_unresolved(&candidates, &mut results, |c| {
            ExecutionResult::skipped(
                c.action,
                symbol,
                SkipReason::BracketUnchanged {
                    symbol: symbol.to_string(),
                },
            )
        });
        collect(results)
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<Position>, String> {
        self.exchange
            .positions()
            .await
            .map(|positions| {
                positions
                    .into_iter()
                    .find(|p| p.symbol == symbol && p.is_open())
            })
            .map_err(|e| format!("failed to fetch positions: {e}"))
    }

    async fn fetch_protective_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, String> {
        self.exchange
            .open_orders()
            .await
            .map(|orders| {
                orders
                    .into_iter()
                    .filter(|o| o.symbol == symbol && o.reduce_only)
                    .collect()
            })
            .map_err(|e| format!("failed to fetch open orders: {e}"))
    }

    /// Split candidates into stop and take-profit groups, rejecting any
    /// that sit on the wrong side of the fresh mark price.
    fn partition_candidates(
        &self,
        symbol: &str,
        candidates: &[ValidatedIntent],
        position: &Position,
        side: PositionSide,
        results: &mut [Option<ExecutionResult>],
    ) -> (Vec<(usize, Price)>, Vec<(usize, Price, Size)>) {
        let mark = position.mark_price;
        let mut stops = Vec::new();
        let mut tps = Vec::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            match candidate.action {
                IntentAction::StopLoss => {
                    let wrong = match side {
                        PositionSide::Long => candidate.price >= mark,
                        PositionSide::Short => candidate.price <= mark,
                    };
                    if wrong {
                        results[idx] = Some(ExecutionResult::rejected(
                            candidate.action,
                            symbol,
                            RejectReason::WrongDirection {
                                detail: format!(
                                    "stop at {} is on the wrong side of mark {mark} for a {side} position",
                                    candidate.price
                                ),
                            },
                        ));
                    } else {
                        stops.push((idx, candidate.price));
                    }
                }
                IntentAction::TakeProfit => {
                    let wrong = match side {
                        PositionSide::Long => candidate.price <= mark,
                        PositionSide::Short => candidate.price >= mark,
                    };
                    if wrong {
                        results[idx] = Some(ExecutionResult::rejected(
                            candidate.action,
                            symbol,
                            RejectReason::WrongDirection {
                                detail: format!(
                                    "take-profit at {} is on the wrong side of mark {mark} for a {side} position",
                                    candidate.price
                                ),
                            },
                        ));
                    } else {
                        tps.push((idx, candidate.price, candidate.size));
                    }
                }
                _ => {
                    results[idx] = Some(ExecutionResult::rejected(
                        candidate.action,
                        symbol,
                        RejectReason::InvalidInput {
                            field: "action".to_string(),
                            detail: "not a protective order".to_string(),
                        },
                    ));
                }
            }
        }

        (stops, tps)
    }

    /// Select the single stop-loss to rest: the most conservative valid
    /// candidate, gated so it only trails in the profit-protecting
    /// direction and only while the position is profitable.
    ///
    /// Returns the trigger plus the winning candidate index (`None`
    /// when the level is carried from persisted state instead).
    fn select_stop(
        &self,
        symbol: &str,
        side: PositionSide,
        position: &Position,
        prior: Option<&ProtectiveOrderState>,
        stop_candidates: Vec<(usize, Price)>,
        results: &mut [Option<ExecutionResult>],
    ) -> Option<(Price, Option<usize>)> {
        // Most conservative: highest stop for longs, lowest for shorts
        let winner = match side {
            PositionSide::Long => stop_candidates.iter().max_by_key(|(_, p)| *p).copied(),
            PositionSide::Short => stop_candidates.iter().min_by_key(|(_, p)| *p).copied(),
        };

        if let Some((winner_idx, _)) = winner {
            for (idx, _) in &stop_candidates {
                if *idx != winner_idx {
                    results[*idx] = Some(ExecutionResult::skipped(
                        IntentAction::StopLoss,
                        symbol,
                        SkipReason::SupersededStop {
                            symbol: symbol.to_string(),
                        },
                    ));
                }
            }
        }

        match (winner, prior) {
            (Some((idx, proposed)), Some(state)) => {
                if !position.is_profitable() {
                    // Non-profitable positions keep their stop untouched
                    if proposed != state.current_stop_loss {
                        debug!(
                            symbol,
                            proposed = %proposed,
                            kept = %state.current_stop_loss,
                            "Position not in profit, keeping existing stop"
                        );
                    }
                    Some((state.current_stop_loss, Some(idx)))
                } else {
                    // Only ever tighten toward profit
                    let tightened = match side {
                        PositionSide::Long => proposed.max(state.current_stop_loss),
                        PositionSide::Short => proposed.min(state.current_stop_loss),
                    };
                    Some((tightened, Some(idx)))
                }
            }
            (Some((idx, proposed)), None) => Some((proposed, Some(idx))),
            // No candidate: carry the persisted level so a cancel-all
            // replacement can never leave the position without a stop
            (None, Some(state)) => Some((state.current_stop_loss, None)),
            (None, None) => None,
        }
    }

    /// Auto-correct a stop that sits closer to the liquidation price
    /// than the safety buffer. A stop that cannot fire before
    /// liquidation is worse than a slightly looser one.
    fn clamp_to_liquidation_buffer(
        &self,
        trigger: Price,
        side: PositionSide,
        position: &Position,
        metadata: &AssetMetadata,
        symbol: &str,
    ) -> Price {
        let liq = match position.liquidation_price.filter(Price::is_positive) {
            Some(liq) => liq,
            None => return trigger,
        };
        let buffer = liq.inner() * self.config.liquidation_buffer_pct / Decimal::from(100);

        let corrected = match side {
            PositionSide::Long => {
                let floor = Price::new(liq.inner() + buffer);
                if trigger < floor {
                    Some(floor)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                let ceiling = Price::new(liq.inner() - buffer);
                if trigger > ceiling {
                    Some(ceiling)
                } else {
                    None
                }
            }
        };

        match corrected {
            Some(corrected) => {
                let corrected = metadata.round_price(corrected);
                warn!(
                    symbol,
                    original = %trigger,
                    corrected = %corrected,
                    liquidation = %liq,
                    "Stop too close to liquidation, auto-correcting to buffer boundary"
                );
                corrected
            }
            None => trigger,
        }
    }

    /// Split the position size across take-profit candidates in
    /// proportion to their requested sizes. Every slice is rounded to
    /// the asset's size precision before any comparison; the last slice
    /// absorbs the rounding residue so the total is exact.
    fn split_take_profits(
        &self,
        metadata: &AssetMetadata,
        position_size: Size,
        tp_candidates: &[(usize, Price, Size)],
        proposed: &mut Vec<ProposedOrder>,
    ) {
        if tp_candidates.is_empty() {
            return;
        }

        let total_weight: Decimal = tp_candidates.iter().map(|(_, _, s)| s.inner()).sum();
        if total_weight.is_zero() {
            return;
        }

        let mut allocated = Size::ZERO;
        for (i, (idx, trigger, weight)) in tp_candidates.iter().enumerate() {
            let size = if i + 1 == tp_candidates.len() {
                // Residue can dip below zero when earlier slices rounded up
                Size::new((position_size - allocated).inner().max(Decimal::ZERO))
            } else {
                let share = position_size.inner() * weight.inner() / total_weight;
                metadata.round_size(Size::new(share))
            };
            allocated = allocated + size;
            proposed.push(ProposedOrder {
                is_stop: false,
                trigger: metadata.round_price(*trigger),
                size,
                source: Some(*idx),
            });
        }
    }

    /// True when every proposed leg matches a distinct resting order
    /// within tolerance and the counts agree.
    fn matches_existing(
        &self,
        proposed: &[ProposedOrder],
        existing: &[OpenOrder],
        metadata: &AssetMetadata,
    ) -> bool {
        let proposed: Vec<&ProposedOrder> =
            proposed.iter().filter(|p| p.size.is_positive()).collect();
        if proposed.len() != existing.len() {
            return false;
        }

        let size_step = metadata.size_step();
        let mut unmatched: Vec<&OpenOrder> = existing.iter().collect();

        for leg in proposed {
            let tolerance = self.price_tolerance(leg.trigger, metadata);
            let matched = unmatched.iter().position(|order| {
                let order_is_stop = matches!(order.kind, OrderKind::StopMarket { .. });
                let order_trigger = order.kind.trigger_price().unwrap_or(order.price);
                order_is_stop == leg.is_stop
                    && order_trigger.distance(leg.trigger) <= tolerance
                    && (order.size.inner() - leg.size.inner()).abs() <= size_step.inner()
            });
            match matched {
                Some(i) => {
                    unmatched.swap_remove(i);
                }
                None => return false,
            }
        }

        true
    }

    /// Tolerance = max(relative tolerance, a few ticks).
    fn price_tolerance(&self, around: Price, metadata: &AssetMetadata) -> Decimal {
        let relative = around.inner() * self.config.price_tolerance_pct / Decimal::from(100);
        let ticks =
            metadata.tick_size.inner() * Decimal::from(self.config.price_tolerance_ticks);
        relative.max(ticks)
    }

    /// Place the proposed set, mapping each leg's outcome back onto its
    /// originating candidate. Returns true when at least one leg rests.
    async fn place_proposed(
        &self,
        symbol: &str,
        side: PositionSide,
        metadata: &AssetMetadata,
        proposed: &[ProposedOrder],
        candidates: &[ValidatedIntent],
        results: &mut [Option<ExecutionResult>],
    ) -> bool {
        // Protective orders reduce the position: opposite side
        let order_side = match side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };

        let mut any_placed = false;
        for leg in proposed {
            if leg.size.is_zero() {
                if let Some(idx) = leg.source {
                    results[idx] = Some(ExecutionResult::executed(
                        candidates[idx].action,
                        symbol,
                        "size rounded to zero, absorbed into final take-profit slice",
                    ));
                }
                continue;
            }

            let kind = if leg.is_stop {
                OrderKind::StopMarket {
                    trigger_price: leg.trigger,
                }
            } else {
                OrderKind::TakeProfitMarket {
                    trigger_price: leg.trigger,
                }
            };
            let request = OrderRequest {
                cloid: ClientOrderId::new(),
                symbol: symbol.to_string(),
                side: order_side,
                price: leg.trigger,
                size: leg.size,
                reduce_only: true,
                kind,
            };

            let outcome = self.exchange.place_order(request).await;
            let result = match outcome {
                Ok(OrderOutcome::Rejected { reason }) => {
                    warn!(symbol, %reason, "Protective order rejected by exchange");
                    Err(reason)
                }
                Ok(_) => {
                    any_placed = true;
                    Ok(())
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Protective order placement failed");
                    Err(e.to_string())
                }
            };

            if let Some(idx) = leg.source {
                results[idx] = Some(match &result {
                    Ok(()) => ExecutionResult::executed(
                        candidates[idx].action,
                        symbol,
                        format!(
                            "{} placed at {} for {}",
                            if leg.is_stop { "stop-loss" } else { "take-profit" },
                            leg.trigger,
                            leg.size
                        ),
                    ),
                    Err(detail) => ExecutionResult::rejected(
                        candidates[idx].action,
                        symbol,
                        RejectReason::ExchangeError {
                            detail: detail.clone(),
                        },
                    ),
                });
            }
        }

        any_placed
    }

    /// Persist the post-replacement state, promoting the stop to
    /// trailing when it tightened past the prior level in profit.
    fn persist_state(
        &self,
        key: &str,
        symbol: &str,
        side: PositionSide,
        prior: Option<ProtectiveOrderState>,
        proposed: &[ProposedOrder],
        position: &Position,
    ) {
        let stop = proposed.iter().find(|p| p.is_stop).map(|p| p.trigger);
        let take_profit = proposed.iter().find(|p| !p.is_stop).map(|p| p.trigger);

        let stop = match stop {
            Some(stop) => stop,
            None => return, // nothing to track without a stop
        };

        let state = match prior {
            Some(prior_state) => {
                let tightened = match side {
                    PositionSide::Long => stop > prior_state.current_stop_loss,
                    PositionSide::Short => stop < prior_state.current_stop_loss,
                };
                let stop_loss_state = if tightened && position.is_profitable() {
                    StopLossState::Trailing
                } else {
                    prior_state.stop_loss_state
                };
                ProtectiveOrderState {
                    symbol: symbol.to_string(),
                    initial_stop_loss: prior_state.initial_stop_loss,
                    current_stop_loss: stop,
                    current_take_profit: take_profit.or(prior_state.current_take_profit),
                    stop_loss_state,
                    manual_override: false,
                    last_adjusted_at: Utc::now(),
                }
            }
            None => ProtectiveOrderState {
                symbol: symbol.to_string(),
                initial_stop_loss: stop,
                current_stop_loss: stop,
                current_take_profit: take_profit,
                stop_loss_state: StopLossState::Initial,
                manual_override: false,
                last_adjusted_at: Utc::now(),
            },
        };

        if let Err(e) = self.store.save(key.to_string(), state) {
            warn!(symbol, error = %e, "Failed to persist protective state");
        }
    }
}

fn fill_unresolved(
    candidates: &[ValidatedIntent],
    results: &mut [Option<ExecutionResult>],
    make: impl Fn(&ValidatedIntent) -> ExecutionResult,
) {
    for (idx, candidate) in candidates.iter().enumerate() {
        if results[idx].is_none() {
            results[idx] = Some(make(candidate));
        }
    }
}

fn collect(results: Vec<Option<ExecutionResult>>) -> Vec<ExecutionResult> {
    results.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::Outcome;
    use sentinel_exchange::MockExchange;

    fn metadata() -> AssetMetadata {
        AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(dec!(0.5)),
            sz_decimals: 3,
            max_leverage: 50,
        }
    }

    fn long_position(mark: Decimal) -> Position {
        Position {
            symbol: "BTC".to_string(),
            size: dec!(1.0),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(mark),
            liquidation_price: Some(Price::new(dec!(54000))),
            leverage: 10,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    fn stop_candidate(trigger: Decimal) -> ValidatedIntent {
        ValidatedIntent {
            action: IntentAction::StopLoss,
            symbol: "BTC".to_string(),
            side: Some(PositionSide::Long),
            size: Size::new(dec!(1.0)),
            price: Price::new(trigger),
            leverage: 1,
            order_id: None,
        }
    }

    fn tp_candidate(trigger: Decimal, size: Decimal) -> ValidatedIntent {
        ValidatedIntent {
            action: IntentAction::TakeProfit,
            symbol: "BTC".to_string(),
            side: Some(PositionSide::Long),
            size: Size::new(size),
            price: Price::new(trigger),
            leverage: 1,
            order_id: None,
        }
    }

    fn resting_stop(oid: u64, trigger: Decimal, size: Decimal) -> OpenOrder {
        OpenOrder {
            oid,
            symbol: "BTC".to_string(),
            side: OrderSide::Sell,
            price: Price::new(trigger),
            size: Size::new(size),
            reduce_only: true,
            kind: OrderKind::StopMarket {
                trigger_price: Price::new(trigger),
            },
        }
    }

    fn setup() -> (Arc<MockExchange>, BracketManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(JsonStore::open(dir.path(), "protective_states").unwrap());
        let manager = BracketManager::new(
            exchange.clone() as DynExchangeClient,
            store,
            BracketConfig::default(),
        );
        (exchange, manager, dir)
    }

    #[tokio::test]
    async fn test_first_bracket_placed_and_state_initial() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58000))])
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, Outcome::Executed));

        let placed = exchange.placed();
        assert_eq!(placed.len(), 1);
        assert!(placed[0].reduce_only);
        assert_eq!(placed[0].side, OrderSide::Sell);

        let state = manager.state("u1", "BTC").unwrap();
        assert_eq!(state.current_stop_loss.0, dec!(58000));
        assert_eq!(state.initial_stop_loss.0, dec!(58000));
        assert_eq!(state.stop_loss_state, StopLossState::Initial);
    }

    #[tokio::test]
    async fn test_most_conservative_stop_wins_for_long() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);

        let results = manager
            .reconcile(
                "u1",
                "BTC",
                &metadata(),
                vec![stop_candidate(dec!(57000)), stop_candidate(dec!(58500))],
            )
            .await;

        // The higher stop is the more conservative one for a long
        assert!(matches!(
            results[0].outcome,
            Outcome::Skipped(SkipReason::SupersededStop { .. })
        ));
        assert!(matches!(results[1].outcome, Outcome::Executed));

        let placed = exchange.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(
            placed[0].kind.trigger_price().unwrap().0,
            dec!(58500)
        );
    }

    #[tokio::test]
    async fn test_anti_churn_skips_matching_bracket() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);
        exchange.set_open_orders(vec![resting_stop(9, dec!(58000), dec!(1.0))]);

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58000))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Skipped(SkipReason::BracketUnchanged { .. })
        ));
        assert!(exchange.cancelled().is_empty());
        assert!(exchange.placed().is_empty());
    }

    #[tokio::test]
    async fn test_stop_clamped_to_liquidation_buffer() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);

        // Liquidation at 54000; buffer 1.5% puts the floor at 54810
        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(54100))])
            .await;

        assert!(matches!(results[0].outcome, Outcome::Executed));
        let placed = exchange.placed();
        assert_eq!(placed[0].kind.trigger_price().unwrap().0, dec!(54810.0));
    }

    #[tokio::test]
    async fn test_failed_cancel_aborts_replacement() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);
        exchange.set_open_orders(vec![resting_stop(9, dec!(56000), dec!(1.0))]);
        exchange.set_fail_cancels(true);

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58000))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Rejected(RejectReason::CancellationFailed { oid: 9, .. })
        ));
        // Nothing may be placed over a partially-cancelled state
        assert!(exchange.placed().is_empty());
    }

    #[tokio::test]
    async fn test_take_profit_split_sums_to_position_size() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);

        let results = manager
            .reconcile(
                "u1",
                "BTC",
                &metadata(),
                vec![
                    stop_candidate(dec!(58000)),
                    tp_candidate(dec!(62000), dec!(0.4)),
                    tp_candidate(dec!(64000), dec!(0.4)),
                    tp_candidate(dec!(66000), dec!(0.4)),
                ],
            )
            .await;

        assert!(results.iter().all(|r| r.outcome.is_success()));

        let tps: Vec<_> = exchange
            .placed()
            .into_iter()
            .filter(|o| matches!(o.kind, OrderKind::TakeProfitMarket { .. }))
            .collect();
        assert_eq!(tps.len(), 3);
        let total: Decimal = tps.iter().map(|o| o.size.inner()).sum();
        assert_eq!(total, dec!(1.0));
    }

    #[tokio::test]
    async fn test_manual_override_freezes_automation() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(60000))]);

        manager.store
            .save(
                "u1:BTC".to_string(),
                ProtectiveOrderState {
                    symbol: "BTC".to_string(),
                    initial_stop_loss: Price::new(dec!(57000)),
                    current_stop_loss: Price::new(dec!(57000)),
                    current_take_profit: None,
                    stop_loss_state: StopLossState::Initial,
                    manual_override: true,
                    last_adjusted_at: Utc::now(),
                },
            )
            .unwrap();

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58000))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Skipped(SkipReason::ManualOverrideActive { .. })
        ));
        assert!(exchange.placed().is_empty());
        assert!(exchange.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_stop_trails_only_in_profit() {
        let (exchange, manager, _dir) = setup();
        // Mark above entry: the long is profitable
        exchange.set_positions(vec![long_position(dec!(63000))]);
        manager.store
            .save(
                "u1:BTC".to_string(),
                ProtectiveOrderState {
                    symbol: "BTC".to_string(),
                    initial_stop_loss: Price::new(dec!(58000)),
                    current_stop_loss: Price::new(dec!(58000)),
                    current_take_profit: None,
                    stop_loss_state: StopLossState::Initial,
                    manual_override: false,
                    last_adjusted_at: Utc::now(),
                },
            )
            .unwrap();
        exchange.set_open_orders(vec![resting_stop(9, dec!(58000), dec!(1.0))]);

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(60500))])
            .await;

        assert!(matches!(results[0].outcome, Outcome::Executed));
        let state = manager.state("u1", "BTC").unwrap();
        assert_eq!(state.current_stop_loss.0, dec!(60500));
        assert_eq!(state.stop_loss_state, StopLossState::Trailing);
        assert_eq!(state.initial_stop_loss.0, dec!(58000));
    }

    #[tokio::test]
    async fn test_stop_never_loosens_while_profitable() {
        let (exchange, manager, _dir) = setup();
        exchange.set_positions(vec![long_position(dec!(63000))]);
        manager.store
            .save(
                "u1:BTC".to_string(),
                ProtectiveOrderState {
                    symbol: "BTC".to_string(),
                    initial_stop_loss: Price::new(dec!(58000)),
                    current_stop_loss: Price::new(dec!(58000)),
                    current_take_profit: None,
                    stop_loss_state: StopLossState::Initial,
                    manual_override: false,
                    last_adjusted_at: Utc::now(),
                },
            )
            .unwrap();
        exchange.set_open_orders(vec![resting_stop(9, dec!(58000), dec!(1.0))]);

        // Proposing a lower (looser) stop keeps the current level, and
        // the resting order already matches it
        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(56000))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Skipped(SkipReason::BracketUnchanged { .. })
        ));
        let state = manager.state("u1", "BTC").unwrap();
        assert_eq!(state.current_stop_loss.0, dec!(58000));
    }

    #[tokio::test]
    async fn test_unprofitable_position_keeps_initial_stop() {
        let (exchange, manager, _dir) = setup();
        // Mark below entry: not profitable, stop must not move
        exchange.set_positions(vec![long_position(dec!(59000))]);
        manager.store
            .save(
                "u1:BTC".to_string(),
                ProtectiveOrderState {
                    symbol: "BTC".to_string(),
                    initial_stop_loss: Price::new(dec!(57000)),
                    current_stop_loss: Price::new(dec!(57000)),
                    current_take_profit: None,
                    stop_loss_state: StopLossState::Initial,
                    manual_override: false,
                    last_adjusted_at: Utc::now(),
                },
            )
            .unwrap();
        exchange.set_open_orders(vec![resting_stop(9, dec!(57000), dec!(1.0))]);

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58500))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Skipped(SkipReason::BracketUnchanged { .. })
        ));
        let state = manager.state("u1", "BTC").unwrap();
        assert_eq!(state.current_stop_loss.0, dec!(57000));
        assert_eq!(state.stop_loss_state, StopLossState::Initial);
    }

    #[tokio::test]
    async fn test_no_position_rejects_candidates() {
        let (_exchange, manager, _dir) = setup();

        let results = manager
            .reconcile("u1", "BTC", &metadata(), vec![stop_candidate(dec!(58000))])
            .await;

        assert!(matches!(
            results[0].outcome,
            Outcome::Rejected(RejectReason::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_prune_closed_positions() {
        let (_exchange, manager, _dir) = setup();
        manager.store
            .save(
                "u1:BTC".to_string(),
                ProtectiveOrderState {
                    symbol: "BTC".to_string(),
                    initial_stop_loss: Price::new(dec!(57000)),
                    current_stop_loss: Price::new(dec!(57000)),
                    current_take_profit: None,
                    stop_loss_state: StopLossState::Initial,
                    manual_override: false,
                    last_adjusted_at: Utc::now(),
                },
            )
            .unwrap();

        manager.prune_closed("u1", &["ETH"]);
        assert!(manager.state("u1", "BTC").is_none());
    }

    #[tokio::test]
    async fn test_states_snapshot_scoped_to_user() {
        let (_exchange, manager, _dir) = setup();
        let row = ProtectiveOrderState {
            symbol: "BTC".to_string(),
            initial_stop_loss: Price::new(dec!(57000)),
            current_stop_loss: Price::new(dec!(57000)),
            current_take_profit: None,
            stop_loss_state: StopLossState::Initial,
            manual_override: false,
            last_adjusted_at: Utc::now(),
        };
        manager.store.save("u1:BTC".to_string(), row.clone()).unwrap();
        manager.store.save("u2:BTC".to_string(), row).unwrap();

        let snapshot = manager.states("u1");
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("BTC"));
    }
}
