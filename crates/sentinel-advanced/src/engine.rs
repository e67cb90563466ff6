//! Resumable driver for advanced orders.
//!
//! The engine owns one driver task per active order. The persisted
//! record is the source of truth: every step reloads it, decides the
//! next child action from the params, applies it against the exchange,
//! and persists before sleeping. `stop()` aborts the tasks only; a
//! restarted engine reloads every `active` record and resumes from
//! `executed_size`, never from zero.
//!
//! A per-slice failure increments `error_count` and leaves the schedule
//! running. Transient exchange errors are tolerated slice by slice;
//! repeated failure is surfaced through `error_count` for an operator,
//! not auto-cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sentinel_core::{CancelRequest, ClientOrderId, OpenOrder, OrderKind, OrderRequest, Price, Size};
use sentinel_exchange::{DynExchangeClient, MetadataCache, OrderOutcome};
use sentinel_persistence::JsonStore;

use crate::error::{AdvancedError, AdvancedResult};
use crate::order::{
    AdvancedOrder, AdvancedStatus, ExecutionLogEntry, GiveBehavior, OcoLeg, OrderParams,
};
use crate::{chase, iceberg, oco, scaled, trailing, twap};

/// Poll spacing while waiting on resting child orders.
const BOOK_POLL: Duration = Duration::from_secs(2);

/// Driver for persisted advanced orders.
pub struct AdvancedOrderEngine {
    exchange: DynExchangeClient,
    metadata: Arc<MetadataCache>,
    store: Arc<JsonStore<AdvancedOrder>>,
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

impl AdvancedOrderEngine {
    pub fn new(
        exchange: DynExchangeClient,
        metadata: Arc<MetadataCache>,
        store: Arc<JsonStore<AdvancedOrder>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            exchange,
            metadata,
            store,
            tasks: DashMap::new(),
        })
    }

    /// Reload every persisted `active` order and resume its schedule
    /// from `executed_size`. Returns the number of resumed orders.
    pub fn start(self: &Arc<Self>) -> usize {
        let mut resumed = 0;
        for record in self.store.load_all().into_values() {
            if record.status != AdvancedStatus::Active {
                continue;
            }
            info!(
                id = %record.id,
                order_type = %record.order_type,
                executed = %record.executed_size,
                total = %record.total_size,
                "Resuming advanced order"
            );
            self.spawn_driver(record.id);
            resumed += 1;
        }
        resumed
    }

    /// Abort all driver tasks without touching persisted state, so a
    /// later `start()` resumes cleanly.
    pub fn stop(&self) {
        self.tasks.retain(|id, handle| {
            debug!(id = %id, "Stopping advanced order driver");
            handle.abort();
            false
        });
    }

    /// Submit a new order and start driving it.
    pub fn execute_order(self: &Arc<Self>, order: AdvancedOrder) -> AdvancedResult<Uuid> {
        if order.status != AdvancedStatus::Active {
            return Err(AdvancedError::WrongStatus {
                expected: "active".to_string(),
                actual: order.status.to_string(),
            });
        }
        let id = order.id;
        info!(
            id = %id,
            order_type = %order.order_type,
            symbol = %order.symbol,
            total = %order.total_size,
            "Starting advanced order"
        );
        self.store.save(id.to_string(), order)?;
        self.spawn_driver(id);
        Ok(id)
    }

    /// Pause an active order. Resting child orders are left on the
    /// exchange; only the local schedule stops.
    pub fn pause_order(&self, id: Uuid) -> AdvancedResult<()> {
        let mut record = self.load(id)?;
        if record.status != AdvancedStatus::Active {
            return Err(AdvancedError::WrongStatus {
                expected: "active".to_string(),
                actual: record.status.to_string(),
            });
        }
        record.status = AdvancedStatus::Paused;
        record.record_event("paused", "paused by operator");
        self.store.save(id.to_string(), record)?;
        if let Some((_, handle)) = self.tasks.remove(&id) {
            handle.abort();
        }
        info!(id = %id, "Advanced order paused");
        Ok(())
    }

    /// Resume a paused order; the schedule is recomputed from the
    /// persisted record.
    pub fn resume_order(self: &Arc<Self>, id: Uuid) -> AdvancedResult<()> {
        let mut record = self.load(id)?;
        if record.status != AdvancedStatus::Paused {
            return Err(AdvancedError::WrongStatus {
                expected: "paused".to_string(),
                actual: record.status.to_string(),
            });
        }
        record.status = AdvancedStatus::Active;
        record.record_event("resumed", "resumed by operator");
        self.store.save(id.to_string(), record)?;
        self.spawn_driver(id);
        info!(id = %id, "Advanced order resumed");
        Ok(())
    }

    /// Cancel an order and best-effort cancel its resting children.
    pub async fn cancel_order(&self, id: Uuid) -> AdvancedResult<()> {
        let mut record = self.load(id)?;
        if record.status.is_terminal() {
            return Err(AdvancedError::WrongStatus {
                expected: "active or paused".to_string(),
                actual: record.status.to_string(),
            });
        }
        if let Some((_, handle)) = self.tasks.remove(&id) {
            handle.abort();
        }

        // Child orders already resting remain on the exchange until
        // explicitly cancelled; do that now, tolerating failures.
        match self.resting_oids(&record.symbol).await {
            Ok(resting) => {
                let children = record.child_order_ids.clone();
                for oid in children.into_iter().filter(|o| resting.contains(o)) {
                    match self
                        .exchange
                        .cancel_order(CancelRequest {
                            symbol: record.symbol.clone(),
                            oid,
                        })
                        .await
                    {
                        Ok(()) => debug!(id = %id, oid, "Cancelled resting child order"),
                        Err(e) => {
                            warn!(id = %id, oid, error = %e, "Failed to cancel child order");
                            record.record_error(format!("cancel child {oid}: {e}"));
                        }
                    }
                }
            }
            Err(e) => record.record_error(format!("open orders fetch during cancel: {e}")),
        }

        record.status = AdvancedStatus::Cancelled;
        record.record_event("cancelled", "cancelled by operator");
        self.store.save(id.to_string(), record)?;
        info!(id = %id, "Advanced order cancelled");
        Ok(())
    }

    /// Current persisted state of one order.
    #[must_use]
    pub fn order(&self, id: Uuid) -> Option<AdvancedOrder> {
        self.store.get(&id.to_string())
    }

    /// Number of orders with a running driver task.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.tasks.len()
    }

    fn load(&self, id: Uuid) -> AdvancedResult<AdvancedOrder> {
        self.store
            .get(&id.to_string())
            .ok_or(AdvancedError::UnknownOrder(id))
    }

    fn spawn_driver(self: &Arc<Self>, id: Uuid) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.drive(id).await });
        if let Some(old) = self.tasks.insert(id, handle) {
            old.abort();
        }
    }

    async fn drive(self: Arc<Self>, id: Uuid) {
        loop {
            let mut record = match self.store.get(&id.to_string()) {
                Some(record) => record,
                None => break,
            };
            if record.status != AdvancedStatus::Active {
                break;
            }

            let delay = self.step(&mut record).await;
            // An operator may have paused or cancelled while the step
            // was in flight; their status wins over ours
            if let Some(current) = self.store.get(&id.to_string()) {
                if current.status != AdvancedStatus::Active && !record.status.is_terminal() {
                    record.status = current.status;
                }
            }
            if let Err(e) = self.store.save(id.to_string(), record.clone()) {
                warn!(id = %id, error = %e, "Failed to persist advanced order state");
            }
            if record.status.is_terminal() {
                break;
            }
            tokio::time::sleep(delay).await;
        }
        self.tasks.remove(&id);
    }

    /// One scheduling step. Mutates the record in place and returns the
    /// delay until the next step.
    async fn step(&self, record: &mut AdvancedOrder) -> Duration {
        match record.params.clone() {
            OrderParams::Twap {
                duration_minutes,
                slices,
                interval_seconds,
                jitter,
            } => {
                self.step_twap(record, duration_minutes, slices, interval_seconds, jitter)
                    .await
            }
            OrderParams::Iceberg {
                display_size,
                limit_price,
                refresh_delay_seconds,
            } => {
                self.step_iceberg(record, display_size, limit_price, refresh_delay_seconds)
                    .await
            }
            OrderParams::Oco {
                leg_a,
                leg_b,
                poll_seconds,
            } => self.step_oco(record, leg_a, leg_b, poll_seconds).await,
            OrderParams::TrailingTp {
                trail_distance,
                min_profit,
                poll_seconds,
                high_water_mark,
                entry_price,
            } => {
                self.step_trailing(
                    record,
                    trail_distance,
                    min_profit,
                    poll_seconds,
                    high_water_mark,
                    entry_price,
                )
                .await
            }
            OrderParams::LimitChase {
                chase_interval_seconds,
                offset_ticks,
                max_chases,
                give_behavior,
            } => {
                self.step_chase(
                    record,
                    chase_interval_seconds,
                    offset_ticks,
                    max_chases,
                    give_behavior,
                )
                .await
            }
            OrderParams::Scaled {
                price_low,
                price_high,
                levels,
            } => self.step_scaled(record, price_low, price_high, levels).await,
        }
    }

    // ------------------------------------------------------------------
    // TWAP
    // ------------------------------------------------------------------

    async fn step_twap(
        &self,
        record: &mut AdvancedOrder,
        duration_minutes: u64,
        slices: u32,
        interval_seconds: Option<u64>,
        jitter: bool,
    ) -> Duration {
        if record.is_complete() || record.slices_done() >= slices {
            self.complete(record);
            return Duration::ZERO;
        }

        let interval = twap::slice_interval(duration_minutes, slices, interval_seconds);
        let metadata = match self
            .metadata
            .get_or_fetch(self.exchange.as_ref(), &record.symbol)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                record.record_error(format!("metadata: {e}"));
                return interval;
            }
        };
        let price = match self.market_price(&record.symbol).await {
            Ok(price) => metadata.round_price(price),
            Err(e) => {
                record.record_error(e.to_string());
                return interval;
            }
        };

        let slice_size = twap::next_slice_size(record, slices, &metadata);
        if !slice_size.is_positive() {
            self.complete(record);
            return Duration::ZERO;
        }

        let slice_no = record.slices_done() + 1;
        let request = OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: record.symbol.clone(),
            side: record.side,
            price,
            size: slice_size,
            reduce_only: false,
            kind: OrderKind::Market,
        };
        match self.exchange.place_order(request).await {
            Ok(OrderOutcome::Filled {
                oid,
                avg_price,
                size,
            }) => {
                record.child_order_ids.push(oid);
                record.record_slice(size, avg_price, format!("slice {slice_no}/{slices}"));
            }
            Ok(OrderOutcome::Resting { oid }) => {
                record.child_order_ids.push(oid);
                record.record_slice(slice_size, price, format!("slice {slice_no}/{slices}"));
            }
            Ok(OrderOutcome::Rejected { reason }) => record.record_error(reason),
            Err(e) => record.record_error(e.to_string()),
        }

        if record.is_complete() || record.slices_done() >= slices {
            self.complete(record);
            return Duration::ZERO;
        }
        if jitter {
            twap::jitter_interval(interval)
        } else {
            interval
        }
    }

    // ------------------------------------------------------------------
    // Iceberg
    // ------------------------------------------------------------------

    async fn step_iceberg(
        &self,
        record: &mut AdvancedOrder,
        display_size: Size,
        limit_price: Price,
        refresh_delay_seconds: Option<u64>,
    ) -> Duration {
        // An exposed slice is outstanding when the last child has no
        // matching fill recorded yet
        if let Some(&exposed_oid) = record.child_order_ids.last() {
            if record.child_order_ids.len() > record.slices_done() as usize {
                let resting = match self.resting_oids(&record.symbol).await {
                    Ok(resting) => resting,
                    Err(e) => {
                        record.record_error(format!("open orders fetch: {e}"));
                        return BOOK_POLL;
                    }
                };
                if resting.contains(&exposed_oid) {
                    return BOOK_POLL;
                }
                // Visible slice left the book: account for it
                let filled = iceberg::next_exposure(record.remaining_size(), display_size);
                record.record_slice(
                    filled,
                    limit_price,
                    format!("visible slice oid={exposed_oid} filled"),
                );
                if record.is_complete() {
                    self.complete(record);
                    return Duration::ZERO;
                }
                let delay = iceberg::refresh_delay(refresh_delay_seconds);
                if !delay.is_zero() {
                    return delay;
                }
            }
        }

        if record.is_complete() {
            self.complete(record);
            return Duration::ZERO;
        }

        // Expose the next visible slice
        let metadata = match self
            .metadata
            .get_or_fetch(self.exchange.as_ref(), &record.symbol)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                record.record_error(format!("metadata: {e}"));
                return BOOK_POLL;
            }
        };
        let exposure =
            metadata.round_size(iceberg::next_exposure(record.remaining_size(), display_size));
        let request = OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: record.symbol.clone(),
            side: record.side,
            price: metadata.round_price(limit_price),
            size: exposure,
            reduce_only: false,
            kind: OrderKind::Limit,
        };
        match self.exchange.place_order(request).await {
            Ok(OrderOutcome::Filled {
                oid,
                avg_price,
                size,
            }) => {
                record.child_order_ids.push(oid);
                record.record_slice(size, avg_price, format!("visible slice oid={oid} filled"));
            }
            Ok(OrderOutcome::Resting { oid }) => {
                record.child_order_ids.push(oid);
                record.record_event("expose", format!("exposed {exposure} at {limit_price}"));
            }
            Ok(OrderOutcome::Rejected { reason }) => record.record_error(reason),
            Err(e) => record.record_error(e.to_string()),
        }

        if record.is_complete() {
            self.complete(record);
            return Duration::ZERO;
        }
        BOOK_POLL
    }

    // ------------------------------------------------------------------
    // OCO
    // ------------------------------------------------------------------

    async fn step_oco(
        &self,
        record: &mut AdvancedOrder,
        leg_a: OcoLeg,
        leg_b: OcoLeg,
        poll_seconds: u64,
    ) -> Duration {
        let poll = Duration::from_secs(poll_seconds.max(1));

        if record.child_order_ids.len() < 2 {
            return self.place_oco_legs(record, leg_a, leg_b, poll).await;
        }

        let (oid_a, oid_b) = (record.child_order_ids[0], record.child_order_ids[1]);
        let resting = match self.resting_oids(&record.symbol).await {
            Ok(resting) => resting,
            Err(e) => {
                record.record_error(format!("open orders fetch: {e}"));
                return poll;
            }
        };

        match oco::pair_state(oid_a, oid_b, &resting) {
            oco::PairState::Resting => poll,
            oco::PairState::LegFilled {
                filled_oid,
                sibling_oid,
            } => {
                if record.slices_done() == 0 {
                    let leg_price = if filled_oid == oid_a {
                        leg_a.price
                    } else {
                        leg_b.price
                    };
                    record.record_slice(
                        record.total_size,
                        leg_price,
                        format!("leg oid={filled_oid} filled"),
                    );
                }
                // The sibling must go before the pair is done; a failed
                // cancel keeps the order active so the next poll retries
                match self
                    .exchange
                    .cancel_order(CancelRequest {
                        symbol: record.symbol.clone(),
                        oid: sibling_oid,
                    })
                    .await
                {
                    Ok(()) => {
                        record.record_event(
                            "cancel_sibling",
                            format!("cancelled sibling oid={sibling_oid}"),
                        );
                        self.complete(record);
                        Duration::ZERO
                    }
                    Err(e) => {
                        record.record_error(format!("cancel sibling {sibling_oid}: {e}"));
                        poll
                    }
                }
            }
            oco::PairState::Closed => {
                if record.slices_done() == 0 {
                    record.record_event("closed", "both legs left the book");
                }
                self.complete(record);
                Duration::ZERO
            }
        }
    }

    /// Place both legs of a linked pair. If only one leg ends up
    /// resting, it is cancelled again: a half pair is not an OCO.
    async fn place_oco_legs(
        &self,
        record: &mut AdvancedOrder,
        leg_a: OcoLeg,
        leg_b: OcoLeg,
        poll: Duration,
    ) -> Duration {
        record.child_order_ids.clear();
        for leg in [leg_a, leg_b] {
            let kind = if leg.is_stop {
                OrderKind::StopMarket {
                    trigger_price: leg.price,
                }
            } else {
                OrderKind::Limit
            };
            let request = OrderRequest {
                cloid: ClientOrderId::new(),
                symbol: record.symbol.clone(),
                side: record.side,
                price: leg.price,
                size: record.total_size,
                reduce_only: true,
                kind,
            };
            match self.exchange.place_order(request).await {
                Ok(OrderOutcome::Filled {
                    oid, avg_price, ..
                }) => {
                    // Filled on placement: the pair is done before it
                    // ever rested; cancel anything already placed
                    record.child_order_ids.push(oid);
                    record.record_slice(
                        record.total_size,
                        avg_price,
                        format!("leg oid={oid} filled"),
                    );
                    self.cancel_resting_children(record).await;
                    self.complete(record);
                    return Duration::ZERO;
                }
                Ok(OrderOutcome::Resting { oid }) => {
                    record.child_order_ids.push(oid);
                    record.record_event("leg", format!("leg resting oid={oid} at {}", leg.price));
                }
                Ok(OrderOutcome::Rejected { reason }) => record.record_error(reason),
                Err(e) => record.record_error(e.to_string()),
            }
        }

        if record.child_order_ids.len() < 2 {
            self.cancel_resting_children(record).await;
            record.child_order_ids.clear();
        }
        poll
    }

    // ------------------------------------------------------------------
    // Trailing take-profit
    // ------------------------------------------------------------------

    async fn step_trailing(
        &self,
        record: &mut AdvancedOrder,
        trail_distance: Price,
        min_profit: Price,
        poll_seconds: u64,
        high_water_mark: Option<Price>,
        entry_price: Price,
    ) -> Duration {
        let poll = Duration::from_secs(poll_seconds.max(1));
        let price = match self.market_price(&record.symbol).await {
            Ok(price) => price,
            Err(e) => {
                record.record_error(e.to_string());
                return poll;
            }
        };

        match trailing::evaluate(
            record.side,
            entry_price,
            high_water_mark,
            price,
            trail_distance,
            min_profit,
        ) {
            trailing::TrailAction::Inactive | trailing::TrailAction::Hold => poll,
            trailing::TrailAction::AdvanceHighWater(mark) => {
                debug!(id = %record.id, %mark, "Trailing high-water mark advanced");
                record.params = OrderParams::TrailingTp {
                    trail_distance,
                    min_profit,
                    poll_seconds,
                    high_water_mark: Some(mark),
                    entry_price,
                };
                poll
            }
            trailing::TrailAction::Trigger { high_water } => {
                let metadata = match self
                    .metadata
                    .get_or_fetch(self.exchange.as_ref(), &record.symbol)
                    .await
                {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        record.record_error(format!("metadata: {e}"));
                        return poll;
                    }
                };
                let request = OrderRequest {
                    cloid: ClientOrderId::new(),
                    symbol: record.symbol.clone(),
                    side: record.side,
                    price: metadata.round_price(price),
                    size: metadata.round_size(record.remaining_size()),
                    reduce_only: true,
                    kind: OrderKind::Market,
                };
                match self.exchange.place_order(request).await {
                    Ok(OrderOutcome::Rejected { reason }) => {
                        record.record_error(reason);
                        poll
                    }
                    Ok(outcome) => {
                        let (fill_price, oid) = match outcome {
                            OrderOutcome::Filled { oid, avg_price, .. } => (avg_price, oid),
                            OrderOutcome::Resting { oid } => (price, oid),
                            OrderOutcome::Rejected { .. } => unreachable!(),
                        };
                        record.child_order_ids.push(oid);
                        record.record_slice(
                            record.remaining_size(),
                            fill_price,
                            format!("trailed out from high water {high_water}"),
                        );
                        self.complete(record);
                        Duration::ZERO
                    }
                    Err(e) => {
                        record.record_error(e.to_string());
                        poll
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Limit chase
    // ------------------------------------------------------------------

    async fn step_chase(
        &self,
        record: &mut AdvancedOrder,
        chase_interval_seconds: u64,
        offset_ticks: u32,
        max_chases: u32,
        give_behavior: GiveBehavior,
    ) -> Duration {
        let interval = Duration::from_secs(chase_interval_seconds.max(1));
        let metadata = match self
            .metadata
            .get_or_fetch(self.exchange.as_ref(), &record.symbol)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                record.record_error(format!("metadata: {e}"));
                return interval;
            }
        };
        let market = match self.market_price(&record.symbol).await {
            Ok(price) => price,
            Err(e) => {
                record.record_error(e.to_string());
                return interval;
            }
        };
        let desired = chase::desired_price(record.side, market, metadata.tick_size, offset_ticks);

        let Some(&current_oid) = record.child_order_ids.last() else {
            self.place_chase_limit(record, desired, "place").await;
            return interval;
        };

        let resting = match self.resting_for(&record.symbol).await {
            Ok(resting) => resting,
            Err(e) => {
                record.record_error(format!("open orders fetch: {e}"));
                return interval;
            }
        };
        let Some(open) = resting.iter().find(|o| o.oid == current_oid) else {
            // The pegged limit left the book: filled
            let fill_price = chase::last_peg_price(record).unwrap_or(desired);
            record.record_slice(
                record.remaining_size(),
                fill_price,
                format!("chased limit oid={current_oid} filled"),
            );
            self.complete(record);
            return Duration::ZERO;
        };

        if !chase::has_drifted(open.price, desired, metadata.tick_size) {
            return interval;
        }

        if chase::chases_done(record) >= max_chases {
            return self
                .give_up_chase(record, current_oid, desired, give_behavior, interval)
                .await;
        }

        // Re-peg: cancel then replace. A failed cancel usually means
        // the order just filled; the next poll settles it either way.
        if let Err(e) = self
            .exchange
            .cancel_order(CancelRequest {
                symbol: record.symbol.clone(),
                oid: current_oid,
            })
            .await
        {
            record.record_error(format!("cancel for re-peg {current_oid}: {e}"));
            return interval;
        }
        self.place_chase_limit(record, desired, "repeg").await;
        interval
    }

    async fn place_chase_limit(&self, record: &mut AdvancedOrder, price: Price, action: &str) {
        let request = OrderRequest {
            cloid: ClientOrderId::new(),
            symbol: record.symbol.clone(),
            side: record.side,
            price,
            size: record.remaining_size(),
            reduce_only: false,
            kind: OrderKind::Limit,
        };
        match self.exchange.place_order(request).await {
            Ok(OrderOutcome::Filled {
                oid, avg_price, ..
            }) => {
                record.child_order_ids.push(oid);
                record.record_slice(
                    record.remaining_size(),
                    avg_price,
                    format!("chased limit oid={oid} filled"),
                );
                self.complete(record);
            }
            Ok(OrderOutcome::Resting { oid }) => {
                record.child_order_ids.push(oid);
                record.execution_log.push(ExecutionLogEntry {
                    at: Utc::now(),
                    action: action.to_string(),
                    size: record.remaining_size(),
                    price: Some(price),
                    detail: format!("pegged oid={oid} at {price}"),
                });
            }
            Ok(OrderOutcome::Rejected { reason }) => record.record_error(reason),
            Err(e) => record.record_error(e.to_string()),
        }
    }

    /// The chase budget is spent; apply the give behavior.
    async fn give_up_chase(
        &self,
        record: &mut AdvancedOrder,
        current_oid: u64,
        price_hint: Price,
        give_behavior: GiveBehavior,
        interval: Duration,
    ) -> Duration {
        match give_behavior {
            GiveBehavior::Wait => interval,
            GiveBehavior::Cancel => {
                if let Err(e) = self
                    .exchange
                    .cancel_order(CancelRequest {
                        symbol: record.symbol.clone(),
                        oid: current_oid,
                    })
                    .await
                {
                    record.record_error(format!("give-up cancel {current_oid}: {e}"));
                    return interval;
                }
                record.status = AdvancedStatus::Cancelled;
                record.record_event("gave_up", "chase budget exhausted, remainder cancelled");
                Duration::ZERO
            }
            GiveBehavior::Market => {
                if let Err(e) = self
                    .exchange
                    .cancel_order(CancelRequest {
                        symbol: record.symbol.clone(),
                        oid: current_oid,
                    })
                    .await
                {
                    record.record_error(format!("give-up cancel {current_oid}: {e}"));
                    return interval;
                }
                let request = OrderRequest {
                    cloid: ClientOrderId::new(),
                    symbol: record.symbol.clone(),
                    side: record.side,
                    price: price_hint,
                    size: record.remaining_size(),
                    reduce_only: false,
                    kind: OrderKind::Market,
                };
                match self.exchange.place_order(request).await {
                    Ok(OrderOutcome::Rejected { reason }) => {
                        record.record_error(reason);
                        interval
                    }
                    Ok(outcome) => {
                        let fill_price = match outcome {
                            OrderOutcome::Filled { avg_price, .. } => avg_price,
                            _ => price_hint,
                        };
                        if let Some(oid) = outcome.oid() {
                            record.child_order_ids.push(oid);
                        }
                        record.record_slice(
                            record.remaining_size(),
                            fill_price,
                            "chase budget exhausted, remainder taken at market",
                        );
                        self.complete(record);
                        Duration::ZERO
                    }
                    Err(e) => {
                        record.record_error(e.to_string());
                        interval
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Scaled ladder
    // ------------------------------------------------------------------

    async fn step_scaled(
        &self,
        record: &mut AdvancedOrder,
        price_low: Price,
        price_high: Price,
        levels: u32,
    ) -> Duration {
        let metadata = match self
            .metadata
            .get_or_fetch(self.exchange.as_ref(), &record.symbol)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                record.record_error(format!("metadata: {e}"));
                return BOOK_POLL;
            }
        };
        let prices = scaled::level_prices(price_low, price_high, levels, &metadata);
        let sizes = scaled::level_sizes(record.total_size, levels, &metadata);

        // Place any levels not yet resting; child index i maps to
        // ladder level i
        let placed = record.child_order_ids.len();
        if placed < prices.len() {
            for (price, size) in prices.iter().zip(&sizes).skip(placed) {
                let request = OrderRequest {
                    cloid: ClientOrderId::new(),
                    symbol: record.symbol.clone(),
                    side: record.side,
                    price: *price,
                    size: *size,
                    reduce_only: false,
                    kind: OrderKind::Limit,
                };
                match self.exchange.place_order(request).await {
                    Ok(OrderOutcome::Filled {
                        oid, avg_price, ..
                    }) => {
                        record.child_order_ids.push(oid);
                        record.record_slice(*size, avg_price, format!("level oid={oid} filled"));
                    }
                    Ok(OrderOutcome::Resting { oid }) => {
                        record.child_order_ids.push(oid);
                        record.record_event("level", format!("level resting oid={oid} at {price}"));
                    }
                    Ok(OrderOutcome::Rejected { reason }) => {
                        record.record_error(reason);
                        // Retry the remaining levels next poll to keep
                        // child index aligned with ladder level
                        break;
                    }
                    Err(e) => {
                        record.record_error(e.to_string());
                        break;
                    }
                }
            }
            if record.is_complete() {
                self.complete(record);
                return Duration::ZERO;
            }
            return BOOK_POLL;
        }

        // Detect fills: a level's oid leaving the book is a fill
        let resting = match self.resting_oids(&record.symbol).await {
            Ok(resting) => resting,
            Err(e) => {
                record.record_error(format!("open orders fetch: {e}"));
                return BOOK_POLL;
            }
        };
        let children = record.child_order_ids.clone();
        for (i, oid) in children.into_iter().enumerate() {
            if resting.contains(&oid) {
                continue;
            }
            let marker = format!("level oid={oid} filled");
            if record.execution_log.iter().any(|e| e.detail == marker) {
                continue;
            }
            record.record_slice(sizes[i], prices[i], marker);
        }

        if record.is_complete() {
            self.complete(record);
            return Duration::ZERO;
        }
        BOOK_POLL
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn complete(&self, record: &mut AdvancedOrder) {
        record.status = AdvancedStatus::Completed;
        let detail = match record.weighted_average_price() {
            Some(avg) => format!(
                "filled {} at size-weighted average {avg}",
                record.executed_size
            ),
            None => "completed with no fills".to_string(),
        };
        record.record_event("completed", detail);
        info!(
            id = %record.id,
            symbol = %record.symbol,
            executed = %record.executed_size,
            errors = record.error_count,
            "Advanced order completed"
        );
    }

    async fn cancel_resting_children(&self, record: &mut AdvancedOrder) {
        let resting = match self.resting_oids(&record.symbol).await {
            Ok(resting) => resting,
            Err(e) => {
                record.record_error(format!("open orders fetch: {e}"));
                return;
            }
        };
        let children = record.child_order_ids.clone();
        for oid in children.into_iter().filter(|o| resting.contains(o)) {
            if let Err(e) = self
                .exchange
                .cancel_order(CancelRequest {
                    symbol: record.symbol.clone(),
                    oid,
                })
                .await
            {
                record.record_error(format!("cancel child {oid}: {e}"));
            }
        }
    }

    async fn resting_oids(&self, symbol: &str) -> sentinel_exchange::ExchangeResult<HashSet<u64>> {
        Ok(self
            .resting_for(symbol)
            .await?
            .into_iter()
            .map(|o| o.oid)
            .collect())
    }

    async fn resting_for(
        &self,
        symbol: &str,
    ) -> sentinel_exchange::ExchangeResult<Vec<OpenOrder>> {
        Ok(self
            .exchange
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| o.symbol == symbol)
            .collect())
    }

    async fn market_price(&self, symbol: &str) -> AdvancedResult<Price> {
        let data = self.exchange.market_data().await.map_err(AdvancedError::Exchange)?;
        data.into_iter()
            .find(|row| row.symbol == symbol)
            .map(|row| row.price)
            .filter(Price::is_positive)
            .ok_or_else(|| AdvancedError::MarketDataUnavailable(symbol.to_string()))
    }
}
