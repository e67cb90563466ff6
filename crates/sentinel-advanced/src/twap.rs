//! TWAP slice planning.
//!
//! A TWAP order splits `total_size` into `slices` equal child orders
//! spread over `duration_minutes`. The plan is always recomputed from
//! the persisted record, so a restart mid-schedule resumes with the
//! remaining size spread over the remaining slices.

use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;

use sentinel_core::{AssetMetadata, Size};

use crate::order::AdvancedOrder;

/// Seconds between slice fires.
///
/// An explicit `interval_seconds` override wins over the
/// duration-derived spacing.
#[must_use]
pub fn slice_interval(
    duration_minutes: u64,
    slices: u32,
    interval_seconds: Option<u64>,
) -> Duration {
    if let Some(secs) = interval_seconds {
        return Duration::from_secs(secs.max(1));
    }
    let slices = u64::from(slices.max(1));
    Duration::from_secs((duration_minutes * 60 / slices).max(1))
}

/// Jitter an interval by up to ±20% so the schedule cannot be gamed
/// by observers timing the slices.
#[must_use]
pub fn jitter_interval(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

/// Size of the next slice: the remaining size spread evenly over the
/// remaining slices, rounded to the asset's precision.
///
/// The final slice absorbs the rounding residue so the executed slices
/// sum to `total_size` exactly.
#[must_use]
pub fn next_slice_size(order: &AdvancedOrder, slices: u32, metadata: &AssetMetadata) -> Size {
    let remaining = order.remaining_size();
    let remaining_slices = slices.saturating_sub(order.slices_done());
    if remaining_slices <= 1 {
        return metadata.round_size(remaining);
    }
    metadata.round_size(Size::new(
        remaining.inner() / Decimal::from(remaining_slices),
    ))
}
