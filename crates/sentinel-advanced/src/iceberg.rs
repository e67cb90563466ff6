//! Iceberg exposure planning.
//!
//! An iceberg order rests only `display_size` of its hidden total at a
//! fixed limit price, re-exposing a fresh visible slice when the
//! previous one fills.

use std::time::Duration;

use sentinel_core::Size;

/// Size of the next visible slice: at most `display_size`, capped by
/// what is left of the hidden total.
#[must_use]
pub fn next_exposure(remaining: Size, display_size: Size) -> Size {
    if remaining <= display_size {
        remaining
    } else {
        display_size
    }
}

/// Delay before re-exposing after the visible slice fills.
///
/// Zero means immediate re-exposure.
#[must_use]
pub fn refresh_delay(refresh_delay_seconds: Option<u64>) -> Duration {
    Duration::from_secs(refresh_delay_seconds.unwrap_or(0))
}
