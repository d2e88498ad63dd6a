//! Metrics instrumentation for the dispatch core.
//!
//! Uses the `metrics` facade; wiring an exporter is a deployment concern.
//! Helpers are grouped by subsystem so call sites stay one-liners.

use metrics::{describe_counter, describe_gauge};

/// Register metric descriptions with the installed recorder.
///
/// Optional; counters work without it, descriptions just improve exporter
/// output. Call once at startup.
pub fn describe() {
    describe_counter!(
        "dispatch_bookings_created_total",
        "Bookings created, labeled by kind (standard/emergency)"
    );
    describe_counter!(
        "dispatch_locks_acquired_total",
        "Provider reservations granted to emergency bookings"
    );
    describe_counter!(
        "dispatch_lock_conflicts_total",
        "Acquire attempts rejected because the provider was already reserved"
    );
    describe_counter!(
        "dispatch_locks_released_total",
        "Reservations released, labeled by cause (accept/cancel/terminal/manual)"
    );
    describe_counter!(
        "dispatch_locks_reaped_total",
        "Expired reservations reclaimed by the lock reaper"
    );
    describe_counter!(
        "dispatch_no_provider_total",
        "Emergency requests that found no eligible candidate in radius"
    );
    describe_gauge!(
        "dispatch_active_locks",
        "Reservations currently outstanding"
    );
}

/// Record a created booking.
pub fn record_booking_created(emergency: bool) {
    let kind = if emergency { "emergency" } else { "standard" };
    metrics::counter!("dispatch_bookings_created_total", "kind" => kind).increment(1);
}

/// Record a granted reservation.
pub fn record_lock_acquired() {
    metrics::counter!("dispatch_locks_acquired_total").increment(1);
    metrics::gauge!("dispatch_active_locks").increment(1.0);
}

/// Record an acquire conflict.
pub fn record_lock_conflict() {
    metrics::counter!("dispatch_lock_conflicts_total").increment(1);
}

/// Record a released reservation and why it was released.
pub fn record_lock_released(cause: &'static str) {
    metrics::counter!("dispatch_locks_released_total", "cause" => cause).increment(1);
    metrics::gauge!("dispatch_active_locks").decrement(1.0);
}

/// Record reservations reclaimed by one reaper sweep.
///
/// The per-reservation release accounting (including the active-locks
/// gauge) is recorded by the ledger release path; this only tracks sweep
/// volume.
pub fn record_locks_reaped(count: u64) {
    if count > 0 {
        metrics::counter!("dispatch_locks_reaped_total").increment(count);
    }
}

/// Record an emergency request that found no candidate.
pub fn record_no_provider() {
    metrics::counter!("dispatch_no_provider_total").increment(1);
}
