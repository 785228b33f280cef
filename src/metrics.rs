use tracing::trace;

// Lightweight trace-based metrics helpers.
// These avoid the metrics macros; request and stage volume shows up
// under RUST_LOG=trace.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "catalog.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "catalog.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
