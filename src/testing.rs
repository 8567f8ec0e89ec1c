//! Shared test support
//!
//! Author: Moroya Sakamoto

/// Route `tracing` output to the test harness. Safe to call from every test.
pub(crate) fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .without_time()
        .try_init();
}
