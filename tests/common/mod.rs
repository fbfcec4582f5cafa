//! Shared test helpers.

pub mod mock_mirror;

pub use mock_mirror::MockMirror;

use std::future::Future;
use std::time::{Duration, Instant};

/// Poll `check` every few milliseconds until it returns true or `bound`
/// elapses. Returns whether the condition was observed.
///
/// This is the propagation-bound contract in test form: instead of sleeping
/// a fixed interval and hoping, we poll against the configured bound.
#[allow(dead_code)] // Not every test binary uses every helper
pub async fn wait_for<F, Fut>(bound: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + bound;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
