//! Fuzz target for configuration parsing.
//!
//! Duration strings come from operator-edited config files; parsing and the
//! fallback helpers must never panic on arbitrary input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use named_count::config::{MirrorConfig, ReplicationSettings};

fuzz_target!(|data: (&str, &str, &str)| {
    let (delay, bound, timeout) = data;

    let settings = ReplicationSettings {
        max_batch_delay: delay.to_string(),
        propagation_bound: bound.to_string(),
        ..Default::default()
    };

    // Should never panic, only fall back to defaults
    let _ = settings.max_batch_delay_duration();
    let _ = settings.propagation_bound_duration();
    let _ = settings.retry_config();

    let mirror = MirrorConfig {
        connect_timeout: timeout.to_string(),
        ..Default::default()
    };
    let _ = mirror.connect_timeout_duration();
});
