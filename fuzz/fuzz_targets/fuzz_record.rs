//! Fuzz target for replication record and config deserialization.
//!
//! Records and configs cross process boundaries as JSON in operational
//! tooling; deserialization must reject garbage without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use named_count::config::NamedCountConfig;
use named_count::replication::ReplicationRecord;

fuzz_target!(|data: &str| {
    // Should never panic, only return Err on malformed input
    if let Ok(record) = serde_json::from_str::<ReplicationRecord>(data) {
        // Accessors on any successfully parsed record must be total
        let _ = record.key();
        let _ = record.kind();
    }

    let _ = serde_json::from_str::<NamedCountConfig>(data);
});
