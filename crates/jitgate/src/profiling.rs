//! Process-wide cache event counters.
//!
//! Event names are dotted, e.g. `jitgate.hit`. Counters only ever grow; tools read
//! them through [`snapshot`].

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

pub const HIT: &str = "jitgate.hit";
pub const MISS: &str = "jitgate.miss";
pub const COMPILE: &str = "jitgate.compile";
pub const FALLBACK: &str = "jitgate.fallback";
pub const GUARD_REJECT: &str = "jitgate.guard_reject";
pub const LOAD_SKIP: &str = "jitgate.load_skip";

static EVENTS: OnceLock<Mutex<BTreeMap<&'static str, u64>>> = OnceLock::new();

fn events() -> &'static Mutex<BTreeMap<&'static str, u64>> {
    EVENTS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

pub fn cache_event(name: &'static str) {
    if let Ok(mut events) = events().lock() {
        *events.entry(name).or_insert(0) += 1;
    }
    tracing::trace!(event = name, "cache event");
}

pub fn event_count(name: &str) -> u64 {
    events()
        .lock()
        .ok()
        .and_then(|events| events.get(name).copied())
        .unwrap_or(0)
}

/// Current counters, sorted by event name.
pub fn snapshot() -> Vec<(&'static str, u64)> {
    events()
        .lock()
        .map(|events| events.iter().map(|(name, count)| (*name, *count)).collect())
        .unwrap_or_default()
}
