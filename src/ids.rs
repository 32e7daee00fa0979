//! Tool-call id generation: a short, opaque, process-unique token.
//!
//! The format is `call_` followed by 8 lowercase-hex characters derived from
//! a process-local monotonic counter mixed with a fixed per-process seed.
//! Uniqueness within one response comes from the counter, not from the
//! randomness — the seed only keeps ids from being trivially guessable
//! across separate processes, reusing `rand` rather than adding a second
//! randomness dependency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static COUNTER: AtomicU64 = AtomicU64::new(0);
static SEED: OnceLock<u64> = OnceLock::new();

fn seed() -> u64 {
    *SEED.get_or_init(rand::random::<u64>)
}

/// Mints the next call id, unique for the lifetime of this process.
pub fn next_call_id() -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = n.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(seed());
    format!("call_{:08x}", (mixed >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_within_a_burst() {
        let ids: HashSet<String> = (0..1000).map(|_| next_call_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_follow_the_documented_format() {
        let id = next_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 8);
        assert!(id["call_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
