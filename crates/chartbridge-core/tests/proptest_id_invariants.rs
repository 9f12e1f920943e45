//! Invariants of the identifier generator.
//!
//! 1. Ids never repeat within one generator, across threads too.
//! 2. Ids are lowercase ASCII of the configured length.
//! 3. Request ids are strictly increasing.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chartbridge_core::IdGenerator;
use proptest::prelude::*;

// ═════════════════════════════════════════════════════════════════════════
// 1. Uniqueness
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn hundred_thousand_ids_are_distinct() {
    let ids = IdGenerator::with_seed(0xC0FFEE);
    let mut seen = HashSet::with_capacity(100_000);
    for _ in 0..100_000 {
        let id = ids.generate().unwrap();
        assert!(seen.insert(id.clone()), "duplicate id {id}");
    }
    assert_eq!(ids.issued_count(), 100_000);
}

#[test]
fn concurrent_generation_is_distinct() {
    let ids = Arc::new(IdGenerator::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ids = Arc::clone(&ids);
            thread::spawn(move || {
                (0..2_000)
                    .map(|_| ids.generate().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut seen = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), 8_000);
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Shape
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ids_have_configured_shape(seed in any::<u64>(), len in 4usize..16) {
        let ids = IdGenerator::with_seed(seed).with_len(len);
        for _ in 0..20 {
            let id = ids.generate().unwrap();
            prop_assert_eq!(id.len(), len);
            prop_assert!(id.bytes().all(|b| b.is_ascii_lowercase()));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Request ids
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn request_ids_strictly_increase(n in 1usize..200) {
        let ids = IdGenerator::with_seed(1);
        let mut last = ids.next_request_id();
        for _ in 0..n {
            let next = ids.next_request_id();
            prop_assert!(next > last);
            last = next;
        }
    }
}
