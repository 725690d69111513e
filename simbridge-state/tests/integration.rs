//! Cross-thread integration tests for the state store.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use simbridge_state::StateStore;

/// Every merge writes the same generation value to the whole register block;
/// a reader must never observe a snapshot mixing two generations.
#[test]
fn test_snapshots_never_observe_half_merged_batches() {
    const BLOCK: [u16; 5] = [0, 1, 2, 3, 4];
    const GENERATIONS: u16 = 500;

    let store = Arc::new(StateStore::new(10));

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for generation in 1..=GENERATIONS {
                let batch: HashMap<u16, u16> =
                    BLOCK.iter().map(|addr| (*addr, generation)).collect();
                store.merge_input_registers(batch);
            }
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.snapshot();
                    if snapshot.input_registers.is_empty() {
                        continue;
                    }
                    assert_eq!(snapshot.input_registers.len(), BLOCK.len());
                    let first = snapshot.input_registers[&BLOCK[0]];
                    for addr in BLOCK {
                        assert_eq!(
                            snapshot.input_registers[&addr], first,
                            "snapshot mixes register generations"
                        );
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let final_state = store.latest_values();
    assert!(
        final_state
            .input_registers
            .values()
            .all(|v| *v == GENERATIONS)
    );
}

/// Snapshots handed to concurrent callers are independent owned copies.
#[test]
fn test_concurrent_snapshots_are_independent() {
    let store = Arc::new(StateStore::new(10));
    store.merge_coils(HashMap::from([(0, true), (1, false)]));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut snapshot = store.snapshot();
                // Mutating our copy must not leak into the store
                snapshot.coils.insert(99, true);
                snapshot.coils.len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
    assert_eq!(store.latest_values().coils.len(), 2);
}
