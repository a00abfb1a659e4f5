//! Random allocate/free sequences against the heap invariants.

mod common;

use common::{HostPageSupplier, PAGE, ThreadOracle};
use kernel_heap::{Heap, HeapConfig, HeapError, VirtualAddress};
use kernel_sync::NoInterruptGate;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Allocate(u64),
    /// Frees the live allocation at this position (modulo the live count).
    Free(usize),
    /// Frees an address that never came from the heap.
    BogusFree(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (1_u64..=6000).prop_map(Op::Allocate),
        4 => any::<usize>().prop_map(Op::Free),
        1 => (1_u64..=0xFFFF).prop_map(|n| Op::BogusFree(n * 2 + 1)),
    ]
}

fn granularity() -> impl Strategy<Value = u64> {
    prop_oneof![Just(PAGE), Just(4 * PAGE), Just(16 * PAGE)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_sequences_keep_invariants(
        granularity in granularity(),
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let pages = HostPageSupplier::new();
        let config = HeapConfig::user().with_granularity(granularity);
        let heap = Heap::new(config, pages.clone(), ThreadOracle, NoInterruptGate).unwrap();

        let mut live: Vec<(VirtualAddress, u64)> = Vec::new();
        let mut slots = 0;

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let a = heap.allocate(size, "prop").unwrap();
                    let rounded = size.div_ceil(4) * 4;
                    for &(b, len) in &live {
                        prop_assert!(
                            a.as_u64() + rounded <= b.as_u64() || b.as_u64() + len <= a.as_u64(),
                            "{a} overlaps {b}"
                        );
                    }
                    live.push((a, rounded));
                }
                Op::Free(i) if !live.is_empty() => {
                    let (a, _) = live.swap_remove(i % live.len());
                    heap.deallocate(a, "prop").unwrap();

                    // no two free neighbours in one extent
                    let blocks = heap.blocks().unwrap();
                    for w in blocks.windows(2) {
                        prop_assert!(
                            w[0].used || w[1].used || w[0].extent != w[1].extent,
                            "unmerged free blocks at {} and {}", w[0].start, w[1].start
                        );
                    }
                }
                Op::Free(_) => {}
                Op::BogusFree(addr) => {
                    let before = heap.statistics().unwrap();
                    let addr = VirtualAddress::new(addr);
                    prop_assert_eq!(heap.deallocate(addr, "bogus"), Err(HeapError::NoSuchBlock(addr)));
                    prop_assert_eq!(heap.statistics().unwrap(), before);
                }
            }

            let stats = heap.statistics().unwrap();
            prop_assert_eq!(stats.used_bytes, live.iter().map(|&(_, n)| n).sum::<u64>());
            prop_assert_eq!(stats.total_bytes, pages.outstanding_bytes());
            prop_assert!(stats.total_descriptor_slots >= slots);
            slots = stats.total_descriptor_slots;
            prop_assert!(heap.check().is_ok());
        }

        let extents: HashSet<_> = heap
            .blocks()
            .unwrap()
            .iter()
            .map(|b| b.extent.start)
            .collect();
        prop_assert_eq!(extents.len(), pages.outstanding());

        for (a, _) in live.drain(..) {
            heap.deallocate(a, "prop").unwrap();
        }
        let stats = heap.statistics().unwrap();
        prop_assert_eq!(stats.used_bytes, 0);
        prop_assert_eq!(stats.total_bytes, 0);
        prop_assert_eq!(pages.outstanding(), 0);
    }
}
