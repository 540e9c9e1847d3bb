//! Property-based tests for output resolution and input selection
//!
//! - Merge: resolving A ++ B equals resolving A then B for disjoint id sets
//! - Leniency: one unknown id among N known ones still yields N outputs
//! - Selection: selected inputs are distinct, cover the amount and are
//!   reproducible; otherwise the shortfall is reported

mod common;

use common::{address, client};
use ledger_client::Error;
use node_api::{InMemoryNode, Output, OutputId, TransactionId};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Node holding one output per amount, all owned by the same address
fn funded_node(amounts: &[u64]) -> (Arc<InMemoryNode>, Vec<OutputId>) {
    let node = Arc::new(InMemoryNode::new("node"));
    let ids = amounts
        .iter()
        .map(|amount| node.insert_output(Output::basic(*amount, address(1))))
        .collect();
    (node, ids)
}

/// Amounts plus a permutation of their indices and a split point
fn permuted_amounts() -> impl Strategy<Value = (Vec<u64>, Vec<usize>, usize)> {
    prop::collection::vec(1u64..1_000, 1..20).prop_flat_map(|amounts| {
        let n = amounts.len();
        (
            Just(amounts),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            0..=n,
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: resolution distributes over concatenation of disjoint id lists
    #[test]
    fn prop_get_outputs_merge((amounts, order, split) in permuted_amounts()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (node, ids) = funded_node(&amounts);
            let client = client(&[node]);
            let ordered: Vec<OutputId> = order.iter().map(|i| ids[*i]).collect();
            let (a, b) = ordered.split_at(split);

            let whole = client.get_outputs(&ordered).await.unwrap();
            let mut parts = client.get_outputs(a).await.unwrap();
            parts.extend(client.get_outputs(b).await.unwrap());

            prop_assert_eq!(whole, parts);
            Ok(())
        })?;
    }

    /// Property: an unknown id is dropped without failing the lookup
    #[test]
    fn prop_try_get_outputs_skips_unknown(
        amounts in prop::collection::vec(1u64..1_000, 1..20),
        position in any::<prop::sample::Index>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (node, mut ids) = funded_node(&amounts);
            let client = client(&[node]);
            let unknown = OutputId::new(TransactionId::new([0xee; 32]), 7);
            ids.insert(position.index(ids.len() + 1), unknown);

            let found = client.try_get_outputs(&ids).await;
            prop_assert_eq!(found.len(), amounts.len());
            prop_assert!(found.iter().all(|r| r.output_id != unknown));
            Ok(())
        })?;
    }

    /// Property: selection covers the amount with distinct inputs, deterministically
    #[test]
    fn prop_find_inputs_sound(
        amounts in prop::collection::vec(1u64..500, 0..30),
        requested in 1u64..5_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (node, _) = funded_node(&amounts);
            let client = client(&[node]);
            let available: u64 = amounts.iter().sum();

            match client.find_inputs(&[address(1)], requested).await {
                Ok(selection) => {
                    prop_assert!(available >= requested);
                    prop_assert!(selection.total >= requested);
                    prop_assert_eq!(
                        selection.total,
                        selection.inputs.iter().map(|i| i.amount).sum::<u64>()
                    );
                    let distinct: HashSet<OutputId> = selection.output_ids().into_iter().collect();
                    prop_assert_eq!(distinct.len(), selection.len());

                    let again = client.find_inputs(&[address(1)], requested).await.unwrap();
                    prop_assert_eq!(again, selection);
                }
                Err(Error::InsufficientFunds { available: reported, required }) => {
                    prop_assert_eq!(reported, available);
                    prop_assert_eq!(required, requested);
                    prop_assert!(available < requested);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
            Ok(())
        })?;
    }
}
