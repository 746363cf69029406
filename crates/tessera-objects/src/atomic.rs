//! Atomic-group plumbing shared by pool admission and transaction selection.
//!
//! Both sides need the request-offset table, so it lives here once. The strongly-connected
//! component check runs at admission time: a submission is a single atomic group exactly when
//! every transaction is reachable from every other through the `rq_tx_id` references.

use std::collections::HashMap;

use crate::{errors::TxError, ids::TxId, transaction::PoolL2Tx};

// REQUEST OFFSETS
// ================================================================================================

/// Translates a wire request offset into the relative position of the requested transaction
/// within its atomic group: `1..=3` map to `+1..=+3`, `4..=7` map to `-4..=-1`.
///
/// # Errors
/// Offset 0 is rejected (a transaction that requests nothing cannot be part of an atomic
/// group), as is anything above 7.
pub fn request_offset_relative_position(rq_offset: u8) -> Result<isize, TxError> {
    match rq_offset {
        0 => Err(TxError::RequestOffsetZero),
        1..=3 => Ok(rq_offset as isize),
        4..=7 => Ok(rq_offset as isize - 8),
        _ => Err(TxError::RequestOffsetOutOfRange(rq_offset)),
    }
}

// ATOMIC GROUP DETECTION
// ================================================================================================

/// Returns true iff the transactions form one atomic group: the directed graph with an edge
/// from each transaction to the one its `rq_tx_id` names has a single strongly connected
/// component covering the whole submission.
///
/// A transaction with an empty `rq_tx_id`, or one referencing a transaction outside the
/// submission, breaks atomicity immediately. Runs in O(n + e).
pub fn is_single_atomic_group(txs: &[PoolL2Tx]) -> bool {
    if txs.is_empty() {
        return false;
    }
    let position_of: HashMap<TxId, usize> =
        txs.iter().enumerate().map(|(i, tx)| (tx.tx_id, i)).collect();

    let mut edges = Vec::with_capacity(txs.len());
    for tx in txs {
        if tx.rq_tx_id.is_empty() {
            // this transaction could forge alone, so the group is not atomic
            return false;
        }
        match position_of.get(&tx.rq_tx_id) {
            Some(&target) => edges.push(target),
            None => return false,
        }
    }

    strongly_connected_components(txs.len(), &edges) == 1
}

/// Counts the strongly connected components of a functional graph (one out-edge per node),
/// using an iterative Tarjan walk.
fn strongly_connected_components(n: usize, edges: &[usize]) -> usize {
    const UNVISITED: usize = usize::MAX;

    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = 0usize;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        // each frame is (node, whether its single out-edge was explored)
        let mut call_stack: Vec<(usize, bool)> = vec![(root, false)];
        while let Some((v, explored)) = call_stack.pop() {
            if !explored {
                index[v] = next_index;
                low[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;

                let w = edges[v];
                call_stack.push((v, true));
                if index[w] == UNVISITED {
                    call_stack.push((w, false));
                }
            } else {
                let w = edges[v];
                if on_stack[w] {
                    low[v] = low[v].min(low[w]);
                }
                if low[v] == index[v] {
                    components += 1;
                    while let Some(u) = stack.pop() {
                        on_stack[u] = false;
                        if u == v {
                            break;
                        }
                    }
                }
            }
        }
    }
    components
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Idx, Nonce};

    fn tx(id: u8, rq: Option<u8>) -> PoolL2Tx {
        let mut tx = PoolL2Tx {
            from_idx: Idx::new(256 + id as u64).unwrap(),
            to_idx: Idx::new(256).unwrap(),
            ..PoolL2Tx::default()
        };
        tx.tx_id = TxId::l2(tx.from_idx, Nonce::default());
        if let Some(rq) = rq {
            tx.rq_tx_id = TxId::l2(Idx::new(256 + rq as u64).unwrap(), Nonce::default());
        }
        tx
    }

    #[test]
    fn offset_table() {
        assert!(request_offset_relative_position(0).is_err());
        assert_eq!(request_offset_relative_position(1).unwrap(), 1);
        assert_eq!(request_offset_relative_position(3).unwrap(), 3);
        assert_eq!(request_offset_relative_position(4).unwrap(), -4);
        assert_eq!(request_offset_relative_position(7).unwrap(), -1);
        assert!(request_offset_relative_position(8).is_err());
    }

    #[test]
    fn cycle_is_atomic() {
        // A requests B, B requests C, C requests A
        let txs = vec![tx(0, Some(1)), tx(1, Some(2)), tx(2, Some(0))];
        assert!(is_single_atomic_group(&txs));
    }

    #[test]
    fn two_way_pair_is_atomic() {
        let txs = vec![tx(0, Some(1)), tx(1, Some(0))];
        assert!(is_single_atomic_group(&txs));
    }

    #[test]
    fn external_reference_breaks_atomicity() {
        // C requests a transaction outside the submission
        let txs = vec![tx(0, Some(1)), tx(1, Some(2)), tx(2, Some(9))];
        assert!(!is_single_atomic_group(&txs));
    }

    #[test]
    fn empty_request_breaks_atomicity() {
        let txs = vec![tx(0, Some(1)), tx(1, None)];
        assert!(!is_single_atomic_group(&txs));
    }

    #[test]
    fn two_disjoint_cycles_are_not_one_group() {
        let txs = vec![tx(0, Some(1)), tx(1, Some(0)), tx(2, Some(3)), tx(3, Some(2))];
        assert!(!is_single_atomic_group(&txs));
    }

    #[test]
    fn chain_into_cycle_is_not_one_group() {
        // A -> B, B <-> C: A is not reachable from B or C
        let txs = vec![tx(0, Some(1)), tx(1, Some(2)), tx(2, Some(1))];
        assert!(!is_single_atomic_group(&txs));
    }
}
