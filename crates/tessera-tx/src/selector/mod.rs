//! Transaction selection.
//!
//! The selector picks, from the pending pool, a profitable subset that forms a valid batch
//! together with the mandatory L1-user transactions and any synthesised L1-coordinator
//! account creations. Constraints enforced here: batch capacity, sender existence/token/nonce,
//! sequential balance coverage, recipient reachability (creating accounts where allowed), and
//! atomic-group all-or-nothing semantics.
//!
//! Selection runs single-task over a private fork of the synchronizer's state: candidate
//! transactions are classified as selected, not-yet-selectable (retried after later passes
//! advance nonces and balances) or discarded (annotated for the pool). If any member of an
//! atomic group fails, the whole attempt rolls back to the pre-selection checkpoint and
//! restarts with that group excluded.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use ethereum_types::Address;
use tessera_objects::{
    atomic::request_offset_relative_position, crypto::BjjPubkeyComp, AtomicGroupId, BatchNum, Idx,
    L1Tx, PoolL2Tx, TxId, TxType, FF_ADDR,
};
use tessera_state::{LocalStateDb, Mode, StateDb};
use tracing::{debug, info};

use crate::{
    errors::SelectorError,
    pool::TxPool,
    processor::{Config, TxProcessor},
};

pub mod reason;

// COORDINATOR ACCOUNT
// ================================================================================================

/// The operator identity used to synthesise account-creation transactions: fee-collection
/// accounts are opened under this address and key.
#[derive(Debug, Clone)]
pub struct CoordAccount {
    pub addr: Address,
    pub bjj: BjjPubkeyComp,
    /// The operator's own account-creation authorization, submitted alongside synthesised
    /// creations of coordinator accounts.
    pub account_creation_auth: Vec<u8>,
}

// SELECTION RESULT
// ================================================================================================

/// The batch bundle a selection produces, in the order the processor will replay it.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Coordinator accounts that collect this batch's fees, ascending.
    pub coord_idxs: Vec<Idx>,
    /// Account-creation authorizations consumed by the synthesised L1-coordinator
    /// transactions.
    pub acc_creation_auths: Vec<Vec<u8>>,
    pub l1_user_txs: Vec<L1Tx>,
    pub l1_coordinator_txs: Vec<L1Tx>,
    pub selected_l2_txs: Vec<PoolL2Tx>,
    /// Transactions left out, each annotated with the reason; unforgeable ones carry the
    /// invalid state for the pool to persist.
    pub discarded_l2_txs: Vec<PoolL2Tx>,
}

/// Why an atomic group was excluded, keyed to the member that caused it.
#[derive(Debug, Clone)]
struct FailedGroup {
    failed_tx_id: TxId,
    code: i32,
    kind: String,
    message: String,
}

enum Outcome {
    Selected(PoolL2Tx),
    /// Not selectable against current state, may become so after other selections.
    NotYet(PoolL2Tx),
    /// Permanently out for this batch; annotated.
    Discarded(PoolL2Tx),
}

enum Pass {
    Done(Box<Scratch>),
    Restart(AtomicGroupId, FailedGroup),
}

struct Scratch {
    l1_user_txs: Vec<L1Tx>,
    l1_coordinator_txs: Vec<L1Tx>,
    selected: Vec<PoolL2Tx>,
    discarded: Vec<PoolL2Tx>,
    acc_auths: Vec<Vec<u8>>,
    coord_idxs: Vec<Idx>,
    fees: Vec<(Idx, ethereum_types::U256)>,
}

// TX SELECTOR
// ================================================================================================

/// The admission and ordering engine for one coordinator.
pub struct TxSelector<P: TxPool> {
    pool: P,
    local: LocalStateDb,
    coord: CoordAccount,
}

impl<P: TxPool> TxSelector<P> {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a selector working on a private, treeless fork of the synchronizer's state.
    pub fn new(coord: CoordAccount, sync: Arc<RwLock<StateDb>>, pool: P) -> Self {
        Self {
            pool,
            local: LocalStateDb::new(Mode::TxSelector, 0, sync),
            coord,
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the local state fork.
    pub fn local_state(&self) -> &StateDb {
        &self.local
    }

    /// Returns the pool backend.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Returns the pool backend mutably, for lifecycle writes after a batch is forged.
    pub fn pool_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    /// Rewinds the local state, re-forking from the synchronizer when the flag is set.
    pub fn reset(&mut self, batch_num: BatchNum, from_synchronizer: bool) -> Result<(), SelectorError> {
        Ok(self.local.reset(batch_num, from_synchronizer)?)
    }

    // SELECTION
    // --------------------------------------------------------------------------------------------

    /// Selects L2 transactions only; used when no L1-user queue is due.
    pub fn get_l2_tx_selection(
        &mut self,
        config: &Config,
        l1_user_future_txs: &[L1Tx],
    ) -> Result<Selection, SelectorError> {
        self.get_l1_l2_tx_selection(config, Vec::new(), l1_user_future_txs)
    }

    /// Selects the L1 + L2 transaction bundle for the next batch.
    ///
    /// `l1_user_txs` are mandatory and applied first, in their queue order. `l1_user_future_txs`
    /// are known to be queued but not forgeable yet; destinations they will create are not
    /// duplicated by synthesised coordinator transactions.
    pub fn get_l1_l2_tx_selection(
        &mut self,
        config: &Config,
        l1_user_txs: Vec<L1Tx>,
        l1_user_future_txs: &[L1Tx],
    ) -> Result<Selection, SelectorError> {
        let pending = self.pool.pending_txs()?;
        let batch_start = self.local.current_batch();
        let mut failed_groups: HashMap<AtomicGroupId, FailedGroup> = HashMap::new();

        loop {
            let pass = self.selection_attempt(
                config,
                &l1_user_txs,
                l1_user_future_txs,
                &pending,
                &failed_groups,
            )?;
            match pass {
                Pass::Restart(group_id, failed) => {
                    debug!(group = %group_id, tx = %failed.failed_tx_id, "atomic group failed, restarting selection");
                    failed_groups.insert(group_id, failed);
                    self.local.reset(batch_start, false)?;
                }
                Pass::Done(scratch) => {
                    let scratch = *scratch;
                    for (idx, fee) in scratch.fees {
                        if fee.is_zero() {
                            continue;
                        }
                        let mut account = self.local.get_account(idx)?;
                        account.balance += fee;
                        self.local.update_account(idx, account)?;
                    }
                    self.local.make_checkpoint();
                    info!(
                        n_l1_user = scratch.l1_user_txs.len(),
                        n_l1_coord = scratch.l1_coordinator_txs.len(),
                        n_selected = scratch.selected.len(),
                        n_discarded = scratch.discarded.len(),
                        "selection complete"
                    );
                    return Ok(Selection {
                        coord_idxs: scratch.coord_idxs,
                        acc_creation_auths: scratch.acc_auths,
                        l1_user_txs: scratch.l1_user_txs,
                        l1_coordinator_txs: scratch.l1_coordinator_txs,
                        selected_l2_txs: scratch.selected,
                        discarded_l2_txs: scratch.discarded,
                    });
                }
            }
        }
    }

    /// Runs one selection attempt against the current local state. The caller owns the
    /// rollback when the attempt reports an atomic-group failure.
    fn selection_attempt(
        &mut self,
        config: &Config,
        l1_user_txs: &[L1Tx],
        l1_user_future_txs: &[L1Tx],
        pending: &[PoolL2Tx],
        failed_groups: &HashMap<AtomicGroupId, FailedGroup>,
    ) -> Result<Pass, SelectorError> {
        let pool = &self.pool;
        let coord = &self.coord;
        let mut tp = TxProcessor::new(&mut self.local, config.clone());

        let mut l1_user = l1_user_txs.to_vec();
        for tx in l1_user.iter_mut() {
            tp.process_l1_tx(tx)?;
        }

        let (selectable, mut discarded) = filter_failed_atomic_groups(pending.to_vec(), failed_groups);
        let (selectable, invalid) = filter_invalid_atomic_groups(selectable);
        discarded.extend(invalid);

        if selectable.is_empty() {
            return Ok(Pass::Done(Box::new(Scratch {
                l1_user_txs: l1_user,
                l1_coordinator_txs: Vec::new(),
                selected: Vec::new(),
                discarded,
                acc_auths: Vec::new(),
                coord_idxs: Vec::new(),
                fees: Vec::new(),
            })));
        }

        let group_fees = atomic_groups_average_fee(&selectable);
        let mut to_try = sort_l2_txs(selectable, &group_fees);

        let mut selected: Vec<PoolL2Tx> = Vec::new();
        let mut l1_coord: Vec<L1Tx> = Vec::new();
        let mut acc_auths: Vec<Vec<u8>> = Vec::new();

        loop {
            let mut non_selected: Vec<PoolL2Tx> = Vec::new();
            let selected_before = selected.len();
            for tx in to_try {
                let outcome = try_select(
                    &mut tp,
                    pool,
                    coord,
                    config,
                    tx,
                    l1_user.len(),
                    &mut l1_coord,
                    &mut acc_auths,
                    selected.len(),
                    l1_user_future_txs,
                )?;
                match outcome {
                    Outcome::Selected(tx) => selected.push(tx),
                    Outcome::NotYet(tx) | Outcome::Discarded(tx) if tx.is_atomic() => {
                        return Ok(Pass::Restart(tx.atomic_group_id, FailedGroup::from_tx(&tx)));
                    }
                    Outcome::NotYet(tx) => non_selected.push(tx),
                    Outcome::Discarded(tx) => discarded.push(tx),
                }
            }
            if selected.len() == selected_before {
                // nothing moved this pass; what is left stays pending with its annotation
                discarded.extend(non_selected);
                break;
            }
            to_try = non_selected;
        }

        let mut coord_idx_set: BTreeSet<Idx> = BTreeSet::new();
        for tx in &selected {
            let token_id = tp.state().get_account(tx.from_idx)?.token_id;
            let idx = tp
                .state()
                .get_idx_by_eth_addr_bjj(coord.addr, coord.bjj, token_id)?;
            coord_idx_set.insert(idx);
        }
        let fees = tp.accumulated_fees().iter().map(|(i, f)| (*i, *f)).collect();

        Ok(Pass::Done(Box::new(Scratch {
            l1_user_txs: l1_user,
            l1_coordinator_txs: l1_coord,
            selected,
            discarded,
            acc_auths,
            coord_idxs: coord_idx_set.into_iter().collect(),
            fees,
        })))
    }
}

impl FailedGroup {
    fn from_tx(tx: &PoolL2Tx) -> Self {
        Self {
            failed_tx_id: tx.tx_id,
            code: tx.error_code,
            kind: tx.error_type.clone(),
            message: tx.info.clone(),
        }
    }
}

// PER-TRANSACTION VERIFICATION
// ================================================================================================

/// Classifies one candidate against the state the processor has built so far, synthesising
/// coordinator account creations on the way. Mirrors the checks the processor will re-run,
/// because each selection mutates the state the next candidate sees.
#[allow(clippy::too_many_arguments)]
fn try_select<P: TxPool>(
    tp: &mut TxProcessor<'_>,
    pool: &P,
    coord: &CoordAccount,
    config: &Config,
    mut tx: PoolL2Tx,
    n_l1_user: usize,
    l1_coord: &mut Vec<L1Tx>,
    acc_auths: &mut Vec<Vec<u8>>,
    n_selected: usize,
    l1_user_future_txs: &[L1Tx],
) -> Result<Outcome, SelectorError> {
    if n_l1_user + l1_coord.len() + n_selected >= config.max_tx as usize {
        reason::annotate(&mut tx, reason::BATCH_FULL, "batch capacity reached", false);
        return Ok(Outcome::NotYet(tx));
    }

    let sender = match tp.state().get_account(tx.from_idx) {
        Ok(account) => account,
        Err(_) => {
            reason::annotate(&mut tx, reason::SENDER_NOT_FOUND, "sender account not found", true);
            return Ok(Outcome::Discarded(tx));
        }
    };
    if tx.token_id != sender.token_id {
        reason::annotate(&mut tx, reason::TOKEN_MISMATCH, "transaction token does not match sender account", true);
        return Ok(Outcome::Discarded(tx));
    }
    if tx.tx_type == TxType::Exit && tx.amount.is_zero() {
        reason::annotate(&mut tx, reason::EXIT_ZERO_AMOUNT, "exit with zero amount", true);
        return Ok(Outcome::Discarded(tx));
    }
    if tx.nonce < sender.nonce {
        reason::annotate(&mut tx, reason::NONCE_TOO_LOW, "transaction nonce below account nonce", true);
        return Ok(Outcome::Discarded(tx));
    }
    if tx.nonce > sender.nonce {
        reason::annotate(&mut tx, reason::NONCE_IN_FUTURE, "transaction nonce ahead of account nonce", false);
        return Ok(Outcome::NotYet(tx));
    }
    let fee = match tx.fee.fee_amount(tx.amount) {
        Ok(fee) => fee,
        Err(_) => {
            reason::annotate(&mut tx, reason::FEE_OVERFLOW, "fee is not computable for this amount", true);
            return Ok(Outcome::Discarded(tx));
        }
    };
    if sender.balance < tx.amount + fee {
        reason::annotate(&mut tx, reason::INSUFFICIENT_BALANCE, "sender balance cannot cover amount plus fee", false);
        return Ok(Outcome::NotYet(tx));
    }

    // fee-collection account for the sender token
    let coord_idx = match tp
        .state()
        .get_idx_by_eth_addr_bjj(coord.addr, coord.bjj, sender.token_id)
    {
        Ok(idx) => idx,
        Err(_) => {
            if !can_add_l2_tx_needing_l1_coord_tx(n_l1_user + l1_coord.len(), n_selected, config) {
                reason::annotate(&mut tx, reason::BATCH_FULL, "no slot left for the fee-collection account creation", false);
                return Ok(Outcome::NotYet(tx));
            }
            let mut coord_tx = L1Tx::new_coordinator_create_account(
                coord.addr,
                coord.bjj,
                sender.token_id,
                n_l1_user + l1_coord.len(),
            );
            tp.process_l1_tx(&mut coord_tx)?;
            l1_coord.push(coord_tx);
            tp.state()
                .get_idx_by_eth_addr_bjj(coord.addr, coord.bjj, sender.token_id)?
        }
    };
    tp.register_coord_idx(sender.token_id, coord_idx);

    // destination
    match tx.tx_type {
        TxType::Transfer => match tp.state().get_account(tx.to_idx) {
            Ok(recipient) if recipient.token_id == tx.token_id => {}
            Ok(_) => {
                reason::annotate(&mut tx, reason::TOKEN_MISMATCH, "destination account holds a different token", true);
                return Ok(Outcome::Discarded(tx));
            }
            Err(_) => {
                reason::annotate(&mut tx, reason::RECIPIENT_NOT_FOUND, "destination account not found", true);
                return Ok(Outcome::Discarded(tx));
            }
        },
        TxType::Exit => {}
        TxType::TransferToEthAddr | TxType::TransferToBjj => {
            let lookup = if tx.tx_type == TxType::TransferToEthAddr {
                tp.state().get_idx_by_eth_addr(tx.to_eth_addr, tx.token_id)
            } else {
                tp.state().get_idx_by_eth_addr_bjj(FF_ADDR, tx.to_bjj, tx.token_id)
            };
            match lookup {
                Ok(idx) => tx.aux_to_idx = idx,
                Err(_) => {
                    if future_creates_destination(l1_user_future_txs, &tx) {
                        reason::annotate(&mut tx, reason::PENDING_CREATION, "destination will be created by a queued L1 transaction", false);
                        return Ok(Outcome::Discarded(tx));
                    }
                    let (account_bjj, auth_signature) = if tx.tx_type == TxType::TransferToEthAddr {
                        match pool.account_creation_auth(tx.to_eth_addr)? {
                            Some(auth) => (auth.bjj, Some(auth.signature)),
                            None => {
                                reason::annotate(&mut tx, reason::MISSING_AUTH, "destination address has no account-creation authorization", true);
                                return Ok(Outcome::Discarded(tx));
                            }
                        }
                    } else {
                        (tx.to_bjj, None)
                    };
                    if !can_add_l2_tx_needing_l1_coord_tx(n_l1_user + l1_coord.len(), n_selected, config) {
                        reason::annotate(&mut tx, reason::BATCH_FULL, "no slot left for the destination account creation", false);
                        return Ok(Outcome::NotYet(tx));
                    }
                    let addr = if tx.tx_type == TxType::TransferToEthAddr {
                        tx.to_eth_addr
                    } else {
                        FF_ADDR
                    };
                    let mut create_tx = L1Tx::new_coordinator_create_account(
                        addr,
                        account_bjj,
                        tx.token_id,
                        n_l1_user + l1_coord.len(),
                    );
                    tp.process_l1_tx(&mut create_tx)?;
                    l1_coord.push(create_tx);
                    if let Some(signature) = auth_signature {
                        acc_auths.push(signature);
                    }
                    tx.aux_to_idx = if tx.tx_type == TxType::TransferToEthAddr {
                        tp.state().get_idx_by_eth_addr(tx.to_eth_addr, tx.token_id)?
                    } else {
                        tp.state().get_idx_by_eth_addr_bjj(FF_ADDR, tx.to_bjj, tx.token_id)?
                    };
                }
            }
        }
        _ => {
            reason::annotate(&mut tx, reason::MALFORMED, "transaction type cannot be forged from the pool", true);
            return Ok(Outcome::Discarded(tx));
        }
    }

    let mut applied = tx.clone();
    match tp.process_l2_tx(&mut applied) {
        Ok(()) => Ok(Outcome::Selected(applied)),
        Err(err) => {
            reason::annotate(&mut tx, reason::PROCESSOR_REJECTED, err.to_string(), false);
            Ok(Outcome::Discarded(tx))
        }
    }
}

fn can_add_l2_tx_needing_l1_coord_tx(n_l1: usize, n_l2: usize, config: &Config) -> bool {
    n_l1 < config.max_l1_tx as usize && n_l1 + n_l2 + 1 < config.max_tx as usize
}

fn future_creates_destination(future: &[L1Tx], tx: &PoolL2Tx) -> bool {
    future.iter().any(|l1| {
        l1.tx_type.creates_account()
            && l1.token_id == tx.token_id
            && match tx.tx_type {
                TxType::TransferToEthAddr => l1.from_eth_addr == tx.to_eth_addr,
                TxType::TransferToBjj => l1.from_bjj == tx.to_bjj,
                _ => false,
            }
    })
}

// POOL FILTERS
// ================================================================================================

/// Splits off transactions whose atomic group already failed in this selection round,
/// annotating them with the original failure.
fn filter_failed_atomic_groups(
    txs: Vec<PoolL2Tx>,
    failed_groups: &HashMap<AtomicGroupId, FailedGroup>,
) -> (Vec<PoolL2Tx>, Vec<PoolL2Tx>) {
    let mut selectable = Vec::new();
    let mut discarded = Vec::new();
    for mut tx in txs {
        if !tx.is_atomic() {
            selectable.push(tx);
            continue;
        }
        match failed_groups.get(&tx.atomic_group_id) {
            None => selectable.push(tx),
            Some(failed) => {
                if tx.tx_id == failed.failed_tx_id {
                    tx.error_code = failed.code;
                    tx.error_type = failed.kind.clone();
                    tx.info = failed.message.clone();
                } else {
                    let message = format!(
                        "unselectable atomic group {}: transaction {} failed: {}",
                        tx.atomic_group_id, failed.failed_tx_id, failed.message
                    );
                    reason::annotate(&mut tx, reason::FAILED_ATOMIC_GROUP, message, false);
                }
                discarded.push(tx);
            }
        }
    }
    (selectable, discarded)
}

/// Materialises atomic groups and validates every request link; groups failing validation are
/// discarded wholesale.
fn filter_invalid_atomic_groups(txs: Vec<PoolL2Tx>) -> (Vec<PoolL2Tx>, Vec<PoolL2Tx>) {
    let mut selectable = Vec::new();
    let mut group_order: Vec<AtomicGroupId> = Vec::new();
    let mut groups: HashMap<AtomicGroupId, Vec<PoolL2Tx>> = HashMap::new();
    for tx in txs {
        if !tx.is_atomic() {
            selectable.push(tx);
            continue;
        }
        let entry = groups.entry(tx.atomic_group_id).or_default();
        if entry.is_empty() {
            group_order.push(tx.atomic_group_id);
        }
        entry.push(tx);
    }

    let mut discarded = Vec::new();
    for group_id in group_order {
        let group = groups.remove(&group_id).expect("group recorded in order list");
        if is_atomic_group_valid(&group) {
            selectable.extend(group);
        } else {
            for mut tx in group {
                reason::annotate(
                    &mut tx,
                    reason::INVALID_ATOMIC_GROUP,
                    "atomic group is malformed or inconsistent",
                    true,
                );
                discarded.push(tx);
            }
        }
    }
    (selectable, discarded)
}

/// Every member's request offset must land inside the group and its `rq_*` fields must match
/// the transaction it points at.
fn is_atomic_group_valid(group: &[PoolL2Tx]) -> bool {
    for (position, tx) in group.iter().enumerate() {
        let Ok(relative) = request_offset_relative_position(tx.rq_offset) else {
            return false;
        };
        let requested_position = position as isize + relative;
        if requested_position < 0 || requested_position >= group.len() as isize {
            return false;
        }
        let requested = &group[requested_position as usize];
        if tx.rq_from_idx != requested.from_idx
            || tx.rq_to_idx != requested.to_idx
            || tx.rq_to_eth_addr != requested.to_eth_addr
            || tx.rq_to_bjj != requested.to_bjj
            || tx.rq_token_id != requested.token_id
            || tx.rq_fee != requested.fee
            || tx.rq_nonce != requested.nonce
            || tx.rq_amount != Some(requested.amount)
        {
            return false;
        }
    }
    true
}

// ORDERING
// ================================================================================================

/// Arithmetic mean of the members' absolute fees, per atomic group.
fn atomic_groups_average_fee(txs: &[PoolL2Tx]) -> HashMap<AtomicGroupId, f64> {
    let mut sums: HashMap<AtomicGroupId, (f64, usize)> = HashMap::new();
    for tx in txs {
        if !tx.is_atomic() {
            continue;
        }
        let entry = sums.entry(tx.atomic_group_id).or_insert((0.0, 0));
        entry.0 += tx.absolute_fee;
        entry.1 += 1;
    }
    sums.into_iter().map(|(id, (sum, n))| (id, sum / n as f64)).collect()
}

/// Orders candidates by profitability: non-atomic transactions by
/// `(absolute_fee desc, from_idx asc, nonce asc)`, atomic groups by their average fee, merged
/// into one sequence. Members of a group stay consecutive and in pool order, since permuting
/// them would break the request offsets. A non-atomic transaction wins fee ties against a
/// group.
fn sort_l2_txs(txs: Vec<PoolL2Tx>, group_fees: &HashMap<AtomicGroupId, f64>) -> Vec<PoolL2Tx> {
    let mut non_atomic: Vec<PoolL2Tx> = Vec::new();
    let mut group_order: Vec<AtomicGroupId> = Vec::new();
    let mut groups: HashMap<AtomicGroupId, Vec<PoolL2Tx>> = HashMap::new();
    for tx in txs {
        if tx.is_atomic() {
            let entry = groups.entry(tx.atomic_group_id).or_default();
            if entry.is_empty() {
                group_order.push(tx.atomic_group_id);
            }
            entry.push(tx);
        } else {
            non_atomic.push(tx);
        }
    }

    let mut atomic_groups: Vec<Vec<PoolL2Tx>> =
        group_order.into_iter().map(|id| groups.remove(&id).expect("grouped")).collect();
    atomic_groups.sort_by(|a, b| {
        let fee_a = group_fees.get(&a[0].atomic_group_id).copied().unwrap_or_default();
        let fee_b = group_fees.get(&b[0].atomic_group_id).copied().unwrap_or_default();
        fee_b.partial_cmp(&fee_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    non_atomic.sort_by(|a, b| {
        b.absolute_fee
            .partial_cmp(&a.absolute_fee)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.from_idx.cmp(&b.from_idx))
            .then_with(|| a.nonce.cmp(&b.nonce))
    });

    let mut sorted = Vec::with_capacity(non_atomic.len() + atomic_groups.iter().map(Vec::len).sum::<usize>());
    let mut next_non_atomic = 0;
    let mut next_group = 0;
    while next_non_atomic < non_atomic.len() && next_group < atomic_groups.len() {
        let group_fee = group_fees
            .get(&atomic_groups[next_group][0].atomic_group_id)
            .copied()
            .unwrap_or_default();
        if non_atomic[next_non_atomic].absolute_fee >= group_fee {
            sorted.push(non_atomic[next_non_atomic].clone());
            next_non_atomic += 1;
        } else {
            sorted.extend(atomic_groups[next_group].drain(..));
            next_group += 1;
        }
    }
    sorted.extend(non_atomic.into_iter().skip(next_non_atomic));
    for group in atomic_groups.into_iter().skip(next_group) {
        sorted.extend(group);
    }
    sorted
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use tessera_objects::{Idx, Nonce, PoolTxState};

    use super::*;

    fn tx(from: u64, nonce: u64, fee: f64) -> PoolL2Tx {
        let mut tx = PoolL2Tx {
            from_idx: Idx::new(from).unwrap(),
            to_idx: Idx::new(256).unwrap(),
            nonce: Nonce::new(nonce).unwrap(),
            absolute_fee: fee,
            ..PoolL2Tx::default()
        };
        tx.tx_id = tx.compute_id();
        tx
    }

    fn atomic_tx(from: u64, nonce: u64, fee: f64, group: u8) -> PoolL2Tx {
        let mut tx = tx(from, nonce, fee);
        tx.atomic_group_id = AtomicGroupId([group; 32]);
        tx
    }

    #[test]
    fn non_atomic_order_is_fee_then_idx_then_nonce() {
        let txs = vec![tx(300, 0, 1.0), tx(257, 1, 5.0), tx(257, 0, 5.0), tx(256, 0, 1.0)];
        let sorted = sort_l2_txs(txs, &HashMap::new());
        let keys: Vec<(u64, u64)> =
            sorted.iter().map(|t| (t.from_idx.as_u64(), t.nonce.as_u64())).collect();
        assert_eq!(keys, vec![(257, 0), (257, 1), (256, 0), (300, 0)]);
    }

    #[test]
    fn atomic_groups_stay_consecutive_and_ordered_by_mean_fee() {
        // group A mean 4.0, group B mean 6.0, singles at 5.0 and 3.0
        let txs = vec![
            atomic_tx(400, 0, 2.0, 1),
            atomic_tx(401, 0, 6.0, 1),
            tx(256, 0, 5.0),
            atomic_tx(500, 0, 6.0, 2),
            tx(257, 0, 3.0),
        ];
        let fees = atomic_groups_average_fee(&txs);
        assert_eq!(fees[&AtomicGroupId([1; 32])], 4.0);
        assert_eq!(fees[&AtomicGroupId([2; 32])], 6.0);

        let sorted = sort_l2_txs(txs, &fees);
        let froms: Vec<u64> = sorted.iter().map(|t| t.from_idx.as_u64()).collect();
        // B (6.0) first, then the 5.0 single, then A keeping internal order, then the 3.0 single
        assert_eq!(froms, vec![500, 256, 400, 401, 257]);
    }

    #[test]
    fn non_atomic_wins_fee_ties_against_groups() {
        let txs = vec![atomic_tx(400, 0, 5.0, 1), tx(256, 0, 5.0)];
        let fees = atomic_groups_average_fee(&txs);
        let sorted = sort_l2_txs(txs, &fees);
        assert_eq!(sorted[0].from_idx.as_u64(), 256);
    }

    #[test]
    fn invalid_groups_are_discarded_wholesale() {
        let mut a = atomic_tx(400, 0, 1.0, 1);
        let mut b = atomic_tx(401, 0, 1.0, 1);
        // link a <-> b correctly
        a.rq_offset = 1;
        a.rq_from_idx = b.from_idx;
        a.rq_to_idx = b.to_idx;
        a.rq_amount = Some(b.amount);
        b.rq_offset = 7;
        b.rq_from_idx = a.from_idx;
        b.rq_to_idx = a.to_idx;
        b.rq_amount = Some(a.amount);

        let (selectable, discarded) = filter_invalid_atomic_groups(vec![a.clone(), b.clone()]);
        assert_eq!(selectable.len(), 2);
        assert!(discarded.is_empty());

        // break one link: the whole group goes
        b.rq_from_idx = Idx::new(999).unwrap();
        let (selectable, discarded) = filter_invalid_atomic_groups(vec![a, b]);
        assert!(selectable.is_empty());
        assert_eq!(discarded.len(), 2);
        assert!(discarded.iter().all(|t| t.state == PoolTxState::Invalid));
    }

    #[test]
    fn failed_group_filter_annotates_members() {
        let a = atomic_tx(400, 0, 1.0, 1);
        let single = tx(256, 0, 1.0);
        let mut failed = HashMap::new();
        failed.insert(
            AtomicGroupId([1; 32]),
            FailedGroup {
                failed_tx_id: a.tx_id,
                code: reason::INSUFFICIENT_BALANCE,
                kind: reason::kind(reason::INSUFFICIENT_BALANCE).to_string(),
                message: "sender balance cannot cover amount plus fee".into(),
            },
        );
        let (selectable, discarded) = filter_failed_atomic_groups(vec![a, single], &failed);
        assert_eq!(selectable.len(), 1);
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].error_code, reason::INSUFFICIENT_BALANCE);
    }
}
