//! Deterministic batch execution.
//!
//! A [TxProcessor] replays one batch onto a state store: L1-user, then L1-coordinator, then L2
//! transactions, in the exact order fed to the circuit. It produces the new root, exit
//! information, collected fees and (for the batch builder) the witness bundle. The same code
//! path serves the synchronizer, the batch builder and the selector's shadow store; the store
//! mode decides which outputs are materialised.

use std::collections::BTreeMap;

use ethereum_types::U256;
use tessera_objects::{Account, Idx, L1Tx, Nonce, PoolL2Tx, TokenId, TxType};
use tessera_state::{MerkleProof, MerkleTree, Mode, StateDb};
use tracing::{debug, warn};

use crate::errors::ProcessorError;

mod zk_inputs;
pub use zk_inputs::ZkInputs;

// CONFIG
// ================================================================================================

/// Circuit-imposed batch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Depth of the state and exit trees.
    pub n_levels: u32,
    /// Total transaction slots in a batch.
    pub max_tx: u32,
    /// L1 transaction slots in a batch.
    pub max_l1_tx: u32,
    /// Distinct coordinator fee-collection slots in a batch.
    pub max_fee_tx: u32,
    /// Chain id folded into every L2 signature.
    pub chain_id: u16,
}

// OUTPUT
// ================================================================================================

/// One exit-tree leaf: how much the account can withdraw on L1 after this batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub idx: Idx,
    pub balance: U256,
    /// Membership proof in this batch's exit tree.
    pub proof: MerkleProof,
}

/// Everything a batch application produces.
#[derive(Debug, Clone)]
pub struct ProcessTxOutput {
    /// Accounts created by this batch; populated in [Mode::Synchronizer] only, where it
    /// hydrates the history layer.
    pub created_accounts: Vec<Account>,
    pub exit_infos: Vec<ExitInfo>,
    /// Fees credited per coordinator token.
    pub collected_fees: BTreeMap<TokenId, U256>,
    /// Witness bundle for proof generation; populated in [Mode::BatchBuilder] only.
    pub zk_inputs: Option<ZkInputs>,
    pub new_state_root: U256,
    pub new_exit_root: U256,
}

// TX PROCESSOR
// ================================================================================================

/// The batch execution engine. One instance builds one batch.
pub struct TxProcessor<'a> {
    state: &'a mut StateDb,
    config: Config,
    accumulated_fees: BTreeMap<Idx, U256>,
    coord_idxs_map: BTreeMap<TokenId, Idx>,
    exit_tree: Option<MerkleTree>,
    exit_accounts: BTreeMap<u64, Account>,
    created_accounts: Vec<Account>,
}

impl<'a> TxProcessor<'a> {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a processor over the given store. Stores without a tree (selector mode) skip
    /// the exit tree as well.
    pub fn new(state: &'a mut StateDb, config: Config) -> Self {
        let exit_tree =
            (state.mode() != Mode::TxSelector).then(|| MerkleTree::new(config.n_levels as usize));
        Self {
            state,
            config,
            accumulated_fees: BTreeMap::new(),
            coord_idxs_map: BTreeMap::new(),
            exit_tree,
            exit_accounts: BTreeMap::new(),
            created_accounts: Vec::new(),
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the underlying store.
    pub fn state(&self) -> &StateDb {
        self.state
    }

    /// Returns the fees accrued so far, keyed by coordinator index.
    pub fn accumulated_fees(&self) -> &BTreeMap<Idx, U256> {
        &self.accumulated_fees
    }

    /// Makes the processor accrue fees for a token into the given coordinator index. The
    /// selector registers indexes as it discovers or creates the accounts.
    pub fn register_coord_idx(&mut self, token_id: TokenId, idx: Idx) {
        self.coord_idxs_map.entry(token_id).or_insert(idx);
        self.accumulated_fees.entry(idx).or_insert_with(U256::zero);
    }

    // BATCH APPLICATION
    // --------------------------------------------------------------------------------------------

    /// Applies one batch in canonical order and distributes the accrued fees.
    ///
    /// The transaction slices are mutated in place: L1 transactions get their effective
    /// amounts, L2 transactions get nonces and token ids backfilled when the synchronizer
    /// replays them, and resolved destination indexes are cached.
    ///
    /// # Errors
    /// Any error aborts the batch; the caller owns the reset.
    pub fn process_txs(
        &mut self,
        coord_idxs: &[Idx],
        l1_user_txs: &mut [L1Tx],
        l1_coordinator_txs: &mut [L1Tx],
        l2_txs: &mut [PoolL2Tx],
    ) -> Result<ProcessTxOutput, ProcessorError> {
        let n_l1 = l1_user_txs.len() + l1_coordinator_txs.len();
        let n_tx = n_l1 + l2_txs.len();
        if n_tx > self.config.max_tx as usize {
            return Err(ProcessorError::TooManyTxs { got: n_tx, max: self.config.max_tx });
        }
        if n_l1 > self.config.max_l1_tx as usize {
            return Err(ProcessorError::TooManyL1Txs { got: n_l1, max: self.config.max_l1_tx });
        }

        let old_state_root = self.state.root();
        let old_last_idx = self.state.current_idx();

        for idx in coord_idxs {
            let account = self
                .state
                .get_account(*idx)
                .map_err(|_| ProcessorError::CoordIdxNotFound(*idx))?;
            if self.coord_idxs_map.contains_key(&account.token_id) {
                return Err(ProcessorError::DuplicateCoordToken(account.token_id));
            }
            self.register_coord_idx(account.token_id, *idx);
        }

        for tx in l1_user_txs.iter_mut() {
            self.process_l1_tx(tx)?;
        }
        for tx in l1_coordinator_txs.iter_mut() {
            self.process_l1_tx(tx)?;
        }
        for tx in l2_txs.iter_mut() {
            self.process_l2_tx(tx)?;
        }

        self.distribute_fees()?;

        let collected_fees: BTreeMap<TokenId, U256> = self
            .coord_idxs_map
            .iter()
            .map(|(token, idx)| (*token, self.accumulated_fees[idx]))
            .collect();

        let exit_infos = self.exit_infos();
        let new_state_root = self.state.root();
        let new_exit_root = self
            .exit_tree
            .as_ref()
            .map(|mt| tessera_objects::crypto::fr_to_u256(mt.root()))
            .unwrap_or_default();

        let zk_inputs = (self.state.mode() == Mode::BatchBuilder)
            .then(|| {
                ZkInputs::build(
                    &self.config,
                    old_last_idx,
                    self.state.current_idx(),
                    old_state_root,
                    new_state_root,
                    new_exit_root,
                    l1_user_txs,
                    l1_coordinator_txs,
                    l2_txs,
                    &self.coord_idxs_map,
                )
            })
            .transpose()?;

        debug!(
            n_l1_user = l1_user_txs.len(),
            n_l1_coord = l1_coordinator_txs.len(),
            n_l2 = l2_txs.len(),
            root = %new_state_root,
            "batch applied"
        );

        Ok(ProcessTxOutput {
            created_accounts: std::mem::take(&mut self.created_accounts),
            exit_infos,
            collected_fees,
            zk_inputs,
            new_state_root,
            new_exit_root,
        })
    }

    // L1 EXECUTION
    // --------------------------------------------------------------------------------------------

    /// Applies one L1 transaction. User-origin transactions get their effective amounts
    /// computed first; coordinator transactions are taken at face value.
    pub fn process_l1_tx(&mut self, tx: &mut L1Tx) -> Result<(), ProcessorError> {
        if tx.user_origin {
            self.compute_effective_amounts(tx);
        } else {
            tx.effective_amount = Some(tx.amount);
            tx.effective_deposit_amount = Some(tx.deposit_amount);
        }
        let effective_amount = tx.effective_amount();
        let effective_deposit = tx.effective_deposit_amount();

        match tx.tx_type {
            TxType::CreateAccountDeposit | TxType::CreateAccountDepositTransfer => {
                let idx = Idx::new(self.state.current_idx().as_u64() + 1)
                    .map_err(tessera_objects::TxError::from)?;
                let account = Account {
                    idx,
                    token_id: tx.token_id,
                    nonce: Nonce::default(),
                    balance: effective_deposit,
                    bjj: tx.from_bjj,
                    eth_addr: tx.from_eth_addr,
                };
                self.state.create_account(idx, account.clone())?;
                if self.state.mode() == Mode::Synchronizer {
                    self.created_accounts.push(account);
                }
                if tx.tx_type == TxType::CreateAccountDepositTransfer {
                    self.transfer(idx, tx.to_idx, effective_amount)?;
                }
            }
            TxType::Deposit | TxType::DepositTransfer => {
                let mut account = self.state.get_account(tx.from_idx)?;
                account.balance += effective_deposit;
                self.state.update_account(tx.from_idx, account)?;
                if tx.tx_type == TxType::DepositTransfer {
                    self.transfer(tx.from_idx, tx.to_idx, effective_amount)?;
                }
            }
            TxType::ForceTransfer => {
                self.transfer(tx.from_idx, tx.to_idx, effective_amount)?;
            }
            TxType::ForceExit => {
                let account = self.state.get_account(tx.from_idx)?;
                self.debit(tx.from_idx, effective_amount, U256::zero())?;
                self.exit(&account, effective_amount)?;
            }
            other => return Err(ProcessorError::UnexpectedL1Type(other.to_string())),
        }
        Ok(())
    }

    /// Computes the effective amounts of a user-origin L1 transaction against current state.
    ///
    /// The deposit settles unconditionally: it already happened on L1 and cannot be rejected
    /// here. Only the transfer part is zeroed, by the first failing predicate: sender
    /// existence, sender address proof, token match, funds coverage, recipient existence.
    pub fn compute_effective_amounts(&self, tx: &mut L1Tx) {
        tx.effective_deposit_amount = Some(tx.deposit_amount);
        tx.effective_amount = Some(tx.amount);

        if tx.tx_type == TxType::CreateAccountDeposit {
            return;
        }

        if tx.tx_type.creates_account() {
            // the sender account is being created by this very transaction: only the funds
            // coverage and the recipient checks apply
            if tx.deposit_amount < tx.amount {
                tx.effective_amount = Some(U256::zero());
            }
            if !self.recipient_matches_token(tx) {
                tx.effective_amount = Some(U256::zero());
            }
            return;
        }

        let sender = match self.state.get_account(tx.from_idx) {
            Ok(account) => account,
            Err(_) => {
                tx.effective_amount = Some(U256::zero());
                return;
            }
        };
        if tx.token_id != sender.token_id {
            tx.effective_amount = Some(U256::zero());
            return;
        }
        if tx.from_eth_addr != sender.eth_addr {
            tx.effective_amount = Some(U256::zero());
            return;
        }
        if sender.balance + tx.effective_deposit_amount() < tx.amount {
            tx.effective_amount = Some(U256::zero());
            return;
        }
        if tx.to_idx.is_user() && !self.recipient_matches_token(tx) {
            tx.effective_amount = Some(U256::zero());
        }
    }

    fn recipient_matches_token(&self, tx: &L1Tx) -> bool {
        match self.state.get_account(tx.to_idx) {
            Ok(recipient) => recipient.token_id == tx.token_id,
            Err(_) => false,
        }
    }

    // L2 EXECUTION
    // --------------------------------------------------------------------------------------------

    /// Applies one L2 transaction: nonce check, fee accrual, balance moves.
    pub fn process_l2_tx(&mut self, tx: &mut PoolL2Tx) -> Result<(), ProcessorError> {
        // resolve an address/key destination against current state
        if tx.to_idx == Idx::NONE && tx.aux_to_idx == Idx::NONE {
            tx.aux_to_idx = self
                .state
                .get_idx_by_eth_addr_bjj(tx.to_eth_addr, tx.to_bjj, tx.token_id)
                .map_err(|_| ProcessorError::DestinationNotFound)?;
        }

        let mut sender = self.state.get_account(tx.from_idx)?;
        if self.state.mode() == Mode::Synchronizer {
            // forged batches carry no pool metadata; trust the chain and backfill
            tx.nonce = sender.nonce;
            tx.token_id = sender.token_id;
        }
        if tx.token_id != sender.token_id {
            return Err(ProcessorError::TokenMismatch {
                idx: tx.from_idx,
                account: sender.token_id,
                tx: tx.token_id,
            });
        }
        if tx.nonce != sender.nonce {
            return Err(ProcessorError::NonceMismatch {
                idx: tx.from_idx,
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        let fee = tx.fee.fee_amount(tx.amount)?;
        let required = tx.amount + fee;
        if sender.balance < required {
            return Err(ProcessorError::BalanceInsufficient {
                idx: tx.from_idx,
                balance: sender.balance,
                required,
            });
        }
        sender.balance -= required;
        sender.nonce = sender.nonce.incremented().map_err(tessera_objects::TxError::from)?;
        self.state.update_account(tx.from_idx, sender.clone())?;

        if let Some(coord_idx) = self.coord_idxs_map.get(&sender.token_id) {
            let accrued = self.accumulated_fees.entry(*coord_idx).or_insert_with(U256::zero);
            *accrued += fee;
        } else if !fee.is_zero() {
            warn!(token = %sender.token_id, %fee, "fee accrued to a token with no coordinator index; amount is burned");
        }

        match tx.tx_type {
            TxType::Transfer | TxType::TransferToEthAddr | TxType::TransferToBjj => {
                let to_idx = tx.effective_to_idx();
                let mut recipient = self.state.get_account(to_idx)?;
                recipient.balance += tx.amount;
                self.state.update_account(to_idx, recipient)?;
            }
            TxType::Exit => {
                self.exit(&sender, tx.amount)?;
            }
            other => return Err(ProcessorError::UnexpectedL2Type(other.to_string())),
        }
        Ok(())
    }

    // BALANCE PLUMBING
    // --------------------------------------------------------------------------------------------

    /// Moves `amount` between two accounts; a zero amount is a no-op by construction.
    fn transfer(&mut self, from: Idx, to: Idx, amount: U256) -> Result<(), ProcessorError> {
        self.debit(from, amount, U256::zero())?;
        let mut recipient = self.state.get_account(to)?;
        recipient.balance += amount;
        self.state.update_account(to, recipient)?;
        Ok(())
    }

    fn debit(&mut self, idx: Idx, amount: U256, fee: U256) -> Result<(), ProcessorError> {
        let mut account = self.state.get_account(idx)?;
        let required = amount + fee;
        if account.balance < required {
            return Err(ProcessorError::BalanceInsufficient {
                idx,
                balance: account.balance,
                required,
            });
        }
        account.balance -= required;
        self.state.update_account(idx, account)?;
        Ok(())
    }

    /// Accumulates an exit into the per-batch exit tree. Zero amounts never create leaves.
    fn exit(&mut self, sender: &Account, amount: U256) -> Result<(), ProcessorError> {
        let key = sender.idx.as_u64();
        if !self.exit_accounts.contains_key(&key) {
            if amount.is_zero() {
                return Ok(());
            }
            let leaf = Account {
                idx: sender.idx,
                token_id: sender.token_id,
                nonce: Nonce::default(),
                balance: amount,
                bjj: sender.bjj,
                eth_addr: sender.eth_addr,
            };
            let hash = leaf.hash_value()?;
            if let Some(mt) = self.exit_tree.as_mut() {
                mt.add(key, hash).map_err(tessera_state::StateError::from)?;
            }
            self.exit_accounts.insert(key, leaf);
            return Ok(());
        }
        if amount.is_zero() {
            return Ok(());
        }
        let hash = {
            let leaf = self.exit_accounts.get_mut(&key).expect("presence checked above");
            leaf.balance += amount;
            leaf.hash_value()?
        };
        if let Some(mt) = self.exit_tree.as_mut() {
            mt.update(key, hash).map_err(tessera_state::StateError::from)?;
        }
        Ok(())
    }

    // FEES & EXITS
    // --------------------------------------------------------------------------------------------

    /// Credits the accrued fees to their coordinator accounts.
    fn distribute_fees(&mut self) -> Result<(), ProcessorError> {
        for (idx, fee) in self.accumulated_fees.clone() {
            if fee.is_zero() {
                continue;
            }
            let mut account = self.state.get_account(idx)?;
            account.balance += fee;
            self.state.update_account(idx, account)?;
        }
        Ok(())
    }

    fn exit_infos(&self) -> Vec<ExitInfo> {
        let Some(exit_tree) = self.exit_tree.as_ref() else {
            return Vec::new();
        };
        self.exit_accounts
            .values()
            .map(|leaf| ExitInfo {
                idx: leaf.idx,
                balance: leaf.balance,
                proof: exit_tree.gen_proof(leaf.idx.as_u64()),
            })
            .collect()
    }
}
