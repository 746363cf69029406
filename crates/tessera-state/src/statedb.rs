use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
    sync::{Arc, RwLock},
};

use ethereum_types::{Address, U256};
use tessera_objects::{
    crypto::{fr_to_u256, BjjPubkeyComp},
    Account, AccountError, BatchNum, Idx, TokenId, FF_ADDR, KEEP_CHECKPOINTS_DEFAULT,
};
use tracing::debug;

use crate::{
    errors::StateError,
    merkle::{MerkleProof, MerkleTree},
};

// MODE
// ================================================================================================

/// The operating mode of a state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Tracks the confirmed chain: accounts + tree, and reports created accounts from batch
    /// processing so the history layer can be hydrated.
    Synchronizer,
    /// Accounts + tree, no created-account reporting.
    BatchBuilder,
    /// Shadow store used during selection: accounts only, no tree.
    TxSelector,
}

// BACKING STORE
// ================================================================================================

/// The key-value space of one state version: the `account/{idx}` family, the Merkle-node
/// family, the address/key lookup indexes derived from it, and the allocation counter.
/// Checkpoints are whole-store snapshots, which makes `reset` a swap.
#[derive(Debug, Clone, Default)]
struct Store {
    accounts: BTreeMap<u64, Account>,
    mt: Option<MerkleTree>,
    idx_by_addr: BTreeMap<(Address, TokenId), Idx>,
    idx_by_addr_bjj: BTreeMap<(Address, BjjPubkeyComp, TokenId), Idx>,
    idx_by_bjj: BTreeMap<(BjjPubkeyComp, TokenId), Idx>,
    current_idx: u64,
}

// STATE DB
// ================================================================================================

/// The versioned account store: authoritative account state plus the state Merkle tree, with
/// copy-on-write checkpointing keyed by batch number.
#[derive(Debug, Clone)]
pub struct StateDb {
    mode: Mode,
    n_levels: usize,
    keep: usize,
    current_batch: BatchNum,
    store: Store,
    checkpoints: BTreeMap<u64, Store>,
}

impl StateDb {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Returns an empty store. `n_levels` is ignored in [Mode::TxSelector], which never builds
    /// a tree.
    pub fn new(mode: Mode, n_levels: usize) -> Self {
        Self::with_keep(mode, n_levels, KEEP_CHECKPOINTS_DEFAULT)
    }

    /// Returns an empty store retaining at most `keep` checkpoints.
    pub fn with_keep(mode: Mode, n_levels: usize, keep: usize) -> Self {
        let mt = (mode != Mode::TxSelector).then(|| MerkleTree::new(n_levels));
        Self {
            mode,
            n_levels,
            keep,
            current_batch: BatchNum(0),
            store: Store {
                mt,
                current_idx: Idx::USER_THRESHOLD.as_u64() - 1,
                ..Store::default()
            },
            checkpoints: BTreeMap::new(),
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the operating mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns the tree depth this store was configured with.
    pub fn n_levels(&self) -> usize {
        self.n_levels
    }

    /// Returns the number of the last checkpointed batch.
    pub fn current_batch(&self) -> BatchNum {
        self.current_batch
    }

    /// Returns the last allocated account index.
    pub fn current_idx(&self) -> Idx {
        Idx::new(self.store.current_idx).expect("allocated indexes stay in range")
    }

    /// Returns the state commitment; zero for a treeless store.
    pub fn root(&self) -> U256 {
        self.store.mt.as_ref().map(|mt| fr_to_u256(mt.root())).unwrap_or_default()
    }

    /// Iterates over all accounts in index order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.store.accounts.values()
    }

    // ACCOUNT OPERATIONS
    // --------------------------------------------------------------------------------------------

    /// Creates a new account at the next sequential index.
    ///
    /// # Errors
    /// Fails if the index is reserved, already exists, or would leave an allocation gap.
    pub fn create_account(&mut self, idx: Idx, account: Account) -> Result<(), StateError> {
        if !idx.is_user() {
            return Err(StateError::IdxBelowThreshold(idx));
        }
        if self.store.accounts.contains_key(&idx.as_u64()) {
            return Err(StateError::IdxAlreadyExists(idx));
        }
        let expected = self.store.current_idx + 1;
        if idx.as_u64() != expected {
            return Err(StateError::IdxNotSequential {
                expected: Idx::new(expected).expect("allocated indexes stay in range"),
                got: idx,
            });
        }

        let mut account = account;
        account.idx = idx;
        if let Some(mt) = self.store.mt.as_mut() {
            let leaf = account.hash_value().map_err(AccountError::from)?;
            mt.add(idx.as_u64(), leaf)?;
        }

        // lookup indexes resolve to the oldest matching account, so first writer wins
        if account.eth_addr != FF_ADDR {
            self.store.idx_by_addr.entry((account.eth_addr, account.token_id)).or_insert(idx);
        }
        self.store
            .idx_by_addr_bjj
            .entry((account.eth_addr, account.bjj, account.token_id))
            .or_insert(idx);
        if !account.bjj.is_empty() {
            self.store.idx_by_bjj.entry((account.bjj, account.token_id)).or_insert(idx);
        }

        self.store.current_idx = idx.as_u64();
        self.store.accounts.insert(idx.as_u64(), account);
        Ok(())
    }

    /// Returns a copy of the account at the index.
    pub fn get_account(&self, idx: Idx) -> Result<Account, StateError> {
        self.store.accounts.get(&idx.as_u64()).cloned().ok_or(StateError::IdxNotFound(idx))
    }

    /// Overwrites the account at the index.
    ///
    /// # Errors
    /// Fails if the account does not exist, or the update touches immutable fields or moves
    /// the nonce backwards.
    pub fn update_account(&mut self, idx: Idx, account: Account) -> Result<(), StateError> {
        let current = self.store.accounts.get(&idx.as_u64()).ok_or(StateError::IdxNotFound(idx))?;
        if account.token_id != current.token_id {
            return Err(AccountError::TokenIdChanged {
                idx,
                current: current.token_id,
                new: account.token_id,
            }
            .into());
        }
        if account.bjj != current.bjj || account.eth_addr != current.eth_addr {
            return Err(AccountError::KeysChanged(idx).into());
        }
        if account.nonce < current.nonce {
            return Err(AccountError::NonceNotMonotonic {
                idx,
                current: current.nonce,
                new: account.nonce,
            }
            .into());
        }

        let mut account = account;
        account.idx = idx;
        if let Some(mt) = self.store.mt.as_mut() {
            let leaf = account.hash_value().map_err(AccountError::from)?;
            mt.update(idx.as_u64(), leaf)?;
        }
        self.store.accounts.insert(idx.as_u64(), account);
        Ok(())
    }

    /// Generates a Merkle proof for the account leaf at the index.
    pub fn mt_get_proof(&self, idx: Idx) -> Result<MerkleProof, StateError> {
        let mt = self.store.mt.as_ref().ok_or(StateError::NoMerkleTree)?;
        Ok(mt.gen_proof(idx.as_u64()))
    }

    // LOOKUP INDEXES
    // --------------------------------------------------------------------------------------------

    /// Resolves the oldest account bound to the address for the token.
    pub fn get_idx_by_eth_addr(&self, addr: Address, token_id: TokenId) -> Result<Idx, StateError> {
        self.store
            .idx_by_addr
            .get(&(addr, token_id))
            .copied()
            .ok_or(StateError::CoordinatesNotFound)
    }

    /// Resolves the oldest account bound to the (address, BJJ key) pair for the token. The
    /// all-ones address switches to a key-only lookup, which is how transfers to a bare BJJ
    /// key find their recipient.
    pub fn get_idx_by_eth_addr_bjj(
        &self,
        addr: Address,
        bjj: BjjPubkeyComp,
        token_id: TokenId,
    ) -> Result<Idx, StateError> {
        let found = if addr == FF_ADDR {
            self.store.idx_by_bjj.get(&(bjj, token_id))
        } else {
            self.store.idx_by_addr_bjj.get(&(addr, bjj, token_id))
        };
        found.copied().ok_or(StateError::CoordinatesNotFound)
    }

    // CHECKPOINTS
    // --------------------------------------------------------------------------------------------

    /// Seals all updates since the previous checkpoint under the next batch number.
    pub fn make_checkpoint(&mut self) -> BatchNum {
        self.current_batch = self.current_batch.next();
        self.checkpoints.insert(self.current_batch.0, self.store.clone());
        while self.checkpoints.len() > self.keep {
            let oldest = *self.checkpoints.keys().next().expect("non-empty map");
            self.checkpoints.remove(&oldest);
        }
        debug!(batch = %self.current_batch, root = %self.root(), "made checkpoint");
        self.current_batch
    }

    /// Discards all state strictly later than the given checkpoint.
    ///
    /// # Errors
    /// Fails when resetting forward, or past the retention window.
    pub fn reset(&mut self, batch_num: BatchNum) -> Result<(), StateError> {
        if batch_num > self.current_batch {
            return Err(StateError::ResetForward {
                current: self.current_batch,
                target: batch_num,
            });
        }
        if batch_num.0 == 0 {
            let fresh = Self::with_keep(self.mode, self.n_levels, self.keep);
            self.store = fresh.store;
        } else {
            let snapshot = self
                .checkpoints
                .get(&batch_num.0)
                .ok_or(StateError::CheckpointNotFound(batch_num))?;
            self.store = snapshot.clone();
        }
        self.current_batch = batch_num;
        self.checkpoints.retain(|&b, _| b <= batch_num.0);
        debug!(batch = %batch_num, "reset state");
        Ok(())
    }

    /// Forks this store's current state from another store's checkpoint, dropping the tree if
    /// this store runs without one.
    fn fork_from(&mut self, source: &StateDb, batch_num: BatchNum) -> Result<(), StateError> {
        let snapshot = if batch_num.0 == 0 {
            Self::with_keep(source.mode, source.n_levels, self.keep).store
        } else {
            source
                .checkpoints
                .get(&batch_num.0)
                .cloned()
                .ok_or(StateError::CheckpointNotFound(batch_num))?
        };
        self.store = snapshot;
        if self.mode == Mode::TxSelector {
            self.store.mt = None;
        }
        self.current_batch = batch_num;
        self.checkpoints.retain(|&b, _| b <= batch_num.0);
        self.checkpoints.insert(batch_num.0, self.store.clone());
        Ok(())
    }
}

// LOCAL STATE DB
// ================================================================================================

/// A private fork of the Synchronizer's state used while building one batch.
///
/// The Synchronizer's store is read-only from here; `reset(_, true)` re-forks from its
/// checkpoint, `reset(_, false)` rolls back local work only (the selector's atomic-group
/// restart path).
#[derive(Debug)]
pub struct LocalStateDb {
    db: StateDb,
    sync: Arc<RwLock<StateDb>>,
}

impl LocalStateDb {
    /// Creates a local fork. [Mode::TxSelector] drops the tree; [Mode::BatchBuilder] keeps it.
    pub fn new(mode: Mode, n_levels: usize, sync: Arc<RwLock<StateDb>>) -> Self {
        Self {
            db: StateDb::new(mode, n_levels),
            sync,
        }
    }

    /// Resets to the given batch, re-forking from the Synchronizer when the flag is set.
    pub fn reset(&mut self, batch_num: BatchNum, from_synchronizer: bool) -> Result<(), StateError> {
        if from_synchronizer {
            let sync = self.sync.read().expect("synchronizer state lock poisoned");
            self.db.fork_from(&sync, batch_num)
        } else {
            self.db.reset(batch_num)
        }
    }
}

impl Deref for LocalStateDb {
    type Target = StateDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl DerefMut for LocalStateDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.db
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use tessera_objects::Nonce;

    use super::*;

    fn account(idx: u64, token: u32, balance: u64) -> Account {
        Account {
            idx: Idx::new(idx).unwrap(),
            token_id: TokenId(token),
            nonce: Nonce::default(),
            balance: U256::from(balance),
            bjj: BjjPubkeyComp([idx as u8; 32]),
            eth_addr: Address::from_low_u64_be(idx),
        }
    }

    fn idx(v: u64) -> Idx {
        Idx::new(v).unwrap()
    }

    #[test]
    fn create_account_enforces_threshold_and_sequence() {
        let mut db = StateDb::new(Mode::Synchronizer, 32);
        assert!(matches!(
            db.create_account(idx(10), account(10, 0, 0)),
            Err(StateError::IdxBelowThreshold(_))
        ));
        assert!(matches!(
            db.create_account(idx(300), account(300, 0, 0)),
            Err(StateError::IdxNotSequential { .. })
        ));
        db.create_account(idx(256), account(256, 0, 0)).unwrap();
        assert!(matches!(
            db.create_account(idx(256), account(256, 0, 0)),
            Err(StateError::IdxAlreadyExists(_))
        ));
        db.create_account(idx(257), account(257, 0, 0)).unwrap();
        assert_eq!(db.current_idx(), idx(257));
    }

    #[test]
    fn update_account_guards_immutable_fields() {
        let mut db = StateDb::new(Mode::Synchronizer, 32);
        db.create_account(idx(256), account(256, 0, 100)).unwrap();

        let mut changed = account(256, 1, 100);
        changed.bjj = account(256, 0, 100).bjj;
        changed.eth_addr = account(256, 0, 100).eth_addr;
        assert!(db.update_account(idx(256), changed).is_err());

        let mut rekeyed = account(256, 0, 100);
        rekeyed.bjj = BjjPubkeyComp([9u8; 32]);
        assert!(db.update_account(idx(256), rekeyed).is_err());

        let mut ok = account(256, 0, 100);
        ok.balance = U256::from(50u64);
        ok.nonce = Nonce::new(1).unwrap();
        db.update_account(idx(256), ok).unwrap();

        let mut back = account(256, 0, 100);
        back.nonce = Nonce::default();
        assert!(db.update_account(idx(256), back).is_err());
    }

    #[test]
    fn root_reflects_updates_and_reset_restores_it() {
        let mut db = StateDb::new(Mode::Synchronizer, 32);
        db.create_account(idx(256), account(256, 0, 100)).unwrap();
        db.make_checkpoint();
        let root_1 = db.root();

        db.create_account(idx(257), account(257, 0, 200)).unwrap();
        db.make_checkpoint();
        assert_ne!(db.root(), root_1);

        db.reset(BatchNum(1)).unwrap();
        assert_eq!(db.root(), root_1);
        assert!(db.get_account(idx(257)).is_err());
        // allocation counter rolled back with the snapshot
        assert_eq!(db.current_idx(), idx(256));
    }

    #[test]
    fn reset_to_zero_clears_everything() {
        let mut db = StateDb::new(Mode::BatchBuilder, 32);
        db.create_account(idx(256), account(256, 0, 100)).unwrap();
        db.make_checkpoint();
        db.reset(BatchNum(0)).unwrap();
        assert_eq!(db.root(), U256::zero());
        assert_eq!(db.current_batch(), BatchNum(0));
        assert!(db.get_account(idx(256)).is_err());
    }

    #[test]
    fn lookup_indexes_resolve_oldest_match() {
        let mut db = StateDb::new(Mode::Synchronizer, 32);
        let first = account(256, 0, 0);
        let mut second = account(257, 0, 0);
        second.eth_addr = first.eth_addr;
        second.bjj = first.bjj;
        db.create_account(idx(256), first.clone()).unwrap();
        db.create_account(idx(257), second).unwrap();

        assert_eq!(db.get_idx_by_eth_addr(first.eth_addr, TokenId(0)).unwrap(), idx(256));
        assert_eq!(
            db.get_idx_by_eth_addr_bjj(first.eth_addr, first.bjj, TokenId(0)).unwrap(),
            idx(256)
        );
        // key-only lookup through the all-ones address
        assert_eq!(db.get_idx_by_eth_addr_bjj(FF_ADDR, first.bjj, TokenId(0)).unwrap(), idx(256));
        assert!(db.get_idx_by_eth_addr(first.eth_addr, TokenId(9)).is_err());
    }

    #[test]
    fn tx_selector_mode_has_no_tree() {
        let mut db = StateDb::new(Mode::TxSelector, 0);
        db.create_account(idx(256), account(256, 0, 100)).unwrap();
        assert_eq!(db.root(), U256::zero());
        assert!(matches!(db.mt_get_proof(idx(256)), Err(StateError::NoMerkleTree)));
    }

    #[test]
    fn local_fork_tracks_synchronizer_checkpoints() {
        let mut sync = StateDb::new(Mode::Synchronizer, 32);
        sync.create_account(idx(256), account(256, 0, 100)).unwrap();
        sync.make_checkpoint();
        let sync = Arc::new(RwLock::new(sync));

        let mut local = LocalStateDb::new(Mode::TxSelector, 0, Arc::clone(&sync));
        local.reset(BatchNum(1), true).unwrap();
        assert_eq!(local.get_account(idx(256)).unwrap().balance, U256::from(100u64));
        assert_eq!(local.current_batch(), BatchNum(1));

        // local work is private: mutate, checkpoint, then roll back locally
        let mut acc = local.get_account(idx(256)).unwrap();
        acc.balance = U256::from(40u64);
        local.update_account(idx(256), acc).unwrap();
        local.make_checkpoint();
        assert_eq!(local.current_batch(), BatchNum(2));
        local.reset(BatchNum(1), false).unwrap();
        assert_eq!(local.get_account(idx(256)).unwrap().balance, U256::from(100u64));
        assert_eq!(
            sync.read().unwrap().get_account(idx(256)).unwrap().balance,
            U256::from(100u64)
        );
    }
}
