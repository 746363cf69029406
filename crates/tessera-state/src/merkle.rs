//! A sparse Merkle tree over the BN254 scalar field with Poseidon hashing.
//!
//! Semantics match the circuit: the empty tree commits to zero, a leaf node hashes as
//! `Poseidon3(key, value, 1)`, a middle node as `Poseidon2(left, right)`, and a leaf sits at
//! the shallowest level where its little-endian key path diverges from every other key. The
//! root is therefore a deterministic function of the key/value set alone.
//!
//! Nodes are stored content-addressed (hash to node) and never deleted, so cloning the tree
//! shares nothing mutable and historical roots stay resolvable until a checkpoint is dropped.

use std::collections::HashMap;

use ark_ff::{BigInteger, PrimeField, Zero};
use tessera_objects::crypto::{poseidon_hash, Fr};

use crate::errors::MerkleError;

// NODES
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    /// An internal node holding the hashes of its children.
    Middle(Fr, Fr),
    /// A terminal node holding a key and its value.
    Leaf(u64, Fr),
}

fn leaf_hash(key: u64, value: Fr) -> Result<Fr, MerkleError> {
    Ok(poseidon_hash(&[Fr::from(key), value, Fr::from(1u64)])?)
}

fn middle_hash(left: Fr, right: Fr) -> Result<Fr, MerkleError> {
    Ok(poseidon_hash(&[left, right])?)
}

fn path_bit(key: u64, level: usize) -> bool {
    (key >> level) & 1 == 1
}

fn hash_key(h: Fr) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let be = h.into_bigint().to_bytes_be();
    bytes[32 - be.len()..].copy_from_slice(&be);
    bytes
}

// MERKLE PROOF
// ================================================================================================

/// A (non-)membership proof for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// True if the key has a leaf in the tree.
    pub existence: bool,
    /// Sibling hashes from the root down to the proven node's level.
    pub siblings: Vec<Fr>,
    /// For non-membership: the leaf found on the key's path, if any.
    pub other_leaf: Option<(u64, Fr)>,
}

impl MerkleProof {
    /// Checks the proof against a root for the given key and value.
    pub fn verify(&self, root: Fr, key: u64, value: Fr) -> bool {
        let Ok(mut hash) = (if self.existence {
            leaf_hash(key, value)
        } else {
            match self.other_leaf {
                Some((other_key, other_value)) => leaf_hash(other_key, other_value),
                None => Ok(Fr::zero()),
            }
        }) else {
            return false;
        };
        for (level, sibling) in self.siblings.iter().enumerate().rev() {
            let combined = if path_bit(key, level) {
                middle_hash(*sibling, hash)
            } else {
                middle_hash(hash, *sibling)
            };
            match combined {
                Ok(h) => hash = h,
                Err(_) => return false,
            }
        }
        hash == root
    }
}

// MERKLE TREE
// ================================================================================================

/// The sparse Merkle tree backing account and exit commitments.
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    n_levels: usize,
    root: Fr,
    nodes: HashMap<[u8; 32], Node>,
}

impl MerkleTree {
    /// Returns an empty tree of the given maximum depth.
    pub fn new(n_levels: usize) -> Self {
        Self {
            n_levels,
            root: Fr::zero(),
            nodes: HashMap::new(),
        }
    }

    /// Returns the current root; zero for the empty tree.
    pub fn root(&self) -> Fr {
        self.root
    }

    /// Returns the maximum depth.
    pub fn n_levels(&self) -> usize {
        self.n_levels
    }

    /// Inserts a new key.
    ///
    /// # Errors
    /// Fails if the key already exists or its path collides past the maximum depth.
    pub fn add(&mut self, key: u64, value: Fr) -> Result<(), MerkleError> {
        let root = self.root;
        self.root = self.add_at(root, key, value, 0)?;
        Ok(())
    }

    /// Replaces the value of an existing key.
    pub fn update(&mut self, key: u64, value: Fr) -> Result<(), MerkleError> {
        let root = self.root;
        self.root = self.update_at(root, key, value, 0)?;
        Ok(())
    }

    /// Returns the value stored under the key, if any.
    pub fn get(&self, key: u64) -> Option<Fr> {
        let mut hash = self.root;
        let mut level = 0;
        loop {
            match self.node(hash)? {
                Node::Leaf(k, v) => return (k == key).then_some(v),
                Node::Middle(l, r) => {
                    hash = if path_bit(key, level) { r } else { l };
                    level += 1;
                }
            }
        }
    }

    /// Generates a (non-)membership proof for the key.
    pub fn gen_proof(&self, key: u64) -> MerkleProof {
        let mut siblings = Vec::new();
        let mut hash = self.root;
        let mut level = 0;
        loop {
            match self.node(hash) {
                None => {
                    return MerkleProof {
                        existence: false,
                        siblings,
                        other_leaf: None,
                    }
                }
                Some(Node::Leaf(k, v)) => {
                    return MerkleProof {
                        existence: k == key,
                        siblings,
                        other_leaf: (k != key).then_some((k, v)),
                    }
                }
                Some(Node::Middle(l, r)) => {
                    if path_bit(key, level) {
                        siblings.push(l);
                        hash = r;
                    } else {
                        siblings.push(r);
                        hash = l;
                    }
                    level += 1;
                }
            }
        }
    }

    // INTERNAL OPERATIONS
    // --------------------------------------------------------------------------------------------

    fn node(&self, hash: Fr) -> Option<Node> {
        if hash.is_zero() {
            return None;
        }
        self.nodes.get(&hash_key(hash)).copied()
    }

    fn put(&mut self, node: Node) -> Result<Fr, MerkleError> {
        let hash = match node {
            Node::Leaf(k, v) => leaf_hash(k, v)?,
            Node::Middle(l, r) => middle_hash(l, r)?,
        };
        self.nodes.insert(hash_key(hash), node);
        Ok(hash)
    }

    fn add_at(&mut self, root: Fr, key: u64, value: Fr, level: usize) -> Result<Fr, MerkleError> {
        if level >= self.n_levels {
            return Err(MerkleError::ReachedMaxLevel(key));
        }
        match self.node(root) {
            None => self.put(Node::Leaf(key, value)),
            Some(Node::Leaf(other_key, other_value)) => {
                if other_key == key {
                    return Err(MerkleError::KeyAlreadyExists(key));
                }
                self.push_leaf(key, value, other_key, other_value, level)
            }
            Some(Node::Middle(l, r)) => {
                let node = if path_bit(key, level) {
                    Node::Middle(l, self.add_at(r, key, value, level + 1)?)
                } else {
                    Node::Middle(self.add_at(l, key, value, level + 1)?, r)
                };
                self.put(node)
            }
        }
    }

    /// Sinks two colliding leaves until their paths diverge, building middle nodes on the way
    /// back up.
    fn push_leaf(
        &mut self,
        new_key: u64,
        new_value: Fr,
        old_key: u64,
        old_value: Fr,
        level: usize,
    ) -> Result<Fr, MerkleError> {
        if level >= self.n_levels - 1 {
            return Err(MerkleError::ReachedMaxLevel(new_key));
        }
        let new_bit = path_bit(new_key, level);
        let old_bit = path_bit(old_key, level);
        if new_bit == old_bit {
            let child = self.push_leaf(new_key, new_value, old_key, old_value, level + 1)?;
            let node = if new_bit {
                Node::Middle(Fr::zero(), child)
            } else {
                Node::Middle(child, Fr::zero())
            };
            return self.put(node);
        }
        let new_hash = self.put(Node::Leaf(new_key, new_value))?;
        let old_hash = self.put(Node::Leaf(old_key, old_value))?;
        let node = if new_bit {
            Node::Middle(old_hash, new_hash)
        } else {
            Node::Middle(new_hash, old_hash)
        };
        self.put(node)
    }

    fn update_at(
        &mut self,
        root: Fr,
        key: u64,
        value: Fr,
        level: usize,
    ) -> Result<Fr, MerkleError> {
        match self.node(root) {
            None => Err(MerkleError::KeyNotFound(key)),
            Some(Node::Leaf(k, _)) => {
                if k != key {
                    return Err(MerkleError::KeyNotFound(key));
                }
                self.put(Node::Leaf(key, value))
            }
            Some(Node::Middle(l, r)) => {
                let node = if path_bit(key, level) {
                    Node::Middle(l, self.update_at(r, key, value, level + 1)?)
                } else {
                    Node::Middle(self.update_at(l, key, value, level + 1)?, r)
                };
                self.put(node)
            }
        }
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(keys: &[(u64, u64)]) -> MerkleTree {
        let mut mt = MerkleTree::new(32);
        for &(k, v) in keys {
            mt.add(k, Fr::from(v)).unwrap();
        }
        mt
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let mt = MerkleTree::new(32);
        assert!(mt.root().is_zero());
        assert_eq!(mt.get(256), None);
    }

    #[test]
    fn root_depends_on_key_set_not_insertion_order() {
        let a = tree_with(&[(256, 10), (257, 20), (258, 30)]);
        let b = tree_with(&[(258, 30), (256, 10), (257, 20)]);
        assert_eq!(a.root(), b.root());
        assert!(!a.root().is_zero());
    }

    #[test]
    fn get_returns_inserted_values() {
        let mt = tree_with(&[(256, 10), (257, 20)]);
        assert_eq!(mt.get(256), Some(Fr::from(10u64)));
        assert_eq!(mt.get(257), Some(Fr::from(20u64)));
        assert_eq!(mt.get(258), None);
    }

    #[test]
    fn add_rejects_duplicates_update_rejects_missing() {
        let mut mt = tree_with(&[(256, 10)]);
        assert_eq!(mt.add(256, Fr::from(11u64)), Err(MerkleError::KeyAlreadyExists(256)));
        assert_eq!(mt.update(257, Fr::from(1u64)), Err(MerkleError::KeyNotFound(257)));
    }

    #[test]
    fn update_changes_root_deterministically() {
        let mut mt = tree_with(&[(256, 10), (257, 20)]);
        let before = mt.root();
        mt.update(256, Fr::from(99u64)).unwrap();
        assert_ne!(mt.root(), before);
        assert_eq!(mt.get(256), Some(Fr::from(99u64)));

        // updating back restores the old root
        mt.update(256, Fr::from(10u64)).unwrap();
        assert_eq!(mt.root(), before);
    }

    #[test]
    fn colliding_paths_sink_until_divergence() {
        // 256 and 768 share the low 9 bits (both have bit 8 set, bits 0..8 zero)
        let mut mt = tree_with(&[(256, 1), (768, 2)]);
        assert_eq!(mt.get(256), Some(Fr::from(1u64)));
        assert_eq!(mt.get(768), Some(Fr::from(2u64)));
        mt.update(768, Fr::from(3u64)).unwrap();
        assert_eq!(mt.get(768), Some(Fr::from(3u64)));
    }

    #[test]
    fn proofs_verify_membership_and_absence() {
        let mt = tree_with(&[(256, 10), (257, 20), (768, 30)]);
        let root = mt.root();

        let proof = mt.gen_proof(257);
        assert!(proof.existence);
        assert!(proof.verify(root, 257, Fr::from(20u64)));
        assert!(!proof.verify(root, 257, Fr::from(21u64)));

        let absent = mt.gen_proof(300);
        assert!(!absent.existence);
        assert!(absent.verify(root, 300, Fr::zero()));
    }

    #[test]
    fn depth_exhaustion_is_an_error() {
        let mut mt = MerkleTree::new(3);
        // 0b000 and 0b010 diverge at bit 1, so their leaves sink to level 2
        mt.add(0b000, Fr::from(1u64)).unwrap();
        mt.add(0b010, Fr::from(2u64)).unwrap();
        // 0b100 shares bits 0 and 1 with 0b000 and would need a leaf below the maximum depth
        assert!(matches!(mt.add(0b100, Fr::from(3u64)), Err(MerkleError::ReachedMaxLevel(_))));
    }
}
