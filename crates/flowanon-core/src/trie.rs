//! Binary prefix trie over the 32-bit IPv4 address space
//!
//! Nodes live in a flat arena and refer to each other by index. Each node has
//! two child slots, selected by successive address bits (most significant
//! first), and each slot is empty, a leaf holding a [`PrefixEntry`], or an
//! index to the next internal node.
//!
//! Construction goes through [`TrieBuilder`]; [`TrieBuilder::seal`] replaces
//! every empty slot with [`PrefixEntry::DEFAULT`] and yields a read-only
//! [`PrefixTrie`] whose lookups are total.
//!
//! # Split policy
//!
//! With [`SplitPolicy::Overwrite`] (the default), inserting a prefix whose
//! path runs through a leaf of a broader prefix turns that leaf into an empty
//! internal node. The broader entry is dropped, so addresses on the sibling
//! paths resolve to the default entry after sealing. Likewise a broader prefix
//! inserted after more specific ones replaces their whole subtree. Prefix
//! lists are therefore expected in least-specific-first order.
//!
//! [`SplitPolicy::PreserveBroader`] keeps the broader entry reachable instead.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::prefix::{Ipv4Prefix, PrefixEntry};

const ROOT: usize = 0;

/// How a leaf is treated when a more specific prefix must pass through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitPolicy {
    /// Replace the broader leaf with an empty internal node and drop its entry
    #[default]
    Overwrite,
    /// Push the broader entry down to both children before descending, and
    /// only fill empty slots when a broader prefix lands on a subtree
    PreserveBroader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Slot {
    Empty,
    Leaf(PrefixEntry),
    Internal(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    children: [Slot; 2],
}

impl Node {
    const EMPTY: Node = Node {
        children: [Slot::Empty, Slot::Empty],
    };
}

#[inline]
fn bit_at(bits: u32, depth: u8) -> usize {
    ((bits >> (31 - depth as u32)) & 1) as usize
}

/// Mutable trie under construction
#[derive(Debug, Clone)]
pub struct TrieBuilder {
    nodes: Vec<Node>,
    policy: SplitPolicy,
    inserted: usize,
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self::with_policy(SplitPolicy::default())
    }

    pub fn with_policy(policy: SplitPolicy) -> Self {
        Self {
            nodes: vec![Node::EMPTY],
            policy,
            inserted: 0,
        }
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    /// Number of prefixes inserted so far (including overwritten ones)
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn alloc(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    /// Insert a prefix with its tag.
    ///
    /// Walks `prefix_len` bits of the network address, creating internal
    /// nodes as needed, and writes the leaf at the final bit.
    pub fn insert(&mut self, prefix: Ipv4Prefix, tag: u32) {
        let entry = prefix.with_tag(tag);
        let bits = u32::from(prefix.network());
        let len = prefix.prefix_len();
        let mut node = ROOT;

        for depth in 0..len {
            let bit = bit_at(bits, depth);

            if depth + 1 == len {
                self.place_leaf(node, bit, entry);
                break;
            }

            node = match self.nodes[node].children[bit] {
                Slot::Internal(next) => next as usize,
                Slot::Empty => {
                    let next = self.alloc(Node::EMPTY);
                    self.nodes[node].children[bit] = Slot::Internal(next);
                    next as usize
                }
                Slot::Leaf(existing) => {
                    debug_assert!(existing.prefix_len < len);
                    let split = match self.policy {
                        SplitPolicy::Overwrite => Node::EMPTY,
                        SplitPolicy::PreserveBroader => Node {
                            children: [Slot::Leaf(existing), Slot::Leaf(existing)],
                        },
                    };
                    let next = self.alloc(split);
                    self.nodes[node].children[bit] = Slot::Internal(next);
                    next as usize
                }
            };
        }

        self.inserted += 1;
    }

    fn place_leaf(&mut self, node: usize, bit: usize, entry: PrefixEntry) {
        match (self.policy, self.nodes[node].children[bit]) {
            (SplitPolicy::PreserveBroader, Slot::Internal(subtree)) => {
                self.fill_empty(subtree as usize, entry);
            }
            _ => self.nodes[node].children[bit] = Slot::Leaf(entry),
        }
    }

    fn fill_empty(&mut self, node: usize, entry: PrefixEntry) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for bit in 0..2 {
                match self.nodes[current].children[bit] {
                    Slot::Empty => self.nodes[current].children[bit] = Slot::Leaf(entry),
                    Slot::Internal(next) => stack.push(next as usize),
                    Slot::Leaf(_) => {}
                }
            }
        }
    }

    /// Look up an address before sealing; `None` means the walk ended on an
    /// empty slot.
    pub fn find(&self, addr: Ipv4Addr) -> Option<PrefixEntry> {
        let bits = u32::from(addr);
        let mut node = ROOT;
        for depth in 0..32 {
            match self.nodes[node].children[bit_at(bits, depth)] {
                Slot::Leaf(entry) => return Some(entry),
                Slot::Internal(next) => node = next as usize,
                Slot::Empty => return None,
            }
        }
        None
    }

    /// Replace every empty slot with the default entry.
    ///
    /// Only nodes reachable from the root are carried over, so subtrees
    /// orphaned by overwrites do not end up in the sealed arena.
    pub fn seal(self) -> PrefixTrie {
        let mut sealed = Vec::with_capacity(self.nodes.len());
        sealed.push(Node::EMPTY);
        let mut stack = vec![(ROOT, 0usize)];

        while let Some((old, new)) = stack.pop() {
            for bit in 0..2 {
                let slot = match self.nodes[old].children[bit] {
                    Slot::Empty => Slot::Leaf(PrefixEntry::DEFAULT),
                    Slot::Leaf(entry) => Slot::Leaf(entry),
                    Slot::Internal(next) => {
                        sealed.push(Node::EMPTY);
                        let index = sealed.len() - 1;
                        stack.push((next as usize, index));
                        Slot::Internal(index as u32)
                    }
                };
                sealed[new].children[bit] = slot;
            }
        }

        PrefixTrie { nodes: sealed }
    }
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<(Ipv4Prefix, u32)> for TrieBuilder {
    fn extend<I: IntoIterator<Item = (Ipv4Prefix, u32)>>(&mut self, iter: I) {
        for (prefix, tag) in iter {
            self.insert(prefix, tag);
        }
    }
}

/// Sealed, read-only prefix trie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTrie {
    nodes: Vec<Node>,
}

impl PrefixTrie {
    /// Build and seal in one step
    pub fn build<I>(prefixes: I, policy: SplitPolicy) -> Self
    where
        I: IntoIterator<Item = (Ipv4Prefix, u32)>,
    {
        let mut builder = TrieBuilder::with_policy(policy);
        builder.extend(prefixes);
        builder.seal()
    }

    /// A sealed trie with no prefixes; every lookup yields the default entry
    pub fn empty() -> Self {
        TrieBuilder::new().seal()
    }

    /// Resolve the owning prefix of an address.
    ///
    /// Returns as soon as the walk reaches a leaf. Slots that are empty or
    /// point outside the arena (possible only in a damaged cache file)
    /// resolve to the default entry.
    pub fn lookup(&self, addr: Ipv4Addr) -> PrefixEntry {
        let bits = u32::from(addr);
        let mut node = ROOT;
        for depth in 0..32 {
            let slot = match self.nodes.get(node) {
                Some(n) => n.children[bit_at(bits, depth)],
                None => break,
            };
            match slot {
                Slot::Leaf(entry) => return entry,
                Slot::Internal(next) => node = next as usize,
                Slot::Empty => break,
            }
        }
        PrefixEntry::DEFAULT
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves holding a non-default entry
    pub fn entry_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .filter(|slot| matches!(slot, Slot::Leaf(e) if !e.is_default()))
            .count()
    }

    /// True when no slot is empty
    pub fn is_sealed(&self) -> bool {
        self.nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .all(|slot| !matches!(slot, Slot::Empty))
    }
}

impl Default for PrefixTrie {
    fn default() -> Self {
        Self::empty()
    }
}
