//! Signature hash calculator.
//!
//! Hashes are scoped to one run. A declaration's hash covers its own body
//! and the hashes of every declaration it inlines, so a body change in an
//! inlined callee changes the hash of each inliner. Inline cycles are
//! collapsed into strongly connected components whose members share the
//! component's combined hash.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use rayon::prelude::*;
use tessera_common::{ContentHash, ContentHasher};

use crate::frontend::Declaration;
use crate::model::{LibraryFile, Signature, SrcFile};

/// Where a signature is implemented.
#[derive(Debug, Clone, Copy)]
pub struct SignatureSource<'a> {
    /// Owning library.
    pub lib: LibraryFile,
    /// Owning file.
    pub src: SrcFile,
    /// The declaration itself.
    pub declaration: &'a Declaration,
}

/// Run-scoped `signature -> hash` table.
#[derive(Debug, Default)]
pub struct SignatureHashCalculator {
    hashes: HashMap<Signature, ContentHash>,
}

impl SignatureHashCalculator {
    /// Creates an empty calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of a signature, if it has been computed.
    ///
    /// `None` means the signature is owned by nothing loaded in this run.
    pub fn hash_of(&self, signature: Signature) -> Option<ContentHash> {
        self.hashes.get(&signature).copied()
    }

    /// Number of known hashes.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns `true` if no hash has been computed yet.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Computes the hash of every signature in `sources` that is not known yet.
    pub fn add_all(&mut self, sources: &HashMap<Signature, SignatureSource<'_>>) {
        let pending: Vec<Signature> = sources
            .keys()
            .filter(|sig| !self.hashes.contains_key(sig))
            .copied()
            .collect();
        if pending.is_empty() {
            return;
        }

        let bodies: HashMap<Signature, ContentHash> = pending
            .par_iter()
            .map(|sig| (*sig, ContentHash::from_bytes(&sources[sig].declaration.body)))
            .collect();

        let mut graph: DiGraph<Signature, ()> = DiGraph::with_capacity(pending.len(), 0);
        let nodes: HashMap<Signature, NodeIndex> =
            pending.iter().map(|sig| (*sig, graph.add_node(*sig))).collect();
        for sig in &pending {
            for callee in &sources[sig].declaration.inline_callees {
                if let Some(&callee_node) = nodes.get(callee) {
                    graph.add_edge(nodes[sig], callee_node, ());
                }
            }
        }

        // Components come out callees first.
        for component in petgraph::algo::tarjan_scc(&graph) {
            let members: Vec<Signature> = component.iter().map(|n| graph[*n]).collect();
            if let [single] = members.as_slice() {
                if sources[single].declaration.inline_callees.is_empty() {
                    self.hashes.insert(*single, bodies[single]);
                    continue;
                }
            }

            let member_set: HashSet<Signature> = members.iter().copied().collect();
            let mut member_bodies: Vec<ContentHash> = members.iter().map(|sig| bodies[sig]).collect();
            member_bodies.sort_unstable();
            let mut callee_hashes: Vec<ContentHash> = members
                .iter()
                .flat_map(|sig| sources[sig].declaration.inline_callees.iter())
                .filter(|callee| !member_set.contains(callee))
                .filter_map(|callee| self.hashes.get(callee).copied())
                .collect();
            callee_hashes.sort_unstable();
            callee_hashes.dedup();

            let mut group = ContentHasher::new();
            group.write_bytes(&(member_bodies.len() as u64).to_le_bytes());
            for hash in &member_bodies {
                group.write_hash(hash);
            }
            for hash in &callee_hashes {
                group.write_hash(hash);
            }
            let group = group.finish();

            for sig in members {
                let hash = ContentHasher::new()
                    .write_hash(&bodies[&sig])
                    .write_hash(&group)
                    .finish();
                self.hashes.insert(sig, hash);
            }
        }
    }
}
