//! Lattice loser bookkeeping.
//!
//! When a better-scoring path merges into an existing best word token,
//! the displaced predecessor is not discarded: it becomes an alternate
//! incoming arc of that word in the lattice. This manager stores those
//! losing predecessors per surviving token, bounded by a total entry cap.

use std::collections::HashMap;

use super::token::{TokenId, TokenRemap};

/// Bounded map from a surviving token to its losing predecessors.
pub struct AlternateHypothesisManager {
    alternates: HashMap<TokenId, Vec<TokenId>>,
    max_edges: usize,
    total_edges: usize,
}

impl AlternateHypothesisManager {
    pub fn new(max_edges: usize) -> Self {
        Self {
            alternates: HashMap::new(),
            max_edges,
            total_edges: 0,
        }
    }

    /// Records `predecessor` as a losing incoming path of `token`.
    /// Silently drops the entry once the edge cap is reached.
    pub fn add_alternate_predecessor(&mut self, token: TokenId, predecessor: TokenId) {
        if self.max_edges > 0 && self.total_edges >= self.max_edges {
            return;
        }
        self.alternates.entry(token).or_default().push(predecessor);
        self.total_edges += 1;
    }

    /// The losing predecessors recorded for `token`, in arrival order.
    pub fn alternate_predecessors(&self, token: TokenId) -> Option<&[TokenId]> {
        self.alternates.get(&token).map(|v| v.as_slice())
    }

    pub fn has_alternate_predecessors(&self, token: TokenId) -> bool {
        self.alternates.contains_key(&token)
    }

    pub fn total_edges(&self) -> usize {
        self.total_edges
    }

    /// All tokens referenced by this manager, keys and values alike.
    /// These are lattice roots for arena retention.
    pub fn referenced_tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.alternates
            .iter()
            .flat_map(|(k, vs)| std::iter::once(*k).chain(vs.iter().copied()))
    }

    /// Rewrites held token ids after an arena compaction.
    pub fn remap(&mut self, remap: &TokenRemap) {
        remap.map_token_lists(&mut self.alternates);
        self.total_edges = self.alternates.values().map(Vec::len).sum();
    }
}
