//! One active list per state order.
//!
//! A search graph declares `num_state_order` orders (typically six: HMM,
//! phone unit, word start, word end, grammar, emitting); the emitting
//! list is always the last. Within a frame the non-emitting lists are
//! drained in strictly ascending order, and order *k* may only feed
//! orders greater than *k*.

use tracing::warn;

use super::active_list::{ActiveList, ActiveListFactory};
use super::token::{TokenArena, TokenId, TokenRemap};

/// Holds and dispatches the per-order active lists.
pub struct ActiveListManager {
    factories: Vec<Box<dyn ActiveListFactory>>,
    lists: Vec<Box<dyn ActiveList>>,
    /// When set, draining order *k* asserts that all lower orders are
    /// already empty. Catches backward-feeding search graphs.
    check_prior_lists: bool,
}

impl ActiveListManager {
    /// One factory per state order; if fewer factories than orders are
    /// supplied the last factory is reused for the remaining orders.
    pub fn new(factories: Vec<Box<dyn ActiveListFactory>>, check_prior_lists: bool) -> Self {
        assert!(
            !factories.is_empty(),
            "no active list factories configured"
        );
        Self {
            factories,
            lists: Vec::new(),
            check_prior_lists,
        }
    }

    /// Allocates one empty list per state order.
    pub fn set_num_state_order(&mut self, num_state_order: usize) {
        if self.factories.len() < num_state_order {
            warn!(
                need = num_state_order,
                found = self.factories.len(),
                "fewer active list factories than state orders; reusing the last"
            );
        }
        self.lists = (0..num_state_order)
            .map(|i| {
                let which = i.min(self.factories.len() - 1);
                self.factories[which].new_instance()
            })
            .collect();
    }

    pub fn num_state_order(&self) -> usize {
        self.lists.len()
    }

    /// Dispatches a token to the list for its state order.
    pub fn add(&mut self, arena: &TokenArena, token: TokenId) {
        let order = arena
            .get(token)
            .state()
            .expect("active-list token must have a search state")
            .order();
        assert!(
            order < self.lists.len(),
            "no active list for state order {order}"
        );
        self.lists[order].add(arena, token);
    }

    /// The emitting list (highest order).
    pub fn emitting_list(&self) -> &dyn ActiveList {
        self.lists
            .last()
            .expect("set_num_state_order not called")
            .as_ref()
    }

    /// Removes the emitting list, leaving a fresh empty instance in its
    /// place.
    pub fn take_emitting_list(&mut self) -> Box<dyn ActiveList> {
        let last = self.lists.len() - 1;
        let fresh = self.lists[last].new_instance();
        std::mem::replace(&mut self.lists[last], fresh)
    }

    /// Puts an emitting list back, replacing the current instance. Used
    /// when a frame's growth step is skipped and the pruned list must
    /// carry over to the next frame.
    pub fn restore_emitting_list(&mut self, list: Box<dyn ActiveList>) {
        let last = self.lists.len() - 1;
        self.lists[last] = list;
    }

    /// Replaces the emitting list with a fresh empty instance.
    pub fn clear_emitting_list(&mut self) {
        let last = self.lists.len() - 1;
        self.lists[last] = self.lists[last].new_instance();
    }

    /// Orders of the non-emitting lists, ascending.
    pub fn non_emitting_orders(&self) -> std::ops::Range<usize> {
        0..self.lists.len().saturating_sub(1)
    }

    /// Removes the list at a non-emitting order for draining, leaving a
    /// fresh instance; successors of the drained tokens land in the
    /// replacement lists.
    pub fn take_non_emitting_list(&mut self, order: usize) -> Box<dyn ActiveList> {
        if self.check_prior_lists {
            for prior in 0..order {
                assert!(
                    self.lists[prior].is_empty(),
                    "while processing state order {order}, order {prior} is not empty"
                );
            }
        }
        let fresh = self.lists[order].new_instance();
        std::mem::replace(&mut self.lists[order], fresh)
    }

    /// All tokens currently held in any list. Arena roots for retention.
    pub fn all_tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.lists.iter().flat_map(|l| l.tokens().iter().copied())
    }

    /// Rewrites all held token ids after an arena compaction.
    pub fn remap(&mut self, remap: &TokenRemap) {
        for list in &mut self.lists {
            list.remap(remap);
        }
    }
}
