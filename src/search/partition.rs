//! Quickselect partitioning and the partition-based active list.
//!
//! Purging a beam only needs the top-N tokens, not a full sort. The
//! partitioner places the N highest-scoring tokens at the front of the
//! array (unordered among themselves) in expected linear time, falling
//! back to a full sort past a recursion depth of 50 to bound the worst
//! case.

use super::active_list::{ActiveList, ActiveListFactory};
use super::token::{TokenArena, TokenId, TokenRemap};

const MAX_DEPTH: usize = 50;

/// Minimum initial back-store capacity for the partition list.
const MIN_LIST_CAPACITY: usize = 2000;

/// Top-N selection over a token array without a full sort.
#[derive(Debug, Default, Clone, Copy)]
pub struct Partitioner;

impl Partitioner {
    /// Partitions `tokens[..size]` in place so that the `n` highest
    /// scoring tokens occupy positions `[0..n)`, in no particular order.
    /// Returns the index of the last retained token.
    pub fn partition(
        &self,
        arena: &TokenArena,
        tokens: &mut [TokenId],
        size: usize,
        n: usize,
    ) -> usize {
        if size > n {
            self.mid_point_select(arena, tokens, 0, size - 1, n, 0)
        } else {
            self.find_best(arena, tokens, size)
        }
    }

    // Partitions tokens[start..=end] around the end token: elements with
    // score >= the pivot's move to the front.
    fn end_point_partition(
        &self,
        arena: &TokenArena,
        tokens: &mut [TokenId],
        start: usize,
        end: usize,
    ) -> usize {
        let pivot_score = arena.get(tokens[end]).total_score();
        let mut i = start;
        let mut j = end.max(1) - 1;

        loop {
            while i < end && arena.get(tokens[i]).total_score() >= pivot_score {
                i += 1;
            }
            while j > i && arena.get(tokens[j]).total_score() < pivot_score {
                j -= 1;
            }
            if j <= i {
                break;
            }
            tokens.swap(i, j);
        }

        tokens.swap(i, end);
        i
    }

    // Midpoint pivot selection avoids quadratic behavior on already
    // sorted arrays.
    fn mid_point_partition(
        &self,
        arena: &TokenArena,
        tokens: &mut [TokenId],
        start: usize,
        end: usize,
    ) -> usize {
        let middle = (start + end) >> 1;
        tokens.swap(middle, end);
        self.end_point_partition(arena, tokens, start, end)
    }

    fn mid_point_select(
        &self,
        arena: &TokenArena,
        tokens: &mut [TokenId],
        mut start: usize,
        mut end: usize,
        mut target_size: usize,
        mut depth: usize,
    ) -> usize {
        loop {
            if depth > MAX_DEPTH {
                return self.simple_point_select(arena, tokens, start, end, target_size);
            }
            if start == end {
                return start;
            }
            let pivot = self.mid_point_partition(arena, tokens, start, end);
            let new_size = pivot - start + 1;
            match target_size.cmp(&new_size) {
                std::cmp::Ordering::Equal => return pivot,
                std::cmp::Ordering::Less => {
                    end = pivot - 1;
                }
                std::cmp::Ordering::Greater => {
                    target_size -= new_size;
                    start = pivot + 1;
                }
            }
            depth += 1;
        }
    }

    // Fallback: sort the sub-array descending and take the prefix.
    fn simple_point_select(
        &self,
        arena: &TokenArena,
        tokens: &mut [TokenId],
        start: usize,
        end: usize,
        target_size: usize,
    ) -> usize {
        tokens[start..=end].sort_by(|&a, &b| {
            arena
                .get(b)
                .total_score()
                .partial_cmp(&arena.get(a).total_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        start + target_size - 1
    }

    // No pruning needed; only moves the lowest-scoring token to the last
    // slot and reports that slot.
    fn find_best(&self, arena: &TokenArena, tokens: &mut [TokenId], size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let mut lowest = 0;
        let mut lowest_score = f64::MAX;
        for (i, &t) in tokens[..size].iter().enumerate() {
            let score = arena.get(t).total_score();
            if score <= lowest_score {
                lowest_score = score;
                lowest = i;
            }
        }
        let last = size - 1;
        tokens.swap(lowest, last);
        last
    }
}

/// Partition-based active list: the production beam. Behavior matches
/// [`SimpleActiveList`](super::active_list::SimpleActiveList) up to
/// tie-break order among equal scores.
pub struct PartitionActiveList {
    absolute_beam_width: usize,
    log_relative_beam_width: f64,
    best_token: Option<TokenId>,
    tokens: Vec<TokenId>,
    partitioner: Partitioner,
}

impl PartitionActiveList {
    pub fn new(absolute_beam_width: usize, log_relative_beam_width: f64) -> Self {
        let capacity = MIN_LIST_CAPACITY.max(absolute_beam_width / 3);
        Self {
            absolute_beam_width,
            log_relative_beam_width,
            best_token: None,
            tokens: Vec::with_capacity(capacity),
            partitioner: Partitioner,
        }
    }
}

impl ActiveList for PartitionActiveList {
    fn add(&mut self, arena: &TokenArena, token: TokenId) {
        self.tokens.push(token);
        let score = arena.get(token).total_score();
        if self
            .best_token
            .map(|b| score > arena.get(b).total_score())
            .unwrap_or(true)
        {
            self.best_token = Some(token);
        }
    }

    fn purge(&mut self, arena: &TokenArena) {
        if self.absolute_beam_width > 0 && self.tokens.len() > self.absolute_beam_width {
            let size = self.tokens.len();
            let last = self.partitioner.partition(
                arena,
                &mut self.tokens,
                size,
                self.absolute_beam_width,
            );
            self.tokens.truncate(last + 1);
        }
    }

    fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    fn best_token(&self) -> Option<TokenId> {
        self.best_token
    }

    fn set_best_token(&mut self, token: Option<TokenId>) {
        self.best_token = token;
    }

    fn beam_threshold(&self, arena: &TokenArena) -> f64 {
        self.best_score(arena) + self.log_relative_beam_width
    }

    fn new_instance(&self) -> Box<dyn ActiveList> {
        Box::new(PartitionActiveList::new(
            self.absolute_beam_width,
            self.log_relative_beam_width,
        ))
    }

    fn remap(&mut self, remap: &TokenRemap) {
        remap.map_vec(&mut self.tokens);
        self.best_token = self.best_token.and_then(|t| remap.map(t));
    }
}

/// Factory for [`PartitionActiveList`].
pub struct PartitionActiveListFactory {
    absolute_beam_width: usize,
    log_relative_beam_width: f64,
}

impl PartitionActiveListFactory {
    pub fn new(absolute_beam_width: usize, log_relative_beam_width: f64) -> Self {
        Self {
            absolute_beam_width,
            log_relative_beam_width,
        }
    }
}

impl ActiveListFactory for PartitionActiveListFactory {
    fn new_instance(&self) -> Box<dyn ActiveList> {
        Box::new(PartitionActiveList::new(
            self.absolute_beam_width,
            self.log_relative_beam_width,
        ))
    }
}
