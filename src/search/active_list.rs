//! Beam of tokens surviving at one state order.
//!
//! An active list tracks its best-scoring token on every add and supports
//! absolute (top-N) plus relative (score floor below best) pruning. Two
//! interchangeable strategies exist: this module's sort-based
//! [`SimpleActiveList`] and the quickselect-based
//! [`PartitionActiveList`](super::partition::PartitionActiveList), which
//! is authoritative for performance. Their survivor sets are identical up
//! to tie-break order.
//!
//! All scores are in the LogMath log base.

use super::token::{TokenArena, TokenId, TokenRemap};

/// A bounded beam of tokens for one state order.
pub trait ActiveList {
    /// Adds a token, keeping track of the best-scoring token.
    fn add(&mut self, arena: &TokenArena, token: TokenId);

    /// Trims to at most the absolute beam width, retaining the top-N by
    /// score.
    fn purge(&mut self, arena: &TokenArena);

    /// The surviving tokens, in no particular order.
    fn tokens(&self) -> &[TokenId];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn best_token(&self) -> Option<TokenId>;

    fn set_best_token(&mut self, token: Option<TokenId>);

    /// Score of the best token, or negative infinity for an empty list.
    fn best_score(&self, arena: &TokenArena) -> f64 {
        self.best_token()
            .map(|t| arena.get(t).total_score())
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Relative beam floor: `best_score + log_relative_beam_width`.
    fn beam_threshold(&self, arena: &TokenArena) -> f64;

    /// An empty list with the same beam parameters, for rolling over
    /// between frames.
    fn new_instance(&self) -> Box<dyn ActiveList>;

    /// Rewrites held token ids after an arena compaction.
    fn remap(&mut self, remap: &TokenRemap);
}

/// Creates empty active lists with fixed beam parameters. The manager
/// holds one factory per state order.
pub trait ActiveListFactory {
    fn new_instance(&self) -> Box<dyn ActiveList>;
}

/// An active list that tries to be simple and correct: purge is a full
/// descending sort. Slower than the partition list but an easy reference
/// for its behavior.
pub struct SimpleActiveList {
    /// Hard cap on the list size; 0 disables absolute pruning.
    absolute_beam_width: usize,
    log_relative_beam_width: f64,
    best_token: Option<TokenId>,
    tokens: Vec<TokenId>,
}

impl SimpleActiveList {
    pub fn new(absolute_beam_width: usize, log_relative_beam_width: f64) -> Self {
        Self {
            absolute_beam_width,
            log_relative_beam_width,
            best_token: None,
            tokens: Vec::new(),
        }
    }
}

impl ActiveList for SimpleActiveList {
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
            // Stable sort keeps insertion order among equal scores.
            self.tokens.sort_by(|&a, &b| {
                arena
                    .get(b)
                    .total_score()
                    .partial_cmp(&arena.get(a).total_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            self.tokens.truncate(self.absolute_beam_width);
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
        Box::new(SimpleActiveList::new(
            self.absolute_beam_width,
            self.log_relative_beam_width,
        ))
    }

    fn remap(&mut self, remap: &TokenRemap) {
        remap.map_vec(&mut self.tokens);
        self.best_token = self.best_token.and_then(|t| remap.map(t));
    }
}

/// Factory for [`SimpleActiveList`].
pub struct SimpleActiveListFactory {
    absolute_beam_width: usize,
    log_relative_beam_width: f64,
}

impl SimpleActiveListFactory {
    pub fn new(absolute_beam_width: usize, log_relative_beam_width: f64) -> Self {
        Self {
            absolute_beam_width,
            log_relative_beam_width,
        }
    }
}

impl ActiveListFactory for SimpleActiveListFactory {
    fn new_instance(&self) -> Box<dyn ActiveList> {
        Box::new(SimpleActiveList::new(
            self.absolute_beam_width,
            self.log_relative_beam_width,
        ))
    }
}
