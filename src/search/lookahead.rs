//! Fast-match lookahead.
//!
//! An auxiliary decoder runs a cheap context-independent phone loop on
//! the same feature stream, one window ahead of the main pass. Its sole
//! output is a per-frame vector of best acoustic scores per base phone;
//! the main pass turns those into a penalty that prunes arcs into
//! acoustically implausible phones before their tokens are ever created.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::api::DecodeError;
use crate::linguist::{Linguist, StateKey};
use crate::result::RecognitionResult;

use super::active_list::{ActiveList, ActiveListFactory};
use super::config::LookaheadConfig;
use super::scorer::ScoreOutcome;
use super::search_manager::WordPruningSearchManager;
use super::token::{TokenArena, TokenId};
use super::SearchManager;

/// Upper bound on context-independent base phone ids.
const MAX_BASE_IDS: usize = 1024;

/// Compact the fast-match arena past this many tokens.
const FAST_MATCH_COMPACT_WATERMARK: usize = 1 << 14;

/// Best acoustic score per base phone for one fast-match frame, plus the
/// frame maximum.
pub struct FrameCiScores {
    scores: Vec<f64>,
    max_score: f64,
}

impl FrameCiScores {
    pub fn new(scores: Vec<f64>, max_score: f64) -> Self {
        Self { scores, max_score }
    }

    fn relative(&self, base_id: usize) -> f64 {
        // a frame with no scored phones contributes nothing
        if self.max_score == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        self.scores
            .get(base_id)
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
            - self.max_score
    }
}

/// FIFO of per-frame phone score floors with a memoized per-base-id
/// penalty. The penalty for phone `b` is the least-bad relative gap
/// across the window: `max over frames of (score[b] - frame max)`.
pub struct PenaltyWindow {
    window: VecDeque<FrameCiScores>,
    cache: HashMap<usize, f64>,
    weight: f32,
}

impl PenaltyWindow {
    pub fn new(weight: f32) -> Self {
        Self {
            window: VecDeque::new(),
            cache: HashMap::new(),
            weight,
        }
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub(super) fn push(&mut self, frame: FrameCiScores) {
        self.window.push_back(frame);
    }

    pub(super) fn pop_oldest(&mut self) {
        self.window.pop_front();
    }

    /// Invalidated whenever the window contents change.
    pub(super) fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Lookahead penalty for a base phone. Zero once the window has
    /// drained, so the contribution decays when the fast-match stream
    /// ends ahead of the main stream.
    pub fn penalty(&mut self, base_id: usize) -> f64 {
        if let Some(&p) = self.cache.get(&base_id) {
            return p;
        }
        if self.window.is_empty() {
            return 0.0;
        }
        let penalty = self
            .window
            .iter()
            .map(|f| f.relative(base_id))
            .fold(f64::NEG_INFINITY, f64::max);
        self.cache.insert(base_id, penalty);
        penalty
    }
}

/// Breadth-first search with the fast-match heuristic layered on top.
///
/// Owns a [`WordPruningSearchManager`] for the main pass and drives one
/// fast-match frame ahead of every main frame, keeping the penalty
/// window exactly `lookahead_window` frames deep at steady state.
pub struct LookaheadSearchManager {
    main: WordPruningSearchManager,
    fastmatch_linguist: Box<dyn Linguist>,
    fastmatch_factory: Box<dyn ActiveListFactory>,
    config: LookaheadConfig,

    fm_arena: TokenArena,
    fm_active_list: Option<Box<dyn ActiveList>>,
    fm_best_token_map: HashMap<StateKey, TokenId>,
    fm_frame_number: i64,
    fm_stream_end: bool,
}

impl LookaheadSearchManager {
    /// Fails with [`DecodeError::LookaheadOutOfRange`] when the window is
    /// outside 1..=10.
    pub fn new(
        main: WordPruningSearchManager,
        fastmatch_linguist: Box<dyn Linguist>,
        fastmatch_factory: Box<dyn ActiveListFactory>,
        config: LookaheadConfig,
    ) -> Result<Self, DecodeError> {
        config.validate()?;
        Ok(Self {
            main,
            fastmatch_linguist,
            fastmatch_factory,
            config,
            fm_arena: TokenArena::new(),
            fm_active_list: None,
            fm_best_token_map: HashMap::new(),
            fm_frame_number: 0,
            fm_stream_end: false,
        })
    }

    /// Whether the fast-match feature stream has ended.
    pub fn fast_match_stream_end(&self) -> bool {
        self.fm_stream_end
    }

    /// One fast-match frame: score (storing the frame for the main
    /// pass), prune, grow.
    fn fast_match_recognize(&mut self) {
        let mut list = self
            .fm_active_list
            .take()
            .expect("fast-match list not primed");
        let outcome = self
            .main
            .scorer
            .calculate_scores_and_store(&mut self.fm_arena, list.tokens());
        let best = match outcome {
            ScoreOutcome::Best(best) => best,
            other => {
                debug!(?other, "fast-match stream ended");
                self.fm_stream_end = true;
                self.fm_active_list = Some(list);
                return;
            }
        };
        list.set_best_token(Some(best));
        self.main.pruner.prune(&self.fm_arena, list.as_mut());
        self.fm_frame_number += 1;
        self.fm_best_token_map = HashMap::with_capacity((list.len() * 10).max(1));
        self.grow_fast_match_branches(list);
        self.maybe_compact_fast_match();
    }

    /// Grows the surviving fast-match tokens into a fresh list while
    /// recording each base phone's best score for the penalty window.
    fn grow_fast_match_branches(&mut self, old_list: Box<dyn ActiveList>) {
        self.fm_active_list = Some(self.fastmatch_factory.new_instance());
        let threshold = old_list.beam_threshold(&self.fm_arena);

        let mut frame_scores = vec![f64::NEG_INFINITY; MAX_BASE_IDS];
        let mut frame_max = f64::NEG_INFINITY;
        for &token in old_list.tokens() {
            let score = self.fm_arena.get(token).total_score();
            if score < threshold {
                continue;
            }
            if let Some(base_id) = self
                .fm_arena
                .get(token)
                .state()
                .and_then(|s| s.base_id())
            {
                if frame_scores[base_id] < score {
                    frame_scores[base_id] = score;
                }
                if frame_max < score {
                    frame_max = score;
                }
            }
            self.collect_fast_match_successor_tokens(token);
        }

        if let Some(window) = self.main.penalty_window_mut() {
            window.push(FrameCiScores::new(frame_scores, frame_max));
        }
    }

    /// Expands one fast-match token. Non-emitting successors are expanded
    /// depth-first within the frame (with the ε-cycle visit check);
    /// emitting successors land in the next fast-match list, last writer
    /// winning ties.
    fn collect_fast_match_successor_tokens(&mut self, token: TokenId) {
        let state = self
            .fm_arena
            .get(token)
            .state()
            .expect("expanded token must have a search state")
            .clone();
        let token_score = self.fm_arena.get(token).total_score();

        for arc in state.successors() {
            let next_state = arc.state.clone();
            let log_entry_score = token_score + arc.log_probability;
            let predecessor = self.fm_arena.result_list_predecessor(
                token,
                self.main.config.keep_all_tokens,
                self.main.config.build_word_lattice,
            );

            if !next_state.is_emitting() {
                let new_token = self.fm_arena.new_token(
                    predecessor,
                    next_state,
                    log_entry_score,
                    arc.log_insertion_probability,
                    arc.log_language_probability,
                    self.fm_frame_number,
                );
                if !self.fm_arena.is_visited(new_token) {
                    self.collect_fast_match_successor_tokens(new_token);
                }
                continue;
            }

            let key = StateKey::new(next_state.clone());
            match self.fm_best_token_map.get(&key).copied() {
                None => {
                    let new_token = self.fm_arena.new_token(
                        predecessor,
                        next_state,
                        log_entry_score,
                        arc.log_insertion_probability,
                        arc.log_language_probability,
                        self.fm_frame_number,
                    );
                    self.fm_best_token_map.insert(key, new_token);
                    self.fm_active_list
                        .as_mut()
                        .expect("fast-match list present during growth")
                        .add(&self.fm_arena, new_token);
                }
                Some(best) if self.fm_arena.get(best).total_score() <= log_entry_score => {
                    self.fm_arena.update(
                        best,
                        predecessor,
                        next_state,
                        log_entry_score,
                        arc.log_insertion_probability,
                        arc.log_language_probability,
                        self.fm_frame_number,
                    );
                }
                Some(_) => {}
            }
        }
    }

    fn maybe_compact_fast_match(&mut self) {
        if self.fm_arena.len() < FAST_MATCH_COMPACT_WATERMARK {
            return;
        }
        let mut roots: Vec<TokenId> = self
            .fm_active_list
            .as_ref()
            .map(|l| l.tokens().to_vec())
            .unwrap_or_default();
        roots.extend(self.fm_best_token_map.values().copied());
        let remap = self.fm_arena.compact(roots);
        if let Some(list) = self.fm_active_list.as_mut() {
            list.remap(&remap);
        }
        self.fm_best_token_map
            .retain(|_, id| match remap.map(*id) {
                Some(new) => {
                    *id = new;
                    true
                }
                None => false,
            });
    }
}

impl SearchManager for LookaheadSearchManager {
    fn allocate(&mut self) -> Result<(), DecodeError> {
        self.main.allocate()?;
        self.fastmatch_linguist.allocate()
    }

    fn deallocate(&mut self) {
        self.fastmatch_linguist.deallocate();
        self.main.deallocate();
    }

    /// Primes the fast-match pass and runs it `lookahead_window - 1`
    /// frames ahead so the window is full when the main pass starts.
    fn start_recognition(&mut self) -> Result<(), DecodeError> {
        self.main.start_collaborators()?;
        self.fastmatch_linguist.start_recognition();
        self.main
            .set_penalty_window(Some(PenaltyWindow::new(self.config.lookahead_weight)));

        self.fm_arena.clear();
        self.fm_frame_number = 0;
        self.fm_stream_end = false;
        let initial_state = self.fastmatch_linguist.search_graph().initial_state();
        let mut list = self.fastmatch_factory.new_instance();
        let token = self.fm_arena.new_initial(initial_state, self.fm_frame_number);
        list.add(&self.fm_arena, token);
        self.fm_best_token_map = HashMap::with_capacity(16);
        self.grow_fast_match_branches(list);
        for _ in 0..self.config.lookahead_window.saturating_sub(1) {
            if self.fm_stream_end {
                break;
            }
            self.fast_match_recognize();
        }

        self.main.local_start()
    }

    fn stop_recognition(&mut self) {
        self.main.stop_recognition();
        self.fastmatch_linguist.stop_recognition();
        self.main.set_penalty_window(None);
        self.fm_active_list = None;
        self.fm_best_token_map.clear();
    }

    fn recognize(&mut self, n_frames: usize) -> Result<RecognitionResult, DecodeError> {
        self.main.ensure_started()?;
        let mut done = false;
        for _ in 0..n_frames {
            if done {
                break;
            }
            if !self.fm_stream_end {
                self.fast_match_recognize();
            }
            if let Some(window) = self.main.penalty_window_mut() {
                window.clear_cache();
                window.pop_oldest();
            }
            done = self.main.recognize_frame()?;
        }
        Ok(self.main.collect_result(done))
    }
}
