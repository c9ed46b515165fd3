//! Word-pruning breadth-first search.
//!
//! The time-synchronous main loop: score the emitting beam against the
//! next frame, prune it, then grow successors — emitting branches first,
//! then the non-emitting lists in ascending state order — until the next
//! frame's emitting beam is settled. All scores and probabilities are in
//! the LogMath log domain.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use crate::api::DecodeError;
use crate::linguist::{Linguist, StateHandle, StateKey};
use crate::logmath::LogMath;
use crate::result::RecognitionResult;

use super::active_list::ActiveList;
use super::alternates::AlternateHypothesisManager;
use super::config::SearchConfig;
use super::lookahead::PenaltyWindow;
use super::manager::ActiveListManager;
use super::pruner::Pruner;
use super::scorer::{AcousticScorer, ScoreOutcome};
use super::token::{TokenArena, TokenId};
use super::SearchManager;

/// Compact the token arena once it grows past this many tokens beyond
/// the live set.
const COMPACT_WATERMARK: usize = 1 << 16;

/// Breadth-first token-passing decoder over a lexical-tree search graph.
///
/// Lifecycle: `allocate` → `start_recognition` → `recognize`* →
/// `stop_recognition` → `deallocate`. Calls out of order surface as
/// [`DecodeError::IllegalState`].
pub struct WordPruningSearchManager {
    // configured collaborators
    linguist: Box<dyn Linguist>,
    pub(super) pruner: Box<dyn Pruner>,
    pub(super) scorer: AcousticScorer,
    active_list_manager: ActiveListManager,
    logmath: LogMath,

    // configuration
    pub(super) config: SearchConfig,
    /// Log-domain beam used when projecting acoustic scores forward in
    /// the emitting grow step.
    log_relative_beam_width: f64,

    // working state
    pub(super) arena: TokenArena,
    result_list: Vec<TokenId>,
    best_token_map: HashMap<StateKey, TokenId>,
    loser_manager: Option<AlternateHypothesisManager>,
    current_frame_number: usize,
    current_collect_time: i64,
    num_state_order: usize,
    word_token_first: bool,
    stream_end: bool,
    allocated: bool,
    started: bool,
    compact_watermark: usize,

    // lookahead hook: present only when driven by the lookahead manager
    penalties: Option<PenaltyWindow>,

    // statistics
    total_tokens_scored: u64,
}

impl WordPruningSearchManager {
    pub fn new(
        linguist: Box<dyn Linguist>,
        pruner: Box<dyn Pruner>,
        scorer: AcousticScorer,
        active_list_manager: ActiveListManager,
        logmath: LogMath,
        config: SearchConfig,
    ) -> Self {
        let log_relative_beam_width = logmath.linear_to_log(config.relative_word_beam_width) as f64;
        Self {
            linguist,
            pruner,
            scorer,
            active_list_manager,
            logmath,
            config,
            log_relative_beam_width,
            arena: TokenArena::new(),
            result_list: Vec::new(),
            best_token_map: HashMap::new(),
            loser_manager: None,
            current_frame_number: 0,
            current_collect_time: 0,
            num_state_order: 0,
            word_token_first: false,
            stream_end: false,
            allocated: false,
            started: false,
            compact_watermark: COMPACT_WATERMARK,
            penalties: None,
            total_tokens_scored: 0,
        }
    }

    pub fn logmath(&self) -> &LogMath {
        &self.logmath
    }

    /// Tokens scored since allocation.
    pub fn total_tokens_scored(&self) -> u64 {
        self.total_tokens_scored
    }

    pub(super) fn set_penalty_window(&mut self, window: Option<PenaltyWindow>) {
        self.penalties = window;
    }

    pub(super) fn penalty_window_mut(&mut self) -> Option<&mut PenaltyWindow> {
        self.penalties.as_mut()
    }

    fn ensure_allocated(&self) -> Result<(), DecodeError> {
        if !self.allocated {
            return Err(DecodeError::illegal_state(
                "search manager is not allocated",
            ));
        }
        Ok(())
    }

    pub(super) fn ensure_started(&self) -> Result<(), DecodeError> {
        if !self.started {
            return Err(DecodeError::illegal_state(
                "recognition has not been started",
            ));
        }
        Ok(())
    }

    /// Starts the external collaborators. Split from [`Self::local_start`]
    /// so the lookahead manager can prime its fast-match pass in between.
    pub(super) fn start_collaborators(&mut self) -> Result<(), DecodeError> {
        self.ensure_allocated()?;
        self.linguist.start_recognition();
        self.pruner.start_recognition();
        self.scorer.start_recognition();
        Ok(())
    }

    /// Primes the search from the graph's initial state and grows the
    /// non-emitting closure so the first frame starts from a settled
    /// emitting beam.
    pub(super) fn local_start(&mut self) -> Result<(), DecodeError> {
        let graph = self.linguist.search_graph();
        let initial_state = graph.initial_state();
        let num_state_order = graph.num_state_order();
        let word_token_first = graph.word_token_first();

        self.current_frame_number = 0;
        self.current_collect_time = 0;
        self.stream_end = false;
        self.num_state_order = num_state_order;
        self.word_token_first = word_token_first;
        self.arena.clear();
        self.total_tokens_scored = 0;
        self.active_list_manager.set_num_state_order(num_state_order);
        if self.config.build_word_lattice {
            self.loser_manager = Some(AlternateHypothesisManager::new(
                self.config.max_lattice_edges,
            ));
        }

        let mut list = self.active_list_manager.take_emitting_list();
        let token = self.arena.new_initial(initial_state, -1);
        list.add(&self.arena, token);

        self.clear_collectors(list.len());
        self.grow_branches(list)?;
        self.grow_non_emitting_branches()?;
        self.started = true;
        Ok(())
    }

    /// Performs one frame of recognition: score, prune, grow. Returns
    /// `true` when recognition is done — the stream ended or the grown
    /// beam is empty.
    pub(super) fn recognize_frame(&mut self) -> Result<bool, DecodeError> {
        let span = debug_span!("frame", n = self.current_frame_number);
        let _guard = span.enter();

        let mut active = self.active_list_manager.take_emitting_list();
        let outcome = self
            .scorer
            .calculate_scores(&mut self.arena, active.tokens());
        self.total_tokens_scored += active.len() as u64;

        match outcome {
            ScoreOutcome::StreamEnd => {
                self.stream_end = true;
                // keep the surviving beam for result extraction
                self.active_list_manager.restore_emitting_list(active);
                return Ok(true);
            }
            ScoreOutcome::UtteranceEnd(signal) => {
                debug!(?signal, "utterance ended");
                self.active_list_manager.restore_emitting_list(active);
                return Ok(true);
            }
            ScoreOutcome::Best(best) => {
                self.current_collect_time = self.arena.get(best).collect_time();
                active.set_best_token(Some(best));
            }
        }

        self.pruner.prune(&self.arena, active.as_mut());
        self.current_frame_number += 1;

        let grow = self.config.grow_skip_interval == 0
            || self.current_frame_number % self.config.grow_skip_interval != 0;
        if grow {
            let scored = active.len();
            self.clear_collectors(scored);
            self.grow_emitting_branches(active)?;
            self.grow_non_emitting_branches()?;
            debug!(
                scored,
                grown = self.active_list_manager.emitting_list().len(),
                tokens_created = self.arena.created(),
                collect_time = self.current_collect_time,
                "frame grown"
            );
            self.maybe_compact();
            if self.active_list_manager.emitting_list().is_empty() {
                return Ok(true);
            }
        } else {
            // growth skipped: the pruned beam carries over to next frame
            self.active_list_manager.restore_emitting_list(active);
        }
        Ok(false)
    }

    // Resets the per-frame collectors: result list and best-token map.
    // The emitting list slot already holds a fresh instance because the
    // old list was taken for scoring.
    fn clear_collectors(&mut self, prev_emitting_size: usize) {
        self.result_list.clear();
        self.best_token_map = HashMap::with_capacity((prev_emitting_size * 10).max(1));
    }

    /// Grows the emitting branches, optionally sharpening the beam by
    /// projecting each token's score forward by
    /// `acoustic_lookahead_frames` times its last acoustic score.
    fn grow_emitting_branches(&mut self, active: Box<dyn ActiveList>) -> Result<(), DecodeError> {
        let lookahead = self.config.acoustic_lookahead_frames;
        if lookahead <= 0.0 {
            return self.grow_branches(active);
        }

        let project = |arena: &TokenArena, t: TokenId| {
            let token = arena.get(t);
            token.total_score() + token.acoustic_score() as f64 * lookahead as f64
        };
        let mut best_score = f64::NEG_INFINITY;
        for &t in active.tokens() {
            best_score = best_score.max(project(&self.arena, t));
        }
        let threshold = best_score + self.log_relative_beam_width;

        let tokens: Vec<TokenId> = active.tokens().to_vec();
        let beam_threshold = active.beam_threshold(&self.arena);
        for t in tokens {
            if project(&self.arena, t) > threshold {
                self.collect_successor_tokens(t, beam_threshold)?;
            }
        }
        Ok(())
    }

    /// Expands every token in the list above its relative beam.
    fn grow_branches(&mut self, active: Box<dyn ActiveList>) -> Result<(), DecodeError> {
        let threshold = active.beam_threshold(&self.arena);
        let tokens: Vec<TokenId> = active.tokens().to_vec();
        for t in tokens {
            if self.arena.get(t).total_score() >= threshold {
                self.collect_successor_tokens(t, threshold)?;
            }
        }
        Ok(())
    }

    /// Drains the non-emitting lists in ascending state order, pruning
    /// and growing each; successors settle into later non-emitting lists
    /// or the next frame's emitting list.
    fn grow_non_emitting_branches(&mut self) -> Result<(), DecodeError> {
        for order in self.active_list_manager.non_emitting_orders() {
            let mut list = self.active_list_manager.take_non_emitting_list(order);
            self.pruner.prune(&self.arena, list.as_mut());
            self.grow_branches(list)?;
        }
        Ok(())
    }

    /// Expands one token: final tokens go to the result list, everything
    /// else creates or improves successor tokens per arc. A successor is
    /// only replaced by a strictly better path; equal scores keep the
    /// incumbent.
    fn collect_successor_tokens(
        &mut self,
        token: TokenId,
        beam_threshold: f64,
    ) -> Result<(), DecodeError> {
        if self.arena.get(token).is_final() {
            let predecessor = self.result_list_predecessor(token);
            if let Some(p) = predecessor {
                self.result_list.push(p);
            }
            return Ok(());
        }

        // A non-emitting token whose state was already visited this frame
        // is a grammar loop; expanding it would never terminate. The check
        // needs the full token chain, hence the keep_all_tokens gate.
        if !self.arena.get(token).is_emitting()
            && self.config.keep_all_tokens
            && self.arena.is_visited(token)
        {
            return Ok(());
        }

        let state: StateHandle = self
            .arena
            .get(token)
            .state()
            .expect("expanded token must have a search state")
            .clone();
        let arcs = state.successors();
        let predecessor = self.result_list_predecessor(token);
        let token_score = self.arena.get(token).total_score();
        let expands_to_phones = state.expands_to_phones();

        for arc in arcs {
            let next_state = arc.state.clone();

            if let Some(window) = self.penalties.as_mut() {
                if expands_to_phones {
                    if let Some(base_id) = next_state.base_id() {
                        let penalty = window.penalty(base_id);
                        if token_score + window.weight() as f64 * penalty < beam_threshold {
                            continue;
                        }
                    }
                }
            }

            if self.config.check_state_order {
                self.check_state_order(&state, &next_state)?;
            }

            // probabilities multiply; in the log domain they add
            let log_entry_score = token_score + arc.log_probability;
            let key = StateKey::new(next_state.clone());
            let is_word = next_state.word().is_some();

            match self.best_token_map.get(&key).copied() {
                None => {
                    let new_token = self.arena.new_token(
                        predecessor,
                        next_state,
                        log_entry_score,
                        arc.log_insertion_probability,
                        arc.log_language_probability,
                        self.current_collect_time,
                    );
                    self.best_token_map.insert(key, new_token);
                    self.active_list_manager.add(&self.arena, new_token);
                }
                Some(best) if self.arena.get(best).total_score() < log_entry_score => {
                    let old_predecessor = self.arena.get(best).predecessor();
                    self.arena.update(
                        best,
                        predecessor,
                        next_state,
                        log_entry_score,
                        arc.log_insertion_probability,
                        arc.log_language_probability,
                        self.current_collect_time,
                    );
                    if self.config.build_word_lattice && is_word {
                        if let (Some(losers), Some(old)) =
                            (self.loser_manager.as_mut(), old_predecessor)
                        {
                            losers.add_alternate_predecessor(best, old);
                        }
                    }
                }
                Some(best) => {
                    if self.config.build_word_lattice && is_word {
                        if let (Some(losers), Some(p)) =
                            (self.loser_manager.as_mut(), predecessor)
                        {
                            losers.add_alternate_predecessor(best, p);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn result_list_predecessor(&mut self, token: TokenId) -> Option<TokenId> {
        self.arena.result_list_predecessor(
            token,
            self.config.keep_all_tokens,
            self.config.build_word_lattice,
        )
    }

    // The emitting order never feeds forward, so it is exempt.
    fn check_state_order(
        &self,
        from: &StateHandle,
        to: &StateHandle,
    ) -> Result<(), DecodeError> {
        if from.order() == self.num_state_order - 1 {
            return Ok(());
        }
        if from.order() > to.order() {
            return Err(DecodeError::OrderViolation {
                msg: format!(
                    "arc from {} (order {}) to {} (order {})",
                    from.signature(),
                    from.order(),
                    to.signature(),
                    to.order()
                ),
            });
        }
        Ok(())
    }

    // Releases tokens no longer reachable from the active lists, the
    // result list or the lattice losers, then rewrites every held id.
    fn maybe_compact(&mut self) {
        if self.arena.len() < self.compact_watermark {
            return;
        }
        let mut roots: Vec<TokenId> = self.active_list_manager.all_tokens().collect();
        roots.extend_from_slice(&self.result_list);
        if let Some(losers) = &self.loser_manager {
            roots.extend(losers.referenced_tokens());
        }

        let before = self.arena.len();
        let remap = self.arena.compact(roots);
        self.active_list_manager.remap(&remap);
        remap.map_vec(&mut self.result_list);
        if let Some(losers) = self.loser_manager.as_mut() {
            losers.remap(&remap);
        }
        self.best_token_map.clear();
        self.compact_watermark = (self.arena.len() * 4).max(COMPACT_WATERMARK);
        debug!(before, after = self.arena.len(), "arena compacted");
    }

    /// Assembles the owned result for the caller: best word path, lattice
    /// when enabled and final, and the bookkeeping the caller needs to
    /// decide whether to keep calling.
    pub(super) fn collect_result(&self, done: bool) -> RecognitionResult {
        RecognitionResult::collect(
            &self.arena,
            self.active_list_manager.emitting_list().tokens(),
            &self.result_list,
            self.loser_manager.as_ref(),
            &self.logmath,
            self.current_collect_time,
            done,
            self.stream_end,
            self.word_token_first,
        )
    }
}

impl SearchManager for WordPruningSearchManager {
    fn allocate(&mut self) -> Result<(), DecodeError> {
        self.linguist.allocate()?;
        self.pruner.allocate();
        self.scorer.allocate();
        self.allocated = true;
        debug!("search manager allocated");
        Ok(())
    }

    fn deallocate(&mut self) {
        self.scorer.deallocate();
        self.pruner.deallocate();
        self.linguist.deallocate();
        self.allocated = false;
    }

    fn start_recognition(&mut self) -> Result<(), DecodeError> {
        self.start_collaborators()?;
        self.local_start()
    }

    fn stop_recognition(&mut self) {
        self.scorer.stop_recognition();
        self.pruner.stop_recognition();
        self.linguist.stop_recognition();
        self.loser_manager = None;
        self.result_list.clear();
        self.started = false;
    }

    fn recognize(&mut self, n_frames: usize) -> Result<RecognitionResult, DecodeError> {
        self.ensure_started()?;
        self.stream_end = false;
        let mut done = false;
        for _ in 0..n_frames {
            if done {
                break;
            }
            done = self.recognize_frame()?;
        }
        Ok(self.collect_result(done))
    }
}
