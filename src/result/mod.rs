//! Recognition results.
//!
//! A result is assembled by the search manager at collection time into an
//! owned value: the best word path with per-word timing and score
//! decomposition, and — for final results with lattice tracking enabled —
//! the word lattice of alternate hypotheses. Results can be partial or
//! final; a partial result reflects the best hypothesis so far and should
//! not be treated as stable.

mod lattice;

pub use lattice::{Lattice, LatticeEdge, LatticeNode};

use crate::logmath::LogMath;
use crate::search::alternates::AlternateHypothesisManager;
use crate::search::token::{TokenArena, TokenId};

/// One word on the best path.
#[derive(Debug, Clone, PartialEq)]
pub struct WordResult {
    pub spelling: String,
    pub filler: bool,
    /// Frame time at which the word was collected.
    pub collect_time: i64,
    pub log_total_score: f64,
    pub log_acoustic_score: f32,
    pub log_language_score: f32,
    pub log_insertion_score: f32,
}

/// The outcome of a `recognize` call.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    words: Vec<WordResult>,
    best_score: f64,
    is_final: bool,
    stream_end: bool,
    collect_time: i64,
    active_token_count: usize,
    final_token_count: usize,
    lattice: Option<Lattice>,
    reference_text: Option<String>,
}

impl RecognitionResult {
    /// Extracts the result from the live trellis. The best hypothesis is
    /// the highest-scoring final token when any reached a final state,
    /// otherwise the best surviving emitting token.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn collect(
        arena: &TokenArena,
        active_tokens: &[TokenId],
        result_list: &[TokenId],
        loser_manager: Option<&AlternateHypothesisManager>,
        logmath: &LogMath,
        collect_time: i64,
        is_final: bool,
        stream_end: bool,
        word_token_first: bool,
    ) -> Self {
        let best_of = |tokens: &[TokenId]| {
            tokens.iter().copied().max_by(|&a, &b| {
                arena
                    .get(a)
                    .total_score()
                    .partial_cmp(&arena.get(b).total_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        };
        let best_token = best_of(result_list).or_else(|| best_of(active_tokens));

        let words = best_token
            .map(|t| {
                arena
                    .word_tokens(t, true)
                    .into_iter()
                    .map(|w| {
                        let token = arena.get(w);
                        let word = token
                            .state()
                            .and_then(|s| s.word())
                            .expect("word token has a word");
                        WordResult {
                            spelling: word.spelling.clone(),
                            filler: word.filler,
                            collect_time: token.collect_time(),
                            log_total_score: token.total_score(),
                            log_acoustic_score: token.acoustic_score(),
                            log_language_score: token.language_score(),
                            log_insertion_score: token.insertion_score(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let lattice = match (is_final, loser_manager) {
            (true, Some(losers)) if !result_list.is_empty() => Some(Lattice::build(
                arena,
                result_list,
                losers,
                logmath,
                word_token_first,
            )),
            _ => None,
        };

        RecognitionResult {
            words,
            best_score: best_token
                .map(|t| arena.get(t).total_score())
                .unwrap_or(f64::NEG_INFINITY),
            is_final,
            stream_end,
            collect_time,
            active_token_count: active_tokens.len(),
            final_token_count: result_list.len(),
            lattice,
            reference_text: None,
        }
    }

    /// Attaches the reference transcript for scoring harnesses.
    pub fn set_reference_text(&mut self, reference: impl Into<String>) {
        self.reference_text = Some(reference.into());
    }

    pub fn reference_text(&self) -> Option<&str> {
        self.reference_text.as_deref()
    }

    /// The best hypothesis, fillers excluded.
    pub fn text(&self) -> String {
        let spellings: Vec<&str> = self
            .words
            .iter()
            .filter(|w| !w.filler)
            .map(|w| w.spelling.as_str())
            .collect();
        spellings.join(" ")
    }

    /// The best word path, fillers included.
    pub fn words(&self) -> &[WordResult] {
        &self.words
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Whether recognition completed. Further `recognize` calls after a
    /// final result require a restart.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Whether the feature stream is exhausted (as opposed to an
    /// utterance boundary).
    pub fn stream_end(&self) -> bool {
        self.stream_end
    }

    /// Collect time of the last scored frame.
    pub fn collect_time(&self) -> i64 {
        self.collect_time
    }

    /// Size of the surviving emitting beam.
    pub fn active_token_count(&self) -> usize {
        self.active_token_count
    }

    /// Number of tokens that reached a final state this frame.
    pub fn final_token_count(&self) -> usize {
        self.final_token_count
    }

    /// The word lattice; present on final results when lattice tracking
    /// is enabled.
    pub fn lattice(&self) -> Option<&Lattice> {
        self.lattice.as_ref()
    }
}
