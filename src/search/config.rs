//! Tunable search parameters.
//!
//! Plain-data structs; callers deserialize them from whatever
//! configuration source they use. Beam widths are given in the linear
//! domain and converted to the log domain at construction.

use serde::Deserialize;

use crate::api::DecodeError;

/// Parameters of the word-pruning breadth-first search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hard cap on the main per-order active lists.
    pub absolute_beam_width: usize,
    /// Linear-domain floor below the best score for the main lists.
    pub relative_beam_width: f64,
    /// Hard cap on the word-order active lists.
    pub absolute_word_beam_width: usize,
    /// Linear-domain floor for the word-order lists.
    pub relative_word_beam_width: f64,
    /// Frames of simple acoustic lookahead applied when growing emitting
    /// branches: the beam is sharpened by projecting each token's score
    /// forward by this multiple of its last acoustic score. Zero disables
    /// the projection.
    pub acoustic_lookahead_frames: f32,
    /// Skip the growth step on every frame where
    /// `frame % grow_skip_interval == 0`. Zero disables skipping. Small
    /// values trade accuracy for speed.
    pub grow_skip_interval: usize,
    /// Cap on loser-predecessor entries kept for the lattice.
    pub max_lattice_edges: usize,
    /// Track losing predecessors of merged word tokens for the lattice.
    pub build_word_lattice: bool,
    /// Retain non-word tokens in result paths. Required for grammar-loop
    /// detection; lexical-tree graphs can leave it off.
    pub keep_all_tokens: bool,
    /// Assert monotone state order along arcs during growth.
    pub check_state_order: bool,
    /// Language-model probability exponent folded into arc scores by the
    /// linguist.
    pub language_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            absolute_beam_width: 20_000,
            relative_beam_width: 1e-60,
            absolute_word_beam_width: 200,
            relative_word_beam_width: 1e-80,
            acoustic_lookahead_frames: 0.0,
            grow_skip_interval: 0,
            max_lattice_edges: 100,
            build_word_lattice: true,
            keep_all_tokens: false,
            check_state_order: false,
            language_weight: 8.0,
        }
    }
}

/// Parameters of the fast-match lookahead pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookaheadConfig {
    /// Fast-match frames kept ahead of the main pass. Legal range 1..=10.
    pub lookahead_window: usize,
    /// Multiplier on the per-phone penalty.
    pub lookahead_weight: f32,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 5,
            lookahead_weight: 1.0,
        }
    }
}

impl LookaheadConfig {
    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(1..=10).contains(&self.lookahead_window) {
            return Err(DecodeError::LookaheadOutOfRange {
                window: self.lookahead_window,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = SearchConfig::default();
        assert_eq!(c.absolute_beam_width, 20_000);
        assert_eq!(c.absolute_word_beam_width, 200);
        assert_eq!(c.relative_beam_width, 1e-60);
        assert_eq!(c.max_lattice_edges, 100);
        assert!(c.build_word_lattice);
        assert!(!c.keep_all_tokens);
        assert_eq!(c.language_weight, 8.0);
    }

    #[test]
    fn test_lookahead_window_range() {
        assert!(LookaheadConfig::default().validate().is_ok());
        let bad = LookaheadConfig {
            lookahead_window: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(DecodeError::LookaheadOutOfRange { window: 0 })
        ));
        let bad = LookaheadConfig {
            lookahead_window: 11,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
