//! Token trellis.
//!
//! A token is one node of the Viterbi trellis: a (state, time, score,
//! predecessor) tuple. Tokens form a DAG with many-to-one back pointers —
//! a token may be referenced from the active lists, the best-token map,
//! the result list and the lattice loser map at once — so they live in a
//! per-session arena addressed by [`TokenId`] handles. All scores are in
//! the LogMath log base.

use std::collections::HashMap;

use crate::frontend::Frame;
use crate::linguist::StateHandle;

/// Handle to a token in a [`TokenArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(u32);

impl TokenId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single state in the recognition trellis.
#[derive(Clone)]
pub struct Token {
    predecessor: Option<TokenId>,
    /// `None` only for synthetic result-list predecessors, which carry
    /// collapsed scores but no position in the search graph.
    state: Option<StateHandle>,
    log_total_score: f64,
    log_acoustic_score: f32,
    log_insertion_score: f32,
    log_language_score: f32,
    collect_time: i64,
    feature: Option<Frame>,
}

impl Token {
    pub fn predecessor(&self) -> Option<TokenId> {
        self.predecessor
    }

    pub fn state(&self) -> Option<&StateHandle> {
        self.state.as_ref()
    }

    /// Combined acoustic + language + transition score so far.
    pub fn total_score(&self) -> f64 {
        self.log_total_score
    }

    /// Acoustic score of the last scoring step (frame GMM sum).
    pub fn acoustic_score(&self) -> f32 {
        self.log_acoustic_score
    }

    /// Insertion score of the last transition: HMM transition, phone
    /// insertion or word insertion probability from the linguist.
    pub fn insertion_score(&self) -> f32 {
        self.log_insertion_score
    }

    pub fn language_score(&self) -> f32 {
        self.log_language_score
    }

    /// Frame index at which this token was scored. Non-decreasing along a
    /// path; may skip over frames dropped by the endpointer.
    pub fn collect_time(&self) -> i64 {
        self.collect_time
    }

    pub fn feature(&self) -> Option<&Frame> {
        self.feature.as_ref()
    }

    pub fn is_emitting(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_emitting())
    }

    pub fn is_final(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_final())
    }

    /// Whether this token marks the end of a word.
    pub fn is_word(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.word().is_some())
    }
}

/// Per-session arena holding the trellis.
#[derive(Default)]
pub struct TokenArena {
    tokens: Vec<Token>,
    created: u64,
}

impl TokenArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Total tokens created since the last `clear`.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Drops the whole trellis. Called between utterances.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.created = 0;
    }

    pub fn get(&self, id: TokenId) -> &Token {
        &self.tokens[id.index()]
    }

    fn push(&mut self, token: Token) -> TokenId {
        let id = TokenId(self.tokens.len() as u32);
        self.tokens.push(token);
        self.created += 1;
        id
    }

    /// The initial token priming the search at an utterance start.
    pub fn new_initial(&mut self, state: StateHandle, collect_time: i64) -> TokenId {
        self.push(Token {
            predecessor: None,
            state: Some(state),
            log_total_score: 0.0,
            log_acoustic_score: 0.0,
            log_insertion_score: 0.0,
            log_language_score: 0.0,
            collect_time,
            feature: None,
        })
    }

    /// A successor token entering `state` with the given entry score and
    /// last-step score components.
    pub fn new_token(
        &mut self,
        predecessor: Option<TokenId>,
        state: StateHandle,
        log_total_score: f64,
        log_insertion_score: f32,
        log_language_score: f32,
        collect_time: i64,
    ) -> TokenId {
        self.push(Token {
            predecessor,
            state: Some(state),
            log_total_score,
            log_acoustic_score: 0.0,
            log_insertion_score,
            log_language_score,
            collect_time,
            feature: None,
        })
    }

    /// A synthetic result-list predecessor carrying the summed scores of a
    /// collapsed non-word token chain.
    pub fn new_synthetic(
        &mut self,
        predecessor: Option<TokenId>,
        log_total_score: f64,
        log_acoustic_score: f32,
        log_insertion_score: f32,
        log_language_score: f32,
        collect_time: i64,
    ) -> TokenId {
        self.push(Token {
            predecessor,
            state: None,
            log_total_score,
            log_acoustic_score,
            log_insertion_score,
            log_language_score,
            collect_time,
            feature: None,
        })
    }

    /// Redirects a token onto a better-scoring path. The only mutation a
    /// linked token undergoes: invoked when a higher-scoring path reaches
    /// the same state in the same frame.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        id: TokenId,
        predecessor: Option<TokenId>,
        state: StateHandle,
        log_total_score: f64,
        log_insertion_score: f32,
        log_language_score: f32,
        collect_time: i64,
    ) {
        let t = &mut self.tokens[id.index()];
        t.predecessor = predecessor;
        t.state = Some(state);
        t.log_total_score = log_total_score;
        t.log_insertion_score = log_insertion_score;
        t.log_language_score = log_language_score;
        t.collect_time = collect_time;
    }

    /// Scores the token's emitting state against `frame`, accumulates the
    /// result into the total score and keeps a reference to the frame.
    pub fn calculate_score(&mut self, id: TokenId, frame: &Frame) -> f64 {
        let t = &mut self.tokens[id.index()];
        let state = t
            .state
            .as_ref()
            .expect("scored token must have a search state");
        let acoustic = state.score(frame);
        t.log_acoustic_score = acoustic;
        t.log_total_score += acoustic as f64;
        t.collect_time = frame.collect_time;
        t.feature = Some(frame.clone());
        t.log_total_score
    }

    /// Per-component acoustic scores against the token's stored frame.
    pub fn component_scores(&self, id: TokenId) -> Vec<f32> {
        let t = self.get(id);
        match (&t.state, &t.feature) {
            (Some(state), Some(frame)) => state.component_score(frame),
            _ => Vec::new(),
        }
    }

    /// Normalizes a previously calculated score against the frame maximum.
    pub fn normalize_score(&mut self, id: TokenId, max_log_score: f64) -> f64 {
        let t = &mut self.tokens[id.index()];
        t.log_total_score -= max_log_score;
        t.log_acoustic_score -= max_log_score as f32;
        t.log_total_score
    }

    /// Tokens along the path to `id` whose state ends a word, earliest
    /// first. Fillers are skipped unless `want_filler` is set.
    pub fn word_tokens(&self, id: TokenId, want_filler: bool) -> Vec<TokenId> {
        let mut out = Vec::new();
        let mut cur = Some(id);
        while let Some(t) = cur {
            let token = self.get(t);
            if let Some(word) = token.state().and_then(|s| s.word()) {
                if want_filler || !word.filler {
                    out.push(t);
                }
            }
            cur = token.predecessor();
        }
        out.reverse();
        out
    }

    /// The string of words leading up to `id`, fillers excluded.
    pub fn word_path(&self, id: TokenId) -> String {
        let spellings: Vec<String> = self
            .word_tokens(id, false)
            .iter()
            .map(|&t| {
                self.get(t)
                    .state()
                    .and_then(|s| s.word())
                    .map(|w| w.spelling.clone())
                    .unwrap_or_default()
            })
            .collect();
        spellings.join(" ")
    }

    /// The string of words and units leading up to `id`, silences
    /// included. Debug aid for inspecting a trellis branch.
    pub fn word_unit_path(&self, id: TokenId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(t) = cur {
            let token = self.get(t);
            if let Some(state) = token.state() {
                if let Some(word) = state.word() {
                    parts.push(word.spelling.clone());
                } else if let Some(unit) = state.unit_name() {
                    parts.push(unit.to_string());
                }
            }
            cur = token.predecessor();
        }
        parts.reverse();
        parts.join(" ")
    }

    /// Whether the state of `id` already occurs among its non-emitting
    /// ancestors. The walk stops at the first emitting ancestor, so the
    /// check is per-frame. Detects ε-cycles from nasty grammars such as
    /// `((foo*)*)*`; lexical-tree graphs never produce them.
    pub fn is_visited(&self, id: TokenId) -> bool {
        let Some(signature) = self.get(id).state().map(|s| s.signature()) else {
            return false;
        };
        let mut cur = self.get(id).predecessor();
        while let Some(t) = cur {
            let token = self.get(t);
            if token.is_emitting() {
                break;
            }
            if token
                .state()
                .is_some_and(|s| s.signature() == signature)
            {
                return true;
            }
            cur = token.predecessor();
        }
        false
    }

    /// Finds the token to use as a predecessor in the result list. Three
    /// retention modes:
    ///
    /// 1. `keep_all_tokens`: the full path is retained as-is.
    /// 2. words only: non-word tokens are dropped; timing and score
    ///    detail is lost.
    /// 3. word lattice: non-word tokens collapse into one synthetic
    ///    predecessor whose component scores are the sums over the
    ///    collapsed chain, so lattice edges keep correct weight.
    pub fn result_list_predecessor(
        &mut self,
        id: TokenId,
        keep_all_tokens: bool,
        build_word_lattice: bool,
    ) -> Option<TokenId> {
        if keep_all_tokens {
            return Some(id);
        }
        if !build_word_lattice {
            if self.get(id).is_word() {
                return Some(id);
            }
            return self.get(id).predecessor();
        }

        let collect_time = self.get(id).collect_time();
        let mut log_acoustic = 0.0f32;
        let mut log_language = 0.0f32;
        let mut log_insertion = 0.0f32;
        let mut cur = Some(id);
        while let Some(t) = cur {
            let token = self.get(t);
            if token.is_word() {
                break;
            }
            log_acoustic += token.acoustic_score();
            log_language += token.language_score();
            log_insertion += token.insertion_score();
            cur = token.predecessor();
        }
        let total = cur.map(|t| self.get(t).total_score()).unwrap_or(0.0);
        Some(self.new_synthetic(
            cur,
            total,
            log_acoustic,
            log_insertion,
            log_language,
            collect_time,
        ))
    }

    /// Releases every token not reachable from `roots` and re-packs the
    /// arena. Returns the id remapping; callers must remap every held
    /// [`TokenId`]. Reachability through predecessor chains is the single
    /// retention criterion.
    pub fn compact(&mut self, roots: impl IntoIterator<Item = TokenId>) -> TokenRemap {
        let mut live = vec![false; self.tokens.len()];
        let mut stack: Vec<TokenId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if live[id.index()] {
                continue;
            }
            live[id.index()] = true;
            if let Some(pred) = self.tokens[id.index()].predecessor {
                if !live[pred.index()] {
                    stack.push(pred);
                }
            }
        }

        let mut remap = vec![None; self.tokens.len()];
        let mut kept = Vec::with_capacity(live.iter().filter(|&&l| l).count());
        for (old, token) in self.tokens.drain(..).enumerate() {
            if live[old] {
                remap[old] = Some(TokenId(kept.len() as u32));
                kept.push(token);
            }
        }
        for token in kept.iter_mut() {
            if let Some(pred) = token.predecessor {
                token.predecessor = remap[pred.index()];
            }
        }
        self.tokens = kept;
        TokenRemap { remap }
    }
}

/// Old-id to new-id mapping produced by [`TokenArena::compact`].
pub struct TokenRemap {
    remap: Vec<Option<TokenId>>,
}

impl TokenRemap {
    /// New id of a surviving token; `None` if it was released.
    pub fn map(&self, id: TokenId) -> Option<TokenId> {
        self.remap.get(id.index()).copied().flatten()
    }

    /// Remaps a list of ids in place, dropping released tokens.
    pub fn map_vec(&self, ids: &mut Vec<TokenId>) {
        ids.retain_mut(|id| match self.map(*id) {
            Some(new) => {
                *id = new;
                true
            }
            None => false,
        });
    }

    /// Remaps a token-keyed map, dropping entries whose key or any value
    /// was released.
    pub fn map_token_lists(&self, map: &mut HashMap<TokenId, Vec<TokenId>>) {
        let old = std::mem::take(map);
        for (key, mut values) in old {
            if let Some(new_key) = self.map(key) {
                self.map_vec(&mut values);
                map.insert(new_key, values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testutil::{emitting_state, non_emitting_state, word_state};

    #[test]
    fn test_initial_token_has_zero_scores() {
        let mut arena = TokenArena::new();
        let s = emitting_state("s0", 1, &[-1.0]);
        let t = arena.new_initial(s, -1);
        assert_eq!(arena.get(t).total_score(), 0.0);
        assert_eq!(arena.get(t).collect_time(), -1);
        assert!(arena.get(t).predecessor().is_none());
    }

    #[test]
    fn test_calculate_score_accumulates() {
        let mut arena = TokenArena::new();
        let s = emitting_state("s0", 1, &[-2.0, -3.0]);
        let t = arena.new_initial(s, 0);
        let frame = crate::search::testutil::frame(0);
        let total = arena.calculate_score(t, &frame);
        assert_eq!(total, -2.0);
        assert_eq!(arena.get(t).acoustic_score(), -2.0);
        let frame2 = crate::search::testutil::frame(1);
        let total2 = arena.calculate_score(t, &frame2);
        assert_eq!(total2, -5.0);
        assert_eq!(arena.get(t).collect_time(), 1);
    }

    #[test]
    fn test_normalize_score() {
        let mut arena = TokenArena::new();
        let s = emitting_state("s0", 1, &[-2.0]);
        let t = arena.new_initial(s, 0);
        arena.calculate_score(t, &crate::search::testutil::frame(0));
        arena.normalize_score(t, -0.5);
        assert_eq!(arena.get(t).total_score(), -1.5);
        assert_eq!(arena.get(t).acoustic_score(), -1.5);
    }

    #[test]
    fn test_word_path_skips_fillers() {
        let mut arena = TokenArena::new();
        let w1 = word_state("w1", 2, "one", false);
        let sil = word_state("sil", 2, "<sil>", true);
        let w2 = word_state("w2", 2, "two", false);
        let a = arena.new_token(None, w1, -1.0, 0.0, 0.0, 0);
        let b = arena.new_token(Some(a), sil, -2.0, 0.0, 0.0, 1);
        let c = arena.new_token(Some(b), w2, -3.0, 0.0, 0.0, 2);
        assert_eq!(arena.word_path(c), "one two");
        assert_eq!(arena.word_tokens(c, true).len(), 3);
    }

    #[test]
    fn test_word_unit_path_includes_fillers() {
        let mut arena = TokenArena::new();
        let w1 = word_state("w1", 2, "one", false);
        let sil = word_state("sil", 2, "<sil>", true);
        let a = arena.new_token(None, w1, -1.0, 0.0, 0.0, 0);
        let b = arena.new_token(Some(a), sil, -2.0, 0.0, 0.0, 1);
        assert_eq!(arena.word_unit_path(b), "one <sil>");
    }

    #[test]
    fn test_is_visited_detects_epsilon_cycle() {
        let mut arena = TokenArena::new();
        let a = non_emitting_state("a", 0);
        let b = non_emitting_state("b", 0);
        let t0 = arena.new_token(None, a.clone(), 0.0, 0.0, 0.0, 0);
        let t1 = arena.new_token(Some(t0), b, 0.0, 0.0, 0.0, 0);
        let t2 = arena.new_token(Some(t1), a, 0.0, 0.0, 0.0, 0);
        assert!(arena.is_visited(t2));
        assert!(!arena.is_visited(t1));
    }

    #[test]
    fn test_is_visited_stops_at_emitting_ancestor() {
        let mut arena = TokenArena::new();
        let a = non_emitting_state("a", 0);
        let e = emitting_state("e", 1, &[-1.0]);
        // a -> e -> a: the second a is beyond an emitting ancestor,
        // i.e. a previous frame, so it is not a within-frame revisit.
        let t0 = arena.new_token(None, a.clone(), 0.0, 0.0, 0.0, 0);
        let t1 = arena.new_token(Some(t0), e, 0.0, 0.0, 0.0, 0);
        let t2 = arena.new_token(Some(t1), a, 0.0, 0.0, 0.0, 1);
        assert!(!arena.is_visited(t2));
    }

    #[test]
    fn test_result_list_predecessor_collapses_scores() {
        let mut arena = TokenArena::new();
        let w = word_state("w", 2, "hello", false);
        let u1 = non_emitting_state("u1", 1);
        let u2 = non_emitting_state("u2", 1);
        let tw = arena.new_token(None, w, -1.0, 0.0, 0.0, 0);
        let t1 = arena.new_token(Some(tw), u1, -2.0, -0.25, -0.5, 1);
        let t2 = arena.new_token(Some(t1), u2, -3.0, -0.75, -1.5, 2);

        let p = arena
            .result_list_predecessor(t2, false, true)
            .expect("synthetic predecessor");
        let synth = arena.get(p);
        assert!(synth.state().is_none());
        assert_eq!(synth.predecessor(), Some(tw));
        assert_eq!(synth.insertion_score(), -1.0);
        assert_eq!(synth.language_score(), -2.0);
        assert_eq!(synth.total_score(), -1.0);
    }

    #[test]
    fn test_result_list_predecessor_words_only() {
        let mut arena = TokenArena::new();
        let w = word_state("w", 2, "hello", false);
        let u = non_emitting_state("u", 1);
        let tw = arena.new_token(None, w, -1.0, 0.0, 0.0, 0);
        let tu = arena.new_token(Some(tw), u, -2.0, 0.0, 0.0, 1);
        assert_eq!(arena.result_list_predecessor(tu, false, false), Some(tw));
        assert_eq!(arena.result_list_predecessor(tw, false, false), Some(tw));
        assert_eq!(arena.result_list_predecessor(tu, true, false), Some(tu));
    }

    #[test]
    fn test_compact_releases_unreachable() {
        let mut arena = TokenArena::new();
        let s = non_emitting_state("s", 0);
        let a = arena.new_token(None, s.clone(), -1.0, 0.0, 0.0, 0);
        let b = arena.new_token(Some(a), s.clone(), -2.0, 0.0, 0.0, 0);
        let dead = arena.new_token(None, s, -9.0, 0.0, 0.0, 0);
        assert_eq!(arena.len(), 3);

        let remap = arena.compact([b]);
        assert_eq!(arena.len(), 2);
        assert!(remap.map(dead).is_none());
        let new_b = remap.map(b).expect("b survives");
        let new_a = remap.map(a).expect("a reachable from b");
        assert_eq!(arena.get(new_b).predecessor(), Some(new_a));
        assert_eq!(arena.get(new_b).total_score(), -2.0);
    }
}
