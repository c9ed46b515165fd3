#![cfg(test)]

//! Shared builders for search tests: synthetic states, graphs, frames
//! and pre-scored token arenas.

use std::cell::RefCell;
use std::rc::Rc;

use crate::api::DecodeError;
use crate::frontend::{BufferedFrontEnd, FloatData, Frame, FrontEnd};
use crate::linguist::{
    Linguist, SearchGraph, SearchState, SearchStateArc, StateHandle, Word,
};
use crate::logmath::LogMath;
use crate::search::active_list::SimpleActiveListFactory;
use crate::search::config::SearchConfig;
use crate::search::manager::ActiveListManager;
use crate::search::pruner::SimplePruner;
use crate::search::scorer::AcousticScorer;
use crate::search::search_manager::WordPruningSearchManager;
use crate::search::token::{TokenArena, TokenId};

/// A scriptable search state. Successors are wired after construction so
/// graphs may contain cycles.
pub struct TestState {
    name: String,
    order: usize,
    emitting: bool,
    is_final: bool,
    /// Acoustic score per frame, indexed by the frame's collect time.
    scores: Vec<f32>,
    word: Option<Word>,
    base_id: Option<usize>,
    expands_to_phones: bool,
    successors: RefCell<Vec<SearchStateArc>>,
}

impl TestState {
    fn base(name: &str, order: usize) -> TestState {
        TestState {
            name: name.to_string(),
            order,
            emitting: false,
            is_final: false,
            scores: Vec::new(),
            word: None,
            base_id: None,
            expands_to_phones: false,
            successors: RefCell::new(Vec::new()),
        }
    }

    pub fn non_emitting(name: &str, order: usize) -> Rc<TestState> {
        Rc::new(Self::base(name, order))
    }

    pub fn emitting(name: &str, order: usize, scores: &[f32]) -> Rc<TestState> {
        let mut s = Self::base(name, order);
        s.emitting = true;
        s.scores = scores.to_vec();
        Rc::new(s)
    }

    pub fn word(name: &str, order: usize, spelling: &str, filler: bool) -> Rc<TestState> {
        let mut s = Self::base(name, order);
        s.word = Some(if filler {
            Word::filler(spelling)
        } else {
            Word::new(spelling)
        });
        Rc::new(s)
    }

    pub fn final_state(name: &str, order: usize) -> Rc<TestState> {
        let mut s = Self::base(name, order);
        s.is_final = true;
        Rc::new(s)
    }

    /// An emitting context-independent phone HMM state.
    pub fn phone_hmm(
        name: &str,
        order: usize,
        scores: &[f32],
        base_id: usize,
    ) -> Rc<TestState> {
        let mut s = Self::base(name, order);
        s.emitting = true;
        s.scores = scores.to_vec();
        s.base_id = Some(base_id);
        Rc::new(s)
    }

    /// Marks this state as one whose expansion yields phone HMMs,
    /// subjecting its outgoing arcs to the lookahead penalty.
    pub fn expanding_to_phones(name: &str, order: usize) -> Rc<TestState> {
        let mut s = Self::base(name, order);
        s.expands_to_phones = true;
        Rc::new(s)
    }

    /// Adds an arc with a composite probability and zero components.
    pub fn link(from: &Rc<TestState>, to: &Rc<TestState>, log_probability: f64) {
        Self::link_full(from, to, log_probability, 0.0, 0.0);
    }

    pub fn link_full(
        from: &Rc<TestState>,
        to: &Rc<TestState>,
        log_probability: f64,
        log_insertion_probability: f32,
        log_language_probability: f32,
    ) {
        from.successors.borrow_mut().push(SearchStateArc {
            state: to.clone() as StateHandle,
            log_probability,
            log_insertion_probability,
            log_language_probability,
        });
    }
}

impl SearchState for TestState {
    fn order(&self) -> usize {
        self.order
    }

    fn is_emitting(&self) -> bool {
        self.emitting
    }

    fn is_final(&self) -> bool {
        self.is_final
    }

    fn successors(&self) -> Vec<SearchStateArc> {
        self.successors.borrow().clone()
    }

    fn signature(&self) -> String {
        self.name.clone()
    }

    fn score(&self, frame: &FloatData) -> f32 {
        self.scores
            .get(frame.collect_time as usize)
            .copied()
            .unwrap_or(f32::NEG_INFINITY)
    }

    fn word(&self) -> Option<&Word> {
        self.word.as_ref()
    }

    fn base_id(&self) -> Option<usize> {
        self.base_id
    }

    fn expands_to_phones(&self) -> bool {
        self.expands_to_phones
    }
}

pub fn non_emitting_state(name: &str, order: usize) -> StateHandle {
    TestState::non_emitting(name, order)
}

pub fn emitting_state(name: &str, order: usize, scores: &[f32]) -> StateHandle {
    TestState::emitting(name, order, scores)
}

pub fn word_state(name: &str, order: usize, spelling: &str, filler: bool) -> StateHandle {
    TestState::word(name, order, spelling, filler)
}

/// A frame whose collect time doubles as the index into each test
/// state's score table.
pub fn frame(collect_time: i64) -> Frame {
    Rc::new(FloatData::new(vec![0.0], 100, collect_time, collect_time))
}

/// A front end yielding `n` consecutive frames bracketed by stream
/// signals.
pub fn front_end_with_frames(n: usize) -> BufferedFrontEnd {
    BufferedFrontEnd::from_frames(
        (0..n).map(|t| FloatData::new(vec![0.0], 100, t as i64, t as i64)),
    )
}

/// An arena pre-filled with one token per score, each at a distinct
/// emitting state.
pub fn scored_tokens(scores: &[f64]) -> (TokenArena, Vec<TokenId>) {
    let mut arena = TokenArena::new();
    let ids = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| {
            let state = emitting_state(&format!("scored-{i}"), 1, &[]);
            arena.new_token(None, state, score, 0.0, 0.0, 0)
        })
        .collect();
    (arena, ids)
}

/// Graph over scripted states.
pub struct TestGraph {
    pub initial: StateHandle,
    pub num_state_order: usize,
}

impl SearchGraph for TestGraph {
    fn initial_state(&self) -> StateHandle {
        self.initial.clone()
    }

    fn num_state_order(&self) -> usize {
        self.num_state_order
    }
}

pub struct TestLinguist {
    pub graph: TestGraph,
}

impl Linguist for TestLinguist {
    fn allocate(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn deallocate(&mut self) {}

    fn search_graph(&self) -> &dyn SearchGraph {
        &self.graph
    }
}

/// A search manager over the given graph and front end, with generous
/// simple-list beams unless the config says otherwise.
pub fn search_manager(
    initial: Rc<TestState>,
    num_state_order: usize,
    front_end: impl FrontEnd + 'static,
    config: SearchConfig,
) -> WordPruningSearchManager {
    let linguist = TestLinguist {
        graph: TestGraph {
            initial: initial as StateHandle,
            num_state_order,
        },
    };
    let logmath = LogMath::new();
    let factories: Vec<Box<dyn crate::search::active_list::ActiveListFactory>> =
        vec![Box::new(SimpleActiveListFactory::new(
            config.absolute_beam_width,
            logmath.linear_to_log(config.relative_beam_width) as f64,
        ))];
    WordPruningSearchManager::new(
        Box::new(linguist),
        Box::new(SimplePruner),
        AcousticScorer::new(Box::new(front_end), None),
        ActiveListManager::new(factories, false),
        logmath,
        config,
    )
}
