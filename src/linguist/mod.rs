//! Search-space interfaces supplied by an external linguist.
//!
//! The linguist composes acoustic HMMs, pronunciations and the language
//! model into a state graph with probabilistic arcs; the search core only
//! walks it. States are trait objects with a stable string signature that
//! downstream maps key on — never on pointer identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::api::DecodeError;
use crate::frontend::FloatData;

/// A word in the active dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub spelling: String,
    /// Fillers (silence, noise, breath) are excluded from the default
    /// word path.
    pub filler: bool,
}

impl Word {
    pub fn new(spelling: impl Into<String>) -> Self {
        Self {
            spelling: spelling.into(),
            filler: false,
        }
    }

    pub fn filler(spelling: impl Into<String>) -> Self {
        Self {
            spelling: spelling.into(),
            filler: true,
        }
    }
}

/// A single state in the language search space.
///
/// The capability queries (`word`, `base_id`, ...) replace a class
/// hierarchy: a state is a word boundary iff `word()` is `Some`, a
/// context-independent phone HMM state iff `base_id()` is `Some`.
pub trait SearchState {
    /// State order index; the emitting order is always the highest.
    fn order(&self) -> usize;

    /// Whether this state consumes a feature frame.
    fn is_emitting(&self) -> bool;

    /// Whether this state terminates an utterance path.
    fn is_final(&self) -> bool {
        false
    }

    /// Outgoing arcs with pre-summed log probabilities.
    fn successors(&self) -> Vec<SearchStateArc>;

    /// Stable identity for maps. Two states with equal signatures are the
    /// same state.
    fn signature(&self) -> String;

    /// Acoustic log score of this state against a frame. Only meaningful
    /// for emitting states.
    fn score(&self, _frame: &FloatData) -> f32 {
        f32::NEG_INFINITY
    }

    /// Per-mixture-component scores, for score decomposition.
    fn component_score(&self, _frame: &FloatData) -> Vec<f32> {
        Vec::new()
    }

    /// The word this state ends, if it is a word-boundary state.
    fn word(&self) -> Option<&Word> {
        None
    }

    /// Unit (phone) name, if this is a unit state.
    fn unit_name(&self) -> Option<&str> {
        None
    }

    /// Context-independent base phone id, if this state belongs to a
    /// phone HMM. Consumed by the fast-match lookahead.
    fn base_id(&self) -> Option<usize> {
        None
    }

    /// Whether expanding this state yields phone-HMM successors. Gates
    /// the lookahead penalty on arcs out of this state.
    fn expands_to_phones(&self) -> bool {
        false
    }
}

/// Shared handle to a search state.
pub type StateHandle = Rc<dyn SearchState>;

/// An arc between search states. The composite `log_probability` is the
/// pre-summed combination of LM, pronunciation and HMM transition scores;
/// the components are kept for score decomposition on tokens.
#[derive(Clone)]
pub struct SearchStateArc {
    pub state: StateHandle,
    pub log_probability: f64,
    pub log_insertion_probability: f32,
    pub log_language_probability: f32,
}

impl SearchStateArc {
    /// An arc with zero cost in every component.
    pub fn free(state: StateHandle) -> Self {
        Self {
            state,
            log_probability: 0.0,
            log_insertion_probability: 0.0,
            log_language_probability: 0.0,
        }
    }
}

impl fmt::Debug for SearchStateArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchStateArc")
            .field("state", &self.state.signature())
            .field("log_probability", &self.log_probability)
            .finish()
    }
}

/// Map key for a search state: the handle plus its cached signature.
/// Hash and equality go through the signature only.
#[derive(Clone)]
pub struct StateKey {
    state: StateHandle,
    signature: String,
}

impl StateKey {
    pub fn new(state: StateHandle) -> Self {
        let signature = state.signature();
        Self { state, signature }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for StateKey {}

impl Hash for StateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({})", self.signature)
    }
}

/// The composed search graph.
pub trait SearchGraph {
    fn initial_state(&self) -> StateHandle;

    /// Number of distinct state orders, emitting order included.
    fn num_state_order(&self) -> usize;

    /// Lattice layout hint: whether word states precede their unit states
    /// on a path.
    fn word_token_first(&self) -> bool {
        false
    }
}

/// The linguist: owns the search graph and any model resources behind it.
pub trait Linguist {
    fn allocate(&mut self) -> Result<(), DecodeError>;
    fn deallocate(&mut self);
    fn start_recognition(&mut self) {}
    fn stop_recognition(&mut self) {}
    fn search_graph(&self) -> &dyn SearchGraph;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Dummy(String);

    impl SearchState for Dummy {
        fn order(&self) -> usize {
            0
        }
        fn is_emitting(&self) -> bool {
            false
        }
        fn successors(&self) -> Vec<SearchStateArc> {
            Vec::new()
        }
        fn signature(&self) -> String {
            self.0.clone()
        }
    }

    #[test]
    fn test_state_key_equality_is_structural() {
        let a: StateHandle = Rc::new(Dummy("s1".into()));
        let b: StateHandle = Rc::new(Dummy("s1".into()));
        let c: StateHandle = Rc::new(Dummy("s2".into()));
        assert_eq!(StateKey::new(a.clone()), StateKey::new(b));
        assert_ne!(StateKey::new(a), StateKey::new(c));
    }

    #[test]
    fn test_state_key_as_map_key() {
        let mut map: HashMap<StateKey, u32> = HashMap::new();
        let a: StateHandle = Rc::new(Dummy("s1".into()));
        map.insert(StateKey::new(a), 7);
        let other: StateHandle = Rc::new(Dummy("s1".into()));
        assert_eq!(map.get(&StateKey::new(other)), Some(&7));
    }
}
