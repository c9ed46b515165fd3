//! Recognizer façade.
//!
//! The public entry point: a lifecycle state machine around a
//! [`SearchManager`](crate::search::SearchManager). Lifecycle violations
//! and loader failures surface as [`DecodeError`] results; inside the
//! frame loop there are no recoverable errors.

use tracing::debug;

use crate::result::RecognitionResult;
use crate::search::SearchManager;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A method was called in the wrong lifecycle state.
    #[error("illegal state: {msg}")]
    IllegalState { msg: String },
    /// An arc led to a state of strictly lower order; the search graph is
    /// malformed. Raised only when `check_state_order` is enabled.
    #[error("state order violation: {msg}")]
    OrderViolation { msg: String },
    /// The configured lookahead window is outside the legal range.
    #[error("lookahead window {window} out of range, expected 1..=10")]
    LookaheadOutOfRange { window: usize },
    /// Acoustic model or graph resources failed to load.
    #[error("model load failed: {msg}")]
    ModelLoad { msg: String },
    /// An MLLR transform file failed to load or parse.
    #[error("transform load failed: {msg}")]
    TransformLoad { msg: String },
    #[error("IO error: {msg}")]
    Io { msg: String },
}

impl DecodeError {
    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        DecodeError::IllegalState { msg: msg.into() }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Io { msg: e.to_string() }
    }
}

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

/// Lifecycle states of the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    Unallocated,
    Allocated,
    Recognizing,
}

/// Called on every lifecycle state change.
pub type StateListener = Box<dyn Fn(RecognizerState)>;

/// Called with every result produced by [`Recognizer::recognize`].
pub type ResultListener = Box<dyn Fn(&RecognitionResult)>;

/// The recognizer: drives a search manager through its lifecycle and
/// exposes block-wise decoding.
pub struct Recognizer {
    search_manager: Box<dyn SearchManager>,
    state: RecognizerState,
    state_listeners: Vec<StateListener>,
    result_listeners: Vec<ResultListener>,
    /// Frames handed to the search per `recognize` call inside the
    /// decode loop.
    feature_block_size: usize,
    /// Forward partial results to the result listeners too.
    fire_non_final_results: bool,
}

impl Recognizer {
    pub fn new(search_manager: Box<dyn SearchManager>) -> Self {
        Self {
            search_manager,
            state: RecognizerState::Unallocated,
            state_listeners: Vec::new(),
            result_listeners: Vec::new(),
            feature_block_size: usize::MAX,
            fire_non_final_results: false,
        }
    }

    pub fn state(&self) -> RecognizerState {
        self.state
    }

    pub fn set_feature_block_size(&mut self, frames: usize) {
        self.feature_block_size = frames.max(1);
    }

    pub fn set_fire_non_final_results(&mut self, fire: bool) {
        self.fire_non_final_results = fire;
    }

    pub fn add_state_listener(&mut self, listener: StateListener) {
        self.state_listeners.push(listener);
    }

    pub fn add_result_listener(&mut self, listener: ResultListener) {
        self.result_listeners.push(listener);
    }

    fn set_state(&mut self, state: RecognizerState) {
        self.state = state;
        for listener in &self.state_listeners {
            listener(state);
        }
    }

    fn check_state(&self, expected: RecognizerState, doing: &str) -> Result<(), DecodeError> {
        if self.state != expected {
            return Err(DecodeError::IllegalState {
                msg: format!(
                    "{doing} requires state {expected:?}, recognizer is {:?}",
                    self.state
                ),
            });
        }
        Ok(())
    }

    /// Allocates model and search resources. Call once before any
    /// recognition.
    pub fn allocate(&mut self) -> Result<(), DecodeError> {
        self.check_state(RecognizerState::Unallocated, "allocate")?;
        self.search_manager.allocate()?;
        self.set_state(RecognizerState::Allocated);
        debug!("recognizer allocated");
        Ok(())
    }

    /// Releases all resources.
    pub fn deallocate(&mut self) -> Result<(), DecodeError> {
        self.check_state(RecognizerState::Allocated, "deallocate")?;
        self.search_manager.deallocate();
        self.set_state(RecognizerState::Unallocated);
        Ok(())
    }

    /// Decodes one utterance to a final result, firing result listeners
    /// along the way. The optional reference transcript is attached to
    /// every emitted result for scoring harnesses.
    pub fn recognize(
        &mut self,
        reference_text: Option<&str>,
    ) -> Result<RecognitionResult, DecodeError> {
        self.check_state(RecognizerState::Allocated, "recognize")?;
        self.search_manager.start_recognition()?;
        self.set_state(RecognizerState::Recognizing);

        let outcome = self.decode_loop(reference_text);

        self.search_manager.stop_recognition();
        self.set_state(RecognizerState::Allocated);
        outcome
    }

    fn decode_loop(
        &mut self,
        reference_text: Option<&str>,
    ) -> Result<RecognitionResult, DecodeError> {
        loop {
            let mut result = self.search_manager.recognize(self.feature_block_size)?;
            if let Some(reference) = reference_text {
                result.set_reference_text(reference);
            }
            let is_final = result.is_final();
            if is_final || self.fire_non_final_results {
                for listener in &self.result_listeners {
                    listener(&result);
                }
            }
            if is_final {
                return Ok(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSearchManager {
        calls_until_final: usize,
    }

    impl SearchManager for StubSearchManager {
        fn allocate(&mut self) -> Result<(), DecodeError> {
            Ok(())
        }
        fn deallocate(&mut self) {}
        fn start_recognition(&mut self) -> Result<(), DecodeError> {
            Ok(())
        }
        fn stop_recognition(&mut self) {}
        fn recognize(&mut self, _n_frames: usize) -> Result<RecognitionResult, DecodeError> {
            use crate::logmath::LogMath;
            use crate::search::token::TokenArena;
            let arena = TokenArena::new();
            let done = self.calls_until_final == 0;
            self.calls_until_final = self.calls_until_final.saturating_sub(1);
            Ok(RecognitionResult::collect(
                &arena,
                &[],
                &[],
                None,
                &LogMath::new(),
                0,
                done,
                false,
                false,
            ))
        }
    }

    fn recognizer(calls_until_final: usize) -> Recognizer {
        Recognizer::new(Box::new(StubSearchManager { calls_until_final }))
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut r = recognizer(0);
        assert_eq!(r.state(), RecognizerState::Unallocated);
        r.allocate().unwrap();
        assert_eq!(r.state(), RecognizerState::Allocated);
        let result = r.recognize(None).unwrap();
        assert!(result.is_final());
        assert_eq!(r.state(), RecognizerState::Allocated);
        r.deallocate().unwrap();
        assert_eq!(r.state(), RecognizerState::Unallocated);
    }

    #[test]
    fn test_recognize_before_allocate_is_illegal() {
        let mut r = recognizer(0);
        assert!(matches!(
            r.recognize(None),
            Err(DecodeError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_double_allocate_is_illegal() {
        let mut r = recognizer(0);
        r.allocate().unwrap();
        assert!(matches!(
            r.allocate(),
            Err(DecodeError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_decode_loops_until_final() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut r = recognizer(3);
        r.set_fire_non_final_results(true);
        let seen = Rc::new(Cell::new(0usize));
        let seen_in_listener = seen.clone();
        r.add_result_listener(Box::new(move |_| {
            seen_in_listener.set(seen_in_listener.get() + 1);
        }));
        r.allocate().unwrap();
        let result = r.recognize(None).unwrap();
        assert!(result.is_final());
        // three partials plus the final
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn test_state_listener_fires() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut r = recognizer(0);
        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = states.clone();
        r.add_state_listener(Box::new(move |s| sink.borrow_mut().push(s)));
        r.allocate().unwrap();
        let _ = r.recognize(None).unwrap();
        assert_eq!(
            *states.borrow(),
            vec![
                RecognizerState::Allocated,
                RecognizerState::Recognizing,
                RecognizerState::Allocated
            ]
        );
    }
}
