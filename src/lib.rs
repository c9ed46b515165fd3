pub mod adaptation;
pub mod api;
pub mod frontend;
pub mod linguist;
pub mod logmath;
pub mod result;
pub mod search;
pub mod trace_init;

pub use api::{DecodeError, Recognizer, RecognizerState};
pub use result::{Lattice, RecognitionResult, WordResult};
