//! Feature-frame boundary between the signal front end and the search.
//!
//! The front end is an external collaborator: it produces a lazy sequence
//! of [`Data`] items, where each item is either an acoustic feature frame
//! or a control signal marking stream and speech boundaries. The search
//! never looks past this interface.

use std::collections::VecDeque;
use std::rc::Rc;

/// Control signals interleaved with feature frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Start of the data stream.
    DataStart,
    /// Endpointer decided speech has started.
    SpeechStart,
    /// Endpointer decided speech has ended.
    SpeechEnd,
    /// End of the data stream; nothing follows.
    DataEnd,
}

/// A single-precision feature frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatData {
    pub values: Vec<f32>,
    pub sample_rate: u32,
    /// Time at which this frame was collected, in milliseconds. Differs
    /// from the frame number when the endpointer skips silence.
    pub collect_time: i64,
    pub first_sample_number: i64,
}

impl FloatData {
    pub fn new(
        values: Vec<f32>,
        sample_rate: u32,
        collect_time: i64,
        first_sample_number: i64,
    ) -> Self {
        Self {
            values,
            sample_rate,
            collect_time,
            first_sample_number,
        }
    }
}

/// A double-precision feature frame. Converted to single precision at the
/// scorer boundary; downstream math is in single precision.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleData {
    pub values: Vec<f64>,
    pub sample_rate: u32,
    pub collect_time: i64,
    pub first_sample_number: i64,
}

impl DoubleData {
    pub fn to_float(&self) -> FloatData {
        FloatData {
            values: self.values.iter().map(|&v| v as f32).collect(),
            sample_rate: self.sample_rate,
            collect_time: self.collect_time,
            first_sample_number: self.first_sample_number,
        }
    }
}

/// One item of front-end output.
#[derive(Debug, Clone)]
pub enum Data {
    Float(FloatData),
    Double(DoubleData),
    Signal(Signal),
}

/// Lazy producer of [`Data`]. `get_data` may block while the next frame is
/// being computed; returning `None` means the stream is exhausted.
pub trait FrontEnd {
    fn get_data(&mut self) -> Option<Data>;
}

/// A front end over a pre-built queue of frames. Used by tests, benches
/// and batch decoding of already-extracted features.
#[derive(Debug, Default)]
pub struct BufferedFrontEnd {
    queue: VecDeque<Data>,
}

impl BufferedFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the given frames in `DataStart` / `DataEnd` signals.
    pub fn from_frames(frames: impl IntoIterator<Item = FloatData>) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(Data::Signal(Signal::DataStart));
        for f in frames {
            queue.push_back(Data::Float(f));
        }
        queue.push_back(Data::Signal(Signal::DataEnd));
        Self { queue }
    }

    pub fn push(&mut self, data: Data) {
        self.queue.push_back(data);
    }
}

impl FrontEnd for BufferedFrontEnd {
    fn get_data(&mut self) -> Option<Data> {
        self.queue.pop_front()
    }
}

/// Shared handle to a scored frame. Tokens keep a reference to the frame
/// that produced their acoustic score, so frames are reference counted.
pub type Frame = Rc<FloatData>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_to_float() {
        let d = DoubleData {
            values: vec![0.25, -1.5],
            sample_rate: 16000,
            collect_time: 30,
            first_sample_number: 480,
        };
        let f = d.to_float();
        assert_eq!(f.values, vec![0.25f32, -1.5]);
        assert_eq!(f.collect_time, 30);
        assert_eq!(f.sample_rate, 16000);
    }

    #[test]
    fn test_buffered_front_end_brackets_frames() {
        let mut fe = BufferedFrontEnd::from_frames(vec![FloatData::new(vec![0.0], 16000, 0, 0)]);
        assert!(matches!(
            fe.get_data(),
            Some(Data::Signal(Signal::DataStart))
        ));
        assert!(matches!(fe.get_data(), Some(Data::Float(_))));
        assert!(matches!(fe.get_data(), Some(Data::Signal(Signal::DataEnd))));
        assert!(fe.get_data().is_none());
    }
}
