//! Acoustic scoring of the emitting beam.
//!
//! Single-threaded and synchronous: pulls the next frame from the front
//! end, drains control signals, scores each candidate token's emitting
//! state against the frame and reports the best token. The fast-match
//! lookahead pass consumes frames through
//! [`AcousticScorer::calculate_scores_and_store`], which queues each
//! consumed frame so the main pass can re-consume it later.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::frontend::{Data, Frame, FrontEnd, Signal};

use super::token::{TokenArena, TokenId};

/// Outcome of scoring one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// The frame was scored; this is the best-scoring token.
    Best(TokenId),
    /// The utterance ended on a control signal; no frame was scored.
    UtteranceEnd(Signal),
    /// The stream is exhausted; nothing further will arrive.
    StreamEnd,
}

/// Post-processor normalizing token scores after a frame is scored.
pub trait ScoreNormalizer {
    /// Normalizes the scored tokens, returning the (possibly different)
    /// best token.
    fn normalize(&self, arena: &mut TokenArena, scored: &[TokenId], best: TokenId) -> TokenId;
}

/// Divides all scores by the maximum in the log domain, i.e. subtracts
/// the best score from every token.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxScoreNormalizer;

impl ScoreNormalizer for MaxScoreNormalizer {
    fn normalize(&self, arena: &mut TokenArena, scored: &[TokenId], best: TokenId) -> TokenId {
        let max = arena.get(best).total_score();
        for &t in scored {
            arena.normalize_score(t, max);
        }
        best
    }
}

/// Pulls frames and scores candidate states against them.
pub struct AcousticScorer {
    front_end: Box<dyn FrontEnd>,
    /// Optional normalization; when unset token scores are returned
    /// unchanged.
    normalizer: Option<Box<dyn ScoreNormalizer>>,
    /// Frames consumed by the fast-match pass, waiting for the main pass.
    stored_frames: VecDeque<Frame>,
    seen_end: bool,
}

enum NextFrame {
    Frame(Frame),
    UtteranceEnd(Signal),
    StreamEnd,
}

impl AcousticScorer {
    pub fn new(front_end: Box<dyn FrontEnd>, normalizer: Option<Box<dyn ScoreNormalizer>>) -> Self {
        Self {
            front_end,
            normalizer,
            stored_frames: VecDeque::new(),
            seen_end: false,
        }
    }

    pub fn allocate(&mut self) {}

    pub fn deallocate(&mut self) {}

    pub fn start_recognition(&mut self) {
        self.stored_frames.clear();
        self.seen_end = false;
    }

    pub fn stop_recognition(&mut self) {}

    /// Whether a speech-end signal has been consumed on this stream.
    pub fn seen_end(&self) -> bool {
        self.seen_end
    }

    /// Frames queued by the fast-match pass and not yet re-consumed.
    pub fn stored_frame_count(&self) -> usize {
        self.stored_frames.len()
    }

    /// Scores `tokens` against the next frame: a queued one if the
    /// fast-match pass ran ahead, otherwise fresh from the front end.
    pub fn calculate_scores(&mut self, arena: &mut TokenArena, tokens: &[TokenId]) -> ScoreOutcome {
        let frame = match self.stored_frames.pop_front() {
            Some(frame) => frame,
            None => match self.next_frame() {
                NextFrame::Frame(frame) => frame,
                NextFrame::UtteranceEnd(signal) => return ScoreOutcome::UtteranceEnd(signal),
                NextFrame::StreamEnd => return ScoreOutcome::StreamEnd,
            },
        };
        self.score_frame(arena, tokens, frame)
    }

    /// Scores `tokens` against a fresh frame and queues that frame for
    /// later re-consumption by the main pass.
    pub fn calculate_scores_and_store(
        &mut self,
        arena: &mut TokenArena,
        tokens: &[TokenId],
    ) -> ScoreOutcome {
        let frame = match self.next_frame() {
            NextFrame::Frame(frame) => frame,
            NextFrame::UtteranceEnd(signal) => return ScoreOutcome::UtteranceEnd(signal),
            NextFrame::StreamEnd => return ScoreOutcome::StreamEnd,
        };
        self.stored_frames.push_back(frame.clone());
        self.score_frame(arena, tokens, frame)
    }

    // Drains control signals until a frame or a terminal signal arrives.
    // SpeechEnd marks the utterance end and is remembered; a DataEnd
    // after a seen SpeechEnd means the stream is truly exhausted, while a
    // bare DataEnd (no endpointer in the pipeline) ends the utterance
    // itself.
    fn next_frame(&mut self) -> NextFrame {
        loop {
            match self.front_end.get_data() {
                None => return NextFrame::StreamEnd,
                Some(Data::Signal(Signal::SpeechEnd)) => {
                    self.seen_end = true;
                    debug!("speech end signal");
                    return NextFrame::UtteranceEnd(Signal::SpeechEnd);
                }
                Some(Data::Signal(Signal::DataEnd)) => {
                    debug!(seen_end = self.seen_end, "data end signal");
                    if self.seen_end {
                        return NextFrame::StreamEnd;
                    }
                    return NextFrame::UtteranceEnd(Signal::DataEnd);
                }
                Some(Data::Signal(_)) => continue,
                Some(Data::Float(frame)) => return NextFrame::Frame(Rc::new(frame)),
                Some(Data::Double(frame)) => return NextFrame::Frame(Rc::new(frame.to_float())),
            }
        }
    }

    fn score_frame(
        &mut self,
        arena: &mut TokenArena,
        tokens: &[TokenId],
        frame: Frame,
    ) -> ScoreOutcome {
        if tokens.is_empty() {
            return ScoreOutcome::StreamEnd;
        }
        let mut best: Option<(TokenId, f64)> = None;
        for &t in tokens {
            let score = arena.calculate_score(t, &frame);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((t, score));
            }
        }
        let (mut best_token, _) = best.expect("non-empty token list");
        if let Some(normalizer) = &self.normalizer {
            best_token = normalizer.normalize(arena, tokens, best_token);
        }
        ScoreOutcome::Best(best_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{BufferedFrontEnd, DoubleData, FloatData};
    use crate::search::testutil::emitting_state;

    fn float_frame(t: i64) -> Data {
        Data::Float(FloatData::new(vec![0.0], 100, t, t))
    }

    fn tokens_for(arena: &mut TokenArena, scores: &[&[f32]]) -> Vec<TokenId> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let state = emitting_state(&format!("s{i}"), 1, s);
                arena.new_initial(state, 0)
            })
            .collect()
    }

    #[test]
    fn test_scores_and_returns_best() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(Data::Signal(Signal::DataStart));
        fe.push(float_frame(0));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);

        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-3.0], &[-1.0], &[-2.0]]);
        match scorer.calculate_scores(&mut arena, &ids) {
            ScoreOutcome::Best(best) => assert_eq!(best, ids[1]),
            other => panic!("expected Best, got {other:?}"),
        }
        assert_eq!(arena.get(ids[0]).total_score(), -3.0);
    }

    #[test]
    fn test_normalizer_subtracts_max() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(float_frame(0));
        let mut scorer = AcousticScorer::new(Box::new(fe), Some(Box::new(MaxScoreNormalizer)));

        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-3.0], &[-1.0]]);
        let outcome = scorer.calculate_scores(&mut arena, &ids);
        assert!(matches!(outcome, ScoreOutcome::Best(b) if b == ids[1]));
        assert_eq!(arena.get(ids[1]).total_score(), 0.0);
        assert_eq!(arena.get(ids[0]).total_score(), -2.0);
    }

    #[test]
    fn test_double_frames_are_converted() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(Data::Double(DoubleData {
            values: vec![0.0],
            sample_rate: 100,
            collect_time: 5,
            first_sample_number: 0,
        }));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0, -1.0, -1.0, -1.0, -1.0, -1.0]]);
        let outcome = scorer.calculate_scores(&mut arena, &ids);
        assert!(matches!(outcome, ScoreOutcome::Best(_)));
        assert_eq!(arena.get(ids[0]).collect_time(), 5);
    }

    #[test]
    fn test_speech_end_then_data_end_is_stream_end() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(Data::Signal(Signal::SpeechEnd));
        fe.push(Data::Signal(Signal::DataEnd));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0]]);

        assert_eq!(
            scorer.calculate_scores(&mut arena, &ids),
            ScoreOutcome::UtteranceEnd(Signal::SpeechEnd)
        );
        assert!(scorer.seen_end());
        assert_eq!(
            scorer.calculate_scores(&mut arena, &ids),
            ScoreOutcome::StreamEnd
        );
    }

    #[test]
    fn test_bare_data_end_is_utterance_end() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(Data::Signal(Signal::DataEnd));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0]]);
        assert_eq!(
            scorer.calculate_scores(&mut arena, &ids),
            ScoreOutcome::UtteranceEnd(Signal::DataEnd)
        );
        assert!(!scorer.seen_end());
    }

    #[test]
    fn test_exhausted_front_end_is_stream_end() {
        let fe = BufferedFrontEnd::new();
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0]]);
        assert_eq!(
            scorer.calculate_scores(&mut arena, &ids),
            ScoreOutcome::StreamEnd
        );
    }

    #[test]
    fn test_store_and_reconsume_frame() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(float_frame(0));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0]]);

        // fast-match pass consumes and stores the frame
        let outcome = scorer.calculate_scores_and_store(&mut arena, &ids);
        assert!(matches!(outcome, ScoreOutcome::Best(_)));
        assert_eq!(scorer.stored_frame_count(), 1);

        // main pass re-consumes the stored frame without touching the
        // (now empty) front end
        let ids2 = tokens_for(&mut arena, &[&[-2.0]]);
        let outcome = scorer.calculate_scores(&mut arena, &ids2);
        assert!(matches!(outcome, ScoreOutcome::Best(_)));
        assert_eq!(scorer.stored_frame_count(), 0);
    }

    #[test]
    fn test_start_recognition_resets_state() {
        let mut fe = BufferedFrontEnd::new();
        fe.push(float_frame(0));
        fe.push(Data::Signal(Signal::SpeechEnd));
        let mut scorer = AcousticScorer::new(Box::new(fe), None);
        let mut arena = TokenArena::new();
        let ids = tokens_for(&mut arena, &[&[-1.0]]);
        let _ = scorer.calculate_scores_and_store(&mut arena, &ids);
        let _ = scorer.calculate_scores_and_store(&mut arena, &ids);
        assert!(scorer.seen_end());
        assert_eq!(scorer.stored_frame_count(), 1);

        scorer.start_recognition();
        assert!(!scorer.seen_end());
        assert_eq!(scorer.stored_frame_count(), 0);
    }
}
