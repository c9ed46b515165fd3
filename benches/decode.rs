use std::cell::RefCell;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use rec_engine::api::DecodeError;
use rec_engine::frontend::{BufferedFrontEnd, FloatData};
use rec_engine::linguist::{
    Linguist, SearchGraph, SearchState, SearchStateArc, StateHandle, Word,
};
use rec_engine::logmath::LogMath;
use rec_engine::search::{
    AcousticScorer, ActiveListFactory, ActiveListManager, PartitionActiveListFactory,
    SearchConfig, SearchManager, SimplePruner, WordPruningSearchManager,
};

/// A synthetic left-to-right word loop: every word is a chain of
/// emitting states ending in a word boundary that loops back to the
/// branch point.
struct BenchState {
    name: String,
    order: usize,
    emitting: bool,
    word: Option<Word>,
    successors: RefCell<Vec<SearchStateArc>>,
}

impl BenchState {
    fn new(name: String, order: usize, emitting: bool, word: Option<Word>) -> Rc<Self> {
        Rc::new(Self {
            name,
            order,
            emitting,
            word,
            successors: RefCell::new(Vec::new()),
        })
    }

    fn link(from: &Rc<Self>, to: &Rc<Self>, log_probability: f64) {
        from.successors.borrow_mut().push(SearchStateArc {
            state: to.clone() as StateHandle,
            log_probability,
            log_insertion_probability: 0.0,
            log_language_probability: 0.0,
        });
    }
}

impl SearchState for BenchState {
    fn order(&self) -> usize {
        self.order
    }
    fn is_emitting(&self) -> bool {
        self.emitting
    }
    fn successors(&self) -> Vec<SearchStateArc> {
        self.successors.borrow().clone()
    }
    fn signature(&self) -> String {
        self.name.clone()
    }
    fn score(&self, frame: &FloatData) -> f32 {
        // pseudo-random but deterministic per (state, frame)
        let h = self
            .name
            .bytes()
            .fold(frame.collect_time as u32, |acc, b| {
                acc.wrapping_mul(31).wrapping_add(b as u32)
            });
        -((h % 97) as f32 / 10.0) - 0.1
    }
    fn word(&self) -> Option<&Word> {
        self.word.as_ref()
    }
}

struct BenchGraph {
    initial: StateHandle,
}

impl SearchGraph for BenchGraph {
    fn initial_state(&self) -> StateHandle {
        self.initial.clone()
    }
    fn num_state_order(&self) -> usize {
        3
    }
}

struct BenchLinguist {
    graph: BenchGraph,
}

impl Linguist for BenchLinguist {
    fn allocate(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }
    fn deallocate(&mut self) {}
    fn search_graph(&self) -> &dyn SearchGraph {
        &self.graph
    }
}

fn word_loop_graph(num_words: usize, states_per_word: usize) -> Rc<BenchState> {
    let branch = BenchState::new("branch".into(), 0, false, None);
    for w in 0..num_words {
        let mut prev = branch.clone();
        for s in 0..states_per_word {
            let hmm = BenchState::new(format!("w{w}s{s}"), 2, true, None);
            BenchState::link(&prev, &hmm, -2.0);
            BenchState::link(&hmm, &hmm, -1.0);
            prev = hmm;
        }
        let word = BenchState::new(
            format!("w{w}"),
            1,
            false,
            Some(Word::new(format!("word{w}"))),
        );
        BenchState::link(&prev, &word, -2.0);
        BenchState::link(&word, &branch, 0.0);
    }
    branch
}

fn decode_frames(num_words: usize, frames: usize) {
    let logmath = LogMath::new();
    let config = SearchConfig::default();
    let factories: Vec<Box<dyn ActiveListFactory>> = vec![Box::new(
        PartitionActiveListFactory::new(
            config.absolute_beam_width,
            logmath.linear_to_log(config.relative_beam_width) as f64,
        ),
    )];
    let front_end = BufferedFrontEnd::from_frames(
        (0..frames).map(|t| FloatData::new(vec![0.0], 100, t as i64, t as i64)),
    );
    let mut sm = WordPruningSearchManager::new(
        Box::new(BenchLinguist {
            graph: BenchGraph {
                initial: word_loop_graph(num_words, 3) as StateHandle,
            },
        }),
        Box::new(SimplePruner),
        AcousticScorer::new(Box::new(front_end), None),
        ActiveListManager::new(factories, false),
        logmath,
        config,
    );
    sm.allocate().unwrap();
    sm.start_recognition().unwrap();
    let result = sm.recognize(frames).unwrap();
    criterion::black_box(result.best_score());
    sm.stop_recognition();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for &num_words in &[10usize, 50] {
        group.bench_with_input(
            BenchmarkId::new("word_loop", num_words),
            &num_words,
            |b, &n| b.iter(|| decode_frames(n, 100)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
