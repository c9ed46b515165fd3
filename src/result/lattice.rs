//! Word lattice assembly and posterior computation.
//!
//! The lattice is a word-level DAG of alternate hypotheses. It is built
//! by walking back from every token that reached a final state: each word
//! token becomes a node, the collapsed non-word chain between two word
//! tokens becomes an edge carrying the summed acoustic and language
//! scores, and the loser predecessors recorded during token merges
//! contribute the alternate incoming edges. Posterior probabilities come
//! from a forward/backward sweep in the log domain.

use std::collections::HashMap;

use crate::logmath::LogMath;
use crate::search::alternates::AlternateHypothesisManager;
use crate::search::token::{TokenArena, TokenId};

/// A word hypothesis in the lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeNode {
    pub spelling: String,
    pub filler: bool,
    /// Collect time of the primary path's previous word.
    pub begin_time: i64,
    /// Collect time at which this word token was scored.
    pub end_time: i64,
}

/// A weighted arc between word hypotheses.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeEdge {
    pub from: usize,
    pub to: usize,
    /// Summed acoustic score of the collapsed token chain.
    pub log_acoustic_score: f64,
    /// Summed language score of the collapsed token chain.
    pub log_language_score: f64,
}

/// Word-level DAG of alternate hypotheses. Node 0 is the `<s>` start
/// sentinel; the terminal `</s>` sentinel is [`Lattice::terminal`].
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    nodes: Vec<LatticeNode>,
    edges: Vec<LatticeEdge>,
    terminal: usize,
}

/// One incoming path of a word token: its source word token (`None`
/// means the path start) and the score sums over the collapsed chain.
struct Incoming {
    source: Option<TokenId>,
    log_acoustic: f64,
    log_language: f64,
}

impl Lattice {
    /// Builds the lattice from the final-state result list. The
    /// `word_token_first` layout hint is accepted for interface parity
    /// but both layouts walk identically here: nodes are word tokens
    /// wherever they sit on the path.
    pub(crate) fn build(
        arena: &TokenArena,
        result_list: &[TokenId],
        losers: &AlternateHypothesisManager,
        _logmath: &LogMath,
        _word_token_first: bool,
    ) -> Self {
        let mut builder = LatticeBuilder {
            arena,
            losers,
            nodes: vec![LatticeNode {
                spelling: "<s>".into(),
                filler: true,
                begin_time: 0,
                end_time: 0,
            }],
            edges: Vec::new(),
            node_of_token: HashMap::new(),
            terminal: 0,
        };
        builder.terminal = builder.push_node(LatticeNode {
            spelling: "</s>".into(),
            filler: true,
            begin_time: 0,
            end_time: 0,
        });

        for &final_token in result_list {
            builder.add_final(final_token);
        }

        Lattice {
            nodes: builder.nodes,
            edges: builder.edges,
            terminal: builder.terminal,
        }
    }

    pub fn nodes(&self) -> &[LatticeNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[LatticeEdge] {
        &self.edges
    }

    /// Index of the `<s>` start node.
    pub fn initial(&self) -> usize {
        0
    }

    /// Index of the `</s>` terminal node.
    pub fn terminal(&self) -> usize {
        self.terminal
    }

    /// Incoming edges of a node.
    pub fn edges_into(&self, node: usize) -> impl Iterator<Item = &LatticeEdge> {
        self.edges.iter().filter(move |e| e.to == node)
    }

    /// Per-node posterior log probabilities via forward/backward. The
    /// posterior of a node is the total probability of all start-to-end
    /// paths through it, normalized by the total path probability; edge
    /// weights are the summed acoustic and language scores, and path
    /// alternatives combine by log-addition in the LogMath base.
    pub fn posteriors(&self, logmath: &LogMath) -> Vec<f64> {
        let n = self.nodes.len();
        let order = self.topological_order();
        let weight =
            |e: &LatticeEdge| (e.log_acoustic_score + e.log_language_score) as f32;

        let mut alpha = vec![f32::NEG_INFINITY; n];
        alpha[self.initial()] = 0.0;
        for &node in &order {
            if alpha[node] == f32::NEG_INFINITY {
                continue;
            }
            for e in self.edges.iter().filter(|e| e.from == node) {
                let contribution = alpha[node] + weight(e);
                alpha[e.to] = logmath.add_as_linear(alpha[e.to], contribution);
            }
        }

        let mut beta = vec![f32::NEG_INFINITY; n];
        beta[self.terminal()] = 0.0;
        for &node in order.iter().rev() {
            for e in self.edges.iter().filter(|e| e.from == node) {
                let contribution = weight(e) + beta[e.to];
                beta[node] = logmath.add_as_linear(beta[node], contribution);
            }
        }

        let total = alpha[self.terminal()];
        (0..n)
            .map(|i| (alpha[i] + beta[i] - total) as f64)
            .collect()
    }

    // Kahn's algorithm; the lattice is acyclic because collect times are
    // monotone along every path.
    fn topological_order(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        for e in &self.edges {
            in_degree[e.to] += 1;
        }
        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = queue.pop() {
            order.push(node);
            for e in self.edges.iter().filter(|e| e.from == node) {
                in_degree[e.to] -= 1;
                if in_degree[e.to] == 0 {
                    queue.push(e.to);
                }
            }
        }
        debug_assert_eq!(order.len(), n, "lattice contains a cycle");
        order
    }
}

struct LatticeBuilder<'a> {
    arena: &'a TokenArena,
    losers: &'a AlternateHypothesisManager,
    nodes: Vec<LatticeNode>,
    edges: Vec<LatticeEdge>,
    node_of_token: HashMap<TokenId, usize>,
    terminal: usize,
}

impl LatticeBuilder<'_> {
    fn push_node(&mut self, node: LatticeNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Connects a final-state result token to the terminal sentinel and
    /// recursively materializes the word path behind it.
    fn add_final(&mut self, final_token: TokenId) {
        let incoming = self.collapse_from(Some(final_token));
        if let Some(word_token) = incoming.source {
            let node = self.node_for(word_token);
            self.edges.push(LatticeEdge {
                from: node,
                to: self.terminal,
                log_acoustic_score: incoming.log_acoustic,
                log_language_score: incoming.log_language,
            });
        }
    }

    /// Walks a predecessor chain from `start`, summing scores over
    /// non-word tokens (synthetic collapsed predecessors already carry
    /// their sums) until a word token or the path start is reached.
    fn collapse_from(&self, start: Option<TokenId>) -> Incoming {
        let mut log_acoustic = 0.0f64;
        let mut log_language = 0.0f64;
        let mut cur = start;
        while let Some(t) = cur {
            let token = self.arena.get(t);
            if token.is_word() {
                break;
            }
            log_acoustic += token.acoustic_score() as f64;
            log_language += token.language_score() as f64;
            cur = token.predecessor();
        }
        Incoming {
            source: cur,
            log_acoustic,
            log_language,
        }
    }

    /// Node for a word token, creating it — with its incoming edges from
    /// both the surviving predecessor and any recorded losers — on first
    /// visit.
    fn node_for(&mut self, word_token: TokenId) -> usize {
        if let Some(&node) = self.node_of_token.get(&word_token) {
            return node;
        }
        let token = self.arena.get(word_token);
        let word = token
            .state()
            .and_then(|s| s.word())
            .expect("lattice node token must be a word token");
        let node = self.push_node(LatticeNode {
            spelling: word.spelling.clone(),
            filler: word.filler,
            begin_time: token
                .predecessor()
                .map(|p| self.arena.get(p).collect_time())
                .unwrap_or(0),
            end_time: token.collect_time(),
        });
        self.node_of_token.insert(word_token, node);

        let word_acoustic = token.acoustic_score() as f64;
        let word_language = token.language_score() as f64;
        let mut predecessors = vec![self.arena.get(word_token).predecessor()];
        if let Some(alternates) = self.losers.alternate_predecessors(word_token) {
            predecessors.extend(alternates.iter().copied().map(Some));
        }

        for predecessor in predecessors {
            let incoming = self.collapse_from(predecessor);
            let from = match incoming.source {
                Some(source_word) => self.node_for(source_word),
                None => 0,
            };
            self.edges.push(LatticeEdge {
                from,
                to: node,
                log_acoustic_score: incoming.log_acoustic + word_acoustic,
                log_language_score: incoming.log_language + word_language,
            });
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logmath::LogMath;
    use crate::search::testutil::word_state;

    // Builds a three-word chain one -> two -> three with a loser
    // alternate into "three".
    fn chain() -> (TokenArena, Vec<TokenId>, AlternateHypothesisManager) {
        let mut arena = TokenArena::new();
        let w1 = word_state("w1", 2, "one", false);
        let w2 = word_state("w2", 2, "two", false);
        let w2b = word_state("w2b", 2, "deux", false);
        let w3 = word_state("w3", 2, "three", false);

        let t1 = arena.new_token(None, w1, -1.0, 0.0, 0.0, 10);
        let t2 = arena.new_token(Some(t1), w2, -2.0, 0.0, -0.5, 20);
        let t2b = arena.new_token(Some(t1), w2b, -2.5, 0.0, -0.75, 20);
        let t3 = arena.new_token(Some(t2), w3, -3.0, 0.0, -0.25, 30);

        let mut losers = AlternateHypothesisManager::new(100);
        losers.add_alternate_predecessor(t3, t2b);
        (arena, vec![t1, t2, t2b, t3], losers)
    }

    #[test]
    fn test_build_chain_with_alternate() {
        let (arena, toks, losers) = chain();
        let logmath = LogMath::new();
        let lattice = Lattice::build(&arena, &[toks[3]], &losers, &logmath, false);

        // <s>, </s>, three, two, deux, one
        assert_eq!(lattice.nodes().len(), 6);
        let spellings: Vec<&str> = lattice.nodes().iter().map(|n| n.spelling.as_str()).collect();
        assert!(spellings.contains(&"one"));
        assert!(spellings.contains(&"two"));
        assert!(spellings.contains(&"deux"));
        assert!(spellings.contains(&"three"));

        // "three" has two incoming edges: from "two" and from "deux"
        let three = lattice
            .nodes()
            .iter()
            .position(|n| n.spelling == "three")
            .unwrap();
        assert_eq!(lattice.edges_into(three).count(), 2);

        // exactly one edge reaches the terminal
        assert_eq!(lattice.edges_into(lattice.terminal()).count(), 1);
    }

    #[test]
    fn test_node_times() {
        let (arena, toks, losers) = chain();
        let logmath = LogMath::new();
        let lattice = Lattice::build(&arena, &[toks[3]], &losers, &logmath, false);
        let two = lattice
            .nodes()
            .iter()
            .find(|n| n.spelling == "two")
            .unwrap();
        assert_eq!(two.begin_time, 10);
        assert_eq!(two.end_time, 20);
    }

    #[test]
    fn test_posteriors_sum_over_alternates() {
        let (arena, toks, losers) = chain();
        let logmath = LogMath::new();
        let lattice = Lattice::build(&arena, &[toks[3]], &losers, &logmath, false);
        let posteriors = lattice.posteriors(&logmath);

        // nodes on every path have posterior ~1 (log ~0)
        let one = lattice
            .nodes()
            .iter()
            .position(|n| n.spelling == "one")
            .unwrap();
        let three = lattice
            .nodes()
            .iter()
            .position(|n| n.spelling == "three")
            .unwrap();
        assert!(posteriors[one].abs() < 1.0, "got {}", posteriors[one]);
        assert!(posteriors[three].abs() < 1.0);

        // the two alternates split the mass: both strictly below 1,
        // the better-scoring one higher
        let two = lattice
            .nodes()
            .iter()
            .position(|n| n.spelling == "two")
            .unwrap();
        let deux = lattice
            .nodes()
            .iter()
            .position(|n| n.spelling == "deux")
            .unwrap();
        assert!(posteriors[two] < 0.0);
        assert!(posteriors[deux] < 0.0);
        assert!(posteriors[two] > posteriors[deux]);
    }

    #[test]
    fn test_shared_suffix_deduplicates_nodes() {
        let (arena, toks, losers) = chain();
        let logmath = LogMath::new();
        // the same final token twice must not duplicate nodes
        let lattice = Lattice::build(&arena, &[toks[3], toks[3]], &losers, &logmath, false);
        let threes = lattice
            .nodes()
            .iter()
            .filter(|n| n.spelling == "three")
            .count();
        assert_eq!(threes, 1);
    }
}
