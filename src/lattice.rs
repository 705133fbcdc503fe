//! Per-sentence segmentation lattice for the unigram model.
//!
//! Nodes live in an arena owned by the lattice and are addressed by
//! index; `begin_nodes[p]` and `end_nodes[p]` list the candidates
//! starting and ending at Unicode position `p`, with sentinel BOS and
//! EOS nodes at the outer positions. Resetting the sentence frees every
//! node at once.

use core::cmp::Ordering;
use core::fmt::Debug;

use dary_heap::QuaternaryHeap;
use hashbrown::HashSet;
use rand::Rng;

/// Index of a node in the lattice arena.
pub type NodeId = u32;

const NO_NODE: NodeId = u32::MAX;

/// Hard cap on A* hypothesis expansion.
const MAX_HYPOTHESES: usize = 1 << 20;

/// Log-sum-exp short-circuit threshold in nats.
const MINUS_LOG_EPSILON: f32 = 50.0;

/// One candidate piece placement.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    /// Unicode position of the first codepoint.
    pub pos:    u32,
    /// Length in codepoints; zero for the sentinels.
    pub length: u32,
    /// Vocabulary id, or -1 for sentinels and training-time unknowns.
    pub id:     i32,
    /// Log probability of the piece.
    pub score:  f32,

    backtrace_score: f32,
    prev:            NodeId,
}

/// A scored path through the lattice, BOS and EOS excluded.
pub type PathWithScore = (Vec<NodeId>, f32);

#[derive(Clone, Default)]
pub struct Lattice {
    sentence:    String,
    /// Byte offset of each Unicode position, plus the final length.
    surface:     Vec<usize>,
    nodes:       Vec<Node>,
    begin_nodes: Vec<Vec<NodeId>>,
    end_nodes:   Vec<Vec<NodeId>>,
}
impl Debug for Lattice {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Lattice")
            .field("sentence", &self.sentence)
            .field("nodes", &format!("Vec({})", self.nodes.len()))
            .finish()
    }
}
impl Lattice {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the lattice and installs a new sentence with fresh BOS and
    /// EOS sentinels.
    #[inline(never)]
    pub fn set_sentence(&mut self, sentence: &str) {
        self.sentence.clear();
        self.sentence.push_str(sentence);
        self.surface.clear();
        self.nodes.clear();
        self.surface.extend(sentence.char_indices().map(|(i, _)| i));
        self.surface.push(sentence.len());
        let len = self.size();
        self.begin_nodes.clear();
        self.end_nodes.clear();
        self.begin_nodes.resize_with(len + 1, || Vec::with_capacity(16));
        self.end_nodes.resize_with(len + 1, || Vec::with_capacity(16));
        // BOS is node 0, EOS is node 1.
        self.nodes.push(Node {
            pos:             0,
            length:          0,
            id:              -1,
            score:           0.0,
            backtrace_score: 0.0,
            prev:            NO_NODE,
        });
        self.end_nodes[0].push(0);
        self.nodes.push(Node {
            pos:             len as u32,
            length:          0,
            id:              -1,
            score:           0.0,
            backtrace_score: 0.0,
            prev:            NO_NODE,
        });
        self.begin_nodes[len].push(1);
    }

    /// Length of the sentence in codepoints.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.surface.len().saturating_sub(1)
    }

    #[inline(always)]
    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    #[inline(always)]
    pub fn bos_node(&self) -> NodeId {
        0
    }

    #[inline(always)]
    pub fn eos_node(&self) -> NodeId {
        1
    }

    #[inline(always)]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    /// Byte offset of Unicode position `pos`.
    #[inline(always)]
    pub fn byte_offset(&self, pos: usize) -> usize {
        self.surface[pos]
    }

    /// The piece text covered by a node.
    #[inline(always)]
    pub fn piece(&self, id: NodeId) -> &str {
        let node = &self.nodes[id as usize];
        let begin = self.surface[node.pos as usize];
        let end = self.surface[(node.pos + node.length) as usize];
        &self.sentence[begin..end]
    }

    /// Inserts a candidate node at `[pos, pos + length)` codepoints.
    #[inline(never)]
    pub fn insert(&mut self, pos: usize, length: usize, id: i32, score: f32) -> NodeId {
        let node_id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            pos: pos as u32,
            length: length as u32,
            id,
            score,
            backtrace_score: 0.0,
            prev: NO_NODE,
        });
        self.begin_nodes[pos].push(node_id);
        self.end_nodes[pos + length].push(node_id);
        node_id
    }

    /// Returns the best path and its score.
    ///
    /// Score ties prefer the shorter incoming piece, then the
    /// lexicographically smaller one, keeping decoding deterministic.
    #[inline(never)]
    pub fn viterbi(&mut self) -> PathWithScore {
        let len = self.size();
        if len == 0 {
            return (Vec::new(), 0.0);
        }
        for pos in 0..=len {
            for i in 0..self.begin_nodes[pos].len() {
                let rnode = self.begin_nodes[pos][i];
                let rscore = self.nodes[rnode as usize].score;
                let mut best = NO_NODE;
                let mut best_score = 0.0f32;
                for j in 0..self.end_nodes[pos].len() {
                    let lnode = self.end_nodes[pos][j];
                    let score = self.nodes[lnode as usize].backtrace_score + rscore;
                    let better = best == NO_NODE
                        || score > best_score
                        || (score == best_score && self.prefer_over(lnode, best));
                    if better {
                        best = lnode;
                        best_score = score;
                    }
                }
                let node = &mut self.nodes[rnode as usize];
                node.prev = best;
                node.backtrace_score = best_score;
            }
        }
        let mut results = Vec::new();
        let mut node = self.nodes[self.eos_node() as usize].prev;
        while node != NO_NODE && self.nodes[node as usize].prev != NO_NODE {
            results.push(node);
            node = self.nodes[node as usize].prev;
        }
        results.reverse();
        (results, self.nodes[self.eos_node() as usize].backtrace_score)
    }

    /// Tie-break order: shorter piece first, then smaller bytes.
    #[inline(always)]
    fn prefer_over(&self, a: NodeId, b: NodeId) -> bool {
        let la = self.nodes[a as usize].length;
        let lb = self.nodes[b as usize].length;
        la < lb || (la == lb && self.piece(a) < self.piece(b))
    }

    /// Forward scores: `alpha[n]` is the log sum over paths from BOS up
    /// to (but excluding) node `n`, with piece scores scaled by `theta`.
    #[inline(never)]
    pub fn forward(&self, theta: f32) -> Vec<f32> {
        let len = self.size();
        let mut alpha = vec![0.0f32; self.nodes.len()];
        for pos in 0..=len {
            for &rnode in &self.begin_nodes[pos] {
                let mut accumulated = 0.0f32;
                for (j, &lnode) in self.end_nodes[pos].iter().enumerate() {
                    let score =
                        theta * self.nodes[lnode as usize].score + alpha[lnode as usize];
                    accumulated = log_sum_exp(accumulated, score, j == 0);
                }
                alpha[rnode as usize] = accumulated;
            }
        }
        alpha
    }

    /// Backward scores, symmetric to [`Lattice::forward`].
    #[inline(never)]
    pub fn backward(&self, theta: f32) -> Vec<f32> {
        let len = self.size();
        let mut beta = vec![0.0f32; self.nodes.len()];
        for pos in (0..=len).rev() {
            for &lnode in &self.end_nodes[pos] {
                let mut accumulated = 0.0f32;
                for (j, &rnode) in self.begin_nodes[pos].iter().enumerate() {
                    let score =
                        theta * self.nodes[rnode as usize].score + beta[rnode as usize];
                    accumulated = log_sum_exp(accumulated, score, j == 0);
                }
                beta[lnode as usize] = accumulated;
            }
        }
        beta
    }

    /// Accumulates `freq`-weighted expected counts of every piece id on
    /// the lattice into `expected` and returns `freq` times the sentence
    /// log likelihood.
    #[inline(never)]
    pub fn populate_marginal(&self, freq: f64, expected: &mut [f64]) -> f64 {
        let len = self.size();
        if len == 0 {
            return 0.0;
        }
        let alpha = self.forward(1.0);
        let beta = self.backward(1.0);
        let z = alpha[self.eos_node() as usize];
        for pos in 0..len {
            for &id in &self.begin_nodes[pos] {
                let node = &self.nodes[id as usize];
                if node.id >= 0 {
                    let marginal = (alpha[id as usize] + node.score + beta[id as usize] - z) as f64;
                    expected[node.id as usize] += freq * marginal.exp();
                }
            }
        }
        freq * z as f64
    }

    /// Entropy of the path distribution at temperature `theta`.
    #[inline(never)]
    pub fn calculate_entropy(&self, theta: f32) -> f32 {
        let len = self.size();
        if len == 0 {
            return 0.0;
        }
        let alpha = self.forward(theta);
        let beta = self.backward(theta);
        let z = alpha[self.eos_node() as usize];
        // H = log Z - theta * E[score].
        let mut expected_score = 0.0f64;
        for pos in 0..len {
            for &id in &self.begin_nodes[pos] {
                let node = &self.nodes[id as usize];
                let marginal =
                    ((alpha[id as usize] + theta * node.score + beta[id as usize] - z) as f64).exp();
                expected_score += marginal * node.score as f64;
            }
        }
        z - theta * expected_score as f32
    }

    /// Enumerates up to `n` best paths in descending score order via A*
    /// with the backward Viterbi score as the admissible heuristic.
    #[inline(never)]
    pub fn nbest(&mut self, n: usize) -> Vec<PathWithScore> {
        if n == 0 || self.size() == 0 {
            return Vec::new();
        }
        if n == 1 {
            return Vec::from([self.viterbi()]);
        }
        self.viterbi();

        struct Hypothesis {
            node: NodeId,
            next: u32,
            gx:   f32,
        }
        #[derive(PartialEq)]
        struct Item {
            fx:  f32,
            hyp: u32,
        }
        impl Eq for Item {}
        impl PartialOrd for Item {
            #[inline(always)]
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Item {
            #[inline(always)]
            fn cmp(&self, other: &Self) -> Ordering {
                self.fx.total_cmp(&other.fx).then_with(|| other.hyp.cmp(&self.hyp))
            }
        }

        let mut hypotheses = Vec::with_capacity(256);
        let mut agenda = QuaternaryHeap::new();
        let mut results = Vec::new();
        hypotheses.push(Hypothesis {
            node: self.eos_node(),
            next: u32::MAX,
            gx:   0.0,
        });
        agenda.push(Item { fx: 0.0, hyp: 0 });

        while let Some(Item { hyp, .. }) = agenda.pop() {
            let node = hypotheses[hyp as usize].node;
            if node == self.bos_node() {
                let mut path = Vec::new();
                let mut index = hypotheses[hyp as usize].next;
                while index != u32::MAX && hypotheses[index as usize].next != u32::MAX {
                    path.push(hypotheses[index as usize].node);
                    index = hypotheses[index as usize].next;
                }
                results.push((path, hypotheses[hyp as usize].gx));
                if results.len() == n {
                    break;
                }
                continue;
            }
            let pos = self.nodes[node as usize].pos as usize;
            for j in 0..self.end_nodes[pos].len() {
                let lnode = self.end_nodes[pos][j];
                let top_gx = hypotheses[hyp as usize].gx;
                let gx = self.nodes[lnode as usize].score + top_gx;
                let fx = self.nodes[lnode as usize].backtrace_score + top_gx;
                let index = hypotheses.len() as u32;
                hypotheses.push(Hypothesis {
                    node: lnode,
                    next: hyp,
                    gx,
                });
                agenda.push(Item { fx, hyp: index });
            }
            if hypotheses.len() > MAX_HYPOTHESES {
                log::warn!("n-best agenda exceeded its size limit, returning partial results");
                break;
            }
        }
        results
    }

    /// Samples one path with probability proportional to
    /// `exp(theta * score)` using forward filtering and backward
    /// sampling. At `theta == 0` every path is equally likely.
    #[inline(never)]
    pub fn sample<R: Rng>(&self, theta: f32, rng: &mut R) -> Vec<NodeId> {
        if self.size() == 0 {
            return Vec::new();
        }
        let alpha = self.forward(theta);
        let mut results = Vec::new();
        let mut node = self.eos_node();
        loop {
            let pos = self.nodes[node as usize].pos as usize;
            let candidates = &self.end_nodes[pos];
            let total = alpha[node as usize] as f64;
            let mut probs = Vec::with_capacity(candidates.len());
            let mut sum = 0.0f64;
            for &lnode in candidates {
                let weight = ((alpha[lnode as usize]
                    + theta * self.nodes[lnode as usize].score)
                    as f64
                    - total)
                    .exp();
                sum += weight;
                probs.push(weight);
            }
            let mut draw = rng.random::<f64>() * sum;
            let mut chosen = candidates[candidates.len() - 1];
            for (weight, &lnode) in probs.iter().zip(candidates) {
                draw -= weight;
                if draw <= 0.0 {
                    chosen = lnode;
                    break;
                }
            }
            if chosen == self.bos_node() {
                break;
            }
            results.push(chosen);
            node = chosen;
        }
        results.reverse();
        results
    }

    /// Draws up to `n` distinct paths by repeated sampling without
    /// replacement, returned in descending score order.
    #[inline(never)]
    pub fn sample_nbest<R: Rng>(
        &mut self, n: usize, theta: f32, rng: &mut R,
    ) -> Vec<PathWithScore> {
        if n == 0 || self.size() == 0 {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut results: Vec<PathWithScore> = Vec::new();
        let attempts = 10 * n + 100;
        for _ in 0..attempts {
            let path = self.sample(theta, rng);
            if path.is_empty() {
                break;
            }
            if seen.insert(path.clone()) {
                let score = path.iter().map(|&id| self.nodes[id as usize].score).sum();
                results.push((path, score));
                if results.len() == n {
                    break;
                }
            }
        }
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results
    }

    /// Converts a path into `(byte range, id)` pairs over the sentence.
    #[inline(never)]
    pub fn path_to_ranges(&self, path: &[NodeId]) -> Vec<(core::ops::Range<usize>, i32)> {
        path.iter()
            .map(|&id| {
                let node = &self.nodes[id as usize];
                let begin = self.surface[node.pos as usize];
                let end = self.surface[(node.pos + node.length) as usize];
                (begin..end, node.id)
            })
            .collect()
    }

}

/// `log(exp(x) + exp(y))` with a 50-nat short-circuit; with `init` set
/// the accumulator starts over at `y`.
#[inline(always)]
pub(crate) fn log_sum_exp(x: f32, y: f32, init: bool) -> f32 {
    if init {
        return y;
    }
    let (vmin, vmax) = if x < y { (x, y) } else { (y, x) };
    if vmax > vmin + MINUS_LOG_EPSILON {
        vmax
    } else {
        vmax + ((vmin - vmax).exp() + 1.0).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Builds the lattice over "ABC" from the marginal example: pieces
    /// A, B, C, AB, BC, ABC with scores 1.0, 1.2, 2.5, 3.0, 4.0, 2.0.
    fn abc_lattice() -> Lattice {
        let mut lattice = Lattice::new();
        lattice.set_sentence("ABC");
        lattice.insert(0, 1, 0, 1.0);
        lattice.insert(1, 1, 1, 1.2);
        lattice.insert(2, 1, 2, 2.5);
        lattice.insert(0, 2, 3, 3.0);
        lattice.insert(1, 2, 4, 4.0);
        lattice.insert(0, 3, 5, 2.0);
        lattice
    }

    #[test]
    fn test_viterbi_picks_best_path() {
        let mut lattice = abc_lattice();
        let (path, score) = lattice.viterbi();
        // AB + C scores 5.5, ahead of A + BC at 5.0.
        let pieces = path.iter().map(|&id| lattice.piece(id)).collect::<Vec<_>>();
        assert_eq!(pieces, vec!["AB", "C"]);
        assert!((score - 5.5).abs() < 1e-4);
    }

    #[test]
    fn test_populate_marginal_matches_closed_form() {
        let lattice = abc_lattice();
        let p1 = f64::exp(1.0 + 1.2 + 2.5); // A B C
        let p2 = f64::exp(3.0 + 2.5); // AB C
        let p3 = f64::exp(1.0 + 4.0); // A BC
        let p4 = f64::exp(2.0); // ABC
        let z = p1 + p2 + p3 + p4;
        let mut expected = vec![0.0f64; 6];
        let likelihood = lattice.populate_marginal(1.0, &mut expected);
        let want = [
            (p1 + p3) / z, // A
            p1 / z,        // B
            (p1 + p2) / z, // C
            p2 / z,        // AB
            p3 / z,        // BC
            p4 / z,        // ABC
        ];
        for (got, want) in expected.iter().zip(want) {
            assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        }
        assert!((likelihood - z.ln()).abs() < 1e-3);
    }

    #[test]
    fn test_nbest_order_and_count() {
        let mut lattice = abc_lattice();
        let nbest = lattice.nbest(10);
        // Four distinct paths exist.
        assert_eq!(nbest.len(), 4);
        let scores = nbest.iter().map(|(_, s)| *s).collect::<Vec<_>>();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        let best = nbest[0].0.iter().map(|&id| lattice.piece(id)).collect::<Vec<_>>();
        assert_eq!(best, vec!["AB", "C"]);
        // Requesting fewer yields exactly that many.
        assert_eq!(lattice.nbest(2).len(), 2);
    }

    #[test]
    fn test_sample_uniform_at_theta_zero() {
        let lattice = abc_lattice();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = hashbrown::HashMap::new();
        let draws = 20_000;
        for _ in 0..draws {
            let path = lattice.sample(0.0, &mut rng);
            let key = path.iter().map(|&id| lattice.piece(id).to_string()).collect::<Vec<_>>();
            *counts.entry(key.join(" ")).or_insert(0usize) += 1;
        }
        assert_eq!(counts.len(), 4);
        for (_, &count) in counts.iter() {
            let freq = count as f64 / draws as f64;
            assert!((freq - 0.25).abs() < 0.03, "{freq}");
        }
    }

    #[test]
    fn test_sample_matches_scores_at_theta_one() {
        let lattice = abc_lattice();
        let mut rng = StdRng::seed_from_u64(7);
        let p1 = f64::exp(1.0 + 1.2 + 2.5);
        let p2 = f64::exp(3.0 + 2.5);
        let p3 = f64::exp(1.0 + 4.0);
        let p4 = f64::exp(2.0);
        let z = p1 + p2 + p3 + p4;
        let draws = 50_000;
        let mut hit = 0usize;
        for _ in 0..draws {
            let path = lattice.sample(1.0, &mut rng);
            let pieces = path.iter().map(|&id| lattice.piece(id)).collect::<Vec<_>>();
            if pieces == ["AB", "C"] {
                hit += 1;
            }
        }
        let freq = hit as f64 / draws as f64;
        assert!((freq - p2 / z).abs() < 0.02, "{freq} vs {}", p2 / z);
    }

    #[test]
    fn test_sample_nbest_distinct() {
        let mut lattice = abc_lattice();
        let mut rng = StdRng::seed_from_u64(3);
        let results = lattice.sample_nbest(4, 1.0, &mut rng);
        assert_eq!(results.len(), 4);
        let mut seen = std::collections::HashSet::new();
        for (path, _) in &results {
            assert!(seen.insert(path.clone()));
        }
    }

    #[test]
    fn test_entropy_positive() {
        let lattice = abc_lattice();
        let entropy = lattice.calculate_entropy(1.0);
        assert!(entropy > 0.0);
        // Entropy at theta 0 is the log path count.
        let uniform = lattice.calculate_entropy(0.0);
        assert!((uniform - (4.0f32).ln()).abs() < 1e-3);
    }

    #[test]
    fn test_empty_sentence() {
        let mut lattice = Lattice::new();
        lattice.set_sentence("");
        assert_eq!(lattice.size(), 0);
        assert!(lattice.viterbi().0.is_empty());
    }

    #[test]
    fn test_log_sum_exp_short_circuit() {
        let a = log_sum_exp(0.0, 100.0, false);
        assert_eq!(a, 100.0);
        let b = log_sum_exp(1.0f32.ln(), 1.0f32.ln(), false);
        assert!((b - 2.0f32.ln()).abs() < 1e-6);
    }
}
