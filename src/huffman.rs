use crate::vocab::Vocabulary;

/// Longest code the tree can produce for any realistic corpus.
const MAX_CODE_LENGTH: usize = 40;

/// Binary Huffman tree over the vocabulary, for hierarchical softmax.
///
/// Leaves are token ids `0..V`. Internal nodes are numbered `V..2V-1` in the
/// order they were merged, so the root is `2V-2`. The `points` stored here are
/// internal node numbers minus `V`, i.e. rows of the hierarchical-softmax
/// weight matrix, which has `V - 1` rows.
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    /// `codes[w][i]` is which child (0 or 1) the path to `w` takes at depth `i`.
    codes: Vec<Vec<u8>>,
    /// `points[w][i]` is the internal node visited at depth `i`; `points[w][0]`
    /// is the root.
    points: Vec<Vec<u32>>,
}

impl HuffmanTree {
    // Create binary Huffman tree using the word counts.
    // Frequent words will have short unique binary codes.
    #[allow(clippy::needless_range_loop)]
    pub fn new(vocab: &Vocabulary) -> Self {
        let vocab_size = vocab.len();
        if vocab_size < 2 {
            // A single token needs no decisions.
            return HuffmanTree {
                codes: vec![Vec::new(); vocab_size],
                points: vec![Vec::new(); vocab_size],
            };
        }

        let mut count = vec![0u64; vocab_size * 2 + 1];
        let mut binary = vec![0u8; vocab_size * 2 + 1]; // which child a node is of its parent (0 or 1)
        let mut parent_node = vec![0usize; vocab_size * 2 + 1];

        for a in 0..vocab_size {
            count[a] = vocab.count(a);
        }
        for a in vocab_size..(vocab_size * 2) {
            count[a] = 1_000_000_000_000_000;
        }

        // Leaves are sorted by descending count, so the smallest unmerged leaf
        // is at `pos1 - 1` and the smallest unmerged internal node at `pos2`.
        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        for a in 0..(vocab_size - 1) {
            // First, find two smallest nodes 'min1, min2'
            let min1i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min1i = pos1;
            } else {
                min1i = pos2;
                pos2 += 1;
            }

            let min2i;
            if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                pos1 -= 1;
                min2i = pos1;
            } else {
                min2i = pos2;
                pos2 += 1;
            }

            count[vocab_size + a] = count[min1i] + count[min2i];
            parent_node[min1i] = vocab_size + a;
            parent_node[min2i] = vocab_size + a;
            binary[min2i] = 1;
        }

        let root = vocab_size * 2 - 2;
        let mut codes = Vec::with_capacity(vocab_size);
        let mut points = Vec::with_capacity(vocab_size);
        for a in 0..vocab_size {
            let mut code: Vec<u8> = Vec::with_capacity(MAX_CODE_LENGTH);
            let mut point: Vec<u32> = Vec::with_capacity(MAX_CODE_LENGTH);
            let mut b = a;
            loop {
                if !code.is_empty() {
                    point.push((b - vocab_size) as u32);
                }
                code.push(binary[b]);
                b = parent_node[b];
                if b == root {
                    break;
                }
            }
            point.push((root - vocab_size) as u32);
            code.reverse();
            point.reverse();
            codes.push(code);
            points.push(point);
        }

        HuffmanTree { codes, points }
    }

    pub fn code(&self, word: usize) -> &[u8] {
        &self.codes[word]
    }

    pub fn points(&self, word: usize) -> &[u32] {
        &self.points[word]
    }

    /// Number of internal nodes, i.e. rows in the weight matrix.
    pub fn num_inner_nodes(&self) -> usize {
        self.codes.len().saturating_sub(1)
    }
}
