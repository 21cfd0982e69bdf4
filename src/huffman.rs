//! Huffman coding of the vocabulary, for the hierarchical softmax output layer.

/// A binary Huffman tree over a count-sorted vocabulary.
///
/// Node ids `0..n` are the leaves (vocabulary indices); ids `n..2n-1` are
/// internal nodes, created in merge order, so the root is `2n - 2`.
/// Internal nodes are reported to callers normalized to `id - n`, which is
/// the row of the output matrix that holds that node's parameters.
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    vocab_size: usize,
    /// The parent of every node except the root.
    parent: Vec<usize>,
    /// Which child a node is of its parent (0 or 1).
    binary: Vec<u8>,
    /// For internal node `i` (normalized), its children by bit.
    children: Vec<[usize; 2]>,
}

impl HuffmanTree {
    /// Build the tree. `counts` should be in descending order; the
    /// vocabulary's first entry (the sentence marker) is exempt from the
    /// sort, which can cost optimality but still yields a full binary tree.
    ///
    /// Instead of a priority queue, two cursors walk the leaves (from the
    /// smallest end) and the newly created internal nodes (which are
    /// created in nondecreasing weight order). On equal weights the leaf is
    /// taken first. Of the two nodes merged, the second one, which is never
    /// lighter, gets bit 1.
    pub fn build(counts: &[u64]) -> Self {
        let vocab_size = counts.len();
        if vocab_size < 2 {
            return HuffmanTree {
                vocab_size,
                parent: vec![0; vocab_size],
                binary: vec![0; vocab_size],
                children: vec![],
            };
        }

        let num_nodes = vocab_size * 2 - 1;
        let mut count = vec![u64::MAX; num_nodes];
        count[..vocab_size].copy_from_slice(counts);
        let mut binary = vec![0u8; num_nodes];
        let mut parent = vec![0usize; num_nodes];
        let mut children = Vec::with_capacity(vocab_size - 1);

        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        let mut pick = |count: &[u64]| -> usize {
            if pos1 > 0 && count[pos1 - 1] <= count[pos2] {
                pos1 -= 1;
                pos1
            } else {
                pos2 += 1;
                pos2 - 1
            }
        };

        // Following algorithm constructs the Huffman tree by adding one node at a time
        for a in 0..(vocab_size - 1) {
            // First, find two smallest nodes 'min1, min2'
            let min1i = pick(&count);
            let min2i = pick(&count);

            count[vocab_size + a] = count[min1i] + count[min2i];
            parent[min1i] = vocab_size + a;
            parent[min2i] = vocab_size + a;
            binary[min2i] = 1;
            children.push([min1i, min2i]);
        }

        HuffmanTree {
            vocab_size,
            parent,
            binary,
            children,
        }
    }

    /// Number of internal nodes, always `vocab_size - 1` (or 0 for an
    /// empty or single-word vocabulary).
    pub fn num_internal(&self) -> usize {
        self.children.len()
    }

    /// The root's normalized id, if there are any internal nodes.
    pub fn root(&self) -> Option<usize> {
        self.children.len().checked_sub(1)
    }

    /// Children of internal node `node` (normalized), indexed by bit. The
    /// returned ids are raw: values below `vocab_size` are leaves.
    pub fn children(&self, node: usize) -> [usize; 2] {
        self.children[node]
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// The code and path of `leaf`, both root first. `point[d]` is the
    /// normalized internal node whose decision is `code[d]`.
    pub fn code(&self, leaf: usize) -> (Vec<u8>, Vec<u32>) {
        let n = self.vocab_size;
        let mut code = vec![];
        let mut point = vec![];
        if n < 2 {
            return (code, point);
        }
        let root = n * 2 - 2;
        let mut b = leaf;
        loop {
            code.push(self.binary[b]);
            let p = self.parent[b];
            point.push((p - n) as u32);
            if p == root {
                break;
            }
            b = p;
        }
        code.reverse();
        point.reverse();
        (code, point)
    }
}
