//! Square bit matrix stored as one run of `u64` words per row.

pub(crate) const WORD_BITS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BitMatrix {
    n_words: usize,
    words: Vec<u64>,
}

impl BitMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        let n_words = n_cols.div_ceil(WORD_BITS);
        Self {
            n_words,
            words: vec![0; n_rows * n_words],
        }
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[u64] {
        &self.words[r * self.n_words..(r + 1) * self.n_words]
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> bool {
        self.words[r * self.n_words + c / WORD_BITS] & (1u64 << (c % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize) {
        self.words[r * self.n_words + c / WORD_BITS] |= 1u64 << (c % WORD_BITS);
    }

    pub fn count(&self, r: usize) -> usize {
        self.row(r).iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Row `dst` |= row `src`.
    pub fn or_row_into(&mut self, dst: usize, src: usize) {
        if dst == src {
            return;
        }
        let n = self.n_words;
        let (d, s) = if dst < src {
            let (lo, hi) = self.words.split_at_mut(src * n);
            (&mut lo[dst * n..(dst + 1) * n], &hi[..n])
        } else {
            let (lo, hi) = self.words.split_at_mut(dst * n);
            (&mut hi[..n], &lo[src * n..(src + 1) * n])
        };
        for (x, y) in d.iter_mut().zip(s) {
            *x |= *y;
        }
    }

    /// Row `dst` |= `bits`.
    pub fn or_words_into(&mut self, dst: usize, bits: &[u64]) {
        let n = self.n_words;
        for (x, y) in self.words[dst * n..(dst + 1) * n].iter_mut().zip(bits) {
            *x |= *y;
        }
    }
}

/// Number of bits set in both rows.
pub(crate) fn count_and(a: &[u64], b: &[u64]) -> usize {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x & y).count_ones() as usize)
        .sum()
}

/// Indices of the set bits.
pub(crate) fn ones(row: &[u64]) -> impl Iterator<Item = usize> + '_ {
    row.iter().enumerate().flat_map(|(w, &word)| {
        let mut bits = word;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let t = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(w * WORD_BITS + t)
        })
    })
}
