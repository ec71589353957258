use bytes::{Buf, BufMut, Bytes, BytesMut};

const WORD_BITS: usize = 64;

/// A growable set of piece indices backed by a bit vector.
///
/// Capacity doubles on overflow, so `insert` and `contains` are O(1)
/// amortized. Indices are `u32` and therefore never negative.
#[derive(Debug, Clone, Default)]
pub struct PieceIndexSet {
    words: Vec<u64>,
    len: usize,
}

impl PieceIndexSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set with room for indices below `capacity`.
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            words: vec![0; (capacity as usize).div_ceil(WORD_BITS)],
            len: 0,
        }
    }

    /// Creates the set `{0, 1, .., count-1}`.
    pub fn full(count: u32) -> Self {
        let mut set = Self::with_capacity(count);
        set.insert_range(0, count);
        set
    }

    /// Number of indices in the set.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the set holds no indices.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn capacity_bits(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    fn grow_for(&mut self, index: u32) {
        let needed = index as usize / WORD_BITS + 1;
        if needed > self.words.len() {
            let doubled = (self.words.len() * 2).max(1);
            self.words.resize(needed.max(doubled), 0);
        }
    }

    /// Adds `index` to the set. Returns true if it was not already present.
    pub fn insert(&mut self, index: u32) -> bool {
        self.grow_for(index);
        let (w, b) = (index as usize / WORD_BITS, index as usize % WORD_BITS);
        let mask = 1u64 << b;
        if self.words[w] & mask == 0 {
            self.words[w] |= mask;
            self.len += 1;
            true
        } else {
            false
        }
    }

    /// Adds every index in `[first, last)`.
    pub fn insert_range(&mut self, first: u32, last: u32) {
        for i in first..last {
            self.insert(i);
        }
    }

    /// Removes `index` from the set. Returns true if it was present.
    pub fn remove(&mut self, index: u32) -> bool {
        let w = index as usize / WORD_BITS;
        if w >= self.words.len() {
            return false;
        }
        let mask = 1u64 << (index as usize % WORD_BITS);
        if self.words[w] & mask != 0 {
            self.words[w] &= !mask;
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Returns true if `index` is in the set.
    pub fn contains(&self, index: u32) -> bool {
        let w = index as usize / WORD_BITS;
        w < self.words.len() && self.words[w] & (1u64 << (index as usize % WORD_BITS)) != 0
    }

    /// Intersection with `other`, as a new set.
    pub fn and(&self, other: &Self) -> Self {
        let n = self.words.len().min(other.words.len());
        let words: Vec<u64> = (0..n).map(|i| self.words[i] & other.words[i]).collect();
        Self::from_words(words)
    }

    /// Union with `other`, as a new set.
    pub fn or(&self, other: &Self) -> Self {
        let n = self.words.len().max(other.words.len());
        let words: Vec<u64> = (0..n)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        Self::from_words(words)
    }

    /// Complement within `[0, last_index)`, as a new set.
    ///
    /// Indices at or beyond the set's internal capacity count as absent, so
    /// they always appear in the complement.
    pub fn not(&self, last_index: u32) -> Self {
        let mut out = Self::with_capacity(last_index);
        for i in 0..last_index {
            if !self.contains(i) {
                out.insert(i);
            }
        }
        out
    }

    /// Subtraction: every index of `self` not in `other`, as a new set.
    pub fn minus(&self, other: &Self) -> Self {
        let words: Vec<u64> = (0..self.words.len())
            .map(|i| self.words[i] & !other.words.get(i).copied().unwrap_or(0))
            .collect();
        Self::from_words(words)
    }

    fn from_words(words: Vec<u64>) -> Self {
        let len = words.iter().map(|w| w.count_ones() as usize).sum();
        Self { words, len }
    }

    /// Destructively extracts the `floor(fraction * len)` numerically
    /// smallest indices and returns them as a new set.
    pub fn remove_first(&mut self, fraction: f64) -> Self {
        let count = (fraction * self.len as f64).floor() as usize;
        let mut out = Self::new();
        for index in self.iter().take(count).collect::<Vec<_>>() {
            self.remove(index);
            out.insert(index);
        }
        out
    }

    /// The smallest index in the set, if any.
    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    /// The `n`-th smallest index in the set (zero-based), if any.
    pub fn nth(&self, n: usize) -> Option<u32> {
        self.iter().nth(n)
    }

    /// Iterates the indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..WORD_BITS)
                .filter(move |b| word & (1u64 << b) != 0)
                .map(move |b| (w * WORD_BITS + b) as u32)
        })
    }

    /// Serializes as a u32 bit-length followed by packed bytes, high bit
    /// first within each byte.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let bit_len = self.iter().last().map(|i| i + 1).unwrap_or(0);
        buf.put_u32(bit_len);
        let mut packed = vec![0u8; (bit_len as usize).div_ceil(8)];
        for index in self.iter() {
            packed[index as usize / 8] |= 0x80 >> (index % 8);
        }
        buf.put_slice(&packed);
    }

    /// Number of bytes `write_to` produces.
    pub fn wire_len(&self) -> usize {
        let bit_len = self.iter().last().map(|i| i + 1).unwrap_or(0) as usize;
        4 + bit_len.div_ceil(8)
    }

    /// Deserializes the `write_to` form. Returns None on a short buffer.
    pub fn read_from(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let bit_len = buf.get_u32() as usize;
        let byte_len = bit_len.div_ceil(8);
        if buf.remaining() < byte_len {
            return None;
        }
        let packed = buf.copy_to_bytes(byte_len);
        let mut set = Self::with_capacity(bit_len as u32);
        for i in 0..bit_len {
            if packed[i / 8] & (0x80 >> (i % 8)) != 0 {
                set.insert(i as u32);
            }
        }
        Some(set)
    }
}

/// Comparison covers only the words both sets have allocated; bits beyond
/// the shorter set's internal capacity are ignored.
impl PartialEq for PieceIndexSet {
    fn eq(&self, other: &Self) -> bool {
        let n = self.words.len().min(other.words.len());
        self.words[..n] == other.words[..n]
    }
}

impl FromIterator<u32> for PieceIndexSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut set = Self::new();
        for i in iter {
            set.insert(i);
        }
        set
    }
}
