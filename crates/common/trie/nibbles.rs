use std::cmp;

use lattice_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

/// Hex nibble sequence used for trie traversal.
///
/// `data[..consumed]` is the prefix already walked from the trie root (kept for
/// node-path tracking, so a node's absolute position is always recoverable),
/// and `data[consumed..]` is the remaining part of the key. Equality, ordering
/// and hashing only look at the remaining part.
#[derive(Debug, Clone, Default)]
pub struct Nibbles {
    data: Vec<u8>,
    consumed: usize,
}

impl PartialEq for Nibbles {
    fn eq(&self, other: &Nibbles) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Nibbles {}

impl PartialOrd for Nibbles {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Nibbles {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl std::hash::Hash for Nibbles {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl Nibbles {
    /// Returns the remaining nibbles as a slice.
    #[inline]
    fn as_slice(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    /// Create `Nibbles` from hex-encoded nibbles.
    pub fn from_hex(hex: Vec<u8>) -> Self {
        Self {
            data: hex,
            consumed: 0,
        }
    }

    /// Splits incoming bytes into nibbles and appends the leaf flag (a 16 nibble at the end).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_raw(bytes, true)
    }

    /// Splits incoming bytes into nibbles, appending the leaf flag (a 16 nibble
    /// at the end) if `is_leaf` is set.
    pub fn from_raw(bytes: &[u8], is_leaf: bool) -> Self {
        let mut data = Vec::with_capacity(bytes.len() * 2 + 1);
        for byte in bytes {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }
        if is_leaf {
            data.push(16);
        }
        Self { data, consumed: 0 }
    }

    /// Returns the amount of remaining nibbles.
    pub fn len(&self) -> usize {
        self.data.len() - self.consumed
    }

    /// Returns true if there are no remaining nibbles.
    pub fn is_empty(&self) -> bool {
        self.consumed == self.data.len()
    }

    /// If `prefix` is a prefix of the remaining nibbles, consume it and return
    /// true, otherwise return false.
    pub fn skip_prefix(&mut self, prefix: &Nibbles) -> bool {
        let prefix_len = prefix.len();
        if self.len() >= prefix_len && &self.as_slice()[..prefix_len] == prefix.as_slice() {
            self.consumed += prefix_len;
            true
        } else {
            false
        }
    }

    /// Returns the shared nibble count between the remainder of self and `other`.
    pub fn count_prefix(&self, other: &Nibbles) -> usize {
        self.as_slice()
            .iter()
            .zip(other.as_slice().iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Consumes and returns the first remaining nibble.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<u8> {
        let nibble = self.data.get(self.consumed).copied()?;
        self.consumed += 1;
        Some(nibble)
    }

    /// Consumes and returns the first remaining nibble if it is a suitable
    /// branch choice index (aka < 16).
    pub fn next_choice(&mut self) -> Option<usize> {
        self.next().filter(|choice| *choice < 16).map(usize::from)
    }

    /// Returns a copy of self with `offset` extra nibbles consumed.
    pub fn offset(&self, offset: usize) -> Nibbles {
        debug_assert!(offset <= self.len());
        Nibbles {
            data: self.data.clone(),
            consumed: self.consumed + offset,
        }
    }

    /// Returns the remaining nibbles between the `start` and `end` indexes as a
    /// fresh sequence without consumed prefix.
    pub fn slice(&self, start: usize, end: usize) -> Nibbles {
        Nibbles::from_hex(self.as_slice()[start..end].to_vec())
    }

    /// Returns the remaining nibble at the given index, will panic if the index
    /// is out of range.
    pub fn at(&self, i: usize) -> usize {
        self.as_slice()[i] as usize
    }

    /// Inserts a nibble at the start of the remaining sequence.
    pub fn prepend(&mut self, nibble: u8) {
        self.data.insert(self.consumed, nibble);
    }

    /// Appends the remaining nibbles of another sequence.
    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(other.as_slice());
    }

    /// Concatenates the remainders of self and another sequence, keeping self's
    /// consumed prefix.
    pub fn concat(&self, other: &Nibbles) -> Nibbles {
        let mut data = self.data.clone();
        data.extend_from_slice(other.as_slice());
        Nibbles {
            data,
            consumed: self.consumed,
        }
    }

    /// Returns a copy of self with the nibble added at the end.
    pub fn append_new(&self, nibble: u8) -> Nibbles {
        let mut data = self.data.clone();
        data.push(nibble);
        Nibbles {
            data,
            consumed: self.consumed,
        }
    }

    /// Returns the already-consumed prefix as a fresh sequence. This is the
    /// node's absolute path from the trie root during traversal.
    pub fn current(&self) -> Nibbles {
        Nibbles::from_hex(self.data[..self.consumed].to_vec())
    }

    /// Encodes the remaining nibbles in compact hex-prefix form.
    ///
    /// ```text
    /// node type    path length    |    prefix    hexchar
    /// --------------------------------------------------
    /// extension    even           |    0000      0x0
    /// extension    odd            |    0001      0x1
    /// leaf         even           |    0010      0x2
    /// leaf         odd            |    0011      0x3
    /// ```
    pub fn encode_compact(&self) -> Vec<u8> {
        let is_leaf = self.is_leaf();
        let data = self.as_slice();
        let mut hex = if is_leaf {
            &data[..data.len() - 1]
        } else {
            data
        };

        let mut compact = Vec::with_capacity(hex.len() / 2 + 1);
        let first = if hex.len() % 2 == 1 {
            let first = 0x10 + hex[0];
            hex = &hex[1..];
            first
        } else {
            0x00
        };
        compact.push(first + if is_leaf { 0x20 } else { 0x00 });
        for pair in hex.chunks_exact(2) {
            compact.push((pair[0] << 4) | pair[1]);
        }

        compact
    }

    /// Returns the length of the compact hex-prefix encoding.
    pub fn compact_encoded_length(&self) -> usize {
        let mut hex_len = self.len();
        if self.is_leaf() {
            hex_len -= 1;
        }
        1 + hex_len / 2
    }

    /// Decodes nibbles from compact hex-prefix form.
    pub fn decode_compact(compact: &[u8]) -> Self {
        Self::from_hex(compact_to_hex(compact))
    }

    /// Returns true if the nibbles contain the leaf flag (16) at the end.
    pub fn is_leaf(&self) -> bool {
        match self.as_slice().last() {
            Some(nibble) => *nibble == 16,
            None => false,
        }
    }

    /// Combines the remaining nibbles into bytes, trimming the leaf flag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data = self.as_slice();
        let trimmed = if self.is_leaf() {
            &data[..data.len() - 1]
        } else {
            data
        };
        trimmed
            .chunks(2)
            .map(|chunk| match chunk.len() {
                1 => chunk[0] << 4,
                _ => (chunk[0] << 4) | chunk[1],
            })
            .collect()
    }

    /// Returns the remaining nibbles as a hex vector.
    pub fn into_vec(self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl AsRef<[u8]> for Nibbles {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl RLPEncode for Nibbles {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf).encode_bytes(self.as_slice()).finish();
    }
}

impl RLPDecode for Nibbles {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (data, decoder): (bytes::Bytes, _) = decoder.decode_field("data")?;
        Ok((Self::from_hex(data.to_vec()), decoder.finish()?))
    }
}

// Hex-prefix decoding as done by go-ethereum (trie/encoding.go).
fn compact_to_hex(compact: &[u8]) -> Vec<u8> {
    if compact.is_empty() {
        return vec![];
    }
    let mut base = keybytes_to_hex(compact);
    // delete terminator flag
    if base[0] < 2 {
        base.truncate(base.len() - 1);
    }
    // apply odd flag
    let chop = 2 - (base[0] & 1) as usize;
    base[chop..].to_vec()
}

fn keybytes_to_hex(keybytes: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(keybytes.len() * 2 + 1);
    for byte in keybytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles.push(16);
    nibbles
}
