//! Zero-copy scatter-gather byte buffers.
//!
//! `ByteBuffer` owns a sequence of heap segments exclusively; calling
//! [`ByteBuffer::freeze`] turns it into a [`ByteBufferSlice`], a cheap,
//! reference-counted, immutable view that can be shared across the
//! MAC/RLC/PDCP boundary without copying. A [`ByteBufferChain`] appends
//! slices end to end and is the type that actually crosses layers (spec
//! §3): it is logically contiguous over `[0, length)` and iterates bytes
//! in insertion order.
//!
//! This mirrors the teacher's `MessageSlot` zero-copy design (cache-line
//! sized segments, no allocation on the read path) adapted from "one
//! fixed-size slot" to "a chain of variable-length segments", since RLC
//! SDUs and PDUs are not bounded to one slot's worth of bytes.

use std::sync::Arc;

/// A growable, exclusively-owned sequence of bytes.
///
/// Use this while assembling a PDU or SDU; once complete, [`freeze`] it
/// into a shareable [`ByteBufferSlice`].
///
/// [`freeze`]: ByteBuffer::freeze
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with at least `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity) }
    }

    /// Build a buffer by copying `bytes`.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self { data: bytes.to_vec() }
    }

    /// Append bytes to the end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Convert into an immutable, shareable [`ByteBufferSlice`] spanning
    /// the whole buffer.
    pub fn freeze(self) -> ByteBufferSlice {
        let len = self.data.len();
        ByteBufferSlice { storage: Arc::new(self.data), start: 0, end: len }
    }
}

/// An immutable, reference-counted view over a sub-range of a frozen
/// [`ByteBuffer`]. Cloning is an `Arc` bump, never a copy of the bytes.
#[derive(Debug, Clone)]
pub struct ByteBufferSlice {
    storage: Arc<Vec<u8>>,
    start: usize,
    end: usize,
}

impl ByteBufferSlice {
    /// Number of bytes in this view.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Borrow the viewed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Take a sub-range `[from, to)` of this view without copying.
    pub fn sub_slice(&self, from: usize, to: usize) -> ByteBufferSlice {
        assert!(from <= to && self.start + to <= self.end, "sub_slice out of range");
        ByteBufferSlice { storage: self.storage.clone(), start: self.start + from, end: self.start + to }
    }
}

/// An ordered sequence of [`ByteBufferSlice`]s appended without copying.
/// Logically contiguous over `[0, length)` (spec §3 invariant);
/// iterating yields bytes in insertion order.
#[derive(Debug, Default, Clone)]
pub struct ByteBufferChain {
    parts: Vec<ByteBufferSlice>,
    length: usize,
}

impl ByteBufferChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from a single frozen buffer.
    pub fn from_slice(slice: ByteBufferSlice) -> Self {
        let length = slice.len();
        Self { parts: vec![slice], length }
    }

    /// Append another slice to the end of the chain, without copying.
    pub fn push_back(&mut self, slice: ByteBufferSlice) {
        self.length += slice.len();
        self.parts.push(slice);
    }

    /// Total length across all segments.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the chain carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of appended segments.
    pub fn nof_segments(&self) -> usize {
        self.parts.len()
    }

    /// Materialise the chain into one contiguous, owned byte vector.
    /// Only used at the edges (e.g. handing an RX SDU to the upper
    /// layer) — the hot path iterates segments directly instead.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        for part in &self.parts {
            out.extend_from_slice(part.as_slice());
        }
        out
    }

    /// Iterate the chain's bytes in insertion order without an
    /// intermediate allocation.
    pub fn iter_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.parts.iter().flat_map(|p| p.as_slice().iter().copied())
    }

    /// Borrow the underlying segments.
    pub fn segments(&self) -> &[ByteBufferSlice] {
        &self.parts
    }
}

impl From<Vec<u8>> for ByteBufferChain {
    fn from(bytes: Vec<u8>) -> Self {
        ByteBuffer { data: bytes }.freeze().into()
    }
}

impl From<ByteBufferSlice> for ByteBufferChain {
    fn from(slice: ByteBufferSlice) -> Self {
        ByteBufferChain::from_slice(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_preserves_bytes() {
        let mut b = ByteBuffer::new();
        b.append(b"hello");
        let slice = b.freeze();
        assert_eq!(slice.as_slice(), b"hello");
    }

    #[test]
    fn test_sub_slice_is_zero_copy_view() {
        let mut b = ByteBuffer::new();
        b.append(b"0123456789");
        let slice = b.freeze();
        let sub = slice.sub_slice(2, 5);
        assert_eq!(sub.as_slice(), b"234");
    }

    #[test]
    fn test_chain_is_contiguous_in_insertion_order() {
        let mut chain = ByteBufferChain::new();
        chain.push_back(ByteBuffer::copy_from(b"ab").freeze());
        chain.push_back(ByteBuffer::copy_from(b"cd").freeze());
        chain.push_back(ByteBuffer::copy_from(b"ef").freeze());
        assert_eq!(chain.len(), 6);
        assert_eq!(chain.to_vec(), b"abcdef");
        assert_eq!(chain.iter_bytes().collect::<Vec<u8>>(), b"abcdef");
    }

    #[test]
    fn test_clone_is_cheap_arc_bump() {
        let slice = ByteBuffer::copy_from(b"shared").freeze();
        let clone_a = slice.clone();
        let clone_b = slice.clone();
        assert_eq!(clone_a.as_slice(), clone_b.as_slice());
    }
}
