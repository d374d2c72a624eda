//! Chunk splitting for large uploads.
//!
//! [`ChunkSplitter`] is a pure state machine: bytes go in through
//! [`feed`](ChunkSplitter::feed), fixed-size [`Chunk`]s come out, and the
//! driver reports each chunk's upload outcome through
//! [`complete`](ChunkSplitter::complete) before more data is accepted. Only
//! one chunk is ever outstanding, so uploads are strictly sequential.

use bytes::{Bytes, BytesMut};
use cloudinary_core::DEFAULT_CHUNK_SIZE;

/// Where the splitter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Buffering input until a full chunk is available.
    Accumulating,
    /// A chunk was handed out and its outcome is pending.
    Emitting,
    /// The last chunk was uploaded.
    Finished,
    /// A chunk failed; further input is discarded.
    Errored,
}

/// One slice of the source, sent as a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of the first byte in the whole source.
    pub offset: u64,
    pub data: Bytes,
    /// Total source size; only known for the last chunk.
    pub total: Option<u64>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.total.is_some()
    }

    /// `bytes {start}-{end}/{total}`, with `-1` as the unknown total.
    pub fn content_range(&self) -> String {
        let end = (self.offset + self.len() as u64).saturating_sub(1);
        match self.total {
            Some(total) => format!("bytes {}-{end}/{total}", self.offset),
            None => format!("bytes {}-{end}/-1", self.offset),
        }
    }
}

/// What the driver should do after feeding input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAction {
    /// Input was buffered; feed more.
    NeedMore,
    /// Upload this chunk, then call [`ChunkSplitter::complete`].
    Emit(Chunk),
    /// The splitter is no longer active and dropped the input.
    Discarded,
}

/// Slices a byte stream into `chunk_size` pieces.
#[derive(Debug)]
pub struct ChunkSplitter {
    chunk_size: usize,
    buffer: BytesMut,
    /// Input past the emitted chunk, replayed once it completes.
    backlog: BytesMut,
    active: bool,
    sent: u64,
    state: ChunkState,
    last_emitted: bool,
}

impl ChunkSplitter {
    /// A `chunk_size` of 0 falls back to [`DEFAULT_CHUNK_SIZE`].
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            chunk_size,
            buffer: BytesMut::new(),
            backlog: BytesMut::new(),
            active: true,
            sent: 0,
            state: ChunkState::Accumulating,
            last_emitted: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Bytes handed out in chunks so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Accepts a block of input.
    ///
    /// Input that arrives while a chunk is outstanding is queued behind it.
    pub fn feed(&mut self, block: &[u8]) -> ChunkAction {
        if !self.active || self.state == ChunkState::Finished {
            return ChunkAction::Discarded;
        }
        if self.state == ChunkState::Emitting {
            self.backlog.extend_from_slice(block);
            return ChunkAction::NeedMore;
        }
        self.split(block)
    }

    fn split(&mut self, block: &[u8]) -> ChunkAction {
        if self.buffer.len() + block.len() <= self.chunk_size {
            self.buffer.extend_from_slice(block);
            return ChunkAction::NeedMore;
        }

        let grab = self.chunk_size - self.buffer.len();
        self.buffer.extend_from_slice(&block[..grab]);
        self.backlog.extend_from_slice(&block[grab..]);

        let data = self.buffer.split().freeze();
        ChunkAction::Emit(self.emit(data, false))
    }

    fn emit(&mut self, data: Bytes, last: bool) -> Chunk {
        let offset = self.sent;
        self.sent += data.len() as u64;
        self.state = ChunkState::Emitting;
        self.last_emitted = last;
        Chunk {
            offset,
            data,
            total: last.then_some(self.sent),
        }
    }

    /// Reports the outcome of the outstanding chunk.
    ///
    /// On success the queued input is replayed, which may immediately yield
    /// the next chunk. On failure the splitter goes inactive and every later
    /// [`feed`](Self::feed) is a no-op.
    pub fn complete(&mut self, succeeded: bool) -> ChunkAction {
        if self.state != ChunkState::Emitting {
            return ChunkAction::Discarded;
        }
        if !succeeded {
            self.active = false;
            self.state = ChunkState::Errored;
            self.backlog.clear();
            self.buffer.clear();
            return ChunkAction::Discarded;
        }
        if self.last_emitted {
            self.state = ChunkState::Finished;
            return ChunkAction::Discarded;
        }

        self.state = ChunkState::Accumulating;
        let backlog = self.backlog.split();
        if backlog.is_empty() {
            ChunkAction::NeedMore
        } else {
            self.split(&backlog)
        }
    }

    /// Signals end of input and returns the final chunk, if any.
    ///
    /// Returns `None` when nothing was ever fed, after a failure, or while a
    /// chunk is still outstanding.
    pub fn close(&mut self) -> Option<Chunk> {
        if !self.active || self.state != ChunkState::Accumulating {
            return None;
        }
        if self.buffer.is_empty() && self.sent == 0 {
            return None;
        }
        let data = self.buffer.split().freeze();
        Some(self.emit(data, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `total` bytes in `block`-sized pieces, completing every chunk
    /// successfully, and returns the emitted chunks.
    fn run(total: usize, block: usize, chunk_size: usize) -> Vec<Chunk> {
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let mut splitter = ChunkSplitter::new(chunk_size);
        let mut chunks = Vec::new();
        for piece in data.chunks(block) {
            let mut action = splitter.feed(piece);
            while let ChunkAction::Emit(chunk) = action {
                chunks.push(chunk);
                action = splitter.complete(true);
            }
        }
        if let Some(last) = splitter.close() {
            chunks.push(last);
            splitter.complete(true);
        }
        assert_eq!(splitter.state(), ChunkState::Finished);

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        assert_eq!(joined, data);
        chunks
    }

    #[test]
    fn forty_five_megabytes_in_three_chunks() {
        let chunks = run(45_000_000, 1 << 20, 20_000_000);
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![20_000_000, 20_000_000, 5_000_000]);
        assert_eq!(chunks[0].content_range(), "bytes 0-19999999/-1");
        assert_eq!(chunks[1].content_range(), "bytes 20000000-39999999/-1");
        assert_eq!(chunks[2].content_range(), "bytes 40000000-44999999/45000000");
        assert!(chunks[2].is_last());
    }

    #[test]
    fn chunk_count_is_ceiling() {
        let cases = [
            (10, 3, 4),
            (12, 5, 4),
            (1, 1, 4),
            (4, 4, 4),
            (100, 7, 10),
            (9, 100, 2),
        ];
        for (total, block, size) in cases {
            let chunks = run(total, block, size);
            assert_eq!(chunks.len(), total.div_ceil(size), "total={total} size={size}");
            assert_eq!(chunks.iter().map(Chunk::len).sum::<usize>(), total);
            assert!(chunks[..chunks.len() - 1].iter().all(|c| c.total.is_none()));
            assert_eq!(chunks.last().unwrap().total, Some(total as u64));
        }
    }

    #[test]
    fn exactly_full_buffer_waits_for_more_input() {
        let mut splitter = ChunkSplitter::new(4);
        assert_eq!(splitter.feed(b"abcd"), ChunkAction::NeedMore);
        let last = splitter.close().unwrap();
        assert_eq!(last.content_range(), "bytes 0-3/4");
    }

    #[test]
    fn oversized_block_is_replayed_after_completion() {
        let mut splitter = ChunkSplitter::new(4);
        let ChunkAction::Emit(first) = splitter.feed(b"abcdefghij") else {
            panic!("expected a chunk");
        };
        assert_eq!(&first.data[..], b"abcd");
        let ChunkAction::Emit(second) = splitter.complete(true) else {
            panic!("expected a second chunk");
        };
        assert_eq!(&second.data[..], b"efgh");
        assert_eq!(splitter.complete(true), ChunkAction::NeedMore);
        let last = splitter.close().unwrap();
        assert_eq!(&last.data[..], b"ij");
        assert_eq!(last.content_range(), "bytes 8-9/10");
    }

    #[test]
    fn input_during_emission_is_queued() {
        let mut splitter = ChunkSplitter::new(2);
        assert!(matches!(splitter.feed(b"abc"), ChunkAction::Emit(_)));
        assert_eq!(splitter.feed(b"d"), ChunkAction::NeedMore);
        assert_eq!(splitter.complete(true), ChunkAction::NeedMore);
        assert_eq!(&splitter.close().unwrap().data[..], b"cd");
    }

    #[test]
    fn failure_discards_later_input() {
        let mut splitter = ChunkSplitter::new(2);
        assert!(matches!(splitter.feed(b"abc"), ChunkAction::Emit(_)));
        assert_eq!(splitter.complete(false), ChunkAction::Discarded);
        assert_eq!(splitter.state(), ChunkState::Errored);
        assert!(!splitter.is_active());
        assert_eq!(splitter.feed(b"more"), ChunkAction::Discarded);
        assert_eq!(splitter.close(), None);
        assert_eq!(splitter.bytes_sent(), 2);
    }

    #[test]
    fn empty_source_has_no_chunks() {
        let mut splitter = ChunkSplitter::new(4);
        assert_eq!(splitter.close(), None);
    }

    #[test]
    fn zero_chunk_size_uses_default() {
        assert_eq!(ChunkSplitter::new(0).chunk_size(), 20_000_000);
    }
}
