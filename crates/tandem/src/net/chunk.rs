//! Chunk framing for links whose MTU is smaller than a single message.
//!
//! Every chunk starts with a 3-byte header:
//!
//! | byte | meaning                                          |
//! |------|--------------------------------------------------|
//! | 0    | message id (wraps at 256)                        |
//! | 1    | chunk index                                      |
//! | 2    | total chunks (low 7 bits), last-chunk flag (bit 7) |
//!
//! Reassembly is lossy: a message with a missing chunk is dropped once it
//! ages past [`REASSEMBLY_TIMEOUT`]. Nothing is retransmitted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const CHUNK_HEADER_SIZE: usize = 3;
pub const MAX_CHUNKS: usize = 127;
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

const LAST_CHUNK_FLAG: u8 = 0x80;
const TOTAL_MASK: u8 = 0x7F;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("max chunk size {0} leaves no room for payload")]
    InvalidChunkSize(usize),
    #[error("payload of {size} bytes needs {chunks} chunks, limit is {MAX_CHUNKS}")]
    PayloadTooLarge { size: usize, chunks: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_id: u8,
    pub chunk_index: u8,
    pub total_chunks: u8,
    pub is_last: bool,
}

impl ChunkHeader {
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut packed = self.total_chunks & TOTAL_MASK;
        if self.is_last {
            packed |= LAST_CHUNK_FLAG;
        }
        [self.message_id, self.chunk_index, packed]
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return None;
        }

        Some(Self {
            message_id: data[0],
            chunk_index: data[1],
            total_chunks: data[2] & TOTAL_MASK,
            is_last: data[2] & LAST_CHUNK_FLAG != 0,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.total_chunks > 0 && self.chunk_index < self.total_chunks
    }
}

/// Splits `data` into framed chunks of at most `max_chunk_size` bytes each.
///
/// An empty payload still produces one header-only chunk so the receiver sees
/// a complete (empty) message.
pub fn chunk_message(
    data: &[u8],
    message_id: u8,
    max_chunk_size: usize,
) -> Result<Vec<Vec<u8>>, ChunkError> {
    if max_chunk_size <= CHUNK_HEADER_SIZE {
        return Err(ChunkError::InvalidChunkSize(max_chunk_size));
    }

    let payload_size = max_chunk_size - CHUNK_HEADER_SIZE;
    let total = data.len().div_ceil(payload_size).max(1);
    if total > MAX_CHUNKS {
        return Err(ChunkError::PayloadTooLarge {
            size: data.len(),
            chunks: total,
        });
    }

    let mut chunks = Vec::with_capacity(total);
    for index in 0..total {
        let start = index * payload_size;
        let end = (start + payload_size).min(data.len());

        let header = ChunkHeader {
            message_id,
            chunk_index: index as u8,
            total_chunks: total as u8,
            is_last: index == total - 1,
        };

        let mut chunk = Vec::with_capacity(CHUNK_HEADER_SIZE + end - start);
        chunk.extend_from_slice(&header.encode());
        chunk.extend_from_slice(&data[start..end]);
        chunks.push(chunk);
    }

    Ok(chunks)
}

#[derive(Debug)]
struct PartialMessage {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    started_at: Instant,
}

impl PartialMessage {
    fn new(total: u8, started_at: Instant) -> Self {
        Self {
            chunks: vec![None; total as usize],
            received: 0,
            started_at,
        }
    }

    fn insert(&mut self, index: u8, payload: &[u8]) {
        let slot = &mut self.chunks[index as usize];
        if slot.is_none() {
            self.received += 1;
        }
        *slot = Some(payload.to_vec());
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn assemble(self) -> Vec<u8> {
        self.chunks.into_iter().flatten().flatten().collect()
    }
}

/// Per-sender reassembly state. Create one for each remote peer.
#[derive(Debug)]
pub struct ChunkReassembler {
    pending: HashMap<u8, PartialMessage>,
    timeout: Duration,
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::with_timeout(REASSEMBLY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn add_chunk(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        self.add_chunk_at(data, Instant::now())
    }

    /// Feeds one framed chunk received at `now`. Returns the full payload once
    /// every chunk of its message has arrived.
    pub fn add_chunk_at(&mut self, data: &[u8], now: Instant) -> Option<Vec<u8>> {
        self.evict_expired(now);

        let Some(header) = ChunkHeader::parse(data) else {
            log::debug!("Dropping truncated chunk ({} bytes)", data.len());
            return None;
        };

        if !header.is_valid() {
            log::debug!(
                "Dropping malformed chunk {}/{} for message {}",
                header.chunk_index,
                header.total_chunks,
                header.message_id
            );
            return None;
        }

        let partial = self
            .pending
            .entry(header.message_id)
            .or_insert_with(|| PartialMessage::new(header.total_chunks, now));

        // A recycled message id with a different shape replaces the stale entry.
        if partial.chunks.len() != header.total_chunks as usize {
            *partial = PartialMessage::new(header.total_chunks, now);
        }

        partial.insert(header.chunk_index, &data[CHUNK_HEADER_SIZE..]);

        if partial.is_complete() {
            self.pending.remove(&header.message_id).map(PartialMessage::assemble)
        } else {
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn evict_expired(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.pending.retain(|id, partial| {
            let keep = now.saturating_duration_since(partial.started_at) <= timeout;
            if !keep {
                log::debug!(
                    "Abandoning message {} after {}/{} chunks",
                    id,
                    partial.received,
                    partial.chunks.len()
                );
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn reassemble(chunks: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut reassembler = ChunkReassembler::new();
        let mut result = None;
        for chunk in chunks {
            result = reassembler.add_chunk(chunk);
        }
        result
    }

    #[test]
    fn test_header_packs_last_flag_in_high_bit() {
        let header = ChunkHeader {
            message_id: 200,
            chunk_index: 4,
            total_chunks: 5,
            is_last: true,
        };

        let bytes = header.encode();
        assert_eq!(bytes, [200, 4, 0x85]);
        assert_eq!(ChunkHeader::parse(&bytes), Some(header));
    }

    #[test]
    fn test_round_trip_empty_single_and_many() {
        for len in [0usize, 1, 17, 20, 21, 500, 2000] {
            let data = payload(len);
            let chunks = chunk_message(&data, 9, 20).unwrap();

            assert_eq!(chunks.len(), len.div_ceil(17).max(1));
            assert!(chunks.iter().all(|c| c.len() <= 20));
            assert!(ChunkHeader::parse(chunks.last().unwrap()).unwrap().is_last);
            assert_eq!(reassemble(&chunks), Some(data), "length {len}");
        }
    }

    #[test]
    fn test_out_of_order_chunks_reassemble_in_index_order() {
        let data = payload(100);
        let mut chunks = chunk_message(&data, 1, 23).unwrap();
        chunks.reverse();

        assert_eq!(reassemble(&chunks), Some(data));
    }

    #[test]
    fn test_rejects_unusable_sizes() {
        assert_eq!(
            chunk_message(&[1, 2, 3], 0, CHUNK_HEADER_SIZE),
            Err(ChunkError::InvalidChunkSize(CHUNK_HEADER_SIZE))
        );
        assert!(matches!(
            chunk_message(&payload(128), 0, CHUNK_HEADER_SIZE + 1),
            Err(ChunkError::PayloadTooLarge { chunks: 128, .. })
        ));
    }

    #[test]
    fn test_interleaved_messages_stay_separate() {
        let a = payload(60);
        let b: Vec<u8> = payload(45).into_iter().rev().collect();
        let chunks_a = chunk_message(&a, 1, 16).unwrap();
        let chunks_b = chunk_message(&b, 2, 16).unwrap();

        let mut reassembler = ChunkReassembler::new();
        let mut done = Vec::new();
        for i in 0..chunks_a.len().max(chunks_b.len()) {
            for chunks in [&chunks_a, &chunks_b] {
                if let Some(chunk) = chunks.get(i) {
                    if let Some(message) = reassembler.add_chunk(chunk) {
                        done.push(message);
                    }
                }
            }
        }

        assert_eq!(done.len(), 2);
        assert!(done.contains(&a));
        assert!(done.contains(&b));
    }

    #[test]
    fn test_stale_partial_is_evicted_without_corrupting_next_message() {
        let start = Instant::now();
        let mut reassembler = ChunkReassembler::new();

        let lost = chunk_message(&payload(50), 7, 20).unwrap();
        assert!(reassembler.add_chunk_at(&lost[0], start).is_none());
        assert_eq!(reassembler.pending_count(), 1);

        let later = start + REASSEMBLY_TIMEOUT + Duration::from_millis(1);
        let fresh = payload(30);
        let chunks = chunk_message(&fresh, 7, 20).unwrap();

        let mut result = None;
        for chunk in &chunks {
            result = reassembler.add_chunk_at(chunk, later);
        }

        assert_eq!(result, Some(fresh));
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_truncated_and_malformed_chunks_are_ignored() {
        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.add_chunk(&[1, 2]).is_none());
        assert!(reassembler.add_chunk(&[1, 5, 0x83]).is_none());
        assert!(reassembler.add_chunk(&[1, 0, 0x00]).is_none());
        assert_eq!(reassembler.pending_count(), 0);
    }
}
