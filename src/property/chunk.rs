//! Chunked Property Exchange transfers
//!
//! Outbound payloads are split into [`PropertyChunk`]s; inbound chunks are
//! collected per `(source MUID, request id)` until the final chunk arrives.
//! The final chunk always releases its buffer, complete or not. The number of
//! open transfers is bounded; the oldest is evicted when a new one would
//! exceed the capacity.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::PropertyError;
use crate::ci::{Muid, PropertyChunk};
use crate::midi::convert;

/// Default number of concurrently reassembled transfers
pub const DEFAULT_MAX_PENDING_TRANSFERS: usize = 32;

/// Split a header and body into wire chunks.
///
/// The header travels in the first chunk only. An empty body still produces
/// one chunk.
pub fn split_into_chunks(
    request_id: u8,
    header: Vec<u8>,
    body: &[u8],
    max_chunk_size: usize,
) -> Result<Vec<PropertyChunk>, PropertyError> {
    let size = max_chunk_size.clamp(1, usize::from(convert::MAX_14BIT));
    let pieces: Vec<&[u8]> = if body.is_empty() {
        vec![body]
    } else {
        body.chunks(size).collect()
    };
    let total = pieces.len();
    if total > usize::from(convert::MAX_14BIT) {
        return Err(PropertyError::PayloadTooLarge { chunks: total });
    }

    let mut header = Some(header);
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, data)| PropertyChunk {
            request_id,
            header: header.take().unwrap_or_default(),
            num_chunks: total as u16,
            chunk_index: (i + 1) as u16,
            data: data.to_vec(),
        })
        .collect())
}

/// Header and body of a fully received transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTransfer {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// Result of feeding one chunk to the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected
    Pending,
    Complete(AssembledTransfer),
}

/// Chunks received so far for one transaction
#[derive(Debug)]
struct PartialTransfer {
    expected: u16,
    received: Vec<Option<Vec<u8>>>,
    header: Vec<u8>,
}

impl PartialTransfer {
    fn new(expected: u16) -> Self {
        Self {
            expected,
            received: vec![None; usize::from(expected)],
            header: Vec::new(),
        }
    }

    fn missing(&self) -> usize {
        self.received.iter().filter(|c| c.is_none()).count()
    }
}

/// Reassembly buffers keyed by `(source MUID, request id)`
#[derive(Debug)]
pub struct ChunkAssembler {
    capacity: usize,
    transfers: IndexMap<(Muid, u8), PartialTransfer>,
}

impl ChunkAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            transfers: IndexMap::new(),
        }
    }

    /// Feed one received chunk
    pub fn push(
        &mut self,
        source: Muid,
        chunk: &PropertyChunk,
    ) -> Result<ChunkOutcome, PropertyError> {
        let total = chunk.num_chunks;
        let index = chunk.chunk_index;
        if total == 0 || index == 0 || index > total {
            return Err(PropertyError::ChunkOutOfRange { index, total });
        }
        let key = (source, chunk.request_id);

        if total == 1 {
            if self.transfers.shift_remove(&key).is_some() {
                warn!(
                    "Request {} from {} restarted before completing",
                    chunk.request_id, source
                );
            }
            return Ok(ChunkOutcome::Complete(AssembledTransfer {
                request_id: chunk.request_id,
                header: chunk.header.clone(),
                body: chunk.data.clone(),
            }));
        }

        if !self.transfers.contains_key(&key) {
            self.make_room();
            self.transfers.insert(key, PartialTransfer::new(total));
        }
        let transfer = self
            .transfers
            .get_mut(&key)
            .ok_or(PropertyError::ChunkOutOfRange { index, total })?;

        if transfer.expected != total {
            let expected = transfer.expected;
            self.transfers.shift_remove(&key);
            return Err(PropertyError::InconsistentChunkCount {
                expected,
                actual: total,
            });
        }

        let slot = &mut transfer.received[usize::from(index - 1)];
        if slot.is_some() {
            return Err(PropertyError::DuplicateChunk { index });
        }
        *slot = Some(chunk.data.clone());
        if index == 1 {
            transfer.header = chunk.header.clone();
        }
        debug!(
            "Chunk {}/{} of request {} from {}",
            index, total, chunk.request_id, source
        );

        if index != total {
            return Ok(ChunkOutcome::Pending);
        }

        // Final chunk: the buffer is released whatever the outcome
        let Some(transfer) = self.transfers.shift_remove(&key) else {
            return Ok(ChunkOutcome::Pending);
        };
        let missing = transfer.missing();
        if missing > 0 {
            warn!(
                "Request {} from {} ended with {} missing chunk(s)",
                chunk.request_id, source, missing
            );
            return Err(PropertyError::MissingChunks { missing });
        }
        let body = transfer.received.into_iter().flatten().flatten().collect();
        Ok(ChunkOutcome::Complete(AssembledTransfer {
            request_id: chunk.request_id,
            header: transfer.header,
            body,
        }))
    }

    /// True while chunks of `(source, request_id)` are being collected
    pub fn is_open(&self, source: Muid, request_id: u8) -> bool {
        self.transfers.contains_key(&(source, request_id))
    }

    /// Drop one open transfer; true if it existed
    pub fn discard(&mut self, source: Muid, request_id: u8) -> bool {
        self.transfers.shift_remove(&(source, request_id)).is_some()
    }

    /// Drop every open transfer from `source`
    pub fn discard_source(&mut self, source: Muid) {
        self.transfers.retain(|(muid, _), _| *muid != source);
    }

    /// Number of open transfers
    pub fn pending(&self) -> usize {
        self.transfers.len()
    }

    fn make_room(&mut self) {
        while self.transfers.len() >= self.capacity {
            if let Some(((muid, request_id), _)) = self.transfers.shift_remove_index(0) {
                warn!(
                    "Reassembly buffer full, dropping request {} from {}",
                    request_id, muid
                );
            }
        }
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_TRANSFERS)
    }
}
