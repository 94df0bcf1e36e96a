//! Streaming body splitter.

use bytes::{Bytes, BytesMut};

use crate::protocol::{Frame, StreamHead};

/// Splits a byte stream into chunk frames of at most `frame_size` bytes.
///
/// Units of at least `frame_size` are sliced without copying. Small units are
/// queued and coalesced; a queue of at least half a frame is flushed as is
/// when the next unit would push it past `frame_size`.
#[derive(Debug)]
pub struct ChunkSplitter {
    req_id: String,
    frame_size: usize,
    pending: BytesMut,
    next_index: u32,
    total_bytes: usize,
}

impl ChunkSplitter {
    pub fn new(req_id: impl Into<String>, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            req_id: req_id.into(),
            frame_size,
            pending: BytesMut::with_capacity(frame_size),
            next_index: 0,
            total_bytes: 0,
        }
    }

    /// Chunks emitted so far.
    pub fn emitted(&self) -> u32 {
        self.next_index
    }

    /// Bytes pushed so far, emitted or pending.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Feed one unit of the stream, returning any chunk frames now ready.
    pub fn push(&mut self, mut unit: Bytes) -> Vec<Frame> {
        let size = self.frame_size;
        self.total_bytes += unit.len();
        let mut out = Vec::new();

        if !self.pending.is_empty()
            && self.pending.len() >= size / 2
            && self.pending.len() + unit.len() > size
        {
            let queued = self.pending.split().freeze();
            out.push(self.chunk(queued));
        }

        if self.pending.is_empty() {
            while unit.len() >= size {
                let slice = unit.split_to(size);
                out.push(self.chunk(slice));
            }
            self.pending.extend_from_slice(&unit);
        } else {
            self.pending.extend_from_slice(&unit);
            while self.pending.len() >= size {
                let slice = self.pending.split_to(size).freeze();
                out.push(self.chunk(slice));
            }
        }
        out
    }

    /// Close the stream. Whatever is still queued rides in the terminal marker.
    pub fn finish(mut self, head: StreamHead) -> Frame {
        let tail = if self.pending.is_empty() {
            None
        } else {
            let index = self.next_index;
            self.next_index += 1;
            Some((index, self.pending.split().freeze()))
        };
        Frame::Terminal {
            req_id: self.req_id,
            total_chunks: self.next_index,
            tail,
            head,
        }
    }

    fn chunk(&mut self, payload: Bytes) -> Frame {
        let index = self.next_index;
        self.next_index += 1;
        Frame::Chunk {
            req_id: self.req_id.clone(),
            index,
            payload,
        }
    }
}

/// Chunk a whole buffered body: data frames followed by the terminal marker.
pub fn chunk_body(req_id: &str, body: Bytes, frame_size: usize, head: StreamHead) -> Vec<Frame> {
    let mut splitter = ChunkSplitter::new(req_id, frame_size);
    let mut frames = splitter.push(body);
    frames.push(splitter.finish(head));
    frames
}
