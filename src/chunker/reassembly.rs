//! Out-of-order chunk reassembly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;

use crate::protocol::{Frame, StreamHead};

/// Reassembly state for one flow.
///
/// Complete once the terminal marker has been seen and every index in
/// `0..totalChunks` is present. Chunks may arrive before or after the marker.
#[derive(Debug)]
pub struct Reassembly {
    chunks: BTreeMap<u32, Bytes>,
    terminal: Option<(u32, StreamHead)>,
    buffered: usize,
    started: Instant,
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembly {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            terminal: None,
            buffered: 0,
            started: Instant::now(),
        }
    }

    /// Apply a chunk or terminal frame. Other frames are ignored.
    pub fn accept(&mut self, frame: Frame) {
        match frame {
            Frame::Chunk { index, payload, .. } => self.add_chunk(index, payload),
            Frame::Terminal {
                total_chunks,
                tail,
                head,
                ..
            } => {
                if let Some((index, payload)) = tail {
                    self.add_chunk(index, payload);
                }
                self.set_terminal(total_chunks, head);
            }
            _ => {}
        }
    }

    /// Duplicate indices overwrite.
    pub fn add_chunk(&mut self, index: u32, payload: Bytes) {
        self.buffered += payload.len();
        if let Some(previous) = self.chunks.insert(index, payload) {
            self.buffered -= previous.len();
        }
    }

    pub fn set_terminal(&mut self, total_chunks: u32, head: StreamHead) {
        self.terminal = Some((total_chunks, head));
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_complete(&self) -> bool {
        let Some((total, _)) = &self.terminal else {
            return false;
        };
        let within_range = self.chunks.keys().next_back().map_or(true, |last| last < total);
        self.chunks.len() == *total as usize && within_range
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Concatenate chunks in index order. `None` if not yet complete.
    pub fn take(self) -> Option<(StreamHead, Bytes)> {
        if !self.is_complete() {
            return None;
        }
        let (_, head) = self.terminal?;
        let mut body = BytesMut::with_capacity(self.buffered);
        for chunk in self.chunks.into_values() {
            body.extend_from_slice(&chunk);
        }
        Some((head, body.freeze()))
    }
}

/// A completed flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassembled {
    pub req_id: String,
    pub head: StreamHead,
    pub body: Bytes,
}

/// Bounded map of in-flight reassemblies keyed by request id.
pub struct ReassemblyArena {
    flows: DashMap<String, Reassembly>,
    max_flows: usize,
    max_age: Duration,
}

impl ReassemblyArena {
    pub fn new(max_flows: usize, max_age: Duration) -> Self {
        Self {
            flows: DashMap::new(),
            max_flows: max_flows.max(1),
            max_age,
        }
    }

    /// Feed a chunk or terminal frame; returns the flow once it completes.
    pub fn accept(&self, frame: Frame) -> Option<Reassembled> {
        let req_id = match &frame {
            Frame::Chunk { req_id, .. } | Frame::Terminal { req_id, .. } => req_id.clone(),
            _ => return None,
        };

        if !self.flows.contains_key(&req_id) && self.flows.len() >= self.max_flows {
            self.evict_oldest();
        }

        let complete = {
            let mut flow = self.flows.entry(req_id.clone()).or_default();
            flow.accept(frame);
            flow.is_complete()
        };
        if !complete {
            return None;
        }

        let (req_id, flow) = self.flows.remove(&req_id)?;
        let (head, body) = flow.take()?;
        Some(Reassembled { req_id, head, body })
    }

    /// Drop flows older than the max age. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.flows.len();
        self.flows.retain(|req_id, flow| {
            let keep = flow.age() < self.max_age;
            if !keep {
                tracing::warn!(
                    req_id = %req_id,
                    buffered = flow.buffered_bytes(),
                    "Dropping incomplete reassembly"
                );
            }
            keep
        });
        before.saturating_sub(self.flows.len())
    }

    pub fn remove(&self, req_id: &str) {
        self.flows.remove(req_id);
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .flows
            .iter()
            .max_by_key(|entry| entry.value().age())
            .map(|entry| entry.key().clone());
        if let Some(req_id) = oldest {
            tracing::warn!(req_id = %req_id, "Reassembly arena full, evicting oldest flow");
            self.flows.remove(&req_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Headers, RequestHead};

    fn head() -> StreamHead {
        StreamHead::Request(RequestHead {
            source_ip: "127.0.0.1".into(),
            headers: Headers::new(),
            original_url: "/".into(),
            method: "POST".into(),
        })
    }

    fn chunk(req_id: &str, index: u32, data: &'static [u8]) -> Frame {
        Frame::Chunk {
            req_id: req_id.into(),
            index,
            payload: Bytes::from_static(data),
        }
    }

    fn terminal(req_id: &str, total: u32) -> Frame {
        Frame::Terminal {
            req_id: req_id.into(),
            total_chunks: total,
            tail: None,
            head: head(),
        }
    }

    #[test]
    fn needs_terminal_and_all_indices() {
        let mut flow = Reassembly::new();
        flow.add_chunk(1, Bytes::from_static(b"st"));
        flow.add_chunk(0, Bytes::from_static(b"te"));
        assert!(!flow.is_complete());
        flow.set_terminal(3, head());
        assert!(!flow.is_complete());
        flow.add_chunk(2, Bytes::new());
        assert!(flow.is_complete());
        assert_eq!(flow.take().unwrap().1, Bytes::from_static(b"test"));
    }

    #[test]
    fn out_of_range_index_never_completes() {
        let mut flow = Reassembly::new();
        flow.add_chunk(0, Bytes::from_static(b"a"));
        flow.add_chunk(5, Bytes::from_static(b"b"));
        flow.set_terminal(2, head());
        assert!(!flow.is_complete());
    }

    #[test]
    fn duplicate_index_last_write_wins() {
        let mut flow = Reassembly::new();
        flow.add_chunk(0, Bytes::from_static(b"old"));
        flow.add_chunk(0, Bytes::from_static(b"new!"));
        assert_eq!(flow.buffered_bytes(), 4);
        flow.set_terminal(1, head());
        assert_eq!(flow.take().unwrap().1, Bytes::from_static(b"new!"));
    }

    #[test]
    fn arena_completes_and_evicts_flow() {
        let arena = ReassemblyArena::new(8, Duration::from_secs(60));
        assert!(arena.accept(terminal("a", 2)).is_none());
        assert!(arena.accept(chunk("b", 0, b"other")).is_none());
        assert!(arena.accept(chunk("a", 1, b"lo")).is_none());
        let done = arena.accept(chunk("a", 0, b"hel")).unwrap();
        assert_eq!(done.req_id, "a");
        assert_eq!(done.body, Bytes::from_static(b"hello"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn arena_is_bounded() {
        let arena = ReassemblyArena::new(2, Duration::from_secs(60));
        arena.accept(chunk("a", 0, b"1"));
        arena.accept(chunk("b", 0, b"2"));
        arena.accept(chunk("c", 0, b"3"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn sweep_drops_stale_flows() {
        let arena = ReassemblyArena::new(8, Duration::ZERO);
        arena.accept(chunk("a", 0, b"1"));
        arena.accept(chunk("b", 0, b"2"));
        assert_eq!(arena.sweep(), 2);
        assert!(arena.is_empty());
    }
}
