//! Body chunking subsystem.
//!
//! # Data Flow
//! ```text
//! Sender:
//!     body stream units
//!     → splitter.rs (coalesce small units, cut at frame size F)
//!     → Chunk{index} frames ... → Terminal{totalChunks, tail, head}
//!
//! Receiver:
//!     Chunk / Terminal frames in any order
//!     → reassembly.rs (BTreeMap by index, terminal head)
//!     → complete when terminal seen and indices 0..total all present
//!     → (head, body)
//! ```
//!
//! # Design Decisions
//! - The remainder is always folded into the terminal marker, so a body
//!   smaller than one frame travels as a single message
//! - Reassembly state lives in a bounded arena swept by age; a flow that
//!   never completes cannot pin memory forever

pub mod reassembly;
pub mod splitter;

pub use reassembly::{Reassembled, Reassembly, ReassemblyArena};
pub use splitter::{chunk_body, ChunkSplitter};

/// Default maximum frame payload: 24 KiB, under common 32 KiB frame caps.
pub const DEFAULT_FRAME_SIZE: usize = 24 * 1024;
