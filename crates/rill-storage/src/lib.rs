//! rill-storage — the persistent storage engine of the rill broker.
//!
//! An append-only, offset-addressed record log partitioned across rolling
//! segment files, each paired with a sparse index for fast random lookup:
//!
//! - **[`Partition`]** — a directory of segments; routes appends to the
//!   active segment (rotating on record count or age) and reads to the
//!   segment owning the target offset.
//! - **[`Segment`]** — one `.log`/`.index` pair; append-only records with
//!   three durability modes plus read-only opens, crash-consistent recovery,
//!   and concurrent append/read.
//! - **[`SparseIndex`]** — one 8-byte entry per 500 records; buffered
//!   appends, memory-mapped floor-search lookups.
//! - **[`AsyncWriter`]** — background-thread batched writer behind the async
//!   durability mode.
//!
//! Upper layers hand the engine opaque byte payloads and ask for records
//! back by logical offset; payload schema, replication, and the wire
//! protocol all live above this crate.

pub mod config;
pub mod dump;
pub mod error;
pub mod index;
pub mod mmap;
pub mod partition;
pub mod record;
pub mod segment;
pub mod writer;

pub use config::{Durability, PartitionConfig};
pub use dump::dump_file;
pub use error::{Error, Result};
pub use index::{IndexEntry, SparseIndex, ENTRY_WIDTH};
pub use mmap::MmapReader;
pub use partition::{segment_file_name, Partition, SegmentMeta};
pub use record::{Record, RecordHeader, HEADER_SIZE};
pub use segment::{Segment, INDEX_STRIDE};
pub use writer::AsyncWriter;
