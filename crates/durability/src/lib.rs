//! Durability adapters for txnkv
//!
//! The transactional core only knows the `WriteAheadLog` trait. This crate
//! provides the implementations an embedding application usually wants:
//! - NoopWal: accepts everything, persists nothing (pure in-memory store)
//! - MemoryWal: keeps records in memory, with failure injection for tests
//! - FileWal: append-only file of length + CRC32 framed records
//! - CommitRecord: MessagePack payload describing one committed batch
//!
//! ## Frame Format
//!
//! ```text
//! [length: u32][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: payload size in bytes (little-endian)
//! - **crc32**: CRC32 of the payload (little-endian)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod wal;

pub use record::CommitRecord;
pub use wal::{decode_frame, encode_frame, FileWal, MemoryWal, NoopWal};
