//! # Core Codec Components
//!
//! Token framing, the value arena, type metadata and the reader and writer
//! state machines.
//!
//! ## Components
//! - **Token / Source**: wire tokens, class flags and the big-endian byte source
//! - **Graph**: arena of decoded values; cycles are plain indices
//! - **Field / Descriptor**: field layouts, class descriptors and version reconciliation
//! - **Types**: the `SerialType` trait, `RecordType` builder and `TypeRegistry`
//! - **Handles / Budget**: back-reference tables and the allocation budget
//! - **Security / Construct**: the capability gate and per-strategy object construction
//! - **Reader / Writer**: the token-level decoder and encoder
//!
//! ## Wire Format
//! ```text
//! [Magic 0xACED] [Version 5] { RESET | value }*
//! ```
//!
//! ## Security
//! - Every length prefix is claimed from the allocation budget before allocating
//! - Handle, depth, frame and descriptor-chain counts are bounded
//! - Objects are constructed only after the capability gate allows their type

pub mod budget;
pub mod construct;
pub mod descriptor;
pub mod field;
pub mod field_source;
pub mod graph;
pub mod handles;
pub mod object_io;
pub mod reader;
pub mod security;
pub mod source;
pub mod surrogate;
pub mod token;
pub mod types;
pub mod writer;
