//! Storage seam for the Vellum transaction core
//!
//! The transaction core treats storage as an ordered key to versioned-cell
//! map guarded by page-level latches. This crate defines that contract plus
//! the byte codec the core uses to persist cells:
//!
//! - [`StorageMap`] - the ordered map trait, with [`MemoryMap`] as the
//!   in-memory implementation backing tests and embedded use
//! - [`MemoryStorage`] - a named registry of maps, what `open_map` binds to
//! - [`DataBuffer`] / [`DataReader`] - append-only write buffer and cursor
//!   reader with variable-length `u64`s
//! - [`DataType`] - serialization descriptor supplied by the layer above

pub mod buffer;
pub mod data_type;
pub mod error;
pub mod map;

pub use buffer::{DataBuffer, DataReader};
pub use data_type::{BytesType, DataType, StringType};
pub use error::{Error, Result};
pub use map::{MemoryMap, MemoryStorage, StorageMap};
