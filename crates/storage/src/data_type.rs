//! Serialization descriptors
//!
//! The transaction core is opaque to its payloads; the layer above supplies
//! a [`DataType`] describing how to put a value on disk and get it back.
//! `read_meta` exists for row types whose leading columns can be
//! materialized without decoding the full body; scalar types fall back to a
//! full read.

use crate::buffer::{DataBuffer, DataReader};
use crate::error::Result;

/// Describes the persistent form of a value type.
pub trait DataType<V>: Send + Sync {
    fn write(&self, buf: &mut DataBuffer, value: &V) -> Result<()>;

    fn read(&self, reader: &mut DataReader<'_>) -> Result<V>;

    /// Materialize only the first `column_count` columns of a row value.
    /// Types without column structure read the whole value.
    fn read_meta(&self, reader: &mut DataReader<'_>, column_count: usize) -> Result<V> {
        let _ = column_count;
        self.read(reader)
    }
}

/// UTF-8 string payloads, length-prefixed.
pub struct StringType;

impl DataType<String> for StringType {
    fn write(&self, buf: &mut DataBuffer, value: &String) -> Result<()> {
        buf.put_bytes(value.as_bytes());
        Ok(())
    }

    fn read(&self, reader: &mut DataReader<'_>) -> Result<String> {
        let bytes = reader.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| crate::Error::Encoding(format!("invalid utf-8: {}", e)))
    }
}

/// Raw byte payloads, length-prefixed.
pub struct BytesType;

impl DataType<Vec<u8>> for BytesType {
    fn write(&self, buf: &mut DataBuffer, value: &Vec<u8>) -> Result<()> {
        buf.put_bytes(value);
        Ok(())
    }

    fn read(&self, reader: &mut DataReader<'_>) -> Result<Vec<u8>> {
        Ok(reader.get_bytes()?.to_vec())
    }
}
