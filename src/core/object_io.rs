//! Stream access handed to custom read and write routines.
//!
//! Primitives travel as block data. A value read or written through these
//! traits re-enters the codec, so routines may nest up to the configured
//! depth limit.

use crate::core::graph::{Graph, Value};
use crate::error::Result;

/// Input side of a custom read routine or externalizable read routine.
pub trait ObjectInput {
    /// Whether the current level carries a custom data region
    fn has_custom_data(&self) -> bool;

    fn read_bool(&mut self) -> Result<bool>;
    fn read_i8(&mut self) -> Result<i8>;
    fn read_u8(&mut self) -> Result<u8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_char(&mut self) -> Result<u16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_f32(&mut self) -> Result<f32>;
    fn read_f64(&mut self) -> Result<f64>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;
    /// `u16` length followed by modified UTF-8
    fn read_utf(&mut self) -> Result<String>;

    /// Read a nested value from the stream
    fn read_value(&mut self) -> Result<Value>;

    /// Read a nested value that must not be referenced again
    fn read_unshared(&mut self) -> Result<Value>;

    /// Arena that nested values index into
    fn graph(&self) -> &Graph;
}

/// Output side of a custom write routine or externalizable write routine.
pub trait ObjectOutput {
    fn write_bool(&mut self, v: bool) -> Result<()>;
    fn write_i8(&mut self, v: i8) -> Result<()>;
    fn write_u8(&mut self, v: u8) -> Result<()>;
    fn write_i16(&mut self, v: i16) -> Result<()>;
    fn write_char(&mut self, v: u16) -> Result<()>;
    fn write_i32(&mut self, v: i32) -> Result<()>;
    fn write_i64(&mut self, v: i64) -> Result<()>;
    fn write_f32(&mut self, v: f32) -> Result<()>;
    fn write_f64(&mut self, v: f64) -> Result<()>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    fn write_utf(&mut self, s: &str) -> Result<()>;

    fn write_value(&mut self, value: &Value) -> Result<()>;
    fn write_unshared(&mut self, value: &Value) -> Result<()>;

    fn graph(&self) -> &Graph;
}
