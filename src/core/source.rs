//! Byte source with one byte of lookahead.
//!
//! The source owns the underlying reader until [`Source::close`] is called,
//! after which every read fails with [`CodecError::StreamClosed`].

use crate::error::{CodecError, Result};
use std::io::{self, Read};

#[derive(Debug)]
pub struct Source<R> {
    inner: Option<R>,
    peeked: Option<u8>,
    position: u64,
}

impl<R: Read> Source<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Some(inner),
            peeked: None,
            position: 0,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Drop the underlying reader
    pub fn close(&mut self) {
        self.inner = None;
        self.peeked = None;
    }

    fn inner(&mut self) -> Result<&mut R> {
        self.inner.as_mut().ok_or(CodecError::StreamClosed)
    }

    /// Next byte without consuming it
    pub fn peek_u8(&mut self) -> Result<u8> {
        if let Some(b) = self.peeked {
            return Ok(b);
        }
        let mut one = [0u8; 1];
        self.inner()?.read_exact(&mut one)?;
        self.peeked = Some(one[0]);
        Ok(one[0])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = match self.peeked.take() {
            Some(b) => b,
            None => {
                let mut one = [0u8; 1];
                self.inner()?.read_exact(&mut one)?;
                one[0]
            }
        };
        self.position += 1;
        Ok(b)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut start = 0;
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            start = 1;
        }
        self.inner()?.read_exact(&mut buf[start..])?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Read `len` bytes into a fresh buffer; the caller has already claimed the budget
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Consume and drop `len` bytes without buffering them
    pub fn skip(&mut self, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut remaining = len;
        if self.peeked.take().is_some() {
            remaining -= 1;
        }
        let copied = io::copy(&mut self.inner()?.take(remaining), &mut io::sink())?;
        if copied != remaining {
            return Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside skipped data",
            )));
        }
        self.position += len;
        Ok(())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_peek_does_not_consume() {
        let mut src = Source::new(&[0x70u8, 0x01, 0x02][..]);
        assert_eq!(src.peek_u8().unwrap(), 0x70);
        assert_eq!(src.position(), 0);
        assert_eq!(src.read_u8().unwrap(), 0x70);
        assert_eq!(src.read_u16().unwrap(), 0x0102);
        assert_eq!(src.position(), 3);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_read_exact_after_peek() {
        let mut src = Source::new(&[1u8, 2, 3, 4, 5][..]);
        src.peek_u8().unwrap();
        let mut buf = [0u8; 4];
        src.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        src.skip(1).unwrap();
        assert!(src.read_u8().is_err());
    }

    #[test]
    fn test_closed_source_refuses_reads() {
        let mut src = Source::new(&[1u8, 2][..]);
        src.close();
        assert!(src.is_closed());
        assert!(matches!(src.read_u8(), Err(CodecError::StreamClosed)));
    }

    #[test]
    fn test_skip_past_end_fails() {
        let mut src = Source::new(&[1u8, 2][..]);
        assert!(src.skip(10).is_err());
    }
}
