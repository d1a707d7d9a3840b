//! Token bytes, class flag bits and field type tags.

use crate::error::{CodecError, Result};

/// One wire token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Null,
    HandleRef,
    NewClassDesc,
    NewObject,
    NewString,
    NewArray,
    NewClass,
    BlockData,
    EndBlock,
    Reset,
    BlockDataLong,
    Exception,
    NewLongString,
    NewProxyClassDesc,
    NewEnum,
}

impl Token {
    /// Identifier byte on the wire
    pub fn byte(self) -> u8 {
        match self {
            Token::Null => 0x70,
            Token::HandleRef => 0x71,
            Token::NewClassDesc => 0x72,
            Token::NewObject => 0x73,
            Token::NewString => 0x74,
            Token::NewArray => 0x75,
            Token::NewClass => 0x76,
            Token::BlockData => 0x77,
            Token::EndBlock => 0x78,
            Token::Reset => 0x79,
            Token::BlockDataLong => 0x7A,
            Token::Exception => 0x7B,
            Token::NewLongString => 0x7C,
            Token::NewProxyClassDesc => 0x7D,
            Token::NewEnum => 0x7E,
        }
    }

    /// Decode an identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x70 => Some(Token::Null),
            0x71 => Some(Token::HandleRef),
            0x72 => Some(Token::NewClassDesc),
            0x73 => Some(Token::NewObject),
            0x74 => Some(Token::NewString),
            0x75 => Some(Token::NewArray),
            0x76 => Some(Token::NewClass),
            0x77 => Some(Token::BlockData),
            0x78 => Some(Token::EndBlock),
            0x79 => Some(Token::Reset),
            0x7A => Some(Token::BlockDataLong),
            0x7B => Some(Token::Exception),
            0x7C => Some(Token::NewLongString),
            0x7D => Some(Token::NewProxyClassDesc),
            0x7E => Some(Token::NewEnum),
            _ => None,
        }
    }

    /// Decode an identifier byte, failing the stream on unknown values
    pub fn parse(byte: u8) -> Result<Self> {
        Self::from_byte(byte)
            .ok_or_else(|| CodecError::StreamFraming(format!("unknown token byte {byte:#04x}")))
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Token::Null => "NULL",
            Token::HandleRef => "HANDLE_REF",
            Token::NewClassDesc => "NEW_CLASS_DESC",
            Token::NewObject => "NEW_OBJECT",
            Token::NewString => "NEW_STRING",
            Token::NewArray => "NEW_ARRAY",
            Token::NewClass => "NEW_CLASS",
            Token::BlockData => "BLOCK_DATA",
            Token::EndBlock => "END_BLOCK",
            Token::Reset => "RESET",
            Token::BlockDataLong => "BLOCK_DATA_LONG",
            Token::Exception => "EXCEPTION",
            Token::NewLongString => "NEW_LONG_STRING",
            Token::NewProxyClassDesc => "NEW_PROXY_CLASS_DESC",
            Token::NewEnum => "NEW_ENUM",
        }
    }
}

/// Class descriptor flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ClassFlags(u8);

impl ClassFlags {
    /// Level carries an annotation region written by a custom write routine
    pub const WRITE_METHOD: u8 = 0x01;
    pub const SERIALIZABLE: u8 = 0x02;
    pub const EXTERNALIZABLE: u8 = 0x04;
    /// Externalizable content is framed as block data
    pub const BLOCK_DATA: u8 = 0x08;
    pub const ENUM: u8 = 0x10;

    const KNOWN: u8 = 0x1F;

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::KNOWN != 0 {
            return Err(CodecError::StreamFraming(format!(
                "unknown class flag bits {bits:#04x}"
            )));
        }
        let flags = ClassFlags(bits);
        if flags.contains(Self::SERIALIZABLE) && flags.contains(Self::EXTERNALIZABLE) {
            return Err(CodecError::StreamFraming(
                "class is both serializable and externalizable".into(),
            ));
        }
        Ok(flags)
    }

    pub fn new(bits: u8) -> Self {
        ClassFlags(bits & Self::KNOWN)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn with(self, bit: u8) -> Self {
        ClassFlags(self.0 | bit)
    }

    pub fn is_serializable(self) -> bool {
        self.contains(Self::SERIALIZABLE)
    }

    pub fn is_externalizable(self) -> bool {
        self.contains(Self::EXTERNALIZABLE)
    }

    pub fn is_enum(self) -> bool {
        self.contains(Self::ENUM)
    }

    pub fn has_write_method(self) -> bool {
        self.contains(Self::WRITE_METHOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::expect_used)]
    fn test_token_byte_roundtrip() {
        for byte in 0x70..=0x7E {
            let token = Token::from_byte(byte).expect("token in range");
            assert_eq!(token.byte(), byte);
        }
    }

    #[test]
    fn test_unknown_token_is_framing_error() {
        assert!(matches!(
            Token::parse(0x42),
            Err(CodecError::StreamFraming(_))
        ));
        assert!(Token::from_byte(0x7F).is_none());
    }

    #[test]
    fn test_flags_reject_unknown_bits() {
        assert!(ClassFlags::from_bits(0x80).is_err());
        assert!(ClassFlags::from_bits(ClassFlags::SERIALIZABLE | ClassFlags::EXTERNALIZABLE).is_err());
        let flags = ClassFlags::from_bits(ClassFlags::SERIALIZABLE | ClassFlags::WRITE_METHOD);
        assert!(matches!(flags, Ok(f) if f.is_serializable() && f.has_write_method()));
    }
}
