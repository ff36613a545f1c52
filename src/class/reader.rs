use crate::error::CompileError;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// Cursor over the raw bytes of a class file.
///
/// All multi-byte quantities in the class file format are big-endian. Running off the end of the
/// stream is a decode error, never a panic: class files come straight from user input.
pub struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset from the start of the stream, for error messages.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn truncated(&self, what: &str) -> CompileError {
        CompileError::decode(format!(
            "unexpected end of class file reading {} at offset {}",
            what, self.pos
        ))
    }

    pub fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], CompileError> {
        if self.remaining() < len {
            return Err(self.truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, CompileError> {
        let mut rest = &self.data[self.pos..];
        let value = rest.read_u8().map_err(|_| self.truncated(what))?;
        self.pos += 1;
        Ok(value)
    }

    pub fn u16(&mut self, what: &str) -> Result<u16, CompileError> {
        let mut rest = &self.data[self.pos..];
        let value = rest
            .read_u16::<BigEndian>()
            .map_err(|_| self.truncated(what))?;
        self.pos += 2;
        Ok(value)
    }

    pub fn u32(&mut self, what: &str) -> Result<u32, CompileError> {
        let mut rest = &self.data[self.pos..];
        let value = rest
            .read_u32::<BigEndian>()
            .map_err(|_| self.truncated(what))?;
        self.pos += 4;
        Ok(value)
    }

    pub fn u64(&mut self, what: &str) -> Result<u64, CompileError> {
        let mut rest = &self.data[self.pos..];
        let value = rest
            .read_u64::<BigEndian>()
            .map_err(|_| self.truncated(what))?;
        self.pos += 8;
        Ok(value)
    }

    /// Reads a length-prefixed modified-UTF-8 string. The JVM's modified UTF-8 differs from real
    /// UTF-8 only for embedded NULs and supplementary characters, neither of which occur in the
    /// identifiers and literals we care about, so plain UTF-8 decoding with a lossy fallback is
    /// used here.
    pub fn utf8(&mut self, what: &str) -> Result<String, CompileError> {
        let len = self.u16(what)? as usize;
        let bytes = self.bytes(len, what)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Reads the rest of a stream into memory, for callers that hold an [`std::io::Read`] rather
    /// than a slice. The stream is fully drained; the class file format has no trailer.
    pub fn slurp(mut input: impl Read) -> Result<Vec<u8>, CompileError> {
        let mut data = Vec::new();
        input
            .read_to_end(&mut data)
            .map_err(|e| CompileError::decode(format!("unable to read class stream: {}", e)))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_fields() -> Result<(), CompileError> {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x02, 0x01];
        let mut r = ClassReader::new(&data);
        assert_eq!(r.u32("magic")?, 0xCAFE_BABE);
        assert_eq!(r.u16("version")?, 2);
        assert_eq!(r.u8("tag")?, 1);
        assert_eq!(r.remaining(), 0);
        Ok(())
    }

    #[test]
    fn truncation_is_a_decode_error() {
        let data = [0x00];
        let mut r = ClassReader::new(&data);
        let err = r.u16("count").unwrap_err();
        assert!(err.message.contains("unexpected end"));
    }

    #[test]
    fn utf8_reads_prefixed_strings() -> Result<(), CompileError> {
        let data = [0x00, 0x03, b'a', b'd', b'd'];
        let mut r = ClassReader::new(&data);
        assert_eq!(r.utf8("name")?, "add");
        assert_eq!(r.position(), 5);
        Ok(())
    }
}
