use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

/// Little-endian cursor over a byte slice, used by the header and body
/// decoders. Every accessor checks bounds and fails with a protocol
/// violation instead of panicking on truncated input.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn take(&mut self, count: usize) -> SMBResult<&'a [u8]> {
        if self.buf.len() - self.pos < count {
            return Err(SMBError::protocol_violation(format!(
                "message truncated: wanted {} bytes, {} left",
                count,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> SMBResult<()> {
        self.take(count).map(|_| ())
    }

    pub fn read_u8(&mut self) -> SMBResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> SMBResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> SMBResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> SMBResult<u64> {
        let bytes = self.take(8)?;
        let mut fixed = [0u8; 8];
        fixed.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(fixed))
    }

    pub fn read_array<const N: usize>(&mut self) -> SMBResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut fixed = [0u8; N];
        fixed.copy_from_slice(bytes);
        Ok(fixed)
    }

    /// u16 length prefix followed by that many raw bytes.
    pub fn read_u16_buffer(&mut self) -> SMBResult<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// u32 length prefix followed by that many raw bytes.
    pub fn read_u32_buffer(&mut self) -> SMBResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// u16 length prefix followed by UTF-8 text.
    pub fn read_string(&mut self) -> SMBResult<String> {
        let bytes = self.read_u16_buffer()?;
        String::from_utf8(bytes)
            .map_err(|_| SMBError::protocol_violation("string field is not valid UTF-8"))
    }
}

pub(crate) fn put_u16_buffer(out: &mut Vec<u8>, buffer: &[u8]) {
    out.extend_from_slice(&(buffer.len() as u16).to_le_bytes());
    out.extend_from_slice(buffer);
}

pub(crate) fn put_u32_buffer(out: &mut Vec<u8>, buffer: &[u8]) {
    out.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
    out.extend_from_slice(buffer);
}

pub(crate) fn put_string(out: &mut Vec<u8>, value: &str) {
    put_u16_buffer(out, value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_in_order() {
        let mut bytes = vec![0x01, 0x02, 0x00];
        bytes.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
        put_string(&mut bytes, "share");

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0002);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_string().unwrap(), "share");
        assert!(reader.remaining().is_empty());
    }

    #[test]
    fn truncated_read_is_a_protocol_violation() {
        let mut reader = ByteReader::new(&[0x01]);
        assert!(matches!(
            reader.read_u32(),
            Err(SMBError::ProtocolViolation(_))
        ));
    }
}
