//! Executable image and its on-disk container.
//!
//! Container layout, all integers little-endian:
//!
//! ```text
//! 0..3   magic 'NOVA'
//! 4..5   version (u16)
//! 6..9   entrypoint offset (u32)
//! 10..13 literal-string count N (u32)
//! N x    { u32 len; len bytes }
//! 4      code length L (u32)
//! L      code bytes
//! ```
//!
//! Deserialization rejects mismatched magic or version, any truncation and
//! any declared length that exceeds the remaining input.

use std::error::Error;
use std::fmt;

const MAGIC: [u8; 4] = *b"NOVA";
const VERSION: u16 = 1;

/// A produced program: flat instruction bytes, interned string literals and
/// the entrypoint offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    entrypoint: u32,
    lit_strings: Vec<Vec<u8>>,
    code: Vec<u8>,
}

impl Executable {
    pub fn new(entrypoint: u32, lit_strings: Vec<Vec<u8>>, code: Vec<u8>) -> Executable {
        Executable {
            entrypoint,
            lit_strings,
            code,
        }
    }

    pub fn entrypoint(&self) -> u32 {
        self.entrypoint
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lit_string_count(&self) -> usize {
        self.lit_strings.len()
    }

    /// Literal bytes at `index`. Out-of-range indices yield an empty slice;
    /// the executor treats that as invalid assembly.
    pub fn lit_string(&self, index: u32) -> &[u8] {
        self.lit_strings
            .get(index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_valid_lit_string(&self, index: u32) -> bool {
        (index as usize) < self.lit_strings.len()
    }

    // Unaligned little-endian immediate reads used by the executor. Each
    // returns `None` when the read would run past the end of the buffer.

    pub fn read_u8(&self, ip: &mut u32) -> Option<u8> {
        let val = *self.code.get(*ip as usize)?;
        *ip += 1;
        Some(val)
    }

    pub fn read_u16(&self, ip: &mut u32) -> Option<u16> {
        Some(u16::from_le_bytes(self.read_array::<2>(ip)?))
    }

    pub fn read_i32(&self, ip: &mut u32) -> Option<i32> {
        Some(i32::from_le_bytes(self.read_array::<4>(ip)?))
    }

    pub fn read_u32(&self, ip: &mut u32) -> Option<u32> {
        Some(u32::from_le_bytes(self.read_array::<4>(ip)?))
    }

    pub fn read_i64(&self, ip: &mut u32) -> Option<i64> {
        Some(i64::from_le_bytes(self.read_array::<8>(ip)?))
    }

    pub fn read_f32(&self, ip: &mut u32) -> Option<f32> {
        Some(f32::from_le_bytes(self.read_array::<4>(ip)?))
    }

    fn read_array<const N: usize>(&self, ip: &mut u32) -> Option<[u8; N]> {
        let start = *ip as usize;
        let bytes = self.code.get(start..start + N)?;
        *ip += N as u32;
        Some(bytes.try_into().unwrap())
    }
}

/// Errors produced while decoding a serialized executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
    EntrypointOutOfRange { entrypoint: u32, code_len: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadMagic => write!(f, "not a nova executable (bad magic)"),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            DecodeError::Truncated => write!(f, "truncated executable"),
            DecodeError::EntrypointOutOfRange {
                entrypoint,
                code_len,
            } => write!(f, "entrypoint {entrypoint} out of range (code is {code_len} bytes)"),
        }
    }
}

impl Error for DecodeError {}

/// Encode to the container format.
pub fn serialize(exe: &Executable) -> Vec<u8> {
    let mut out = Vec::with_capacity(18 + exe.code.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&exe.entrypoint.to_le_bytes());
    out.extend_from_slice(&(exe.lit_strings.len() as u32).to_le_bytes());
    for lit in &exe.lit_strings {
        out.extend_from_slice(&(lit.len() as u32).to_le_bytes());
        out.extend_from_slice(lit);
    }
    out.extend_from_slice(&(exe.code.len() as u32).to_le_bytes());
    out.extend_from_slice(&exe.code);
    out
}

/// Decode from the container format.
pub fn deserialize(bytes: &[u8]) -> Result<Executable, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = u16::from_le_bytes(reader.take(2)?.try_into().unwrap());
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let entrypoint = reader.read_u32()?;
    let lit_count = reader.read_u32()?;

    let mut lit_strings = Vec::new();
    for _ in 0..lit_count {
        let len = reader.read_u32()? as usize;
        lit_strings.push(reader.take(len)?.to_vec());
    }

    let code_len = reader.read_u32()?;
    let code = reader.take(code_len as usize)?.to_vec();
    if reader.pos != bytes.len() {
        // Trailing bytes mean the declared lengths are inconsistent.
        return Err(DecodeError::Truncated);
    }
    if entrypoint >= code_len {
        return Err(DecodeError::EntrypointOutOfRange {
            entrypoint,
            code_len,
        });
    }

    Ok(Executable::new(entrypoint, lit_strings, code))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Executable {
        Executable::new(
            2,
            vec![b"hello".to_vec(), b"".to_vec(), b"world".to_vec()],
            vec![0x12, 0x13, 0xB8, 0x30],
        )
    }

    #[test]
    fn serialization_round_trips() {
        let exe = sample();
        assert_eq!(deserialize(&serialize(&exe)), Ok(exe));
    }

    #[test]
    fn header_is_bit_exact() {
        let bytes = serialize(&sample());
        assert_eq!(&bytes[0..4], b"NOVA");
        assert_eq!(&bytes[4..6], &1u16.to_le_bytes());
        assert_eq!(&bytes[6..10], &2u32.to_le_bytes());
        assert_eq!(&bytes[10..14], &3u32.to_le_bytes());
        // First literal record: len 5 + "hello".
        assert_eq!(&bytes[14..18], &5u32.to_le_bytes());
        assert_eq!(&bytes[18..23], b"hello");
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = serialize(&sample());
        bytes[0] = b'X';
        assert_eq!(deserialize(&bytes), Err(DecodeError::BadMagic));

        let mut bytes = serialize(&sample());
        bytes[4] = 0xFF;
        assert_eq!(deserialize(&bytes), Err(DecodeError::UnsupportedVersion(0xFF)));
    }

    #[test]
    fn rejects_truncation_at_every_length() {
        let bytes = serialize(&sample());
        for cut in 0..bytes.len() {
            assert!(
                deserialize(&bytes[..cut]).is_err(),
                "accepted a {cut}-byte prefix"
            );
        }
    }

    #[test]
    fn rejects_oversized_declared_lengths() {
        let mut bytes = serialize(&sample());
        // Inflate the first literal length far past the input.
        bytes[14..18].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(deserialize(&bytes), Err(DecodeError::Truncated));
    }

    #[test]
    fn rejects_entrypoint_outside_code() {
        let exe = Executable::new(4, vec![], vec![0xB8; 4]);
        let bytes = serialize(&exe);
        assert_eq!(
            deserialize(&bytes),
            Err(DecodeError::EntrypointOutOfRange {
                entrypoint: 4,
                code_len: 4
            })
        );
    }

    #[test]
    fn immediate_reads_are_little_endian_and_bounded() {
        let mut code = Vec::new();
        code.extend_from_slice(&0x1122_3344u32.to_le_bytes());
        code.extend_from_slice(&(-5i64).to_le_bytes());
        code.extend_from_slice(&1.5f32.to_le_bytes());
        let exe = Executable::new(0, vec![], code);

        let mut ip = 0u32;
        assert_eq!(exe.read_u32(&mut ip), Some(0x1122_3344));
        assert_eq!(exe.read_i64(&mut ip), Some(-5));
        assert_eq!(exe.read_f32(&mut ip), Some(1.5));
        assert_eq!(exe.read_u8(&mut ip), None); // Past the end.
    }
}
