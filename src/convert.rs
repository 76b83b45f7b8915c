//! Text conversion between client strings and host code pages.
//!
//! Character LOB content crosses the wire in the column's host CCSID. The
//! converter set is closed: CCSID 1208 (UTF-8) passes through, CCSID 37
//! (EBCDIC US/Canada) is table-driven. Anything else fails fast at
//! construction rather than mid-transfer.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Substitution byte written for characters outside the EBCDIC repertoire.
const EBCDIC_SUB: u8 = 0x3F;

/// CCSID 37 to Latin-1, one Unicode code point per EBCDIC byte.
const EBCDIC_037_TO_LATIN1: [u8; 256] = [
    0x00, 0x01, 0x02, 0x03, 0x9C, 0x09, 0x86, 0x7F, 0x97, 0x8D, 0x8E, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    0x10, 0x11, 0x12, 0x13, 0x9D, 0x85, 0x08, 0x87, 0x18, 0x19, 0x92, 0x8F, 0x1C, 0x1D, 0x1E, 0x1F,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x0A, 0x17, 0x1B, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x05, 0x06, 0x07,
    0x90, 0x91, 0x16, 0x93, 0x94, 0x95, 0x96, 0x04, 0x98, 0x99, 0x9A, 0x9B, 0x14, 0x15, 0x9E, 0x1A,
    0x20, 0xA0, 0xE2, 0xE4, 0xE0, 0xE1, 0xE3, 0xE5, 0xE7, 0xF1, 0xA2, 0x2E, 0x3C, 0x28, 0x2B, 0x7C,
    0x26, 0xE9, 0xEA, 0xEB, 0xE8, 0xED, 0xEE, 0xEF, 0xEC, 0xDF, 0x21, 0x24, 0x2A, 0x29, 0x3B, 0xAC,
    0x2D, 0x2F, 0xC2, 0xC4, 0xC0, 0xC1, 0xC3, 0xC5, 0xC7, 0xD1, 0xA6, 0x2C, 0x25, 0x5F, 0x3E, 0x3F,
    0xF8, 0xC9, 0xCA, 0xCB, 0xC8, 0xCD, 0xCE, 0xCF, 0xCC, 0x60, 0x3A, 0x23, 0x40, 0x27, 0x3D, 0x22,
    0xD8, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0xAB, 0xBB, 0xF0, 0xFD, 0xFE, 0xB1,
    0xB0, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x71, 0x72, 0xAA, 0xBA, 0xE6, 0xB8, 0xC6, 0xA4,
    0xB5, 0x7E, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0xA1, 0xBF, 0xD0, 0xDD, 0xDE, 0xAE,
    0x5E, 0xA3, 0xA5, 0xB7, 0xA9, 0xA7, 0xB6, 0xBC, 0xBD, 0xBE, 0x5B, 0x5D, 0xAF, 0xA8, 0xB4, 0xD7,
    0x7B, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0xAD, 0xF4, 0xF6, 0xF2, 0xF3, 0xF5,
    0x7D, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F, 0x50, 0x51, 0x52, 0xB9, 0xFB, 0xFC, 0xF9, 0xFA, 0xFF,
    0x5C, 0xF7, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0xB2, 0xD4, 0xD6, 0xD2, 0xD3, 0xD5,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0xB3, 0xDB, 0xDC, 0xD9, 0xDA, 0x9F,
];

const fn invert(table: [u8; 256]) -> [u8; 256] {
    let mut out = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        out[table[i] as usize] = i as u8;
        i += 1;
    }
    out
}

/// Latin-1 to CCSID 37. CCSID 37 is a permutation of Latin-1, so the forward
/// table inverts without gaps.
const LATIN1_TO_EBCDIC_037: [u8; 256] = invert(EBCDIC_037_TO_LATIN1);

/// Bidirectional text attributes attached to a conversion.
///
/// The locator subsystem forwards these to the code-page layer without
/// interpreting them; reordering and shaping are the consumer's concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BidiOptions {
    /// Host bidi string type (CDRA string types 4 through 11), if declared.
    pub string_type: Option<u8>,
    /// Whether numerals are shaped on output.
    pub numeric_shaping: bool,
}

/// Code-page converter for one character LOB column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// CCSID 1208: UTF-8, byte-for-byte.
    Utf8,
    /// CCSID 37: EBCDIC US/Canada, single byte per character.
    Ebcdic037,
}

impl Converter {
    /// Look up the converter for a described column's CCSID.
    pub fn for_ccsid(ccsid: u16) -> Result<Self> {
        match ccsid {
            1208 => Ok(Self::Utf8),
            37 => Ok(Self::Ebcdic037),
            _ => Err(Error::UnsupportedCcsid { ccsid }),
        }
    }

    /// The CCSID this converter implements.
    pub fn ccsid(&self) -> u16 {
        match self {
            Self::Utf8 => 1208,
            Self::Ebcdic037 => 37,
        }
    }

    /// Decode host bytes into a client string.
    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(data.to_vec())
                .map_err(|_| Error::mismatch("host data is not valid UTF-8")),
            Self::Ebcdic037 => Ok(data
                .iter()
                .map(|&b| EBCDIC_037_TO_LATIN1[b as usize] as char)
                .collect()),
        }
    }

    /// Encode a client string into host bytes.
    ///
    /// Characters outside the target repertoire become the EBCDIC
    /// substitution byte; bidi flags pass through untouched.
    pub fn encode(&self, text: &str, _bidi: &BidiOptions) -> Result<Bytes> {
        match self {
            Self::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Ebcdic037 => {
                let mut out = BytesMut::with_capacity(text.len());
                for ch in text.chars() {
                    let cp = ch as u32;
                    let b = if cp <= 0xFF {
                        LATIN1_TO_EBCDIC_037[cp as usize]
                    } else {
                        EBCDIC_SUB
                    };
                    out.put_u8(b);
                }
                Ok(out.freeze())
            }
        }
    }
}

/// Reassembles UTF-8 text from byte chunks that may split multi-byte
/// sequences at chunk boundaries.
///
/// Each [`push`](Self::push) returns the longest decodable prefix and carries
/// the dangling tail into the next chunk. A sequence that is invalid (rather
/// than merely incomplete) fails immediately.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    carry: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning the text completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<String> {
        self.carry.extend_from_slice(chunk);
        match std::str::from_utf8(&self.carry) {
            Ok(_) => String::from_utf8(std::mem::take(&mut self.carry))
                .map_err(|_| Error::mismatch("character stream is not valid UTF-8")),
            Err(e) if e.error_len().is_some() => {
                Err(Error::mismatch("character stream is not valid UTF-8"))
            }
            Err(e) => {
                // Incomplete trailing sequence: keep it for the next chunk.
                let tail = self.carry.split_off(e.valid_up_to());
                let head = std::mem::replace(&mut self.carry, tail);
                String::from_utf8(head)
                    .map_err(|_| Error::mismatch("character stream is not valid UTF-8"))
            }
        }
    }

    /// Verify no partial sequence is left dangling at end of data.
    pub fn finish(&self) -> Result<()> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            Err(Error::mismatch(
                "character stream ends inside a multi-byte sequence",
            ))
        }
    }
}

/// Convert bytes to an uppercase hex string.
pub fn bytes_to_hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Convert a hex string (upper or lower case) to bytes.
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if !hex.is_ascii() || !hex.len().is_multiple_of(2) {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_ccsid() {
        assert_eq!(Converter::for_ccsid(1208).unwrap(), Converter::Utf8);
        assert_eq!(Converter::for_ccsid(37).unwrap(), Converter::Ebcdic037);
        assert!(matches!(
            Converter::for_ccsid(500),
            Err(Error::UnsupportedCcsid { ccsid: 500 })
        ));
    }

    #[test]
    fn test_ebcdic_round_trip() {
        let conv = Converter::Ebcdic037;
        let text = "Hello, World! 123 #@$";
        let host = conv.encode(text, &BidiOptions::default()).unwrap();
        assert_eq!(host.len(), text.len());
        assert_eq!(conv.decode(&host).unwrap(), text);
    }

    #[test]
    fn test_ebcdic_known_bytes() {
        let conv = Converter::Ebcdic037;
        let host = conv.encode("AB 01", &BidiOptions::default()).unwrap();
        assert_eq!(&host[..], &[0xC1, 0xC2, 0x40, 0xF0, 0xF1]);
        assert_eq!(conv.decode(&[0xC8, 0x85, 0x93, 0x93, 0x96]).unwrap(), "Hello");
    }

    #[test]
    fn test_ebcdic_substitution() {
        let conv = Converter::Ebcdic037;
        let host = conv.encode("a€b", &BidiOptions::default()).unwrap();
        assert_eq!(&host[..], &[0x81, 0x3F, 0x82]);
    }

    #[test]
    fn test_ebcdic_latin1_supplement() {
        let conv = Converter::Ebcdic037;
        let host = conv.encode("é", &BidiOptions::default()).unwrap();
        assert_eq!(&host[..], &[0x51]);
        assert_eq!(conv.decode(&host).unwrap(), "é");
    }

    #[test]
    fn test_utf8_pass_through() {
        let conv = Converter::Utf8;
        let host = conv.encode("héllo", &BidiOptions::default()).unwrap();
        assert_eq!(&host[..], "héllo".as_bytes());
        assert_eq!(conv.decode(&host).unwrap(), "héllo");
    }

    #[test]
    fn test_utf8_decode_rejects_invalid() {
        assert!(Converter::Utf8.decode(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_assembler_split_sequence() {
        // 'é' is 0xC3 0xA9; split it across two chunks.
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&[b'a', 0xC3]).unwrap(), "a");
        assert_eq!(asm.push(&[0xA9, b'b']).unwrap(), "éb");
        assert!(asm.finish().is_ok());
    }

    #[test]
    fn test_assembler_dangling_tail() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&[b'x', 0xC3]).unwrap(), "x");
        assert!(asm.finish().is_err());
    }

    #[test]
    fn test_assembler_invalid_sequence() {
        let mut asm = Utf8Assembler::new();
        assert!(asm.push(&[0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = [0x01u8, 0xAB, 0xFF, 0x00];
        let hex = bytes_to_hex_upper(&bytes);
        assert_eq!(hex, "01ABFF00");
        assert_eq!(hex_to_bytes(&hex).unwrap(), bytes.to_vec());
        assert_eq!(hex_to_bytes("01abff00").unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_hex_rejects_malformed() {
        assert!(hex_to_bytes("ABC").is_none());
        assert!(hex_to_bytes("ZZ").is_none());
        assert!(hex_to_bytes("é0").is_none());
    }
}
