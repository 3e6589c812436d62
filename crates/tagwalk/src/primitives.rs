//! Primitive codecs: byte order for integers and floats, charsets for strings

use crate::errors::{Error, Result};

/// Endianness for byte order handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Little-endian byte order
    #[default]
    Little,
    /// Big-endian byte order
    Big,
}

impl Endian {
    /// Read an unsigned integer of `bytes.len()` bytes (1 to 8)
    #[inline]
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        let mut value = 0u64;
        match self {
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | b as u64;
                }
            }
            Endian::Big => {
                for &b in bytes {
                    value = (value << 8) | b as u64;
                }
            }
        }
        value
    }

    /// Read a two's-complement signed integer of `bytes.len()` bytes
    #[inline]
    pub fn read_sint(self, bytes: &[u8]) -> i64 {
        sign_extend(self.read_uint(bytes), bytes.len() as u32 * 8)
    }

    /// Read an f32 value
    #[inline]
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        f32::from_bits(self.read_uint(&bytes[..4]) as u32)
    }

    /// Read an f64 value
    #[inline]
    pub fn read_f64(self, bytes: &[u8]) -> f64 {
        f64::from_bits(self.read_uint(&bytes[..8]))
    }

    /// Write the low `width` bytes of `value`
    #[inline]
    pub fn write_uint(self, value: u64, width: usize) -> Vec<u8> {
        let le = value.to_le_bytes();
        let mut out = le[..width].to_vec();
        if self == Endian::Big {
            out.reverse();
        }
        out
    }

    /// Write an f32 value
    #[inline]
    pub fn write_f32(self, value: f32) -> Vec<u8> {
        self.write_uint(value.to_bits() as u64, 4)
    }

    /// Write an f64 value
    #[inline]
    pub fn write_f64(self, value: f64) -> Vec<u8> {
        self.write_uint(value.to_bits(), 8)
    }
}

/// Sign-extend the low `bits` bits of `raw`
#[inline]
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Mask covering the low `bits` bits
#[inline]
pub fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Check that `value` fits in `bits` bits, signed or unsigned
pub fn fits(value: i128, bits: u32, signed: bool) -> bool {
    if bits == 0 {
        return value == 0;
    }
    if signed {
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        value >= min && value <= max
    } else {
        value >= 0 && value <= low_mask(bits) as i128
    }
}

/// Character sets a string field can be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 7-bit ASCII
    Ascii,
    /// ISO-8859-1; every byte is a valid character
    Latin1,
    /// UTF-8
    Utf8,
    /// UTF-16, little-endian code units
    Utf16Le,
    /// UTF-16, big-endian code units
    Utf16Be,
}

impl Encoding {
    /// Width of one code unit in bytes
    pub fn unit_width(self) -> usize {
        match self {
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            _ => 1,
        }
    }

    /// Decode `bytes`. Invalid input is an error unless `lossy` is set.
    /// `offset` is only used for error reporting.
    pub fn decode(self, bytes: &[u8], lossy: bool, offset: usize) -> Result<String> {
        match self {
            Encoding::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    if !lossy {
                        return Err(Error::decode(
                            offset + pos,
                            format!("byte 0x{:02X} is not ASCII", bytes[pos]),
                        ));
                    }
                }
                Ok(bytes
                    .iter()
                    .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                    .collect())
            }
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Utf8 => {
                if lossy {
                    Ok(String::from_utf8_lossy(bytes).into_owned())
                } else {
                    core::str::from_utf8(bytes)
                        .map(str::to_string)
                        .map_err(|e| Error::decode(offset + e.valid_up_to(), "invalid UTF-8"))
                }
            }
            Encoding::Utf16Le | Encoding::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(Error::decode(offset, "odd byte count for UTF-16 text"));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        if self == Encoding::Utf16Le {
                            u16::from_le_bytes([pair[0], pair[1]])
                        } else {
                            u16::from_be_bytes([pair[0], pair[1]])
                        }
                    })
                    .collect();
                if lossy {
                    Ok(String::from_utf16_lossy(&units))
                } else {
                    String::from_utf16(&units).map_err(|_| Error::decode(offset, "invalid UTF-16"))
                }
            }
        }
    }

    /// Encode `text`, failing on characters the charset cannot represent
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(Error::Encode(format!("character {:?} is not ASCII", c)));
                }
                Ok(text.as_bytes().to_vec())
            }
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(c as u32)
                        .map_err(|_| Error::Encode(format!("character {:?} is not Latin-1", c)))
                })
                .collect(),
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
        }
    }
}
