//! Bit-sequence value and the typed segment codec.
//!
//! A [`Bitstring`] owns an exact number of bits packed MSB-first into bytes.
//! Construction appends typed segments; pattern matching reads them back
//! with [`Bitstring::read_typed`]. Values are immutable once built - the
//! builder is the only writer.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ast::{Endianness, SegmentType, Signedness};
use crate::value::Value;

/// An immutable sequence of bits.
///
/// Invariant: bits past `bit_len` in the final byte are zero, which lets
/// equality and serialization be structural.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bitstring {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl Bitstring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from whole bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let bit_len = bytes.len() * 8;
        Self { bytes, bit_len }
    }

    /// Length in bits.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// True when the length is a whole number of bytes.
    #[must_use]
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_len % 8 == 0
    }

    /// The packed bytes; the final byte may be partially used.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whole-byte read at a byte index. Out of range reads yield `None`,
    /// which the evaluator surfaces as `Null` so wildcard patterns can fall
    /// through.
    #[must_use]
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        if (index + 1) * 8 <= self.bit_len {
            Some(self.bytes[index])
        } else {
            None
        }
    }

    fn bit(&self, index: usize) -> bool {
        (self.bytes[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Appends every bit of `other`.
    pub fn push_bits(&mut self, other: &Self) {
        for i in 0..other.bit_len {
            self.push_bit(other.bit(i));
        }
    }

    /// Copies `len` bits starting at `start` into a fresh bitstring.
    ///
    /// # Panics
    /// Panics when the requested range exceeds the bit length; callers
    /// bounds-check first.
    #[must_use]
    pub fn slice_bits(&self, start: usize, len: usize) -> Self {
        assert!(start + len <= self.bit_len, "bit slice out of range");
        let mut out = Self::new();
        for i in start..start + len {
            out.push_bit(self.bit(i));
        }
        out
    }

    /// Reads one typed segment at the given bit offset.
    ///
    /// Returns the decoded value and the new offset. Failures (not enough
    /// bits, unsupported layout) come back as messages for the caller to
    /// wrap in a positioned `BITSTRING_ERROR`.
    pub fn read_typed(
        &self,
        offset: usize,
        size_bits: usize,
        segment_type: SegmentType,
        endianness: Endianness,
        signedness: Signedness,
    ) -> Result<(Value, usize), String> {
        if offset + size_bits > self.bit_len {
            return Err(format!(
                "segment needs {size_bits} bits at offset {offset} but only {} remain",
                self.bit_len - offset
            ));
        }
        let endianness = endianness.resolve();
        let value = match segment_type {
            SegmentType::Integer => decode_integer(self, offset, size_bits, endianness, signedness)?,
            SegmentType::Float => decode_float(self, offset, size_bits, endianness)?,
            SegmentType::Binary | SegmentType::Bytes => {
                if size_bits % 8 != 0 {
                    return Err(format!("binary segment size {size_bits} is not a whole number of bytes"));
                }
                Value::Bytes(self.slice_bits(offset, size_bits).bytes.clone())
            }
            SegmentType::Bits | SegmentType::Bitstring => Value::Bitstring(self.slice_bits(offset, size_bits)),
            SegmentType::Utf8 | SegmentType::Utf16 | SegmentType::Utf32 => {
                decode_utf(self, offset, size_bits, segment_type, endianness)?
            }
        };
        Ok((value, offset + size_bits))
    }

    /// Coerces a value into bit-sequence form for pattern matching.
    ///
    /// Accepts bitstrings, byte arrays, strings (as UTF-8), and a single
    /// byte-sized integer.
    #[must_use]
    pub fn coerce(value: &Value) -> Option<Self> {
        match value {
            Value::Bitstring(bits) => Some(bits.clone()),
            Value::Bytes(bytes) => Some(Self::from_bytes(bytes.clone())),
            Value::Str(s) | Value::PreFormatted(s) => Some(Self::from_bytes(s.as_bytes().to_vec())),
            Value::Int(i) if (0..=255).contains(i) => Some(Self::from_bytes(vec![*i as u8])),
            _ => None,
        }
    }
}

/// Incremental builder used by bitstring construction expressions.
#[derive(Debug, Default)]
pub struct BitstringBuilder {
    bits: Bitstring,
}

impl BitstringBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one typed segment and appends it.
    ///
    /// `size_bits` of `None` means "whatever the value occupies", which is
    /// only meaningful for binary/bits/utf segments.
    pub fn push_segment(
        &mut self,
        value: &Value,
        size_bits: Option<usize>,
        segment_type: SegmentType,
        endianness: Endianness,
    ) -> Result<(), String> {
        let endianness = endianness.resolve();
        match segment_type {
            SegmentType::Integer => {
                let size_bits = size_bits.unwrap_or(8);
                encode_integer(&mut self.bits, value, size_bits, endianness)
            }
            SegmentType::Float => {
                let size_bits = size_bits.unwrap_or(64);
                encode_float(&mut self.bits, value, size_bits, endianness)
            }
            SegmentType::Binary | SegmentType::Bytes => encode_binary(&mut self.bits, value, size_bits),
            SegmentType::Bits | SegmentType::Bitstring => encode_bits(&mut self.bits, value, size_bits),
            SegmentType::Utf8 | SegmentType::Utf16 | SegmentType::Utf32 => {
                encode_utf(&mut self.bits, value, segment_type, endianness)
            }
        }
    }

    #[must_use]
    pub fn finish(self) -> Bitstring {
        self.bits
    }
}

/// Reduces a value to the two's-complement low `size_bits` bits, returned as
/// right-aligned big-endian bytes (`size_bits.div_ceil(8)` of them).
fn to_field_bytes(value: &BigInt, size_bits: usize) -> Vec<u8> {
    let modulus = BigInt::one() << size_bits;
    let mut v = value % &modulus;
    if v.sign() == Sign::Minus {
        v += &modulus;
    }
    let (_, magnitude) = v.to_bytes_be();
    let nbytes = size_bits.div_ceil(8);
    let mut out = vec![0u8; nbytes];
    let copy = magnitude.len().min(nbytes);
    out[nbytes - copy..].copy_from_slice(&magnitude[magnitude.len() - copy..]);
    out
}

fn integer_operand(value: &Value) -> Result<BigInt, String> {
    match value {
        Value::Int(i) => Ok(BigInt::from(*i)),
        Value::BigInt(b) => Ok(b.clone()),
        Value::Bool(b) => Ok(BigInt::from(i64::from(*b))),
        other => Err(format!("integer segment requires an integer value, got {}", other.type_name())),
    }
}

fn encode_integer(out: &mut Bitstring, value: &Value, size_bits: usize, endianness: Endianness) -> Result<(), String> {
    if size_bits == 0 {
        return Err("integer segment size must be positive".to_owned());
    }
    let operand = integer_operand(value)?;
    let field = to_field_bytes(&operand, size_bits);
    match endianness {
        Endianness::Big | Endianness::Native => {
            // The field occupies the trailing size_bits of the padded bytes.
            let skip = field.len() * 8 - size_bits;
            let padded = Bitstring::from_bytes(field);
            out.push_bits(&padded.slice_bits(skip, size_bits));
        }
        Endianness::Little => {
            if size_bits % 8 != 0 {
                return Err(format!(
                    "little-endian integer segment size {size_bits} is not a whole number of bytes"
                ));
            }
            let mut swapped = field;
            swapped.reverse();
            out.push_bits(&Bitstring::from_bytes(swapped));
        }
    }
    Ok(())
}

fn decode_integer(
    bits: &Bitstring,
    offset: usize,
    size_bits: usize,
    endianness: Endianness,
    signedness: Signedness,
) -> Result<Value, String> {
    let raw = bits.slice_bits(offset, size_bits);
    let be_bytes: SmallVec<[u8; 16]> = match endianness {
        Endianness::Big | Endianness::Native => raw.bytes.iter().copied().collect(),
        Endianness::Little => {
            if size_bits % 8 != 0 {
                return Err(format!(
                    "little-endian integer segment size {size_bits} is not a whole number of bytes"
                ));
            }
            raw.bytes.iter().rev().copied().collect()
        }
    };
    // For big-endian partial-byte fields the slice is left-aligned; shift the
    // accumulated value down to drop the unused trailing bits.
    let mut magnitude = BigUint::from_bytes_be(&be_bytes);
    let slack = be_bytes.len() * 8 - size_bits;
    if slack > 0 && matches!(endianness, Endianness::Big | Endianness::Native) {
        magnitude >>= slack;
    }
    let mut result = BigInt::from(magnitude);
    if signedness == Signedness::Signed && size_bits > 0 {
        let sign_bit = BigInt::one() << (size_bits - 1);
        if result >= sign_bit {
            result -= BigInt::one() << size_bits;
        }
    }
    Ok(result.to_i64().map_or(Value::BigInt(result), Value::Int))
}

fn encode_float(out: &mut Bitstring, value: &Value, size_bits: usize, endianness: Endianness) -> Result<(), String> {
    let f = match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        Value::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        other => return Err(format!("float segment requires a number, got {}", other.type_name())),
    };
    let bytes: SmallVec<[u8; 8]> = match (size_bits, endianness) {
        (32, Endianness::Little) => (f as f32).to_le_bytes().into_iter().collect(),
        (32, _) => (f as f32).to_be_bytes().into_iter().collect(),
        (64, Endianness::Little) => f.to_le_bytes().into_iter().collect(),
        (64, _) => f.to_be_bytes().into_iter().collect(),
        _ => return Err(format!("float segment size must be 32 or 64 bits, got {size_bits}")),
    };
    out.push_bits(&Bitstring::from_bytes(bytes.to_vec()));
    Ok(())
}

fn decode_float(bits: &Bitstring, offset: usize, size_bits: usize, endianness: Endianness) -> Result<Value, String> {
    let raw = bits.slice_bits(offset, size_bits);
    let f = match size_bits {
        32 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&raw.bytes);
            f64::from(match endianness {
                Endianness::Little => f32::from_le_bytes(buf),
                _ => f32::from_be_bytes(buf),
            })
        }
        64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw.bytes);
            match endianness {
                Endianness::Little => f64::from_le_bytes(buf),
                _ => f64::from_be_bytes(buf),
            }
        }
        _ => return Err(format!("float segment size must be 32 or 64 bits, got {size_bits}")),
    };
    Ok(Value::Float(f))
}

fn encode_binary(out: &mut Bitstring, value: &Value, size_bits: Option<usize>) -> Result<(), String> {
    let bytes: Vec<u8> = match value {
        Value::Bytes(b) => b.clone(),
        Value::Str(s) | Value::PreFormatted(s) => s.as_bytes().to_vec(),
        Value::Bitstring(bits) if bits.is_byte_aligned() => bits.bytes.clone(),
        Value::Bitstring(_) => return Err("binary segment requires a byte-aligned bitstring".to_owned()),
        other => return Err(format!("binary segment requires bytes or a string, got {}", other.type_name())),
    };
    let take_bits = match size_bits {
        Some(n) => {
            if n % 8 != 0 {
                return Err(format!("binary segment size {n} is not a whole number of bytes"));
            }
            if n > bytes.len() * 8 {
                return Err(format!(
                    "binary segment size {} bytes exceeds value length {}",
                    n / 8,
                    bytes.len()
                ));
            }
            n
        }
        None => bytes.len() * 8,
    };
    out.push_bits(&Bitstring::from_bytes(bytes).slice_bits(0, take_bits));
    Ok(())
}

fn encode_bits(out: &mut Bitstring, value: &Value, size_bits: Option<usize>) -> Result<(), String> {
    let bits = match value {
        Value::Bitstring(bits) => bits.clone(),
        Value::Bytes(b) => Bitstring::from_bytes(b.clone()),
        other => return Err(format!("bits segment requires a bitstring, got {}", other.type_name())),
    };
    let take = match size_bits {
        Some(n) => {
            if n > bits.bit_len {
                return Err(format!("bits segment size {n} exceeds value length {}", bits.bit_len));
            }
            n
        }
        None => bits.bit_len,
    };
    out.push_bits(&bits.slice_bits(0, take));
    Ok(())
}

fn encode_utf(out: &mut Bitstring, value: &Value, segment_type: SegmentType, endianness: Endianness) -> Result<(), String> {
    let ch = match value {
        Value::Int(i) => u32::try_from(*i)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| format!("{i} is not a valid unicode code point"))?,
        Value::Str(s) if s.chars().count() == 1 => s.chars().next().unwrap_or('\0'),
        other => {
            return Err(format!(
                "utf segment requires a code point or single-character string, got {}",
                other.type_name()
            ));
        }
    };
    let mut bytes: Vec<u8> = vec![];
    match segment_type {
        SegmentType::Utf8 => {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        SegmentType::Utf16 => {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                match endianness {
                    Endianness::Little => bytes.extend_from_slice(&unit.to_le_bytes()),
                    _ => bytes.extend_from_slice(&unit.to_be_bytes()),
                }
            }
        }
        SegmentType::Utf32 => match endianness {
            Endianness::Little => bytes.extend_from_slice(&(ch as u32).to_le_bytes()),
            _ => bytes.extend_from_slice(&(ch as u32).to_be_bytes()),
        },
        _ => unreachable!("caller filters utf segment types"),
    }
    out.push_bits(&Bitstring::from_bytes(bytes));
    Ok(())
}

fn decode_utf(
    bits: &Bitstring,
    offset: usize,
    size_bits: usize,
    segment_type: SegmentType,
    endianness: Endianness,
) -> Result<Value, String> {
    if size_bits % 8 != 0 {
        return Err(format!("utf segment size {size_bits} is not a whole number of bytes"));
    }
    let raw = bits.slice_bits(offset, size_bits).bytes;
    let ch = match segment_type {
        SegmentType::Utf8 => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| {
                let mut chars = s.chars();
                let c = chars.next()?;
                chars.next().is_none().then_some(c)
            })
            .ok_or_else(|| "utf8 segment does not hold a single code point".to_owned())?,
        SegmentType::Utf16 => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| match endianness {
                    Endianness::Little => u16::from_le_bytes([pair[0], pair[1]]),
                    _ => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .collect();
            char::decode_utf16(units.iter().copied())
                .next()
                .and_then(Result::ok)
                .ok_or_else(|| "utf16 segment does not hold a single code point".to_owned())?
        }
        SegmentType::Utf32 => {
            if raw.len() != 4 {
                return Err("utf32 segment must be 32 bits".to_owned());
            }
            let unit = match endianness {
                Endianness::Little => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                _ => u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            };
            char::from_u32(unit).ok_or_else(|| format!("{unit} is not a valid unicode code point"))?
        }
        _ => unreachable!("caller filters utf segment types"),
    };
    Ok(Value::Str(ch.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_segments_round_trip_big_endian() {
        let mut builder = BitstringBuilder::new();
        builder
            .push_segment(&Value::Int(0xAB), Some(8), SegmentType::Integer, Endianness::Big)
            .unwrap();
        builder
            .push_segment(&Value::Int(0x1234), Some(16), SegmentType::Integer, Endianness::Big)
            .unwrap();
        let bits = builder.finish();
        assert_eq!(bits.bytes(), &[0xAB, 0x12, 0x34]);

        let (first, offset) = bits
            .read_typed(0, 8, SegmentType::Integer, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(first, Value::Int(0xAB));
        let (second, offset) = bits
            .read_typed(offset, 16, SegmentType::Integer, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(second, Value::Int(0x1234));
        assert_eq!(offset, 24);
    }

    #[test]
    fn little_endian_integer_swaps_bytes() {
        let mut builder = BitstringBuilder::new();
        builder
            .push_segment(&Value::Int(0x1234), Some(16), SegmentType::Integer, Endianness::Little)
            .unwrap();
        let bits = builder.finish();
        assert_eq!(bits.bytes(), &[0x34, 0x12]);
        let (value, _) = bits
            .read_typed(0, 16, SegmentType::Integer, Endianness::Little, Signedness::Unsigned)
            .unwrap();
        assert_eq!(value, Value::Int(0x1234));
    }

    #[test]
    fn signed_decode_sign_extends() {
        let bits = Bitstring::from_bytes(vec![0xFF]);
        let (value, _) = bits
            .read_typed(0, 8, SegmentType::Integer, Endianness::Big, Signedness::Signed)
            .unwrap();
        assert_eq!(value, Value::Int(-1));
    }

    #[test]
    fn sub_byte_segments_pack_tightly() {
        let mut builder = BitstringBuilder::new();
        builder
            .push_segment(&Value::Int(0b101), Some(3), SegmentType::Integer, Endianness::Big)
            .unwrap();
        builder
            .push_segment(&Value::Int(0b11111), Some(5), SegmentType::Integer, Endianness::Big)
            .unwrap();
        let bits = builder.finish();
        assert_eq!(bits.bit_len(), 8);
        assert_eq!(bits.bytes(), &[0b1011_1111]);
        let (first, offset) = bits
            .read_typed(0, 3, SegmentType::Integer, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(first, Value::Int(0b101));
        let (second, _) = bits
            .read_typed(offset, 5, SegmentType::Integer, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(second, Value::Int(0b11111));
    }

    #[test]
    fn float_segment_round_trips() {
        let mut builder = BitstringBuilder::new();
        builder
            .push_segment(&Value::Float(1.5), Some(64), SegmentType::Float, Endianness::Big)
            .unwrap();
        let bits = builder.finish();
        let (value, _) = bits
            .read_typed(0, 64, SegmentType::Float, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(value, Value::Float(1.5));
    }

    #[test]
    fn binary_rest_reads_remaining_bytes() {
        let bits = Bitstring::from_bytes(vec![0xAA, 0xBB, 0xCC, 0xDD]);
        let (head, offset) = bits
            .read_typed(0, 8, SegmentType::Integer, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(head, Value::Int(0xAA));
        let rest_bits = bits.bit_len() - offset;
        let (rest, end) = bits
            .read_typed(offset, rest_bits, SegmentType::Binary, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(rest, Value::Bytes(vec![0xBB, 0xCC, 0xDD]));
        assert_eq!(end, 32);
    }

    #[test]
    fn byte_at_is_none_past_the_end() {
        let bits = Bitstring::from_bytes(vec![1, 2]);
        assert_eq!(bits.byte_at(1), Some(2));
        assert_eq!(bits.byte_at(2), None);
    }

    #[test]
    fn coerce_accepts_strings_and_single_bytes() {
        assert_eq!(
            Bitstring::coerce(&Value::Str("hi".into())),
            Some(Bitstring::from_bytes(vec![b'h', b'i']))
        );
        assert_eq!(Bitstring::coerce(&Value::Int(7)), Some(Bitstring::from_bytes(vec![7])));
        assert_eq!(Bitstring::coerce(&Value::Int(300)), None);
        assert_eq!(Bitstring::coerce(&Value::Null), None);
    }

    #[test]
    fn utf8_segment_round_trips() {
        let mut builder = BitstringBuilder::new();
        builder
            .push_segment(&Value::Str("é".into()), None, SegmentType::Utf8, Endianness::Big)
            .unwrap();
        let bits = builder.finish();
        assert_eq!(bits.bit_len(), 16);
        let (value, _) = bits
            .read_typed(0, 16, SegmentType::Utf8, Endianness::Big, Signedness::Unsigned)
            .unwrap();
        assert_eq!(value, Value::Str("é".into()));
    }
}
