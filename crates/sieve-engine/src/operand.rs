//! Inline operand encoding.
//!
//! Operands are embedded in the code stream, each prefixed by a class-tag
//! byte; there is no runtime operand stack. Numbers use unsigned base-128
//! varints (continuation bit in the high bit). Strings live deduplicated in
//! the binary's string table; the code stream holds table offsets.
//!
//! Optional operands sit in a region marked by a leading `0x00` byte:
//! `(tag, payload)*` pairs terminated by tag `0x00`. The region is present
//! iff the byte at the site is `0x00`; real class tags are never zero, so
//! the reader can always tell.

use crate::binary::SieveBinary;
use crate::error::RuntimeError;
use crate::foundation::limits::MAX_VARINT_BYTES;
use crate::matching::{AddressPart, Comparator, MatchSpec, MatchType};

/// Operand class tags.
pub(crate) mod class {
    pub const OPTIONAL: u8 = 0x00;
    pub const NUMBER: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const STRING_LIST: u8 = 0x03;
}

/// Tags inside an optional-operand region.
pub(crate) mod opt_tag {
    pub const END: u8 = 0x00;
    pub const COMPARATOR: u8 = 0x01;
    pub const MATCH_TYPE: u8 = 0x02;
    pub const ADDRESS_PART: u8 = 0x03;
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub(crate) fn read_varint(code: &[u8], address: &mut usize) -> Result<u64, RuntimeError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for _ in 0..MAX_VARINT_BYTES {
        let byte = *code
            .get(*address)
            .ok_or_else(|| RuntimeError::Corrupt("truncated varint".into()))?;
        *address += 1;
        let bits = (byte & 0x7f) as u64;
        if shift >= 64 || (shift != 0 && bits >> (64 - shift) != 0) {
            return Err(RuntimeError::Corrupt("varint overflow".into()));
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(RuntimeError::Corrupt("varint too long".into()))
}

pub(crate) fn read_u8(code: &[u8], address: &mut usize) -> Result<u8, RuntimeError> {
    let byte = *code
        .get(*address)
        .ok_or_else(|| RuntimeError::Corrupt("truncated operand".into()))?;
    *address += 1;
    Ok(byte)
}

pub(crate) fn read_i32(code: &[u8], address: &mut usize) -> Result<i32, RuntimeError> {
    let end = address
        .checked_add(4)
        .ok_or_else(|| RuntimeError::Corrupt("address overflow".into()))?;
    let bytes = code
        .get(*address..end)
        .ok_or_else(|| RuntimeError::Corrupt("truncated jump offset".into()))?;
    *address = end;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn expect_class(code: &[u8], address: &mut usize, expected: u8, what: &str) -> Result<(), RuntimeError> {
    let tag = read_u8(code, address)?;
    if tag != expected {
        return Err(RuntimeError::Corrupt(format!(
            "expected {what} operand, found class {tag:#04x}"
        )));
    }
    Ok(())
}

pub(crate) fn read_number(binary: &SieveBinary, address: &mut usize) -> Result<u64, RuntimeError> {
    let code = binary.code();
    expect_class(code, address, class::NUMBER, "number")?;
    read_varint(code, address)
}

fn read_string_ref<'b>(binary: &'b SieveBinary, address: &mut usize) -> Result<&'b str, RuntimeError> {
    let offset = read_varint(binary.code(), address)?;
    let offset = u32::try_from(offset)
        .map_err(|_| RuntimeError::Corrupt("string offset out of range".into()))?;
    binary.string_at(offset)
}

pub(crate) fn read_string<'b>(
    binary: &'b SieveBinary,
    address: &mut usize,
) -> Result<&'b str, RuntimeError> {
    expect_class(binary.code(), address, class::STRING, "string")?;
    read_string_ref(binary, address)
}

/// Read a string-list operand. A single-string operand is accepted and
/// yields a one-element list.
pub(crate) fn read_string_list<'b>(
    binary: &'b SieveBinary,
    address: &mut usize,
) -> Result<Vec<&'b str>, RuntimeError> {
    let code = binary.code();
    match read_u8(code, address)? {
        class::STRING => Ok(vec![read_string_ref(binary, address)?]),
        class::STRING_LIST => {
            let count = read_varint(code, address)?;
            if count > code.len() as u64 {
                return Err(RuntimeError::Corrupt("string list longer than code".into()));
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_string_ref(binary, address)?);
            }
            Ok(items)
        }
        other => Err(RuntimeError::Corrupt(format!(
            "expected string list operand, found class {other:#04x}"
        ))),
    }
}

/// Read the optional match-specification region, if present.
pub(crate) fn read_match_spec(
    binary: &SieveBinary,
    address: &mut usize,
) -> Result<MatchSpec, RuntimeError> {
    let code = binary.code();
    let mut spec = MatchSpec::default();
    if code.get(*address) != Some(&class::OPTIONAL) {
        return Ok(spec);
    }
    *address += 1;
    loop {
        match read_u8(code, address)? {
            opt_tag::END => return Ok(spec),
            opt_tag::COMPARATOR => {
                let name = read_string_ref(binary, address)?;
                spec.comparator = Comparator::by_name(name).ok_or_else(|| {
                    RuntimeError::Corrupt(format!("unknown comparator '{name}'"))
                })?;
            }
            opt_tag::MATCH_TYPE => {
                spec.match_type = MatchType::from_code(read_u8(code, address)?)?;
            }
            opt_tag::ADDRESS_PART => {
                spec.address_part = AddressPart::from_code(read_u8(code, address)?)?;
            }
            other => {
                return Err(RuntimeError::Corrupt(format!(
                    "unknown optional operand tag {other:#04x}"
                )))
            }
        }
    }
}
