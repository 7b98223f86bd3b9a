//! Escaping of `/`-separated fields
//!
//! Two schemes share one decoder:
//! - reference fields (`escape`/`unescape`): `/` and `\` become `\xHHHH`,
//!   four hex digits of the UTF-16 code unit.
//! - driver id fields (`escape_field`/`unescape_field`): `/`, `\` and control
//!   characters become `\xHH`.

use std::fmt::Write;

use crate::error::{status, DecodeError, DriverError};

const REFERENCE_WIDTH: usize = 4;
const FIELD_WIDTH: usize = 2;

pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '/' || ch == '\\' {
            let _ = write!(out, "\\x{:04x}", ch as u32);
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn unescape(input: &str) -> Result<String, DecodeError> {
    decode(input, REFERENCE_WIDTH).map_err(|offset| DecodeError::Escape { offset })
}

pub fn escape_field(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '/' || ch == '\\' || ch.is_ascii_control() {
            let _ = write!(out, "\\x{:02x}", ch as u32);
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn unescape_field(input: &str) -> Result<String, DriverError> {
    decode(input, FIELD_WIDTH).map_err(|offset| {
        DriverError::new(
            status::CKR_ATTRIBUTE_VALUE_INVALID,
            format!("invalid escape at offset {offset}"),
        )
    })
}

/// Decodes `\x` + `width` hex digits; returns the offset of the first bad escape.
fn decode(input: &str, width: usize) -> Result<String, usize> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('\\') {
        let offset = input.len() - rest.len() + pos;
        out.push_str(&rest[..pos]);

        let sequence = rest.get(pos..pos + 2 + width).ok_or(offset)?;
        let digits = sequence.strip_prefix("\\x").ok_or(offset)?;
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(offset);
        }
        let code = u32::from_str_radix(digits, 16).map_err(|_| offset)?;
        out.push(char::from_u32(code).ok_or(offset)?);

        rest = &rest[pos + 2 + width..];
    }

    out.push_str(rest);
    Ok(out)
}
