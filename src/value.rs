// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! CIP elementary types and the codec between host values and wire bytes

use crate::error::Error;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use std::fmt;

// CIP type codes
pub const BOOL: u8 = 0xC1;
pub const SINT: u8 = 0xC2;
pub const INT: u8 = 0xC3;
pub const DINT: u8 = 0xC4;
pub const LINT: u8 = 0xC5;
pub const USINT: u8 = 0xC6;
pub const UINT: u8 = 0xC7;
pub const UDINT: u8 = 0xC8;
pub const LWORD: u8 = 0xC9;
pub const REAL: u8 = 0xCA;
pub const LREAL: u8 = 0xCB;
pub const LDT: u8 = 0xCC;
pub const DT: u8 = 0xC0;
pub const O_STRING: u8 = 0xD0;
pub const BYTE: u8 = 0xD1;
pub const WORD: u8 = 0xD2;
pub const DWORD: u8 = 0xD3;
pub const TIME32: u8 = 0xD6;
pub const TIME: u8 = 0xD7;
pub const STRING: u8 = 0xDA;
pub const LTIME: u8 = 0xDF;
pub const STRUCT: u8 = 0xA0;

/// Structure handle that marks a STRUCT as the standard Logix STRING
pub const STRING_HANDLE: u16 = 0x0FCE;

/// Data capacity of the standard Logix STRING
pub const STRING_DATA_LEN: usize = 82;
// A STRING is padded to a fixed 88 bytes when written
pub(crate) const STRING_WIRE_LEN: usize = 88;

/// What a type code means, independent of its width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    SignedInt,
    UnsignedInt,
    Float,
    Bytes,
    DateTime,
    StringStruct,
    UdtStruct,
}

pub struct TypeInfo {
    pub code: u8,
    pub size: usize,
    pub name: &'static str,
    pub kind: Kind,
}

// Variable-width entries carry size 0
static TYPES: &[TypeInfo] = &[
    TypeInfo { code: BOOL, size: 1, name: "BOOL", kind: Kind::Bool },
    TypeInfo { code: SINT, size: 1, name: "SINT", kind: Kind::SignedInt },
    TypeInfo { code: INT, size: 2, name: "INT", kind: Kind::SignedInt },
    TypeInfo { code: DINT, size: 4, name: "DINT", kind: Kind::SignedInt },
    TypeInfo { code: LINT, size: 8, name: "LINT", kind: Kind::SignedInt },
    TypeInfo { code: USINT, size: 1, name: "USINT", kind: Kind::UnsignedInt },
    TypeInfo { code: UINT, size: 2, name: "UINT", kind: Kind::UnsignedInt },
    TypeInfo { code: UDINT, size: 4, name: "UDINT", kind: Kind::UnsignedInt },
    TypeInfo { code: LWORD, size: 8, name: "LWORD", kind: Kind::UnsignedInt },
    TypeInfo { code: REAL, size: 4, name: "REAL", kind: Kind::Float },
    TypeInfo { code: LREAL, size: 8, name: "LREAL", kind: Kind::Float },
    TypeInfo { code: LDT, size: 8, name: "LDT", kind: Kind::DateTime },
    TypeInfo { code: DT, size: 8, name: "DT", kind: Kind::DateTime },
    TypeInfo { code: O_STRING, size: 0, name: "O_STRING", kind: Kind::StringStruct },
    TypeInfo { code: BYTE, size: 1, name: "BYTE", kind: Kind::UnsignedInt },
    TypeInfo { code: WORD, size: 2, name: "WORD", kind: Kind::UnsignedInt },
    TypeInfo { code: DWORD, size: 4, name: "DWORD", kind: Kind::UnsignedInt },
    TypeInfo { code: TIME32, size: 4, name: "TIME32", kind: Kind::SignedInt },
    TypeInfo { code: TIME, size: 8, name: "TIME", kind: Kind::SignedInt },
    TypeInfo { code: STRING, size: STRING_WIRE_LEN, name: "STRING", kind: Kind::StringStruct },
    TypeInfo { code: LTIME, size: 8, name: "LTIME", kind: Kind::SignedInt },
    TypeInfo { code: STRUCT, size: 0, name: "STRUCT", kind: Kind::UdtStruct },
];

pub fn type_info(code: u8) -> Option<&'static TypeInfo> {
    TYPES.iter().find(|t| t.code == code)
}

/// Byte width of a type code, 0 for variable-width or unknown codes
pub fn type_size(code: u8) -> usize {
    type_info(code).map_or(0, |t| t.size)
}

pub fn type_name(code: u8) -> &'static str {
    type_info(code).map_or("UNKNOWN", |t| t.name)
}

/// A value read from or written to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    None,
    Bool(bool),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Lword(u64),
    Real(f32),
    Lreal(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Raw(Vec<u8>),
    List(Vec<PlcValue>),
    Device(crate::device::Device),
    Devices(Vec<crate::device::Device>),
    Tags(Vec<crate::tag::Tag>),
    Programs(Vec<String>),
}

impl PlcValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PlcValue::Bool(b) => Some(*b as i64),
            PlcValue::Sint(v) => Some(*v as i64),
            PlcValue::Int(v) => Some(*v as i64),
            PlcValue::Dint(v) => Some(*v as i64),
            PlcValue::Lint(v) => Some(*v),
            PlcValue::Usint(v) => Some(*v as i64),
            PlcValue::Uint(v) => Some(*v as i64),
            PlcValue::Udint(v) => Some(*v as i64),
            PlcValue::Lword(v) => Some(*v as i64),
            PlcValue::Real(v) => Some(*v as i64),
            PlcValue::Lreal(v) => Some(*v as i64),
            PlcValue::DateTime(dt) => Some(dt.timestamp_micros()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().map(|v| v as u64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PlcValue::Real(v) => Some(*v as f64),
            PlcValue::Lreal(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlcValue::Bool(b) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// The type code used when the caller does not supply one on a write
    pub fn guess_type(&self) -> u8 {
        match self {
            PlcValue::Bool(_) => BOOL,
            PlcValue::Sint(_) => SINT,
            PlcValue::Int(_) => INT,
            PlcValue::Dint(_) => DINT,
            PlcValue::Lint(_) => LINT,
            PlcValue::Usint(_) => USINT,
            PlcValue::Uint(_) => UINT,
            PlcValue::Udint(_) => UDINT,
            PlcValue::Lword(_) => LWORD,
            PlcValue::Real(_) => REAL,
            PlcValue::Lreal(_) => LREAL,
            PlcValue::String(_) => STRING,
            PlcValue::DateTime(_) => DT,
            PlcValue::List(items) => items.first().map_or(DINT, PlcValue::guess_type),
            _ => DINT,
        }
    }
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlcValue::None => write!(f, "None"),
            PlcValue::Bool(v) => write!(f, "{}", v),
            PlcValue::Sint(v) => write!(f, "{}", v),
            PlcValue::Int(v) => write!(f, "{}", v),
            PlcValue::Dint(v) => write!(f, "{}", v),
            PlcValue::Lint(v) => write!(f, "{}", v),
            PlcValue::Usint(v) => write!(f, "{}", v),
            PlcValue::Uint(v) => write!(f, "{}", v),
            PlcValue::Udint(v) => write!(f, "{}", v),
            PlcValue::Lword(v) => write!(f, "{}", v),
            PlcValue::Real(v) => write!(f, "{}", v),
            PlcValue::Lreal(v) => write!(f, "{}", v),
            PlcValue::String(v) => write!(f, "{}", v),
            PlcValue::DateTime(v) => write!(f, "{}", v),
            PlcValue::Raw(v) => write!(f, "{} raw bytes", v.len()),
            PlcValue::List(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            PlcValue::Device(d) => write!(f, "{}", d.product_name),
            PlcValue::Devices(v) => write!(f, "{} devices", v.len()),
            PlcValue::Tags(v) => write!(f, "{} tags", v.len()),
            PlcValue::Programs(v) => write!(f, "{} programs", v.len()),
        }
    }
}

/// Serialize one scalar as the given CIP type. Numeric values are
/// coerced to the target width the way the controller would.
pub fn encode(value: &PlcValue, code: u8, encoding: &str) -> Result<Vec<u8>, Error> {
    let numeric = || {
        value
            .as_i64()
            .ok_or_else(|| Error::InvalidInput(format!("cannot write {} as {}", value, type_name(code))))
    };

    let bytes = match code {
        BOOL => vec![if value.as_bool().unwrap_or(false) { 0xFF } else { 0x00 }],
        SINT | USINT | BYTE => vec![numeric()? as u8],
        INT | UINT | WORD => {
            let mut b = vec![0u8; 2];
            LittleEndian::write_u16(&mut b, numeric()? as u16);
            b
        }
        DINT | UDINT | DWORD | TIME32 => {
            let mut b = vec![0u8; 4];
            LittleEndian::write_u32(&mut b, numeric()? as u32);
            b
        }
        LINT | LWORD | TIME | LTIME | DT | LDT => {
            let mut b = vec![0u8; 8];
            LittleEndian::write_u64(&mut b, numeric()? as u64);
            b
        }
        REAL => {
            let v = value
                .as_f64()
                .ok_or_else(|| Error::InvalidInput(format!("cannot write {} as REAL", value)))?;
            let mut b = vec![0u8; 4];
            LittleEndian::write_f32(&mut b, v as f32);
            b
        }
        LREAL => {
            let v = value
                .as_f64()
                .ok_or_else(|| Error::InvalidInput(format!("cannot write {} as LREAL", value)))?;
            let mut b = vec![0u8; 8];
            LittleEndian::write_f64(&mut b, v);
            b
        }
        STRING | STRUCT => match value {
            PlcValue::String(s) => encode_logix_string(s, encoding),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "cannot write {} as STRING",
                    value
                )))
            }
        },
        O_STRING => match value {
            PlcValue::String(s) => {
                let data = encode_text(s, encoding);
                let mut b = vec![data.len() as u8];
                b.extend_from_slice(&data);
                b
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "cannot write {} as O_STRING",
                    value
                )))
            }
        },
        _ => match value {
            PlcValue::Raw(b) => b.clone(),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unsupported write type {:#04x}",
                    code
                )))
            }
        },
    };
    Ok(bytes)
}

/// Deserialize one scalar of the given CIP type from the front of `data`
pub fn decode(data: &[u8], code: u8, encoding: &str) -> Result<PlcValue, Error> {
    let size = type_size(code);
    if size > 0 && data.len() < size && code != STRING {
        return Err(Error::InvalidResponse {
            reason: format!(
                "{} value truncated: {} of {} bytes",
                type_name(code),
                data.len(),
                size
            ),
        });
    }

    let value = match code {
        BOOL => PlcValue::Bool(data[0] != 0),
        SINT => PlcValue::Sint(data[0] as i8),
        INT => PlcValue::Int(LittleEndian::read_i16(data)),
        DINT => PlcValue::Dint(LittleEndian::read_i32(data)),
        LINT => PlcValue::Lint(LittleEndian::read_i64(data)),
        USINT | BYTE => PlcValue::Usint(data[0]),
        UINT | WORD => PlcValue::Uint(LittleEndian::read_u16(data)),
        UDINT | DWORD => PlcValue::Udint(LittleEndian::read_u32(data)),
        LWORD => PlcValue::Lword(LittleEndian::read_u64(data)),
        REAL => PlcValue::Real(LittleEndian::read_f32(data)),
        LREAL => PlcValue::Lreal(LittleEndian::read_f64(data)),
        TIME32 => PlcValue::Dint(LittleEndian::read_i32(data)),
        TIME | LTIME => PlcValue::Lint(LittleEndian::read_i64(data)),
        DT | LDT => {
            let micros = LittleEndian::read_i64(data);
            match DateTime::from_timestamp_micros(micros) {
                Some(dt) => PlcValue::DateTime(dt),
                None => {
                    return Err(Error::InvalidResponse {
                        reason: format!("timestamp {} out of range", micros),
                    })
                }
            }
        }
        STRING | STRUCT => decode_logix_string(data, encoding)?,
        O_STRING => {
            if data.is_empty() {
                return Err(Error::too_short("O_STRING"));
            }
            let n = data[0] as usize;
            if data.len() < 1 + n {
                return Err(Error::too_short("O_STRING"));
            }
            PlcValue::String(decode_text(&data[1..1 + n], encoding))
        }
        // Unrecognized codes surface their raw bytes
        _ => PlcValue::Raw(data.to_vec()),
    };
    Ok(value)
}

// {length: i32, data: 82 bytes} padded to 88 on the wire
fn encode_logix_string(s: &str, encoding: &str) -> Vec<u8> {
    let mut data = encode_text(s, encoding);
    data.truncate(STRING_DATA_LEN);
    let mut bytes = vec![0u8; STRING_WIRE_LEN];
    LittleEndian::write_i32(&mut bytes[..4], data.len() as i32);
    bytes[4..4 + data.len()].copy_from_slice(&data);
    bytes
}

fn decode_logix_string(data: &[u8], encoding: &str) -> Result<PlcValue, Error> {
    if data.len() < 4 {
        return Err(Error::too_short("STRING"));
    }
    let len = LittleEndian::read_i32(&data[..4]).max(0) as usize;
    let n = len.min(STRING_DATA_LEN).min(data.len() - 4);
    Ok(PlcValue::String(decode_text(&data[4..4 + n], encoding)))
}

pub(crate) fn decode_text(bytes: &[u8], encoding: &str) -> String {
    match encoding {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        // latin-1 fallback for any other configured encoding
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub(crate) fn encode_text(s: &str, encoding: &str) -> Vec<u8> {
    match encoding {
        "utf-8" | "utf8" | "ascii" => s.as_bytes().to_vec(),
        _ => s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect(),
    }
}
