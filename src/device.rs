// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Identity records reported by ListIdentity and the Identity object

use crate::constant;
use crate::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// What a device reports about itself
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub ip: Option<String>,
    pub vendor_id: u16,
    pub vendor: String,
    pub device_type_id: u16,
    pub device_type: String,
    pub product_code: u16,
    /// "major.minor"
    pub revision: String,
    pub status: u16,
    /// "0xNNNNNNNN"
    pub serial: String,
    pub product_name: String,
    /// Device state from ListIdentity; 0 when the source has none
    pub state: u8,
}

fn build(fields: &[u8], ip: Option<String>, state: u8) -> Result<Device, Error> {
    // fields starts at the vendor id word
    if fields.len() < 15 {
        return Err(Error::too_short("identity"));
    }
    let name_len = fields[14] as usize;
    if fields.len() < 15 + name_len {
        return Err(Error::too_short("identity"));
    }
    let vendor_id = LittleEndian::read_u16(&fields[0..2]);
    let device_type_id = LittleEndian::read_u16(&fields[2..4]);
    let serial_number = LittleEndian::read_u32(&fields[10..14]);
    Ok(Device {
        ip,
        vendor_id,
        vendor: constant::vendor_name(vendor_id).to_string(),
        device_type_id,
        device_type: constant::device_type_name(device_type_id).to_string(),
        product_code: LittleEndian::read_u16(&fields[4..6]),
        revision: format!("{}.{}", fields[6], fields[7]),
        status: LittleEndian::read_u16(&fields[8..10]),
        serial: format!("0x{:08X}", serial_number),
        product_name: String::from_utf8_lossy(&fields[15..15 + name_len]).into_owned(),
        state,
    })
}

impl Device {
    /// Parse a full ListIdentity reply frame. The identity item sits at
    /// fixed offsets: vendor id at 48, product name length at 62, state
    /// in the final byte.
    pub(crate) fn from_identity(frame: &[u8], ip: Option<String>) -> Result<Device, Error> {
        if frame.len() < 64 {
            return Err(Error::too_short("ListIdentity"));
        }
        let state = *frame.last().unwrap_or(&0);
        build(&frame[48..frame.len() - 1], ip, state)
    }

    /// Parse Identity-object GetAttributesAll data, starting at the
    /// vendor id word
    pub(crate) fn from_attributes(data: &[u8], ip: Option<String>) -> Result<Device, Error> {
        build(data, ip, 0)
    }
}
