// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

// EIP encapsulation commands
pub const LIST_IDENTITY: u16 = 0x0063;
pub const REGISTER_SESSION: u16 = 0x0065;
pub const UNREGISTER_SESSION: u16 = 0x0066;
pub const SEND_RR_DATA: u16 = 0x006F;
pub const SEND_UNIT_DATA: u16 = 0x0070;

// CIP service codes
pub const GET_ATTRIBUTES_ALL: u8 = 0x01;
pub const MULTIPLE_SERVICE: u8 = 0x0A;
pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
pub const READ_TAG: u8 = 0x4C;
pub const WRITE_TAG: u8 = 0x4D;
// 0x4E is overloaded in CIP: it is ReadModifyWrite against the Message
// Router and ForwardClose against the Connection Manager. Keep both
// constants, they are not interchangeable at the call sites.
pub const READ_MODIFY_WRITE: u8 = 0x4E;
pub const FORWARD_CLOSE: u8 = 0x4E;
pub const UNCONNECTED_SEND: u8 = 0x52;
pub const FORWARD_OPEN: u8 = 0x54;
pub const GET_INSTANCE_ATTRIBUTE_LIST: u8 = 0x55;
pub const LARGE_FORWARD_OPEN: u8 = 0x5B;

// CIP object classes
pub const CLASS_IDENTITY: u16 = 0x01;
pub const CLASS_MESSAGE_ROUTER: u16 = 0x02;
pub const CLASS_CONNECTION_MANAGER: u16 = 0x06;
pub const CLASS_SYMBOL: u16 = 0x6B;
pub const CLASS_WALL_CLOCK: u16 = 0x8B;

// Symbol attribute 5 of the Wall Clock Time object holds the current
// time as microseconds since the Unix epoch
pub const ATTR_WALL_CLOCK_TIME: u8 = 0x05;

// CPF item types
pub const CPF_NULL_ADDRESS: u16 = 0x0000;
pub const CPF_CONNECTED_ADDRESS: u16 = 0x00A1;
pub const CPF_CONNECTED_DATA: u16 = 0x00B1;
pub const CPF_UNCONNECTED_DATA: u16 = 0x00B2;

// CIP general status codes the engine branches on
pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_PARTIAL_TRANSFER: u8 = 0x06;

// ForwardOpen identity literals, lifted from the reference implementation
pub const ORIGINATOR_VENDOR_ID: u16 = 0x1337;
pub const ORIGINATOR_SERIAL: u32 = 42;
pub const OT_CONNECTION_ID: u32 = 0x2000_0002;
pub const OT_RPI: u32 = 0x0020_1234;
pub const TO_RPI: u32 = 0x0020_4001;

// Connection sizes used by the auto-negotiation
pub const LARGE_CONNECTION_SIZE: u16 = 4002;
pub const STANDARD_CONNECTION_SIZE: u16 = 504;

// Fixed response offsets into the full encapsulated reply
pub const CONNECTED_STATUS_OFFSET: usize = 48;
pub const CONNECTED_DATA_OFFSET: usize = 50;
pub const UNCONNECTED_STATUS_OFFSET: usize = 42;
pub const UNCONNECTED_DATA_OFFSET: usize = 44;

// Sender context carried by ListIdentity requests; replies are matched
// against it when discovering devices
pub const DISCOVERY_CONTEXT: [u8; 8] = *b"HiMom\0\0\0";

// status_text renders a CIP general status byte for a Response
pub fn status_text(code: u8) -> String {
    let text = match code {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid Attribute",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode/state",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x16 => "Object does not exist",
        0x17 => "Service fragmentation sequence not in progress",
        0x18 => "No stored attribute data",
        0x19 => "Store operation failure",
        0x1A => "Routing failure, request packet too large",
        0x1B => "Routing failure, response packet too large",
        0x1C => "Missing attribute list entry data",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific",
        0x20 => "Invalid Parameter",
        0x21 => "Write once value or medium already written",
        0x22 => "Invalid reply received",
        0x23 => "Buffer overflow",
        0x24 => "Invalid message format",
        0x25 => "Key failure in path",
        0x26 => "Path size invalid",
        0x27 => "Unexpected attribute in list",
        0x28 => "Invalid member ID",
        0x29 => "Member not settable",
        0x2A => "Group 2 only server general failure",
        0x2B => "Unknown Modbus error",
        0x2C => "Attribute not gettable",
        _ => return format!("Unknown error {}", code),
    };
    text.to_string()
}

// vendor_name maps an ODVA vendor id to its registered name
pub fn vendor_name(id: u16) -> &'static str {
    match id {
        0x0001 => "Rockwell Automation/Allen-Bradley",
        0x0003 => "Honeywell Inc.",
        0x0005 => "Rockwell Automation/Reliance Electric",
        0x000E => "Festo SE & Co KG",
        0x001B => "Eaton Electrical",
        0x0023 => "FANUC Robotics America",
        0x002F => "Turck",
        0x0044 => "Phoenix Contact",
        0x0058 => "Siemens AG",
        0x005A => "HMS Industrial Networks AB",
        0x0062 => "Weidmuller Group",
        0x006C => "WAGO Corporation",
        0x0080 => "MKS Instruments",
        0x0101 => "Balluff GmbH",
        0x010E => "Beckhoff Automation",
        0x0119 => "SMC Corporation",
        0x012D => "SICK AG",
        0x01EE => "Omron Corporation",
        0x0262 => "Banner Engineering Corporation",
        0x02FF => "Kuka Roboter GmbH",
        0x0356 => "Fuji Electric",
        0x046D => "Keyence Corporation",
        _ => "Unknown",
    }
}

// device_type_name maps a CIP device profile id to its name
pub fn device_type_name(id: u16) -> &'static str {
    match id {
        0x00 => "Generic Device (deprecated)",
        0x02 => "AC Drive",
        0x03 => "Motor Overload",
        0x04 => "Limit Switch",
        0x07 => "General Purpose Discrete I/O",
        0x0C => "Communications Adapter",
        0x0E => "Programmable Logic Controller",
        0x10 => "Position Controller",
        0x13 => "DC Drive",
        0x15 => "Contactor",
        0x18 => "Human-Machine Interface",
        0x22 => "Residual Gas Analyzer",
        0x24 => "Softstart Starter",
        0x25 => "CIP Motion Drive",
        0x26 => "CompoNet Repeater",
        0x2B => "Generic Device (keyable)",
        0x32 => "Managed Ethernet Switch",
        0x33 => "CIP Motion Safety Drive Device",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(0x00), "Success");
        assert_eq!(status_text(0x06), "Partial transfer");
        assert_eq!(status_text(0x2C), "Attribute not gettable");
        assert_eq!(status_text(0xFF), "Unknown error 255");
    }

    #[test]
    fn test_lookup_tables() {
        assert_eq!(vendor_name(1), "Rockwell Automation/Allen-Bradley");
        assert_eq!(vendor_name(0x01EE), "Omron Corporation");
        assert_eq!(vendor_name(0xFFFF), "Unknown");
        assert_eq!(device_type_name(0x0E), "Programmable Logic Controller");
        assert_eq!(device_type_name(0xFFFF), "Unknown");
    }
}
