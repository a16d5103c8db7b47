// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! EtherNet/IP encapsulation and CIP frame assembly
//!
//! Everything in here is pure byte bookkeeping: the 24-byte
//! encapsulation header, the CPF item lists for unconnected
//! (SendRRData) and connected (SendUnitData) messaging, routing paths
//! and the ForwardOpen/ForwardClose service bodies. All integers are
//! little-endian on the wire.

use crate::constant;
use byteorder::{ByteOrder, LittleEndian};

/// Size of the encapsulation header preceding every payload
pub(crate) const ENCAP_HEADER_LEN: usize = 24;

/// One hop of a CIP routing path
#[derive(Debug, Clone, PartialEq)]
pub enum Hop {
    /// `(port_id, slot)` backplane-style hop
    Slot(u8, u8),
    /// `(port_id, link)` hop addressing an IP address or named link
    Link(u8, String),
}

pub(crate) fn encap_header(
    command: u16,
    session: u32,
    context: &[u8; 8],
    payload_len: usize,
) -> Vec<u8> {
    let mut header = vec![0u8; ENCAP_HEADER_LEN];
    LittleEndian::write_u16(&mut header[0..2], command);
    LittleEndian::write_u16(&mut header[2..4], payload_len as u16);
    LittleEndian::write_u32(&mut header[4..8], session);
    // status stays 0 on requests
    header[12..20].copy_from_slice(context);
    // options stay 0
    header
}

pub(crate) fn register_session(context: &[u8; 8]) -> Vec<u8> {
    let mut frame = encap_header(constant::REGISTER_SESSION, 0, context, 4);
    frame.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]); // protocol version 1, options 0
    frame
}

pub(crate) fn unregister_session(session: u32, context: &[u8; 8]) -> Vec<u8> {
    encap_header(constant::UNREGISTER_SESSION, session, context, 0)
}

pub(crate) fn list_identity(context: &[u8; 8]) -> Vec<u8> {
    encap_header(constant::LIST_IDENTITY, 0, context, 0)
}

/// Header and CPF prefix of a SendRRData frame, 40 bytes; the CIP frame
/// of `frame_len` bytes follows it
pub(crate) fn rr_data_header(session: u32, context: &[u8; 8], frame_len: usize) -> Vec<u8> {
    let mut buf = encap_header(constant::SEND_RR_DATA, session, context, 16 + frame_len);
    buf.resize(40, 0);
    // interface handle (24..28) and timeout (28..30) stay 0
    LittleEndian::write_u16(&mut buf[30..32], 2); // item count
    LittleEndian::write_u16(&mut buf[32..34], constant::CPF_NULL_ADDRESS);
    // null address item has no payload (34..36 stays 0)
    LittleEndian::write_u16(&mut buf[36..38], constant::CPF_UNCONNECTED_DATA);
    LittleEndian::write_u16(&mut buf[38..40], frame_len as u16);
    buf
}

pub(crate) fn rr_data(session: u32, context: &[u8; 8], cip: &[u8]) -> Vec<u8> {
    let mut frame = rr_data_header(session, context, cip.len());
    frame.extend_from_slice(cip);
    frame
}

/// A SendUnitData frame: connected-address item carrying the connection
/// id, then the connected-data item of sequence count plus CIP service
pub(crate) fn unit_data(
    session: u32,
    context: &[u8; 8],
    connection_id: u32,
    sequence: u16,
    cip: &[u8],
) -> Vec<u8> {
    let mut frame = encap_header(constant::SEND_UNIT_DATA, session, context, 22 + cip.len());
    frame.resize(46, 0);
    // interface handle and timeout stay 0
    LittleEndian::write_u16(&mut frame[30..32], 2); // item count
    LittleEndian::write_u16(&mut frame[32..34], constant::CPF_CONNECTED_ADDRESS);
    LittleEndian::write_u16(&mut frame[34..36], 4);
    LittleEndian::write_u32(&mut frame[36..40], connection_id);
    LittleEndian::write_u16(&mut frame[40..42], constant::CPF_CONNECTED_DATA);
    LittleEndian::write_u16(&mut frame[42..44], 2 + cip.len() as u16);
    LittleEndian::write_u16(&mut frame[44..46], sequence);
    frame.extend_from_slice(cip);
    frame
}

// Port/slot pairs as-is; IP or named links as an extended port segment
// with a length-prefixed, word-padded ASCII string
pub(crate) fn encode_route(hops: &[Hop]) -> Vec<u8> {
    let mut path = Vec::new();
    for hop in hops {
        match hop {
            Hop::Slot(port, slot) => {
                path.push(*port);
                path.push(*slot);
            }
            Hop::Link(port, link) => {
                path.push(*port | 0x10);
                path.push(link.len() as u8);
                path.extend_from_slice(link.as_bytes());
                if link.len() % 2 == 1 {
                    path.push(0x00);
                }
            }
        }
    }
    path
}

/// Route hops for the session: the caller-supplied route, or the
/// default backplane hop, or nothing at all on a Micro800
pub(crate) fn session_route(route: Option<&[Hop]>, slot: u8, micro800: bool) -> Vec<u8> {
    match route {
        Some(hops) => encode_route(hops),
        None if micro800 => Vec::new(),
        None => vec![0x01, slot],
    }
}

/// The connected path used by ForwardOpen and ForwardClose: route hops
/// followed by the Message Router terminator
pub(crate) fn connected_path(route: Option<&[Hop]>, slot: u8, micro800: bool) -> Vec<u8> {
    let mut path = session_route(route, slot, micro800);
    path.extend_from_slice(&[0x20, constant::CLASS_MESSAGE_ROUTER as u8, 0x24, 0x01]);
    path
}

/// Wrap a service in an UnconnectedSend (0x52) through the Connection
/// Manager, routed along `route`
pub(crate) fn unconnected_send(embedded: &[u8], route: &[u8]) -> Vec<u8> {
    let mut frame = vec![
        constant::UNCONNECTED_SEND,
        0x02,
        0x20,
        constant::CLASS_CONNECTION_MANAGER as u8,
        0x24,
        0x01,
        0x0A, // priority/tick time
        0xFF, // timeout ticks
    ];
    let mut len = [0u8; 2];
    LittleEndian::write_u16(&mut len, embedded.len() as u16);
    frame.extend_from_slice(&len);
    frame.extend_from_slice(embedded);
    if embedded.len() % 2 == 1 {
        frame.push(0x00);
    }
    frame.push((route.len() / 2) as u8);
    frame.push(0x00); // reserved
    frame.extend_from_slice(route);
    frame
}

/// ForwardOpen (0x54) or LargeForwardOpen (0x5B) service body.
///
/// The originator identity fields are fixed literals; the T→O
/// connection id and connection serial are drawn per session.
pub(crate) fn forward_open(
    large: bool,
    size: u16,
    to_connection_id: u32,
    serial: u16,
    path: &[u8],
) -> Vec<u8> {
    let service = if large {
        constant::LARGE_FORWARD_OPEN
    } else {
        constant::FORWARD_OPEN
    };
    let mut frame = vec![
        service,
        0x02,
        0x20,
        constant::CLASS_CONNECTION_MANAGER as u8,
        0x24,
        0x01,
        0x0A, // priority/tick time
        0x0E, // timeout ticks
    ];
    let mut b4 = [0u8; 4];
    let mut b2 = [0u8; 2];
    LittleEndian::write_u32(&mut b4, constant::OT_CONNECTION_ID);
    frame.extend_from_slice(&b4);
    LittleEndian::write_u32(&mut b4, to_connection_id);
    frame.extend_from_slice(&b4);
    LittleEndian::write_u16(&mut b2, serial);
    frame.extend_from_slice(&b2);
    LittleEndian::write_u16(&mut b2, constant::ORIGINATOR_VENDOR_ID);
    frame.extend_from_slice(&b2);
    LittleEndian::write_u32(&mut b4, constant::ORIGINATOR_SERIAL);
    frame.extend_from_slice(&b4);
    frame.push(0x03); // connection timeout multiplier
    frame.extend_from_slice(&[0x00, 0x00, 0x00]); // reserved

    LittleEndian::write_u32(&mut b4, constant::OT_RPI);
    frame.extend_from_slice(&b4);
    push_connection_params(&mut frame, large, size);
    LittleEndian::write_u32(&mut b4, constant::TO_RPI);
    frame.extend_from_slice(&b4);
    push_connection_params(&mut frame, large, size);

    frame.push(0xA3); // transport class 3, server trigger
    frame.push((path.len() / 2) as u8);
    frame.extend_from_slice(path);
    frame
}

// Standard opens carry 16-bit parameters, large opens 32-bit
fn push_connection_params(frame: &mut Vec<u8>, large: bool, size: u16) {
    if large {
        let mut b4 = [0u8; 4];
        LittleEndian::write_u32(&mut b4, (0x4200u32 << 16) | size as u32);
        frame.extend_from_slice(&b4);
    } else {
        let mut b2 = [0u8; 2];
        LittleEndian::write_u16(&mut b2, 0x4200 | size);
        frame.extend_from_slice(&b2);
    }
}

/// ForwardClose (0x4E against the Connection Manager) service body
pub(crate) fn forward_close(serial: u16, path: &[u8]) -> Vec<u8> {
    let mut frame = vec![
        constant::FORWARD_CLOSE,
        0x02,
        0x20,
        constant::CLASS_CONNECTION_MANAGER as u8,
        0x24,
        0x01,
        0x0A,
        0x0E,
    ];
    let mut b2 = [0u8; 2];
    let mut b4 = [0u8; 4];
    LittleEndian::write_u16(&mut b2, serial);
    frame.extend_from_slice(&b2);
    LittleEndian::write_u16(&mut b2, constant::ORIGINATOR_VENDOR_ID);
    frame.extend_from_slice(&b2);
    LittleEndian::write_u32(&mut b4, constant::ORIGINATOR_SERIAL);
    frame.extend_from_slice(&b4);
    frame.push((path.len() / 2) as u8);
    frame.push(0x00); // reserved, unlike ForwardOpen
    frame.extend_from_slice(path);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTEXT: [u8; 8] = *b"unittest";

    #[test]
    fn test_rr_data_header_shape() {
        let header = rr_data_header(0x11223344, &CONTEXT, 100);
        assert_eq!(header.len(), 40);
        assert_eq!(LittleEndian::read_u16(&header[0..2]), 0x006F);
        assert_eq!(LittleEndian::read_u16(&header[2..4]), 116);
        assert_eq!(LittleEndian::read_u32(&header[4..8]), 0x11223344);
        assert_eq!(LittleEndian::read_u16(&header[30..32]), 2);
        assert_eq!(LittleEndian::read_u16(&header[32..34]), 0x0000);
        assert_eq!(LittleEndian::read_u16(&header[34..36]), 0);
        assert_eq!(LittleEndian::read_u16(&header[36..38]), 0x00B2);
        assert_eq!(LittleEndian::read_u16(&header[38..40]), 100);
    }

    #[test]
    fn test_unit_data_layout() {
        let cip = [0x4C, 0x02, 0x91, 0x04, b'T', b'e', b's', b't', 0x01, 0x00];
        let frame = unit_data(0xAABBCCDD, &CONTEXT, 0x20000002, 7, &cip);
        assert_eq!(frame.len(), 46 + cip.len());
        assert_eq!(LittleEndian::read_u16(&frame[0..2]), 0x0070);
        assert_eq!(
            LittleEndian::read_u16(&frame[2..4]) as usize,
            22 + cip.len()
        );
        assert_eq!(LittleEndian::read_u16(&frame[32..34]), 0x00A1);
        assert_eq!(LittleEndian::read_u16(&frame[34..36]), 4);
        assert_eq!(LittleEndian::read_u32(&frame[36..40]), 0x20000002);
        assert_eq!(LittleEndian::read_u16(&frame[40..42]), 0x00B1);
        assert_eq!(
            LittleEndian::read_u16(&frame[42..44]) as usize,
            2 + cip.len()
        );
        assert_eq!(LittleEndian::read_u16(&frame[44..46]), 7);
        assert_eq!(&frame[46..], &cip[..]);
    }

    #[test]
    fn test_register_session_frame() {
        let frame = register_session(&CONTEXT);
        assert_eq!(frame.len(), 28);
        assert_eq!(LittleEndian::read_u16(&frame[0..2]), 0x0065);
        assert_eq!(LittleEndian::read_u16(&frame[2..4]), 4);
        assert_eq!(LittleEndian::read_u16(&frame[24..26]), 1);
        assert_eq!(&frame[12..20], &CONTEXT);
    }

    #[test]
    fn test_connected_path_variants() {
        // default backplane hop ahead of the Message Router
        assert_eq!(
            connected_path(None, 3, false),
            vec![0x01, 0x03, 0x20, 0x02, 0x24, 0x01]
        );
        // Micro800 carries no route prefix at all
        assert_eq!(connected_path(None, 0, true), vec![0x20, 0x02, 0x24, 0x01]);
        // explicit routes win over the default
        let route = [Hop::Slot(0x01, 0x00), Hop::Slot(0x02, 0x05)];
        assert_eq!(
            connected_path(Some(&route), 0, false),
            vec![0x01, 0x00, 0x02, 0x05, 0x20, 0x02, 0x24, 0x01]
        );
    }

    #[test]
    fn test_ip_link_hop_is_length_prefixed_and_padded() {
        let route = [Hop::Link(0x02, "10.0.0.12".to_string())];
        let mut expected = vec![0x12, 0x09];
        expected.extend_from_slice(b"10.0.0.12");
        expected.push(0x00);
        assert_eq!(encode_route(&route), expected);

        let even = [Hop::Link(0x03, "10.0.0.100".to_string())];
        let encoded = encode_route(&even);
        assert_eq!(encoded[0], 0x13);
        assert_eq!(encoded.len(), 2 + 10);
    }

    #[test]
    fn test_unconnected_send_pads_odd_services() {
        let embedded = [0x01, 0x02, 0x20, 0x01, 0x24]; // odd on purpose
        let route = [0x01, 0x03];
        let frame = unconnected_send(&embedded, &route);
        assert_eq!(
            &frame[..8],
            &[0x52, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0xFF]
        );
        assert_eq!(LittleEndian::read_u16(&frame[8..10]), 5);
        assert_eq!(&frame[10..15], &embedded);
        assert_eq!(frame[15], 0x00); // pad
        assert_eq!(frame[16], 1); // route words
        assert_eq!(frame[17], 0x00);
        assert_eq!(&frame[18..], &route);
    }

    #[test]
    fn test_forward_open_standard_params() {
        let path = connected_path(None, 0, false);
        let frame = forward_open(false, 504, 0x0BADF00D, 0x4242, &path);
        assert_eq!(frame[0], 0x54);
        assert_eq!(&frame[1..6], &[0x02, 0x20, 0x06, 0x24, 0x01]);
        assert_eq!(frame[6], 0x0A);
        assert_eq!(frame[7], 0x0E);
        assert_eq!(LittleEndian::read_u32(&frame[8..12]), 0x20000002);
        assert_eq!(LittleEndian::read_u32(&frame[12..16]), 0x0BADF00D);
        assert_eq!(LittleEndian::read_u16(&frame[16..18]), 0x4242);
        assert_eq!(LittleEndian::read_u16(&frame[18..20]), 0x1337);
        assert_eq!(LittleEndian::read_u32(&frame[20..24]), 42);
        assert_eq!(frame[24], 0x03);
        // O->T RPI then 16-bit parameters
        assert_eq!(LittleEndian::read_u32(&frame[28..32]), 0x00201234);
        assert_eq!(LittleEndian::read_u16(&frame[32..34]), 0x4200 | 504);
        assert_eq!(LittleEndian::read_u32(&frame[34..38]), 0x00204001);
        assert_eq!(LittleEndian::read_u16(&frame[38..40]), 0x4200 | 504);
        assert_eq!(frame[40], 0xA3);
        assert_eq!(frame[41] as usize, path.len() / 2);
        assert_eq!(&frame[42..], &path[..]);
    }

    #[test]
    fn test_large_forward_open_params() {
        let path = connected_path(None, 0, false);
        let frame = forward_open(true, 4002, 1, 2, &path);
        assert_eq!(frame[0], 0x5B);
        assert_eq!(
            LittleEndian::read_u32(&frame[32..36]),
            (0x4200u32 << 16) | 4002
        );
        assert_eq!(LittleEndian::read_u32(&frame[36..40]), 0x00204001);
        assert_eq!(
            LittleEndian::read_u32(&frame[40..44]),
            (0x4200u32 << 16) | 4002
        );
        assert_eq!(frame[44], 0xA3);
    }

    #[test]
    fn test_forward_close_reserved_byte() {
        let path = connected_path(None, 2, false);
        let frame = forward_close(0x1111, &path);
        assert_eq!(frame[0], 0x4E);
        assert_eq!(LittleEndian::read_u16(&frame[8..10]), 0x1111);
        assert_eq!(LittleEndian::read_u16(&frame[10..12]), 0x1337);
        assert_eq!(LittleEndian::read_u32(&frame[12..16]), 42);
        assert_eq!(frame[16] as usize, path.len() / 2);
        assert_eq!(frame[17], 0x00);
        assert_eq!(&frame[18..], &path[..]);
    }
}
