extern crate logix;
use byteorder::{ByteOrder, LittleEndian};
use logix::client::Client;
use logix::tcp;
use logix::value::PlcValue;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

// A minimal in-process controller: registers one session, refuses the
// large forward open so the client falls back to the standard size,
// then serves reads for a couple of well-known tags.

const SESSION: u32 = 0x0600_BEEF;
const OT_CONNECTION: u32 = 0x2000_0002;

fn encap(command: u16, session: u32, context: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 24];
    LittleEndian::write_u16(&mut frame[0..2], command);
    LittleEndian::write_u16(&mut frame[2..4], payload.len() as u16);
    LittleEndian::write_u32(&mut frame[4..8], session);
    frame[12..20].copy_from_slice(context);
    frame.extend_from_slice(payload);
    frame
}

fn rr_reply(context: &[u8], cip: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 16];
    LittleEndian::write_u16(&mut payload[6..8], 2);
    LittleEndian::write_u16(&mut payload[12..14], 0x00B2);
    LittleEndian::write_u16(&mut payload[14..16], cip.len() as u16);
    payload.extend_from_slice(cip);
    encap(0x006F, SESSION, context, &payload)
}

fn unit_reply(context: &[u8], sequence: u16, cip: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 8];
    LittleEndian::write_u16(&mut payload[6..8], 2);
    payload.extend_from_slice(&[0xA1, 0x00, 0x04, 0x00]);
    let mut b4 = [0u8; 4];
    LittleEndian::write_u32(&mut b4, OT_CONNECTION);
    payload.extend_from_slice(&b4);
    payload.extend_from_slice(&[0xB1, 0x00]);
    let mut b2 = [0u8; 2];
    LittleEndian::write_u16(&mut b2, 2 + cip.len() as u16);
    payload.extend_from_slice(&b2);
    LittleEndian::write_u16(&mut b2, sequence);
    payload.extend_from_slice(&b2);
    payload.extend_from_slice(cip);
    encap(0x0070, SESSION, context, &payload)
}

fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 24];
    stream.read_exact(&mut header).ok()?;
    let length = LittleEndian::read_u16(&header[2..4]) as usize;
    let mut frame = header.to_vec();
    if length > 0 {
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).ok()?;
        frame.extend_from_slice(&payload);
    }
    Some(frame)
}

fn dint_reply(service: u8, v: i32) -> Vec<u8> {
    let mut cip = vec![service | 0x80, 0x00, 0x00, 0x00, 0xC4, 0x00];
    let mut b4 = [0u8; 4];
    LittleEndian::write_i32(&mut b4, v);
    cip.extend_from_slice(&b4);
    cip
}

fn string_reply(service: u8, s: &str) -> Vec<u8> {
    let mut cip = vec![service | 0x80, 0x00, 0x00, 0x00, 0xA0, 0x00, 0xCE, 0x0F];
    let mut b4 = [0u8; 4];
    LittleEndian::write_i32(&mut b4, s.len() as i32);
    cip.extend_from_slice(&b4);
    cip.extend_from_slice(s.as_bytes());
    cip
}

fn serve_read(cip: &[u8]) -> Vec<u8> {
    let service = cip[0];
    if service != 0x4C || cip.len() < 4 || cip[2] != 0x91 {
        return vec![service | 0x80, 0x00, 0x08, 0x00];
    }
    let name_len = cip[3] as usize;
    match &cip[4..4 + name_len] {
        b"HeartBeat" => dint_reply(service, 7),
        b"TextMessage" => string_reply(service, "hi"),
        _ => vec![service | 0x80, 0x00, 0x05, 0x00],
    }
}

fn handle(mut stream: TcpStream) {
    while let Some(frame) = read_frame(&mut stream) {
        let command = LittleEndian::read_u16(&frame[0..2]);
        let context = frame[12..20].to_vec();
        let reply = match command {
            0x0065 => encap(0x0065, SESSION, &context, &[0x01, 0x00, 0x00, 0x00]),
            0x0066 => return,
            0x006F => {
                let cip = &frame[40..];
                let reply_cip = match cip[0] {
                    // large forward open is refused to exercise the
                    // fallback negotiation
                    0x5B => vec![0xDB, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00],
                    0x54 => {
                        let mut r = vec![0xD4, 0x00, 0x00, 0x00];
                        let mut b4 = [0u8; 4];
                        LittleEndian::write_u32(&mut b4, OT_CONNECTION);
                        r.extend_from_slice(&b4);
                        r.extend_from_slice(&[0u8; 6]); // T->O id, serial
                        r
                    }
                    0x4E => vec![0xCE, 0x00, 0x00, 0x00],
                    other => vec![other | 0x80, 0x00, 0x08, 0x00],
                };
                rr_reply(&context, &reply_cip)
            }
            0x0070 => {
                let sequence = LittleEndian::read_u16(&frame[44..46]);
                let reply_cip = serve_read(&frame[46..]);
                unit_reply(&context, sequence, &reply_cip)
            }
            _ => continue,
        };
        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

#[test]
fn test_client_against_mock_controller() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            handle(stream);
        }
    });

    let mut opts = tcp::Options::new("127.0.0.1");
    opts.port = port;
    opts.timeout = Duration::from_secs(2);
    let mut cl = Client::new_tcp(opts);

    let heartbeat = cl.read("HeartBeat").unwrap();
    assert_eq!(heartbeat.status, "Success");
    assert_eq!(heartbeat.value, PlcValue::Dint(7));

    let text = cl.read("TextMessage").unwrap();
    assert_eq!(text.status, "Success");
    assert_eq!(text.value, PlcValue::String("hi".to_string()));

    let missing = cl.read("NoSuchTag").unwrap();
    assert_eq!(missing.status, "Path destination unknown");
    assert_eq!(missing.value, PlcValue::None);

    cl.close();
    server.join().unwrap();
}
