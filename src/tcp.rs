// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! TCP transport implementation

use crate::constant;
use crate::eip::{self, Hop};
use crate::error::Error;
use crate::transport::Transport as PackTrait;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use rand::random;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;

/// Default EtherNet/IP port
pub const DEFAULT_PORT: u16 = 44818;
/// Default socket timeout, applied to connect, send and receive
pub const TIMEOUT: Duration = Duration::from_secs(5);

// Receive window per discovery reply
const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(500);
const RECV_CHUNK: usize = 4096;

/// a set of options for the connection to one controller
#[derive(Debug, Clone)]
pub struct Options {
    pub ip: String,
    pub port: u16,
    pub processor_slot: u8,
    pub timeout: Duration,
    /// Micro800 controllers take no backplane hop in CIP paths
    pub micro800: bool,
    /// Explicit routing path; `None` means the default backplane hop
    pub route: Option<Vec<Hop>>,
    /// Requested connection size; `None` lets `connect` negotiate
    pub connection_size: Option<u16>,
    pub string_encoding: String,
}

impl Options {
    pub fn new(ip: &str) -> Options {
        Options {
            ip: ip.to_string(),
            port: DEFAULT_PORT,
            processor_slot: 0,
            timeout: TIMEOUT,
            micro800: false,
            route: None,
            connection_size: None,
            string_encoding: "utf-8".to_string(),
        }
    }
}

/// Owns the socket and the EtherNet/IP session with one controller.
///
/// Constructed idle; the socket is opened and the session negotiated by
/// the first call to [`connect`](crate::transport::Transport::connect).
pub struct Transport {
    options: Options,
    stream: Mutex<Option<TcpStream>>,
    context: [u8; 8],
    session_handle: u32,
    ot_connection_id: u32,
    to_connection_id: u32,
    connection_serial: u16,
    sequence: u16,
    negotiated_size: u16,
    registered: bool,
    connected: bool,
}

impl Transport {
    pub fn new(options: Options) -> Transport {
        Transport {
            options,
            stream: Mutex::new(None),
            context: [0u8; 8],
            session_handle: 0,
            ot_connection_id: 0,
            // connection identifiers are drawn per session, they only
            // need to be unlikely to collide, not unpredictable
            to_connection_id: random(),
            connection_serial: random(),
            sequence: 1,
            negotiated_size: constant::STANDARD_CONNECTION_SIZE,
            registered: false,
            connected: false,
        }
    }

    fn open_socket(&mut self) -> Result<(), Error> {
        let address = (self.options.ip.as_str(), self.options.port)
            .to_socket_addrs()
            .map_err(|e| Error::Connect(e.to_string()))?
            .next()
            .ok_or_else(|| Error::Connect(format!("cannot resolve {}", self.options.ip)))?;
        let stream = TcpStream::connect_timeout(&address, self.options.timeout)?;
        stream.set_read_timeout(Some(self.options.timeout))?;
        stream.set_write_timeout(Some(self.options.timeout))?;
        let mut guard = self.stream.lock().map_err(|_| Error::Lock)?;
        *guard = Some(stream);
        Ok(())
    }

    fn register(&mut self) -> Result<(), Error> {
        let frame = eip::register_session(&self.context);
        let reply = self.exchange(&frame)?;
        if reply.len() < 8 {
            return Err(Error::too_short("RegisterSession"));
        }
        self.session_handle = LittleEndian::read_u32(&reply[4..8]);
        self.registered = true;
        trace!(
            "registered session {:#010x} with {}",
            self.session_handle,
            self.options.ip
        );
        Ok(())
    }

    fn forward_open(&mut self, large: bool, size: u16) -> Result<(), Error> {
        let path = eip::connected_path(
            self.options.route.as_deref(),
            self.options.processor_slot,
            self.options.micro800,
        );
        let cip = eip::forward_open(
            large,
            size,
            self.to_connection_id,
            self.connection_serial,
            &path,
        );
        let frame = eip::rr_data(self.session_handle, &self.context, &cip);
        let reply = self.exchange(&frame)?;
        if reply.len() < constant::UNCONNECTED_DATA_OFFSET + 4 {
            return Err(Error::too_short("ForwardOpen"));
        }
        let status = reply[constant::UNCONNECTED_STATUS_OFFSET];
        if status != constant::STATUS_SUCCESS {
            // the session stays registered so a retry at a smaller size
            // skips re-registering
            return Err(Error::Cip(status));
        }
        self.ot_connection_id =
            LittleEndian::read_u32(&reply[constant::UNCONNECTED_DATA_OFFSET..]);
        self.negotiated_size = size;
        self.connected = true;
        debug!("connected to {} with {} byte frames", self.options.ip, size);
        Ok(())
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let result = self.exchange_locked(frame);
        if let Err(Error::Io(_)) | Err(Error::ConnectionLost) = result {
            self.drop_session();
        }
        result
    }

    fn exchange_locked(&self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let mut guard = self.stream.lock().map_err(|_| Error::Lock)?;
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(frame)?;
        Self::read_frame(stream)
    }

    // Length-framed reassembly: keep reading until the 24 byte header
    // plus its advertised payload is buffered
    fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, Error> {
        let mut data = Vec::with_capacity(RECV_CHUNK);
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::ConnectionLost);
            }
            data.extend_from_slice(&chunk[..n]);
            if data.len() >= 4 {
                let total =
                    eip::ENCAP_HEADER_LEN + LittleEndian::read_u16(&data[2..4]) as usize;
                if data.len() >= total {
                    data.truncate(total);
                    return Ok(data);
                }
            }
        }
    }

    fn write_only(&self, frame: &[u8]) -> Result<(), Error> {
        let mut guard = self.stream.lock().map_err(|_| Error::Lock)?;
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(frame)?;
        Ok(())
    }

    // Socket-level failure: all session identifiers become invalid
    fn drop_session(&mut self) {
        if let Ok(mut guard) = self.stream.lock() {
            *guard = None;
        }
        self.registered = false;
        self.connected = false;
        self.session_handle = 0;
        self.ot_connection_id = 0;
    }

    // The counter never takes the value 0, even across wraps
    fn take_sequence(&mut self) -> u16 {
        let current = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        current
    }

    fn teardown(&mut self) {
        if self.connected {
            let path = eip::connected_path(
                self.options.route.as_deref(),
                self.options.processor_slot,
                self.options.micro800,
            );
            let cip = eip::forward_close(self.connection_serial, &path);
            let frame = eip::rr_data(self.session_handle, &self.context, &cip);
            if let Err(e) = self.exchange(&frame) {
                trace!("forward close failed: {}", e);
            }
            self.connected = false;
        }
        if self.registered {
            let frame = eip::unregister_session(self.session_handle, &self.context);
            // the controller closes the socket instead of replying
            if let Err(e) = self.write_only(&frame) {
                trace!("unregister failed: {}", e);
            }
            self.registered = false;
        }
        if let Ok(mut guard) = self.stream.lock() {
            *guard = None;
        }
        self.session_handle = 0;
        self.ot_connection_id = 0;
    }
}

impl PackTrait for Transport {
    fn connect(&mut self) -> Result<(), Error> {
        if self.connected {
            return Ok(());
        }
        if !self.registered {
            self.open_socket()?;
            self.register()?;
        }
        match self.options.connection_size {
            Some(size) => self.forward_open(size > 511, size),
            None => match self.forward_open(true, constant::LARGE_CONNECTION_SIZE) {
                Err(Error::Cip(_)) | Err(Error::InvalidResponse { .. }) => {
                    debug!("large forward open refused, retrying standard");
                    self.forward_open(false, constant::STANDARD_CONNECTION_SIZE)
                }
                other => other,
            },
        }
    }

    fn send_connected(&mut self, cip: &[u8]) -> Result<Vec<u8>, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let sequence = self.take_sequence();
        let frame = eip::unit_data(
            self.session_handle,
            &self.context,
            self.ot_connection_id,
            sequence,
            cip,
        );
        let reply = self.exchange(&frame)?;
        if reply.len() < constant::CONNECTED_DATA_OFFSET {
            return Err(Error::too_short("connected"));
        }
        Ok(reply)
    }

    fn send_unconnected(&mut self, cip: &[u8]) -> Result<Vec<u8>, Error> {
        if !self.registered {
            return Err(Error::NotConnected);
        }
        let frame = eip::rr_data(self.session_handle, &self.context, cip);
        let reply = self.exchange(&frame)?;
        if reply.len() < constant::UNCONNECTED_DATA_OFFSET {
            return Err(Error::too_short("unconnected"));
        }
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_size(&self) -> u16 {
        self.negotiated_size
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn close(&mut self) {
        self.teardown();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Broadcast a ListIdentity request and collect every reply that
/// arrives before the receive window closes
pub(crate) fn identity_broadcast(port: u16) -> Result<Vec<(Vec<u8>, String)>, Error> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(DISCOVERY_TIMEOUT))?;
    let frame = eip::list_identity(&constant::DISCOVERY_CONTEXT);
    socket.send_to(&frame, ("255.255.255.255", port))?;

    let mut replies = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => replies.push((buf[..n].to_vec(), from.ip().to_string())),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                break
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(replies)
}

/// Ask one device for its identity over UDP
pub(crate) fn identity_unicast(
    ip: &str,
    port: u16,
    timeout: Duration,
) -> Result<(Vec<u8>, String), Error> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_read_timeout(Some(timeout))?;
    let frame = eip::list_identity(&constant::DISCOVERY_CONTEXT);
    socket.send_to(&frame, (ip, port))?;
    let mut buf = [0u8; 4096];
    let (n, from) = socket.recv_from(&mut buf)?;
    Ok((buf[..n].to_vec(), from.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport as PackTrait;

    #[test]
    fn test_options_defaults() {
        let options = Options::new("192.168.1.10");
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.processor_slot, 0);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(!options.micro800);
        assert!(options.route.is_none());
        assert!(options.connection_size.is_none());
        assert_eq!(options.string_encoding, "utf-8");
    }

    #[test]
    fn test_sequence_counter_skips_zero() {
        let mut transport = Transport::new(Options::new("127.0.0.1"));
        assert_eq!(transport.take_sequence(), 1);
        assert_eq!(transport.take_sequence(), 2);

        transport.sequence = u16::MAX;
        assert_eq!(transport.take_sequence(), u16::MAX);
        // the wrap lands on 1, never 0
        assert_eq!(transport.take_sequence(), 1);
    }

    #[test]
    fn test_close_is_idempotent_without_a_socket() {
        let mut transport = Transport::new(Options::new("127.0.0.1"));
        transport.close();
        transport.close();
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_send_requires_a_session() {
        let mut transport = Transport::new(Options::new("127.0.0.1"));
        assert!(matches!(
            transport.send_connected(&[0x4C]),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            transport.send_unconnected(&[0x52]),
            Err(Error::NotConnected)
        ));
    }
}
