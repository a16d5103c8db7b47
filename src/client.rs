// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use crate::constant;
use crate::device::Device;
use crate::eip;
use crate::error::Error;
use crate::tag::{self, ParsedTag, Tag};
use crate::tcp;
use crate::transport::Transport;
use crate::value::{self, PlcValue};
use byteorder::{ByteOrder, LittleEndian};
use chrono::Utc;
use log::{trace, warn};

///! Client allows for communication with Logix family controllers
///
/// Every operation returns a [`Response`]: controller-reported failures
/// land in its `status` string, transport failures come back as `Err`.

/// Outcome of one operation against one tag or object
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub tag_name: Option<String>,
    pub value: PlcValue,
    pub status: String,
}

impl Response {
    fn success(tag_name: Option<String>, value: PlcValue) -> Response {
        Response {
            tag_name,
            value,
            status: constant::status_text(constant::STATUS_SUCCESS),
        }
    }

    fn failure(tag_name: Option<String>, status: String) -> Response {
        Response {
            tag_name,
            value: PlcValue::None,
            status,
        }
    }
}

/// One tag of a batch read
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub name: String,
    pub count: u16,
    pub data_type: Option<u8>,
}

impl ReadRequest {
    pub fn new(name: &str) -> ReadRequest {
        ReadRequest {
            name: name.to_string(),
            count: 1,
            data_type: None,
        }
    }

    pub fn with_count(name: &str, count: u16) -> ReadRequest {
        ReadRequest {
            count,
            ..ReadRequest::new(name)
        }
    }

    pub fn with_type(mut self, data_type: u8) -> ReadRequest {
        self.data_type = Some(data_type);
        self
    }
}

impl From<&str> for ReadRequest {
    fn from(name: &str) -> ReadRequest {
        ReadRequest::new(name)
    }
}

/// One tag of a batch write
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub name: String,
    pub value: PlcValue,
    pub data_type: Option<u8>,
}

impl WriteRequest {
    pub fn new(name: &str, value: PlcValue) -> WriteRequest {
        WriteRequest {
            name: name.to_string(),
            value,
            data_type: None,
        }
    }

    pub fn with_type(mut self, data_type: u8) -> WriteRequest {
        self.data_type = Some(data_type);
        self
    }
}

/// A raw CIP service against an arbitrary class/instance/attribute
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub service: u8,
    pub class: u16,
    pub instance: u16,
    pub attribute: Option<u8>,
    pub data: Vec<u8>,
}

// GetAttributeSingle/SetAttributeSingle path to the wall clock value
const WALL_CLOCK_PATH: [u8; 6] = [
    0x20,
    constant::CLASS_WALL_CLOCK as u8,
    0x24,
    0x01,
    0x30,
    constant::ATTR_WALL_CLOCK_TIME,
];

// Headroom for the encapsulation and multi-service framing when
// packing a batch against the negotiated connection size
const MULTI_OVERHEAD: usize = 64;

pub struct Client<T: Transport> {
    transport: T,
}

impl Client<tcp::Transport> {
    /// A client over the blocking TCP transport. No I/O happens here;
    /// the session comes up on the first operation.
    pub fn new_tcp(options: tcp::Options) -> Client<tcp::Transport> {
        Client::new(tcp::Transport::new(options))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Client<T> {
        Client { transport }
    }

    /// # Examples
    ///
    /// ```no_run
    /// use logix::{client::Client, tcp};
    ///
    /// let mut opts = tcp::Options::new("192.168.1.10");
    /// opts.processor_slot = 1;
    /// let mut cl = Client::new_tcp(opts);
    ///
    /// match cl.read("HeartBeat") {
    ///     Ok(r) => println!("{}: {}", r.status, r.value),
    ///     Err(e) => println!("error: {}", e),
    /// }
    /// ```
    pub fn read(&mut self, name: &str) -> Result<Response, Error> {
        self.read_with(name, 1, None)
    }

    /// Read `count` elements, optionally forcing the CIP data type.
    /// Passing [`value::DWORD`] marks the tag as BOOL-array backing
    /// storage: the element index is translated to its DWORD and the
    /// bit is extracted after the read.
    pub fn read_with(
        &mut self,
        name: &str,
        count: u16,
        data_type: Option<u8>,
    ) -> Result<Response, Error> {
        let parsed = ParsedTag::parse(name)?;
        let frame = read_frame(&parsed, count, data_type)?;
        self.transport.connect()?;
        let reply = self.transport.send_connected(&frame)?;

        let status = reply[constant::CONNECTED_STATUS_OFFSET];
        if status != constant::STATUS_SUCCESS {
            return Ok(Response::failure(
                Some(name.to_string()),
                constant::status_text(status),
            ));
        }
        let encoding = self.transport.options().string_encoding.clone();
        let payload = &reply[constant::CONNECTED_DATA_OFFSET..];
        Ok(
            match decode_typed_payload(payload, &parsed, count, data_type, &encoding) {
                Ok(value) => Response::success(Some(name.to_string()), value),
                Err(e) => Response::failure(Some(name.to_string()), e.status()),
            },
        )
    }

    /// Read several tags in one Multiple Service round trip (or more
    /// when the packed frame would overflow the connection size).
    /// Responses come back in request order.
    pub fn read_multi(&mut self, requests: &[ReadRequest]) -> Result<Vec<Response>, Error> {
        self.transport.connect()?;
        let encoding = self.transport.options().string_encoding.clone();

        let mut results: Vec<Option<Response>> = vec![None; requests.len()];
        let mut sendable = Vec::new();
        let mut frames = Vec::new();
        let mut parsed_tags = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            let built = ParsedTag::parse(&request.name)
                .and_then(|p| read_frame(&p, request.count, request.data_type).map(|f| (p, f)));
            match built {
                Ok((parsed, frame)) => {
                    sendable.push(i);
                    parsed_tags.push(parsed);
                    frames.push(frame);
                }
                Err(e) => {
                    results[i] = Some(Response::failure(Some(request.name.clone()), e.status()))
                }
            }
        }

        for (chunk_start, chunk_end) in self.chunk_frames(&frames) {
            let reply = self.send_multi(&frames[chunk_start..chunk_end])?;
            let subs = parse_multi_reply(&reply, chunk_end - chunk_start);
            for (k, sub) in subs.into_iter().enumerate() {
                let request_index = sendable[chunk_start + k];
                let request = &requests[request_index];
                let name = Some(request.name.clone());
                results[request_index] = Some(match sub {
                    SubReply::Failed(status) => Response::failure(name, status),
                    SubReply::Data(payload) => {
                        match decode_typed_payload(
                            &payload,
                            &parsed_tags[chunk_start + k],
                            request.count,
                            request.data_type,
                            &encoding,
                        ) {
                            Ok(value) => Response::success(name, value),
                            Err(e) => Response::failure(name, e.status()),
                        }
                    }
                    SubReply::Empty => Response::failure(name, "No response".to_string()),
                });
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Response::failure(None, "No response".to_string())))
            .collect())
    }

    /// # Examples
    ///
    /// ```no_run
    /// use logix::{client::Client, tcp, value::PlcValue};
    ///
    /// let mut cl = Client::new_tcp(tcp::Options::new("192.168.1.10"));
    /// match cl.write("Setpoint", PlcValue::Dint(1500)) {
    ///     Ok(r) => println!("{}", r.status),
    ///     Err(e) => println!("error: {}", e),
    /// }
    /// ```
    pub fn write(&mut self, name: &str, value: PlcValue) -> Result<Response, Error> {
        self.write_with(name, value, None)
    }

    pub fn write_with(
        &mut self,
        name: &str,
        value: PlcValue,
        data_type: Option<u8>,
    ) -> Result<Response, Error> {
        let parsed = ParsedTag::parse(name)?;
        let encoding = self.transport.options().string_encoding.clone();
        let frame = write_frame(&parsed, &value, data_type, &encoding)?;
        self.transport.connect()?;
        let reply = self.transport.send_connected(&frame)?;

        let status = reply[constant::CONNECTED_STATUS_OFFSET];
        Ok(if status == constant::STATUS_SUCCESS {
            Response::success(Some(name.to_string()), value)
        } else {
            Response::failure(Some(name.to_string()), constant::status_text(status))
        })
    }

    /// Write several tags in one Multiple Service round trip, in
    /// request order
    pub fn write_multi(&mut self, requests: &[WriteRequest]) -> Result<Vec<Response>, Error> {
        self.transport.connect()?;
        let encoding = self.transport.options().string_encoding.clone();

        let mut results: Vec<Option<Response>> = vec![None; requests.len()];
        let mut sendable = Vec::new();
        let mut frames = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            let built = ParsedTag::parse(&request.name)
                .and_then(|p| write_frame(&p, &request.value, request.data_type, &encoding));
            match built {
                Ok(frame) => {
                    sendable.push(i);
                    frames.push(frame);
                }
                Err(e) => {
                    results[i] = Some(Response::failure(Some(request.name.clone()), e.status()))
                }
            }
        }

        for (chunk_start, chunk_end) in self.chunk_frames(&frames) {
            let reply = self.send_multi(&frames[chunk_start..chunk_end])?;
            let subs = parse_multi_reply(&reply, chunk_end - chunk_start);
            for (k, sub) in subs.into_iter().enumerate() {
                let request_index = sendable[chunk_start + k];
                let request = &requests[request_index];
                let name = Some(request.name.clone());
                results[request_index] = Some(match sub {
                    SubReply::Failed(status) => Response::failure(name, status),
                    SubReply::Data(_) => Response::success(name, request.value.clone()),
                    SubReply::Empty => Response::failure(name, "No response".to_string()),
                });
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Response::failure(None, "No response".to_string())))
            .collect())
    }

    /// Enumerate the controller's symbol table. With `all_tags` the
    /// walk continues into every discovered program scope.
    pub fn get_tag_list(&mut self, all_tags: bool) -> Result<Response, Error> {
        self.transport.connect()?;
        let mut tags = match self.walk_symbols(None) {
            Ok(tags) => tags,
            Err(Error::Cip(code)) => {
                return Ok(Response::failure(None, constant::status_text(code)))
            }
            Err(e) => return Err(e),
        };
        if all_tags {
            let programs: Vec<String> = tags
                .iter()
                .filter(|t| t.name.starts_with("Program:"))
                .map(|t| t.name.clone())
                .collect();
            for program in &programs {
                match self.walk_symbols(Some(program)) {
                    Ok(mut program_tags) => tags.append(&mut program_tags),
                    Err(Error::Cip(code)) => {
                        warn!("skipping {}: {}", program, constant::status_text(code))
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(Response::success(None, PlcValue::Tags(tags)))
    }

    /// Enumerate the tags of one program scope. `program` must carry
    /// its `Program:` qualifier.
    pub fn get_program_tag_list(&mut self, program: &str) -> Result<Response, Error> {
        if !program.starts_with("Program:") {
            return Err(Error::InvalidInput(format!(
                "{:?} is not a Program: reference",
                program
            )));
        }
        self.transport.connect()?;
        Ok(match self.walk_symbols(Some(program)) {
            Ok(tags) => Response::success(None, PlcValue::Tags(tags)),
            Err(Error::Cip(code)) => Response::failure(None, constant::status_text(code)),
            Err(e) => return Err(e),
        })
    }

    /// The names of all programs on the controller
    pub fn get_programs_list(&mut self) -> Result<Response, Error> {
        self.transport.connect()?;
        Ok(match self.walk_symbols(None) {
            Ok(tags) => {
                let programs = tags
                    .into_iter()
                    .filter(|t| t.name.starts_with("Program:"))
                    .map(|t| t.name)
                    .collect();
                Response::success(None, PlcValue::Programs(programs))
            }
            Err(Error::Cip(code)) => Response::failure(None, constant::status_text(code)),
            Err(e) => return Err(e),
        })
    }

    /// The controller wall clock; `raw` returns the microsecond count
    /// instead of a date-time
    pub fn get_plc_time(&mut self, raw: bool) -> Result<Response, Error> {
        self.transport.connect()?;
        let mut frame = vec![constant::GET_ATTRIBUTE_SINGLE, 0x03];
        frame.extend_from_slice(&WALL_CLOCK_PATH);
        let reply = self.transport.send_connected(&frame)?;

        let status = reply[constant::CONNECTED_STATUS_OFFSET];
        if status != constant::STATUS_SUCCESS {
            return Ok(Response::failure(None, constant::status_text(status)));
        }
        if reply.len() < constant::CONNECTED_DATA_OFFSET + 8 {
            return Ok(Response::failure(
                None,
                Error::too_short("wall clock").status(),
            ));
        }
        let micros = LittleEndian::read_i64(&reply[constant::CONNECTED_DATA_OFFSET..]);
        let value = if raw {
            PlcValue::Lint(micros)
        } else {
            match chrono::DateTime::from_timestamp_micros(micros) {
                Some(datetime) => PlcValue::DateTime(datetime),
                None => PlcValue::Lint(micros),
            }
        };
        Ok(Response::success(None, value))
    }

    /// Set the controller wall clock to the host's current UTC time
    pub fn set_plc_time(&mut self) -> Result<Response, Error> {
        self.transport.connect()?;
        let now = Utc::now();
        let mut frame = vec![constant::SET_ATTRIBUTE_SINGLE, 0x03];
        frame.extend_from_slice(&WALL_CLOCK_PATH);
        let mut b8 = [0u8; 8];
        LittleEndian::write_i64(&mut b8, now.timestamp_micros());
        frame.extend_from_slice(&b8);
        let reply = self.transport.send_connected(&frame)?;

        let status = reply[constant::CONNECTED_STATUS_OFFSET];
        Ok(if status == constant::STATUS_SUCCESS {
            Response::success(None, PlcValue::DateTime(now))
        } else {
            Response::failure(None, constant::status_text(status))
        })
    }

    /// Broadcast ListIdentity and report every EtherNet/IP device that
    /// answered within the receive window
    pub fn discover(&mut self) -> Result<Response, Error> {
        let port = self.transport.options().port;
        let mut devices = Vec::new();
        for (frame, ip) in tcp::identity_broadcast(port)? {
            // replies are matched on the echoed sender context
            if frame.len() < 20 || frame[12..17] != constant::DISCOVERY_CONTEXT[..5] {
                continue;
            }
            match Device::from_identity(&frame, Some(ip)) {
                Ok(device) => devices.push(device),
                Err(e) => trace!("discarding malformed identity: {}", e),
            }
        }
        Ok(Response::success(None, PlcValue::Devices(devices)))
    }

    /// The identity of the controller this client points at
    pub fn get_device_properties(&mut self) -> Result<Response, Error> {
        let (ip, port, timeout) = {
            let options = self.transport.options();
            (options.ip.clone(), options.port, options.timeout)
        };
        let (frame, from) = tcp::identity_unicast(&ip, port, timeout)?;
        Ok(match Device::from_identity(&frame, Some(from)) {
            Ok(device) => Response::success(None, PlcValue::Device(device)),
            Err(e) => Response::failure(None, e.status()),
        })
    }

    /// Identity of the module in `slot` of the local backplane, fetched
    /// with an unconnected GetAttributesAll routed to that slot
    pub fn get_module_properties(&mut self, slot: u8) -> Result<Response, Error> {
        self.transport.connect()?;
        let embedded = [
            constant::GET_ATTRIBUTES_ALL,
            0x02,
            0x20,
            constant::CLASS_IDENTITY as u8,
            0x24,
            0x01,
        ];
        let route = [0x01, slot];
        let cip = eip::unconnected_send(&embedded, &route);
        let reply = self.transport.send_unconnected(&cip)?;

        let status = reply[constant::UNCONNECTED_STATUS_OFFSET];
        if status != constant::STATUS_SUCCESS {
            return Ok(Response::failure(None, constant::status_text(status)));
        }
        Ok(
            match Device::from_attributes(&reply[constant::UNCONNECTED_DATA_OFFSET..], None) {
                Ok(device) => Response::success(None, PlcValue::Device(device)),
                Err(e) => Response::failure(None, e.status()),
            },
        )
    }

    /// Send an arbitrary CIP service and hand back the raw reply data
    pub fn message(&mut self, request: &MessageRequest) -> Result<Response, Error> {
        self.transport.connect()?;
        let mut path = Vec::new();
        if request.class < 256 {
            path.extend_from_slice(&[0x20, request.class as u8]);
        } else {
            let mut b2 = [0u8; 2];
            LittleEndian::write_u16(&mut b2, request.class);
            path.push(0x21);
            path.push(0x00);
            path.extend_from_slice(&b2);
        }
        if request.instance < 256 {
            path.extend_from_slice(&[0x24, request.instance as u8]);
        } else {
            let mut b2 = [0u8; 2];
            LittleEndian::write_u16(&mut b2, request.instance);
            path.push(0x25);
            path.push(0x00);
            path.extend_from_slice(&b2);
        }
        if let Some(attribute) = request.attribute {
            path.extend_from_slice(&[0x30, attribute]);
        }
        let mut frame = vec![request.service, (path.len() / 2) as u8];
        frame.extend_from_slice(&path);
        frame.extend_from_slice(&request.data);
        let reply = self.transport.send_connected(&frame)?;

        let status = reply[constant::CONNECTED_STATUS_OFFSET];
        let data = PlcValue::Raw(reply[constant::CONNECTED_DATA_OFFSET..].to_vec());
        Ok(if status == constant::STATUS_SUCCESS {
            Response::success(None, data)
        } else {
            Response {
                tag_name: None,
                value: data,
                status: constant::status_text(status),
            }
        })
    }

    /// Tear the session down. Safe to call repeatedly, also runs when
    /// the transport is dropped.
    pub fn close(&mut self) {
        self.transport.close();
    }

    // Walk the Symbol class with an advancing instance cursor while the
    // controller keeps reporting a partial transfer
    fn walk_symbols(&mut self, program: Option<&str>) -> Result<Vec<Tag>, Error> {
        let mut tags: Vec<Tag> = Vec::new();
        let mut cursor: u32 = 0;
        loop {
            let frame = tag_list_frame(program, cursor)?;
            let reply = self.transport.send_connected(&frame)?;
            let status = reply[constant::CONNECTED_STATUS_OFFSET];
            if status != constant::STATUS_SUCCESS && status != constant::STATUS_PARTIAL_TRANSFER {
                return Err(Error::Cip(status));
            }
            let (mut page, last_instance) =
                tag::parse_tag_list(&reply[constant::CONNECTED_DATA_OFFSET..], program)?;
            tags.append(&mut page);
            trace!(
                "symbol walk at instance {}, {} tags so far",
                cursor,
                tags.len()
            );
            if status == constant::STATUS_SUCCESS {
                break;
            }
            cursor = last_instance + 1;
            if cursor > u16::MAX as u32 {
                warn!("symbol instance cursor overflowed, stopping walk");
                break;
            }
        }
        Ok(tags)
    }

    // Greedy packing: as many service frames per round trip as the
    // negotiated connection size allows, always at least one
    fn chunk_frames(&self, frames: &[Vec<u8>]) -> Vec<(usize, usize)> {
        let limit = (self.transport.connection_size() as usize).saturating_sub(MULTI_OVERHEAD);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < frames.len() {
            let mut end = start;
            let mut payload = 0;
            while end < frames.len() {
                let count = end - start + 1;
                let packed = 8 + 2 * count + payload + frames[end].len();
                if end > start && packed > limit {
                    break;
                }
                payload += frames[end].len();
                end += 1;
            }
            chunks.push((start, end));
            start = end;
        }
        chunks
    }

    fn send_multi(&mut self, frames: &[Vec<u8>]) -> Result<Vec<u8>, Error> {
        let mut cip = vec![
            constant::MULTIPLE_SERVICE,
            0x02,
            0x20,
            constant::CLASS_MESSAGE_ROUTER as u8,
            0x24,
            0x01,
        ];
        let mut b2 = [0u8; 2];
        LittleEndian::write_u16(&mut b2, frames.len() as u16);
        cip.extend_from_slice(&b2);
        // offsets are measured from the service-count field
        let mut offset = 2 + 2 * frames.len();
        for frame in frames {
            LittleEndian::write_u16(&mut b2, offset as u16);
            cip.extend_from_slice(&b2);
            offset += frame.len();
        }
        for frame in frames {
            cip.extend_from_slice(frame);
        }
        self.transport.send_connected(&cip)
    }
}

enum SubReply {
    /// Service data past the embedded reply header
    Data(Vec<u8>),
    Failed(String),
    /// The controller answered fewer services than were asked
    Empty,
}

// Split a Multiple Service reply into its embedded replies. The offset
// table is relative to the reply-count field, which itself sits at the
// connected data offset.
fn parse_multi_reply(reply: &[u8], expected: usize) -> Vec<SubReply> {
    let status = reply[constant::CONNECTED_STATUS_OFFSET];
    if status != constant::STATUS_SUCCESS {
        // a batch-wide failure is inherited by every tag
        let text = constant::status_text(status);
        return (0..expected).map(|_| SubReply::Failed(text.clone())).collect();
    }

    let data = &reply[constant::CONNECTED_DATA_OFFSET..];
    if data.len() < 2 {
        return (0..expected).map(|_| SubReply::Empty).collect();
    }
    let reply_count = LittleEndian::read_u16(&data[0..2]) as usize;
    let available = reply_count.min(expected);
    if data.len() < 2 + 2 * reply_count {
        return (0..expected).map(|_| SubReply::Empty).collect();
    }

    let mut offsets = Vec::with_capacity(reply_count);
    for i in 0..reply_count {
        offsets.push(LittleEndian::read_u16(&data[2 + 2 * i..]) as usize);
    }

    let mut subs = Vec::with_capacity(expected);
    for i in 0..available {
        let start = offsets[i];
        let end = if i + 1 < reply_count {
            offsets[i + 1].min(data.len())
        } else {
            data.len()
        };
        if start + 4 > end {
            subs.push(SubReply::Failed(
                Error::too_short("embedded service").status(),
            ));
            continue;
        }
        let sub = &data[start..end];
        let sub_status = sub[2];
        let additional = sub[3] as usize;
        if sub_status != constant::STATUS_SUCCESS {
            subs.push(SubReply::Failed(constant::status_text(sub_status)));
        } else if 4 + 2 * additional > sub.len() {
            subs.push(SubReply::Failed(
                Error::too_short("embedded service").status(),
            ));
        } else {
            subs.push(SubReply::Data(sub[4 + 2 * additional..].to_vec()));
        }
    }
    for _ in available..expected {
        subs.push(SubReply::Empty);
    }
    subs
}

fn read_frame(parsed: &ParsedTag, count: u16, data_type: Option<u8>) -> Result<Vec<u8>, Error> {
    let ioi = parsed.ioi(data_type)?;
    let mut frame = Vec::with_capacity(4 + ioi.len());
    frame.push(constant::READ_TAG);
    frame.push((ioi.len() / 2) as u8);
    frame.extend_from_slice(&ioi);
    let mut b2 = [0u8; 2];
    LittleEndian::write_u16(&mut b2, count);
    frame.extend_from_slice(&b2);
    Ok(frame)
}

fn write_frame(
    parsed: &ParsedTag,
    value: &PlcValue,
    data_type: Option<u8>,
    encoding: &str,
) -> Result<Vec<u8>, Error> {
    let code = data_type.unwrap_or_else(|| value.guess_type());

    // bits cannot be written directly, they go through OR/AND masks on
    // their backing word
    if parsed.bit_index.is_some()
        || (code == value::DWORD && !parsed.array_indices.is_empty())
    {
        return rmw_frame(parsed, value, data_type);
    }

    let ioi = parsed.ioi(Some(code))?;
    let mut frame = Vec::with_capacity(8 + ioi.len());
    frame.push(constant::WRITE_TAG);
    frame.push((ioi.len() / 2) as u8);
    frame.extend_from_slice(&ioi);

    if code == value::STRING || code == value::STRUCT {
        // struct write: type, handle size, then the STRING handle
        frame.push(value::STRUCT);
        frame.push(0x02);
        let mut b2 = [0u8; 2];
        LittleEndian::write_u16(&mut b2, value::STRING_HANDLE);
        frame.extend_from_slice(&b2);
    } else {
        frame.push(code);
        frame.push(0x00);
    }

    let (count, data) = match value {
        PlcValue::List(items) => {
            let mut data = Vec::new();
            for item in items {
                data.extend_from_slice(&value::encode(item, code, encoding)?);
            }
            (items.len() as u16, data)
        }
        single => (1u16, value::encode(single, code, encoding)?),
    };
    let mut b2 = [0u8; 2];
    LittleEndian::write_u16(&mut b2, count);
    frame.extend_from_slice(&b2);
    frame.extend_from_slice(&data);
    Ok(frame)
}

// ReadModifyWrite with OR/AND masks sized to the backing word
fn rmw_frame(
    parsed: &ParsedTag,
    value: &PlcValue,
    data_type: Option<u8>,
) -> Result<Vec<u8>, Error> {
    let set = value
        .as_bool()
        .ok_or_else(|| Error::InvalidInput(format!("bit writes take a boolean, got {}", value)))?;
    let bit = match parsed.bit_index {
        Some(bit) => bit,
        None => tag::bit_within_dword(parsed.array_indices[0]),
    };
    // mask width follows the declared type; DINT-sized otherwise, or
    // LINT-sized when the bit cannot fit in 32 bits
    let size = match data_type.map(value::type_size) {
        Some(size) if size > 0 => size,
        _ => {
            if bit < 32 {
                4
            } else {
                8
            }
        }
    };
    if bit as usize >= size * 8 {
        return Err(Error::InvalidInput(format!(
            "bit {} does not fit a {} byte value",
            bit, size
        )));
    }

    let or_mask: u64 = if set { 1u64 << bit } else { 0 };
    let and_mask: u64 = if set { u64::MAX } else { !(1u64 << bit) };

    let ioi = parsed.ioi(data_type)?;
    let mut frame = Vec::with_capacity(8 + ioi.len() + 2 * size);
    frame.push(constant::READ_MODIFY_WRITE);
    frame.push((ioi.len() / 2) as u8);
    frame.extend_from_slice(&ioi);
    let mut b2 = [0u8; 2];
    LittleEndian::write_u16(&mut b2, size as u16);
    frame.extend_from_slice(&b2);
    let mut b8 = [0u8; 8];
    LittleEndian::write_u64(&mut b8, or_mask);
    frame.extend_from_slice(&b8[..size]);
    LittleEndian::write_u64(&mut b8, and_mask);
    frame.extend_from_slice(&b8[..size]);
    Ok(frame)
}

// Service data -> typed value: a type byte, a reserved byte, then the
// value bytes; structs carry a handle word ahead of their body
fn decode_typed_payload(
    data: &[u8],
    parsed: &ParsedTag,
    count: u16,
    data_type: Option<u8>,
    encoding: &str,
) -> Result<PlcValue, Error> {
    if data.len() < 2 {
        return Err(Error::too_short("read"));
    }
    let mut type_code = data[0];
    let mut body = &data[2..];
    if type_code == value::STRUCT {
        if body.len() < 2 {
            return Err(Error::too_short("read"));
        }
        let handle = LittleEndian::read_u16(body);
        body = &body[2..];
        if handle == value::STRING_HANDLE {
            type_code = value::STRING;
        } else {
            // unknown UDT: surface the raw body
            return Ok(PlcValue::Raw(body.to_vec()));
        }
    }

    if count <= 1 {
        let decoded = value::decode(body, type_code, encoding)?;
        return Ok(apply_bit_mask(decoded, parsed, data_type));
    }

    let stride = value::type_size(type_code);
    if stride == 0 {
        return Ok(PlcValue::Raw(body.to_vec()));
    }
    let mut items = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let offset = i * stride;
        if offset >= body.len() {
            return Err(Error::too_short("array read"));
        }
        items.push(value::decode(&body[offset..], type_code, encoding)?);
    }
    Ok(PlcValue::List(items))
}

// Bit-of-word reads and BOOL-array element reads resolve to a bool
// after the backing word arrives
fn apply_bit_mask(decoded: PlcValue, parsed: &ParsedTag, data_type: Option<u8>) -> PlcValue {
    if let Some(bit) = parsed.bit_index {
        if let Some(word) = decoded.as_i64() {
            return PlcValue::Bool((word >> bit) & 1 == 1);
        }
    }
    if data_type == Some(value::DWORD) && !parsed.array_indices.is_empty() {
        if let Some(word) = decoded.as_i64() {
            let bit = tag::bit_within_dword(parsed.array_indices[0]);
            return PlcValue::Bool((word >> bit) & 1 == 1);
        }
    }
    decoded
}

fn tag_list_frame(program: Option<&str>, instance: u32) -> Result<Vec<u8>, Error> {
    let mut path = Vec::new();
    if let Some(program) = program {
        tag::symbolic_segment(&mut path, program)?;
    }
    path.extend_from_slice(&[0x20, constant::CLASS_SYMBOL as u8]);
    if instance < 256 {
        path.extend_from_slice(&[0x24, instance as u8]);
    } else {
        let mut b2 = [0u8; 2];
        LittleEndian::write_u16(&mut b2, instance as u16);
        path.push(0x25);
        path.push(0x00);
        path.extend_from_slice(&b2);
    }
    let mut frame = vec![constant::GET_INSTANCE_ATTRIBUTE_LIST, (path.len() / 2) as u8];
    frame.extend_from_slice(&path);
    // three attributes: symbol name, symbol type, dimension sizes
    frame.extend_from_slice(&[0x03, 0x00, 0x01, 0x00, 0x02, 0x00, 0x08, 0x00]);
    Ok(frame)
}
