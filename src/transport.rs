// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Transport definition for PLC

use crate::error::Error;
use crate::tcp::Options;

/// an abstract communication used by the client to send requests
/// ## How can I implement `Transport`?
///
/// Types that are [`Transport`] own the session with one controller and
/// return full encapsulated reply frames, so the client can parse CIP
/// status and data at their fixed offsets.
pub trait Transport {
    /// Bring the session up if it is not already: open the socket,
    /// register the session and negotiate a connection. Must be cheap
    /// to call again once connected.
    fn connect(&mut self) -> Result<(), Error>;
    /// Send a CIP service over the connection (SendUnitData) and return
    /// the full reply frame.
    fn send_connected(&mut self, cip: &[u8]) -> Result<Vec<u8>, Error>;
    /// Send a CIP service outside the connection (SendRRData) and
    /// return the full reply frame.
    fn send_unconnected(&mut self, cip: &[u8]) -> Result<Vec<u8>, Error>;
    fn is_connected(&self) -> bool;
    /// The connection size negotiated by `connect`
    fn connection_size(&self) -> u16;
    fn options(&self) -> &Options;
    /// Tear the session down. Must be idempotent and must not fail.
    fn close(&mut self);
}
