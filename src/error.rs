// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use crate::constant;
use std::io::{Error as IOError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("Lock error: panicked")]
    Lock,
    #[error("IO error: {0:?}")]
    Io(ErrorKind),
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Client not connected")]
    NotConnected,
    #[error("Error response: {}", constant::status_text(*.0))]
    Cip(u8),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl Error {
    pub(crate) fn too_short(what: &str) -> Error {
        Error::InvalidResponse {
            reason: format!("{} reply too short", what),
        }
    }

    /// The status string reported at the `Response` boundary for this
    /// failure. Transport errors collapse onto the two CIP connection
    /// codes; everything else renders its `Display` form.
    pub fn status(&self) -> String {
        match self {
            Error::Connect(_) | Error::Io(_) | Error::NotConnected => {
                constant::status_text(0x01)
            }
            Error::ConnectionLost => constant::status_text(0x07),
            Error::Cip(code) => constant::status_text(*code),
            other => other.to_string(),
        }
    }
}

impl From<IOError> for Error {
    fn from(e: IOError) -> Self {
        Error::Io(e.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(Error::ConnectionLost.status(), "Connection lost");
        assert_eq!(Error::Io(ErrorKind::TimedOut).status(), "Connection failure");
        assert_eq!(Error::Cip(0x05).status(), "Path destination unknown");
        assert_eq!(Error::Cip(0x99).status(), "Unknown error 153");
    }
}
