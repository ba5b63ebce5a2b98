//! Error types shared by both FS2 roles: a `thiserror` enum for
//! in-process propagation, plus a small wire-level error code that both
//! sides agree on independently of their internal error representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while decoding or validating the shared wire
/// protocol (file lists, hello headers, hashes).
#[derive(Error, Debug, Clone)]
pub enum Fs2Error {
    #[error("bad hash length: expected {expected} bytes, got {actual}")]
    BadHashLength { expected: usize, actual: usize },

    #[error("unsupported hash version: {0}")]
    UnsupportedHashVersion(u8),

    #[error("binary file-list decode failed: {0}")]
    BinaryDecode(String),

    #[error("xml file-list decode failed: {0}")]
    XmlDecode(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("port {0} outside permitted range")]
    PortOutOfRange(u16),

    #[error("path escapes share root")]
    PathTraversal,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Fs2Error {
    fn from(e: std::io::Error) -> Self {
        Fs2Error::Io(e.to_string())
    }
}

impl From<quick_xml::DeError> for Fs2Error {
    fn from(e: quick_xml::DeError) -> Self {
        Fs2Error::XmlDecode(e.to_string())
    }
}

impl From<quick_xml::SeError> for Fs2Error {
    fn from(e: quick_xml::SeError) -> Self {
        Fs2Error::XmlDecode(e.to_string())
    }
}

/// Wire-level error code, independent of how either role represents
/// exceptions internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum WireErrorCode {
    Ok = 0,
    BadHeaders = 400,
    Unreachable = 412,
    NotFound = 404,
    Internal = 500,
}
