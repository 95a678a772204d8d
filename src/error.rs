//! A custom simpatch error
//!

use core::fmt;
use core::result;
use std::{error, io};

/// The largest diagnostic, in bytes, handed across the external interface
pub const DIAGNOSTIC_CAPACITY: usize = 1024;

#[non_exhaustive]
#[derive(Debug)]
/// A custom simpatch error
pub enum Error {
    /// The leading magic is not a 64-bit Mach-O or fat magic
    BadMagic(u32),
    /// Recognized, but not something we can patch (32-bit images, fat rejected by policy, ...)
    Unsupported(String),
    /// A header, table or command region extends past the end of the buffer
    Truncated {
        /// What was being read
        what: &'static str,
        /// The end offset the image declares
        needed: usize,
        /// The actual length of the buffer
        len: usize,
    },
    /// The load command table is corrupt in some way
    Malformed(String),
    /// No load command declares a platform we know how to retarget
    MissingPlatform(String),
    /// An error emanating from reading and interpreting bytes
    Scroll(scroll::Error),
    /// An IO based error
    IO(io::Error),
    /// The external signing tool could not be run or reported failure
    Signing(String),
}

/// The classes of failure a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    TruncatedImage,
    CorruptLoadCommand,
    MissingPlatformDeclaration,
    IOFailure,
}

impl Error {
    /// Which class of failure this is
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadMagic(_) | Error::Unsupported(_) => ErrorKind::UnsupportedFormat,
            Error::Truncated { .. } => ErrorKind::TruncatedImage,
            Error::Malformed(_) | Error::Scroll(_) => ErrorKind::CorruptLoadCommand,
            Error::MissingPlatform(_) => ErrorKind::MissingPlatformDeclaration,
            Error::IO(_) | Error::Signing(_) => ErrorKind::IOFailure,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IO(ref io) => Some(io),
            Error::Scroll(ref scroll) => Some(scroll),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::BadMagic(magic) => write!(fmt, "Invalid magic number: 0x{magic:08x}"),
            Error::Unsupported(ref msg) => write!(fmt, "Unsupported image: {msg}"),
            Error::Truncated { what, needed, len } => write!(
                fmt,
                "Truncated image: {what} ends at {needed:#x} but the buffer is only {len:#x} bytes"
            ),
            Error::Malformed(ref msg) => write!(fmt, "Corrupt load command: {msg}"),
            Error::MissingPlatform(ref msg) => {
                write!(fmt, "Missing platform declaration: {msg}")
            }
            Error::Scroll(ref err) => write!(fmt, "Corrupt load command: {err}"),
            Error::IO(ref err) => write!(fmt, "{err}"),
            Error::Signing(ref msg) => write!(fmt, "Signing failed: {msg}"),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Where in the patch pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Parse,
    RewritePlatform,
    ClearEncryption,
    Write,
    Sign,
}

impl fmt::Display for Stage {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Parse => "parse",
            Stage::RewritePlatform => "rewrite platform",
            Stage::ClearEncryption => "clear encryption",
            Stage::Write => "write",
            Stage::Sign => "sign",
        };
        fmt.write_str(name)
    }
}

/// A failure tagged with the stage that produced it
#[derive(Debug)]
pub struct PatchError {
    pub stage: Stage,
    pub error: Error,
}

impl PatchError {
    pub fn new(stage: Stage, error: Error) -> Self {
        PatchError { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Renders `"<stage>: <reason>"`, cut to at most [`DIAGNOSTIC_CAPACITY`] bytes
    pub fn diagnostic(&self) -> String {
        let mut msg = format!("{self}");
        truncate_on_char_boundary(&mut msg, DIAGNOSTIC_CAPACITY);
        msg
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}: {}", self.stage, self.error)
    }
}

impl error::Error for PatchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Extension to tag a `Result` with the stage it came from
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> result::Result<T, PatchError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> result::Result<T, PatchError> {
        self.map_err(|error| PatchError::new(stage, error))
    }
}

fn truncate_on_char_boundary(msg: &mut String, max: usize) {
    if msg.len() <= max {
        return;
    }
    let mut end = max;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg.truncate(end);
}
