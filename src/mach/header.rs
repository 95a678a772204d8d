//! A header contains minimal architecture information, the binary kind, the number of load commands, as well as an endianness hint

use core::fmt;
use scroll::{Endian, Pread, Pwrite, SizeWith};

use crate::error;
use crate::mach::constants::cputype::cpu_type_to_str;

/// Mach Header magic constant
pub const MH_MAGIC: u32 = 0xfeedface;
pub const MH_CIGAM: u32 = 0xcefaedfe;
/// Mach Header magic constant for 64-bit
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

// Constants for the filetype field of the mach_header
/// relocatable object file
pub const MH_OBJECT: u32 = 0x1;
/// demand paged executable file
pub const MH_EXECUTE: u32 = 0x2;
/// core file
pub const MH_CORE: u32 = 0x4;
/// dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;
/// dynamic link editor
pub const MH_DYLINKER: u32 = 0x7;
/// dynamically bound bundle file
pub const MH_BUNDLE: u32 = 0x8;
/// companion file with only debug sections
pub const MH_DSYM: u32 = 0xa;

pub fn filetype_to_str(filetype: u32) -> &'static str {
    match filetype {
        MH_OBJECT => "OBJECT",
        MH_EXECUTE => "EXECUTE",
        MH_CORE => "CORE",
        MH_DYLIB => "DYLIB",
        MH_DYLINKER => "DYLINKER",
        MH_BUNDLE => "BUNDLE",
        MH_DSYM => "DSYM",
        _ => "UNKNOWN FILETYPE",
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
/// The 64-bit mach header, always at offset 0 of an image
pub struct Header64 {
    /// mach magic number identifier
    pub magic: u32,
    /// cpu specifier
    pub cputype: u32,
    /// machine specifier
    pub cpusubtype: u32,
    /// type of file
    pub filetype: u32,
    /// number of load commands
    pub ncmds: u32,
    /// the size of all the load commands
    pub sizeofcmds: u32,
    /// flags
    pub flags: u32,
    pub reserved: u32,
}

pub const SIZEOF_HEADER_64: usize = 32;

impl fmt::Debug for Header64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Header64")
            .field("magic", &format_args!("0x{:x}", self.magic))
            .field("cputype", &cpu_type_to_str(self.cputype))
            .field("cpusubtype", &format_args!("0x{:x}", self.cpusubtype))
            .field("filetype", &filetype_to_str(self.filetype))
            .field("ncmds", &self.ncmds)
            .field("sizeofcmds", &self.sizeofcmds)
            .field("flags", &format_args!("0x{:x}", self.flags))
            .finish()
    }
}

impl Header64 {
    /// Parses the header at the start of `bytes`, which must already be known to be
    /// a 64-bit image in the byte order `le`
    pub fn parse(bytes: &[u8], le: Endian) -> error::Result<Self> {
        if bytes.len() < SIZEOF_HEADER_64 {
            return Err(error::Error::Truncated {
                what: "mach header",
                needed: SIZEOF_HEADER_64,
                len: bytes.len(),
            });
        }
        Ok(bytes.pread_with(0, le)?)
    }

    /// Offset one past the end of the load command region
    pub fn load_commands_end(&self) -> usize {
        SIZEOF_HEADER_64 + self.sizeofcmds as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_little_endian_header() {
        let header = Header64 {
            magic: MH_MAGIC_64,
            cputype: 0x0100000c,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds: 3,
            sizeofcmds: 0x98,
            flags: 0x200085,
            reserved: 0,
        };
        let mut bytes = [0u8; SIZEOF_HEADER_64];
        bytes.pwrite_with(header, 0, scroll::LE).unwrap();
        assert_eq!(&bytes[..4], &[0xcf, 0xfa, 0xed, 0xfe]);
        let parsed = Header64::parse(&bytes, scroll::LE).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.load_commands_end(), 32 + 0x98);
    }

    #[test]
    fn short_header_is_truncated() {
        let bytes = [0xcf, 0xfa, 0xed, 0xfe, 0x0c, 0, 0, 1];
        let err = Header64::parse(&bytes, scroll::LE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedImage);
    }
}
