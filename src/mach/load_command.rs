//! Load commands tell the kernel and dynamic linker anything from how to load this binary into memory, what the entry point is, apple specific information, to which libraries it requires for dynamic linking
//!
//! Only the commands that say which platform an image targets and whether it is
//! encrypted are decoded; every other command is carried as its bare header.

use core::fmt::{self, Display};
use scroll::{Endian, Pread, Pwrite, SizeWith};

use crate::error;

///////////////////////////////////////
// Load Commands from mach-o/loader.h
// with some rusty additions
//////////////////////////////////////

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
/// Occurs at the beginning of every load command to serve as a sort of tagged union/enum discriminant
pub struct LoadCommandHeader {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl Display for LoadCommandHeader {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "LoadCommandHeader: {} size: {}",
            cmd_to_str(self.cmd),
            self.cmdsize
        )
    }
}

pub const SIZEOF_LOAD_COMMAND: usize = 8;

/// The encryption_info_command contains the file offset and size of an
/// of an encrypted segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct EncryptionInfoCommand32 {
    /// LC_ENCRYPTION_INFO
    pub cmd: u32,
    /// sizeof(struct encryption_info_command)
    pub cmdsize: u32,
    /// file offset of encrypted range
    pub cryptoff: u32,
    /// file size of encrypted range
    pub cryptsize: u32,
    /// which enryption system, 0 means not-encrypted yet
    pub cryptid: u32,
}

pub const SIZEOF_ENCRYPTION_INFO_COMMAND_32: usize = 20;

/// The encryption_info_command_64 contains the file offset and size of an
/// of an encrypted segment (for use in x86_64 targets).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct EncryptionInfoCommand64 {
    /// LC_ENCRYPTION_INFO_64
    pub cmd: u32,
    /// sizeof(struct encryption_info_command_64)
    pub cmdsize: u32,
    /// file offset of encrypted range
    pub cryptoff: u32,
    /// file size of encrypted range
    pub cryptsize: u32,
    /// which enryption system, 0 means not-encrypted yet
    pub cryptid: u32,
    /// padding to make this struct's size a multiple of 8 bytes
    pub pad: u32,
}

pub const SIZEOF_ENCRYPTION_INFO_COMMAND_64: usize = 24;

// field offsets shared by both encryption_info variants
pub const ENCRYPTION_INFO_CRYPTOFF_OFFSET: usize = 8;
pub const ENCRYPTION_INFO_CRYPTSIZE_OFFSET: usize = 12;
pub const ENCRYPTION_INFO_CRYPTID_OFFSET: usize = 16;

/// The version_min_command contains the min OS version on which this
/// binary was built to run.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct VersionMinCommand {
    /// LC_VERSION_MIN_MACOSX, LC_VERSION_MIN_IPHONEOS, LC_VERSION_MIN_TVOS, or LC_VERSION_MIN_WATCHOS.
    pub cmd: u32,
    pub cmdsize: u32,
    /// X.Y.Z is encoded in nibbles xxxx.yy.zz
    pub version: u32,
    /// X.Y.Z is encoded in nibbles xxxx.yy.zz
    pub sdk: u32,
}

pub const SIZEOF_VERSION_MIN_COMMAND: usize = 16;

/// The build_version_command contains the min OS version on which this
/// binary was built to run for its platform.  The list of known platforms and
/// tool values following it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct BuildVersionCommand {
    /// LC_BUILD_VERSION
    pub cmd: u32,
    pub cmdsize: u32,
    /// platform
    pub platform: u32,
    /// X.Y.Z is encoded in nibbles xxxx.yy.zz
    pub minos: u32,
    /// X.Y.Z is encoded in nibbles xxxx.yy.zz
    pub sdk: u32,
    /// number of tool entries following this
    pub ntools: u32,
}

pub const SIZEOF_BUILD_VERSION_COMMAND: usize = 24;
pub const BUILD_VERSION_PLATFORM_OFFSET: usize = 8;

/// Build tool version
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct BuildToolVersion {
    /// enum for the tool
    pub tool: u32,
    /// version number of the tool
    pub version: u32,
}

pub const SIZEOF_BUILD_TOOL_VERSION: usize = 8;

///////////////////////////////////////
// Constants, et. al
///////////////////////////////////////

pub const LC_REQ_DYLD: u32 = 0x80000000;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_LOAD_DYLINKER: u32 = 0xe;
pub const LC_ID_DYLINKER: u32 = 0xf;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1b;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_SOURCE_VERSION: u32 = 0x2A;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;

pub const PLATFORM_MACOS: u32 = 1;
pub const PLATFORM_IOS: u32 = 2;
pub const PLATFORM_TVOS: u32 = 3;
pub const PLATFORM_WATCHOS: u32 = 4;
pub const PLATFORM_BRIDGEOS: u32 = 5;
pub const PLATFORM_MACCATALYST: u32 = 6;
pub const PLATFORM_IOSSIMULATOR: u32 = 7;
pub const PLATFORM_TVOSSIMULATOR: u32 = 8;
pub const PLATFORM_WATCHOSSIMULATOR: u32 = 9;
pub const PLATFORM_DRIVERKIT: u32 = 10;
pub const PLATFORM_VISIONOS: u32 = 11;
pub const PLATFORM_VISIONOSSIMULATOR: u32 = 12;

pub const TOOL_CLANG: u32 = 1;
pub const TOOL_SWIFT: u32 = 2;
pub const TOOL_LD: u32 = 3;

pub fn cmd_to_str(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_UUID => "LC_UUID",
        LC_RPATH => "LC_RPATH",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_DYLD_INFO => "LC_DYLD_INFO",
        LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_MAIN => "LC_MAIN",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        _ => "LC_UNKNOWN",
    }
}

/// The platforms an `LC_BUILD_VERSION` can name
#[non_exhaustive]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Macos = PLATFORM_MACOS,
    Ios = PLATFORM_IOS,
    Tvos = PLATFORM_TVOS,
    Watchos = PLATFORM_WATCHOS,
    Bridgeos = PLATFORM_BRIDGEOS,
    MacCatalyst = PLATFORM_MACCATALYST,
    IosSimulator = PLATFORM_IOSSIMULATOR,
    TvosSimulator = PLATFORM_TVOSSIMULATOR,
    WatchosSimulator = PLATFORM_WATCHOSSIMULATOR,
    Driverkit = PLATFORM_DRIVERKIT,
    Visionos = PLATFORM_VISIONOS,
    VisionosSimulator = PLATFORM_VISIONOSSIMULATOR,
}

impl Platform {
    pub fn from_raw(platform: u32) -> Option<Self> {
        Some(match platform {
            PLATFORM_MACOS => Platform::Macos,
            PLATFORM_IOS => Platform::Ios,
            PLATFORM_TVOS => Platform::Tvos,
            PLATFORM_WATCHOS => Platform::Watchos,
            PLATFORM_BRIDGEOS => Platform::Bridgeos,
            PLATFORM_MACCATALYST => Platform::MacCatalyst,
            PLATFORM_IOSSIMULATOR => Platform::IosSimulator,
            PLATFORM_TVOSSIMULATOR => Platform::TvosSimulator,
            PLATFORM_WATCHOSSIMULATOR => Platform::WatchosSimulator,
            PLATFORM_DRIVERKIT => Platform::Driverkit,
            PLATFORM_VISIONOS => Platform::Visionos,
            PLATFORM_VISIONOSSIMULATOR => Platform::VisionosSimulator,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// The simulator counterpart of a device platform; `None` when the simulator
    /// runtime has no equivalent (or `self` already is a simulator)
    pub fn simulator(self) -> Option<Self> {
        match self {
            Platform::Ios => Some(Platform::IosSimulator),
            Platform::Tvos => Some(Platform::TvosSimulator),
            Platform::Watchos => Some(Platform::WatchosSimulator),
            Platform::Visionos => Some(Platform::VisionosSimulator),
            _ => None,
        }
    }

    pub fn is_simulator(self) -> bool {
        matches!(
            self,
            Platform::IosSimulator
                | Platform::TvosSimulator
                | Platform::WatchosSimulator
                | Platform::VisionosSimulator
        )
    }
}

impl Display for Platform {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Platform::Macos => "macOS",
            Platform::Ios => "iOS",
            Platform::Tvos => "tvOS",
            Platform::Watchos => "watchOS",
            Platform::Bridgeos => "bridgeOS",
            Platform::MacCatalyst => "Mac Catalyst",
            Platform::IosSimulator => "iOS Simulator",
            Platform::TvosSimulator => "tvOS Simulator",
            Platform::WatchosSimulator => "watchOS Simulator",
            Platform::Driverkit => "DriverKit",
            Platform::Visionos => "visionOS",
            Platform::VisionosSimulator => "visionOS Simulator",
        };
        fmt.write_str(name)
    }
}

/// An enumeration of platforms currently identifiable within a version_min_command.
#[non_exhaustive]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionMinPlatform {
    Macos = LC_VERSION_MIN_MACOSX,
    Iphoneos = LC_VERSION_MIN_IPHONEOS,
    Tvos = LC_VERSION_MIN_TVOS,
    Watchos = LC_VERSION_MIN_WATCHOS,
}

impl TryFrom<u32> for VersionMinPlatform {
    type Error = error::Error;

    fn try_from(cmd: u32) -> Result<Self, Self::Error> {
        Ok(match cmd {
            LC_VERSION_MIN_MACOSX => VersionMinPlatform::Macos,
            LC_VERSION_MIN_IPHONEOS => VersionMinPlatform::Iphoneos,
            LC_VERSION_MIN_TVOS => VersionMinPlatform::Tvos,
            LC_VERSION_MIN_WATCHOS => VersionMinPlatform::Watchos,
            _ => {
                return Err(error::Error::Malformed(format!(
                    "unknown platform for load command: {cmd:x}"
                )));
            }
        })
    }
}

impl VersionMinPlatform {
    /// The `LC_BUILD_VERSION` platform this legacy command stands for
    pub fn platform(self) -> Platform {
        match self {
            VersionMinPlatform::Macos => Platform::Macos,
            VersionMinPlatform::Iphoneos => Platform::Ios,
            VersionMinPlatform::Tvos => Platform::Tvos,
            VersionMinPlatform::Watchos => Platform::Watchos,
        }
    }
}

///////////////////////////////////////////
// Typesafe Command Variants
///////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVariant {
    BuildVersion(BuildVersionCommand),
    VersionMin(VersionMinPlatform, VersionMinCommand),
    EncryptionInfo32(EncryptionInfoCommand32),
    EncryptionInfo64(EncryptionInfoCommand64),
    Unimplemented(LoadCommandHeader),
}

impl CommandVariant {
    /// Decodes the command occupying exactly `bytes`, which starts with its
    /// already validated `header`
    pub fn parse(bytes: &[u8], header: LoadCommandHeader, le: Endian) -> error::Result<Self> {
        use self::CommandVariant::*;
        let require = |size: usize| -> error::Result<()> {
            if bytes.len() < size {
                Err(error::Error::Malformed(format!(
                    "{} has size {} but needs at least {}",
                    cmd_to_str(header.cmd),
                    bytes.len(),
                    size
                )))
            } else {
                Ok(())
            }
        };
        match header.cmd {
            LC_BUILD_VERSION => {
                require(SIZEOF_BUILD_VERSION_COMMAND)?;
                let comm: BuildVersionCommand = bytes.pread_with(0, le)?;
                let tools_end = (comm.ntools as usize)
                    .checked_mul(SIZEOF_BUILD_TOOL_VERSION)
                    .and_then(|size| size.checked_add(SIZEOF_BUILD_VERSION_COMMAND));
                match tools_end {
                    Some(end) if end <= bytes.len() => Ok(BuildVersion(comm)),
                    _ => Err(error::Error::Malformed(format!(
                        "LC_BUILD_VERSION lists {} tools which do not fit in its {} bytes",
                        comm.ntools,
                        bytes.len()
                    ))),
                }
            }
            LC_VERSION_MIN_MACOSX
            | LC_VERSION_MIN_IPHONEOS
            | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => {
                require(SIZEOF_VERSION_MIN_COMMAND)?;
                let platform = VersionMinPlatform::try_from(header.cmd)?;
                Ok(VersionMin(platform, bytes.pread_with(0, le)?))
            }
            LC_ENCRYPTION_INFO => {
                require(SIZEOF_ENCRYPTION_INFO_COMMAND_32)?;
                Ok(EncryptionInfo32(bytes.pread_with(0, le)?))
            }
            LC_ENCRYPTION_INFO_64 => {
                require(SIZEOF_ENCRYPTION_INFO_COMMAND_64)?;
                Ok(EncryptionInfo64(bytes.pread_with(0, le)?))
            }
            _ => Ok(Unimplemented(header)),
        }
    }

    pub fn cmdsize(&self) -> usize {
        use self::CommandVariant::*;
        let cmdsize = match *self {
            BuildVersion(comm) => comm.cmdsize,
            VersionMin(_, comm) => comm.cmdsize,
            EncryptionInfo32(comm) => comm.cmdsize,
            EncryptionInfo64(comm) => comm.cmdsize,
            Unimplemented(comm) => comm.cmdsize,
        };
        cmdsize as usize
    }

    pub fn cmd(&self) -> u32 {
        use self::CommandVariant::*;
        match *self {
            BuildVersion(comm) => comm.cmd,
            VersionMin(_, comm) => comm.cmd,
            EncryptionInfo32(comm) => comm.cmd,
            EncryptionInfo64(comm) => comm.cmd,
            Unimplemented(comm) => comm.cmd,
        }
    }
}

/// A load command and where it lives in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommand {
    /// Offset of the command from the start of the image
    pub offset: usize,
    pub command: CommandVariant,
}

impl LoadCommand {
    /// Parses the `index`-th command at `*offset`, which must fit before `end`,
    /// and advances `offset` past it
    pub fn parse(
        bytes: &[u8],
        offset: &mut usize,
        end: usize,
        index: u32,
        le: Endian,
    ) -> error::Result<Self> {
        let start = *offset;
        if start + SIZEOF_LOAD_COMMAND > end {
            return Err(error::Error::Malformed(format!(
                "load command {index} at {start:#x} does not fit before the end of the load commands at {end:#x}"
            )));
        }
        let header: LoadCommandHeader = bytes.pread_with(start, le)?;
        let size = header.cmdsize as usize;
        if size < SIZEOF_LOAD_COMMAND {
            return Err(error::Error::Malformed(format!(
                "load command {index} ({}) at {start:#x} declares size {size}",
                cmd_to_str(header.cmd)
            )));
        }
        if start + size > end {
            return Err(error::Error::Malformed(format!(
                "load command {index} ({}) at {start:#x} with size {size:#x} overruns the end of the load commands at {end:#x}",
                cmd_to_str(header.cmd)
            )));
        }
        let command = CommandVariant::parse(&bytes[start..start + size], header, le)?;
        *offset = start + size;
        Ok(LoadCommand {
            offset: start,
            command,
        })
    }
}

/// Lazily walks a load command table, stopping at the first corrupt command
pub struct LoadCommandIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    end: usize,
    index: u32,
    ncmds: u32,
    le: Endian,
    done: bool,
}

impl<'a> LoadCommandIter<'a> {
    /// `bytes` is the whole image, the table spans `start..end`
    pub fn new(bytes: &'a [u8], start: usize, end: usize, ncmds: u32, le: Endian) -> Self {
        LoadCommandIter {
            bytes,
            offset: start,
            end,
            index: 0,
            ncmds,
            le,
            done: false,
        }
    }
}

impl Iterator for LoadCommandIter<'_> {
    type Item = error::Result<LoadCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.index == self.ncmds {
            self.done = true;
            if self.offset != self.end {
                return Some(Err(error::Error::Malformed(format!(
                    "{} load commands end at {:#x} but the header declares they end at {:#x}",
                    self.ncmds, self.offset, self.end
                ))));
            }
            return None;
        }
        let cmd = LoadCommand::parse(self.bytes, &mut self.offset, self.end, self.index, self.le);
        self.index += 1;
        if cmd.is_err() {
            self.done = true;
        }
        Some(cmd)
    }
}
