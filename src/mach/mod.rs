//! The Mach-o, mostly zero-copy, binary format parser and raw struct definitions
//!
//! Parsing never writes to the buffer. A parsed [`MachO`] keeps the mutable borrow
//! so the rewriters in [`crate::patch`] can later overwrite fields in place.
use core::fmt;
use core::ops::Range;

use scroll::{Endian, Pread, Pwrite};

use crate::error;
use crate::options::{FatPolicy, PatchOptions};

pub mod constants;
pub mod fat;
pub mod header;
pub mod load_command;

pub use self::constants::cputype;

use self::header::{Header64, MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64, SIZEOF_HEADER_64};
use self::load_command::LoadCommandIter;

/// Returns a big endian magical number
pub fn peek(bytes: &[u8], offset: usize) -> error::Result<u32> {
    Ok(bytes.pread_with::<u32>(offset, scroll::BE)?)
}

/// What the leading magic says the buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// A single 64-bit image in the given byte order
    Image(Endian),
    /// A fat container
    Fat,
}

/// Classifies the buffer by its first four bytes
pub fn parse_magic(bytes: &[u8]) -> error::Result<Magic> {
    if bytes.len() < 4 {
        return Err(error::Error::Unsupported(format!(
            "{} bytes is smaller than a magical number",
            bytes.len()
        )));
    }
    let magic = peek(bytes, 0)?;
    match magic {
        // the magic is stored in the image's byte order, so reading it big endian
        // gives the swapped value for little endian images
        MH_CIGAM_64 => Ok(Magic::Image(scroll::LE)),
        MH_MAGIC_64 => Ok(Magic::Image(scroll::BE)),
        fat::FAT_MAGIC | fat::FAT_MAGIC_64 => Ok(Magic::Fat),
        MH_MAGIC | MH_CIGAM => Err(error::Error::Unsupported(
            "32-bit Mach-O images are not supported".into(),
        )),
        _ => Err(error::Error::BadMagic(magic)),
    }
}

/// A single, validated 64-bit Mach-O image bound to the buffer it was parsed from
pub struct MachO<'a> {
    data: &'a mut [u8],
    pub header: Header64,
    pub le: Endian,
}

impl fmt::Debug for MachO<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("MachO")
            .field("header", &self.header)
            .field("le", &self.le)
            .field("data", &self.data.len())
            .finish()
    }
}

impl<'a> MachO<'a> {
    /// Parses the Mach-o image at the start of `bytes`, walking the whole load command
    /// table once so later stages can rely on it
    pub fn parse(bytes: &'a mut [u8]) -> error::Result<MachO<'a>> {
        let le = match parse_magic(bytes)? {
            Magic::Image(le) => le,
            Magic::Fat => {
                return Err(error::Error::Unsupported(
                    "fat container nested inside a fat slice".into(),
                ));
            }
        };
        let header = Header64::parse(bytes, le)?;
        let end = header.load_commands_end();
        if end > bytes.len() {
            return Err(error::Error::Truncated {
                what: "load commands",
                needed: end,
                len: bytes.len(),
            });
        }
        let macho = MachO {
            data: bytes,
            header,
            le,
        };
        for cmd in macho.load_commands() {
            cmd?;
        }
        log::debug!("parsed {:?}", macho.header);
        Ok(macho)
    }

    /// Lazily walks the load commands
    pub fn load_commands(&self) -> LoadCommandIter<'_> {
        LoadCommandIter::new(
            &*self.data,
            SIZEOF_HEADER_64,
            self.header.load_commands_end(),
            self.header.ncmds,
            self.le,
        )
    }

    /// The bytes of this image
    pub fn bytes(&self) -> &[u8] {
        &*self.data
    }

    /// Writes `value` at `offset` in this image's byte order
    pub(crate) fn pwrite<N>(&mut self, value: N, offset: usize) -> error::Result<usize>
    where
        N: scroll::ctx::TryIntoCtx<Endian, Error = scroll::Error>,
    {
        Ok(self.data.pwrite_with(value, offset, self.le)?)
    }

    /// Zeroes `range` of this image
    pub(crate) fn zero(&mut self, range: Range<usize>) -> error::Result<()> {
        let len = self.data.len();
        let end = range.end;
        match self.data.get_mut(range) {
            Some(bytes) => {
                bytes.fill(0);
                Ok(())
            }
            None => Err(error::Error::Truncated {
                what: "zeroed range",
                needed: end,
                len,
            }),
        }
    }

    pub fn cputype(&self) -> u32 {
        self.header.cputype
    }
}

/// A Mach-o multi architecture (Fat) binary container
pub struct MultiArch<'a> {
    data: &'a mut [u8],
    pub arches: Vec<fat::Arch>,
}

impl fmt::Debug for MultiArch<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("MultiArch")
            .field("arches", &self.arches)
            .field("data", &self.data.len())
            .finish()
    }
}

impl<'a> MultiArch<'a> {
    /// Parses the fat header and arch table, checking every slice lies inside `bytes`
    pub fn new(bytes: &'a mut [u8]) -> error::Result<Self> {
        let header = fat::FatHeader::parse(bytes)?;
        let arches = fat::Arch::parse_arches(bytes, &header)?;
        for arch in &arches {
            arch.range(bytes.len())?;
        }
        Ok(MultiArch {
            data: bytes,
            arches,
        })
    }

    pub fn narches(&self) -> usize {
        self.arches.len()
    }

    /// Try to parse the Mach-o image at `index`, borrowing its slice mutably
    pub fn get_mut(&mut self, index: usize) -> error::Result<MachO<'_>> {
        let arch = self.arches.get(index).ok_or_else(|| {
            error::Error::Unsupported(format!(
                "Requested the {}-th binary, but there are only {} architectures in this container",
                index,
                self.arches.len()
            ))
        })?;
        let range = arch.range(self.data.len())?;
        MachO::parse(&mut self.data[range])
    }
}

/// Either a collection of multiple architectures, or a single mach-o binary
#[derive(Debug)]
pub enum Mach<'a> {
    Fat(MultiArch<'a>),
    Binary(MachO<'a>),
}

impl<'a> Mach<'a> {
    /// Parses `bytes` with the default options
    pub fn parse(bytes: &'a mut [u8]) -> error::Result<Self> {
        Self::parse_with_options(bytes, &PatchOptions::default())
    }

    pub fn parse_with_options(bytes: &'a mut [u8], opts: &PatchOptions) -> error::Result<Self> {
        match parse_magic(bytes)? {
            Magic::Fat => {
                if opts.fat_policy == FatPolicy::Reject {
                    return Err(error::Error::Unsupported(
                        "fat containers are rejected by the current options".into(),
                    ));
                }
                let multi = MultiArch::new(bytes)?;
                Ok(Mach::Fat(multi))
            }
            // we're a regular binary
            Magic::Image(_) => {
                let binary = MachO::parse(bytes)?;
                Ok(Mach::Binary(binary))
            }
        }
    }
}

/// Parses `bytes` as a single image or fat container without modifying it
pub fn parse(bytes: &mut [u8]) -> error::Result<Mach<'_>> {
    Mach::parse(bytes)
}
