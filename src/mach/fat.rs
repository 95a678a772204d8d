//! A Mach-o fat binary is a multi-architecture binary container

use core::fmt;
use scroll::{Pread, Pwrite, SizeWith};

use crate::error;
use crate::mach::constants::cputype;

pub const FAT_MAGIC: u32 = 0xcafebabe;
pub const FAT_CIGAM: u32 = 0xbebafeca;
pub const FAT_MAGIC_64: u32 = 0xcafebabf;
pub const FAT_CIGAM_64: u32 = 0xbfbafeca;

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// The Mach-o `FatHeader` always has its data bigendian
pub struct FatHeader {
    /// The magic number, `cafebabe` or `cafebabf`
    pub magic: u32,
    /// How many fat architecture headers there are
    pub nfat_arch: u32,
}

pub const SIZEOF_FAT_HEADER: usize = 8;

impl fmt::Debug for FatHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FatHeader")
            .field("magic", &format_args!("0x{:x}", self.magic))
            .field("nfat_arch", &self.nfat_arch)
            .finish()
    }
}

impl FatHeader {
    /// Parse a mach-o fat header from the `buffer`
    pub fn parse(bytes: &[u8]) -> error::Result<FatHeader> {
        if bytes.len() < SIZEOF_FAT_HEADER {
            return Err(error::Error::Truncated {
                what: "fat header",
                needed: SIZEOF_FAT_HEADER,
                len: bytes.len(),
            });
        }
        Ok(bytes.pread_with(0, scroll::BE)?)
    }

    pub fn is_64(&self) -> bool {
        self.magic == FAT_MAGIC_64
    }

    /// Size of one arch entry in this container
    pub fn sizeof_arch(&self) -> usize {
        if self.is_64() {
            SIZEOF_FAT_ARCH_64
        } else {
            SIZEOF_FAT_ARCH
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// The Mach-o `FatArch` always has its data bigendian
pub struct FatArch {
    /// What kind of CPU this binary is
    pub cputype: u32,
    pub cpusubtype: u32,
    /// Where in the fat binary it starts
    pub offset: u32,
    /// How big the binary is
    pub size: u32,
    pub align: u32,
}

pub const SIZEOF_FAT_ARCH: usize = 20;

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// The 64-bit fat arch entry, used when slices live beyond 4GiB
pub struct FatArch64 {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
    pub reserved: u32,
}

pub const SIZEOF_FAT_ARCH_64: usize = 32;

/// A fat arch entry with its offset and size widened, whichever table it came from
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Arch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
}

impl fmt::Debug for Arch {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Arch")
            .field("cputype", &cputype::cpu_type_to_str(self.cputype))
            .field("cpusubtype", &self.cpusubtype)
            .field("offset", &format_args!("{:#x}", &self.offset))
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

impl From<FatArch> for Arch {
    fn from(arch: FatArch) -> Self {
        Arch {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset: arch.offset as u64,
            size: arch.size as u64,
            align: arch.align,
        }
    }
}

impl From<FatArch64> for Arch {
    fn from(arch: FatArch64) -> Self {
        Arch {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset: arch.offset,
            size: arch.size,
            align: arch.align,
        }
    }
}

impl Arch {
    /// Whether this fat header describes a 64-bit binary
    pub fn is_64(&self) -> bool {
        cputype::is_64(self.cputype)
    }

    /// The byte range of this slice, checked against a buffer of `len` bytes
    pub fn range(&self, len: usize) -> error::Result<core::ops::Range<usize>> {
        let end = self.offset.checked_add(self.size);
        match end {
            Some(end) if end <= len as u64 => Ok(self.offset as usize..end as usize),
            _ => Err(error::Error::Truncated {
                what: "fat slice",
                needed: end.map_or(usize::MAX, |end| end as usize),
                len,
            }),
        }
    }

    /// Parses `count` arch entries following the fat `header`
    pub fn parse_arches(bytes: &[u8], header: &FatHeader) -> error::Result<Vec<Self>> {
        let count = header.nfat_arch as usize;
        let table_end = count
            .checked_mul(header.sizeof_arch())
            .and_then(|size| size.checked_add(SIZEOF_FAT_HEADER))
            .unwrap_or(usize::MAX);
        if table_end > bytes.len() {
            return Err(error::Error::Truncated {
                what: "fat arch table",
                needed: table_end,
                len: bytes.len(),
            });
        }
        let mut arches = Vec::with_capacity(count);
        let mut offset = SIZEOF_FAT_HEADER;
        for _ in 0..count {
            let arch = if header.is_64() {
                Arch::from(bytes.gread_with::<FatArch64>(&mut offset, scroll::BE)?)
            } else {
                Arch::from(bytes.gread_with::<FatArch>(&mut offset, scroll::BE)?)
            };
            arches.push(arch);
        }
        Ok(arches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fat(arches: &[FatArch], len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes
            .pwrite_with(
                FatHeader {
                    magic: FAT_MAGIC,
                    nfat_arch: arches.len() as u32,
                },
                0,
                scroll::BE,
            )
            .unwrap();
        for (i, arch) in arches.iter().enumerate() {
            bytes
                .pwrite_with(*arch, SIZEOF_FAT_HEADER + i * SIZEOF_FAT_ARCH, scroll::BE)
                .unwrap();
        }
        bytes
    }

    #[test]
    fn parses_arch_table() {
        let arm64 = FatArch {
            cputype: cputype::CPU_TYPE_ARM64,
            cpusubtype: 0,
            offset: 0x4000,
            size: 0x100,
            align: 14,
        };
        let bytes = fat(&[arm64], 0x4100);
        let header = FatHeader::parse(&bytes).unwrap();
        let arches = Arch::parse_arches(&bytes, &header).unwrap();
        assert_eq!(arches.len(), 1);
        assert!(arches[0].is_64());
        assert_eq!(arches[0].range(bytes.len()).unwrap(), 0x4000..0x4100);
    }

    #[test]
    fn slice_past_end_is_truncated() {
        let arch = Arch::from(FatArch {
            cputype: cputype::CPU_TYPE_ARM64,
            cpusubtype: 0,
            offset: 0x4000,
            size: 0x100,
            align: 14,
        });
        assert_eq!(
            arch.range(0x4080).unwrap_err().kind(),
            ErrorKind::TruncatedImage
        );
    }

    #[test]
    fn arch_table_past_end_is_truncated() {
        let mut bytes = fat(&[], 16);
        bytes.pwrite_with(2u32, 4, scroll::BE).unwrap();
        let header = FatHeader::parse(&bytes).unwrap();
        let err = Arch::parse_arches(&bytes, &header).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedImage);
    }
}
