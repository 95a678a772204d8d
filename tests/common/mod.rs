//! Builds synthetic Mach-O images out of the crate's own load command structs

#![allow(dead_code)]

use scroll::{Endian, Pwrite};
use simpatch::mach::cputype::CPU_TYPE_ARM64;
use simpatch::mach::fat::{FAT_MAGIC, FAT_MAGIC_64, FatArch, FatArch64, FatHeader};
use simpatch::mach::header::{Header64, MH_DYLIB, MH_MAGIC_64, SIZEOF_HEADER_64};
use simpatch::mach::load_command::*;

/// Bytes standing in for the code and data after the load commands
pub const BODY: usize = 0x80;

pub fn build_version(le: Endian, platform: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 40];
    let comm = BuildVersionCommand {
        cmd: LC_BUILD_VERSION,
        cmdsize: 40,
        platform,
        minos: 0x000e0500,
        sdk: 0x00110400,
        ntools: 2,
    };
    let mut offset = 0;
    bytes.gwrite_with(comm, &mut offset, le).unwrap();
    for (tool, version) in [(TOOL_CLANG, 0x05dc0100), (TOOL_LD, 0x03580c00)] {
        bytes
            .gwrite_with(BuildToolVersion { tool, version }, &mut offset, le)
            .unwrap();
    }
    bytes
}

pub fn version_min(le: Endian, cmd: u32, cmdsize: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; cmdsize as usize];
    let comm = VersionMinCommand {
        cmd,
        cmdsize,
        version: 0x000c0000,
        sdk: 0x000e0000,
    };
    bytes.pwrite_with(comm, 0, le).unwrap();
    bytes
}

pub fn encryption_64(le: Endian, cryptid: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; SIZEOF_ENCRYPTION_INFO_COMMAND_64];
    let comm = EncryptionInfoCommand64 {
        cmd: LC_ENCRYPTION_INFO_64,
        cmdsize: SIZEOF_ENCRYPTION_INFO_COMMAND_64 as u32,
        cryptoff: 0x4000,
        cryptsize: 0xc000,
        cryptid,
        pad: 0,
    };
    bytes.pwrite_with(comm, 0, le).unwrap();
    bytes
}

pub fn encryption_32(le: Endian, cryptid: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; SIZEOF_ENCRYPTION_INFO_COMMAND_32];
    let comm = EncryptionInfoCommand32 {
        cmd: LC_ENCRYPTION_INFO,
        cmdsize: SIZEOF_ENCRYPTION_INFO_COMMAND_32 as u32,
        cryptoff: 0x4000,
        cryptsize: 0x1000,
        cryptid,
    };
    bytes.pwrite_with(comm, 0, le).unwrap();
    bytes
}

/// A command the patcher never looks inside
pub fn opaque(le: Endian, cmd: u32, cmdsize: u32) -> Vec<u8> {
    let mut bytes = vec![0x5au8; cmdsize as usize];
    bytes
        .pwrite_with(LoadCommandHeader { cmd, cmdsize }, 0, le)
        .unwrap();
    bytes
}

/// A 64-bit image of `cputype` holding `commands`, followed by [`BODY`] bytes
pub fn image_of(le: Endian, cputype: u32, commands: &[Vec<u8>]) -> Vec<u8> {
    let table = commands.concat();
    let header = Header64 {
        magic: MH_MAGIC_64,
        cputype,
        cpusubtype: 0,
        filetype: MH_DYLIB,
        ncmds: commands.len() as u32,
        sizeofcmds: table.len() as u32,
        flags: 0x00100085,
        reserved: 0,
    };
    let mut bytes = vec![0u8; SIZEOF_HEADER_64];
    bytes.pwrite_with(header, 0, le).unwrap();
    bytes.extend_from_slice(&table);
    bytes.extend((0..BODY).map(|i| i as u8));
    bytes
}

/// A little endian arm64 image holding `commands`
pub fn image(commands: &[Vec<u8>]) -> Vec<u8> {
    image_of(scroll::LE, CPU_TYPE_ARM64, commands)
}

/// The usual shape of a device app binary
pub fn device_app() -> Vec<u8> {
    image(&[
        opaque(scroll::LE, LC_SEGMENT_64, 72),
        opaque(scroll::LE, LC_UUID, 24),
        build_version(scroll::LE, PLATFORM_IOS),
        encryption_64(scroll::LE, 1),
        opaque(scroll::LE, LC_LOAD_DYLIB, 56),
    ])
}

pub const SLICE_ALIGN: usize = 0x1000;

/// A fat container with the given `(cputype, slice)` pairs, each slice page aligned
pub fn fat(slices: &[(u32, Vec<u8>)], wide: bool) -> Vec<u8> {
    let mut bytes = vec![0u8; SLICE_ALIGN];
    let header = FatHeader {
        magic: if wide { FAT_MAGIC_64 } else { FAT_MAGIC },
        nfat_arch: slices.len() as u32,
    };
    let mut offset = 0;
    bytes.gwrite_with(header, &mut offset, scroll::BE).unwrap();
    for (cputype, slice) in slices {
        let start = bytes.len();
        if wide {
            let arch = FatArch64 {
                cputype: *cputype,
                cpusubtype: 0,
                offset: start as u64,
                size: slice.len() as u64,
                align: 12,
                reserved: 0,
            };
            bytes.gwrite_with(arch, &mut offset, scroll::BE).unwrap();
        } else {
            let arch = FatArch {
                cputype: *cputype,
                cpusubtype: 0,
                offset: start as u32,
                size: slice.len() as u32,
                align: 12,
            };
            bytes.gwrite_with(arch, &mut offset, scroll::BE).unwrap();
        }
        bytes.extend_from_slice(slice);
        let padded = bytes.len().div_ceil(SLICE_ALIGN) * SLICE_ALIGN;
        bytes.resize(padded, 0);
    }
    bytes
}

/// Offsets of the bytes that differ between `before` and `after`
pub fn changed_offsets(before: &[u8], after: &[u8]) -> Vec<usize> {
    assert_eq!(before.len(), after.len(), "buffer length changed");
    before
        .iter()
        .zip(after)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, _)| i)
        .collect()
}
