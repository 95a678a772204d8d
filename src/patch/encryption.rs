//! Clears the encryption info commands of an image

use log::{debug, warn};

use crate::error;
use crate::mach::MachO;
use crate::mach::load_command::{
    CommandVariant, ENCRYPTION_INFO_CRYPTID_OFFSET, ENCRYPTION_INFO_CRYPTOFF_OFFSET,
    ENCRYPTION_INFO_CRYPTSIZE_OFFSET, cmd_to_str,
};
use crate::options::CryptPolicy;

/// One cleared `LC_ENCRYPTION_INFO` or `LC_ENCRYPTION_INFO_64`, with its values before clearing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionRewrite {
    pub offset: usize,
    pub cmd: u32,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
    /// Whether `cryptoff` and `cryptsize` are zeroed too
    pub clear_range: bool,
}

impl EncryptionRewrite {
    /// Whether clearing changes any byte
    pub fn changed(&self) -> bool {
        self.cryptid != 0 || (self.clear_range && (self.cryptoff != 0 || self.cryptsize != 0))
    }
}

pub(crate) fn plan(macho: &MachO, policy: CryptPolicy) -> error::Result<Vec<EncryptionRewrite>> {
    let mut rewrites = Vec::new();
    for cmd in macho.load_commands() {
        let cmd = cmd?;
        let (cmd_id, cryptoff, cryptsize, cryptid) = match cmd.command {
            CommandVariant::EncryptionInfo32(comm) => {
                (comm.cmd, comm.cryptoff, comm.cryptsize, comm.cryptid)
            }
            CommandVariant::EncryptionInfo64(comm) => {
                (comm.cmd, comm.cryptoff, comm.cryptsize, comm.cryptid)
            }
            _ => continue,
        };
        if cryptid != 0 {
            warn!(
                "{} at {:#x} marks {:#x} bytes at {:#x} as encrypted (cryptid {}); clearing the flag does not decrypt them",
                cmd_to_str(cmd_id),
                cmd.offset,
                cryptsize,
                cryptoff,
                cryptid
            );
        }
        rewrites.push(EncryptionRewrite {
            offset: cmd.offset,
            cmd: cmd_id,
            cryptoff,
            cryptsize,
            cryptid,
            clear_range: policy.clears_range(),
        });
    }
    Ok(rewrites)
}

pub(crate) fn apply(macho: &mut MachO, rewrites: &[EncryptionRewrite]) -> error::Result<()> {
    for rewrite in rewrites {
        debug!(
            "{} at {:#x}: cryptid {} -> 0",
            cmd_to_str(rewrite.cmd),
            rewrite.offset,
            rewrite.cryptid
        );
        macho.pwrite(0u32, rewrite.offset + ENCRYPTION_INFO_CRYPTID_OFFSET)?;
        if rewrite.clear_range {
            macho.pwrite(0u32, rewrite.offset + ENCRYPTION_INFO_CRYPTOFF_OFFSET)?;
            macho.pwrite(0u32, rewrite.offset + ENCRYPTION_INFO_CRYPTSIZE_OFFSET)?;
        }
    }
    Ok(())
}

/// Zeroes `cryptid` in every encryption info command of `macho`, and the encrypted
/// range too under [`CryptPolicy::WholeRange`]. An image without one is left as is.
pub fn clear_encryption(
    macho: &mut MachO,
    policy: CryptPolicy,
) -> error::Result<Vec<EncryptionRewrite>> {
    let rewrites = plan(macho, policy)?;
    apply(macho, &rewrites)?;
    Ok(rewrites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::cputype::CPU_TYPE_ARM64;
    use crate::mach::header::{Header64, MH_EXECUTE, MH_MAGIC_64};
    use crate::mach::load_command::*;
    use scroll::{Pread, Pwrite};

    fn image(encryption: EncryptionInfoCommand64, extra: Option<EncryptionInfoCommand32>) -> Vec<u8> {
        let ncmds = 1 + extra.is_some() as u32;
        let sizeofcmds = 24 + if extra.is_some() { 20 } else { 0 };
        let mut bytes = vec![0u8; 32 + sizeofcmds as usize + 0x40];
        let header = Header64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds,
            sizeofcmds,
            flags: 0,
            reserved: 0,
        };
        bytes.pwrite_with(header, 0, scroll::BE).unwrap();
        bytes.pwrite_with(encryption, 32, scroll::BE).unwrap();
        if let Some(extra) = extra {
            bytes.pwrite_with(extra, 56, scroll::BE).unwrap();
        }
        bytes
    }

    fn encryption_64(cryptid: u32) -> EncryptionInfoCommand64 {
        EncryptionInfoCommand64 {
            cmd: LC_ENCRYPTION_INFO_64,
            cmdsize: 24,
            cryptoff: 0x4000,
            cryptsize: 0x8000,
            cryptid,
            pad: 0,
        }
    }

    #[test]
    fn clears_cryptid_big_endian() {
        let mut bytes = image(encryption_64(1), None);
        let mut macho = MachO::parse(&mut bytes).unwrap();
        assert_eq!(macho.le, scroll::BE);
        let rewrites = clear_encryption(&mut macho, CryptPolicy::CryptIdOnly).unwrap();
        assert_eq!(rewrites.len(), 1);
        assert!(rewrites[0].changed());
        let comm: EncryptionInfoCommand64 = bytes.pread_with(32, scroll::BE).unwrap();
        assert_eq!(comm, encryption_64(0));
    }

    #[test]
    fn whole_range_policy() {
        let extra = EncryptionInfoCommand32 {
            cmd: LC_ENCRYPTION_INFO,
            cmdsize: 20,
            cryptoff: 0x1000,
            cryptsize: 0x10,
            cryptid: 0,
        };
        let mut bytes = image(encryption_64(1), Some(extra));
        let mut macho = MachO::parse(&mut bytes).unwrap();
        let rewrites = clear_encryption(&mut macho, CryptPolicy::WholeRange).unwrap();
        assert_eq!(rewrites.len(), 2);
        assert!(rewrites.iter().all(|r| r.changed()));
        let comm: EncryptionInfoCommand32 = bytes.pread_with(56, scroll::BE).unwrap();
        assert_eq!((comm.cryptoff, comm.cryptsize, comm.cryptid), (0, 0, 0));
        assert_eq!(comm.cmdsize, 20);
    }

    #[test]
    fn already_clear_is_unchanged() {
        let mut bytes = image(encryption_64(0), None);
        let before = bytes.clone();
        let mut macho = MachO::parse(&mut bytes).unwrap();
        let rewrites = clear_encryption(&mut macho, CryptPolicy::CryptIdOnly).unwrap();
        assert!(!rewrites[0].changed());
        assert_eq!(before, bytes);
    }
}
