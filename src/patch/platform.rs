//! Retargets the platform declaration of an image to its simulator counterpart

use log::{debug, warn};

use crate::error;
use crate::mach::MachO;
use crate::mach::load_command::{
    BUILD_VERSION_PLATFORM_OFFSET, BuildVersionCommand, CommandVariant, LC_BUILD_VERSION,
    Platform, SIZEOF_BUILD_VERSION_COMMAND, VersionMinPlatform, cmd_to_str,
};

/// The edit made (or found unnecessary) to an image's platform declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformRewrite {
    /// The `platform` field of an `LC_BUILD_VERSION` was overwritten
    BuildVersion {
        offset: usize,
        from: Platform,
        to: Platform,
    },
    /// A padded `LC_VERSION_MIN_*` was turned into an `LC_BUILD_VERSION` of the same size
    VersionMin {
        offset: usize,
        cmdsize: u32,
        from: VersionMinPlatform,
        to: Platform,
        version: u32,
        sdk: u32,
    },
    /// The image already targets a simulator; nothing was written
    AlreadySimulator { offset: usize, platform: Platform },
}

impl PlatformRewrite {
    /// Whether applying this rewrite changes any byte
    pub fn changed(&self) -> bool {
        !matches!(self, PlatformRewrite::AlreadySimulator { .. })
    }

    /// Offset of the rewritten command from the start of its image
    pub fn offset(&self) -> usize {
        match *self {
            PlatformRewrite::BuildVersion { offset, .. }
            | PlatformRewrite::VersionMin { offset, .. }
            | PlatformRewrite::AlreadySimulator { offset, .. } => offset,
        }
    }

    /// The platform the image declares once the rewrite is applied
    pub fn platform(&self) -> Platform {
        match *self {
            PlatformRewrite::BuildVersion { to, .. } | PlatformRewrite::VersionMin { to, .. } => {
                to
            }
            PlatformRewrite::AlreadySimulator { platform, .. } => platform,
        }
    }
}

/// Decides how to retarget `macho` without touching it
pub(crate) fn plan(macho: &MachO) -> error::Result<PlatformRewrite> {
    let mut build_version: Option<(usize, BuildVersionCommand)> = None;
    let mut version_min = None;
    for cmd in macho.load_commands() {
        let cmd = cmd?;
        match cmd.command {
            CommandVariant::BuildVersion(comm) => {
                if build_version.is_some() {
                    warn!(
                        "ignoring duplicate LC_BUILD_VERSION at {:#x} (platform {})",
                        cmd.offset, comm.platform
                    );
                } else {
                    build_version = Some((cmd.offset, comm));
                }
            }
            CommandVariant::VersionMin(platform, comm) => {
                if version_min.is_some() {
                    warn!(
                        "ignoring duplicate {} at {:#x}",
                        cmd_to_str(comm.cmd),
                        cmd.offset
                    );
                } else {
                    version_min = Some((cmd.offset, platform, comm));
                }
            }
            _ => (),
        }
    }

    if let Some((offset, comm)) = build_version {
        if let Some((legacy_offset, _, legacy)) = version_min {
            warn!(
                "{} at {:#x} is ignored, LC_BUILD_VERSION at {:#x} takes precedence",
                cmd_to_str(legacy.cmd),
                legacy_offset,
                offset
            );
        }
        let from = Platform::from_raw(comm.platform).ok_or_else(|| {
            error::Error::MissingPlatform(format!(
                "LC_BUILD_VERSION at {offset:#x} declares unknown platform {}",
                comm.platform
            ))
        })?;
        if from.is_simulator() {
            debug!("LC_BUILD_VERSION at {offset:#x} already declares {from}");
            return Ok(PlatformRewrite::AlreadySimulator {
                offset,
                platform: from,
            });
        }
        let to = from.simulator().ok_or_else(|| {
            error::Error::MissingPlatform(format!(
                "LC_BUILD_VERSION at {offset:#x} declares {from}, which has no simulator equivalent"
            ))
        })?;
        return Ok(PlatformRewrite::BuildVersion { offset, from, to });
    }

    if let Some((offset, from, comm)) = version_min {
        let name = cmd_to_str(comm.cmd);
        let to = from.platform().simulator().ok_or_else(|| {
            error::Error::MissingPlatform(format!(
                "{name} at {offset:#x} declares {}, which has no simulator equivalent",
                from.platform()
            ))
        })?;
        if (comm.cmdsize as usize) < SIZEOF_BUILD_VERSION_COMMAND {
            return Err(error::Error::MissingPlatform(format!(
                "{name} at {offset:#x} is {} bytes, too small to hold an LC_BUILD_VERSION ({} bytes) for {to}",
                comm.cmdsize, SIZEOF_BUILD_VERSION_COMMAND
            )));
        }
        return Ok(PlatformRewrite::VersionMin {
            offset,
            cmdsize: comm.cmdsize,
            from,
            to,
            version: comm.version,
            sdk: comm.sdk,
        });
    }

    Err(error::Error::MissingPlatform(format!(
        "none of the {} load commands is LC_BUILD_VERSION or LC_VERSION_MIN_*",
        macho.header.ncmds
    )))
}

/// Writes a planned rewrite into `macho`
pub(crate) fn apply(macho: &mut MachO, rewrite: &PlatformRewrite) -> error::Result<()> {
    match *rewrite {
        PlatformRewrite::BuildVersion { offset, from, to } => {
            debug!("LC_BUILD_VERSION at {offset:#x}: {from} -> {to}");
            macho.pwrite(to.raw(), offset + BUILD_VERSION_PLATFORM_OFFSET)?;
        }
        PlatformRewrite::VersionMin {
            offset,
            cmdsize,
            from,
            to,
            version,
            sdk,
        } => {
            debug!(
                "{} at {offset:#x}: rewritten as LC_BUILD_VERSION for {to}",
                cmd_to_str(from as u32)
            );
            let comm = BuildVersionCommand {
                cmd: LC_BUILD_VERSION,
                cmdsize,
                platform: to.raw(),
                minos: version,
                sdk,
                ntools: 0,
            };
            macho.pwrite(comm, offset)?;
            macho.zero(offset + SIZEOF_BUILD_VERSION_COMMAND..offset + cmdsize as usize)?;
        }
        PlatformRewrite::AlreadySimulator { .. } => (),
    }
    Ok(())
}

/// Retargets the platform declaration of `macho` to the matching simulator.
///
/// `LC_BUILD_VERSION` wins over the legacy `LC_VERSION_MIN_*` commands when both are
/// present, and only the first of each is considered. Nothing is written on failure.
pub fn rewrite_platform(macho: &mut MachO) -> error::Result<PlatformRewrite> {
    let rewrite = plan(macho)?;
    apply(macho, &rewrite)?;
    Ok(rewrite)
}
