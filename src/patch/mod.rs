//! Patches a Mach-O image in place so it loads in a simulator runtime.
//!
//! A patch runs in stages, each one either advancing or failing with a [`PatchError`]
//! naming the stage:
//!
//! 1. [`Stage::Parse`]: the header and load command table are validated
//! 2. [`Stage::RewritePlatform`]: the platform declaration is retargeted, see [`rewrite_platform`]
//! 3. [`Stage::ClearEncryption`]: encryption info is cleared, see [`clear_encryption`]
//!
//! Every edit is planned before any byte is written, for all slices of a fat container,
//! so a failed patch leaves the buffer exactly as it was. The buffer never changes length.

use core::fmt;

use log::{debug, warn};

use crate::error::{self, AtStage, PatchError, Stage};
use crate::mach::{Mach, MachO, cputype, fat};
use crate::options::PatchOptions;

pub mod encryption;
pub mod platform;

pub use self::encryption::{EncryptionRewrite, clear_encryption};
pub use self::platform::{PlatformRewrite, rewrite_platform};

/// What was done to one image, either the whole buffer or a slice of a fat container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    /// Offset of the image within the buffer
    pub offset: usize,
    pub cputype: u32,
    pub platform: PlatformRewrite,
    pub encryption: Vec<EncryptionRewrite>,
}

impl SliceReport {
    pub fn changed(&self) -> bool {
        self.platform.changed() || self.encryption.iter().any(EncryptionRewrite::changed)
    }
}

/// The result of a successful patch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Whether the buffer was a fat container
    pub fat: bool,
    pub slices: Vec<SliceReport>,
    /// Fat slices left alone because they are not 64-bit
    pub skipped: Vec<fat::Arch>,
}

impl PatchReport {
    /// Whether any byte of the buffer changed
    pub fn changed(&self) -> bool {
        self.slices.iter().any(SliceReport::changed)
    }
}

impl fmt::Display for PatchReport {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for (i, slice) in self.slices.iter().enumerate() {
            if i > 0 {
                fmt.write_str(", ")?;
            }
            write!(
                fmt,
                "{} {}",
                cputype::cpu_type_to_str(slice.cputype),
                slice.platform.platform()
            )?;
            let cleared = slice.encryption.iter().filter(|e| e.changed()).count();
            if cleared > 0 {
                write!(fmt, " (cleared {cleared} encryption info)")?;
            }
        }
        if !self.skipped.is_empty() {
            write!(fmt, ", skipped {} slices", self.skipped.len())?;
        }
        Ok(())
    }
}

/// The edits for one image, decided but not yet written
#[derive(Debug)]
struct Plan {
    platform: PlatformRewrite,
    encryption: Vec<EncryptionRewrite>,
}

impl Plan {
    fn new(macho: &MachO, opts: &PatchOptions) -> Result<Self, PatchError> {
        let platform = platform::plan(macho).at(Stage::RewritePlatform)?;
        let encryption = encryption::plan(macho, opts.crypt_policy).at(Stage::ClearEncryption)?;
        Ok(Plan {
            platform,
            encryption,
        })
    }

    fn apply(self, macho: &mut MachO, offset: usize) -> Result<SliceReport, PatchError> {
        platform::apply(macho, &self.platform).at(Stage::RewritePlatform)?;
        encryption::apply(macho, &self.encryption).at(Stage::ClearEncryption)?;
        Ok(SliceReport {
            offset,
            cputype: macho.cputype(),
            platform: self.platform,
            encryption: self.encryption,
        })
    }
}

/// Patches `bytes` with the default [`PatchOptions`]
pub fn patch(bytes: &mut [u8]) -> Result<PatchReport, PatchError> {
    patch_with(bytes, &PatchOptions::default())
}

/// Retargets the image or fat container in `bytes` to the simulator and clears its
/// encryption info
pub fn patch_with(bytes: &mut [u8], opts: &PatchOptions) -> Result<PatchReport, PatchError> {
    match Mach::parse_with_options(bytes, opts).at(Stage::Parse)? {
        Mach::Binary(mut macho) => {
            let plan = Plan::new(&macho, opts)?;
            let slice = plan.apply(&mut macho, 0)?;
            Ok(PatchReport {
                fat: false,
                slices: vec![slice],
                skipped: Vec::new(),
            })
        }
        Mach::Fat(mut multi) => {
            let mut plans = Vec::with_capacity(multi.narches());
            let mut skipped = Vec::new();
            for (index, arch) in multi.arches.clone().into_iter().enumerate() {
                if !arch.is_64() {
                    warn!(
                        "skipping {} slice at {:#x}, only 64-bit images are patched",
                        cputype::cpu_type_to_str(arch.cputype),
                        arch.offset
                    );
                    skipped.push(arch);
                    continue;
                }
                let macho = multi.get_mut(index).at(Stage::Parse)?;
                let plan = Plan::new(&macho, opts)?;
                debug!(
                    "planned {} slice at {:#x}: {plan:?}",
                    cputype::cpu_type_to_str(arch.cputype),
                    arch.offset
                );
                plans.push((index, arch, plan));
            }
            if plans.is_empty() {
                return Err(PatchError::new(
                    Stage::Parse,
                    error::Error::Unsupported(format!(
                        "fat container holds no 64-bit slice among its {} architectures",
                        multi.narches()
                    )),
                ));
            }
            let mut slices = Vec::with_capacity(plans.len());
            for (index, arch, plan) in plans {
                let mut macho = multi.get_mut(index).at(Stage::Parse)?;
                slices.push(plan.apply(&mut macho, arch.offset as usize)?);
            }
            Ok(PatchReport {
                fat: true,
                slices,
                skipped,
            })
        }
    }
}
