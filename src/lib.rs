//! # simpatch, retarget Mach-O binaries to the iOS Simulator
//!
//! Device builds of iOS, tvOS, watchOS and visionOS apps declare their platform in a load
//! command. The simulator refuses to load them, even on an Apple silicon host where the
//! code itself would run. `simpatch` rewrites that declaration to the simulator
//! counterpart and clears the encryption info, in place, without moving a single byte.
//!
//! ```rust,no_run
//! use std::fs;
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bytes = fs::read("Payload/App.app/App")?;
//!     let report = simpatch::patch(&mut bytes)?;
//!     if report.changed() {
//!         fs::write("Payload/App.app/App", &bytes)?;
//!     }
//!     println!("{report}");
//!     Ok(())
//! }
//! ```
//!
//! The patched file needs a new (ad-hoc) signature before it loads; the [`pipeline`]
//! module walks a directory, patches, writes back and re-signs every Mach-O it finds.
//!
//! The core ([`mach`] and [`patch`]) works on a caller owned `&mut [u8]`, does no I/O and
//! keeps no state between calls.

pub mod error;
pub mod mach;
pub mod options;
pub mod patch;
pub mod pipeline;

pub use crate::error::{Error, ErrorKind, PatchError, Stage};
pub use crate::options::{CryptPolicy, FatPolicy, PatchOptions};
pub use crate::patch::{PatchReport, patch, patch_with};
