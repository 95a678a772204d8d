//! Finds Mach-O files under a path, patches them and writes them back re-signed.
//!
//! Files are handled one after the other. A file is only rewritten when patching
//! changed it, and the rewrite goes through a temporary file in the same directory
//! that replaces the original, so an interrupted run never leaves a half written binary.

use core::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::error::{self, AtStage, Error, PatchError, Stage};
use crate::options::PatchOptions;
use crate::patch::{self, PatchReport};

/// Leading bytes of files worth handing to the patcher: a fat container or a
/// little endian 64-bit image
const CANDIDATE_MAGICS: [[u8; 4]; 2] = [[0xca, 0xfe, 0xba, 0xbe], [0xcf, 0xfa, 0xed, 0xfe]];

/// The default signing tool
pub const CODESIGN: &str = "/usr/bin/codesign";

/// Re-establishes a code signature on a patched file
pub trait Signer {
    fn sign(&self, path: &Path) -> error::Result<()>;
}

/// Ad-hoc signs with `codesign --force --sign - <path>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codesign {
    pub program: PathBuf,
}

impl Default for Codesign {
    fn default() -> Self {
        Codesign {
            program: PathBuf::from(CODESIGN),
        }
    }
}

impl Signer for Codesign {
    fn sign(&self, path: &Path) -> error::Result<()> {
        let output = Command::new(&self.program)
            .args(["--force", "--sign", "-"])
            .arg(path)
            .output()
            .map_err(|e| {
                Error::Signing(format!("failed to run {}: {e}", self.program.display()))
            })?;
        if !output.status.success() {
            return Err(Error::Signing(format!(
                "{} {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Leaves files unsigned
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSign;

impl Signer for NoSign {
    fn sign(&self, path: &Path) -> error::Result<()> {
        debug!("not signing {}", path.display());
        Ok(())
    }
}

/// What a batch does after a file fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report the failure and go on with the next file
    #[default]
    Continue,
    /// Stop at the first failure
    FailFast,
}

/// Everything a batch run needs, apart from the [`Signer`]
#[derive(Debug, Clone)]
pub struct Config {
    /// A file or a directory to search
    pub root: PathBuf,
    pub options: PatchOptions,
    pub failure_policy: FailurePolicy,
    /// Patch in memory only; nothing is written or signed
    pub dry_run: bool,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Config {
            root: root.into(),
            options: PatchOptions::default(),
            failure_policy: FailurePolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_options(mut self, options: PatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// What happened to a file that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Patched, written back and signed (or would have been, in a dry run)
    Patched(PatchReport),
    /// Already targets the simulator; neither rewritten nor re-signed
    Unchanged,
}

/// A file that could not be patched
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub error: PatchError,
}

impl fmt::Display for FileError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}: {}", self.path.display(), self.error.diagnostic())
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The outcome of a batch
#[derive(Debug, Default)]
pub struct Summary {
    pub patched: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub failed: Vec<FileError>,
}

impl Summary {
    /// Whether every file was handled
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} patched, {} unchanged, {} failed",
            self.patched.len(),
            self.unchanged.len(),
            self.failed.len()
        )
    }
}

/// Whether `path` starts with a fat or little endian 64-bit Mach-O magic
pub fn is_candidate(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    let read = fs::File::open(path).and_then(|mut file| file.read_exact(&mut magic));
    match read {
        Ok(()) => CANDIDATE_MAGICS.contains(&magic),
        Err(e) => {
            debug!("{}: not a candidate: {e}", path.display());
            false
        }
    }
}

/// Lists every regular file at or below `root`, sorted. Symlinks are not followed and
/// unreadable directories are skipped.
pub fn discover(root: &Path) -> error::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !fs::metadata(root)?.is_dir() {
        files.push(root.to_path_buf());
        return Ok(files);
    }
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("skipping {}: {e}", dir.display());
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping entry of {}: {e}", dir.display());
                    continue;
                }
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    debug!("skipping {}: {e}", entry.path().display());
                    continue;
                }
            };
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Replaces the contents of `path` with `bytes` through a renamed temporary file,
/// keeping the original permissions
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path)?.permissions();
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.as_file().sync_all()?;
    fs::set_permissions(temp_file.path(), permissions)?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Patches the file at `path`, writing it back and signing it when anything changed
pub fn patch_file(
    path: &Path,
    config: &Config,
    signer: &dyn Signer,
) -> Result<FileOutcome, FileError> {
    let fail = |error: PatchError| FileError {
        path: path.to_path_buf(),
        error,
    };
    let mut bytes = fs::read(path)
        .map_err(Error::from)
        .at(Stage::Read)
        .map_err(fail)?;
    let len = bytes.len();
    let report = patch::patch_with(&mut bytes, &config.options).map_err(fail)?;
    debug_assert_eq!(len, bytes.len());
    if !report.changed() {
        info!("{}: unchanged, {report}", path.display());
        return Ok(FileOutcome::Unchanged);
    }
    if config.dry_run {
        info!("{}: would patch, {report}", path.display());
        return Ok(FileOutcome::Patched(report));
    }
    write_atomic(path, &bytes)
        .map_err(Error::from)
        .at(Stage::Write)
        .map_err(fail)?;
    signer.sign(path).at(Stage::Sign).map_err(fail)?;
    info!("{}: patched, {report}", path.display());
    Ok(FileOutcome::Patched(report))
}

/// Patches every candidate under `config.root`.
///
/// Only a root that cannot be read is an error; per file failures are collected in the
/// [`Summary`], and stop the batch under [`FailurePolicy::FailFast`].
pub fn run(config: &Config, signer: &dyn Signer) -> error::Result<Summary> {
    let files = discover(&config.root)?;
    debug!("found {} files under {}", files.len(), config.root.display());
    let mut summary = Summary::default();
    for path in files {
        if !is_candidate(&path) {
            continue;
        }
        match patch_file(&path, config, signer) {
            Ok(FileOutcome::Patched(_)) => summary.patched.push(path),
            Ok(FileOutcome::Unchanged) => summary.unchanged.push(path),
            Err(err) => {
                warn!("{err}");
                summary.failed.push(err);
                if config.failure_policy == FailurePolicy::FailFast {
                    break;
                }
            }
        }
    }
    info!("{summary}");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let fat = dir.path().join("fat");
        let thin = dir.path().join("thin");
        let big = dir.path().join("big");
        let short = dir.path().join("short");
        fs::write(&fat, [0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 2]).unwrap();
        fs::write(&thin, [0xcf, 0xfa, 0xed, 0xfe]).unwrap();
        fs::write(&big, [0xfe, 0xed, 0xfa, 0xcf, 0, 0]).unwrap();
        fs::write(&short, [0xca, 0xfe]).unwrap();
        assert!(is_candidate(&fat));
        assert!(is_candidate(&thin));
        assert!(!is_candidate(&big));
        assert!(!is_candidate(&short));
        assert!(!is_candidate(&dir.path().join("missing")));
    }

    #[test]
    fn discover_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Payload/App.app/Frameworks");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("b"), b"b").unwrap();
        fs::write(dir.path().join("Payload/a"), b"a").unwrap();
        let files = discover(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("Payload/App.app/Frameworks/b"), dir.path().join("Payload/a")]
        );
    }

    #[test]
    fn discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bin");
        fs::write(&file, b"x").unwrap();
        assert_eq!(discover(&file).unwrap(), vec![file]);
    }

    #[test]
    fn discover_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::IOFailure);
    }

    #[test]
    fn codesign_spawn_failure() {
        let signer = Codesign {
            program: PathBuf::from("/nonexistent/codesign"),
        };
        let err = signer.sign(Path::new("whatever")).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::IOFailure);
        assert!(err.to_string().starts_with("Signing failed"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn codesign_arguments_and_exit_status() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let argv = dir.path().join("argv");
        let program = dir.path().join("codesign");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\necho 'no identity found' >&2\nexit 3\n",
            argv.display()
        );
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        let binary = dir.path().join("App");
        fs::write(&binary, b"x").unwrap();

        let err = Codesign { program }.sign(&binary).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::IOFailure);
        let msg = err.to_string();
        assert!(msg.contains("no identity found"), "{msg}");
        assert!(msg.contains('3'), "{msg}");

        let recorded = fs::read_to_string(&argv).unwrap();
        let expected = format!("--force\n--sign\n-\n{}\n", binary.display());
        assert_eq!(recorded, expected);
    }
}
