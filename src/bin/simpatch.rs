//! Patches every Mach-O under a path for the iOS Simulator and re-signs it
//!
//! Usage: `simpatch [options] <path>`, where `<path>` is usually an unpacked `Payload`
//! directory or a single binary.

use std::env;
use std::path::PathBuf;
use std::process;

use simpatch::PatchOptions;
use simpatch::pipeline::{self, Codesign, Config, FailurePolicy, NoSign, Signer};

fn print_usage() {
    eprintln!("Usage: simpatch [options] <path>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -n, --dry-run           Patch in memory only, write and sign nothing");
    eprintln!("      --no-sign           Do not re-sign patched files");
    eprintln!("      --codesign <path>   Signing tool (default: {})", pipeline::CODESIGN);
    eprintln!("      --fail-fast         Stop at the first file that fails");
    eprintln!("      --no-fat            Reject fat binaries instead of patching their slices");
    eprintln!("      --clear-crypt-range Also zero cryptoff and cryptsize");
    eprintln!("  -v                      More logging, repeatable");
    eprintln!("  -q                      No logging");
    eprintln!("  -h, --help              Show this help");
}

fn usage_error(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    print_usage();
    process::exit(2);
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut root: Option<PathBuf> = None;
    let mut options = PatchOptions::new();
    let mut failure_policy = FailurePolicy::Continue;
    let mut dry_run = false;
    let mut sign = true;
    let mut codesign = Codesign::default();
    let mut verbosity = 2;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-n" | "--dry-run" => dry_run = true,
            "--no-sign" => sign = false,
            "--codesign" => {
                if i + 1 >= args.len() {
                    usage_error("--codesign requires an argument");
                }
                codesign.program = PathBuf::from(&args[i + 1]);
                i += 1;
            }
            "--fail-fast" => failure_policy = FailurePolicy::FailFast,
            "--no-fat" => options = options.reject_fat(),
            "--clear-crypt-range" => options = options.clear_crypt_range(),
            "-q" => quiet = true,
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            arg if arg.starts_with("-v") && arg[1..].chars().all(|c| c == 'v') => {
                verbosity += arg.len() - 1;
            }
            arg if arg.starts_with('-') => usage_error(&format!("Unknown option: {arg}")),
            arg => {
                if root.is_some() {
                    usage_error("Multiple paths specified");
                }
                root = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let root = match root {
        Some(root) => root,
        None => usage_error("No path specified"),
    };

    if let Err(e) = stderrlog::new().verbosity(verbosity).quiet(quiet).init() {
        eprintln!("Error: cannot set up logging: {e}");
    }

    let config = Config::new(root)
        .with_options(options)
        .with_failure_policy(failure_policy)
        .with_dry_run(dry_run);
    let signer: Box<dyn Signer> = if sign {
        Box::new(codesign)
    } else {
        Box::new(NoSign)
    };

    match pipeline::run(&config, signer.as_ref()) {
        Ok(summary) => {
            for failure in &summary.failed {
                eprintln!("failed: {failure}");
            }
            println!("{summary}");
            if !summary.is_success() {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}: {e}", config.root.display());
            process::exit(1);
        }
    }
}
