//! CLI entry point: parses mount options, acquires the pin, validates the
//! sentinel, and hands the assembled `MountState` to `fuser::mount2`.
//!
//! This binary is the one place in the workspace where `unsafe_code` is
//! allowed — every other crate denies it — because reading the pin with
//! echo disabled means talking to `libc::tcgetattr`/`tcsetattr` directly.
#![allow(unsafe_code)]

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use safefs_cipher::keyschedule::{derive_offsets, derive_safe_digest, Pin};
use safefs_cipher::Rounds;
use safefs_fs::SafeFs;
use safefs_membrane::MountState;
use safefs_store::ensure_sentinel;

#[derive(Parser, Debug)]
#[command(name = "safefs", about = "A transparently-encrypting stackable FUSE filesystem")]
struct Cli {
    /// Backing directory that holds the encrypted files.
    #[arg(long)]
    storage: PathBuf,

    /// Directory to mount the decrypted view at.
    #[arg(long)]
    mount: PathBuf,

    /// Number of cipher rounds applied per byte.
    #[arg(long, default_value = "5")]
    rounds: String,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Render enciphered buffers as ASCII in trace logs where printable.
    #[arg(long)]
    dump_ascii: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if unsafe { libc::getuid() } == 0 {
        eprintln!("safefs: refusing to run as root");
        return ExitCode::FAILURE;
    }

    init_logging(&cli.log_level, cli.log_file.as_deref());

    let rounds = match Rounds::from_flag(&cli.rounds) {
        Some(r) => r,
        None => {
            eprintln!("safefs: --rounds must be 3, 5, or 8");
            return ExitCode::FAILURE;
        }
    };

    if !cli.storage.is_dir() {
        eprintln!("safefs: --storage path does not exist or is not a directory");
        return ExitCode::FAILURE;
    }
    if !cli.mount.is_dir() {
        eprintln!("safefs: --mount path does not exist or is not a directory");
        return ExitCode::FAILURE;
    }

    let pin_bytes = match acquire_pin() {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("safefs: failed to read pin: {err}");
            return ExitCode::FAILURE;
        }
    };
    let pin = match Pin::try_from(pin_bytes.as_slice()) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("safefs: {err}");
            return ExitCode::FAILURE;
        }
    };

    let offsets = derive_offsets(&pin);
    let safe_digest = derive_safe_digest(&offsets, &pin);
    let mount_state = MountState::new(offsets, safe_digest, rounds, cli.storage.clone());

    if let Err(err) = ensure_sentinel(&cli.storage, &mount_state) {
        eprintln!("safefs: {err}");
        tracing::error!(error = %err, "sentinel check failed");
        return ExitCode::FAILURE;
    }

    let options = vec![
        fuser::MountOption::FSName("safefs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];

    let fs = SafeFs::new(Arc::new(mount_state));
    tracing::info!(storage = %cli.storage.display(), mount = %cli.mount.display(), "mounting");
    if let Err(err) = fuser::mount2(fs, &cli.mount, &options) {
        eprintln!("safefs: mount failed: {err}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(level: &str, log_file: Option<&std::path::Path>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
                builder.with_writer(move || file.try_clone().expect("clone log file handle")).init();
                return;
            }
            builder.init();
        }
        None => builder.init(),
    }
}

/// Read the pin from `SAFEFS_PIN` if set, otherwise from the controlling
/// terminal with echo disabled.
fn acquire_pin() -> io::Result<Vec<u8>> {
    if let Ok(pin) = std::env::var("SAFEFS_PIN") {
        return Ok(pin.into_bytes());
    }

    print!("pin: ");
    io::stdout().flush()?;

    let fd = libc::STDIN_FILENO;
    let mut original: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut raw = original;
    raw.c_lflag &= !(libc::ECHO | libc::ICANON);
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut line = String::new();
    let result = io::stdin().read_line(&mut line);

    unsafe { libc::tcsetattr(fd, libc::TCSANOW, &original) };
    println!();

    result?;
    Ok(line.trim_end_matches(['\n', '\r']).as_bytes().to_vec())
}
