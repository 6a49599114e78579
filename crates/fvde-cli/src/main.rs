#![deny(unsafe_code)]

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod mount;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Mounts the logical volumes of a FileVault volume group
#[derive(Parser, Debug)]
#[command(name = "fvdemount")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Mount with a password prompt for every locked volume
    fvdemount /dev/sdb2 /mnt/fvde

    # Mount unattended with a recovery password from the environment
    FVDEMOUNT_RECOVERY_PASSWORD=... fvdemount -u image.raw /mnt/fvde

    # Volume group spread over two physical volumes
    fvdemount -e EncryptedRoot.plist disk1.raw disk2.raw /mnt/fvde
")]
pub struct Cli {
    /// Decrypted EncryptedRoot.plist, for volumes that need it
    #[arg(short = 'e', value_name = "PLIST_PATH")]
    pub encrypted_root_plist: Option<PathBuf>,

    /// Volume master key, 32 hexadecimal characters
    #[arg(short = 'k', value_name = "KEY")]
    pub key: Option<String>,

    /// Byte offset of the volume within each source
    #[arg(short = 'o', value_name = "OFFSET", default_value_t = 0)]
    pub offset: u64,

    /// Password (prefer the prompt or FVDEMOUNT_PASSWORD)
    #[arg(short = 'p', value_name = "PASSWORD", env = "FVDEMOUNT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Recovery password
    #[arg(
        short = 'r',
        value_name = "RECOVERY_PASSWORD",
        env = "FVDEMOUNT_RECOVERY_PASSWORD",
        hide_env_values = true
    )]
    pub recovery_password: Option<String>,

    /// Never prompt; locked volumes stay locked
    #[arg(short = 'u')]
    pub unattended: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Extended mount options, comma separated (e.g. allow_other)
    #[arg(short = 'X', value_name = "OPTIONS")]
    pub extended_options: Vec<String>,

    /// Source files or devices of the volume group
    #[arg(value_name = "SOURCES", required = true, num_args = 1..)]
    pub sources: Vec<PathBuf>,

    /// Directory (or drive letter on Windows) to mount at
    #[arg(value_name = "MOUNT_POINT")]
    pub mount_point: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    setup_tracing(cli.verbose);
    eprintln!("fvdemount {}\n", env!("CARGO_PKG_VERSION"));

    match mount::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "fvdemount failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "fvdemount", "-e", "root.plist", "-k", "00112233445566778899aabbccddeeff", "-o",
            "4096", "-p", "pw", "-r", "rec", "-u", "-vv", "-X", "allow_other", "a.raw", "b.raw",
            "/mnt/fvde",
        ])
        .unwrap();
        assert_eq!(cli.encrypted_root_plist, Some(PathBuf::from("root.plist")));
        assert_eq!(cli.offset, 4096);
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert_eq!(cli.recovery_password.as_deref(), Some("rec"));
        assert!(cli.unattended);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.extended_options, ["allow_other"]);
        assert_eq!(cli.sources, [PathBuf::from("a.raw"), PathBuf::from("b.raw")]);
        assert_eq!(cli.mount_point, PathBuf::from("/mnt/fvde"));
    }

    #[test]
    fn requires_source_and_mount_point() {
        assert!(Cli::try_parse_from(["fvdemount", "/mnt/fvde"]).is_err());
        assert!(Cli::try_parse_from(["fvdemount"]).is_err());
    }

    #[test]
    fn rejects_non_numeric_offset() {
        let err = Cli::try_parse_from(["fvdemount", "-o", "abc", "a.raw", "/mnt"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
