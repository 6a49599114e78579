//! Open the volume group, mount it and wait for a shutdown signal.

use anyhow::{Context, Result};
use fvde_core::{
    engine, Credentials, MountSession, SessionOptions, SessionState, VolumeEngine, VolumeSummary,
};
use fvde_mount::{
    first_available_backend, format_bytes, signal, MountBackend, MountHandle, MountOptions,
};
use std::path::PathBuf;
use tracing::instrument;

use crate::Cli;

#[cfg(any(target_os = "linux", target_os = "macos"))]
use fvde_fuse::FuseBackend;

#[cfg(windows)]
use fvde_dokan::DokanBackend;

/// Backends compiled in for this target.
fn build_backends() -> Vec<Box<dyn MountBackend>> {
    let mut backends: Vec<Box<dyn MountBackend>> = Vec::new();

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        backends.push(Box::new(FuseBackend::new()));
    }

    #[cfg(windows)]
    {
        backends.push(Box::new(DokanBackend::new()));
    }

    backends
}

/// Credentials from the command line. Secrets are moved, not copied.
pub fn credentials(cli: &mut Cli) -> Result<Credentials> {
    let mut credentials = Credentials::new();
    if let Some(key) = cli.key.take() {
        credentials = credentials
            .with_hex_key(&key)
            .context("Unable to set key")?;
    }
    if let Some(password) = cli.password.take() {
        credentials = credentials.with_password(password);
    }
    if let Some(recovery_password) = cli.recovery_password.take() {
        credentials = credentials.with_recovery_password(recovery_password);
    }
    Ok(credentials)
}

pub fn session_options(cli: &mut Cli) -> Result<SessionOptions> {
    let mut options = SessionOptions::default()
        .credentials(credentials(cli)?)
        .unattended(cli.unattended)
        .volume_offset(cli.offset);
    if let Some(plist) = &cli.encrypted_root_plist {
        options = options.encrypted_root_plist(plist);
    }
    Ok(options)
}

fn print_volumes(volumes: &[VolumeSummary]) {
    for volume in volumes {
        let size = volume
            .size
            .map_or_else(|| "unknown size".to_string(), format_bytes);
        let state = if volume.locked { " (locked)" } else { "" };
        println!(
            "Logical volume {}: {} {size}{state}",
            volume.index + 1,
            volume.entry_name
        );
    }
}

/// Opens the volume group, prompting for passwords unless unattended.
fn open_session(
    options: SessionOptions,
    sources: &[PathBuf],
    engine: &dyn VolumeEngine,
) -> Result<MountSession> {
    let mut session = MountSession::new(options);
    let state = session
        .open(engine, sources)
        .context("Unable to open source volume")?;
    tracing::info!(?state, engine = engine.name(), "Volume group opened");
    Ok(session)
}

#[instrument(level = "info", name = "cmd::mount", skip_all, fields(mount_point = %cli.mount_point.display()))]
pub fn execute(mut cli: Cli) -> Result<()> {
    if !cli.mount_point.exists() && !cfg!(windows) {
        anyhow::bail!("Mount point does not exist: {}", cli.mount_point.display());
    }

    let options = session_options(&mut cli)?;
    let engine = engine::default_engine().context("Unable to open source volume")?;
    let session = open_session(options, &cli.sources, engine.as_ref())?;
    let state = session.state();

    // Ctrl+C keeps its default meaning at the password prompt; from here on
    // it requests an orderly unmount.
    signal::install_signal_handler().context("Failed to set signal handler")?;
    signal::register_abort(session.abort_handle());

    let volumes = session.volumes();
    if volumes.is_empty() {
        anyhow::bail!("No logical volumes found");
    }
    print_volumes(&volumes);
    if state == SessionState::PartiallyLocked {
        eprintln!("Some logical volumes are locked; their files cannot be read.");
    }

    let backends = build_backends();
    let backend = first_available_backend(&backends).context("No mount backend available")?;
    tracing::debug!(backend = backend.name(), "Selected mount backend");

    let mount_options = MountOptions::default().with_extended_options(&cli.extended_options);
    let handle: Box<dyn MountHandle> = backend
        .mount(session, &cli.mount_point, &mount_options)
        .context("Unable to mount file system")?;

    eprintln!("Volumes mounted at {}", handle.mountpoint().display());
    eprintln!("Press Ctrl+C to unmount and exit");

    while !signal::shutdown_requested() {
        signal::wait_for_shutdown();
    }

    let stats = handle.stats();
    eprintln!("Unmounting...");
    handle.unmount().context("Unable to unmount file system")?;

    if let Some(stats) = stats {
        let snapshot = stats.snapshot();
        tracing::info!(%snapshot, "Mount statistics");
        eprintln!(
            "Read {} in {} requests",
            format_bytes(snapshot.bytes_read),
            snapshot.reads
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["fvdemount"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn credentials_are_taken_from_cli() {
        let mut cli = parse(&[
            "-k",
            "00112233445566778899aabbccddeeff",
            "-p",
            "secret",
            "-r",
            "recovery",
            "disk.raw",
            "/mnt",
        ]);
        let credentials = credentials(&mut cli).unwrap();
        assert_eq!(credentials.key().map(<[u8]>::len), Some(16));
        assert_eq!(credentials.password(), Some("secret"));
        assert_eq!(credentials.recovery_password(), Some("recovery"));
        assert!(cli.password.is_none());
        assert!(cli.key.is_none());
    }

    #[test]
    fn invalid_key_is_rejected() {
        let mut cli = parse(&["-k", "not-hex", "disk.raw", "/mnt"]);
        let err = credentials(&mut cli).unwrap_err();
        assert!(err.to_string().contains("Unable to set key"));
    }

    #[test]
    fn session_options_from_cli() {
        let mut cli = parse(&["-u", "-o", "512", "-e", "root.plist", "disk.raw", "/mnt"]);
        let options = session_options(&mut cli).unwrap();
        assert!(options.unattended);
        assert_eq!(options.volume_offset, 512);
        assert_eq!(
            options.encrypted_root_plist.as_deref(),
            Some(std::path::Path::new("root.plist"))
        );
    }

    #[test]
    fn opening_leaves_signals_alone() {
        use fvde_core::testing::{patterned_volume, MemoryEngine, MemoryVolume};
        use std::io::Write;

        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(&[0u8; 1024]).unwrap();
        let engine = MemoryEngine::new()
            .with_volume(MemoryVolume::unlocked(patterned_volume(512)))
            .with_volume(MemoryVolume::with_password(patterned_volume(512), "pw"));
        let mut cli = parse(&["-u", "disk.raw", "/mnt"]);
        let options = session_options(&mut cli).unwrap();

        let session = open_session(options, &[source.path().to_path_buf()], &engine).unwrap();
        assert_eq!(session.state(), SessionState::PartiallyLocked);
        assert!(!signal::handler_installed());
    }

    #[test]
    fn backend_for_target_is_compiled_in() {
        assert_eq!(build_backends().len(), 1);
    }
}
