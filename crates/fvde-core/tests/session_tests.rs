//! Mount session tests against the in-memory engine.

use fvde_core::testing::{patterned_volume, MemoryEngine, MemoryVolume, ScriptedInput};
use fvde_core::{
    Credentials, EngineError, FileEntry, FvdeError, MountSession, SessionOptions, SessionState,
    VolumeIndex,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn source_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0u8; 4096]).unwrap();
    file.flush().unwrap();
    file
}

fn session(options: SessionOptions, input: ScriptedInput) -> MountSession {
    MountSession::with_input(options, Box::new(input))
}

#[test]
fn test_unlocks_with_supplied_password() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::with_password(patterned_volume(1024), "pw"))
        .with_volume(MemoryVolume::with_password(patterned_volume(2048), "pw"));
    let options = SessionOptions::default()
        .credentials(Credentials::new().with_password("pw"));
    let mut session = session(options, ScriptedInput::silent());

    let state = session.open(&engine, &[source.path()]).unwrap();

    assert_eq!(state, SessionState::Unlocked);
    assert_eq!(session.state(), SessionState::Unlocked);
    let volumes = session.volumes();
    assert_eq!(volumes.len(), 2);
    assert_eq!(volumes[0].entry_name, "fvde1");
    assert_eq!(volumes[1].size, Some(2048));
    assert!(volumes.iter().all(|v| !v.locked));
}

#[test]
fn test_credentials_applied_in_order_before_unlock() {
    let source = source_file();
    let engine = MemoryEngine::new().with_volume(
        MemoryVolume::with_key(patterned_volume(512), &[0x11; 16]).recovery_password("REC"),
    );
    let options = SessionOptions::default().credentials(
        Credentials::new()
            .with_key(vec![0x22; 16])
            .with_password("wrong")
            .with_recovery_password("REC"),
    );
    let mut session = session(options, ScriptedInput::silent());

    assert_eq!(
        session.open(&engine, &[source.path()]).unwrap(),
        SessionState::Unlocked
    );
    assert_eq!(
        engine.log().matching("volume 1"),
        vec![
            "volume 1: set_key",
            "volume 1: set_password",
            "volume 1: set_recovery_password",
            "volume 1: unlock -> unlocked",
        ]
    );
}

#[test]
fn test_unattended_leaves_volume_locked() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::with_password(patterned_volume(1024), "secret"));
    let input = ScriptedInput::new(["never used"]);
    let input_log = input.log();
    let mut session = session(SessionOptions::default().unattended(true), input);

    let state = session.open(&engine, &[source.path()]).unwrap();

    assert_eq!(state, SessionState::PartiallyLocked);
    assert!(input_log.events().is_empty(), "unattended must not prompt");

    let file_system = session.file_system();
    assert_eq!(file_system.number_of_volumes(), 1);
    let entry = FileEntry::from_path(&file_system, "/fvde1").unwrap();
    assert!(entry.is_locked().unwrap());
    assert_eq!(entry.size().unwrap(), 1024);

    let mut buf = [0u8; 16];
    assert!(matches!(
        entry.read_at(&mut buf, 0),
        Err(FvdeError::Engine(EngineError::Locked))
    ));
}

#[test]
fn test_interactive_prompt_unlocks() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::with_password(patterned_volume(1024), "secret"));
    let input = ScriptedInput::new(["secret"]);
    let input_log = input.log();
    let mut session = session(SessionOptions::default(), input);

    assert_eq!(
        session.open(&engine, &[source.path()]).unwrap(),
        SessionState::Unlocked
    );

    let events = input_log.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].starts_with("notice: Logical volume 1 is locked"));
    assert_eq!(events[1], "prompt: Password: ");

    let file_system = session.file_system();
    let entry = FileEntry::from_path(&file_system, "/fvde1").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(entry.read_at(&mut buf, 251).unwrap(), 4);
    assert_eq!(buf, [0, 1, 2, 3]);
}

#[test]
fn test_wrong_prompted_password_is_not_fatal() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::with_password(patterned_volume(256), "secret"))
        .with_volume(MemoryVolume::unlocked(patterned_volume(128)));
    let input = ScriptedInput::new(["guess"]);
    let input_log = input.log();
    let mut session = session(SessionOptions::default(), input);

    let state = session.open(&engine, &[source.path()]).unwrap();

    assert_eq!(state, SessionState::PartiallyLocked);
    assert_eq!(session.file_system().number_of_volumes(), 2);
    assert_eq!(
        input_log.matching("notice: Unable to unlock"),
        vec!["notice: Unable to unlock logical volume 1."]
    );
    assert_eq!(
        engine.log().matching("volume 1: unlock"),
        vec!["volume 1: unlock -> locked", "volume 1: unlock -> locked"],
        "exactly one retry after the prompt"
    );
}

#[test]
fn test_prompt_failure_leaves_volume_locked() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::with_password(patterned_volume(256), "secret"));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());

    assert_eq!(
        session.open(&engine, &[source.path()]).unwrap(),
        SessionState::PartiallyLocked
    );
}

#[test]
fn test_hard_unlock_error_aborts_and_releases() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::unlocked(patterned_volume(256)))
        .with_volume(MemoryVolume::unlocked(patterned_volume(256)).failing_unlock("corrupt key bag"));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());

    let err = session.open(&engine, &[source.path()]).unwrap_err();

    assert!(
        matches!(err, FvdeError::Engine(EngineError::Unlock(ref reason)) if reason == "corrupt key bag"),
        "{err:?}"
    );
    assert_eq!(session.state(), SessionState::Unopened);
    assert_eq!(session.file_system().number_of_volumes(), 0);

    let events = engine.log().events();
    let released: Vec<&String> = events
        .iter()
        .filter(|e| e.ends_with("released"))
        .collect();
    assert_eq!(
        released,
        vec!["volume 2: released", "volume 1: released", "group released"]
    );
}

#[test]
fn test_engine_open_failure() {
    let source = source_file();
    let engine = MemoryEngine::new().failing_open("not an FVDE volume");
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());

    let err = session.open(&engine, &[source.path()]).unwrap_err();
    assert!(matches!(err, FvdeError::Engine(EngineError::Open(_))));
    assert_eq!(session.state(), SessionState::Unopened);
}

#[test]
fn test_open_rejects_bad_arguments() {
    let engine = MemoryEngine::new();
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());

    let no_sources: [&str; 0] = [];
    assert!(matches!(
        session.open(&engine, &no_sources),
        Err(FvdeError::NoSources)
    ));
    assert!(matches!(
        session.open(&engine, &["/nonexistent/fvde.img"]),
        Err(FvdeError::Io { .. })
    ));
    assert_eq!(session.state(), SessionState::Unopened);
}

#[test]
fn test_open_twice_rejected() {
    let source = source_file();
    let engine = MemoryEngine::new().with_volume(MemoryVolume::unlocked(patterned_volume(64)));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());

    session.open(&engine, &[source.path()]).unwrap();
    assert!(matches!(
        session.open(&engine, &[source.path()]),
        Err(FvdeError::AlreadyOpen)
    ));
}

#[test]
fn test_close_releases_highest_first_and_is_idempotent() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::unlocked(patterned_volume(64)))
        .with_volume(MemoryVolume::unlocked(patterned_volume(64)))
        .with_volume(MemoryVolume::unlocked(patterned_volume(64)));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());
    session.open(&engine, &[source.path()]).unwrap();

    session.close();
    session.close();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        engine.log().matching("volume").into_iter().filter(|e| e.ends_with("released")).collect::<Vec<_>>(),
        vec!["volume 3: released", "volume 2: released", "volume 1: released"]
    );
    assert_eq!(engine.log().matching("group released").len(), 1);
}

#[test]
fn test_abort_is_forwarded_to_engine() {
    let source = source_file();
    let engine = MemoryEngine::new().with_volume(MemoryVolume::unlocked(patterned_volume(64)));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());
    let abort = session.abort_handle();
    session.open(&engine, &[source.path()]).unwrap();

    abort.signal();

    assert!(engine.abort_signalled());
    let file_system = session.file_system();
    let entry = FileEntry::from_path(&file_system, "/fvde1").unwrap();
    let mut buf = [0u8; 8];
    assert!(matches!(
        entry.read_at(&mut buf, 0),
        Err(FvdeError::Engine(EngineError::Aborted))
    ));
}

#[test]
fn test_abort_before_open_stops_enumeration() {
    let source = source_file();
    let engine = MemoryEngine::new().with_volume(MemoryVolume::unlocked(patterned_volume(64)));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());
    session.signal_abort();

    let err = session.open(&engine, &[source.path()]).unwrap_err();
    assert!(matches!(err, FvdeError::Engine(EngineError::Aborted)));
}

#[test]
fn test_plist_path_reaches_engine() {
    let source = source_file();
    let engine = MemoryEngine::new();
    let options = SessionOptions::default().encrypted_root_plist("/tmp/EncryptedRoot.plist.xml");
    let mut session = session(options, ScriptedInput::silent());

    assert_eq!(
        session.open(&engine, &[source.path()]).unwrap(),
        SessionState::Unlocked
    );
    assert_eq!(
        engine.log().matching("plist"),
        vec!["plist: /tmp/EncryptedRoot.plist.xml"]
    );
}

#[test]
fn test_listing_matches_volume_count() {
    let source = source_file();
    let engine = MemoryEngine::new()
        .with_volume(MemoryVolume::unlocked(patterned_volume(64)))
        .with_volume(MemoryVolume::unlocked(patterned_volume(64)));
    let mut session = session(SessionOptions::default(), ScriptedInput::silent());
    session.open(&engine, &[source.path()]).unwrap();

    let file_system = session.file_system();
    let root = FileEntry::from_path(&file_system, "/").unwrap();
    assert_eq!(root.volume_index(), VolumeIndex::Root);
    let names: Vec<String> = (0..root.number_of_sub_entries().unwrap())
        .map(|i| root.sub_entry(i).unwrap().name().unwrap().to_owned())
        .collect();
    assert_eq!(names, ["fvde1", "fvde2"]);
}
