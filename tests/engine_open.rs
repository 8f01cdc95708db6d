//! Database open protocol: registry, settings, cluster stamp, credentials.

use std::sync::Arc;

use tempfile::tempdir;
use tessera::engine::{Authenticator, ConnectionInfo, Database, Engine};
use tessera::{error_code, ErrorCode};

fn ci(name: &str, dir: &std::path::Path) -> ConnectionInfo {
    ConnectionInfo::new(name, "admin", b"pw".to_vec()).persistent(dir)
}

#[test]
fn jmx_is_an_unsupported_setting() {
    let engine = Engine::with_timings(1, 4, 50);
    let mut info = ConnectionInfo::new("mem", "admin", b"pw".to_vec());
    info.jmx = true;

    let err = engine.open_session(info).unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::UnsupportedSetting));
}

#[test]
fn if_exists_refuses_to_create_a_database() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_timings(1, 4, 50);
    let mut info = ci("absent", dir.path());
    info.if_exists = true;

    let err = engine.open_session(info).unwrap_err();
    assert_eq!(
        error_code(&err),
        Some(ErrorCode::DatabaseNotFoundWithIfExists)
    );
}

#[test]
fn forbidden_creation_reports_not_found() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_timings(1, 4, 50);
    let mut info = ci("absent", dir.path());
    info.forbid_creation = true;

    let err = engine.open_session(info).unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::RemoteDatabaseNotFound));
}

#[test]
fn mv_store_flag_selects_the_data_file_suffix() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_timings(1, 4, 50);

    let session = engine.open_session(ci("plain", dir.path())).unwrap();
    drop(session);
    let mut info = ci("versioned", dir.path());
    info.mv_store = true;
    let session = engine.open_session(info).unwrap();
    drop(session);

    assert!(dir.path().join("plain.t.db").exists());
    assert!(dir.path().join("versioned.mv.db").exists());
}

#[test]
fn second_engine_sees_the_lock_file() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_timings(1, 4, 50);
    let _session = engine.open_session(ci("locked", dir.path())).unwrap();

    let other = Engine::with_timings(1, 4, 50);
    let err = other.open_session(ci("locked", dir.path())).unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::DatabaseAlreadyOpen));
}

#[test]
fn reopen_after_close_recovers_the_database() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_timings(1, 4, 50);
    let session = engine.open_session(ci("reopen", dir.path())).unwrap();
    drop(session);
    engine.close_database("reopen").unwrap();

    let session = engine.open_session(ci("reopen", dir.path())).unwrap();
    assert_eq!(session.database().name(), "reopen");
}

#[test]
fn closing_database_times_out_the_open() {
    let engine = Engine::with_timings(1, 4, 30);
    let session = engine
        .open_session(ConnectionInfo::new("shutting", "admin", b"pw".to_vec()))
        .unwrap();
    session.database().set_closing(true);
    drop(session);

    let err = engine
        .open_session(ConnectionInfo::new("shutting", "admin", b"pw".to_vec()))
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::DatabaseCalledAtShutdown));
}

#[test]
fn wrong_credentials_throttle_and_report_one_code() {
    let engine = Engine::with_timings(1, 8, 50);
    let good = ConnectionInfo::new("auth", "admin", b"right".to_vec());
    engine.open_session(good.clone()).unwrap();
    assert_eq!(engine.wrong_password_delay_ms(), 1);

    // unknown user and bad password yield the same code
    let bad_password = ConnectionInfo::new("auth", "admin", b"wrong".to_vec());
    let err = engine.open_session(bad_password).unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::WrongUserOrPassword));

    let unknown_user = ConnectionInfo::new("auth", "nobody", b"right".to_vec());
    let err = engine.open_session(unknown_user).unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::WrongUserOrPassword));

    // the delay doubled after each failure
    assert_eq!(engine.wrong_password_delay_ms(), 4);

    // the next correct login also pays a delay, then resets the throttle
    engine.open_session(good).unwrap();
    assert_eq!(engine.wrong_password_delay_ms(), 1);
}

#[test]
fn throttle_delay_is_capped() {
    let engine = Engine::with_timings(1, 4, 50);
    engine
        .open_session(ConnectionInfo::new("cap", "admin", b"right".to_vec()))
        .unwrap();

    for _ in 0..5 {
        let bad = ConnectionInfo::new("cap", "admin", b"wrong".to_vec());
        let _ = engine.open_session(bad);
    }

    assert_eq!(engine.wrong_password_delay_ms(), 4);
}

#[test]
fn cluster_stamp_mismatch_is_fatal() {
    let engine = Engine::with_timings(1, 4, 50);

    // database runs stand-alone, client expects a cluster
    engine
        .open_session(ConnectionInfo::new("solo", "admin", b"pw".to_vec()))
        .unwrap();
    let mut clustered_probe = ConnectionInfo::new("solo", "admin", b"pw".to_vec());
    clustered_probe.cluster = Some("a,b".into());
    let err = engine.open_session(clustered_probe).unwrap_err();
    assert_eq!(
        error_code(&err),
        Some(ErrorCode::ClusterErrorDatabaseRunsAlone)
    );

    // database runs clustered, client does not match the stamp
    let mut clustered = ConnectionInfo::new("duo", "admin", b"pw".to_vec());
    clustered.cluster = Some("a,b".into());
    engine.open_session(clustered.clone()).unwrap();
    let plain_probe = ConnectionInfo::new("duo", "admin", b"pw".to_vec());
    let err = engine.open_session(plain_probe).unwrap_err();
    assert_eq!(
        error_code(&err),
        Some(ErrorCode::ClusterErrorDatabaseRunsClustered)
    );

    // a matching stamp connects
    engine.open_session(clustered).unwrap();
}

struct AllowEveryone;

impl Authenticator for AllowEveryone {
    fn authenticate(
        &self,
        _database: &Database,
        user: &str,
        _password_hash: &[u8],
    ) -> eyre::Result<bool> {
        Ok(user == "trusted")
    }
}

#[test]
fn auth_realm_requires_a_registered_authenticator() {
    let engine = Engine::with_timings(1, 4, 50);
    let mut info = ConnectionInfo::new("realm", "trusted", b"pw".to_vec());
    info.auth_realm = Some("ldap".into());

    let err = engine.open_session(info.clone()).unwrap_err();
    assert_eq!(
        error_code(&err),
        Some(ErrorCode::AuthenticatorNotAvailable)
    );

    engine.register_authenticator("ldap", Arc::new(AllowEveryone));
    engine.open_session(info).unwrap();
}

#[test]
fn open_new_forces_a_fresh_instance() {
    let engine = Engine::with_timings(1, 4, 50);
    let session = engine
        .open_session(ConnectionInfo::new("fresh", "admin", b"pw".to_vec()))
        .unwrap();
    let first = Arc::as_ptr(session.database()) as usize;
    drop(session);

    let mut info = ConnectionInfo::new("fresh", "admin", b"pw".to_vec());
    info.open_new = true;
    let session = engine.open_session(info).unwrap();
    let second = Arc::as_ptr(session.database()) as usize;

    assert_ne!(first, second);
}
