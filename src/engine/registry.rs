//! # Engine Registry
//!
//! The [`Engine`] holds the map of open databases and is responsible for
//! opening and creating new ones. It is an explicit, injected value with
//! defined construction and teardown: nothing here is process-global.
//!
//! ## Open Protocol
//!
//! `open_session` resolves the connection settings in order:
//!
//! 1. `JMX` is not supported in this build (`UNSUPPORTED_SETTING_1`).
//! 2. A database that is closing is retried with 1 ms backoff; past the
//!    deadline the open fails with `DATABASE_CALLED_AT_SHUTDOWN`.
//! 3. `OPEN_NEW` bypasses the registry and forces a fresh instance.
//! 4. For a missing persistent database, `IFEXISTS` reports
//!    `DATABASE_NOT_FOUND_WITH_IF_EXISTS_1` and forbidden creation reports
//!    `REMOTE_DATABASE_NOT_FOUND_1`; the data-file suffix follows the
//!    multi-version flag.
//! 5. The cluster stamp must match (`CLUSTER_ERROR_*`).
//! 6. Credentials are validated locally, or through the authenticator named
//!    by `AUTHREALM` (`AUTHENTICATOR_NOT_AVAILABLE` when none is
//!    registered).
//!
//! ## Credential Throttle
//!
//! One delay cell per engine, serialized by its mutex so parallel attempts
//! cannot race the update ordering. Every failure doubles the delay (capped)
//! and sleeps it with jitter before reporting the single
//! `WRONG_USER_OR_PASSWORD` code. The first *successful* authentication
//! after failures sleeps a randomized slice of the current delay too, then
//! resets the cell: an attacker cannot distinguish success from failure by
//! timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::database::{Database, DbSettings};
use super::session::Session;
use crate::config::{
    DELAY_WRONG_PASSWORD_MAX, DELAY_WRONG_PASSWORD_MIN, LOCK_MODE_READ_COMMITTED,
    MAX_CLOSING_WAIT_MS,
};
use crate::error::{DbError, ErrorCode};

/// External credential validation for `AUTHREALM` connections.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, database: &Database, user: &str, password_hash: &[u8]) -> Result<bool>;
}

/// Settings for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub name: String,
    pub user: String,
    pub user_password_hash: Vec<u8>,
    pub persistent: bool,
    pub base_dir: std::path::PathBuf,
    pub mv_store: bool,
    pub if_exists: bool,
    pub forbid_creation: bool,
    pub cipher: Option<String>,
    pub auth_realm: Option<String>,
    pub cluster: Option<String>,
    pub open_new: bool,
    pub jmx: bool,
    pub lock_mode: i32,
    pub max_memory_undo: usize,
}

impl ConnectionInfo {
    pub fn new(name: impl Into<String>, user: impl Into<String>, password_hash: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            user_password_hash: password_hash,
            persistent: false,
            base_dir: std::path::PathBuf::from("."),
            mv_store: false,
            if_exists: false,
            forbid_creation: false,
            cipher: None,
            auth_realm: None,
            cluster: None,
            open_new: false,
            jmx: false,
            lock_mode: LOCK_MODE_READ_COMMITTED,
            max_memory_undo: crate::config::DEFAULT_MAX_MEMORY_UNDO,
        }
    }

    pub fn persistent(mut self, base_dir: impl Into<std::path::PathBuf>) -> Self {
        self.persistent = true;
        self.base_dir = base_dir.into();
        self
    }

    fn settings(&self) -> DbSettings {
        DbSettings {
            name: self.name.clone(),
            persistent: self.persistent,
            mv_store: self.mv_store,
            base_dir: self.base_dir.clone(),
            cipher: self.cipher.clone(),
            cluster: self.cluster.clone(),
            lock_mode: self.lock_mode,
            max_memory_undo: self.max_memory_undo,
        }
    }
}

/// Registry of open databases plus the engine-wide credential throttle.
pub struct Engine {
    databases: Mutex<HashMap<String, Arc<Database>>>,
    authenticators: Mutex<HashMap<String, Arc<dyn Authenticator>>>,
    wrong_password_delay: Mutex<ThrottleState>,
    min_delay_ms: u64,
    max_delay_ms: u64,
    closing_wait_ms: u64,
}

struct ThrottleState {
    delay_ms: u64,
    rng: SmallRng,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_timings(
            DELAY_WRONG_PASSWORD_MIN,
            DELAY_WRONG_PASSWORD_MAX,
            MAX_CLOSING_WAIT_MS,
        )
    }

    /// Constructor with injectable timings (tests shrink the delays).
    pub fn with_timings(min_delay_ms: u64, max_delay_ms: u64, closing_wait_ms: u64) -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            authenticators: Mutex::new(HashMap::new()),
            wrong_password_delay: Mutex::new(ThrottleState {
                delay_ms: min_delay_ms,
                rng: SmallRng::from_entropy(),
            }),
            min_delay_ms,
            max_delay_ms,
            closing_wait_ms,
        }
    }

    pub fn register_authenticator(
        &self,
        realm: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
    ) {
        self.authenticators
            .lock()
            .insert(realm.into(), authenticator);
    }

    /// Current throttle delay (test hook).
    pub fn wrong_password_delay_ms(&self) -> u64 {
        self.wrong_password_delay.lock().delay_ms
    }

    /// Opens a session against a (possibly new) database.
    pub fn open_session(&self, ci: ConnectionInfo) -> Result<Session> {
        if ci.jmx {
            return Err(DbError::get(ErrorCode::UnsupportedSetting, "JMX"));
        }
        let start = Instant::now();
        loop {
            let database = self.open_database(&ci)?;
            if database.is_closing() {
                // another session is closing this database; wait briefly
                if start.elapsed() >= Duration::from_millis(self.closing_wait_ms) {
                    return Err(DbError::get(
                        ErrorCode::DatabaseCalledAtShutdown,
                        ci.name.clone(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            self.check_cluster(&ci, &database)?;
            let correct = self.authenticate(&ci, &database)?;
            self.validate_user_and_password(correct)?;
            debug!(database = %ci.name, user = %ci.user, "session opened");
            return Ok(database.create_session(ci.user.clone()));
        }
    }

    fn open_database(&self, ci: &ConnectionInfo) -> Result<Arc<Database>> {
        let mut databases = self.databases.lock();
        if !ci.open_new {
            if let Some(db) = databases.get(&ci.name) {
                return Ok(Arc::clone(db));
            }
        }
        if ci.persistent {
            let path = ci.settings().data_file_path();
            if !path.exists() {
                if ci.if_exists {
                    return Err(DbError::get(
                        ErrorCode::DatabaseNotFoundWithIfExists,
                        ci.name.clone(),
                    ));
                }
                if ci.forbid_creation {
                    return Err(DbError::get(
                        ErrorCode::RemoteDatabaseNotFound,
                        ci.name.clone(),
                    ));
                }
            }
        }
        let database = Database::open(ci.settings())?;
        if !database.has_users() {
            // users are the last thing added on creation: none around means
            // the database is new, and the connecting user becomes admin
            database.set_master_user(ci.user.clone(), ci.user_password_hash.clone());
        }
        databases.insert(ci.name.clone(), Arc::clone(&database));
        Ok(database)
    }

    fn check_cluster(&self, ci: &ConnectionInfo, database: &Database) -> Result<()> {
        match (database.cluster_stamp(), ci.cluster.as_deref()) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(DbError::get(
                ErrorCode::ClusterErrorDatabaseRunsAlone,
                ci.name.clone(),
            )),
            (Some(stamp), probe) if probe != Some(stamp) => Err(DbError::get(
                ErrorCode::ClusterErrorDatabaseRunsClustered,
                stamp.to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn authenticate(&self, ci: &ConnectionInfo, database: &Database) -> Result<bool> {
        match &ci.auth_realm {
            Some(realm) => {
                let authenticator =
                    self.authenticators.lock().get(realm).cloned().ok_or_else(|| {
                        DbError::get(ErrorCode::AuthenticatorNotAvailable, realm.clone())
                    })?;
                authenticator.authenticate(database, &ci.user, &ci.user_password_hash)
            }
            None => Ok(database.validate_user(&ci.user, &ci.user_password_hash)),
        }
    }

    /// Applies the timing-protection policy around an authentication result.
    fn validate_user_and_password(&self, correct: bool) -> Result<()> {
        let mut throttle = self.wrong_password_delay.lock();
        if correct {
            let delay = throttle.delay_ms;
            if delay > self.min_delay_ms {
                // the first correct password must be delayed as well
                let sleep_for = throttle.rng.gen_range(0..delay);
                throttle.delay_ms = self.min_delay_ms;
                std::thread::sleep(Duration::from_millis(sleep_for));
            }
            Ok(())
        } else {
            let delay = throttle.delay_ms;
            throttle.delay_ms = (delay * 2).min(self.max_delay_ms);
            let jitter = throttle.rng.gen_range(0..=delay / 4);
            warn!(delay_ms = delay + jitter, "failed authentication throttled");
            std::thread::sleep(Duration::from_millis(delay + jitter));
            Err(DbError::get(ErrorCode::WrongUserOrPassword, ""))
        }
    }

    /// Closes one database and removes it from the registry.
    pub fn close_database(&self, name: &str) -> Result<()> {
        let database = self.databases.lock().remove(name);
        if let Some(database) = database {
            database.close()?;
        }
        Ok(())
    }

    /// Closes every open database and empties the registry.
    pub fn close_all(&self) -> Result<()> {
        let databases: Vec<Arc<Database>> = self.databases.lock().drain().map(|(_, v)| v).collect();
        for database in databases {
            database.close()?;
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
