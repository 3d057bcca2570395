use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::claims::is_token_live;
use crate::clock::Clock;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Written first, then renamed over `SESSION_FILE`.
const SESSION_TMP_FILE: &str = "session.json.tmp";

/// The authenticated identity held by the client.
///
/// Access and refresh tokens only ever exist together: a store holds either
/// a whole `SessionData` or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Single source of truth for session credentials.
///
/// Only the request pipeline and the explicit login/logout operations write
/// to a store. Implementations use interior mutability so one store can be
/// shared behind an `Arc` by every in-flight request.
pub trait TokenStore: Send + Sync {
    /// Replace the whole session. Never merges with what was there before.
    fn set_session(&self, session: SessionData);

    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    fn user_id(&self) -> Option<String>;

    /// Swap in a freshly minted access token, leaving the refresh token and
    /// user id alone. Returns `false` without writing when there is no
    /// session to update.
    fn replace_access_token(&self, access_token: String) -> bool;

    /// Remove every field. Clearing an empty store is a no-op.
    fn clear_session(&self);

    /// True iff an access token is present, decodable, and unexpired.
    fn is_valid(&self, clock: &dyn Clock) -> bool {
        self.access_token()
            .map(|token| is_token_live(&token, clock))
            .unwrap_or(false)
    }
}

/// Process-local store with no persistence.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    data: RwLock<Option<SessionData>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: SessionData) -> Self {
        Self {
            data: RwLock::new(Some(session)),
        }
    }

    /// Snapshot of the current session.
    pub fn snapshot(&self) -> Option<SessionData> {
        read(&self.data).clone()
    }
}

impl TokenStore for MemoryTokenStore {
    fn set_session(&self, session: SessionData) {
        *write(&self.data) = Some(session);
    }

    fn access_token(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.refresh_token.clone())
    }

    fn user_id(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.user_id.clone())
    }

    fn replace_access_token(&self, access_token: String) -> bool {
        match write(&self.data).as_mut() {
            Some(data) => {
                data.access_token = access_token;
                true
            }
            None => false,
        }
    }

    fn clear_session(&self) {
        *write(&self.data) = None;
    }
}

/// Store persisted as JSON in the cache directory, surviving restarts.
///
/// If the session file cannot be written the store keeps working from
/// memory for the rest of the process and reports
/// [`is_persistent`](Self::is_persistent) as `false`. The user then has to
/// log in again after a restart; nothing else degrades.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    data: RwLock<Option<SessionData>>,
    persistent: AtomicBool,
}

impl FileTokenStore {
    /// Open the store rooted at `cache_dir`, loading any saved session.
    ///
    /// An unreadable or corrupt session file is logged and treated as
    /// "logged out".
    pub fn open(cache_dir: impl AsRef<Path>) -> Self {
        let path = cache_dir.as_ref().join(SESSION_FILE);
        let data = match Self::load(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable session file");
                None
            }
        };
        debug!(has_session = data.is_some(), "Session store opened");

        Self {
            path,
            data: RwLock::new(data),
            persistent: AtomicBool::new(true),
        }
    }

    /// Whether writes are still reaching disk.
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Option<SessionData>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read session file"),
        };
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_file_name(SESSION_TMP_FILE);
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }

    /// Mirror `data` to disk. The file never keeps a session other than
    /// the one in memory: if the new one can't be written, the old one is
    /// deleted.
    fn persist(&self, data: Option<&SessionData>) {
        if let Some(data) = data {
            match self.save(data) {
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Session storage unavailable, keeping session in memory only");
                    self.persistent.store(false, Ordering::Relaxed);
                }
            }
        }
        if let Err(e) = self.remove() {
            error!(
                error = %format!("{:#}", e),
                path = %self.path.display(),
                "Could not remove session file; a stale session will be restored on next start"
            );
            self.persistent.store(false, Ordering::Relaxed);
        }
    }
}

impl TokenStore for FileTokenStore {
    fn set_session(&self, session: SessionData) {
        let mut guard = write(&self.data);
        self.persist(Some(&session));
        *guard = Some(session);
    }

    fn access_token(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.refresh_token.clone())
    }

    fn user_id(&self) -> Option<String> {
        read(&self.data).as_ref().map(|d| d.user_id.clone())
    }

    fn replace_access_token(&self, access_token: String) -> bool {
        let mut guard = write(&self.data);
        let Some(data) = guard.as_mut() else {
            return false;
        };
        data.access_token = access_token;
        self.persist(Some(&*data));
        true
    }

    fn clear_session(&self) {
        let mut guard = write(&self.data);
        *guard = None;
        self.persist(None);
    }
}

// A panic while holding the lock leaves plain data behind, so poisoning is
// safe to ignore.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
