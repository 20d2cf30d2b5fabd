use crate::error::{StorageError, StorageResult};
use crate::schema;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

/// Tuning knobs for the cache database.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// DuckDB `memory_limit` pragma.
    pub memory_limit: String,
    pub threads: u32,
    /// Maximum number of records per user. `None` means unlimited.
    pub record_quota: Option<usize>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            memory_limit: "128MB".to_string(),
            threads: 1,
            record_quota: None,
        }
    }
}

/// The cache database.
#[derive(Clone)]
pub struct LocalCache {
    conn: Arc<Mutex<Connection>>,
    record_quota: Option<usize>,
    set_aside_wal: Option<PathBuf>,
}

impl LocalCache {
    /// Opens or creates a cache at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, CacheOptions::default())
    }

    /// Opens with `options`. If the database will not open and a WAL file
    /// sits next to it, the WAL is renamed aside and the open retried once;
    /// [`LocalCache::set_aside_wal`] then reports where it went.
    pub fn open_with(path: &Path, options: CacheOptions) -> StorageResult<Self> {
        check_memory_limit(&options.memory_limit)?;
        let (conn, set_aside_wal) = match Connection::open(path) {
            Ok(conn) => (conn, None),
            Err(first) => {
                let wal = wal_path(path);
                if !wal.exists() {
                    return Err(first.into());
                }
                error!(db = %path.display(), "cache will not open with its WAL: {first}");
                let moved = set_aside(&wal).map_err(|_| StorageError::Database(first))?;
                info!(wal = %moved.display(), "stale WAL set aside, reopening cache");
                (Connection::open(path)?, Some(moved))
            }
        };
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{}'; PRAGMA threads={};",
            options.memory_limit, options.threads
        ))?;
        let mut cache = Self::from_connection(conn, options.record_quota)?;
        cache.set_aside_wal = set_aside_wal;
        Ok(cache)
    }

    /// Where a stale WAL was moved during [`LocalCache::open_with`], if it
    /// had to be.
    pub fn set_aside_wal(&self) -> Option<&Path> {
        self.set_aside_wal.as_deref()
    }

    /// Opens an in-memory cache (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_in_memory_with(CacheOptions::default())
    }

    pub fn open_in_memory_with(options: CacheOptions) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, options.record_quota)
    }

    fn from_connection(conn: Connection, record_quota: Option<usize>) -> StorageResult<Self> {
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            record_quota,
            set_aside_wal: None,
        })
    }

    /// Returns the partition belonging to `user_id`.
    pub fn for_user(&self, user_id: impl Into<String>) -> UserCache {
        UserCache {
            conn: Arc::clone(&self.conn),
            user_id: user_id.into(),
            record_quota: self.record_quota,
        }
    }
}

/// DuckDB keeps its log at `<db file>.wal`.
fn wal_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

/// Renames `wal` to a non-clashing `.stale-N` sibling and returns it.
fn set_aside(wal: &Path) -> std::io::Result<PathBuf> {
    let mut n = 0u32;
    loop {
        let mut name = wal.as_os_str().to_os_string();
        name.push(format!(".stale-{n}"));
        let target = PathBuf::from(name);
        if !target.exists() {
            std::fs::rename(wal, &target)?;
            return Ok(target);
        }
        n += 1;
    }
}

/// The limit is spliced into a PRAGMA, so only size literals are accepted.
fn check_memory_limit(limit: &str) -> StorageResult<()> {
    let ok = !limit.is_empty()
        && limit.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == ' ');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidOption(format!("memory_limit {limit:?}")))
    }
}

/// One user's slice of the cache. All reads and writes are scoped to
/// `user_id`.
#[derive(Clone)]
pub struct UserCache {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) user_id: String,
    pub(crate) record_quota: Option<usize>,
}

impl UserCache {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Lock)
    }
}

impl std::fmt::Debug for UserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCache")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
