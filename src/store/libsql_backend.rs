//! libSQL backend — async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. The cooldown invariant is
//! enforced inside a single `INSERT … SELECT … WHERE NOT EXISTS` statement so
//! that concurrent confirmations cannot both pass the check.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, SubmissionError};
use crate::form::model::{Draft, InstitutionCategory, Record};
use crate::store::migrations;
use crate::store::traits::{RecordStore, SnapshotHandle};

/// Default rolling window during which a submitter may store only one record.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Where the database file lives (`None` for in-memory).
    path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    cooldown: Duration,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    ///
    /// Snapshots go next to the database file unless
    /// [`with_backup_dir`](Self::with_backup_dir) says otherwise.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            path: Some(path.to_path_buf()),
            backup_dir: path.parent().map(Path::to_path_buf),
            cooldown: DEFAULT_COOLDOWN,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            path: None,
            backup_dir: None,
            cooldown: DEFAULT_COOLDOWN,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Override the duplicate-submission window.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Directory that receives snapshot copies.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn cooldown_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX)
    }

    /// Remaining cooldown relative to `now`.
    async fn cooldown_remaining_at(
        &self,
        submitter_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MAX(created_at) FROM records WHERE submitter_id = ?1",
                params![submitter_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cooldown_remaining: {e}")))?;

        let latest = match rows.next().await {
            Ok(Some(row)) => opt_text_col(&row, 0).map(|s| parse_datetime(&s)),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("cooldown_remaining: {e}"))),
        };

        Ok(latest.and_then(|created_at| {
            let free_at = created_at
                .checked_add_signed(self.cooldown_chrono())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (free_at - now).to_std().ok().filter(|d| !d.is_zero())
        }))
    }

    /// Insert `draft` as if confirmed at `now`, subject to the cooldown.
    ///
    /// [`RecordStore::save`] calls this with the current time.
    pub async fn save_at(
        &self,
        draft: &Draft,
        now: DateTime<Utc>,
    ) -> Result<Record, SubmissionError> {
        draft.require_complete()?;
        let category = draft
            .institution_category
            .ok_or(SubmissionError::Incomplete {
                field: "institution_category",
            })?;

        let cutoff = now
            .checked_sub_signed(self.cooldown_chrono())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO records (submitter_id, display_name, handle, contact_number,
                    institution_category, institution_name, address, landmark,
                    latitude, longitude, photo_reference, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
                 WHERE NOT EXISTS (
                    SELECT 1 FROM records WHERE submitter_id = ?1 AND created_at > ?13
                 )
                 RETURNING id",
                params![
                    draft.submitter_id,
                    opt_text(draft.display_name.as_deref()),
                    opt_text(draft.handle.as_deref()),
                    opt_text(draft.contact_number.as_deref()),
                    category.as_str(),
                    opt_text(draft.institution_name.as_deref()),
                    opt_text(draft.address.as_deref()),
                    opt_text(draft.landmark.as_deref()),
                    opt_real(draft.latitude),
                    opt_real(draft.longitude),
                    opt_text(draft.photo_reference.as_deref()),
                    format_datetime(now),
                    format_datetime(cutoff),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        let inserted_id = match rows.next().await {
            Ok(Some(row)) => Some(
                row.get::<i64>(0)
                    .map_err(|e| DatabaseError::Query(format!("save row parse: {e}")))?,
            ),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("save: {e}")).into()),
        };
        drop(rows);

        let Some(id) = inserted_id else {
            let remaining = self
                .cooldown_remaining_at(draft.submitter_id, now)
                .await?
                .unwrap_or(Duration::ZERO);
            warn!(
                submitter_id = draft.submitter_id,
                remaining_secs = remaining.as_secs(),
                "Duplicate submission rejected"
            );
            return Err(SubmissionError::Duplicate {
                submitter_id: draft.submitter_id,
                remaining,
            });
        };

        let record = self.get_by_id(id).await?.ok_or_else(|| {
            DatabaseError::Query(format!("save: inserted record {id} not found"))
        })?;
        info!(
            record_id = record.id,
            submitter_id = record.submitter_id,
            category = %record.institution_category,
            "Record saved"
        );
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Record>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_id: {e}"))),
        }
    }

    fn snapshot_path(&self, dir: &Path, now: DateTime<Utc>) -> PathBuf {
        let stem = self
            .path
            .as_deref()
            .and_then(Path::file_stem)
            .and_then(|s| s.to_str())
            .unwrap_or("records");
        let candidate = dir.join(format!("{stem}.backup_{}.db", now.format("%Y%m%d_%H%M%S")));
        if candidate.exists() {
            dir.join(format!("{stem}.backup_{}.db", now.format("%Y%m%d_%H%M%S_%6f")))
        } else {
            candidate
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 (microseconds, `Z`) so lexical order is time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<f64>` to libsql Value.
fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

/// Read a nullable TEXT column.
fn opt_text_col(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(libsql::Value::Text(s)) => Some(s),
        _ => None,
    }
}

/// Read a nullable REAL column; NULL stays absent rather than becoming zero.
fn opt_real_col(row: &libsql::Row, idx: i32) -> Option<f64> {
    match row.get_value(idx) {
        Ok(libsql::Value::Real(v)) => Some(v),
        Ok(libsql::Value::Integer(v)) => Some(v as f64),
        _ => None,
    }
}

const RECORD_COLUMNS: &str = "id, submitter_id, display_name, handle, contact_number, institution_category, institution_name, address, landmark, latitude, longitude, photo_reference, created_at";

/// Map a libsql Row to a Record. Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<Record, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("record row parse: {e}"));
    let category_str: String = row.get(5).map_err(parse)?;
    let institution_category: InstitutionCategory = category_str
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let created_str: String = row.get(12).map_err(parse)?;

    Ok(Record {
        id: row.get(0).map_err(parse)?,
        submitter_id: row.get(1).map_err(parse)?,
        display_name: opt_text_col(row, 2),
        handle: opt_text_col(row, 3),
        contact_number: opt_text_col(row, 4).unwrap_or_default(),
        institution_category,
        institution_name: opt_text_col(row, 6).unwrap_or_default(),
        address: opt_text_col(row, 7).unwrap_or_default(),
        landmark: opt_text_col(row, 8).unwrap_or_default(),
        latitude: opt_real_col(row, 9),
        longitude: opt_real_col(row, 10),
        photo_reference: opt_text_col(row, 11),
        created_at: parse_datetime(&created_str),
    })
}

/// Read every row; a row that cannot be read or mapped fails the whole read.
async fn collect_records(mut rows: libsql::Rows) -> Result<Vec<Record>, DatabaseError> {
    let mut records = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("record rows: {e}")))?
    {
        records.push(row_to_record(&row)?);
    }
    Ok(records)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlBackend {
    async fn cooldown_remaining(
        &self,
        submitter_id: i64,
    ) -> Result<Option<Duration>, DatabaseError> {
        self.cooldown_remaining_at(submitter_id, Utc::now()).await
    }

    async fn save(&self, draft: &Draft) -> Result<Record, SubmissionError> {
        self.save_at(draft, Utc::now()).await
    }

    async fn get_latest(&self, submitter_id: i64) -> Result<Option<Record>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE submitter_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![submitter_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_latest: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_latest: {e}"))),
        }
    }

    async fn get_all(&self) -> Result<Vec<Record>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_all: {e}")))?;

        let records = collect_records(rows).await?;
        debug!(count = records.len(), "Loaded all records");
        Ok(records)
    }

    async fn count(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM records", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
        }
    }

    async fn snapshot(&self) -> Result<SnapshotHandle, DatabaseError> {
        let dir = self
            .backup_dir
            .as_deref()
            .ok_or_else(|| DatabaseError::Snapshot("no backup directory configured".into()))?;

        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            DatabaseError::Snapshot(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let taken_at = Utc::now();
        let path = self.snapshot_path(dir, taken_at);
        let target = path
            .to_str()
            .ok_or_else(|| DatabaseError::Snapshot(format!("non UTF-8 path {}", path.display())))?
            .to_string();

        self.conn()
            .execute("VACUUM INTO ?1", params![target])
            .await
            .map_err(|e| DatabaseError::Snapshot(format!("VACUUM INTO failed: {e}")))?;

        info!(path = %path.display(), "Database snapshot written");
        Ok(SnapshotHandle { path, taken_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_draft(submitter_id: i64) -> Draft {
        Draft {
            submitter_id,
            display_name: Some("Ann Lee".into()),
            handle: Some("@ann".into()),
            contact_number: Some("+100200300".into()),
            institution_category: Some(InstitutionCategory::School),
            institution_name: Some("School No.12".into()),
            address: Some("1 Main St".into()),
            landmark: Some("near market".into()),
            latitude: Some(10.0),
            longitude: Some(20.0),
            photo_reference: None,
        }
    }

    #[tokio::test]
    async fn save_and_get_latest() {
        let db = test_db().await;
        let saved = db.save(&make_draft(42)).await.unwrap();

        assert_eq!(saved.submitter_id, 42);
        assert_eq!(saved.institution_category, InstitutionCategory::School);
        assert_eq!(saved.latitude, Some(10.0));
        assert_eq!(saved.longitude, Some(20.0));
        assert!(saved.photo_reference.is_none());

        let latest = db.get_latest(42).await.unwrap().unwrap();
        assert_eq!(latest, saved);
        assert!(db.get_latest(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_save_within_cooldown_is_duplicate() {
        let db = test_db().await;
        db.save(&make_draft(42)).await.unwrap();

        match db.save(&make_draft(42)).await {
            Err(SubmissionError::Duplicate {
                submitter_id,
                remaining,
            }) => {
                assert_eq!(submitter_id, 42);
                assert!(remaining > Duration::from_secs(23 * 3600));
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
        assert_eq!(db.count().await.unwrap(), 1);
        assert!(!db.can_submit(42).await.unwrap());
        assert!(db.can_submit(43).await.unwrap());
    }

    #[tokio::test]
    async fn save_after_cooldown_elapsed_succeeds() {
        let db = test_db().await;
        let long_ago = Utc::now() - ChronoDuration::hours(25);
        db.save_at(&make_draft(42), long_ago).await.unwrap();

        assert!(db.can_submit(42).await.unwrap());
        assert!(db.cooldown_remaining(42).await.unwrap().is_none());
        db.save(&make_draft(42)).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 2);

        let latest = db.get_latest(42).await.unwrap().unwrap();
        assert!(latest.created_at > long_ago);
    }

    #[tokio::test]
    async fn cooldown_window_is_configurable() {
        let db = test_db().await.with_cooldown(Duration::from_secs(3600));
        let ninety_min_ago = Utc::now() - ChronoDuration::minutes(90);
        db.save_at(&make_draft(1), ninety_min_ago).await.unwrap();
        assert!(db.save(&make_draft(1)).await.is_ok());
    }

    #[tokio::test]
    async fn remaining_cooldown_counts_down_from_latest() {
        let db = test_db().await;
        let two_hours_ago = Utc::now() - ChronoDuration::hours(2);
        db.save_at(&make_draft(5), two_hours_ago).await.unwrap();

        let remaining = db.cooldown_remaining(5).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(22 * 3600));
        assert!(remaining > Duration::from_secs(21 * 3600));
    }

    #[tokio::test]
    async fn incomplete_draft_writes_nothing() {
        let db = test_db().await;
        let mut draft = make_draft(42);
        draft.landmark = None;
        assert!(matches!(
            db.save(&draft).await,
            Err(SubmissionError::Incomplete { field: "landmark" })
        ));
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db.can_submit(42).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_for_same_submitter_write_once() {
        let db = Arc::new(test_db().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move { db.save(&make_draft(99)).await }));
        }

        let mut ok = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SubmissionError::Duplicate { .. }) => duplicates += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicates, 7);

        let all = db.get_all().await.unwrap();
        assert_eq!(all.iter().filter(|r| r.submitter_id == 99).count(), 1);
    }

    #[tokio::test]
    async fn simultaneous_pair_exactly_one_succeeds() {
        let db = test_db().await;
        let draft = make_draft(7);
        let (a, b) = tokio::join!(db.save(&draft), db.save(&draft));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_all_is_in_insertion_order() {
        let db = test_db().await;
        for id in [3, 1, 2] {
            db.save(&make_draft(id)).await.unwrap();
        }
        let all = db.get_all().await.unwrap();
        let submitters: Vec<i64> = all.iter().map(|r| r.submitter_id).collect();
        assert_eq!(submitters, vec![3, 1, 2]);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn unreadable_row_fails_get_all() {
        let db = test_db().await;
        db.save(&make_draft(1)).await.unwrap();
        db.conn()
            .execute(
                "INSERT INTO records (submitter_id, contact_number, institution_category,
                    institution_name, address, landmark, created_at)
                 VALUES (9, '+1', 'Hospital', 'Clinic', 'Road 2', 'tower', ?1)",
                params![format_datetime(Utc::now())],
            )
            .await
            .unwrap();

        assert!(matches!(
            db.get_all().await,
            Err(DatabaseError::Serialization(ref m)) if m.contains("Hospital")
        ));
        assert_eq!(db.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn null_coordinates_read_back_as_absent() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO records (submitter_id, contact_number, institution_category,
                    institution_name, address, landmark, latitude, longitude, created_at)
                 VALUES (8, '+1', 'College', 'Tech', 'Road 1', 'bridge', 12.5, NULL, ?1)",
                params![format_datetime(Utc::now())],
            )
            .await
            .unwrap();

        let record = db.get_latest(8).await.unwrap().unwrap();
        assert_eq!(record.latitude, Some(12.5));
        assert_eq!(record.longitude, None);
        assert!(record.display_name.is_none());
    }

    #[tokio::test]
    async fn snapshot_without_backup_dir_fails() {
        let db = test_db().await;
        assert!(matches!(
            db.snapshot().await,
            Err(DatabaseError::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_copies_records() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&tmp.path().join("ses.db"))
            .await
            .unwrap()
            .with_backup_dir(tmp.path().join("backups"));
        db.save(&make_draft(42)).await.unwrap();

        let first = db.snapshot().await.unwrap();
        let second = db.snapshot().await.unwrap();
        assert!(first.path.exists());
        assert!(second.path.exists());
        assert_ne!(first.path, second.path);
        assert!(
            first
                .path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("ses.backup_")
        );

        let copy = LibSqlBackend::new_local(&first.path).await.unwrap();
        assert_eq!(copy.count().await.unwrap(), 1);
    }

    #[test]
    fn datetime_format_is_fixed_width() {
        let a = format_datetime(Utc::now());
        let b = format_datetime(Utc::now() + ChronoDuration::seconds(1));
        assert_eq!(a.len(), b.len());
        assert!(a.ends_with('Z'));
        assert_eq!(parse_datetime(&a).to_rfc3339_opts(SecondsFormat::Micros, true), a);
    }
}
