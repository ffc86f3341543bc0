//! Report assembly: exports and statistics over all stored records.

pub mod docx;
pub mod xlsx;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};

use crate::error::{DatabaseError, ExportError};
use crate::form::model::{InstitutionCategory, Record};
use crate::photos::PhotoStore;
use crate::store::RecordStore;

pub use docx::DocxRenderer;
pub use xlsx::XlsxRenderer;

/// Export column headers, in order.
pub const COLUMNS: [&str; 13] = [
    "id",
    "submitter_id",
    "display_name",
    "handle",
    "contact_number",
    "institution_category",
    "institution_name",
    "address",
    "landmark",
    "latitude",
    "longitude",
    "photo",
    "created_at",
];

/// Column index of the latitude cell.
pub const LATITUDE_COLUMN: usize = 9;
/// Column index of the longitude cell.
pub const LONGITUDE_COLUMN: usize = 10;

/// One record flattened to display strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    /// Cells in [`COLUMNS`] order. Absent values are `""`.
    pub cells: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Readable photo file, when the reference still resolves.
    pub photo_path: Option<PathBuf>,
}

impl ExportRow {
    pub fn from_record(record: &Record, photo_path: Option<PathBuf>) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let coord = |v: Option<f64>| v.map(|c| format!("{c:?}")).unwrap_or_default();
        let photo = record
            .photo_reference
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        Self {
            cells: vec![
                record.id.to_string(),
                record.submitter_id.to_string(),
                text(&record.display_name),
                text(&record.handle),
                record.contact_number.clone(),
                record.institution_category.to_string(),
                record.institution_name.clone(),
                record.address.clone(),
                record.landmark.clone(),
                coord(record.latitude),
                coord(record.longitude),
                photo,
                record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
            latitude: record.latitude,
            longitude: record.longitude,
            photo_path,
        }
    }
}

/// Basic counts over all records.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportStats {
    pub total: usize,
    pub per_category: Vec<(InstitutionCategory, usize)>,
    pub with_photo: usize,
    pub last_entry: Option<DateTime<Utc>>,
}

impl ReportStats {
    pub fn from_records(records: &[Record]) -> Self {
        let per_category = InstitutionCategory::ALL
            .iter()
            .map(|c| {
                let n = records
                    .iter()
                    .filter(|r| r.institution_category == *c)
                    .count();
                (*c, n)
            })
            .collect();

        Self {
            total: records.len(),
            per_category,
            with_photo: records.iter().filter(|r| r.has_photo()).count(),
            last_entry: records.iter().map(|r| r.created_at).max(),
        }
    }

    pub fn count(&self, category: InstitutionCategory) -> usize {
        self.per_category
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Message shown to operators.
    pub fn render_text(&self) -> String {
        if self.total == 0 {
            return "📊 *Statistics*\n\nTotal institutions: 0".to_string();
        }
        let mut text = format!("📊 *Statistics*\n\nTotal institutions: {}\n\nBy type:\n", self.total);
        for (category, n) in &self.per_category {
            text.push_str(&format!("• {category}: {n}\n"));
        }
        text.push_str(&format!(
            "\nPhotos sent: {} of {}\nLast entry: {}",
            self.with_photo,
            self.total,
            self.last_entry
                .map(|t| t.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string())
                .unwrap_or_else(|| "-".into()),
        ));
        text
    }
}

/// Outcome of the pre-export snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupStatus {
    Saved(PathBuf),
    Failed(String),
}

/// Everything an export renderer needs.
#[derive(Debug, Clone)]
pub struct Report {
    pub rows: Vec<ExportRow>,
    pub stats: ReportStats,
    pub generated_at: DateTime<Utc>,
    pub backup: BackupStatus,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Caption sent with an exported file.
    pub fn caption(&self, format: ExportFormat) -> String {
        let mut caption = format!(
            "✅ Report ({}) | {} institutions\n📅 {}",
            format.label(),
            self.rows.len(),
            self.generated_at
                .with_timezone(&Local)
                .format("%d.%m.%Y %H:%M"),
        );
        if let BackupStatus::Failed(_) = self.backup {
            caption.push_str("\n⚠️ Backup copy could not be created");
        }
        caption
    }
}

/// Turns a [`Report`] into file bytes.
pub trait ExportRenderer: Send + Sync {
    fn render(&self, report: &Report) -> Result<Vec<u8>, ExportError>;
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Spreadsheet,
    Document,
}

impl ExportFormat {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "Excel",
            Self::Document => "Word",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "xlsx",
            Self::Document => "docx",
        }
    }

    pub fn file_name(&self, generated_at: DateTime<Utc>) -> String {
        format!(
            "ses_report_{}.{}",
            generated_at.format("%Y%m%d_%H%M%S"),
            self.extension()
        )
    }

    pub fn renderer(&self) -> Box<dyn ExportRenderer> {
        match self {
            Self::Spreadsheet => Box::new(XlsxRenderer),
            Self::Document => Box::new(DocxRenderer),
        }
    }
}

/// Reads the store and builds reports.
pub struct ReportAssembler {
    store: Arc<dyn RecordStore>,
    photos: Option<Arc<PhotoStore>>,
}

impl ReportAssembler {
    pub fn new(store: Arc<dyn RecordStore>, photos: Option<Arc<PhotoStore>>) -> Self {
        Self { store, photos }
    }

    /// Snapshot the store, then flatten every record.
    ///
    /// A failed snapshot is recorded in [`Report::backup`] and does not stop
    /// the export.
    pub async fn assemble(&self) -> Result<Report, ExportError> {
        let backup = match self.store.snapshot().await {
            Ok(handle) => BackupStatus::Saved(handle.path),
            Err(e) => {
                warn!("Pre-export snapshot failed: {e}");
                BackupStatus::Failed(e.to_string())
            }
        };

        let records = self.store.get_all().await?;
        let rows = records
            .iter()
            .map(|r| ExportRow::from_record(r, self.resolve_photo(r)))
            .collect();

        let report = Report {
            rows,
            stats: ReportStats::from_records(&records),
            generated_at: Utc::now(),
            backup,
        };
        info!(rows = report.rows.len(), "Report assembled");
        Ok(report)
    }

    pub async fn stats(&self) -> Result<ReportStats, DatabaseError> {
        let records = self.store.get_all().await?;
        Ok(ReportStats::from_records(&records))
    }

    fn resolve_photo(&self, record: &Record) -> Option<PathBuf> {
        let reference = record.photo_reference.as_deref()?;
        self.photos.as_ref()?.resolve(reference)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::form::model::Draft;
    use crate::store::LibSqlBackend;
    use chrono::TimeZone;

    pub(crate) fn record(id: i64, category: InstitutionCategory) -> Record {
        Record {
            id,
            submitter_id: 100 + id,
            display_name: Some(format!("User {id}")),
            handle: Some(format!("@user{id}")),
            contact_number: "+100200300".into(),
            institution_category: category,
            institution_name: format!("Institution {id}"),
            address: "1 Main St".into(),
            landmark: "near market".into(),
            latitude: Some(10.0),
            longitude: Some(20.5),
            photo_reference: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, id as u32).unwrap(),
        }
    }

    pub(crate) fn sample_report() -> Report {
        let mut sparse = record(2, InstitutionCategory::College);
        sparse.display_name = None;
        sparse.handle = None;
        sparse.longitude = None;
        let records = vec![record(1, InstitutionCategory::School), sparse];
        Report {
            rows: records.iter().map(|r| ExportRow::from_record(r, None)).collect(),
            stats: ReportStats::from_records(&records),
            generated_at: Utc::now(),
            backup: BackupStatus::Failed("no backup directory".into()),
        }
    }

    fn draft(submitter_id: i64, category: InstitutionCategory) -> Draft {
        Draft {
            submitter_id,
            display_name: None,
            handle: None,
            contact_number: Some("+1".into()),
            institution_category: Some(category),
            institution_name: Some("Name".into()),
            address: Some("Addr".into()),
            landmark: Some("Mark".into()),
            latitude: Some(1.0),
            longitude: Some(2.0),
            photo_reference: None,
        }
    }

    #[test]
    fn row_cells_follow_column_order() {
        let row = ExportRow::from_record(&record(1, InstitutionCategory::School), None);
        assert_eq!(row.cells.len(), COLUMNS.len());
        assert_eq!(row.cells[0], "1");
        assert_eq!(row.cells[1], "101");
        assert_eq!(row.cells[3], "@user1");
        assert_eq!(row.cells[5], "School");
        assert_eq!(row.cells[LATITUDE_COLUMN], "10.0");
        assert_eq!(row.cells[LONGITUDE_COLUMN], "20.5");
        assert_eq!(row.cells[11], "");
        assert_eq!(row.cells[12], "2026-03-01 12:30:01");
    }

    #[test]
    fn absent_values_export_as_empty_strings() {
        let report = sample_report();
        let sparse = &report.rows[1];
        assert_eq!(sparse.cells[2], "");
        assert_eq!(sparse.cells[3], "");
        assert_eq!(sparse.cells[LATITUDE_COLUMN], "10.0");
        assert_eq!(sparse.cells[LONGITUDE_COLUMN], "");
        assert_eq!(sparse.longitude, None);
        assert!(sparse.cells.iter().all(|c| c != "0" && c != "0.0" && c != "None"));
    }

    #[test]
    fn stats_count_categories_and_photos() {
        let mut with_photo = record(3, InstitutionCategory::School);
        with_photo.photo_reference = Some("103_x.jpg".into());
        let mut blank_photo = record(4, InstitutionCategory::University);
        blank_photo.photo_reference = Some("  ".into());
        let records = vec![
            record(1, InstitutionCategory::School),
            record(2, InstitutionCategory::College),
            with_photo,
            blank_photo,
        ];

        let stats = ReportStats::from_records(&records);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.count(InstitutionCategory::School), 2);
        assert_eq!(stats.count(InstitutionCategory::College), 1);
        assert_eq!(stats.count(InstitutionCategory::University), 1);
        assert_eq!(stats.with_photo, 1);
        assert_eq!(stats.last_entry, Some(records[3].created_at));
        assert!(stats.render_text().contains("Photos sent: 1 of 4"));
    }

    #[test]
    fn empty_stats_text() {
        let stats = ReportStats::from_records(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.render_text().contains("Total institutions: 0"));
    }

    #[test]
    fn caption_mentions_count_and_degraded_backup() {
        let report = sample_report();
        let caption = report.caption(ExportFormat::Spreadsheet);
        assert!(caption.contains("Report (Excel) | 2 institutions"));
        assert!(caption.contains("Backup copy could not be created"));
    }

    #[tokio::test]
    async fn assemble_continues_when_snapshot_fails() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store.save(&draft(1, InstitutionCategory::School)).await.unwrap();
        store.save(&draft(2, InstitutionCategory::College)).await.unwrap();

        let assembler = ReportAssembler::new(store, None);
        let report = assembler.assemble().await.unwrap();
        assert_eq!(report.rows.len(), 2);
        assert!(matches!(report.backup, BackupStatus::Failed(_)));
        assert_eq!(report.rows[0].cells[1], "1");
        assert_eq!(report.rows[0].cells[2], "");
    }

    #[tokio::test]
    async fn assemble_records_snapshot_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            LibSqlBackend::new_memory()
                .await
                .unwrap()
                .with_backup_dir(tmp.path()),
        );
        store.save(&draft(1, InstitutionCategory::School)).await.unwrap();

        let report = ReportAssembler::new(store, None).assemble().await.unwrap();
        match report.backup {
            BackupStatus::Saved(path) => assert!(path.exists()),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
