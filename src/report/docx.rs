//! Word-processor export via `docx-rs`.

use std::io::Cursor;

use chrono::Local;
use docx_rs::{Docx, Paragraph, Pic, Run, Table, TableCell, TableRow};
use tracing::warn;

use super::{COLUMNS, ExportRenderer, ExportRow, Report};
use crate::error::ExportError;

/// Embedded photo size in pixels.
const PHOTO_WIDTH_PX: u32 = 480;
const PHOTO_HEIGHT_PX: u32 = 360;

/// A4 landscape, in twentieths of a point.
const PAGE_WIDTH: u32 = 16838;
const PAGE_HEIGHT: u32 = 11906;

/// Title, generation time, a table with the export columns and an appendix
/// of the photos that still resolve on disk.
pub struct DocxRenderer;

impl ExportRenderer for DocxRenderer {
    fn render(&self, report: &Report) -> Result<Vec<u8>, ExportError> {
        let mut docx = Docx::new()
            .page_size(PAGE_WIDTH, PAGE_HEIGHT)
            .add_paragraph(
                Paragraph::new().add_run(Run::new().add_text("Institution registry").bold().size(32)),
            )
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text(format!(
                "Generated {} | {} institutions",
                report.generated_at.with_timezone(&Local).format("%d.%m.%Y %H:%M"),
                report.rows.len()
            ))))
            .add_table(table(&report.rows));

        let with_photos: Vec<&ExportRow> = report
            .rows
            .iter()
            .filter(|r| r.photo_path.is_some())
            .collect();
        if !with_photos.is_empty() {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_text("Photos").bold().size(28)),
            );
            for row in with_photos {
                docx = add_photo(docx, row);
            }
        }

        let mut buf = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut buf)
            .map_err(|e| ExportError::Render {
                format: "docx".into(),
                reason: e.to_string(),
            })?;
        Ok(buf.into_inner())
    }
}

fn cell(text: &str, bold: bool) -> TableCell {
    let run = Run::new().add_text(text).size(16);
    let run = if bold { run.bold() } else { run };
    TableCell::new().add_paragraph(Paragraph::new().add_run(run))
}

fn table(rows: &[ExportRow]) -> Table {
    let header = TableRow::new(COLUMNS.iter().map(|c| cell(c, true)).collect());
    let body = rows
        .iter()
        .map(|row| TableRow::new(row.cells.iter().map(|c| cell(c, false)).collect()));
    Table::new(std::iter::once(header).chain(body).collect())
}

fn add_photo(docx: Docx, row: &ExportRow) -> Docx {
    let Some(path) = row.photo_path.as_deref() else {
        return docx;
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), "Skipping photo in document export: {e}");
            return docx;
        }
    };
    let caption = format!("No. {}: {}", row.cells[0], row.cells[6]);
    docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(caption).bold()))
        .add_paragraph(Paragraph::new().add_run(Run::new().add_image(
            Pic::new_with_dimensions(bytes, PHOTO_WIDTH_PX, PHOTO_HEIGHT_PX),
        )))
}
