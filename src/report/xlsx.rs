//! Spreadsheet export via `rust_xlsxwriter`.

use rust_xlsxwriter::{Format, Workbook, XlsxError};

use super::{COLUMNS, ExportRenderer, ExportRow, LATITUDE_COLUMN, LONGITUDE_COLUMN, Report};
use crate::error::ExportError;

/// One header row plus one row per record. Coordinates are numeric cells,
/// left empty when absent.
pub struct XlsxRenderer;

impl ExportRenderer for XlsxRenderer {
    fn render(&self, report: &Report) -> Result<Vec<u8>, ExportError> {
        build(report).map_err(|e| ExportError::Render {
            format: "xlsx".into(),
            reason: e.to_string(),
        })
    }
}

fn build(report: &Report) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Institutions")?;

    let header = Format::new().set_bold();
    for (col, title) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (i, row) in report.rows.iter().enumerate() {
        write_row(sheet, i as u32 + 1, row)?;
    }

    for (col, width) in column_widths(report).into_iter().enumerate() {
        sheet.set_column_width(col as u16, width)?;
    }

    workbook.save_to_buffer()
}

fn write_row(
    sheet: &mut rust_xlsxwriter::Worksheet,
    row_idx: u32,
    row: &ExportRow,
) -> Result<(), XlsxError> {
    for (col, cell) in row.cells.iter().enumerate() {
        let value = match col {
            LATITUDE_COLUMN => row.latitude,
            LONGITUDE_COLUMN => row.longitude,
            _ => {
                if !cell.is_empty() {
                    sheet.write_string(row_idx, col as u16, cell.as_str())?;
                }
                continue;
            }
        };
        if let Some(v) = value {
            sheet.write_number(row_idx, col as u16, v)?;
        }
    }
    Ok(())
}

/// Width per column from the longest cell, clamped to a readable range.
fn column_widths(report: &Report) -> Vec<f64> {
    COLUMNS
        .iter()
        .enumerate()
        .map(|(col, title)| {
            let longest = report
                .rows
                .iter()
                .map(|r| r.cells.get(col).map_or(0, |c| c.chars().count()))
                .chain(std::iter::once(title.len()))
                .max()
                .unwrap_or(8);
            (longest as f64 + 2.0).clamp(8.0, 50.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[test]
    fn renders_a_zip_container() {
        let bytes = XlsxRenderer.render(&sample_report()).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn renders_an_empty_report() {
        let mut report = sample_report();
        report.rows.clear();
        let bytes = XlsxRenderer.render(&report).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn widths_cover_every_column() {
        let widths = column_widths(&sample_report());
        assert_eq!(widths.len(), COLUMNS.len());
        assert!(widths.iter().all(|w| (8.0..=50.0).contains(w)));
    }
}
