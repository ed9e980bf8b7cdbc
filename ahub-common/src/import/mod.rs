//! Bulk CSV import of contacts
//!
//! `preview` inspects an uploaded file and suggests a column mapping;
//! `pipeline::run_import` executes a queued job.

pub mod mapping;
pub mod pipeline;
pub mod reader;

pub use mapping::suggest_mapping;
pub use pipeline::{run_import, ImportContext};

use serde::Serialize;

use crate::models::ColumnMapping;
use crate::Result;

/// What a client sees before committing to an import
#[derive(Debug, Clone, Serialize)]
pub struct CsvPreview {
    pub headers: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
    pub suggested_mapping: ColumnMapping,
}

/// Headers, the first `rows` non-blank records and a suggested mapping
pub fn preview(bytes: &[u8], rows: usize) -> Result<CsvPreview> {
    // blank records are dropped from the sample, so read a few extra
    let (table, _) = reader::read_csv(bytes, Some(rows.saturating_mul(2).max(rows + 10)))?;
    let sample_rows = table
        .records
        .into_iter()
        .filter(|r| !r.is_blank())
        .take(rows)
        .map(|r| r.fields)
        .collect();

    Ok(CsvPreview {
        suggested_mapping: suggest_mapping(&table.headers),
        headers: table.headers,
        sample_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnTarget;

    #[test]
    fn test_preview_samples_and_suggests() {
        let csv = b"Email,First Name,Plan\na@x.co,Ada,pro\n,,\nb@x.co,Bob,free\nc@x.co,Cy,free\n";
        let preview = preview(csv, 2).unwrap();
        assert_eq!(preview.headers, vec!["Email", "First Name", "Plan"]);
        assert_eq!(preview.sample_rows.len(), 2);
        assert_eq!(preview.sample_rows[1][0], "b@x.co");
        assert_eq!(preview.suggested_mapping.0["Plan"], ColumnTarget::Attribute("plan".into()));
    }
}
