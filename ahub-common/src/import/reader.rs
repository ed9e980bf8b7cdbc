//! CSV decoding

use csv::{ReaderBuilder, Trim};

use crate::{Error, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One data record; `line` is its spreadsheet line number (header is line 1)
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    pub line: u64,
    pub fields: Vec<String>,
}

impl CsvRecord {
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<CsvRecord>,
}

/// Parse up to `limit` records (all when `None`)
///
/// Records may have any number of fields; fields are trimmed. Rows that are
/// not valid UTF-8 are returned as errors by line rather than failing the file.
pub fn read_csv(bytes: &[u8], limit: Option<usize>) -> Result<(CsvTable, Vec<(u64, String)>)> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| {
            std::str::from_utf8(h)
                .map(|s| s.to_string())
                .map_err(|_| Error::InvalidInput("CSV header row is not valid UTF-8".to_string()))
        })
        .collect::<Result<_>>()?;

    if headers.iter().all(|h| h.is_empty()) {
        return Err(Error::InvalidInput("CSV file has no header row".to_string()));
    }

    let mut records = Vec::new();
    let mut undecodable = Vec::new();
    for (index, record) in reader.byte_records().enumerate() {
        if limit.is_some_and(|limit| records.len() >= limit) {
            break;
        }
        let record = record?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 2);

        let fields: std::result::Result<Vec<String>, _> = record
            .iter()
            .map(|f| std::str::from_utf8(f).map(|s| s.to_string()))
            .collect();
        match fields {
            Ok(fields) => records.push(CsvRecord { line, fields }),
            Err(_) => undecodable.push((line, "Row is not valid UTF-8".to_string())),
        }
    }

    Ok((CsvTable { headers, records }, undecodable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_headers_and_trims_fields() {
        let (table, bad) = read_csv(b"\xEF\xBB\xBFEmail , Name\n a@b.co , Ada \n", None).unwrap();
        assert_eq!(table.headers, vec!["Email", "Name"]);
        assert_eq!(table.records[0].fields, vec!["a@b.co", "Ada"]);
        assert_eq!(table.records[0].line, 2);
        assert!(bad.is_empty());
    }

    #[test]
    fn test_flexible_rows_and_line_numbers() {
        let data = b"email,name\na@b.co\n\"c@d.co\",\"multi\nline\",extra\ne@f.co,Eve\n";
        let (table, _) = read_csv(data, None).unwrap();
        assert_eq!(table.records.len(), 3);
        assert_eq!(table.records[0].fields.len(), 1);
        assert_eq!(table.records[1].fields.len(), 3);
        assert_eq!(table.records[2].line, 5);
    }

    #[test]
    fn test_blank_rows_and_limit() {
        let (table, _) = read_csv(b"email,name\n,\na@b.co,A\nc@d.co,C\n", Some(2)).unwrap();
        assert_eq!(table.records.len(), 2);
        assert!(table.records[0].is_blank());
    }

    #[test]
    fn test_invalid_utf8_row_is_reported() {
        let (table, bad) = read_csv(b"email\na@b.co\n\xff\xfe@x.co\n", None).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(bad, vec![(3, "Row is not valid UTF-8".to_string())]);
    }

    #[test]
    fn test_empty_file_has_no_header() {
        assert!(matches!(read_csv(b"", None), Err(Error::InvalidInput(_))));
    }
}
