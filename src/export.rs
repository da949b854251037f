//! CSV export.
//!
//! Files are pipe-delimited with a header row and encoded as Windows-1252,
//! the "ANSI" code page the downstream spreadsheet tooling expects.
//! Characters with no Windows-1252 byte are written as `?`.

use crate::error::SyncError;
use crate::table::{Record, Table, as_text};
use std::path::Path;
use tracing::info;

pub const DELIMITER: u8 = b'|';

/// Write `table` to `path`, creating the parent folder when needed.
/// Returns the number of data rows written.
pub fn write_table_csv(table: &Table, path: &Path) -> Result<usize, SyncError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_path(path)?;
    writer.write_record(table.columns.iter().map(|c| encode_windows_1252(c)))?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|cell| encode_windows_1252(&as_text(cell))))?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = table.len(), "exported CSV");
    Ok(table.len())
}

/// Records are unioned into one table first; missing cells stay empty.
pub fn write_records_csv(records: &[Record], path: &Path) -> Result<usize, SyncError> {
    write_table_csv(&Table::from_records(records), path)
}

/// Encode text as Windows-1252, replacing unmappable characters with `?`.
pub fn encode_windows_1252(text: &str) -> Vec<u8> {
    text.chars().map(windows_1252_byte).collect()
}

fn windows_1252_byte(c: char) -> u8 {
    let code = u32::from(c);
    match code {
        0x00..=0x7F | 0xA0..=0xFF => code as u8,
        _ => match c {
            '€' => 0x80,
            '‚' => 0x82,
            'ƒ' => 0x83,
            '„' => 0x84,
            '…' => 0x85,
            '†' => 0x86,
            '‡' => 0x87,
            'ˆ' => 0x88,
            '‰' => 0x89,
            'Š' => 0x8A,
            '‹' => 0x8B,
            'Œ' => 0x8C,
            'Ž' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '•' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '˜' => 0x98,
            '™' => 0x99,
            'š' => 0x9A,
            '›' => 0x9B,
            'œ' => 0x9C,
            'ž' => 0x9E,
            'Ÿ' => 0x9F,
            _ => b'?',
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn encodes_latin_and_cp1252_extras() {
        assert_eq!(encode_windows_1252("Año"), vec![b'A', 0xF1, b'o']);
        assert_eq!(encode_windows_1252("5€"), vec![b'5', 0x80]);
        assert_eq!(encode_windows_1252("日本"), b"??".to_vec());
    }

    #[test]
    fn writes_pipe_delimited_file_in_new_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stock.csv");
        let table = Table::from_parts(
            Some(vec!["sku".into(), "name".into(), "qty".into()]),
            vec![
                vec![json!("A-1"), json!("Camión"), json!(4)],
                vec![json!("B|2"), Value::Null, json!(0)],
            ],
        );

        let written = write_table_csv(&table, &path).unwrap();
        assert_eq!(written, 2);

        let bytes = std::fs::read(&path).unwrap();
        let mut expected = b"sku|name|qty\nA-1|Cami".to_vec();
        expected.push(0xF3);
        expected.extend_from_slice(b"n|4\n\"B|2\"||0\n");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn records_export_unions_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let a: Record = serde_json::from_value(json!({ "id": 1 })).unwrap();
        let b: Record = serde_json::from_value(json!({ "id": 2, "note": "x" })).unwrap();
        write_records_csv(&[a, b], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id|note\n1|\n2|x\n");
    }
}
