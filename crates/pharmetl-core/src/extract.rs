// crates/pharmetl-core/src/extract.rs

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::error::{EtlError, Result};
use crate::table::{ColumnType, ExtractedTable, Value};

static TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
static DATE_FORMAT: &str = "%Y-%m-%d";

/// Read one source CSV (header row required) into an [`ExtractedTable`].
///
/// Row count and column set are preserved exactly. Any read or parse failure
/// surfaces as [`EtlError::Extraction`]; there is no partial recovery.
pub fn extract_csv(path: impl AsRef<Path>) -> Result<ExtractedTable> {
    let path = path.as_ref();
    let source = path.display().to_string();
    let file = File::open(path).map_err(|err| EtlError::extraction(&source, err))?;
    let table = extract_from_reader(file, &source)?;
    info!(
        source = %source,
        rows = table.row_count(),
        columns = table.columns().len(),
        "Extracted source table"
    );
    Ok(table)
}

pub(crate) fn extract_from_reader<R: Read>(reader: R, source: &str) -> Result<ExtractedTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let columns: Vec<String> = csv_reader
        .headers()
        .map_err(|err| EtlError::extraction(source, err))?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();

    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(EtlError::extraction(source, "missing header row"));
    }

    let mut records = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        // Header is line 1, first data record line 2.
        let line = index + 2;
        let record = record
            .map_err(|err| EtlError::extraction(source, format!("line {line}: {err}")))?;
        if record.len() != columns.len() {
            return Err(EtlError::extraction(
                source,
                format!(
                    "line {line}: expected {} fields, found {}",
                    columns.len(),
                    record.len()
                ),
            ));
        }
        records.push(record);
    }

    let column_types = infer_column_types(&columns, &records);

    let mut rows = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let line = index + 2;
        let mut row = Vec::with_capacity(columns.len());
        for (field, column_type) in record.iter().zip(column_types.iter()) {
            let value = convert_cell(field, *column_type).ok_or_else(|| {
                EtlError::extraction(source, format!("line {line}: unparseable field '{field}'"))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    Ok(ExtractedTable::new(columns, column_types, rows))
}

fn infer_column_types(columns: &[String], records: &[csv::StringRecord]) -> Vec<ColumnType> {
    let mut inferred: Vec<Option<ColumnType>> = vec![None; columns.len()];
    for record in records {
        for (index, field) in record.iter().enumerate() {
            if let Some(cell_type) = classify_cell(field) {
                inferred[index] = Some(match inferred[index] {
                    Some(previous) => previous.unify(cell_type),
                    None => cell_type,
                });
            }
        }
    }
    // A column of nothing but nulls carries no evidence either way.
    inferred
        .into_iter()
        .map(|t| t.unwrap_or(ColumnType::Text))
        .collect()
}

fn is_null_cell(trimmed: &str) -> bool {
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan")
}

/// Classify a single raw field, or `None` when the field is a null cell.
fn classify_cell(field: &str) -> Option<ColumnType> {
    let trimmed = field.trim();
    if is_null_cell(trimmed) {
        return None;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Some(ColumnType::Bool);
    }
    if trimmed.parse::<i64>().is_ok() {
        return Some(ColumnType::Integer);
    }
    if trimmed.parse::<f64>().is_ok() {
        return Some(ColumnType::Float);
    }
    if NaiveDate::parse_from_str(trimmed, DATE_FORMAT).is_ok() {
        return Some(ColumnType::Date);
    }
    if TIMESTAMP_FORMATS
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).is_ok())
    {
        return Some(ColumnType::Timestamp);
    }
    Some(ColumnType::Text)
}

fn convert_cell(field: &str, column_type: ColumnType) -> Option<Value> {
    let trimmed = field.trim();
    if is_null_cell(trimmed) {
        return Some(Value::Null);
    }
    match column_type {
        ColumnType::Integer => trimmed.parse::<i64>().ok().map(Value::Integer),
        ColumnType::Float => trimmed.parse::<f64>().ok().map(Value::Float),
        ColumnType::Bool => {
            if trimmed.eq_ignore_ascii_case("true") {
                Some(Value::Bool(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Some(Value::Bool(false))
            } else {
                None
            }
        }
        ColumnType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .ok()
            .map(Value::Date),
        ColumnType::Timestamp => {
            for fmt in TIMESTAMP_FORMATS {
                if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                    return Some(Value::Timestamp(ts));
                }
            }
            // Date-typed cells in a column widened to timestamp land at midnight.
            NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(Value::Timestamp)
        }
        ColumnType::Text => Some(Value::Text(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(data: &str) -> ExtractedTable {
        extract_from_reader(data.as_bytes(), "test.csv").expect("extract test csv")
    }

    #[test]
    fn preserves_row_count_and_column_order() {
        let table = extract(
            "product_key,product_name,unit_price\n\
             1,Drug_A,199.5\n\
             2,Drug_B,320.0\n\
             3,Drug_C,87.25\n",
        );
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            table.columns(),
            &["product_key", "product_name", "unit_price"]
        );
        assert_eq!(
            table.column_types(),
            &[ColumnType::Integer, ColumnType::Text, ColumnType::Float]
        );
        assert_eq!(table.rows()[1][1], Value::Text("Drug_B".into()));
    }

    #[test]
    fn infers_dates_bools_and_nulls() {
        let table = extract(
            "date,is_weekend,note\n\
             2023-01-01,True,\n\
             2023-01-02,False,nan\n",
        );
        assert_eq!(
            table.column_types(),
            &[ColumnType::Date, ColumnType::Bool, ColumnType::Text]
        );
        assert_eq!(
            table.rows()[0][0],
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
        );
        assert_eq!(table.rows()[0][1], Value::Bool(true));
        assert!(table.rows()[0][2].is_null());
        assert!(table.rows()[1][2].is_null());
    }

    #[test]
    fn widens_mixed_integer_and_float_columns() {
        let table = extract("amount\n10\n10.5\n");
        assert_eq!(table.column_types(), &[ColumnType::Float]);
        assert_eq!(table.rows()[0][0], Value::Float(10.0));
        assert_eq!(table.rows()[1][0], Value::Float(10.5));
    }

    #[test]
    fn widens_mixed_date_and_timestamp_columns() {
        let table = extract("observed\n2023-01-01\n2023-01-01 12:30:00\n");
        assert_eq!(table.column_types(), &[ColumnType::Timestamp]);
        assert_eq!(
            table.rows()[0][0],
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn rejects_ragged_records() {
        let err = extract_from_reader("a,b\n1,2\n3\n".as_bytes(), "bad.csv").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad.csv"), "unexpected error: {message}");
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let err = extract_csv("does/not/exist.csv").unwrap_err();
        assert!(matches!(err, EtlError::Extraction { .. }));
    }
}
