use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::{collections::HashMap, io};

/// Column tagging every consolidated record with the year it was acquired
/// for. The name matches what the portal's downstream analysis scripts
/// already key on.
pub const ORIGIN_YEAR_COLUMN: &str = "archivo_origen_anio";

/// Tabular data from one source: ordered column names plus ordered rows of
/// JSON scalar cells. Different `RowSet`s may carry different column sets;
/// they are only reconciled at consolidation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Build from a CKAN record array. Columns are collected across all
    /// records; a record missing a column gets `null` in that slot.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|col| record.remove(col).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        RowSet { columns, rows }
    }

    /// Parse CSV text with a header row. Rows shorter than the header are
    /// padded with `null`; longer rows are clipped to the header width.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let columns: Vec<String> = reader
            .headers()
            .context("reading CSV header row")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("reading CSV record")?;
            let mut row: Vec<Value> = record
                .iter()
                .map(|field| Value::String(field.to_string()))
                .collect();
            row.resize(columns.len(), Value::Null);
            rows.push(row);
        }
        Ok(RowSet { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// API responses arrive lower-case; file headers vary in casing by year.
    /// Lower-casing both sides lets same-named columns merge at consolidation.
    pub fn lowercase_columns(&mut self) {
        for col in &mut self.columns {
            *col = col.to_lowercase();
        }
    }

    /// Append the origin-year column with the same value on every row.
    pub fn tag_origin_year(&mut self, year: u16) {
        self.columns.push(ORIGIN_YEAR_COLUMN.to_string());
        for row in &mut self.rows {
            row.push(Value::from(year));
        }
    }

    /// Outer-join concatenation: the output column set is the union of all
    /// input column sets in first-seen order, and every cell a part never had
    /// a column for is `null`. Row order follows part order, then the part's
    /// own row order.
    pub fn concat_outer(parts: Vec<RowSet>) -> RowSet {
        let mut columns: Vec<String> = Vec::new();
        for part in &parts {
            for col in &part.columns {
                if !columns.iter().any(|c| c == col) {
                    columns.push(col.clone());
                }
            }
        }
        let index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let total: usize = parts.iter().map(|p| p.rows.len()).sum();
        let mut rows = Vec::with_capacity(total);
        for part in parts {
            let RowSet {
                columns: part_columns,
                rows: part_rows,
            } = part;
            let slots: Vec<usize> = part_columns
                .iter()
                .map(|c| index[c.as_str()])
                .collect();
            for row in part_rows {
                let mut out = vec![Value::Null; columns.len()];
                for (i, cell) in row.into_iter().enumerate() {
                    out[slots[i]] = cell;
                }
                rows.push(out);
            }
        }
        RowSet { columns, rows }
    }

    /// Write the set out as CSV. `null` cells become empty fields; non-string
    /// scalars use their JSON rendering.
    pub fn write_csv<W: io::Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record(&self.columns)
            .context("writing CSV header")?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(cell_to_field))
                .context("writing CSV row")?;
        }
        writer.flush().context("flushing CSV output")?;
        Ok(())
    }
}

fn cell_to_field(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_records_fills_missing_columns_with_null() {
        let rows = RowSet::from_records(vec![
            record(&[("delito", json!("robo")), ("anio", json!(2019))]),
            record(&[("delito", json!("fraude")), ("alcaldia", json!("GAM"))]),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.value(0, "alcaldia"), Some(&Value::Null));
        assert_eq!(rows.value(1, "anio"), Some(&Value::Null));
        assert_eq!(rows.value(1, "alcaldia"), Some(&json!("GAM")));
    }

    #[test]
    fn from_csv_pads_ragged_rows() {
        let rows =
            RowSet::from_csv("delito,alcaldia,anio\nrobo,GAM,2019\nfraude,BJ\n").unwrap();

        assert_eq!(rows.columns(), ["delito", "alcaldia", "anio"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.value(1, "anio"), Some(&Value::Null));
        assert_eq!(rows.value(1, "alcaldia"), Some(&json!("BJ")));
    }

    #[test]
    fn concat_outer_unions_columns_and_keeps_order() {
        let a = RowSet::from_csv("delito,colonia\nrobo,centro\n").unwrap();
        let b = RowSet::from_csv("delito,latitud\nfraude,19.4\n").unwrap();
        let merged = RowSet::concat_outer(vec![a, b]);

        assert_eq!(merged.columns(), ["delito", "colonia", "latitud"]);
        assert_eq!(merged.len(), 2);
        // row from `a` never had `latitud`; row from `b` never had `colonia`
        assert_eq!(merged.value(0, "latitud"), Some(&Value::Null));
        assert_eq!(merged.value(1, "colonia"), Some(&Value::Null));
        assert_eq!(merged.value(0, "delito"), Some(&json!("robo")));
        assert_eq!(merged.value(1, "delito"), Some(&json!("fraude")));
    }

    #[test]
    fn concat_outer_of_nothing_is_empty() {
        let merged = RowSet::concat_outer(Vec::new());
        assert!(merged.is_empty());
        assert!(merged.columns().is_empty());
    }

    #[test]
    fn mixed_casing_collapses_after_lowercasing() {
        let mut a = RowSet::from_csv("Delito,Alcaldia\nrobo,GAM\n").unwrap();
        let mut b = RowSet::from_csv("delito,alcaldia\nfraude,BJ\n").unwrap();
        a.lowercase_columns();
        b.lowercase_columns();
        let merged = RowSet::concat_outer(vec![a, b]);

        assert_eq!(merged.columns(), ["delito", "alcaldia"]);
        assert_eq!(merged.value(0, "delito"), Some(&json!("robo")));
        assert_eq!(merged.value(1, "delito"), Some(&json!("fraude")));
    }

    #[test]
    fn origin_year_lands_on_every_row() {
        let mut rows = RowSet::from_csv("delito\nrobo\nfraude\n").unwrap();
        rows.tag_origin_year(2021);

        assert_eq!(rows.columns(), ["delito", ORIGIN_YEAR_COLUMN]);
        assert_eq!(rows.value(0, ORIGIN_YEAR_COLUMN), Some(&json!(2021)));
        assert_eq!(rows.value(1, ORIGIN_YEAR_COLUMN), Some(&json!(2021)));
    }

    #[test]
    fn truncate_caps_row_count() {
        let mut rows = RowSet::from_csv("delito\na\nb\nc\n").unwrap();
        rows.truncate(2);
        assert_eq!(rows.len(), 2);
        rows.truncate(10);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn write_csv_renders_nulls_as_empty_fields() {
        let a = RowSet::from_csv("delito\nrobo\n").unwrap();
        let b = RowSet::from_csv("alcaldia\nGAM\n").unwrap();
        let merged = RowSet::concat_outer(vec![a, b]);

        let mut out = Vec::new();
        merged.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "delito,alcaldia\nrobo,\n,GAM\n");
    }
}
