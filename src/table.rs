// src/table.rs

use csv::ReaderBuilder;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::error::{PipelineError, Result};

/// Wire format of a source body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Csv,
    /// Array of objects; nested objects are flattened to dotted column names.
    Json,
}

/// A source dataset exactly as fetched: whatever columns the API chose to send.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    /// One entry per source row, aligned with `headers`.
    pub rows: Vec<Vec<String>>,
}

/// Borrowed view of one row, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    headers: &'a [String],
    row: &'a [String],
}

impl<'a> RawRecord<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.row.get(i))
            .map(String::as_str)
    }
}

impl RawTable {
    pub fn parse(body: &str, format: SourceFormat) -> Result<Self> {
        match format {
            SourceFormat::Csv => Self::from_csv_str(body),
            SourceFormat::Json => Self::from_json_str(body),
        }
    }

    pub fn from_csv_str(body: &str) -> Result<Self> {
        let body = body.trim_start_matches('\u{feff}');
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| PipelineError::Parse(format!("CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(PipelineError::Parse("CSV body has no header row".into()));
        }

        let mut rows = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| PipelineError::Parse(format!("CSV record {}: {}", idx + 1, e)))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        debug!(columns = headers.len(), rows = rows.len(), "parsed CSV body");
        Ok(Self { headers, rows })
    }

    pub fn from_json_str(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| PipelineError::Parse(format!("JSON body: {}", e)))?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(PipelineError::Parse(format!(
                    "expected a JSON array of records, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut headers: Vec<String> = Vec::new();
        let mut flat_rows: Vec<BTreeMap<String, String>> = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let Value::Object(obj) = item else {
                return Err(PipelineError::Parse(format!(
                    "JSON record {} is not an object",
                    idx + 1
                )));
            };
            let mut flat = BTreeMap::new();
            flatten_object("", &obj, &mut flat);
            for key in flat.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
            flat_rows.push(flat);
        }

        let rows = flat_rows
            .into_iter()
            .map(|mut flat| {
                headers
                    .iter()
                    .map(|h| flat.remove(h).unwrap_or_default())
                    .collect()
            })
            .collect::<Vec<Vec<String>>>();

        debug!(columns = headers.len(), rows = rows.len(), "parsed JSON body");
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn records(&self) -> impl Iterator<Item = RawRecord<'_>> {
        self.rows.iter().map(move |row| RawRecord {
            headers: &self.headers,
            row,
        })
    }

    /// Fail fast if any expected column is absent.
    pub fn require_columns<S: AsRef<str>>(&self, columns: &[S]) -> Result<()> {
        let missing: Vec<&str> = columns
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| !self.has_column(c))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(PipelineError::Parse(format!(
            "missing expected column(s) {:?}; source has {:?}",
            missing, self.headers
        )))
    }

    /// Rename headers in place; columns not in `map` keep their source name.
    pub fn rename_columns(&mut self, map: &BTreeMap<String, String>) {
        for header in self.headers.iter_mut() {
            if let Some(canonical) = map.get(header.as_str()) {
                trace!(from = %header, to = %canonical, "rename column");
                *header = canonical.clone();
            }
        }
    }

    /// Unpivot every non-id column into `(var_name, value_name)` rows.
    pub fn melt(&self, id_columns: &[String], var_name: &str, value_name: &str) -> Result<Self> {
        self.require_columns(id_columns)?;
        let positions: HashMap<&str, usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();
        let id_idx: Vec<usize> = id_columns.iter().map(|c| positions[c.as_str()]).collect();
        let value_idx: Vec<usize> = (0..self.headers.len())
            .filter(|i| !id_idx.contains(i))
            .collect();

        let mut headers = id_columns.to_vec();
        headers.push(var_name.to_string());
        headers.push(value_name.to_string());

        let mut rows = Vec::with_capacity(self.rows.len() * value_idx.len());
        for row in &self.rows {
            for &vi in &value_idx {
                let mut out: Vec<String> = id_idx.iter().map(|&i| row[i].clone()).collect();
                out.push(self.headers[vi].clone());
                out.push(row[vi].clone());
                rows.push(out);
            }
        }
        Ok(Self { headers, rows })
    }
}

fn flatten_object(prefix: &str, obj: &Map<String, Value>, out: &mut BTreeMap<String, String>) {
    for (key, value) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten_object(&name, inner, out),
            Value::Null => {
                out.insert(name, String::new());
            }
            Value::String(s) => {
                out.insert(name, s.clone());
            }
            other => {
                out.insert(name, other.to_string());
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMIS: &str = "\u{feff}\"DATE_NAME\",\"GEOGRAPHY_NAME\",\"VARIABLE_NAME\",\"MEASURES_NAME\",\"OBS_VALUE\"
\"Jan 2022-Dec 2022\",\"Chichester\",\"Employment rate - aged 16+\",\"Variable\",78.3
\"Jan 2022-Dec 2022\",\"Chichester\",\"Employment rate - aged 16+\",\"Numerator\",55200
";

    #[test]
    fn parses_nomis_csv() {
        let table = RawTable::from_csv_str(NOMIS).unwrap();
        assert_eq!(table.headers[0], "DATE_NAME");
        assert_eq!(table.len(), 2);
        let first = table.records().next().unwrap();
        assert_eq!(first.get("OBS_VALUE"), Some("78.3"));
        assert_eq!(first.get("MEASURES_NAME"), Some("Variable"));
        assert_eq!(first.get("NOPE"), None);
    }

    #[test]
    fn ragged_csv_is_a_parse_error() {
        let err = RawTable::from_csv_str("a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn header_only_csv_is_empty_not_an_error() {
        let table = RawTable::from_csv_str("Date,Variable,Value\n").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.headers.len(), 3);
    }

    #[test]
    fn require_columns_names_what_is_missing() {
        let table = RawTable::from_csv_str(NOMIS).unwrap();
        assert!(table.require_columns(&["DATE_NAME", "OBS_VALUE"]).is_ok());
        let err = table
            .require_columns(&["DATE_NAME", "C_AGE_NAME"])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("[\"C_AGE_NAME\"]"));
    }

    #[test]
    fn json_records_are_flattened() {
        let body = r#"[
            {"category": "anti-social-behaviour", "location": {"street": {"id": 1, "name": "On or near Bosham Lane"}}, "month": "2023-03", "outcome_status": null},
            {"category": "burglary", "location": {"street": {"id": 2, "name": "On or near Main Road"}}, "month": "2023-03", "context": ""}
        ]"#;
        let table = RawTable::from_json_str(body).unwrap();
        assert!(table.has_column("location.street.name"));
        assert!(table.has_column("context"));
        let rows: Vec<_> = table.records().collect();
        assert_eq!(rows[0].get("location.street.name"), Some("On or near Bosham Lane"));
        assert_eq!(rows[0].get("location.street.id"), Some("1"));
        assert_eq!(rows[0].get("outcome_status"), Some(""));
        // absent keys become empty cells
        assert_eq!(rows[0].get("context"), Some(""));
        assert_eq!(rows[1].get("category"), Some("burglary"));
    }

    #[test]
    fn json_must_be_an_array_of_objects() {
        assert!(matches!(
            RawTable::from_json_str(r#"{"error": "nope"}"#),
            Err(PipelineError::Parse(_))
        ));
        assert!(matches!(
            RawTable::from_json_str("[1, 2]"),
            Err(PipelineError::Parse(_))
        ));
        assert!(matches!(
            RawTable::from_json_str("<html>"),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn rename_keeps_unmapped_columns() {
        let mut table = RawTable::from_csv_str(NOMIS).unwrap();
        let map = BTreeMap::from([
            ("DATE_NAME".to_string(), "Year".to_string()),
            ("OBS_VALUE".to_string(), "Value".to_string()),
        ]);
        table.rename_columns(&map);
        assert_eq!(
            table.headers,
            vec!["Year", "GEOGRAPHY_NAME", "VARIABLE_NAME", "MEASURES_NAME", "Value"]
        );
    }

    #[test]
    fn melt_turns_year_columns_into_rows() {
        let table =
            RawTable::from_csv_str("Code,Name,2020,2021\nE07000225,Chichester,121000,124100\n")
                .unwrap();
        let long = table
            .melt(&["Code".to_string(), "Name".to_string()], "Year", "Value")
            .unwrap();
        assert_eq!(long.headers, vec!["Code", "Name", "Year", "Value"]);
        assert_eq!(
            long.rows,
            vec![
                vec!["E07000225", "Chichester", "2020", "121000"],
                vec!["E07000225", "Chichester", "2021", "124100"],
            ]
        );

        assert!(table.melt(&["Missing".to_string()], "Year", "Value").is_err());
    }
}
