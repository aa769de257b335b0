// src/store.rs

use csv::{ReaderBuilder, Writer};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::normalize::{parse_value, sort_records, CategoryType, NormalizedRecord};
use crate::pivot::{WideRow, WideTable};

/// Cell text for an absent (Year, Category) observation.
pub const MISSING: &str = "NA";
pub const LOCATION: &str = "Location";
const LONG_HEADER: [&str; 4] = ["Year", "Category", "Type", "Value"];

/// A table ready to be written in one of the two persisted layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum Table {
    Wide(WideTable),
    Long(Vec<NormalizedRecord>),
}

impl Table {
    pub fn row_count(&self) -> usize {
        match self {
            Table::Wide(t) => t.rows.len(),
            Table::Long(records) => records.len(),
        }
    }
}

/// Shortest text that parses back to the same `f64`.
pub fn format_value(value: f64) -> String {
    format!("{}", value)
}

/// Replace `dest` wholesale with `table`.
///
/// Missing parent directories are created. Rows go to a hidden sibling first
/// and are renamed over `dest`, so a failed write leaves the old file intact.
#[instrument(level = "info", skip(table), fields(path = %dest.display(), rows = table.row_count()))]
pub fn persist(table: &Table, dest: &Path) -> Result<()> {
    if let Table::Wide(wide) = table {
        check_wide_header(wide)?;
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_sibling(dest);
    let written = write_csv(table, &tmp_path);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, dest)?;

    info!("persisted");
    Ok(())
}

/// `Year` and `Location` lead the wide header, so no category may reuse them
/// or the file would not read back the same.
fn check_wide_header(wide: &WideTable) -> Result<()> {
    match wide
        .categories
        .iter()
        .find(|c| c.as_str() == "Year" || c.as_str() == LOCATION)
    {
        Some(clash) => Err(PipelineError::Parse(format!(
            "category '{}' clashes with a reserved wide column",
            clash
        ))),
        None => Ok(()),
    }
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "table.csv".to_string());
    dest.with_file_name(format!(".{}.tmp", name))
}

fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    match table {
        Table::Wide(wide) => {
            let mut header = vec!["Year".to_string()];
            if wide.location.is_some() {
                header.push(LOCATION.to_string());
            }
            header.extend(wide.categories.iter().cloned());
            wtr.write_record(&header)?;

            for row in &wide.rows {
                let mut out = vec![row.year.clone()];
                if let Some(location) = &wide.location {
                    out.push(location.clone());
                }
                out.extend(row.cells.iter().map(|c| match c {
                    Some(v) => format_value(*v),
                    None => MISSING.to_string(),
                }));
                wtr.write_record(&out)?;
            }
        }
        Table::Long(records) => {
            wtr.write_record(LONG_HEADER)?;
            for rec in records {
                wtr.write_record([
                    rec.year.as_str(),
                    rec.category.as_str(),
                    rec.kind.as_str(),
                    format_value(rec.value).as_str(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Read the file text, treating an absent file as no data.
fn read_existing(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no persisted table");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_cell(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell == MISSING {
        return Ok(None);
    }
    parse_value(cell)
        .map(Some)
        .ok_or_else(|| PipelineError::Parse(format!("bad numeric cell '{}'", cell)))
}

/// Load a persisted wide table; `None` when absent or header-only.
pub fn load_wide(path: &Path) -> Result<Option<WideTable>> {
    let Some(text) = read_existing(path)? else {
        return Ok(None);
    };
    let mut rdr = ReaderBuilder::new().from_reader(text.as_bytes());
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if headers.first().map(String::as_str) != Some("Year") {
        return Err(PipelineError::Parse(format!(
            "{} does not start with a Year column",
            path.display()
        )));
    }
    let has_location = headers.get(1).map(String::as_str) == Some(LOCATION);
    let first_value = if has_location { 2 } else { 1 };

    let mut table = WideTable {
        location: None,
        categories: headers[first_value..].to_vec(),
        rows: Vec::new(),
    };
    for result in rdr.records() {
        let record = result?;
        if has_location && table.location.is_none() {
            table.location = record.get(1).map(str::to_string);
        }
        let cells = record
            .iter()
            .skip(first_value)
            .map(parse_cell)
            .collect::<Result<Vec<_>>>()?;
        table.rows.push(WideRow {
            year: record.get(0).unwrap_or_default().to_string(),
            cells,
        });
    }

    if table.rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(table))
}

/// Load a persisted long table; `None` when absent or header-only.
pub fn load_long(path: &Path) -> Result<Option<Vec<NormalizedRecord>>> {
    let Some(text) = read_existing(path)? else {
        return Ok(None);
    };
    let mut rdr = ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = rdr.headers()?.clone();
    if headers.iter().ne(LONG_HEADER) {
        return Err(PipelineError::Parse(format!(
            "{} header is {:?}, expected {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>(),
            LONG_HEADER
        )));
    }

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let value = parse_cell(&record[3])?.ok_or_else(|| {
            PipelineError::Parse(format!("missing value in {}", path.display()))
        })?;
        records.push(NormalizedRecord {
            year: record[0].to_string(),
            category: record[1].to_string(),
            kind: record[2].parse::<CategoryType>()?,
            value,
        });
    }

    if records.is_empty() {
        return Ok(None);
    }
    sort_records(&mut records);
    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::pivot;
    use std::collections::HashSet;
    use tempfile::tempdir;

    const RATE: &str = "Employment rate - aged 16+";
    const UNEMP: &str = "Unemployment rate - aged 16+";

    fn rec(year: &str, category: &str, value: f64) -> NormalizedRecord {
        NormalizedRecord {
            year: year.into(),
            category: category.into(),
            kind: CategoryType::classify(category),
            value,
        }
    }

    fn sample() -> WideTable {
        pivot(&[
            rec("2022", RATE, 78.3),
            rec("2023", RATE, 79.1),
            rec("2023", UNEMP, 3.4),
        ])
        .unwrap()
    }

    #[test]
    fn writes_wide_with_location_and_missing_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processed/nested/employment.csv");
        let table = sample().with_location(Some("Chichester".into()));
        persist(&Table::Wide(table), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Year,Location,Employment rate - aged 16+,Unemployment rate - aged 16+\n\
             2022,Chichester,78.3,NA\n\
             2023,Chichester,79.1,3.4\n"
        );
        // no temp file left behind
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn writes_long_form() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("population.csv");
        let records = vec![rec("2021", "Aged 16 - 64", 70250.0), rec("2021", "Males", 59000.0)];
        persist(&Table::Long(records), &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Year,Category,Type,Value\n2021,Aged 16 - 64,AgeGroup,70250\n2021,Males,Gender,59000\n"
        );
    }

    #[test]
    fn overwrites_instead_of_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("employment.csv");
        fs::write(&path, "old,content\n1,2\n").unwrap();
        persist(&Table::Wide(sample()), &path).unwrap();
        persist(&Table::Wide(sample()), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("old"));
        assert_eq!(text.matches("Year").count(), 1);
    }

    #[test]
    fn identical_input_is_byte_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        persist(&Table::Wide(sample()), &a).unwrap();
        persist(&Table::Wide(sample()), &b).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn wide_round_trip_preserves_triples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("employment.csv");
        let table = sample().with_location(Some("Chichester".into()));
        persist(&Table::Wide(table.clone()), &path).unwrap();

        let loaded = load_wide(&path).unwrap().unwrap();
        assert_eq!(loaded, table);

        let written: HashSet<_> = table
            .triples()
            .into_iter()
            .map(|(y, c, v)| (y, c, v.to_bits()))
            .collect();
        let read: HashSet<_> = loaded
            .triples()
            .into_iter()
            .map(|(y, c, v)| (y, c, v.to_bits()))
            .collect();
        assert_eq!(written, read);
    }

    #[test]
    fn long_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crime.csv");
        let records = vec![rec("2023-03", "anti-social-behaviour", 12.0), rec("2023-03", "burglary", 2.0)];
        persist(&Table::Long(records.clone()), &path).unwrap();
        assert_eq!(load_long(&path).unwrap().unwrap(), records);
    }

    #[test]
    fn empty_table_is_header_only_and_loads_as_no_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        persist(&Table::Wide(pivot(&[]).unwrap()), &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Year\n");
        assert!(load_wide(&path).unwrap().is_none());

        persist(&Table::Long(Vec::new()), &path).unwrap();
        assert!(load_long(&path).unwrap().is_none());
    }

    #[test]
    fn absent_file_is_no_data() {
        let dir = tempdir().unwrap();
        assert!(load_wide(&dir.path().join("nope.csv")).unwrap().is_none());
        assert!(load_long(&dir.path().join("nope.csv")).unwrap().is_none());
    }

    #[test]
    fn reserved_column_names_are_not_categories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.csv");
        fs::write(&path, "previous\n").unwrap();

        let table = pivot(&[rec("2023", "Location", 1.0), rec("2023", RATE, 79.1)]).unwrap();
        assert!(matches!(
            persist(&Table::Wide(table), &path),
            Err(PipelineError::Parse(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous\n");

        // the long layout has a fixed header, so the label is fine there
        let records = vec![rec("2023", "Location", 1.0)];
        persist(&Table::Long(records.clone()), &path).unwrap();
        assert_eq!(load_long(&path).unwrap().unwrap(), records);
    }

    #[test]
    fn foreign_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crime.csv");
        fs::write(&path, "CrimeType,Street,Month\nburglary,Main Road,2023-03\n").unwrap();
        assert!(matches!(load_wide(&path), Err(PipelineError::Parse(_))));
        assert!(matches!(load_long(&path), Err(PipelineError::Parse(_))));
    }
}
