// src/pivot.rs

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};
use crate::normalize::{compare_years, NormalizedRecord};

/// One row per year, one column per category.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WideTable {
    /// Constant value for the optional `Location` column.
    pub location: Option<String>,
    /// Column order, sorted lexically.
    pub categories: Vec<String>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub year: String,
    /// Aligned with `WideTable::categories`; `None` is a missing observation.
    pub cells: Vec<Option<f64>>,
}

impl WideTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn get(&self, year: &str, category: &str) -> Option<f64> {
        let col = self.categories.iter().position(|c| c == category)?;
        self.rows
            .iter()
            .find(|r| r.year == year)
            .and_then(|r| r.cells.get(col).copied().flatten())
    }

    /// Every present `(Year, Category, Value)` cell, row-major.
    pub fn triples(&self) -> Vec<(String, String, f64)> {
        let mut out = Vec::new();
        for row in &self.rows {
            for (category, cell) in self.categories.iter().zip(&row.cells) {
                if let Some(value) = cell {
                    out.push((row.year.clone(), category.clone(), *value));
                }
            }
        }
        out
    }
}

/// Spread normalized records into a [`WideTable`].
///
/// Equal values landing on the same cell are fine; different ones are a
/// [`PipelineError::PivotConflict`], never resolved by picking one.
#[instrument(level = "debug", skip_all, fields(records = records.len()))]
pub fn pivot(records: &[NormalizedRecord]) -> Result<WideTable> {
    let categories: Vec<String> = records
        .iter()
        .map(|r| r.category.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let column: HashMap<&str, usize> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut years: Vec<&str> = records
        .iter()
        .map(|r| r.year.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    years.sort_by(|a, b| compare_years(a, b));
    let row_of: HashMap<&str, usize> = years.iter().enumerate().map(|(i, y)| (*y, i)).collect();

    let mut rows: Vec<WideRow> = years
        .iter()
        .map(|y| WideRow {
            year: y.to_string(),
            cells: vec![None; categories.len()],
        })
        .collect();

    for rec in records {
        let cell = &mut rows[row_of[rec.year.as_str()]].cells[column[rec.category.as_str()]];
        match *cell {
            None => *cell = Some(rec.value),
            Some(existing) if existing == rec.value => {}
            Some(existing) => {
                return Err(PipelineError::PivotConflict {
                    year: rec.year.clone(),
                    category: rec.category.clone(),
                    first: existing,
                    second: rec.value,
                })
            }
        }
    }

    debug!(rows = rows.len(), columns = categories.len(), "pivoted");
    Ok(WideTable {
        location: None,
        categories,
        rows,
    })
}
