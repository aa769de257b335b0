// src/normalize.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::table::{RawRecord, RawTable};

pub const YEAR: &str = "Year";
pub const CATEGORY: &str = "Category";
pub const TYPE: &str = "Type";
pub const VALUE: &str = "Value";

/// `2023` or `Jan 2023-Dec 2023`.
static FULL_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d{4})|Jan(?:uary)? (\d{4}) ?- ?Dec(?:ember)? (\d{4}))$").unwrap()
});
static FIRST_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());
static GENDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(male|males|female|females|men|women|gender|sex)\b").unwrap());
static TOTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(all ages|all persons|total|all)$").unwrap());
static AGE_BAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(aged?|ages)\b|\d+\s*\+|\d+\s*-\s*\d+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryType {
    Total,
    AgeGroup,
    Gender,
}

impl CategoryType {
    /// Best guess from a category label when the source has no type column.
    pub fn classify(label: &str) -> Self {
        let label = label.trim();
        if TOTAL.is_match(label) {
            CategoryType::Total
        } else if GENDER.is_match(label) {
            CategoryType::Gender
        } else if AGE_BAND.is_match(label) {
            CategoryType::AgeGroup
        } else {
            CategoryType::Total
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Total => "Total",
            CategoryType::AgeGroup => "AgeGroup",
            CategoryType::Gender => "Gender",
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CategoryType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "total" => Ok(CategoryType::Total),
            "agegroup" | "age" => Ok(CategoryType::AgeGroup),
            "gender" | "sex" => Ok(CategoryType::Gender),
            _ => Err(PipelineError::Parse(format!("unknown category type '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub year: String,
    pub category: String,
    pub kind: CategoryType,
    pub value: f64,
}

/// Row-level filter, evaluated against column names after renaming.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Equals { column: String, value: String },
    Contains { column: String, pattern: String },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Equals { column, .. } | Filter::Contains { column, .. } => column,
        }
    }

    pub fn matches(&self, record: &RawRecord<'_>) -> bool {
        match self {
            Filter::Equals { column, value } => record.get(column) == Some(value.as_str()),
            Filter::Contains { column, pattern } => record
                .get(column)
                .map_or(false, |v| v.contains(pattern.as_str())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueMode {
    /// Numeric `Value` column.
    #[default]
    Column,
    /// One observation per row, summed per (Year, Category).
    Count,
}

/// Unpivot a one-column-per-period source before renaming.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Melt {
    pub id_columns: Vec<String>,
    #[serde(default = "default_var_name")]
    pub var_name: String,
    #[serde(default = "default_value_name")]
    pub value_name: String,
}

fn default_var_name() -> String {
    YEAR.to_string()
}

fn default_value_name() -> String {
    VALUE.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NormalizeRules {
    /// Source column name → canonical name.
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Allow-list of categories; empty keeps everything.
    #[serde(default)]
    pub target_categories: Vec<String>,
    #[serde(default)]
    pub full_calendar_year: bool,
    #[serde(default)]
    pub value: ValueMode,
    #[serde(default)]
    pub melt: Option<Melt>,
}

impl NormalizeRules {
    /// Columns the fetched table must carry before any reshaping.
    pub fn required_source_columns(&self) -> Vec<String> {
        if let Some(melt) = &self.melt {
            return melt.id_columns.clone();
        }
        let mut cols: Vec<String> = self.column_map.keys().cloned().collect();
        for filter in &self.filters {
            let column = filter.column();
            let renamed_into = self.column_map.values().any(|c| c == column);
            if !renamed_into && !cols.iter().any(|c| c == column) {
                cols.push(column.to_string());
            }
        }
        cols
    }
}

pub fn is_full_calendar_year(label: &str) -> bool {
    match FULL_YEAR.captures(label.trim()) {
        Some(caps) => match (caps.get(2), caps.get(3)) {
            (Some(from), Some(to)) => from.as_str() == to.as_str(),
            _ => caps.get(1).is_some(),
        },
        None => false,
    }
}

/// Chronological by the first four-digit year, then lexical.
pub fn compare_years(a: &str, b: &str) -> Ordering {
    year_key(a).cmp(&year_key(b)).then_with(|| a.cmp(b))
}

fn year_key(label: &str) -> u32 {
    FIRST_YEAR
        .find(label)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u32::MAX)
}

pub fn sort_records(records: &mut [NormalizedRecord]) {
    records.sort_by(|a, b| {
        compare_years(&a.year, &b.year).then_with(|| a.category.cmp(&b.category))
    });
}

/// Trim, drop thousands separators, reject non-finite.
pub fn parse_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().trim_matches('"').chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rename, filter, coerce and deduplicate a fetched table.
///
/// Identical (Year, Category, Value) observations collapse to the first one in
/// source order. Observations that disagree on the value are all kept so that
/// [`crate::pivot::pivot`] can report the conflict.
#[instrument(level = "info", skip_all, fields(rows = raw.len()))]
pub fn normalize(raw: &RawTable, rules: &NormalizeRules) -> Result<Vec<NormalizedRecord>> {
    let mut table = match &rules.melt {
        Some(melt) => raw.melt(&melt.id_columns, &melt.var_name, &melt.value_name)?,
        None => raw.clone(),
    };
    table.rename_columns(&rules.column_map);

    let mut required = vec![YEAR, CATEGORY];
    if rules.value == ValueMode::Column {
        required.push(VALUE);
    }
    table.require_columns(&required)?;

    let mut filtered_out = 0usize;
    let mut bad_values = 0usize;
    let mut candidates = Vec::new();

    for record in table.records() {
        if !rules.filters.iter().all(|f| f.matches(&record)) {
            filtered_out += 1;
            continue;
        }
        let year = record.get(YEAR).unwrap_or_default().trim();
        let category = record.get(CATEGORY).unwrap_or_default().trim();
        if !rules.target_categories.is_empty()
            && !rules.target_categories.iter().any(|t| t == category)
        {
            filtered_out += 1;
            continue;
        }
        if rules.full_calendar_year && !is_full_calendar_year(year) {
            filtered_out += 1;
            continue;
        }

        let value = match rules.value {
            ValueMode::Count => 1.0,
            ValueMode::Column => match record.get(VALUE).and_then(parse_value) {
                Some(v) => v,
                None => {
                    bad_values += 1;
                    continue;
                }
            },
        };

        let kind = match record.get(TYPE) {
            Some(t) => t
                .parse::<CategoryType>()
                .unwrap_or_else(|_| CategoryType::classify(category)),
            None => CategoryType::classify(category),
        };

        candidates.push(NormalizedRecord {
            year: year.to_string(),
            category: category.to_string(),
            kind,
            value,
        });
    }

    let mut records = match rules.value {
        ValueMode::Column => dedup_identical(candidates),
        ValueMode::Count => sum_counts(candidates),
    };
    sort_records(&mut records);

    debug!(filtered_out, bad_values, "dropped rows");
    info!(records = records.len(), "normalized");
    Ok(records)
}

fn dedup_identical(candidates: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut seen: HashMap<(String, String), Vec<f64>> = HashMap::new();
    let mut out = Vec::with_capacity(candidates.len());
    for rec in candidates {
        let values = seen
            .entry((rec.year.clone(), rec.category.clone()))
            .or_default();
        if values.contains(&rec.value) {
            debug!(year = %rec.year, category = %rec.category, "duplicate observation skipped");
            continue;
        }
        values.push(rec.value);
        out.push(rec);
    }
    out
}

fn sum_counts(candidates: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut totals: BTreeMap<(String, String), NormalizedRecord> = BTreeMap::new();
    for rec in candidates {
        totals
            .entry((rec.year.clone(), rec.category.clone()))
            .and_modify(|acc| acc.value += rec.value)
            .or_insert(rec);
    }
    totals.into_values().collect()
}
