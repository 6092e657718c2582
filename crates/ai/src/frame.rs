//! Column-oriented daily tables.
//!
//! [`RawFrame`] holds provider cells as delivered (text, possibly with a comma
//! decimal separator or empty). [`DailyFrame`] holds parsed numeric columns where
//! `None` marks a missing value.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::result::{AiError, AiResult};

/// Name of the date column in provider payloads.
pub const DATE_COLUMN: &str = "DATE";

/// Daily observations as delivered by the climate provider, one row per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    dates: Vec<NaiveDate>,
    columns: IndexMap<String, Vec<Option<String>>>,
}

impl RawFrame {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dates: Vec::new(),
            columns: columns.into_iter().map(|c| (c.into(), Vec::new())).collect(),
        }
    }

    /// Append one row. `cells` follows the column order given at construction.
    pub fn push_row(&mut self, date: NaiveDate, cells: Vec<Option<String>>) -> AiResult<()> {
        if cells.len() != self.columns.len() {
            return Err(AiError::InvalidInput(format!(
                "row for {date} has {} cells, expected {}",
                cells.len(),
                self.columns.len()
            )));
        }
        self.dates.push(date);
        for (values, cell) in self.columns.values_mut().zip(cells) {
            values.push(cell.filter(|c| !c.trim().is_empty()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Rows reordered by date. Ties keep their delivery order.
    pub fn sorted_by_date(mut self) -> Self {
        let mut order: Vec<usize> = (0..self.dates.len()).collect();
        order.sort_by_key(|&i| self.dates[i]);
        if order.iter().enumerate().all(|(pos, &i)| pos == i) {
            return self;
        }
        self.dates = order.iter().map(|&i| self.dates[i]).collect();
        for values in self.columns.values_mut() {
            *values = order.iter().map(|&i| values[i].clone()).collect();
        }
        self
    }

    /// Last row as a JSON object: `DATE` first, numeric-looking cells as numbers,
    /// anything else as strings, empty cells as `null`.
    pub fn last_row_json(&self) -> Option<Map<String, Value>> {
        let last = self.dates.len().checked_sub(1)?;
        let mut row = Map::new();
        row.insert(
            DATE_COLUMN.to_string(),
            Value::String(self.dates[last].format("%Y-%m-%d").to_string()),
        );
        for (name, values) in &self.columns {
            let value = match values[last].as_deref() {
                None => Value::Null,
                Some(cell) => match parse_decimal(cell) {
                    Ok(Some(v)) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
                    _ => Value::String(cell.to_string()),
                },
            };
            row.insert(name.clone(), value);
        }
        Some(row)
    }
}

/// Parse a provider decimal, accepting `,` as the decimal separator.
///
/// Empty cells are `Ok(None)`.
pub fn parse_decimal(cell: &str) -> Result<Option<f64>, String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let normalised = trimmed.replace(',', ".");
    normalised
        .parse::<f64>()
        .map(|v| if v.is_nan() { None } else { Some(v) })
        .map_err(|_| format!("not a number: {trimmed:?}"))
}

/// Parsed daily table. `None` marks a missing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyFrame {
    dates: Vec<NaiveDate>,
    columns: IndexMap<String, Vec<Option<f64>>>,
}

impl DailyFrame {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: IndexMap::new(),
        }
    }

    /// Add (or replace) a column. Replacing keeps the column's position.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> AiResult<()> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(AiError::Internal(format!(
                "column {name} has {} values for {} dates",
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Values of row `index`, in column order.
    pub fn row(&self, index: usize) -> Vec<Option<f64>> {
        self.columns.values().map(|v| v[index]).collect()
    }

    /// Indices of rows where every column has a value.
    pub fn complete_rows(&self) -> Vec<usize> {
        (0..self.dates.len())
            .filter(|&i| self.columns.values().all(|v| v[i].is_some()))
            .collect()
    }
}
