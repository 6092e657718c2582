//! Supervised feature construction for daily climate forecasting.
//!
//! Pipeline (time order is preserved at every step):
//! 1. prune to the declared inputs plus the target
//! 2. parse decimals (`,` or `.`)
//! 3. fill gaps with the column median over the loaded window
//! 4. lags `1..=7` of the core columns
//! 5. rolling means over 3, 7 and 14 days of the core columns
//! 6. calendar features (`dayofyear`, `month`)
//! 7. target = target column shifted by `-horizon`, rows with any gap dropped
//! 8. chronological train/test split
//!
//! Steps 1-6 are shared with prediction so both sides see identical columns.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::frame::{DailyFrame, RawFrame, parse_decimal};
use crate::result::{AiError, AiResult};

/// Default model inputs.
pub const DEFAULT_INPUT_FEATURES: [&str; 5] = ["RR", "TN", "TM", "TX", "TAMPLI"];

/// Columns that receive lag and rolling features (when present).
pub const CORE_COLUMNS: [&str; 4] = ["TX", "TN", "RR", "FFM"];

pub const MAX_LAG: usize = 7;

pub const ROLLING_WINDOWS: [usize; 3] = [3, 7, 14];

/// Share of rows held out for evaluation.
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Which columns feed a model, and which one it predicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub input_features: Vec<String>,
    pub target: String,
}

impl FeatureSpec {
    /// Default inputs for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            input_features: DEFAULT_INPUT_FEATURES.iter().map(|s| s.to_string()).collect(),
            target: target.into(),
        }
    }

    pub fn with_input_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Inputs followed by the target (once).
    fn relevant_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.input_features.iter().map(String::as_str).collect();
        if !cols.contains(&self.target.as_str()) {
            cols.push(&self.target);
        }
        cols
    }

    pub fn target_column(&self) -> String {
        format!("{}_target", self.target)
    }
}

/// Steps 1-3: prune, parse, median-impute.
///
/// Fails with [`AiError::MissingFeatures`] when the target column is absent.
pub fn clean(raw: &RawFrame, spec: &FeatureSpec) -> AiResult<DailyFrame> {
    let raw = raw.clone().sorted_by_date();
    let available: Vec<&str> = spec
        .relevant_columns()
        .into_iter()
        .filter(|c| raw.column(c).is_some())
        .collect();

    if !available.contains(&spec.target.as_str()) {
        return Err(AiError::MissingFeatures(vec![spec.target.clone()]));
    }

    let mut frame = DailyFrame::new(raw.dates().to_vec());
    for name in available {
        let cells = raw.column(name).unwrap_or_default();
        let mut values = cells
            .iter()
            .map(|cell| match cell {
                Some(text) => parse_decimal(text).map_err(|e| AiError::InvalidInput(format!("column {name}: {e}"))),
                None => Ok(None),
            })
            .collect::<AiResult<Vec<Option<f64>>>>()?;

        if let Some(m) = median(values.iter().flatten().copied()) {
            for v in values.iter_mut().filter(|v| v.is_none()) {
                *v = Some(m);
            }
        }
        frame.insert_column(name, values)?;
    }
    Ok(frame)
}

/// Steps 4-6: lags, rolling means, calendar features.
pub fn engineer(mut frame: DailyFrame) -> AiResult<DailyFrame> {
    let core: Vec<(String, Vec<Option<f64>>)> = CORE_COLUMNS
        .iter()
        .filter_map(|c| frame.column(c).map(|v| (c.to_string(), v.to_vec())))
        .collect();

    for lag in 1..=MAX_LAG {
        for (name, values) in &core {
            frame.insert_column(format!("{name}_lag_{lag}"), shift_forward(values, lag))?;
        }
    }

    for window in ROLLING_WINDOWS {
        for (name, values) in &core {
            frame.insert_column(format!("{name}_rolling_{window}"), rolling_mean(values, window))?;
        }
    }

    let dayofyear = frame.dates().iter().map(|d| Some(f64::from(d.ordinal()))).collect();
    let month = frame.dates().iter().map(|d| Some(f64::from(d.month()))).collect();
    frame.insert_column("dayofyear", dayofyear)?;
    frame.insert_column("month", month)?;

    Ok(frame)
}

/// Steps 1-6.
pub fn build_features(raw: &RawFrame, spec: &FeatureSpec) -> AiResult<DailyFrame> {
    engineer(clean(raw, spec)?)
}

/// Feature matrix with aligned targets, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedSet {
    pub feature_names: Vec<String>,
    pub dates: Vec<chrono::NaiveDate>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

/// Rows and targets for one side of a split.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Step 7: the label of day `t` is the target value at day `t + horizon`.
///
/// Rows with any missing feature or no shifted target are dropped, which removes
/// the warm-up rows of the lag/rolling windows and the last `horizon` rows.
pub fn supervised(frame: &DailyFrame, target: &str, horizon: usize) -> AiResult<SupervisedSet> {
    let target_values = frame
        .column(target)
        .ok_or_else(|| AiError::MissingFeatures(vec![target.to_string()]))?;
    let shifted = shift_backward(target_values, horizon);

    let mut set = SupervisedSet {
        feature_names: frame.column_names().map(str::to_string).collect(),
        dates: Vec::new(),
        rows: Vec::new(),
        targets: Vec::new(),
    };

    for (i, label) in shifted.into_iter().enumerate() {
        let Some(label) = label else { continue };
        let row: Option<Vec<f64>> = frame.row(i).into_iter().collect();
        if let Some(row) = row {
            set.dates.push(frame.dates()[i]);
            set.rows.push(row);
            set.targets.push(label);
        }
    }

    Ok(set)
}

impl SupervisedSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Step 8: first rows train, last `ceil(n * test_fraction)` rows test. No shuffling.
    pub fn split_chronological(&self, test_fraction: f64) -> AiResult<(Dataset, Dataset)> {
        if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
            return Err(AiError::InvalidInput(format!(
                "test fraction must be in (0, 1), got {test_fraction}"
            )));
        }
        let n = self.rows.len();
        let n_test = (n as f64 * test_fraction).ceil() as usize;
        let n_train = n.saturating_sub(n_test);
        if n_train == 0 || n_test == 0 {
            return Err(AiError::DataIncomplete(format!(
                "{n} usable rows after feature construction, need at least 2"
            )));
        }

        let train = Dataset {
            rows: self.rows[..n_train].to_vec(),
            targets: self.targets[..n_train].to_vec(),
        };
        let test = Dataset {
            rows: self.rows[n_train..].to_vec(),
            targets: self.targets[n_train..].to_vec(),
        };
        Ok((train, test))
    }
}

/// Pandas-style median (mean of the two middle values for even counts).
fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// `out[t] = values[t - by]`.
fn shift_forward(values: &[Option<f64>], by: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| t.checked_sub(by).and_then(|src| values[src]))
        .collect()
}

/// `out[t] = values[t + by]`.
fn shift_backward(values: &[Option<f64>], by: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| values.get(t + by).copied().flatten())
        .collect()
}

/// Trailing mean over a full window; `None` until the window is filled or when it
/// contains a gap.
fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| {
            let start = (t + 1).checked_sub(window)?;
            let sum: Option<f64> = values[start..=t].iter().copied().sum();
            sum.map(|s| s / window as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn raw_frame(days: usize) -> RawFrame {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut frame = RawFrame::new(["POSTE", "RR", "TN", "TX", "TM", "FFM"]);
        for i in 0..days {
            let tx = 10.0 + i as f64;
            frame
                .push_row(
                    start + Duration::days(i as i64),
                    vec![
                        Some("69123002".into()),
                        Some(format!("{},5", i % 3)),
                        Some(format!("{}", tx - 8.0)),
                        Some(format!("{tx}")),
                        Some(format!("{}", tx - 4.0)),
                        Some("3,1".into()),
                    ],
                )
                .unwrap();
        }
        frame
    }

    #[test]
    fn pruning_keeps_inputs_then_target() {
        let spec = FeatureSpec::new("TX");
        let frame = clean(&raw_frame(3), &spec).unwrap();
        let names: Vec<_> = frame.column_names().collect();
        assert_eq!(names, vec!["RR", "TN", "TM", "TX"]);
        assert_eq!(frame.column("RR").unwrap()[1], Some(1.5));
    }

    #[test]
    fn target_outside_inputs_is_appended() {
        let spec = FeatureSpec::new("FFM").with_input_features(["TX"]);
        let frame = clean(&raw_frame(3), &spec).unwrap();
        let names: Vec<_> = frame.column_names().collect();
        assert_eq!(names, vec!["TX", "FFM"]);
    }

    #[test]
    fn missing_target_is_reported() {
        let spec = FeatureSpec::new("TAMPLI").with_input_features(["TX"]);
        let err = clean(&raw_frame(3), &spec).unwrap_err();
        assert!(matches!(err, AiError::MissingFeatures(cols) if cols == vec!["TAMPLI".to_string()]));
    }

    #[test]
    fn gaps_are_filled_with_the_column_median() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut raw = RawFrame::new(["TX"]);
        for (i, cell) in ["1", "", "4", "10"].iter().enumerate() {
            raw.push_row(start + Duration::days(i as i64), vec![Some(cell.to_string())])
                .unwrap();
        }
        let frame = clean(&raw, &FeatureSpec::new("TX").with_input_features(["TX"])).unwrap();
        assert_eq!(frame.column("TX").unwrap()[1], Some(4.0));
    }

    #[test]
    fn garbage_cells_are_rejected() {
        let mut raw = RawFrame::new(["TX"]);
        raw.push_row(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), vec![Some("hot".into())])
            .unwrap();
        assert!(matches!(
            clean(&raw, &FeatureSpec::new("TX")),
            Err(AiError::InvalidInput(_))
        ));
    }

    #[test]
    fn engineered_columns_follow_a_fixed_order() {
        let frame = build_features(&raw_frame(20), &FeatureSpec::new("TX")).unwrap();
        let names: Vec<_> = frame.column_names().collect();

        assert_eq!(&names[..4], &["RR", "TN", "TM", "TX"]);
        assert_eq!(&names[4..7], &["TX_lag_1", "TN_lag_1", "RR_lag_1"]);
        assert_eq!(names[7], "TX_lag_2");
        assert!(names.contains(&"RR_rolling_14"));
        assert!(!names.iter().any(|n| n.starts_with("FFM")));
        assert_eq!(&names[names.len() - 2..], &["dayofyear", "month"]);
        assert_eq!(names.len(), 4 + 7 * 3 + 3 * 3 + 2);
    }

    #[test]
    fn lags_and_rolling_means_look_backwards() {
        let frame = build_features(&raw_frame(20), &FeatureSpec::new("TX")).unwrap();
        let lag3 = frame.column("TX_lag_3").unwrap();
        assert_eq!(lag3[2], None);
        assert_eq!(lag3[10], Some(17.0));

        let roll3 = frame.column("TX_rolling_3").unwrap();
        assert_eq!(roll3[1], None);
        assert_eq!(roll3[4], Some((12.0 + 13.0 + 14.0) / 3.0));
        assert_eq!(frame.column("dayofyear").unwrap()[19], Some(20.0));
    }

    #[test]
    fn target_is_the_value_horizon_days_later() {
        let frame = build_features(&raw_frame(40), &FeatureSpec::new("TX")).unwrap();
        let tx = frame.column("TX").unwrap().to_vec();
        let set = supervised(&frame, "TX", 1).unwrap();

        // 13 warm-up rows for the 14-day window, one trailing row for the shift.
        assert_eq!(set.len(), 40 - 13 - 1);
        for (k, date) in set.dates.iter().enumerate() {
            let i = frame.dates().iter().position(|d| d == date).unwrap();
            assert_eq!(Some(set.targets[k]), tx[i + 1]);
        }
        assert!(!set.feature_names.contains(&"TX_target".to_string()));
    }

    #[test]
    fn split_is_chronological_with_ceil_test_size() {
        let frame = build_features(&raw_frame(40), &FeatureSpec::new("TX")).unwrap();
        let set = supervised(&frame, "TX", 2).unwrap();
        let (train, test) = set.split_chronological(DEFAULT_TEST_FRACTION).unwrap();

        assert_eq!(set.len(), 25);
        assert_eq!(test.len(), 5);
        assert_eq!(train.len(), 20);
        assert_eq!(train.rows[0], set.rows[0]);
        assert_eq!(test.targets.last(), set.targets.last());
    }

    #[test]
    fn too_little_history_cannot_be_split() {
        let frame = build_features(&raw_frame(15), &FeatureSpec::new("TX")).unwrap();
        let set = supervised(&frame, "TX", 1).unwrap();
        assert_eq!(set.len(), 1);
        assert!(matches!(
            set.split_chronological(DEFAULT_TEST_FRACTION),
            Err(AiError::DataIncomplete(_))
        ));
    }
}
