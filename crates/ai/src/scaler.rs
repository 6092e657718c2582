use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::result::{AiError, AiResult};

/// Zero-mean / unit-variance standardisation, fit per column.
///
/// Uses the population standard deviation; constant columns get scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> AiResult<Self> {
        let first = rows
            .first()
            .ok_or_else(|| AiError::DataIncomplete("cannot fit a scaler on zero rows".to_string()))?;
        let width = first.len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(AiError::InvalidInput("ragged feature matrix".to_string()));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; width];
        for row in rows {
            for ((acc, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *acc += (v - m) * (v - m);
            }
        }
        let scale = var
            .into_iter()
            .map(|s| {
                let std = (s / n).sqrt();
                if std == 0.0 || !std.is_finite() { 1.0 } else { std }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> AiResult<Vec<f64>> {
        if row.len() != self.mean.len() {
            return Err(AiError::InvalidInput(format!(
                "scaler expects {} features, got {}",
                self.mean.len(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> AiResult<Vec<Vec<f64>>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

/// Min/max/scale triple of one classifier input channel.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub min: f64,
    pub max: f64,
    pub scale: f64,
}

/// Precomputed channel-wise min-max scaler for the classifier window.
///
/// `x' = x * scale - min * scale`. Fit offline, never refit at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    ranges: [ChannelRange; 9],
}

impl MinMaxScaler {
    /// Channel order of the classifier input.
    pub const CHANNELS: [&'static str; 9] = ["aqi", "co", "no", "no2", "o3", "so2", "pm2_5", "pm10", "nh3"];

    /// Build from a channel map; every channel must be present.
    pub fn from_params(params: &IndexMap<String, ChannelRange>) -> AiResult<Self> {
        let mut ranges = [ChannelRange { min: 0.0, max: 1.0, scale: 1.0 }; 9];
        let mut missing = Vec::new();
        for (slot, channel) in ranges.iter_mut().zip(Self::CHANNELS) {
            match params.get(channel) {
                Some(r) if r.scale.is_finite() && r.min.is_finite() => *slot = *r,
                Some(_) => {
                    return Err(AiError::InvalidInput(format!(
                        "scaler parameters for {channel} are not finite"
                    )));
                }
                None => missing.push(channel.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(AiError::MissingFeatures(missing));
        }
        Ok(Self { ranges })
    }

    /// Read `{channel: {min, max, scale}}` from a JSON file.
    pub fn load(path: &Path) -> AiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| AiError::artifact(path, e))?;
        let params: IndexMap<String, ChannelRange> =
            serde_json::from_slice(&bytes).map_err(|e| AiError::artifact(path, e))?;
        Self::from_params(&params)
    }

    pub fn transform(&self, row: &[f64; 9]) -> [f64; 9] {
        let mut out = [0.0; 9];
        for ((o, v), r) in out.iter_mut().zip(row).zip(&self.ranges) {
            *o = v * r.scale - r.min * r.scale;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_scaler_centres_and_scales() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.transform_row(&[3.0, 7.0]).unwrap(), vec![1.0, 2.0]);
        assert!(scaler.transform_row(&[1.0]).is_err());
    }

    #[test]
    fn standard_scaler_uses_population_std() {
        let rows = vec![vec![0.0], vec![0.0], vec![6.0], vec![6.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.scale, vec![3.0]);
    }

    fn params() -> IndexMap<String, ChannelRange> {
        MinMaxScaler::CHANNELS
            .iter()
            .map(|c| {
                (
                    c.to_string(),
                    ChannelRange {
                        min: 2.0,
                        max: 12.0,
                        scale: 0.1,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn min_max_maps_range_to_unit_interval() {
        let scaler = MinMaxScaler::from_params(&params()).unwrap();
        let out = scaler.transform(&[2.0, 12.0, 7.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
        assert!(out[0].abs() < 1e-12);
        assert!((out[1] - 1.0).abs() < 1e-12);
        assert!((out[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn every_channel_is_required() {
        let mut p = params();
        p.shift_remove("nh3");
        assert!(matches!(
            MinMaxScaler::from_params(&p),
            Err(AiError::MissingFeatures(m)) if m == vec!["nh3".to_string()]
        ));
    }

    #[test]
    fn load_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air_quality_scaler_params.json");
        assert!(matches!(MinMaxScaler::load(&path), Err(AiError::Artifact(_))));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(MinMaxScaler::load(&path), Err(AiError::Artifact(_))));

        std::fs::write(&path, serde_json::to_vec(&params()).unwrap()).unwrap();
        assert!(MinMaxScaler::load(&path).is_ok());
    }
}
