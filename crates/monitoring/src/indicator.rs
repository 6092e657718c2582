use serde::{Deserialize, Serialize};

use envwatch_core::{DomainError, ValueObject};

/// Code of a measurable quantity (`"co"`, `"pm2_5"`, `"aqi"`).
///
/// Codes are case-insensitive on input and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndicatorCode(String);

impl IndicatorCode {
    /// Code of the aggregate air-quality index.
    pub const AQI: &'static str = "aqi";

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim().to_ascii_lowercase();
        if code.is_empty() {
            return Err(DomainError::validation("indicator code cannot be empty"));
        }
        if code.len() > 16 {
            return Err(DomainError::validation("indicator code is limited to 16 characters"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::validation(format!(
                "indicator code {code:?} may only contain letters, digits and '_'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_aggregate_index(&self) -> bool {
        self.0 == Self::AQI
    }
}

impl ValueObject for IndicatorCode {}

impl core::fmt::Display for IndicatorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IndicatorCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IndicatorCode> for String {
    fn from(value: IndicatorCode) -> Self {
        value.0
    }
}

/// Reference entity: a named quantity that can carry an alert threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub code: IndicatorCode,
    pub label: String,
    pub description: String,
}

impl Indicator {
    pub fn new(code: IndicatorCode, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code,
            label: label.into(),
            description: description.into(),
        }
    }
}

impl envwatch_core::Entity for Indicator {
    type Id = IndicatorCode;

    fn id(&self) -> &Self::Id {
        &self.code
    }
}

/// Indicators every store is seeded with: the aggregate index plus one per pollutant.
pub fn seed_indicators() -> Vec<Indicator> {
    const SEED: [(&str, &str, &str); 9] = [
        ("aqi", "Air Quality Index", "Aggregate index reported by the pollutant provider (1 = good, 5 = very poor)"),
        ("co", "Carbon monoxide", "CO concentration, μg/m³"),
        ("no", "Nitrogen monoxide", "NO concentration, μg/m³"),
        ("no2", "Nitrogen dioxide", "NO₂ concentration, μg/m³"),
        ("o3", "Ozone", "O₃ concentration, μg/m³"),
        ("so2", "Sulphur dioxide", "SO₂ concentration, μg/m³"),
        ("pm2_5", "Fine particles", "PM2.5 concentration, μg/m³"),
        ("pm10", "Coarse particles", "PM10 concentration, μg/m³"),
        ("nh3", "Ammonia", "NH₃ concentration, μg/m³"),
    ];

    SEED.iter()
        .map(|(code, label, description)| Indicator {
            code: IndicatorCode(code.to_string()),
            label: label.to_string(),
            description: description.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalised_to_lowercase() {
        let code = IndicatorCode::parse("  PM2_5 ").unwrap();
        assert_eq!(code.as_str(), "pm2_5");
    }

    #[test]
    fn empty_and_exotic_codes_are_rejected() {
        assert!(IndicatorCode::parse("   ").is_err());
        assert!(IndicatorCode::parse("co;drop").is_err());
        assert!(IndicatorCode::parse("a_very_long_indicator_code").is_err());
    }

    #[test]
    fn seed_contains_index_and_every_pollutant() {
        let seed = seed_indicators();
        assert_eq!(seed.len(), 9);
        assert!(seed.iter().any(|i| i.code.is_aggregate_index()));
        for p in crate::Pollutant::ALL {
            assert!(seed.iter().any(|i| i.code.as_str() == p.code()), "missing {}", p.code());
        }
    }
}
