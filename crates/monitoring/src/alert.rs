use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use envwatch_core::{AlertId, DomainError, DomainResult, Entity, ThresholdId};

/// Who raised an alert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrigin {
    /// Raised by the threshold evaluator.
    Automatic,
    /// Raised by an operator.
    Manual,
}

impl AlertOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOrigin::Automatic => "automatic",
            AlertOrigin::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(AlertOrigin::Automatic),
            "manual" => Some(AlertOrigin::Manual),
            _ => None,
        }
    }
}

/// Severity class of an alert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// A raised alert. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub created_at: DateTime<Utc>,
    pub threshold_id: Option<ThresholdId>,
    pub value: Option<f64>,
    pub message: String,
    pub severity: Severity,
    pub origin: AlertOrigin,
}

impl Entity for Alert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// An alert that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub threshold_id: Option<ThresholdId>,
    pub value: Option<f64>,
    pub message: String,
    pub severity: Severity,
    pub origin: AlertOrigin,
}

impl NewAlert {
    /// Operator-raised alert.
    pub fn manual(
        threshold_id: Option<ThresholdId>,
        value: Option<f64>,
        message: impl Into<String>,
        severity: Severity,
    ) -> DomainResult<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(DomainError::validation("message cannot be empty"));
        }
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(DomainError::validation("value must be a finite number"));
        }
        Ok(Self {
            threshold_id,
            value,
            message,
            severity,
            origin: AlertOrigin::Manual,
        })
    }

    pub fn into_alert(self, id: AlertId, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id,
            created_at,
            threshold_id: self.threshold_id,
            value: self.value,
            message: self.message,
            severity: self.severity,
            origin: self.origin,
        }
    }
}
