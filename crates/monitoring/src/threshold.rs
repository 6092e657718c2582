use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use envwatch_core::{DomainError, DomainResult, Entity, ThresholdId};

use crate::indicator::IndicatorCode;

/// Alert threshold for one indicator.
///
/// Soft-deleted by clearing `active`; never removed while alerts reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub id: ThresholdId,
    pub indicator: IndicatorCode,
    pub threshold_value: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for AlertThreshold {
    type Id = ThresholdId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request to create a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThreshold {
    pub indicator: IndicatorCode,
    pub threshold_value: f64,
}

impl NewThreshold {
    pub fn new(indicator: IndicatorCode, threshold_value: f64) -> DomainResult<Self> {
        if !threshold_value.is_finite() {
            return Err(DomainError::validation("threshold_value must be a finite number"));
        }
        Ok(Self {
            indicator,
            threshold_value,
        })
    }
}

/// In-memory threshold collection enforcing "at most one active threshold per indicator".
///
/// Every mutation goes through `&mut self`, so a caller holding the book behind a
/// single lock gets the deactivate-then-insert step as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct ThresholdBook {
    thresholds: BTreeMap<ThresholdId, AlertThreshold>,
}

impl ThresholdBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new active threshold, deactivating the previous active one(s).
    ///
    /// Returns the created threshold and the ids that were deactivated.
    pub fn create(
        &mut self,
        request: NewThreshold,
        id: ThresholdId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<(AlertThreshold, Vec<ThresholdId>)> {
        if self.thresholds.contains_key(&id) {
            return Err(DomainError::conflict(format!("threshold {id} already exists")));
        }

        let mut deactivated = Vec::new();
        for t in self.thresholds.values_mut() {
            if t.active && t.indicator == request.indicator {
                t.active = false;
                deactivated.push(t.id);
            }
        }

        let threshold = AlertThreshold {
            id,
            indicator: request.indicator,
            threshold_value: request.threshold_value,
            active: true,
            created_at,
        };
        self.thresholds.insert(id, threshold.clone());
        Ok((threshold, deactivated))
    }

    /// Soft delete. Deactivating an inactive threshold is a no-op.
    pub fn deactivate(&mut self, id: ThresholdId) -> DomainResult<AlertThreshold> {
        let t = self.thresholds.get_mut(&id).ok_or_else(DomainError::not_found)?;
        t.active = false;
        Ok(t.clone())
    }

    pub fn get(&self, id: ThresholdId) -> Option<&AlertThreshold> {
        self.thresholds.get(&id)
    }

    /// Active thresholds in creation order.
    pub fn active(&self) -> Vec<AlertThreshold> {
        let mut active: Vec<_> = self.thresholds.values().filter(|t| t.active).cloned().collect();
        active.sort_by_key(|t| (t.created_at, t.id));
        active
    }

    pub fn active_for(&self, indicator: &IndicatorCode) -> Option<&AlertThreshold> {
        self.thresholds
            .values()
            .find(|t| t.active && &t.indicator == indicator)
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
