use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::LineItem;

pub const ELITE_ENGLISH: &str = "菁英美語 (限大班)";
pub const ELITE_ENGLISH_MATERIALS_FEE: &str = "菁英美語教材費";
pub const ELITE_ENGLISH_MATERIALS_FEE_PRICE: &str = "1500";

/// Selecting `trigger` obliges the registration to also carry `dependent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentItemRule {
    pub trigger: String,
    pub dependent: LineItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependentItemPolicy {
    rules: Vec<DependentItemRule>,
}

impl Default for DependentItemPolicy {
    fn default() -> Self {
        Self::new(vec![DependentItemRule {
            trigger: ELITE_ENGLISH.to_string(),
            dependent: LineItem::new(
                ELITE_ENGLISH_MATERIALS_FEE,
                ELITE_ENGLISH_MATERIALS_FEE_PRICE,
            ),
        }])
    }
}

impl DependentItemPolicy {
    pub fn new(rules: Vec<DependentItemRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DependentItemRule] {
        &self.rules
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to read dependent item table {}: {}",
                path.display(),
                e
            ))
        })?;

        let policy: Self = serde_json::from_str(&raw).map_err(|e| {
            AppError::Internal(format!(
                "Invalid dependent item table {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(
            path = %path.display(),
            rules = policy.rules.len(),
            "Loaded dependent item table"
        );
        Ok(policy)
    }

    /// Appends every dependent item whose trigger was selected and which the
    /// client did not already include.
    pub fn apply(&self, courses: &mut Vec<LineItem>) {
        for rule in &self.rules {
            let triggered = courses.iter().any(|c| c.name == rule.trigger);
            let present = courses.iter().any(|c| c.name == rule.dependent.name);

            if triggered && !present {
                debug!(
                    trigger = %rule.trigger,
                    dependent = %rule.dependent.name,
                    "Adding dependent course"
                );
                courses.push(rule.dependent.clone());
            }
        }
    }
}
