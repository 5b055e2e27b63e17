//! Feasibility report types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::profile::DataType;

/// Why a method cannot run for a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligibility {
    MissingData { data_type: DataType },
    LowQuality { data_type: DataType, actual: f64, required: f64 },
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::MissingData { data_type } => write!(f, "{data_type} data absent"),
            Ineligibility::LowQuality { data_type, actual, required } => {
                write!(f, "{data_type} quality {actual} < {required}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    Ineligible(Vec<Ineligibility>),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityEntry {
    pub method_id: String,
    pub eligibility: Eligibility,
}

/// Ordered per-method eligibility for one data profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub entries: Vec<EligibilityEntry>,
}

impl EligibilityReport {
    pub fn get(&self, method_id: &str) -> Option<&Eligibility> {
        self.entries
            .iter()
            .find(|e| e.method_id == method_id)
            .map(|e| &e.eligibility)
    }

    pub fn is_eligible(&self, method_id: &str) -> bool {
        self.get(method_id).is_some_and(Eligibility::is_eligible)
    }

    /// Eligible method ids in report order.
    pub fn eligible_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.eligibility.is_eligible())
            .map(|e| e.method_id.as_str())
            .collect()
    }

    pub fn ineligible(&self) -> impl Iterator<Item = (&str, &[Ineligibility])> {
        self.entries.iter().filter_map(|e| match &e.eligibility {
            Eligibility::Eligible => None,
            Eligibility::Ineligible(reasons) => Some((e.method_id.as_str(), reasons.as_slice())),
        })
    }

    /// One-line description of every ineligible method, for error messages.
    pub fn ineligible_summary(&self) -> String {
        let parts: Vec<String> = self
            .ineligible()
            .map(|(id, reasons)| {
                let reasons: Vec<String> = reasons.iter().map(ToString::to_string).collect();
                format!("{id}: {}", reasons.join(", "))
            })
            .collect();
        if parts.is_empty() {
            "no methods registered".to_string()
        } else {
            parts.join("; ")
        }
    }
}
