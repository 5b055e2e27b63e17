//! Availability Assessor: raw record indicators → validated `DataProfile`.

use std::collections::BTreeMap;

use prognyx_common::{AnalysisError, DataProfile, DataQuality, RawAvailability, Result};

/// Normalise raw indicators into a profile.
///
/// Fails with `InvalidProfile` when a quality score is NaN or outside
/// [0, 1], or when a present data type carries no quality score.
/// Absent data types get quality 0.
pub fn assess(raw: &RawAvailability) -> Result<DataProfile> {
    let mut entries = BTreeMap::new();

    for (data_type, indicator) in &raw.indicators {
        if let Some(q) = indicator.quality {
            if !(0.0..=1.0).contains(&q) {
                return Err(AnalysisError::InvalidProfile(format!(
                    "{data_type} quality {q} outside [0, 1]"
                )));
            }
        }

        let entry = if indicator.present {
            let quality = indicator.quality.ok_or_else(|| {
                AnalysisError::InvalidProfile(format!(
                    "{data_type} marked present without a quality score"
                ))
            })?;
            DataQuality { present: true, quality }
        } else {
            DataQuality::ABSENT
        };
        entries.insert(*data_type, entry);
    }

    Ok(DataProfile::new(entries))
}
