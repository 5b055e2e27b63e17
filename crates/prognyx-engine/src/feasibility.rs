//! Feasibility Resolver.
//!
//! Checks every registered method against a data profile. The report lists
//! all methods (eligible or not) in a fixed order so the same profile and
//! registry always yield the same report.

use std::cmp::Ordering;

use prognyx_common::eligibility::EligibilityEntry;
use prognyx_common::{DataProfile, Eligibility, EligibilityReport, Ineligibility, MethodSpec};

use crate::registry::MethodRegistry;

pub fn resolve(profile: &DataProfile, registry: &MethodRegistry) -> EligibilityReport {
    let mut specs: Vec<&MethodSpec> = registry.iter().collect();
    specs.sort_by(|a, b| report_order(a, b));

    let entries = specs
        .into_iter()
        .map(|spec| EligibilityEntry {
            method_id: spec.id.clone(),
            eligibility: check(profile, spec),
        })
        .collect();

    EligibilityReport { entries }
}

/// Eligibility of a single method.
pub fn check(profile: &DataProfile, spec: &MethodSpec) -> Eligibility {
    let mut reasons = Vec::new();
    for (&data_type, &required) in &spec.requirements {
        let q = profile.get(data_type);
        if !q.present {
            reasons.push(Ineligibility::MissingData { data_type });
        } else if q.quality < required {
            reasons.push(Ineligibility::LowQuality {
                data_type,
                actual: q.quality,
                required,
            });
        }
    }

    if reasons.is_empty() {
        Eligibility::Eligible
    } else {
        Eligibility::Ineligible(reasons)
    }
}

/// Priority ascending, then more required types first, then reliability
/// descending, then id.
fn report_order(a: &MethodSpec, b: &MethodSpec) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.requirements.len().cmp(&a.requirements.len()))
        .then_with(|| b.reliability.total_cmp(&a.reliability))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::assess;
    use prognyx_common::{DataType, RawAvailability};

    fn scenario_registry() -> MethodRegistry {
        MethodRegistry::new(vec![
            MethodSpec::new("grn_network")
                .requires(DataType::Expression, 0.8)
                .with_priority(20),
            MethodSpec::new("expression_signature")
                .requires(DataType::Expression, 0.0)
                .with_priority(30),
            MethodSpec::new("prs")
                .requires(DataType::Genomic, 0.0)
                .with_priority(10),
            MethodSpec::new("clinical_risk")
                .requires(DataType::Clinical, 0.5)
                .with_priority(40),
        ])
        .unwrap()
    }

    fn scenario_profile() -> DataProfile {
        assess(
            &RawAvailability::new()
                .present(DataType::Genomic, 0.9)
                .present(DataType::Expression, 0.5)
                .absent(DataType::Clinical),
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_eligibility() {
        let report = resolve(&scenario_profile(), &scenario_registry());

        assert_eq!(report.eligible_ids(), vec!["prs", "expression_signature"]);
        assert_eq!(
            report.get("grn_network"),
            Some(&Eligibility::Ineligible(vec![Ineligibility::LowQuality {
                data_type: DataType::Expression,
                actual: 0.5,
                required: 0.8,
            }]))
        );
        assert_eq!(
            report.get("clinical_risk"),
            Some(&Eligibility::Ineligible(vec![Ineligibility::MissingData {
                data_type: DataType::Clinical,
            }]))
        );
    }

    #[test]
    fn test_report_is_deterministic() {
        let profile = scenario_profile();
        let registry = scenario_registry();
        let first = resolve(&profile, &registry);
        for _ in 0..10 {
            assert_eq!(resolve(&profile, &registry), first);
        }
    }

    #[test]
    fn test_stricter_method_ordered_first_on_priority_tie() {
        let registry = MethodRegistry::new(vec![
            MethodSpec::new("broad").requires(DataType::Genomic, 0.0).with_priority(1),
            MethodSpec::new("strict")
                .requires(DataType::Genomic, 0.0)
                .requires(DataType::Expression, 0.0)
                .with_priority(1),
            MethodSpec::new("late").with_priority(5),
        ])
        .unwrap();
        let report = resolve(&DataProfile::new(Default::default()), &registry);
        let order: Vec<&str> = report.entries.iter().map(|e| e.method_id.as_str()).collect();
        assert_eq!(order, vec!["strict", "broad", "late"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let spec = MethodSpec::new("x").requires(DataType::Expression, 0.5);
        let profile = assess(&RawAvailability::new().present(DataType::Expression, 0.5)).unwrap();
        assert!(check(&profile, &spec).is_eligible());
    }

    #[test]
    fn test_no_requirements_always_eligible() {
        let spec = MethodSpec::new("prior_only");
        assert!(check(&DataProfile::new(Default::default()), &spec).is_eligible());
    }
}
