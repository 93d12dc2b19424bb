//! Answer confidence from snapshot completeness.
//!
//! Weights are kept in hundredths so sums are exact; the result is
//! converted to `0.0..=1.0` once at the end.

use super::context::{OrganizationSnapshot, SourceList};

const BASE: i64 = 40;
const ORGANIZATION: i64 = 10;
const PLOT_DETAIL: i64 = 15;
const PLOT_SUBLIST: i64 = 5;
const SECTION: i64 = 5;
const PER_SOURCE: i64 = 3;
const SOURCE_BONUS_CAP: i64 = 15;

pub fn estimate_confidence(snapshot: &OrganizationSnapshot, sources: &SourceList) -> f64 {
    let mut score = BASE;

    if snapshot.organization.is_some() {
        score += ORGANIZATION;
    }

    if let Some(detail) = &snapshot.plot_detail {
        score += PLOT_DETAIL;
        for non_empty in [
            !detail.operations.is_empty(),
            !detail.vegetation.is_empty(),
            !detail.weather.is_empty(),
        ] {
            if non_empty {
                score += PLOT_SUBLIST;
            }
        }
    }

    let sections = [
        snapshot.inputs.is_some(),
        !snapshot.calendar.is_empty(),
        snapshot.tasks.is_some(),
        !snapshot.recent_operations.is_empty(),
        snapshot.vegetation_stats.is_some(),
        snapshot.forecast.is_some(),
        snapshot.recent_weather.is_some(),
    ];
    score += SECTION * sections.iter().filter(|present| **present).count() as i64;

    score += (sources.len() as i64 * PER_SOURCE).min(SOURCE_BONUS_CAP);

    score.clamp(0, 100) as f64 / 100.0
}

/// Human-readable tier for a confidence value.
pub fn confidence_tier(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.6 {
        "medium"
    } else {
        "low"
    }
}
