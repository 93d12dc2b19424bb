//! Anomaly detectors for the insight feed.
//!
//! Each detector is a pure function over already-loaded rows and returns
//! zero or more `Insight` values. Loading lives in `engine`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde_json::json;

use crate::db::{DbTask, DbVegetationReading, DbWeatherRecord};

use super::{Insight, InsightKind};

/// Latest vegetation readings for one plot, newest first.
#[derive(Debug, Clone)]
pub struct PlotVegetationSeries {
    pub plot_id: String,
    pub plot_name: String,
    pub readings: Vec<DbVegetationReading>,
}

/// Latest weather rows for one plot, newest first.
#[derive(Debug, Clone)]
pub struct PlotWeatherWindow {
    pub plot_id: String,
    pub plot_name: String,
    pub records: Vec<DbWeatherRecord>,
}

// ---------------------------------------------------------------------------
// Detector 1: Vegetation decline
// ---------------------------------------------------------------------------

const DECLINE_THRESHOLD: f64 = 0.15;
const SEVERE_DECLINE_THRESHOLD: f64 = 0.25;

const DECLINE_ACTIONS: &[&str] = &[
    "Schedule a visual inspection of the plot",
    "Check for pest and disease pressure",
    "Collect soil and foliar samples for analysis",
];

/// Relative drop between the two most recent readings, rounded to six
/// decimals. `None` when there are fewer than two readings or the older
/// value is not positive.
pub fn vegetation_drop(series: &PlotVegetationSeries) -> Option<(f64, f64, f64)> {
    let newer = series.readings.first()?.value;
    let older = series.readings.get(1)?.value;
    if older <= 0.0 {
        return None;
    }
    let drop = ((older - newer) / older * 1e6).round() / 1e6;
    Some((older, newer, drop))
}

/// Plot whose vegetation index fell more than 15% between its two latest readings.
pub fn detect_vegetation_decline(series: &[PlotVegetationSeries]) -> Vec<Insight> {
    let mut insights = Vec::new();
    for plot in series {
        let Some((previous, current, drop)) = vegetation_drop(plot) else {
            continue;
        };
        if drop <= DECLINE_THRESHOLD {
            continue;
        }

        let priority = if drop > SEVERE_DECLINE_THRESHOLD { 5 } else { 3 };
        let drop_percent = (drop * 1000.0).round() / 10.0;

        let mut evidence = BTreeMap::new();
        evidence.insert("previousValue".to_string(), json!(previous));
        evidence.insert("currentValue".to_string(), json!(current));
        evidence.insert("dropPercent".to_string(), json!(drop_percent));

        insights.push(Insight {
            kind: InsightKind::Warning,
            title: format!("Vegetation index drop on {}", plot.plot_name),
            description: format!(
                "The vegetation index on {} fell {:.1}% ({:.2} → {:.2}).",
                plot.plot_name, drop_percent, previous, current
            ),
            affected_plot_ids: BTreeSet::from([plot.plot_id.clone()]),
            priority,
            actions: DECLINE_ACTIONS.iter().map(|a| a.to_string()).collect(),
            explanation: format!(
                "Drops above {:.0}% between consecutive readings usually point to crop stress.",
                DECLINE_THRESHOLD * 100.0
            ),
            evidence,
        });
    }
    insights
}

// ---------------------------------------------------------------------------
// Detector 2: Weather risk
// ---------------------------------------------------------------------------

// Risk weights in tenths.
const WIND_WEIGHT: u32 = 4;
const RAIN_WEIGHT: u32 = 3;
const RAIN_PROBABILITY_WEIGHT: u32 = 2;
const ALERT_THRESHOLD: u32 = 6;

const HIGH_WIND_KMH: f64 = 40.0;
const HEAVY_RAIN_MM: f64 = 30.0;
const LIKELY_RAIN_PERCENT: f64 = 70.0;

/// Plot whose recent weather combines enough wind, rain and rain probability.
pub fn detect_weather_risk(windows: &[PlotWeatherWindow]) -> Vec<Insight> {
    let mut insights = Vec::new();
    for plot in windows {
        if plot.records.is_empty() {
            continue;
        }

        let max_wind = plot
            .records
            .iter()
            .filter_map(|r| r.wind_speed)
            .fold(0.0_f64, f64::max);
        let total_rain: f64 = plot.records.iter().filter_map(|r| r.precipitation).sum();
        let rain_probability = plot.records[0].precipitation_probability.unwrap_or(0.0);

        let mut score = 0;
        let mut issues = Vec::new();
        let mut actions = Vec::new();
        if max_wind > HIGH_WIND_KMH {
            score += WIND_WEIGHT;
            issues.push(format!("strong winds up to {:.0} km/h", max_wind));
            actions.push("Postpone spraying until the wind drops".to_string());
        }
        if total_rain > HEAVY_RAIN_MM {
            score += RAIN_WEIGHT;
            issues.push(format!("{:.1} mm of accumulated rain", total_rain));
            actions.push("Check drainage and keep machinery off saturated soil".to_string());
        }
        if rain_probability > LIKELY_RAIN_PERCENT {
            score += RAIN_PROBABILITY_WEIGHT;
            issues.push(format!("{:.0}% chance of rain", rain_probability));
            actions.push("Bring field operations forward or reschedule them".to_string());
        }
        if score <= ALERT_THRESHOLD {
            continue;
        }

        let mut evidence = BTreeMap::new();
        evidence.insert("maxWindSpeed".to_string(), json!(max_wind));
        evidence.insert("totalPrecipitation".to_string(), json!(total_rain));
        evidence.insert("rainProbability".to_string(), json!(rain_probability));
        evidence.insert("riskScore".to_string(), json!(f64::from(score) / 10.0));

        insights.push(Insight {
            kind: InsightKind::Alert,
            title: format!("Weather risk on {}", plot.plot_name),
            description: format!("{}: {}.", plot.plot_name, issues.join(", ")),
            affected_plot_ids: BTreeSet::from([plot.plot_id.clone()]),
            priority: 4,
            actions,
            explanation: format!(
                "Combined weather risk {:.1} across the last {} records exceeds {:.1}.",
                f64::from(score) / 10.0,
                plot.records.len(),
                f64::from(ALERT_THRESHOLD) / 10.0
            ),
            evidence,
        });
    }
    insights
}

// ---------------------------------------------------------------------------
// Detector 3: Operational delay
// ---------------------------------------------------------------------------

/// Organization tasks past their planned end and not completed.
pub fn detect_operational_delay(tasks: &[DbTask], today: NaiveDate) -> Vec<Insight> {
    let overdue: Vec<&DbTask> = tasks.iter().filter(|t| t.is_overdue(today)).collect();
    if overdue.is_empty() {
        return Vec::new();
    }

    let titles: Vec<&str> = overdue.iter().map(|t| t.title.as_str()).collect();
    let mut evidence = BTreeMap::new();
    evidence.insert("overdueCount".to_string(), json!(overdue.len()));
    evidence.insert("taskTitles".to_string(), json!(titles));

    vec![Insight {
        kind: InsightKind::Warning,
        title: format!("{} overdue task(s)", overdue.len()),
        description: format!("Tasks past their planned end: {}.", titles.join(", ")),
        affected_plot_ids: overdue.iter().filter_map(|t| t.plot_id.clone()).collect(),
        priority: 3,
        actions: vec!["Review overdue tasks and reschedule or reassign them".to_string()],
        explanation: "Tasks that are not completed after their planned end date delay the crop calendar."
            .to_string(),
        evidence,
    }]
}
