//! Critical-plot ranking.
//!
//! Scores each plot on four additive dimensions and keeps the most urgent:
//! - Vegetation (+40): latest reading below 0.4
//! - Neglect (+30): no operation for more than 30 days
//! - Weather (+20): latest weather record is risky
//! - Size (+10): large plot that already scores above 20

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::{parse_date, DbPlot, FarmDb};

const PLOT_LIMIT: usize = 50;
const TOP_N: usize = 3;
const MIN_SCORE: u32 = 20;

const LOW_VEGETATION: f64 = 0.4;
const LOW_VEGETATION_POINTS: u32 = 40;
const STALE_OPERATION_DAYS: i64 = 30;
const NO_OPERATION_DAYS: i64 = 999;
const STALE_OPERATION_POINTS: u32 = 30;
const WEATHER_POINTS: u32 = 20;
const LARGE_AREA_HA: f64 = 2.0;
const LARGE_AREA_POINTS: u32 = 10;

// Single-record weather risk, in tenths.
const HIGH_WIND_KMH: f64 = 40.0;
const LIKELY_RAIN_PERCENT: f64 = 70.0;
const WIND_RISK: u32 = 5;
const RAIN_RISK: u32 = 3;
const MAX_RISK: u32 = 10;
const RISK_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotUrgencyScore {
    pub plot_id: String,
    pub name: String,
    /// Hectares.
    pub area: f64,
    pub primary_crop: String,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// The organization's most urgent plots, at most three, highest score first.
pub fn top_critical_plots(
    db: &FarmDb,
    organization_id: &str,
    today: NaiveDate,
) -> Vec<PlotUrgencyScore> {
    let plots = match db.get_plots_for_organization(organization_id, Some(PLOT_LIMIT)) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Critical plots: failed to load plots for {}: {}", organization_id, e);
            return Vec::new();
        }
    };

    let mut scored: Vec<PlotUrgencyScore> = plots
        .iter()
        .map(|plot| score_plot(db, plot, today))
        .filter(|s| s.score > MIN_SCORE)
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(TOP_N);
    scored
}

fn score_plot(db: &FarmDb, plot: &DbPlot, today: NaiveDate) -> PlotUrgencyScore {
    let mut score = 0;
    let mut reasons = Vec::new();

    let latest_vegetation = db
        .get_vegetation_readings(&plot.id, Some(1))
        .map_err(|e| log::warn!("Critical plots: vegetation for {}: {}", plot.id, e))
        .ok()
        .and_then(|readings| readings.into_iter().next());
    if let Some(reading) = latest_vegetation {
        if reading.value < LOW_VEGETATION {
            score += LOW_VEGETATION_POINTS;
            reasons.push(format!("low vegetation index ({:.2})", reading.value));
        }
    }

    let days_since_operation = match db.get_last_operation_date(&plot.id) {
        Ok(last) => last
            .as_deref()
            .and_then(parse_date)
            .map(|d| (today - d).num_days())
            .unwrap_or(NO_OPERATION_DAYS),
        Err(e) => {
            log::warn!("Critical plots: last operation for {}: {}", plot.id, e);
            NO_OPERATION_DAYS
        }
    };
    if days_since_operation > STALE_OPERATION_DAYS {
        score += STALE_OPERATION_POINTS;
        reasons.push(format!("no operations in {} days", days_since_operation));
    }

    let latest_weather = db
        .get_weather_for_plot(&plot.id, Some(1))
        .map_err(|e| log::warn!("Critical plots: weather for {}: {}", plot.id, e))
        .ok()
        .and_then(|records| records.into_iter().next());
    if let Some(record) = latest_weather {
        let mut risk = 0;
        if record.wind_speed.is_some_and(|w| w > HIGH_WIND_KMH) {
            risk += WIND_RISK;
        }
        if record.precipitation_probability.is_some_and(|p| p > LIKELY_RAIN_PERCENT) {
            risk += RAIN_RISK;
        }
        let risk = risk.min(MAX_RISK);
        if risk > RISK_THRESHOLD {
            score += WEATHER_POINTS;
            reasons.push(format!("weather risk ({:.1})", f64::from(risk) / 10.0));
        }
    }

    if plot.area > LARGE_AREA_HA && score > MIN_SCORE {
        score += LARGE_AREA_POINTS;
        reasons.push(format!("large area ({:.1} ha)", plot.area));
    }

    let primary_crop = match db.get_active_crop(&plot.id) {
        Ok(Some(crop)) => crop.name,
        Ok(None) => "none".to_string(),
        Err(e) => {
            log::warn!("Critical plots: crop for {}: {}", plot.id, e);
            "none".to_string()
        }
    };

    PlotUrgencyScore {
        plot_id: plot.id.clone(),
        name: plot.name.clone(),
        area: plot.area,
        primary_crop,
        score,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[test]
    fn test_never_operated_plot_scores_thirty() {
        let db = test_db();
        seed_org(&db);
        // Too small for the area bonus.
        insert_plot(&db, "p1", "Talhao A", 1.0, None);
        let ranked = top_critical_plots(&db, "org1", today());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 30);
        assert_eq!(ranked[0].reasons, vec!["no operations in 999 days"]);
        assert_eq!(ranked[0].primary_crop, "none");
    }

    #[test]
    fn test_recently_worked_plot_is_excluded() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p1", "Talhao A", 5.0, None);
        insert_operation(&db, "p1", "planting", "2026-10-10");
        // Weather risk alone scores 20, which is not above 20.
        insert_weather(&db, "p1", "2026-10-17", "forecast", None, Some(80.0), Some(45.0), None);
        assert!(top_critical_plots(&db, "org1", today()).is_empty());
    }

    #[test]
    fn test_full_score_with_area_bonus() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p1", "Talhao A", 12.5, None);
        insert_crop(&db, "p1", "soja");
        insert_ndvi(&db, "p1", 0.32, "2026-10-15");
        insert_operation(&db, "p1", "planting", "2026-09-01");
        insert_weather(&db, "p1", "2026-10-17", "forecast", None, Some(80.0), Some(45.0), None);

        let ranked = top_critical_plots(&db, "org1", today());
        assert_eq!(ranked[0].score, 100);
        assert_eq!(ranked[0].primary_crop, "soja");
        assert_eq!(
            ranked[0].reasons,
            vec![
                "low vegetation index (0.32)",
                "no operations in 47 days",
                "weather risk (0.8)",
                "large area (12.5 ha)",
            ]
        );
    }

    #[test]
    fn test_only_top_three_sorted() {
        let db = test_db();
        seed_org(&db);
        for (id, area, ndvi) in [
            ("a", 1.0, None),
            ("b", 5.0, Some(0.2)),
            ("c", 1.0, Some(0.1)),
            ("d", 5.0, None),
            ("e", 1.0, Some(0.9)),
        ] {
            insert_plot(&db, id, &format!("Plot {}", id), area, None);
            if let Some(v) = ndvi {
                insert_ndvi(&db, id, v, "2026-10-10");
            }
        }

        let ranked = top_critical_plots(&db, "org1", today());
        let ids: Vec<(&str, u32)> = ranked.iter().map(|p| (p.plot_id.as_str(), p.score)).collect();
        assert_eq!(ids, vec![("b", 80), ("c", 70), ("d", 40)]);
    }
}
