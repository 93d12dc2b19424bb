//! Insight feed assembly.
//!
//! Loads detector input from the store, runs the three detectors in a fixed
//! order and merges their output into a bounded, priority-sorted feed. A
//! failed load is logged and gives its detector empty input.

use chrono::NaiveDate;

use crate::db::{DbError, DbPlot, FarmDb};

use super::detectors::{
    detect_operational_delay, detect_vegetation_decline, detect_weather_risk, PlotVegetationSeries,
    PlotWeatherWindow,
};
use super::Insight;

/// Plots examined per detector.
const PLOT_LIMIT: usize = 20;
const VEGETATION_READINGS: usize = 2;
const WEATHER_RECORDS: usize = 3;
/// Feed length.
pub const MAX_INSIGHTS: usize = 10;

/// Context passed to the insight engine.
#[derive(Debug, Clone, Copy)]
pub struct InsightContext {
    pub today: NaiveDate,
}

pub fn generate_insights(db: &FarmDb, organization_id: &str, ctx: &InsightContext) -> Vec<Insight> {
    let plots = unwrap_or_log(
        "plots",
        organization_id,
        db.get_plots_for_organization(organization_id, Some(PLOT_LIMIT)),
    );

    let vegetation = load_vegetation_series(db, &plots);
    let weather = load_weather_windows(db, &plots);
    let tasks = unwrap_or_log(
        "tasks",
        organization_id,
        db.get_tasks_for_organization(organization_id),
    );

    let merged = merge_insights(vec![
        detect_vegetation_decline(&vegetation),
        detect_weather_risk(&weather),
        detect_operational_delay(&tasks, ctx.today),
    ]);
    log::debug!(
        "Insights for {}: {} from {} plots",
        organization_id,
        merged.len(),
        plots.len()
    );
    merged
}

/// Concatenate detector outputs in order, stable-sort by priority
/// descending and keep the top `MAX_INSIGHTS`.
pub fn merge_insights(groups: Vec<Vec<Insight>>) -> Vec<Insight> {
    let mut all: Vec<Insight> = groups.into_iter().flatten().collect();
    all.sort_by(|a, b| b.priority.cmp(&a.priority));
    all.truncate(MAX_INSIGHTS);
    all
}

fn unwrap_or_log<T>(what: &str, organization_id: &str, result: Result<Vec<T>, DbError>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        log::warn!("Insights: failed to load {} for {}: {}", what, organization_id, e);
        Vec::new()
    })
}

fn load_vegetation_series(db: &FarmDb, plots: &[DbPlot]) -> Vec<PlotVegetationSeries> {
    plots
        .iter()
        .filter_map(|plot| match db.get_vegetation_readings(&plot.id, Some(VEGETATION_READINGS)) {
            Ok(readings) => Some(PlotVegetationSeries {
                plot_id: plot.id.clone(),
                plot_name: plot.name.clone(),
                readings,
            }),
            Err(e) => {
                log::warn!("Insights: vegetation readings for plot {}: {}", plot.id, e);
                None
            }
        })
        .collect()
}

fn load_weather_windows(db: &FarmDb, plots: &[DbPlot]) -> Vec<PlotWeatherWindow> {
    plots
        .iter()
        .filter_map(|plot| match db.get_weather_for_plot(&plot.id, Some(WEATHER_RECORDS)) {
            Ok(records) => Some(PlotWeatherWindow {
                plot_id: plot.id.clone(),
                plot_name: plot.name.clone(),
                records,
            }),
            Err(e) => {
                log::warn!("Insights: weather for plot {}: {}", plot.id, e);
                None
            }
        })
        .collect()
}
