//! Organization snapshot assembly for the assistant prompt.
//!
//! `build_context` runs one pull per snapshot section. Every pull is guarded
//! on its own: a storage error is logged and the section stays empty while
//! the remaining pulls still run. A section's label lands in the
//! `SourceList` only when the section ended up non-empty.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::db::{
    format_date, DbCalendarRule, DbCrop, DbCycle, DbError, DbInput, DbOperation, DbOrganization,
    DbPlot, DbPlotImage, DbProperty, DbTask, DbVegetationReading, DbWeatherRecord, FarmDb,
};

pub const SOURCE_ORGANIZATION: &str = "organization data";
pub const SOURCE_PLOT_DETAIL: &str = "plot detail";
pub const SOURCE_RECENT_OPERATIONS: &str = "recent operations (30 days)";
pub const SOURCE_TASKS: &str = "tasks";
pub const SOURCE_INPUTS: &str = "input inventory";
pub const SOURCE_CALENDAR: &str = "agricultural calendar";
pub const SOURCE_FORECAST: &str = "weather forecast";
pub const SOURCE_RECENT_WEATHER: &str = "recent weather (7 days)";
pub const SOURCE_VEGETATION: &str = "vegetation index statistics";

const RECENT_OPERATION_DAYS: i64 = 30;
const RECENT_WEATHER_DAYS: i64 = 7;
const PLOT_OPERATION_LIMIT: usize = 10;
const PLOT_IMAGE_LIMIT: usize = 10;
const PLOT_WEATHER_LIMIT: usize = 7;
const PLOT_VEGETATION_LIMIT: usize = 10;
const NEXT_FORECAST_DAYS: usize = 7;

// =============================================================================
// Source list
// =============================================================================

/// Labels of the populated snapshot sections, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceList(Vec<String>);

impl SourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label unless already present.
    pub fn push(&mut self, label: &str) {
        if !self.contains(label) {
            self.0.push(label.to_string());
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

// =============================================================================
// Snapshot
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSnapshot {
    pub organization: Option<OrganizationSection>,
    pub plot_detail: Option<PlotDetail>,
    pub recent_operations: Vec<DbOperation>,
    pub tasks: Option<TaskBacklog>,
    pub inputs: Option<InputInventory>,
    pub calendar: Vec<DbCalendarRule>,
    pub forecast: Option<ForecastSection>,
    pub recent_weather: Option<WeatherAggregates>,
    pub vegetation_stats: Option<VegetationStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSection {
    #[serde(flatten)]
    pub organization: DbOrganization,
    pub properties: Vec<PropertyNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyNode {
    #[serde(flatten)]
    pub property: DbProperty,
    pub plots: Vec<PlotNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotNode {
    #[serde(flatten)]
    pub plot: DbPlot,
    pub active_crop: Option<DbCrop>,
    pub active_cycle: Option<DbCycle>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotDetail {
    pub plot: DbPlot,
    pub property: Option<DbProperty>,
    pub crop: Option<DbCrop>,
    pub cycles: Vec<DbCycle>,
    pub operations: Vec<DbOperation>,
    pub images: Vec<DbPlotImage>,
    pub weather: Vec<DbWeatherRecord>,
    pub vegetation: Vec<DbVegetationReading>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBacklog {
    pub total: usize,
    pub pending: Vec<DbTask>,
    pub in_progress: Vec<DbTask>,
    pub overdue: Vec<DbTask>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInventory {
    pub items: Vec<DbInput>,
    pub low_stock: Vec<DbInput>,
    pub expired: Vec<DbInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotForecast {
    pub plot_name: String,
    pub days: Vec<DbWeatherRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastSection {
    pub by_plot: Vec<PlotForecast>,
    /// First plot group's upcoming days.
    pub next_days: Vec<DbWeatherRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherAggregates {
    pub from: String,
    pub to: String,
    pub record_count: usize,
    pub mean_temperature: Option<f64>,
    /// Millimetres.
    pub total_precipitation: f64,
    /// km/h.
    pub max_wind_speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VegetationStats {
    pub mean: f64,
    pub reading_count: usize,
    pub interpretation: VegetationHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VegetationHealth {
    Excellent,
    Good,
    Moderate,
    Low,
}

impl VegetationHealth {
    pub fn from_mean(mean: f64) -> Self {
        if mean > 0.7 {
            VegetationHealth::Excellent
        } else if mean > 0.5 {
            VegetationHealth::Good
        } else if mean > 0.3 {
            VegetationHealth::Moderate
        } else {
            VegetationHealth::Low
        }
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Assemble the organization snapshot. Never fails.
pub fn build_context(
    db: &FarmDb,
    organization_id: &str,
    plot_id: Option<&str>,
    today: NaiveDate,
) -> (OrganizationSnapshot, SourceList) {
    let mut snapshot = OrganizationSnapshot::default();
    let mut sources = SourceList::new();

    let section = load_organization(db, organization_id);
    if let Some(section) = guarded(SOURCE_ORGANIZATION, organization_id, section) {
        snapshot.organization = Some(section);
        sources.push(SOURCE_ORGANIZATION);
    }

    if let Some(plot_id) = plot_id {
        let detail = load_plot_detail(db, organization_id, plot_id);
        if let Some(detail) = guarded(SOURCE_PLOT_DETAIL, organization_id, detail) {
            snapshot.plot_detail = Some(detail);
            sources.push(SOURCE_PLOT_DETAIL);
        }
    }

    let since = format_date(today - Duration::days(RECENT_OPERATION_DAYS));
    let ops = non_empty(db.get_recent_operations(organization_id, &since));
    if let Some(ops) = guarded(SOURCE_RECENT_OPERATIONS, organization_id, ops) {
        snapshot.recent_operations = ops;
        sources.push(SOURCE_RECENT_OPERATIONS);
    }

    let tasks = load_tasks(db, organization_id, today);
    if let Some(tasks) = guarded(SOURCE_TASKS, organization_id, tasks) {
        snapshot.tasks = Some(tasks);
        sources.push(SOURCE_TASKS);
    }

    let inputs = load_inputs(db, organization_id, today);
    if let Some(inputs) = guarded(SOURCE_INPUTS, organization_id, inputs) {
        snapshot.inputs = Some(inputs);
        sources.push(SOURCE_INPUTS);
    }

    let rules = load_calendar(db, today.month());
    if let Some(rules) = guarded(SOURCE_CALENDAR, organization_id, rules) {
        snapshot.calendar = rules;
        sources.push(SOURCE_CALENDAR);
    }

    let forecast = load_forecast(db, organization_id, today);
    if let Some(forecast) = guarded(SOURCE_FORECAST, organization_id, forecast) {
        snapshot.forecast = Some(forecast);
        sources.push(SOURCE_FORECAST);
    }

    let aggregates = load_recent_weather(db, organization_id, today);
    if let Some(aggregates) = guarded(SOURCE_RECENT_WEATHER, organization_id, aggregates) {
        snapshot.recent_weather = Some(aggregates);
        sources.push(SOURCE_RECENT_WEATHER);
    }

    let stats = load_vegetation_stats(db, organization_id);
    if let Some(stats) = guarded(SOURCE_VEGETATION, organization_id, stats) {
        snapshot.vegetation_stats = Some(stats);
        sources.push(SOURCE_VEGETATION);
    }

    log::debug!(
        "Assistant context for {}: {} sources ({})",
        organization_id,
        sources.len(),
        sources.iter().collect::<Vec<_>>().join(", ")
    );
    (snapshot, sources)
}

/// Log a failed pull and treat it as empty.
fn guarded<T>(label: &str, organization_id: &str, result: Result<Option<T>, DbError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::warn!(
                "Assistant context: '{}' skipped for organization {}: {}",
                label,
                organization_id,
                e
            );
            None
        }
    }
}

fn non_empty<T>(result: Result<Vec<T>, DbError>) -> Result<Option<Vec<T>>, DbError> {
    result.map(|items| if items.is_empty() { None } else { Some(items) })
}

fn load_organization(
    db: &FarmDb,
    organization_id: &str,
) -> Result<Option<OrganizationSection>, DbError> {
    let Some(organization) = db.get_organization(organization_id)? else {
        return Ok(None);
    };

    let mut properties = Vec::new();
    for property in db.get_properties_for_organization(organization_id)? {
        let mut plots = Vec::new();
        for plot in db.get_plots_for_property(&property.id)? {
            plots.push(PlotNode {
                active_crop: db.get_active_crop(&plot.id)?,
                active_cycle: db.get_active_cycle(&plot.id)?,
                plot,
            });
        }
        properties.push(PropertyNode { property, plots });
    }

    Ok(Some(OrganizationSection {
        organization,
        properties,
    }))
}

fn load_plot_detail(
    db: &FarmDb,
    organization_id: &str,
    plot_id: &str,
) -> Result<Option<PlotDetail>, DbError> {
    let Some(plot) = db.get_plot_in_organization(organization_id, plot_id)? else {
        log::debug!(
            "Assistant context: plot {} not found in organization {}",
            plot_id,
            organization_id
        );
        return Ok(None);
    };

    Ok(Some(PlotDetail {
        property: db.get_property(&plot.property_id)?,
        crop: db.get_active_crop(&plot.id)?,
        cycles: db.get_cycles_for_plot(&plot.id, None)?,
        operations: db.get_operations_for_plot(&plot.id, Some(PLOT_OPERATION_LIMIT))?,
        images: db.get_plot_images(&plot.id, Some(PLOT_IMAGE_LIMIT))?,
        weather: db.get_weather_for_plot(&plot.id, Some(PLOT_WEATHER_LIMIT))?,
        vegetation: db.get_vegetation_readings(&plot.id, Some(PLOT_VEGETATION_LIMIT))?,
        plot,
    }))
}

fn load_tasks(
    db: &FarmDb,
    organization_id: &str,
    today: NaiveDate,
) -> Result<Option<TaskBacklog>, DbError> {
    let tasks = db.get_tasks_for_organization(organization_id)?;
    if tasks.is_empty() {
        return Ok(None);
    }

    let mut backlog = TaskBacklog {
        total: tasks.len(),
        ..Default::default()
    };
    for task in tasks {
        if task.is_overdue(today) {
            backlog.overdue.push(task.clone());
        }
        match task.status.as_str() {
            "pending" => backlog.pending.push(task),
            "in_progress" => backlog.in_progress.push(task),
            _ => {}
        }
    }
    Ok(Some(backlog))
}

fn load_inputs(
    db: &FarmDb,
    organization_id: &str,
    today: NaiveDate,
) -> Result<Option<InputInventory>, DbError> {
    let items = db.get_inputs_for_organization(organization_id)?;
    if items.is_empty() {
        return Ok(None);
    }
    let low_stock = items.iter().filter(|i| i.is_low_stock()).cloned().collect();
    let expired = items.iter().filter(|i| i.is_expired(today)).cloned().collect();
    Ok(Some(InputInventory {
        items,
        low_stock,
        expired,
    }))
}

fn load_calendar(db: &FarmDb, month: u32) -> Result<Option<Vec<DbCalendarRule>>, DbError> {
    let active = db
        .get_calendar_rules()?
        .into_iter()
        .filter(|rule| rule.is_active_in(month))
        .collect();
    non_empty(Ok(active))
}

fn load_forecast(
    db: &FarmDb,
    organization_id: &str,
    today: NaiveDate,
) -> Result<Option<ForecastSection>, DbError> {
    let rows = db.get_future_weather(organization_id, &format_date(today))?;

    // Rows arrive ordered by plot name, so groups are contiguous.
    let mut by_plot: Vec<PlotForecast> = Vec::new();
    for row in rows {
        match by_plot.last_mut() {
            Some(group) if group.plot_name == row.plot_name => group.days.push(row.record),
            _ => by_plot.push(PlotForecast {
                plot_name: row.plot_name,
                days: vec![row.record],
            }),
        }
    }

    let Some(first) = by_plot.first() else {
        return Ok(None);
    };
    let next_days = first.days.iter().take(NEXT_FORECAST_DAYS).cloned().collect();
    Ok(Some(ForecastSection { by_plot, next_days }))
}

fn load_recent_weather(
    db: &FarmDb,
    organization_id: &str,
    today: NaiveDate,
) -> Result<Option<WeatherAggregates>, DbError> {
    // Seven calendar days ending today, both ends inclusive.
    let from = format_date(today - Duration::days(RECENT_WEATHER_DAYS - 1));
    let to = format_date(today);
    let records = db.get_weather_between(organization_id, &from, &to)?;
    Ok(aggregate_weather(&records).map(|(mean_temperature, total_precipitation, max_wind_speed)| {
        WeatherAggregates {
            from,
            to,
            record_count: records.len(),
            mean_temperature,
            total_precipitation,
            max_wind_speed,
        }
    }))
}

/// Mean temperature, summed precipitation and max wind over the records.
fn aggregate_weather(records: &[DbWeatherRecord]) -> Option<(Option<f64>, f64, Option<f64>)> {
    if records.is_empty() {
        return None;
    }
    let temps: Vec<f64> = records.iter().filter_map(|r| r.mean_temperature()).collect();
    let mean_temperature = if temps.is_empty() {
        None
    } else {
        Some(temps.iter().sum::<f64>() / temps.len() as f64)
    };
    let total_precipitation = records.iter().filter_map(|r| r.precipitation).sum();
    let max_wind_speed = records
        .iter()
        .filter_map(|r| r.wind_speed)
        .fold(None, |max: Option<f64>, w| Some(max.map_or(w, |m| m.max(w))));
    Some((mean_temperature, total_precipitation, max_wind_speed))
}

fn load_vegetation_stats(
    db: &FarmDb,
    organization_id: &str,
) -> Result<Option<VegetationStats>, DbError> {
    let values = db.get_organization_vegetation_values(organization_id)?;
    if values.is_empty() {
        return Ok(None);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Ok(Some(VegetationStats {
        mean,
        reading_count: values.len(),
        interpretation: VegetationHealth::from_mean(mean),
    }))
}
