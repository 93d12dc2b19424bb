//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// A row from the `organizations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOrganization {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// A row from the `properties` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProperty {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub total_area: Option<f64>,
}

/// A row from the `plots` table. `geometry` holds GeoJSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPlot {
    pub id: String,
    pub property_id: String,
    pub name: String,
    /// Hectares.
    pub area: f64,
    #[serde(skip_serializing)]
    pub geometry: Option<String>,
    pub soil_type: Option<String>,
}

/// A row from the `crops` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCrop {
    pub id: String,
    pub plot_id: String,
    pub name: String,
    pub variety: Option<String>,
    pub status: String,
    pub planted_on: Option<String>,
}

/// A row from the `cycles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCycle {
    pub id: String,
    pub plot_id: String,
    pub crop_id: Option<String>,
    pub name: String,
    pub started_on: String,
    pub ends_on: Option<String>,
    pub status: String,
}

/// A row from the `operations` table, joined with its plot name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOperation {
    pub id: String,
    pub plot_id: String,
    pub plot_name: Option<String>,
    pub kind: String,
    pub description: Option<String>,
    pub performed_on: String,
    pub cost: Option<f64>,
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTask {
    pub id: String,
    pub organization_id: String,
    pub plot_id: Option<String>,
    pub title: String,
    pub status: String,
    pub priority: Option<String>,
    pub planned_end: Option<String>,
}

impl DbTask {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    /// Not completed and planned to end before `today`.
    pub fn is_overdue(&self, today: chrono::NaiveDate) -> bool {
        if self.is_completed() {
            return false;
        }
        self.planned_end
            .as_deref()
            .and_then(parse_date)
            .map(|end| end < today)
            .unwrap_or(false)
    }
}

/// A row from the `inputs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInput {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub category: Option<String>,
    pub quantity: f64,
    pub unit: Option<String>,
    pub min_stock: Option<f64>,
    pub expires_on: Option<String>,
}

impl DbInput {
    pub fn is_low_stock(&self) -> bool {
        self.min_stock.is_some_and(|min| self.quantity <= min)
    }

    pub fn is_expired(&self, today: chrono::NaiveDate) -> bool {
        self.expires_on
            .as_deref()
            .and_then(parse_date)
            .map(|expiry| expiry < today)
            .unwrap_or(false)
    }
}

/// A row from the `calendar_rules` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCalendarRule {
    pub id: String,
    pub crop: String,
    pub activity: String,
    pub start_month: u32,
    pub end_month: u32,
    pub region: Option<String>,
    pub notes: Option<String>,
}

impl DbCalendarRule {
    /// Whether the rule's month window contains `month` (1-12).
    ///
    /// Windows where `start_month > end_month` wrap across the year end,
    /// so 11..3 covers Nov, Dec, Jan, Feb and Mar.
    pub fn is_active_in(&self, month: u32) -> bool {
        if self.start_month <= self.end_month {
            month >= self.start_month && month <= self.end_month
        } else {
            month >= self.start_month || month <= self.end_month
        }
    }
}

/// A row from the `vegetation_indices` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbVegetationReading {
    pub id: String,
    pub plot_id: String,
    pub index_type: String,
    pub value: f64,
    pub observed_on: String,
}

/// A row from the `weather_records` table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbWeatherRecord {
    pub id: String,
    pub plot_id: String,
    pub date: String,
    pub source: String,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_avg: Option<f64>,
    /// Millimetres.
    pub precipitation: Option<f64>,
    /// Percent, 0-100.
    pub precipitation_probability: Option<f64>,
    /// km/h.
    pub wind_speed: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: String,
}

impl DbWeatherRecord {
    /// Daily mean temperature: `temp_avg` when recorded, else the min/max midpoint.
    pub fn mean_temperature(&self) -> Option<f64> {
        self.temp_avg.or(match (self.temp_min, self.temp_max) {
            (Some(min), Some(max)) => Some((min + max) / 2.0),
            _ => None,
        })
    }
}

/// A row from the `plot_images` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPlotImage {
    pub id: String,
    pub plot_id: String,
    pub url: String,
    pub kind: Option<String>,
    pub captured_on: String,
}

/// Parse a `YYYY-MM-DD` date column, tolerating a trailing time component.
pub fn parse_date(value: &str) -> Option<chrono::NaiveDate> {
    let day = value.get(..10).unwrap_or(value);
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Format a date the way date columns store it.
pub fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Format a timestamp the way timestamp columns store it.
pub fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
