//! Organization-wide forecast sync.
//!
//! For every plot: centroid → nearest station → forecast → one upserted
//! weather record per forecast day. A plot that fails (no usable geometry,
//! station list or forecast unavailable, storage error) is logged and
//! skipped; the remaining plots still sync. The station list is fetched by
//! the first plot that needs it and reused once a fetch succeeds.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::observations::FORECAST_SOURCE;
use crate::db::{format_timestamp, DbError, DbPlot, DbWeatherRecord, SharedDb};
use crate::geo::parse_geometry;

use super::client::{find_nearest_station, ForecastDay, ForecastError, ForecastSource, Station};

/// Outcome of one organization sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_records: usize,
    pub plot_count: usize,
    pub failed_plots: Vec<String>,
}

/// Errors that abort an organization sync as a whole.
#[derive(Debug, thiserror::Error)]
pub enum WeatherSyncError {
    #[error("Database: {0}")]
    Db(#[from] DbError),
}

/// Errors scoped to a single plot.
#[derive(Debug, thiserror::Error)]
enum PlotSyncError {
    #[error("plot has no usable geometry")]
    NoGeometry,
    #[error("no station near plot")]
    NoStation,
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Db(#[from] DbError),
}

pub async fn sync_for_organization(
    db: &SharedDb,
    source: &dyn ForecastSource,
    organization_id: &str,
) -> Result<SyncSummary, WeatherSyncError> {
    sync_for_organization_at(db, source, organization_id, Utc::now()).await
}

/// Same as [`sync_for_organization`], stamping written records with `synced_at`.
pub async fn sync_for_organization_at(
    db: &SharedDb,
    source: &dyn ForecastSource,
    organization_id: &str,
    synced_at: DateTime<Utc>,
) -> Result<SyncSummary, WeatherSyncError> {
    let plots = db.lock().get_plots_for_organization(organization_id, None)?;
    let mut summary = SyncSummary {
        plot_count: plots.len(),
        ..Default::default()
    };
    if plots.is_empty() {
        log::info!("Weather sync: organization {} has no plots", organization_id);
        return Ok(summary);
    }

    let synced_at = format_timestamp(synced_at);
    let mut stations: Option<Vec<Station>> = None;
    for plot in &plots {
        match sync_plot(db, source, &mut stations, plot, &synced_at).await {
            Ok(written) => summary.total_records += written,
            Err(e) => {
                log::warn!(
                    "Weather sync: plot {} ({}) of organization {} skipped: {}",
                    plot.id,
                    plot.name,
                    organization_id,
                    e
                );
                summary.failed_plots.push(plot.id.clone());
            }
        }
    }

    log::info!(
        "Weather sync: organization {} wrote {} records across {} plots ({} failed)",
        organization_id,
        summary.total_records,
        summary.plot_count,
        summary.failed_plots.len()
    );
    Ok(summary)
}

async fn sync_plot(
    db: &SharedDb,
    source: &dyn ForecastSource,
    stations: &mut Option<Vec<Station>>,
    plot: &DbPlot,
    synced_at: &str,
) -> Result<usize, PlotSyncError> {
    let centroid = plot
        .geometry
        .as_deref()
        .and_then(parse_geometry)
        .and_then(|g| g.centroid())
        .ok_or(PlotSyncError::NoGeometry)?;
    let stations = station_list(source, stations).await?;
    let station = find_nearest_station(stations, centroid).ok_or(PlotSyncError::NoStation)?;

    let days = source.forecast(&station.id).await?;
    log::debug!(
        "Weather sync: plot {} → station {} ({} days)",
        plot.id,
        station.id,
        days.len()
    );

    let records: Vec<DbWeatherRecord> = days
        .iter()
        .map(|day| forecast_record(&plot.id, day, synced_at))
        .collect();

    let written = db.lock().with_transaction(|tx| {
        for record in &records {
            tx.upsert_weather_record(record)?;
        }
        Ok(records.len())
    })?;
    Ok(written)
}

/// Stations from an earlier plot, or a fresh fetch. Only a non-empty list is kept.
async fn station_list<'a>(
    source: &dyn ForecastSource,
    cached: &'a mut Option<Vec<Station>>,
) -> Result<&'a [Station], ForecastError> {
    if cached.is_none() {
        let fetched = source.stations().await?;
        if fetched.is_empty() {
            return Err(ForecastError::NoStations);
        }
        *cached = Some(fetched);
    }
    Ok(cached.as_deref().unwrap_or(&[]))
}

fn forecast_record(plot_id: &str, day: &ForecastDay, synced_at: &str) -> DbWeatherRecord {
    DbWeatherRecord {
        id: format!("wr-{}", uuid::Uuid::new_v4()),
        plot_id: plot_id.to_string(),
        date: day.date.clone(),
        source: FORECAST_SOURCE.to_string(),
        temp_min: day.temp_min,
        temp_max: day.temp_max,
        temp_avg: None,
        precipitation: None,
        precipitation_probability: day.precipitation_probability,
        wind_speed: Some(day.wind_speed_kmh()),
        humidity: None,
        created_at: synced_at.to_string(),
    }
}
