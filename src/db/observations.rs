use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::farm::sql_limit;
use super::*;

const WEATHER_COLUMNS: &str = "w.id, w.plot_id, w.date, w.source, w.temp_min, w.temp_max, w.temp_avg,
     w.precipitation, w.precipitation_probability, w.wind_speed, w.humidity, w.created_at";

/// Source tag for rows written by the forecast sync.
pub const FORECAST_SOURCE: &str = "forecast";

/// A weather row paired with the name of its plot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotWeatherRow {
    pub plot_name: String,
    pub record: DbWeatherRecord,
}

impl FarmDb {
    // =========================================================================
    // Vegetation index
    // =========================================================================

    /// Readings for a plot, newest first.
    pub fn get_vegetation_readings(
        &self,
        plot_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbVegetationReading>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, plot_id, index_type, value, observed_on
             FROM vegetation_indices
             WHERE plot_id = ?1
             ORDER BY observed_on DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![plot_id, sql_limit(limit)], |row| {
            Ok(DbVegetationReading {
                id: row.get(0)?,
                plot_id: row.get(1)?,
                index_type: row.get(2)?,
                value: row.get(3)?,
                observed_on: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every vegetation-index value recorded on the organization's plots.
    pub fn get_organization_vegetation_values(
        &self,
        organization_id: &str,
    ) -> Result<Vec<f64>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT vi.value
             FROM vegetation_indices vi
             JOIN plots pl ON pl.id = vi.plot_id
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1",
        )?;
        let rows = stmt.query_map([organization_id], |row| row.get::<_, f64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Weather
    // =========================================================================

    /// Weather rows for a plot, newest date first.
    pub fn get_weather_for_plot(
        &self,
        plot_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbWeatherRecord>, DbError> {
        let sql = format!(
            "SELECT {WEATHER_COLUMNS}
             FROM weather_records w
             WHERE w.plot_id = ?1
             ORDER BY w.date DESC, w.created_at DESC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![plot_id, sql_limit(limit)], map_weather_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Weather rows dated after `today`, ordered by plot name then date.
    pub fn get_future_weather(
        &self,
        organization_id: &str,
        today: &str,
    ) -> Result<Vec<PlotWeatherRow>, DbError> {
        let sql = format!(
            "SELECT {WEATHER_COLUMNS}, pl.name
             FROM weather_records w
             JOIN plots pl ON pl.id = w.plot_id
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1 AND w.date > ?2
             ORDER BY pl.name, pl.id, w.date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![organization_id, today], |row| {
            Ok(PlotWeatherRow {
                record: map_weather_row(row)?,
                plot_name: row.get(12)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Weather rows across the organization with `from <= date <= to`.
    pub fn get_weather_between(
        &self,
        organization_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<DbWeatherRecord>, DbError> {
        let sql = format!(
            "SELECT {WEATHER_COLUMNS}
             FROM weather_records w
             JOIN plots pl ON pl.id = w.plot_id
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1 AND w.date >= ?2 AND w.date <= ?3
             ORDER BY w.date, w.plot_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![organization_id, from, to], map_weather_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Insert or update a weather record keyed by `(plot_id, date, source)`.
    ///
    /// `created_at` is kept from the first insert; `updated_at` moves on
    /// every write.
    pub fn upsert_weather_record(&self, record: &DbWeatherRecord) -> Result<(), DbError> {
        let now = format_timestamp(Utc::now());
        let created_at = if record.created_at.is_empty() {
            now.clone()
        } else {
            record.created_at.clone()
        };
        self.conn.execute(
            "INSERT INTO weather_records (
                id, plot_id, date, source, temp_min, temp_max, temp_avg, precipitation,
                precipitation_probability, wind_speed, humidity, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(plot_id, date, source) DO UPDATE SET
                temp_min = excluded.temp_min,
                temp_max = excluded.temp_max,
                temp_avg = excluded.temp_avg,
                precipitation = excluded.precipitation,
                precipitation_probability = excluded.precipitation_probability,
                wind_speed = excluded.wind_speed,
                humidity = excluded.humidity,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.plot_id,
                record.date,
                record.source,
                record.temp_min,
                record.temp_max,
                record.temp_avg,
                record.precipitation,
                record.precipitation_probability,
                record.wind_speed,
                record.humidity,
                created_at,
                now,
            ],
        )?;
        Ok(())
    }

    /// Creation time of the newest forecast record on any of the
    /// organization's plots. Unparseable timestamps are treated as absent.
    pub fn latest_forecast_created_at(
        &self,
        organization_id: &str,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(w.created_at)
                 FROM weather_records w
                 JOIN plots pl ON pl.id = w.plot_id
                 JOIN properties pr ON pr.id = pl.property_id
                 WHERE pr.organization_id = ?1 AND w.source = ?2",
                params![organization_id, FORECAST_SOURCE],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        Ok(raw.and_then(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| log::warn!("Unparseable weather created_at '{}': {}", ts, e))
                .ok()
        }))
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn get_plot_images(
        &self,
        plot_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbPlotImage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, plot_id, url, kind, captured_on
             FROM plot_images
             WHERE plot_id = ?1
             ORDER BY captured_on DESC, id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![plot_id, sql_limit(limit)], |row| {
            Ok(DbPlotImage {
                id: row.get(0)?,
                plot_id: row.get(1)?,
                url: row.get(2)?,
                kind: row.get(3)?,
                captured_on: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_weather_row(row: &Row) -> rusqlite::Result<DbWeatherRecord> {
    Ok(DbWeatherRecord {
        id: row.get(0)?,
        plot_id: row.get(1)?,
        date: row.get(2)?,
        source: row.get(3)?,
        temp_min: row.get(4)?,
        temp_max: row.get(5)?,
        temp_avg: row.get(6)?,
        precipitation: row.get(7)?,
        precipitation_probability: row.get(8)?,
        wind_speed: row.get(9)?,
        humidity: row.get(10)?,
        created_at: row.get(11)?,
    })
}
