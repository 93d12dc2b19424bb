//! HTTP client for the forecast provider.
//!
//! The provider exposes a station list (`GET {base}/stations`) and a
//! per-station multi-day forecast (`GET {base}/stations/{id}/forecast`).
//! Wind arrives as a qualitative class which is mapped to km/h here so the
//! rest of the engine works in one unit.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::geo::{haversine_km, Coordinates};

use super::ForecastConfig;

/// A forecast station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

/// One forecast day as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    pub date: String,
    #[serde(default)]
    pub temp_min: Option<f64>,
    #[serde(default)]
    pub temp_max: Option<f64>,
    #[serde(default)]
    pub precipitation_probability: Option<f64>,
    #[serde(default, deserialize_with = "de_wind_class")]
    pub wind_class: Option<String>,
}

impl ForecastDay {
    /// Approximate wind speed in km/h for the day's wind class.
    pub fn wind_speed_kmh(&self) -> f64 {
        wind_class_to_kmh(self.wind_class.as_deref().unwrap_or(""))
    }
}

#[derive(Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    days: Vec<ForecastDay>,
}

/// Wind classes accept either a name or a numeric code.
fn de_wind_class<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Five-tier wind class table, lowest tier first. Unknown classes fall back
/// to the lowest tier.
const WIND_CLASS_KMH: &[(&str, &str, f64)] = &[
    ("calm", "1", 5.0),
    ("light", "2", 15.0),
    ("moderate", "3", 30.0),
    ("strong", "4", 50.0),
    ("very_strong", "5", 75.0),
];

pub fn wind_class_to_kmh(class: &str) -> f64 {
    let normalized = class.trim().to_lowercase().replace([' ', '-'], "_");
    WIND_CLASS_KMH
        .iter()
        .find(|(name, code, _)| *name == normalized || *code == normalized)
        .map(|(_, _, kmh)| *kmh)
        .unwrap_or(WIND_CLASS_KMH[0].2)
}

/// Errors from forecast provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Forecast API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid forecast base URL: {0}")]
    InvalidUrl(String),
    #[error("Forecast provider returned no stations")]
    NoStations,
}

/// Read access to a forecast provider.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn stations(&self) -> Result<Vec<Station>, ForecastError>;
    async fn forecast(&self, station_id: &str) -> Result<Vec<ForecastDay>, ForecastError>;
}

/// Closest station to a point. Ties keep the first station in list order.
pub fn find_nearest_station(stations: &[Station], point: Coordinates) -> Option<&Station> {
    let mut best: Option<(&Station, f64)> = None;
    for station in stations {
        let distance = haversine_km(
            point,
            Coordinates {
                lat: station.lat,
                lon: station.lon,
            },
        );
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((station, distance)),
        }
    }
    best.map(|(station, _)| station)
}

/// Fetch the station list and resolve the closest one to `point`.
pub async fn nearest_station(
    source: &dyn ForecastSource,
    point: Coordinates,
) -> Result<Station, ForecastError> {
    let stations = source.stations().await?;
    find_nearest_station(&stations, point)
        .cloned()
        .ok_or(ForecastError::NoStations)
}

pub struct ForecastClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ForecastClient {
    pub fn new(config: &ForecastConfig) -> Result<Self, ForecastError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ForecastError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ForecastError::InvalidUrl(config.base_url.clone()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ForecastError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ForecastError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ForecastError> {
        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ForecastError::Api { status, message });
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ForecastSource for ForecastClient {
    async fn stations(&self) -> Result<Vec<Station>, ForecastError> {
        let url = self.endpoint(&["stations"])?;
        self.get_json(url).await
    }

    async fn forecast(&self, station_id: &str) -> Result<Vec<ForecastDay>, ForecastError> {
        let url = self.endpoint(&["stations", station_id, "forecast"])?;
        let resp: ForecastResponse = self.get_json(url).await?;
        Ok(resp.days)
    }
}
