//! National Weather Service client.
//!
//! A forecast is assembled from three upstream lookups: the grid point for a
//! coordinate (cached for a day), the hourly forecast for that grid, and the
//! latest observation from the nearest station. The observation is best-effort.
use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const NWS_DEFAULT_HOST: &str = "https://api.weather.gov";
pub const NWS_DEFAULT_USER_AGENT: &str = "AcreBlitz Gateway (https://acreblitz.com)";
pub const GRID_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            host: default_host(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_host() -> String {
    NWS_DEFAULT_HOST.to_string()
}

fn default_user_agent() -> String {
    NWS_DEFAULT_USER_AGENT.to_string()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeatherError {
    #[error("Weather API error: {body}")]
    Status { status: u16, body: String },

    #[error("Weather API unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to fetch weather: {0}")]
    Malformed(String),

    #[error("Coordinates out of range: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },
}

impl WeatherError {
    /// The HTTP status this error should be reported with
    pub fn status_code(&self) -> u16 {
        match self {
            WeatherError::Status { status, .. } => *status,
            WeatherError::Unavailable(_) => 503,
            WeatherError::Malformed(_) => 500,
            WeatherError::InvalidCoordinates { .. } => 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPoint {
    pub grid_id: String,
    pub grid_x: i64,
    pub grid_y: i64,
    pub forecast_hourly: String,
    pub observation_stations: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPeriod {
    pub time: String,
    pub temperature: Number,
    pub temperature_unit: String,
    pub precipitation_chance: Option<Number>,
    pub relative_humidity: Option<Number>,
    pub wind_speed: String,
    pub wind_direction: String,
    pub icon: String,
    pub short_forecast: String,
    pub is_daytime: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    pub timestamp: Option<String>,
    pub temperature: Option<i64>,
    pub temperature_unit: String,
    pub description: String,
    pub icon: String,
    pub humidity: Option<Number>,
    pub wind_speed: Option<Number>,
    pub wind_direction: Option<Number>,
    pub pressure: Option<Number>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastLocation {
    pub city: String,
    pub state: String,
    pub grid_id: String,
    pub grid_x: i64,
    pub grid_y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub location: ForecastLocation,
    pub current_conditions: Option<CurrentConditions>,
    pub hourly_forecast: Vec<HourlyPeriod>,
    pub updated: String,
}

// Upstream GeoJSON shapes, only the fields we read

#[derive(Deserialize)]
struct Feature<P> {
    properties: P,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointProperties {
    grid_id: String,
    grid_x: i64,
    grid_y: i64,
    forecast_hourly: String,
    observation_stations: String,
    relative_location: Feature<RelativeLocation>,
}

#[derive(Deserialize)]
struct RelativeLocation {
    city: String,
    state: String,
}

#[derive(Deserialize)]
struct ForecastProperties {
    periods: Vec<NwsPeriod>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NwsPeriod {
    start_time: String,
    temperature: Number,
    temperature_unit: String,
    #[serde(default)]
    probability_of_precipitation: Option<Measurement>,
    #[serde(default)]
    relative_humidity: Option<Measurement>,
    wind_speed: String,
    wind_direction: String,
    icon: String,
    short_forecast: String,
    is_daytime: bool,
}

#[derive(Deserialize)]
struct Measurement {
    #[serde(default)]
    value: Option<Number>,
}

fn measured(measurement: Option<Measurement>) -> Option<Number> {
    measurement.and_then(|m| m.value)
}

#[derive(Deserialize)]
struct StationCollection {
    features: Vec<Station>,
}

#[derive(Deserialize)]
struct Station {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationProperties {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    temperature: Option<Measurement>,
    #[serde(default)]
    text_description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    relative_humidity: Option<Measurement>,
    #[serde(default)]
    wind_speed: Option<Measurement>,
    #[serde(default)]
    wind_direction: Option<Measurement>,
    #[serde(default)]
    barometric_pressure: Option<Measurement>,
}

/// Celsius to whole Fahrenheit degrees, halves rounding to even
pub fn celsius_to_fahrenheit(celsius: f64) -> i64 {
    (celsius * 9.0 / 5.0 + 32.0).round_ties_even() as i64
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), WeatherError> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(WeatherError::InvalidCoordinates { lat, lon })
    }
}

pub struct NwsClient {
    client: Client,
    config: WeatherConfig,
    grid_cache: Mutex<HashMap<String, (GridPoint, Instant)>>,
}

impl NwsClient {
    pub fn new(config: WeatherConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/geo+json"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            config,
            grid_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &WeatherConfig {
        &self.config
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, WeatherError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WeatherError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(WeatherError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| WeatherError::Malformed(e.to_string()))
    }

    /// Grid metadata for a coordinate, served from cache for a day
    pub async fn grid_point(&self, lat: f64, lon: f64) -> Result<GridPoint, WeatherError> {
        let cache_key = format!("{:.4},{:.4}", lat, lon);

        {
            let cache = self.grid_cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((grid_point, fetched_at)) = cache.get(&cache_key) {
                if fetched_at.elapsed() < GRID_CACHE_TTL {
                    tracing::debug!(key = %cache_key, "using cached grid point");
                    return Ok(grid_point.clone());
                }
            }
        }

        tracing::info!(key = %cache_key, "fetching grid point");
        let url = format!(
            "{}/points/{},{}",
            self.config.host.trim_end_matches('/'),
            lat,
            lon
        );
        let point: Feature<PointProperties> = self.get(&url).await?;
        let props = point.properties;
        let grid_point = GridPoint {
            grid_id: props.grid_id,
            grid_x: props.grid_x,
            grid_y: props.grid_y,
            forecast_hourly: props.forecast_hourly,
            observation_stations: props.observation_stations,
            city: props.relative_location.properties.city,
            state: props.relative_location.properties.state,
        };

        self.remember_grid_point(cache_key, grid_point.clone(), Instant::now());
        Ok(grid_point)
    }

    /// Cache a grid point, dropping every entry older than a day
    fn remember_grid_point(&self, key: String, grid_point: GridPoint, now: Instant) {
        let mut cache = self.grid_cache.lock().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|_, (_, fetched_at)| now.saturating_duration_since(*fetched_at) < GRID_CACHE_TTL);
        let swept = before - cache.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = cache.len(), "swept expired grid points");
        }
        cache.insert(key, (grid_point, now));
    }

    /// Number of grid points currently cached
    pub fn cached_grid_points(&self) -> usize {
        self.grid_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn hourly_forecast(&self, url: &str) -> Result<Vec<HourlyPeriod>, WeatherError> {
        tracing::info!("fetching hourly forecast");
        let forecast: Feature<ForecastProperties> = self.get(url).await?;

        Ok(forecast
            .properties
            .periods
            .into_iter()
            .map(|period| HourlyPeriod {
                time: period.start_time,
                temperature: period.temperature,
                temperature_unit: period.temperature_unit,
                precipitation_chance: measured(period.probability_of_precipitation),
                relative_humidity: measured(period.relative_humidity),
                wind_speed: period.wind_speed,
                wind_direction: period.wind_direction,
                icon: period.icon,
                short_forecast: period.short_forecast,
                is_daytime: period.is_daytime,
            })
            .collect())
    }

    /// Latest observation from the first listed station; `None` on any failure
    pub async fn current_conditions(&self, stations_url: &str) -> Option<CurrentConditions> {
        match self.fetch_current_conditions(stations_url).await {
            Ok(conditions) => conditions,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch current conditions");
                None
            }
        }
    }

    async fn fetch_current_conditions(
        &self,
        stations_url: &str,
    ) -> Result<Option<CurrentConditions>, WeatherError> {
        let stations: StationCollection = self.get(stations_url).await?;
        let Some(station) = stations.features.first() else {
            tracing::warn!("no observation stations found");
            return Ok(None);
        };

        tracing::info!(station = %station.id, "fetching latest observation");
        let observation: Feature<ObservationProperties> = self
            .get(&format!("{}/observations/latest", station.id))
            .await?;
        let props = observation.properties;

        let temperature = measured(props.temperature)
            .and_then(|celsius| celsius.as_f64())
            .map(celsius_to_fahrenheit);

        Ok(Some(CurrentConditions {
            timestamp: props.timestamp,
            temperature,
            temperature_unit: "F".to_string(),
            description: props
                .text_description
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "N/A".to_string()),
            icon: props.icon.unwrap_or_default(),
            humidity: measured(props.relative_humidity),
            wind_speed: measured(props.wind_speed),
            wind_direction: measured(props.wind_direction),
            pressure: measured(props.barometric_pressure),
        }))
    }

    /// Current conditions and hourly forecast for a US coordinate
    pub async fn forecast(&self, lat: f64, lon: f64) -> Result<Forecast, WeatherError> {
        validate_coordinates(lat, lon)?;
        tracing::info!(lat, lon, "getting weather");

        let grid_point = self.grid_point(lat, lon).await?;
        let hourly_forecast = self.hourly_forecast(&grid_point.forecast_hourly).await?;
        let current_conditions = self
            .current_conditions(&grid_point.observation_stations)
            .await;

        Ok(Forecast {
            location: ForecastLocation {
                city: grid_point.city,
                state: grid_point.state,
                grid_id: grid_point.grid_id,
                grid_x: grid_point.grid_x,
                grid_y: grid_point.grid_y,
            },
            current_conditions,
            hourly_forecast,
            updated: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const LAT: f64 = 41.59;
    pub(crate) const LON: f64 = -93.62;

    fn hourly_period(hour: u32, temperature: i64, precipitation: Option<i64>) -> Value {
        json!({
            "number": hour + 1,
            "startTime": format!("2024-06-01T{:02}:00:00-05:00", hour),
            "isDaytime": (6..20).contains(&hour),
            "temperature": temperature,
            "temperatureUnit": "F",
            "probabilityOfPrecipitation": {"unitCode": "wmoUnit:percent", "value": precipitation},
            "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 60},
            "windSpeed": "10 mph",
            "windDirection": "SW",
            "icon": "https://api.weather.gov/icons/land/day/few?size=small",
            "shortForecast": "Sunny"
        })
    }

    /// Mount the NWS endpoints for one grid point; returns the server
    pub(crate) async fn mount_nws(points_expected: u64, observation_status: u16) -> MockServer {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path(format!("/points/{},{}", LAT, LON)))
            .and(header("accept", "application/geo+json"))
            .and(header("user-agent", NWS_DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "gridId": "DMX",
                    "gridX": 73,
                    "gridY": 49,
                    "forecastHourly": format!("{}/gridpoints/DMX/73,49/forecast/hourly", uri),
                    "observationStations": format!("{}/gridpoints/DMX/73,49/stations", uri),
                    "relativeLocation": {"properties": {"city": "Des Moines", "state": "IA"}}
                }
            })))
            .expect(points_expected)
            .mount(&server)
            .await;

        let periods: Vec<Value> = (0..14)
            .map(|hour| hourly_period(hour, 60 + i64::from(hour), Some(i64::from(hour) * 5)))
            .collect();
        Mock::given(method("GET"))
            .and(path("/gridpoints/DMX/73,49/forecast/hourly"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"properties": {"periods": periods}})),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gridpoints/DMX/73,49/stations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [{"id": format!("{}/stations/KDSM", uri)}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/stations/KDSM/observations/latest"))
            .respond_with(ResponseTemplate::new(observation_status).set_body_json(json!({
                "properties": {
                    "timestamp": "2024-06-01T12:54:00+00:00",
                    "textDescription": "Partly Cloudy",
                    "icon": "https://api.weather.gov/icons/land/day/sct?size=medium",
                    "temperature": {"unitCode": "wmoUnit:degC", "value": 22.5},
                    "relativeHumidity": {"value": 54.2},
                    "windSpeed": {"value": 14.8},
                    "windDirection": {"value": 210},
                    "barometricPressure": {"value": 101420}
                }
            })))
            .mount(&server)
            .await;

        server
    }

    pub(crate) fn client_for(server: &MockServer) -> NwsClient {
        NwsClient::new(WeatherConfig {
            host: server.uri(),
            ..WeatherConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32);
        assert_eq!(celsius_to_fahrenheit(100.0), 212);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40);
        assert_eq!(celsius_to_fahrenheit(25.0), 77);
        // 72.5 rounds to the even neighbour
        assert_eq!(celsius_to_fahrenheit(22.5), 72);
    }

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(90.0, -180.0).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert_eq!(
            validate_coordinates(90.5, 0.0),
            Err(WeatherError::InvalidCoordinates { lat: 90.5, lon: 0.0 })
        );
        assert!(validate_coordinates(0.0, -180.1).is_err());
    }

    #[tokio::test]
    async fn test_forecast_assembles_all_parts() {
        let server = mount_nws(1, 200).await;
        let client = client_for(&server);

        let forecast = client.forecast(LAT, LON).await.unwrap();

        assert_eq!(
            forecast.location,
            ForecastLocation {
                city: "Des Moines".to_string(),
                state: "IA".to_string(),
                grid_id: "DMX".to_string(),
                grid_x: 73,
                grid_y: 49,
            }
        );
        assert_eq!(forecast.hourly_forecast.len(), 14);
        assert_eq!(forecast.hourly_forecast[2].precipitation_chance, Some(Number::from(10)));
        assert_eq!(forecast.hourly_forecast[0].time, "2024-06-01T00:00:00-05:00");
        assert!(forecast.updated.ends_with('Z'));

        let current = forecast.current_conditions.unwrap();
        assert_eq!(current.temperature, Some(72));
        assert_eq!(current.temperature_unit, "F");
        assert_eq!(current.description, "Partly Cloudy");
        assert_eq!(current.wind_direction, Some(Number::from(210)));
    }

    #[tokio::test]
    async fn test_forecast_serializes_camel_case() {
        let server = mount_nws(1, 200).await;
        let forecast = client_for(&server).forecast(LAT, LON).await.unwrap();
        let value = serde_json::to_value(&forecast).unwrap();

        assert_eq!(value["location"]["gridId"], json!("DMX"));
        assert_eq!(value["currentConditions"]["temperatureUnit"], json!("F"));
        assert_eq!(value["hourlyForecast"][0]["shortForecast"], json!("Sunny"));
        assert_eq!(value["hourlyForecast"][0]["isDaytime"], json!(false));
    }

    #[tokio::test]
    async fn test_grid_point_is_cached() {
        let server = mount_nws(1, 200).await;
        let client = client_for(&server);

        client.forecast(LAT, LON).await.unwrap();
        client.forecast(LAT, LON).await.unwrap();
        // The points mock expects exactly one request and verifies on drop
    }

    fn grid_point(city: &str) -> GridPoint {
        GridPoint {
            grid_id: "DMX".to_string(),
            grid_x: 73,
            grid_y: 49,
            forecast_hourly: "https://api.weather.gov/gridpoints/DMX/73,49/forecast/hourly".to_string(),
            observation_stations: "https://api.weather.gov/gridpoints/DMX/73,49/stations".to_string(),
            city: city.to_string(),
            state: "IA".to_string(),
        }
    }

    #[test]
    fn test_expired_grid_points_are_swept() {
        let client = NwsClient::new(WeatherConfig::default()).unwrap();
        let start = Instant::now();

        client.remember_grid_point("41.5900,-93.6200".to_string(), grid_point("Des Moines"), start);
        client.remember_grid_point(
            "42.0300,-93.6300".to_string(),
            grid_point("Ames"),
            start + Duration::from_secs(60 * 60),
        );
        assert_eq!(client.cached_grid_points(), 2);

        // A day after the first fetch only the Ames entry is still fresh
        client.remember_grid_point(
            "41.6600,-91.5300".to_string(),
            grid_point("Iowa City"),
            start + GRID_CACHE_TTL,
        );
        assert_eq!(client.cached_grid_points(), 2);

        client.remember_grid_point(
            "43.1500,-93.2000".to_string(),
            grid_point("Mason City"),
            start + GRID_CACHE_TTL * 3,
        );
        assert_eq!(client.cached_grid_points(), 1);
    }

    #[tokio::test]
    async fn test_observation_failure_is_tolerated() {
        let server = mount_nws(1, 500).await;
        let forecast = client_for(&server).forecast(LAT, LON).await.unwrap();

        assert_eq!(forecast.current_conditions, None);
        assert_eq!(forecast.hourly_forecast.len(), 14);
    }

    #[tokio::test]
    async fn test_upstream_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Data Unavailable For Requested Point"))
            .mount(&server)
            .await;

        let err = client_for(&server).forecast(LAT, LON).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("Data Unavailable"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let client = NwsClient::new(WeatherConfig {
            host: "http://127.0.0.1:1".to_string(),
            ..WeatherConfig::default()
        })
        .unwrap();

        let err = client.forecast(LAT, LON).await.unwrap_err();
        assert!(matches!(err, WeatherError::Unavailable(_)));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_skip_upstream() {
        let client = NwsClient::new(WeatherConfig::default()).unwrap();
        let err = client.forecast(120.0, 0.0).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
