use crate::state::AppState;
use acreblitz::weather::Forecast;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    lat: f64,
    lon: f64,
}

async fn forecast_handler(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<Forecast>, (StatusCode, Json<Value>)> {
    match state.weather.forecast(query.lat, query.lon).await {
        Ok(forecast) => Ok(Json(forecast)),
        Err(e) => {
            tracing::error!(lat = query.lat, lon = query.lon, "weather lookup failed: {}", e);
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Err((status, Json(json!({"detail": e.to_string()}))))
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/weather/forecast", get(forecast_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state_with_weather;
    use acreblitz::providers::mock::MockProvider;
    use acreblitz::weather::WeatherConfig;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(host: String) -> Router {
        routes(test_state_with_weather(
            Arc::new(MockProvider::default()),
            WeatherConfig {
                host,
                ..WeatherConfig::default()
            },
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_forecast() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/points/41.59,-93.62"))
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
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/DMX/73,49/forecast/hourly"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"periods": [{
                    "startTime": "2024-06-01T06:00:00-05:00",
                    "isDaytime": true,
                    "temperature": 64,
                    "temperatureUnit": "F",
                    "probabilityOfPrecipitation": {"value": 20},
                    "relativeHumidity": {"value": 80},
                    "windSpeed": "5 mph",
                    "windDirection": "SW",
                    "icon": "https://api.weather.gov/icons/land/day/few?size=small",
                    "shortForecast": "Sunny"
                }]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/DMX/73,49/stations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"features": []})))
            .mount(&server)
            .await;

        let (status, body) = get(app(uri), "/weather/forecast?lat=41.59&lon=-93.62").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location"]["city"], json!("Des Moines"));
        assert_eq!(body["hourlyForecast"][0]["temperature"], json!(64));
        assert_eq!(body["currentConditions"], Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_coordinates() {
        let (status, body) = get(
            app("http://127.0.0.1:1".to_string()),
            "/weather/forecast?lat=91&lon=-93.62",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_upstream_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unable to provide data"))
            .mount(&server)
            .await;

        let (status, _) = get(app(server.uri()), "/weather/forecast?lat=10&lon=10").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let (status, _) = get(
            app("http://127.0.0.1:1".to_string()),
            "/weather/forecast?lat=41.59&lon=-93.62",
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
