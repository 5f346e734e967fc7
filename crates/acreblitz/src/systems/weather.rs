use async_trait::async_trait;
use serde_json::{json, Number, Value};
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::systems::System;
use crate::weather::{Forecast, NwsClient};

const SUMMARY_HOURS: usize = 12;

/// Weather forecasts for US coordinates from the National Weather Service
pub struct WeatherSystem {
    client: Arc<NwsClient>,
    tools: Vec<Tool>,
    instructions: String,
}

impl WeatherSystem {
    pub fn new(client: Arc<NwsClient>) -> Self {
        let get_forecast = Tool::new(
            "get_forecast",
            "Get current conditions and the hourly forecast for a US location. \
             Returns a short summary; the full forecast is shown to the user as a chart.",
            json!({
                "type": "object",
                "required": ["latitude", "longitude"],
                "properties": {
                    "latitude": {
                        "type": "number",
                        "minimum": -90,
                        "maximum": 90,
                        "description": "Latitude in decimal degrees"
                    },
                    "longitude": {
                        "type": "number",
                        "minimum": -180,
                        "maximum": 180,
                        "description": "Longitude in decimal degrees"
                    }
                }
            }),
        );

        let instructions = "Use get_forecast when the user asks about weather, spraying or \
            planting windows, or field conditions. Only US locations are covered. The user \
            already sees the full hourly chart, so answer from the summary without listing \
            every hour."
            .to_string();

        Self {
            client,
            tools: vec![get_forecast],
            instructions,
        }
    }

    async fn get_forecast(&self, params: Value) -> AgentResult<ToolResult> {
        let coordinate = |key: &str| {
            params.get(key).and_then(Value::as_f64).ok_or_else(|| {
                AgentError::InvalidParameters(format!("The parameter {} is required and must be a number", key))
            })
        };
        let latitude = coordinate("latitude")?;
        let longitude = coordinate("longitude")?;

        let forecast = self
            .client
            .forecast(latitude, longitude)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        let ui_data =
            serde_json::to_value(&forecast).map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(ToolResult::success(summarize(&forecast)).with_ui_data(ui_data))
    }
}

/// A few sentences the model can reason over in place of the full forecast
pub fn summarize(forecast: &Forecast) -> String {
    let location = &forecast.location;
    let mut summary = format!("Forecast for {}, {}.", location.city, location.state);

    if let Some(current) = &forecast.current_conditions {
        match current.temperature {
            Some(temperature) => summary.push_str(&format!(
                " Currently {}°{}, {}.",
                temperature, current.temperature_unit, current.description
            )),
            None => summary.push_str(&format!(" Currently {}.", current.description)),
        }
    }

    let upcoming = &forecast.hourly_forecast[..forecast.hourly_forecast.len().min(SUMMARY_HOURS)];
    let temperatures: Vec<f64> = upcoming
        .iter()
        .filter_map(|period| period.temperature.as_f64())
        .collect();

    if let (Some(first), false) = (upcoming.first(), temperatures.is_empty()) {
        let high = temperatures.iter().copied().fold(f64::MIN, f64::max);
        let low = temperatures.iter().copied().fold(f64::MAX, f64::min);
        let unit = &first.temperature_unit;
        summary.push_str(&format!(
            " Next {} hours: high {}°{}, low {}°{}",
            upcoming.len(),
            high,
            unit,
            low,
            unit
        ));

        let precipitation = upcoming
            .iter()
            .filter_map(|period| period.precipitation_chance.as_ref().and_then(Number::as_f64))
            .reduce(f64::max);
        if let Some(chance) = precipitation {
            summary.push_str(&format!(", up to {}% chance of precipitation", chance));
        }
        summary.push_str(&format!(", starting {}.", first.short_forecast.to_lowercase()));
    }

    summary
}

#[async_trait]
impl System for WeatherSystem {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current conditions and hourly forecasts from the National Weather Service"
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<ToolResult> {
        match tool_call.name.as_str() {
            "get_forecast" => self.get_forecast(tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
