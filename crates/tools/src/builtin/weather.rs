//! Current weather via the Open-Meteo geocoding + forecast APIs.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use ca_domain::error::{Error, Result};
use ca_domain::tool::{ToolDefinition, ToolScope};

use crate::registry::{RegisteredTool, ToolHandler};

use super::arg_str;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub fn weather_tool(http_timeout: Duration) -> RegisteredTool {
    let client = reqwest::Client::builder()
        .timeout(http_timeout)
        .build()
        .unwrap_or_default();

    RegisteredTool {
        definition: ToolDefinition {
            name: "get_weather".into(),
            description: "Get current weather conditions for a location \
                          (city name, e.g. 'Tokyo' or 'Berlin')."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "City or place name"
                    }
                },
                "required": ["location"]
            }),
        },
        scope: ToolScope::Global,
        assigned_specialist_id: None,
        enabled: true,
        handler: std::sync::Arc::new(WeatherTool { client }),
    }
}

struct WeatherTool {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentWeather,
}

#[derive(Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i64,
}

#[async_trait::async_trait]
impl ToolHandler for WeatherTool {
    async fn call(&self, args: &Value) -> Result<String> {
        let location = arg_str(args, "location")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Other("missing required argument: location".into()))?;

        let geo: GeocodingResponse = self
            .client
            .get(GEOCODING_URL)
            .query(&[("name", location), ("count", "1")])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let Some(place) = geo.results.into_iter().next() else {
            return Ok(format!("No location found matching '{location}'"));
        };

        let forecast: ForecastResponse = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code".into(),
                ),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let current = forecast.current;
        let name = match place.country {
            Some(country) => format!("{}, {country}", place.name),
            None => place.name,
        };
        Ok(format!(
            "Weather in {name}: {}, {:.1}°C, humidity {:.0}%, wind {:.1} km/h",
            interpret_weather_code(current.weather_code),
            current.temperature_2m,
            current.relative_humidity_2m,
            current.wind_speed_10m,
        ))
    }
}

/// WMO weather interpretation codes.
fn interpret_weather_code(code: i64) -> &'static str {
    match code {
        0 => "clear sky",
        1 | 2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51..=57 => "drizzle",
        61..=67 => "rain",
        71..=77 => "snow",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95..=99 => "thunderstorm",
        _ => "unknown conditions",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_codes_cover_common_cases() {
        assert_eq!(interpret_weather_code(0), "clear sky");
        assert_eq!(interpret_weather_code(3), "overcast");
        assert_eq!(interpret_weather_code(63), "rain");
        assert_eq!(interpret_weather_code(95), "thunderstorm");
        assert_eq!(interpret_weather_code(1234), "unknown conditions");
    }

    #[tokio::test]
    async fn missing_location_is_an_error() {
        let tool = weather_tool(Duration::from_secs(1));
        let err = tool.handler.call(&serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("location"));
    }
}
