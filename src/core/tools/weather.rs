//! Simulated weather lookup.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Tool, ToolError, ToolResult, parse_args};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherDate {
    #[default]
    Today,
    Tomorrow,
    DayAfterTomorrow,
}

/// Only non-extreme conditions are ever reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    Overcast,
    LightRain,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 4] = [
        WeatherCondition::Sunny,
        WeatherCondition::Cloudy,
        WeatherCondition::Overcast,
        WeatherCondition::LightRain,
    ];

    fn suggestion(self) -> &'static str {
        match self {
            WeatherCondition::Sunny => "Great day to be outside, remember sunscreen",
            WeatherCondition::Cloudy | WeatherCondition::Overcast => "Good for going out",
            WeatherCondition::LightRain => "Fine for going out, bring an umbrella",
        }
    }
}

const WINDS: [&str; 3] = ["breeze", "light_breeze", "gentle_breeze"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeatherArgs {
    location: String,
    #[serde(default)]
    date: Option<WeatherDate>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GetWeatherTool;

impl Tool for GetWeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Get the weather for a city today, tomorrow or the day after tomorrow."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name, for example Beijing, Shanghai or Shenzhen"
                },
                "date": {
                    "type": "string",
                    "description": "Which day to report",
                    "enum": ["today", "tomorrow", "day_after_tomorrow"]
                }
            },
            "required": ["location"]
        })
    }

    fn call(&self, arguments: Value) -> ToolResult<Value> {
        let args: WeatherArgs = parse_args(arguments)?;
        let location = args.location.trim();
        if location.is_empty() {
            return Err(ToolError::InvalidArguments("location must not be empty".to_string()));
        }

        let mut rng = rand::thread_rng();
        let condition = *WeatherCondition::ALL
            .choose(&mut rng)
            .unwrap_or(&WeatherCondition::Sunny);
        let wind = *WINDS.choose(&mut rng).unwrap_or(&WINDS[0]);

        Ok(json!({
            "location": location,
            "date": args.date.unwrap_or_default(),
            "condition": condition,
            "temperature": rng.gen_range(15..=30),
            "temperature_low": rng.gen_range(10..=20),
            "humidity": rng.gen_range(40..=80),
            "wind": wind,
            "aqi": rng.gen_range(30..=150),
            "suggestion": condition.suggestion()
        }))
    }
}
