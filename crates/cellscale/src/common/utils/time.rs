use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Deserializes a human readable duration (e.g. `30s`, `5m`).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
