use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Reading;

/// Acceptable storage bounds for a device. No ordering between the min and
/// max bounds is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    #[serde(rename = "minTemperature")]
    pub min_temperature: f32,
    #[serde(rename = "maxTemperature")]
    pub max_temperature: f32,
    #[serde(rename = "minHumidity")]
    pub min_humidity: f32,
    #[serde(rename = "maxHumidity")]
    pub max_humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Temperature,
    Humidity,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub channel: Channel,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

impl Violation {
    pub fn is_high(&self) -> bool {
        self.value > self.max
    }

    fn direction(&self) -> &'static str {
        if self.is_high() {
            "too high"
        } else {
            "too low"
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.channel.unit();
        write!(
            f,
            "{} {}: {:.2}{unit} (expected {:.2}..{:.2}{unit})",
            self.channel.as_str(),
            self.direction(),
            self.value,
            self.min,
            self.max
        )
    }
}

impl ThresholdSet {
    /// Returns every channel of `reading` that falls outside its bounds.
    /// Values equal to a bound are accepted.
    pub fn violations(&self, reading: &Reading) -> Vec<Violation> {
        let mut violations = Vec::new();

        let channels = [
            (
                Channel::Temperature,
                reading.temperature,
                self.min_temperature,
                self.max_temperature,
            ),
            (
                Channel::Humidity,
                reading.humidity,
                self.min_humidity,
                self.max_humidity,
            ),
        ];

        for (channel, value, min, max) in channels {
            if value < min || value > max {
                violations.push(Violation {
                    channel,
                    value,
                    min,
                    max,
                });
            }
        }

        violations
    }
}
