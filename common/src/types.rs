use serde::Deserialize;

use crate::thresholds::ThresholdSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
}

impl Reading {
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Sentinel produced when the sensor could not be read.
    pub fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN)
    }

    pub fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }
}

/// Device record served by the configuration endpoint.
///
/// Only the four threshold fields are required. The server also sends
/// descriptive fields, which are kept for logging.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "deviceID", default)]
    pub device_id: Option<i32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(rename = "isActive", default)]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub thresholds: ThresholdSet,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageConditionPayload {
    pub temperature: f32,
    pub humidity: f32,
    pub device_id: i32,
}

impl StorageConditionPayload {
    /// Renders the upload body with `precision` decimals per measurement.
    pub fn to_json(&self, precision: usize) -> String {
        format!(
            "{{\"Temperature\": {:.prec$}, \"Humidity\": {:.prec$}, \"DeviceID\": {}}}",
            self.temperature,
            self.humidity,
            self.device_id,
            prec = precision
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn nan_channel_invalidates_reading() {
        assert!(Reading::new(21.0, 40.0).is_valid());
        assert!(!Reading::new(f32::NAN, 40.0).is_valid());
        assert!(!Reading::new(21.0, f32::NAN).is_valid());
        assert!(!Reading::invalid().is_valid());
    }

    #[test]
    fn payload_uses_fixed_precision() {
        let payload = StorageConditionPayload {
            temperature: 22.5,
            humidity: 55.0,
            device_id: 1,
        };

        assert_eq!(
            payload.to_json(2),
            r#"{"Temperature": 22.50, "Humidity": 55.00, "DeviceID": 1}"#
        );
        assert_eq!(
            payload.to_json(1),
            r#"{"Temperature": 22.5, "Humidity": 55.0, "DeviceID": 1}"#
        );
    }

    #[test]
    fn payload_is_valid_json() {
        let payload = StorageConditionPayload {
            temperature: -3.25,
            humidity: 99.9,
            device_id: 7,
        };

        let value: serde_json::Value = serde_json::from_str(&payload.to_json(2)).unwrap();
        assert_eq!(value["DeviceID"], 7);
        assert_eq!(value["Temperature"].as_f64(), Some(-3.25));
    }

    #[test]
    fn device_record_keeps_descriptive_fields() {
        let raw = r#"{
            "deviceID": 1,
            "location": "Pharmacy fridge",
            "type": "DHT22",
            "parameters": "",
            "isActive": true,
            "minTemperature": 2,
            "maxTemperature": 8,
            "minHumidity": 30,
            "maxHumidity": 60
        }"#;

        let record: DeviceRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(record.device_id, Some(1));
        assert_eq!(record.location.as_deref(), Some("Pharmacy fridge"));
        assert_eq!(record.device_type.as_deref(), Some("DHT22"));
        assert_eq!(record.is_active, Some(true));
        assert_eq!(
            record.thresholds,
            ThresholdSet {
                min_temperature: 2.0,
                max_temperature: 8.0,
                min_humidity: 30.0,
                max_humidity: 60.0,
            }
        );
    }
}
