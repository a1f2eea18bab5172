use serde::{Deserialize, Serialize};

use crate::endpoints::{DEVICE_CONFIG_PATH, STORAGE_CONDITION_PATH};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub send_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub alarm_duration_ms: u64,
    pub alarm_frequency_hz: u32,
    pub report_precision: u8,
    /// Compare readings against zeroed bounds until the first successful
    /// threshold fetch instead of withholding evaluation.
    pub evaluate_before_thresholds: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            send_interval_ms: 60_000,
            tick_interval_ms: 100,
            alarm_duration_ms: 800,
            alarm_frequency_hz: 800,
            report_precision: 2,
            evaluate_before_thresholds: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub api_base_url: String,
    /// Overrides the URL derived from `api_base_url` and the device id.
    pub device_config_url: Option<String>,
    pub data_url: Option<String>,
    pub bearer_token: String,
    pub allow_insecure_tls: bool,
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            api_base_url: "https://localhost:7069".to_string(),
            device_config_url: None,
            data_url: None,
            bearer_token: String::new(),
            allow_insecure_tls: false,
            request_timeout_ms: 10_000,
        }
    }
}

impl NetworkConfig {
    pub fn device_config_url(&self, device_id: i32) -> String {
        match &self.device_config_url {
            Some(url) => url.clone(),
            None => format!(
                "{}{}/{}",
                self.api_base_url.trim_end_matches('/'),
                DEVICE_CONFIG_PATH,
                device_id
            ),
        }
    }

    pub fn data_url(&self) -> String {
        match &self.data_url {
            Some(url) => url.clone(),
            None => format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                STORAGE_CONDITION_PATH
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device_id: i32,
    pub monitor: MonitorConfig,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            monitor: MonitorConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.monitor.sanitize();
        self.network.sanitize();
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.device_id <= 0 {
            return Err("device_id must be positive");
        }
        let uses_base =
            self.network.device_config_url.is_none() || self.network.data_url.is_none();
        if uses_base && self.network.api_base_url.trim().is_empty() {
            return Err("api_base_url cannot be empty");
        }
        for url in [
            self.network.device_config_url(self.device_id),
            self.network.data_url(),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err("endpoint URLs must start with http:// or https://");
            }
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn sanitize(&mut self) {
        self.check_interval_ms = self.check_interval_ms.max(100);
        self.send_interval_ms = self.send_interval_ms.max(100);
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);

        // The tone must end before the next check can start another one.
        self.alarm_duration_ms = self.alarm_duration_ms.min(self.check_interval_ms);

        self.alarm_frequency_hz = self.alarm_frequency_hz.clamp(100, 10_000);
        self.report_precision = self.report_precision.min(6);
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        self.request_timeout_ms = self.request_timeout_ms.clamp(1_000, 60_000);

        if matches!(&self.device_config_url, Some(url) if url.trim().is_empty()) {
            self.device_config_url = None;
        }
        if matches!(&self.data_url, Some(url) if url.trim().is_empty()) {
            self.data_url = None;
        }
    }
}

/// Parses a boolean switch from the environment or build settings.
/// `1`, `true`, `yes` and `on` are accepted in any case; anything else is off.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn derives_endpoints_from_base_url() {
        let network = NetworkConfig {
            api_base_url: "https://medicine.example.com/".to_string(),
            ..NetworkConfig::default()
        };

        assert_eq!(
            network.device_config_url(3),
            "https://medicine.example.com/api/iotdevice/3"
        );
        assert_eq!(
            network.data_url(),
            "https://medicine.example.com/api/storagecondition"
        );
    }

    #[test]
    fn explicit_urls_win_over_base() {
        let network = NetworkConfig {
            device_config_url: Some("https://cfg.example.com/device".to_string()),
            data_url: Some("https://ingest.example.com/readings".to_string()),
            ..NetworkConfig::default()
        };

        assert_eq!(network.device_config_url(1), "https://cfg.example.com/device");
        assert_eq!(network.data_url(), "https://ingest.example.com/readings");
    }

    #[test]
    fn blank_url_overrides_fall_back_to_base() {
        let mut network = NetworkConfig {
            device_config_url: Some("  ".to_string()),
            data_url: Some(String::new()),
            ..NetworkConfig::default()
        };
        network.sanitize();

        assert_eq!(network.device_config_url, None);
        assert_eq!(network.data_url, None);
    }

    #[test]
    fn sanitize_keeps_alarm_inside_check_interval() {
        let mut monitor = MonitorConfig {
            check_interval_ms: 500,
            alarm_duration_ms: 2_000,
            report_precision: 12,
            tick_interval_ms: 0,
            ..MonitorConfig::default()
        };
        monitor.sanitize();

        assert_eq!(monitor.alarm_duration_ms, 500);
        assert_eq!(monitor.report_precision, 6);
        assert_eq!(monitor.tick_interval_ms, 10);
    }

    #[test]
    fn partial_config_file_uses_defaults() {
        let raw = r#"{ "device_id": 4, "network": { "bearer_token": "abc" } }"#;
        let runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(runtime.device_id, 4);
        assert_eq!(runtime.network.bearer_token, "abc");
        assert!(!runtime.network.allow_insecure_tls);
        assert_eq!(runtime.monitor.check_interval_ms, 5_000);
        assert_eq!(runtime.monitor.send_interval_ms, 60_000);
    }

    #[test]
    fn rejects_non_positive_device_id() {
        let runtime = RuntimeConfig {
            device_id: 0,
            ..RuntimeConfig::default()
        };

        assert_eq!(runtime.validate(), Err("device_id must be positive"));
        assert_eq!(RuntimeConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_missing_or_schemeless_endpoints() {
        let mut runtime = RuntimeConfig::default();
        runtime.network.api_base_url = String::new();
        assert_eq!(runtime.validate(), Err("api_base_url cannot be empty"));

        runtime.network.api_base_url = "medicine.example.com".to_string();
        assert_eq!(
            runtime.validate(),
            Err("endpoint URLs must start with http:// or https://")
        );
    }

    #[test]
    fn flags_accept_common_spellings() {
        for value in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(parse_flag(value), "{value}");
        }
        for value in ["0", "false", "", "enabled", "nope"] {
            assert!(!parse_flag(value), "{value}");
        }
    }
}
