use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use storage_monitor_common::{
    bearer_header, interpret_send_response, parse_device_config, parse_flag, CheckOutcome,
    DeviceRecord, MonitorAction, MonitorEngine, Reading, RuntimeConfig, UplinkError,
    CONTENT_TYPE_JSON,
};

use crate::monotonic_ms;

const CONFIG_PATH_ENV: &str = "STORAGE_NODE_CONFIG";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config().context("failed to load runtime config")?;
    runtime
        .validate()
        .map_err(|message| anyhow!("invalid runtime config: {message}"))?;

    if runtime.network.bearer_token.is_empty() {
        warn!("bearer token is empty; server requests will be rejected");
    }
    if runtime.network.allow_insecure_tls {
        warn!("TLS certificate validation is disabled");
    }

    let uplink = HttpUplink::new(&runtime).context("failed to build HTTP client")?;
    let mut engine = MonitorEngine::new(runtime.monitor.clone(), runtime.device_id);
    let mut sensor = SimulatedSensor::default();
    let mut alarm = LoggedAlarm::new(engine.config.alarm_frequency_hz);

    fetch_thresholds(&uplink, &mut engine).await;

    info!(
        "storage monitor started for device {} (check every {} ms, send every {} ms)",
        engine.device_id(),
        engine.config.check_interval_ms,
        engine.config.send_interval_ms
    );

    let mut interval = tokio::time::interval(Duration::from_millis(engine.config.tick_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                if engine.is_alarm_active(monotonic_ms()) {
                    info!("silencing active alarm before shutdown");
                }
                for action in engine.silence() {
                    alarm.apply(action);
                }
                info!("storage monitor stopped ({})", engine.stats());
                return Ok(());
            }
        }

        let now_ms = monotonic_ms();
        for action in engine.tick(now_ms) {
            match action {
                MonitorAction::SampleForCheck => {
                    let reading = sensor.read();
                    run_check(&mut engine, &mut alarm, reading, now_ms);
                }
                MonitorAction::SampleForSend => {
                    let reading = sensor.read();
                    run_send(&mut engine, &uplink, reading).await;
                }
                MonitorAction::AlarmOn | MonitorAction::AlarmOff => alarm.apply(action),
            }
        }
    }
}

struct HttpUplink {
    client: reqwest::Client,
    config_url: String,
    data_url: String,
    authorization: String,
}

impl HttpUplink {
    fn new(runtime: &RuntimeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(runtime.network.request_timeout_ms))
            .danger_accept_invalid_certs(runtime.network.allow_insecure_tls)
            .build()?;

        Ok(Self {
            client,
            config_url: runtime.network.device_config_url(runtime.device_id),
            data_url: runtime.network.data_url(),
            authorization: bearer_header(&runtime.network.bearer_token),
        })
    }

    async fn fetch_device_config(&self) -> Result<DeviceRecord, UplinkError> {
        let response = self
            .client
            .get(&self.config_url)
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(UplinkError::transport)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(UplinkError::transport)?;
        parse_device_config(status, &body)
    }

    async fn send_report(&self, body: String) -> Result<(), UplinkError> {
        let response = self
            .client
            .post(&self.data_url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(AUTHORIZATION, &self.authorization)
            .body(body)
            .send()
            .await
            .map_err(UplinkError::transport)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(UplinkError::transport)?;
        interpret_send_response(status, &body)
    }
}

async fn fetch_thresholds(uplink: &HttpUplink, engine: &mut MonitorEngine) {
    let record = match uplink.fetch_device_config().await {
        Ok(record) => record,
        Err(err) => {
            warn!("failed to fetch device config: {err}; thresholds unchanged");
            return;
        }
    };

    if let Some(device_id) = record.device_id.filter(|id| *id != engine.device_id()) {
        warn!(
            "config endpoint returned device {device_id}, expected {}",
            engine.device_id()
        );
    }
    if record.is_active == Some(false) {
        warn!("device is marked inactive on the server");
    }

    let thresholds = record.thresholds;
    info!(
        "device config received{}: temperature {:.2}..{:.2}°C, humidity {:.2}..{:.2}%",
        record
            .location
            .as_deref()
            .map(|location| format!(" for `{location}`"))
            .unwrap_or_default(),
        thresholds.min_temperature,
        thresholds.max_temperature,
        thresholds.min_humidity,
        thresholds.max_humidity
    );
    engine.apply_thresholds(thresholds);
}

fn run_check(engine: &mut MonitorEngine, alarm: &mut LoggedAlarm, reading: Reading, now_ms: u64) {
    let (outcome, actions) = engine.check_reading(reading, now_ms);

    match outcome {
        CheckOutcome::InvalidReading => warn!("failed to read from sensor; check skipped"),
        CheckOutcome::AwaitingThresholds => info!(
            "temperature {:.2}°C, humidity {:.2}% (no thresholds loaded, not evaluated)",
            reading.temperature, reading.humidity
        ),
        CheckOutcome::WithinBounds => info!(
            "temperature {:.2}°C, humidity {:.2}%",
            reading.temperature, reading.humidity
        ),
        CheckOutcome::Violated(violations) => {
            warn!("storage conditions violated");
            for violation in violations {
                warn!("{violation}");
            }
        }
    }

    for action in actions {
        alarm.apply(action);
    }
}

async fn run_send(engine: &mut MonitorEngine, uplink: &HttpUplink, reading: Reading) {
    let Some(payload) = engine.prepare_report(reading) else {
        warn!("invalid sensor data, skipping data send");
        return;
    };

    let result = uplink.send_report(engine.report_body(&payload)).await;
    match &result {
        Ok(()) => info!("data sent successfully"),
        Err(UplinkError::HttpStatus { status, body }) => {
            warn!("failed to send data, HTTP {status}: {body}")
        }
        Err(err) => warn!("data send failed: {err}"),
    }
    engine.record_send_result(&result);
    info!("monitor stats: {}", engine.stats());
}

/// Stand-in for the DHT22 on host builds.
#[derive(Debug, Default)]
struct SimulatedSensor {
    tick: u64,
}

impl SimulatedSensor {
    fn read(&mut self) -> Reading {
        self.tick = self.tick.saturating_add(1);
        Reading::new(
            21.0 + (self.tick % 8) as f32 * 0.5,
            48.0 + (self.tick % 6) as f32 * 1.5,
        )
    }
}

/// Stand-in for the buzzer on host builds.
#[derive(Debug)]
struct LoggedAlarm {
    frequency_hz: u32,
    sounding: bool,
}

impl LoggedAlarm {
    fn new(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            sounding: false,
        }
    }

    fn apply(&mut self, action: MonitorAction) {
        match action {
            MonitorAction::AlarmOn => {
                self.sounding = true;
                warn!("alarm on ({} Hz)", self.frequency_hz);
            }
            MonitorAction::AlarmOff if self.sounding => {
                self.sounding = false;
                info!("alarm off");
            }
            _ => {}
        }
    }
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => {
            let raw = std::fs::read(&path)
                .with_context(|| format!("failed to read config file `{path}`"))?;
            serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid config file `{path}`"))?
        }
        Err(_) => RuntimeConfig::default(),
    };

    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();
    Ok(runtime)
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("API_BASE_URL") {
        runtime.network.api_base_url = url;
    }
    if let Some(url) = lookup("DEVICE_CONFIG_URL") {
        runtime.network.device_config_url = Some(url);
    }
    if let Some(url) = lookup("DATA_URL") {
        runtime.network.data_url = Some(url);
    }
    if let Some(token) = lookup("BEARER_TOKEN") {
        runtime.network.bearer_token = token;
    }
    if let Some(device_id) = lookup("DEVICE_ID").and_then(|value| value.parse::<i32>().ok()) {
        runtime.device_id = device_id;
    }
    if let Some(flag) = lookup("ALLOW_INSECURE_TLS") {
        runtime.network.allow_insecure_tls = parse_flag(&flag);
    }
}
