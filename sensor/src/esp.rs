use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use dht_sensor::dht22;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use storage_monitor_common::{
    bearer_header, config::NetworkConfig, interpret_send_response, parse_device_config,
    parse_flag, CheckOutcome, DeviceRecord, MonitorAction, MonitorEngine, ReadCache, Reading,
    RuntimeConfig, UplinkError, CONTENT_TYPE_JSON, DHT22_MIN_READ_INTERVAL_MS,
    HEADER_AUTHORIZATION, HEADER_CONTENT_TYPE,
};

use crate::monotonic_ms;

const DHT22_PIN: i32 = 33;
const BUZZER_PIN: i32 = 12;

const MAX_HTTP_BODY: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

struct Dht22Sensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    cache: ReadCache,
}

impl Dht22Sensor {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        Ok(Self {
            pin,
            delay: Ets,
            cache: ReadCache::new(DHT22_MIN_READ_INTERVAL_MS),
        })
    }

    /// Check and send may both sample within one loop pass; the second read
    /// gets the cached conversion.
    fn read(&mut self) -> Reading {
        let Self { pin, delay, cache } = self;
        cache.read_with(monotonic_ms(), || read_dht22(pin, delay))
    }
}

fn read_dht22(pin: &mut PinDriver<'static, AnyIOPin, InputOutput>, delay: &mut Ets) -> Reading {
    if let Err(err) = pin.set_high() {
        warn!("failed to set DHT22 line high before read: {err:?}");
        return Reading::invalid();
    }

    match dht22::blocking::read(delay, pin) {
        Ok(reading) => Reading::new(reading.temperature, reading.relative_humidity),
        Err(err) => {
            warn!("failed to read DHT22 on GPIO{}: {err:?}", DHT22_PIN);
            Reading::invalid()
        }
    }
}

/// Piezo buzzer on an LEDC channel. The tone frequency is fixed by the timer
/// configuration; on/off toggles a 50 % duty cycle.
struct Buzzer {
    channel: LedcDriver<'static>,
    sounding: bool,
}

impl Buzzer {
    fn new(mut channel: LedcDriver<'static>) -> anyhow::Result<Self> {
        channel.set_duty(0)?;
        Ok(Self {
            channel,
            sounding: false,
        })
    }

    fn apply(&mut self, action: MonitorAction) {
        let (duty, sounding) = match action {
            MonitorAction::AlarmOn => {
                info!("alarm on (GPIO{BUZZER_PIN})");
                (self.channel.get_max_duty() / 2, true)
            }
            MonitorAction::AlarmOff if self.sounding => {
                info!("alarm off");
                (0, false)
            }
            _ => return,
        };

        match self.channel.set_duty(duty) {
            Ok(()) => self.sounding = sounding,
            Err(err) => warn!("failed to drive buzzer: {err:?}"),
        }
    }
}

/// Single HTTP client reused for the config fetch and every upload.
struct EspUplink {
    client: HttpClient<EspHttpConnection>,
    config_url: String,
    data_url: String,
    authorization: String,
}

impl EspUplink {
    fn new(runtime: &RuntimeConfig) -> anyhow::Result<Self> {
        let crt_bundle_attach = if runtime.network.allow_insecure_tls {
            None
        } else {
            Some(esp_idf_svc::sys::esp_crt_bundle_attach as _)
        };

        let conf = HttpClientConfiguration {
            timeout: Some(Duration::from_millis(runtime.network.request_timeout_ms)),
            crt_bundle_attach,
            ..Default::default()
        };

        Ok(Self {
            client: HttpClient::wrap(EspHttpConnection::new(&conf)?),
            config_url: runtime.network.device_config_url(runtime.device_id),
            data_url: runtime.network.data_url(),
            authorization: bearer_header(&runtime.network.bearer_token),
        })
    }

    fn fetch_device_config(&mut self) -> Result<DeviceRecord, UplinkError> {
        if !is_wifi_station_connected() {
            return Err(UplinkError::LinkDown);
        }

        let headers = [(HEADER_AUTHORIZATION, self.authorization.as_str())];
        let request = self
            .client
            .request(Method::Get, &self.config_url, &headers)
            .map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;

        let status = response.status();
        let body = read_body(&mut response)?;
        parse_device_config(status, &body)
    }

    fn send_report(&mut self, body: &str) -> Result<(), UplinkError> {
        if !is_wifi_station_connected() {
            return Err(UplinkError::LinkDown);
        }

        let content_length = body.len().to_string();
        let headers = [
            (HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON),
            (HEADER_AUTHORIZATION, self.authorization.as_str()),
            ("Content-Length", content_length.as_str()),
        ];

        let mut request = self
            .client
            .post(&self.data_url, &headers)
            .map_err(transport_error)?;
        request
            .write_all(body.as_bytes())
            .map_err(transport_error)?;
        request.flush().map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;

        let status = response.status();
        let body = read_body(&mut response)?;
        interpret_send_response(status, &body)
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let runtime = build_runtime_config();
    runtime
        .validate()
        .map_err(|message| anyhow!("invalid runtime config: {message}"))?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem, pins, ledc, ..
    } = Peripherals::take()?;

    let mut engine = MonitorEngine::new(runtime.monitor.clone(), runtime.device_id);

    let mut sensor =
        Dht22Sensor::new(pins.gpio33.downgrade()).context("failed to initialize DHT22")?;

    // The timer must outlive the channel; `run` never returns.
    let buzzer_timer = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig {
            frequency: Hertz(engine.config.alarm_frequency_hz),
            resolution: Resolution::Bits8,
            ..Default::default()
        },
    )
    .context("failed to configure buzzer timer")?;
    let channel = LedcDriver::new(ledc.channel0, &buzzer_timer, pins.gpio12)
        .context("failed to attach buzzer")?;
    let mut buzzer = Buzzer::new(channel)?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    if runtime.network.allow_insecure_tls {
        warn!("TLS certificate validation is disabled");
    }

    let mut uplink = EspUplink::new(&runtime).context("failed to create HTTP client")?;

    fetch_thresholds(&mut uplink, &mut engine);

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    info!(
        "storage monitor started for device {} (check every {} ms, send every {} ms)",
        engine.device_id(),
        engine.config.check_interval_ms,
        engine.config.send_interval_ms
    );

    // Keep the wifi driver alive for the program lifetime.
    let _wifi = wifi;
    let tick = Duration::from_millis(engine.config.tick_interval_ms);

    loop {
        feed_watchdog();

        let now_ms = monotonic_ms();
        for action in engine.tick(now_ms) {
            match action {
                MonitorAction::SampleForCheck => {
                    let reading = sensor.read();
                    run_check(&mut engine, &mut buzzer, reading, now_ms);
                }
                MonitorAction::SampleForSend => {
                    let reading = sensor.read();
                    run_send(&mut engine, &mut uplink, reading);
                }
                MonitorAction::AlarmOn | MonitorAction::AlarmOff => buzzer.apply(action),
            }
        }

        thread::sleep(tick);
    }
}

fn fetch_thresholds(uplink: &mut EspUplink, engine: &mut MonitorEngine) {
    let record = match uplink.fetch_device_config() {
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
        "device config received: temperature {:.2}..{:.2}°C, humidity {:.2}..{:.2}%",
        thresholds.min_temperature,
        thresholds.max_temperature,
        thresholds.min_humidity,
        thresholds.max_humidity
    );
    engine.apply_thresholds(thresholds);
}

fn run_check(engine: &mut MonitorEngine, buzzer: &mut Buzzer, reading: Reading, now_ms: u64) {
    let (outcome, actions) = engine.check_reading(reading, now_ms);

    match outcome {
        CheckOutcome::InvalidReading => warn!("failed to read from DHT22; check skipped"),
        CheckOutcome::AwaitingThresholds => info!(
            "temperature {:.2}°C, humidity {:.2}% (no thresholds loaded)",
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
        buzzer.apply(action);
    }
}

fn run_send(engine: &mut MonitorEngine, uplink: &mut EspUplink, reading: Reading) {
    let Some(payload) = engine.prepare_report(reading) else {
        warn!("invalid sensor data, skipping data send");
        return;
    };

    let result = uplink.send_report(&engine.report_body(&payload));
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

fn read_body<R: Read>(reader: &mut R) -> Result<Vec<u8>, UplinkError> {
    let mut body = Vec::new();
    let mut chunk = [0_u8; 512];

    while body.len() < MAX_HTTP_BODY {
        let read = reader.read(&mut chunk).map_err(transport_error)?;
        if read == 0 {
            break;
        }
        let remaining = MAX_HTTP_BODY - body.len();
        body.extend_from_slice(&chunk[..read.min(remaining)]);
    }

    Ok(body)
}

fn transport_error(err: impl core::fmt::Debug) -> UplinkError {
    UplinkError::Transport(format!("{err:?}"))
}

fn build_runtime_config() -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();

    runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();

    if let Some(url) = option_env!("API_BASE_URL") {
        runtime.network.api_base_url = url.to_string();
    }
    if let Some(token) = option_env!("BEARER_TOKEN") {
        runtime.network.bearer_token = token.to_string();
    }
    if let Some(device_id) = option_env!("DEVICE_ID").and_then(|value| value.parse().ok()) {
        runtime.device_id = device_id;
    }
    runtime.network.allow_insecure_tls =
        option_env!("ALLOW_INSECURE_TLS").is_some_and(parse_flag);

    runtime.sanitize();
    runtime
}

fn has_station_credentials(network: &NetworkConfig) -> bool {
    let ssid = network.wifi_ssid.trim();
    !ssid.is_empty() && ssid != "CHANGE_ME"
}

/// Connects the station interface. When every attempt fails the driver is
/// still returned so the node keeps sampling and alarming offline.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if !has_station_credentials(network) {
        warn!("wifi credentials missing; running offline");
        return Ok(esp_wifi);
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        let result = wifi.connect().and_then(|()| wifi.wait_netif_up());
        match result {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                return Ok(esp_wifi);
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; running offline");
    Ok(esp_wifi)
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}
