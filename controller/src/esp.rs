use std::{
    net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream},
    time::Duration,
};

use anyhow::Context;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::AnyOutputPin,
        ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution, LEDC},
        prelude::Peripherals,
        units::Hertz,
    },
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use smartlock_common::{
    retry_interrupted, Controller, HttpResponse, HttpTransport, KeyValueStore, LockConfig,
    Platform, PlatformError, PlatformServices, PortalListener, PortalSockets, PwmOutput,
    ServoConfig, ShutdownFlag, SystemClock, TransportError, WirelessRadio,
};

const NVS_NAMESPACE: &str = "smartlock";
const NVS_VALUE_BYTES: usize = 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_BODY_LIMIT: usize = 4096;
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

struct EspPlatform;

impl Platform for EspPlatform {
    type Radio = EspRadio;
    type Pwm = LedcServoPwm;
    type Http = EspHttpTransport;
    type Store = NvsStore;
    type Sockets = StdSockets;
    type Clock = SystemClock;
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = build_config();
    info!(
        "lock firmware starting; server `{}`, servo on GPIO{}",
        config.sync.server_url, config.servo.pin
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, ledc, .. } = Peripherals::take()?;

    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition.clone()))
        .context("failed to create wifi driver")?;
    let wifi = BlockingWifi::wrap(esp_wifi, sys_loop).context("failed to wrap wifi driver")?;
    let pwm = init_servo_pwm(ledc, &config.servo).context("failed to initialize servo PWM")?;

    let services = PlatformServices::<EspPlatform> {
        radio: EspRadio { wifi },
        pwm,
        http: EspHttpTransport,
        store: NvsStore {
            partition: nvs_partition,
        },
        sockets: StdSockets,
        clock: SystemClock::new(),
    };

    // Nothing requests shutdown on the device; the controller runs until reset.
    let shutdown = ShutdownFlag::new();
    Controller::new(config, services).run(&shutdown);
    Ok(())
}

fn build_config() -> LockConfig {
    let mut config = LockConfig::default();
    if let Some(url) = option_env!("LOCK_SERVER_URL") {
        config.sync.server_url = url.to_string();
    }
    config.sanitize();
    config
}

fn init_servo_pwm(ledc: LEDC, servo: &ServoConfig) -> anyhow::Result<LedcServoPwm> {
    let timer = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default()
            .frequency(Hertz(servo.frequency_hz))
            .resolution(Resolution::Bits10),
    )?;
    let driver = LedcDriver::new(ledc.channel0, timer, unsafe {
        AnyOutputPin::new(servo.pin)
    })?;
    info!(
        "servo PWM on GPIO{} @ {}Hz, max duty {}",
        servo.pin,
        servo.frequency_hz,
        driver.get_max_duty()
    );
    Ok(LedcServoPwm { driver })
}

fn radio_error(err: impl core::fmt::Debug) -> PlatformError {
    PlatformError::Radio(format!("{err:?}"))
}

fn transport_error(err: impl core::fmt::Debug) -> TransportError {
    TransportError(format!("{err:?}"))
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl EspRadio {
    fn restart_with(&mut self, configuration: &Configuration) -> Result<(), PlatformError> {
        if self.wifi.is_started().map_err(radio_error)? {
            self.wifi.stop().map_err(radio_error)?;
        }
        self.wifi
            .set_configuration(configuration)
            .map_err(radio_error)?;
        self.wifi.start().map_err(radio_error)
    }
}

impl WirelessRadio for EspRadio {
    fn mac_address(&self) -> Result<[u8; 6], PlatformError> {
        self.wifi.wifi().sta_netif().get_mac().map_err(radio_error)
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> Result<Ipv4Addr, PlatformError> {
        self.restart_with(&Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| PlatformError::Radio("access point SSID too long".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| PlatformError::Radio("access point password too long".to_string()))?,
            auth_method: AuthMethod::WPA2Personal,
            channel: 1,
            ..Default::default()
        }))?;
        self.wifi.wait_netif_up().map_err(radio_error)?;

        let ip = self
            .wifi
            .wifi()
            .ap_netif()
            .get_ip_info()
            .map_err(radio_error)?
            .ip;
        info!("provisioning AP `{ssid}` started on {ip}");
        Ok(ip)
    }

    fn stop_access_point(&mut self) -> Result<(), PlatformError> {
        self.wifi.stop().map_err(radio_error)
    }

    fn begin_station(&mut self, ssid: &str, password: &str) -> Result<(), PlatformError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        self.restart_with(&Configuration::Client(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| PlatformError::Radio("wifi ssid too long".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| PlatformError::Radio("wifi password too long".to_string()))?,
            auth_method,
            ..Default::default()
        }))?;

        // Non-blocking: association completes in the background.
        self.wifi.wifi_mut().connect().map_err(radio_error)?;
        info!("wifi started, connecting to `{ssid}`");
        Ok(())
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        if !self.wifi.is_connected().unwrap_or(false) {
            return None;
        }
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }
}

struct LedcServoPwm {
    driver: LedcDriver<'static>,
}

impl PwmOutput for LedcServoPwm {
    fn set_duty(&mut self, duty: u32) -> Result<(), PlatformError> {
        self.driver
            .set_duty(duty)
            .map_err(|err| PlatformError::Pwm(format!("{err:?}")))
    }
}

/// Opens a fresh connection per request; the lock talks to the server every few
/// seconds at most.
struct EspHttpTransport;

impl HttpTransport for EspHttpTransport {
    fn post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpResponse, TransportError> {
        let connection = EspHttpConnection::new(&HttpClientConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            ..Default::default()
        })
        .map_err(transport_error)?;
        let mut client = HttpClient::wrap(connection);

        let length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/json"),
            ("Content-Length", length.as_str()),
        ];
        let mut request = client
            .request(Method::Post, url, &headers)
            .map_err(transport_error)?;
        request.write_all(body).map_err(transport_error)?;
        request.flush().map_err(transport_error)?;

        let mut response = request.submit().map_err(transport_error)?;
        let status = response.status();

        let mut received = Vec::new();
        let mut chunk = [0_u8; 256];
        loop {
            let read = response.read(&mut chunk).map_err(transport_error)?;
            if read == 0 {
                break;
            }
            if received.len() + read > HTTP_BODY_LIMIT {
                warn!("response from {url} truncated at {HTTP_BODY_LIMIT} bytes");
                break;
            }
            received.extend_from_slice(&chunk[..read]);
        }

        Ok(HttpResponse {
            status,
            body: received,
        })
    }
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn open(&self) -> Result<EspNvs<esp_idf_svc::nvs::NvsDefault>, PlatformError> {
        EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .map_err(|err| PlatformError::Storage(format!("{err:?}")))
    }
}

impl KeyValueStore for NvsStore {
    fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        let nvs = self.open()?;
        let mut buffer = vec![0_u8; NVS_VALUE_BYTES];
        let value = nvs
            .get_str(key, &mut buffer)
            .map_err(|err| PlatformError::Storage(format!("{err:?}")))?;
        Ok(value.map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PlatformError> {
        self.open()?
            .set_str(key, value)
            .map_err(|err| PlatformError::Storage(format!("{err:?}")))
    }

    fn remove(&mut self, key: &str) -> Result<(), PlatformError> {
        self.open()?
            .remove(key)
            .map(|_| ())
            .map_err(|err| PlatformError::Storage(format!("{err:?}")))
    }
}

struct StdSockets;

impl PortalSockets for StdSockets {
    type Listener = StdPortalListener;

    fn bind(&mut self, addr: SocketAddrV4) -> std::io::Result<StdPortalListener> {
        let listener = TcpListener::bind(addr)?;
        info!("setup portal listening on http://{addr}");
        Ok(StdPortalListener { listener })
    }
}

struct StdPortalListener {
    listener: TcpListener,
}

impl PortalListener for StdPortalListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> std::io::Result<TcpStream> {
        // Nothing requests shutdown on the device, so EINTR is always spurious here.
        let (stream, peer) = retry_interrupted(|| self.listener.accept())?;
        info!("portal client {peer}");
        stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
        Ok(stream)
    }
}
