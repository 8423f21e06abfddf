use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream},
    path::PathBuf,
    str::FromStr,
    thread,
    time::Duration,
};

use anyhow::Context;
use reqwest::{blocking::Client, header::CONTENT_TYPE};
use tracing::{debug, info, warn};

use smartlock_common::{
    format_mac, retry_interrupted, Controller, CredentialStore, HttpResponse, HttpTransport,
    KeyValueStore, LockConfig, Platform, PlatformError, PlatformServices, PortalListener,
    PortalSockets, PwmOutput, ShutdownFlag, SystemClock, TransportError, WirelessRadio,
};

const DEFAULT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x10, 0xc4, 0x01];
const DEFAULT_PORTAL_PORT: u16 = 8080;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

struct HostPlatform;

impl Platform for HostPlatform {
    type Radio = SimulatedRadio;
    type Pwm = LoggingPwm;
    type Http = ReqwestTransport;
    type Store = FileStore;
    type Sockets = TcpSockets;
    type Clock = SystemClock;
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config();
    let store = FileStore::new(
        std::env::var("LOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.smartlock")),
    );

    if env_flag("LOCK_FORGET_CREDENTIALS") {
        CredentialStore::new(store.clone())
            .clear()
            .context("failed to clear stored credentials")?;
    }

    let mac = std::env::var("LOCK_DEVICE_MAC")
        .ok()
        .map(|raw| {
            parse_mac(&raw).unwrap_or_else(|| {
                warn!("ignoring malformed LOCK_DEVICE_MAC `{raw}`");
                DEFAULT_MAC
            })
        })
        .unwrap_or(DEFAULT_MAC);
    info!(
        "host lock {} syncing with {}",
        format_mac(&mac),
        config.sync.server_url
    );

    let shutdown = ShutdownFlag::new();
    let worker_shutdown = shutdown.clone();
    let worker = thread::Builder::new()
        .name("lock-controller".to_string())
        .spawn(move || -> anyhow::Result<()> {
            let services = PlatformServices::<HostPlatform> {
                radio: SimulatedRadio::new(mac),
                pwm: LoggingPwm,
                http: ReqwestTransport::new()?,
                store,
                sockets: TcpSockets::new(worker_shutdown.clone()),
                clock: SystemClock::new(),
            };
            Controller::new(config, services).run(&worker_shutdown);
            Ok(())
        })
        .context("failed to spawn controller thread")?;

    let mut done = tokio::task::spawn_blocking(move || worker.join());
    let joined = tokio::select! {
        joined = &mut done => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupt received; stopping controller");
            shutdown.request();
            done.await
        }
    };

    match joined.context("controller join task failed")? {
        Ok(result) => result,
        Err(_) => anyhow::bail!("controller thread panicked"),
    }
}

fn load_config() -> LockConfig {
    let mut config = LockConfig::default();
    config.portal.port = DEFAULT_PORTAL_PORT;

    if let Ok(url) = std::env::var("LOCK_SERVER_URL") {
        config.sync.server_url = url;
    }
    if let Some(interval) = env_parse("LOCK_POLL_INTERVAL_MS") {
        config.sync.poll_interval_ms = interval;
    }
    if let Some(period) = env_parse("LOCK_UNLOCK_PERIOD_MS") {
        config.sync.unlock_period_ms = period;
    }
    if let Some(port) = env_parse("LOCK_PORTAL_PORT") {
        config.portal.port = port;
    }

    config.sanitize();
    config
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_mac(raw: &str) -> Option<[u8; 6]> {
    let mut mac = [0_u8; 6];
    let mut parts = raw.trim().split(':');
    for byte in &mut mac {
        let part = parts.next().filter(|part| part.len() == 2)?;
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

/// One JSON file per key under the data directory.
#[derive(Debug, Clone)]
struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PlatformError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PlatformError> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Stands in for the WiFi radio: the host network is always reachable, and the
/// access point is the loopback interface.
struct SimulatedRadio {
    mac: [u8; 6],
    station: Option<String>,
}

impl SimulatedRadio {
    fn new(mac: [u8; 6]) -> Self {
        Self { mac, station: None }
    }
}

impl WirelessRadio for SimulatedRadio {
    fn mac_address(&self) -> Result<[u8; 6], PlatformError> {
        Ok(self.mac)
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        _password: &str,
    ) -> Result<Ipv4Addr, PlatformError> {
        info!("simulated access point `{ssid}` on {}", Ipv4Addr::LOCALHOST);
        self.station = None;
        Ok(Ipv4Addr::LOCALHOST)
    }

    fn stop_access_point(&mut self) -> Result<(), PlatformError> {
        info!("simulated access point stopped");
        Ok(())
    }

    fn begin_station(&mut self, ssid: &str, _password: &str) -> Result<(), PlatformError> {
        info!("simulated station joining `{ssid}`");
        self.station = Some(ssid.to_string());
        Ok(())
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        self.station.as_ref().map(|_| Ipv4Addr::LOCALHOST)
    }
}

struct LoggingPwm;

impl PwmOutput for LoggingPwm {
    fn set_duty(&mut self, duty: u32) -> Result<(), PlatformError> {
        debug!("servo duty {duty}");
        Ok(())
    }
}

struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|err| TransportError(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

struct TcpSockets {
    shutdown: ShutdownFlag,
}

impl TcpSockets {
    fn new(shutdown: ShutdownFlag) -> Self {
        Self { shutdown }
    }
}

impl PortalSockets for TcpSockets {
    type Listener = TcpPortalListener;

    fn bind(&mut self, addr: SocketAddrV4) -> std::io::Result<TcpPortalListener> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("setup portal on http://{}", listener.local_addr()?);
        Ok(TcpPortalListener {
            listener,
            shutdown: self.shutdown.clone(),
        })
    }
}

/// Non-blocking accept loop so a shutdown request is seen within `ACCEPT_POLL`.
struct TcpPortalListener {
    listener: TcpListener,
    shutdown: ShutdownFlag,
}

impl PortalListener for TcpPortalListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> std::io::Result<TcpStream> {
        loop {
            if self.shutdown.is_requested() {
                return Err(std::io::Error::new(ErrorKind::Interrupted, "shutdown requested"));
            }
            match retry_interrupted(|| self.listener.accept()) {
                Ok((stream, peer)) => {
                    debug!("portal connection from {peer}");
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
                    return Ok(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        sync::{Arc, Mutex},
    };

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use smartlock_common::{
        Credentials, DeviceIdentity, PollOutcome, RemoteSyncClient, StoredCredentials,
    };

    use super::*;

    const KNOWN_DEVICE: &str = "02:00:00:10:c4:01";

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn add_device(State(seen): State<Seen>, Json(body): Json<Value>) -> StatusCode {
        seen.lock().unwrap().push(body);
        StatusCode::CREATED
    }

    async fn get_status(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if body["device_id"] == KNOWN_DEVICE {
            (StatusCode::OK, Json(json!({ "status": true })))
        } else {
            (
                StatusCode::from_u16(407).unwrap(),
                Json(json!({ "error": "unknown device" })),
            )
        }
    }

    async fn spawn_server() -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/add_device", post(add_device))
            .route("/get_status", post(get_status))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), seen)
    }

    fn identity(device_id: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_id: device_id.to_string(),
            current_ip: Some(Ipv4Addr::LOCALHOST),
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("smartlock-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn registers_and_polls_against_http_server() {
        let (base, seen) = spawn_server().await;

        let (registered, known, unknown) = tokio::task::spawn_blocking(move || {
            let mut client = RemoteSyncClient::new(ReqwestTransport::new().unwrap(), &base);
            (
                client.register(&identity(KNOWN_DEVICE), "alice", true),
                client.poll_status(&identity(KNOWN_DEVICE)),
                client.poll_status(&identity("aa:bb:cc:dd:ee:ff")),
            )
        })
        .await
        .unwrap();

        assert!(registered);
        assert_eq!(known, PollOutcome::Synced(true));
        assert_eq!(unknown, PollOutcome::NotRegistered);
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![json!({
                "device_id": KNOWN_DEVICE,
                "name": "Lock: 02:00:00:10:c4:01",
                "username": "alice",
                "ip_address": "127.0.0.1",
                "locked": true,
            })]
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut client = RemoteSyncClient::new(
                ReqwestTransport::new().unwrap(),
                &format!("http://127.0.0.1:{port}"),
            );
            client.poll_status(&identity(KNOWN_DEVICE))
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::TransientFailure);
    }

    #[test]
    fn file_store_round_trips_credentials() {
        let dir = scratch_dir("credentials");
        let mut store = CredentialStore::new(FileStore::new(dir.clone()));
        assert_eq!(store.load().unwrap(), StoredCredentials::Missing);

        let credentials = Credentials {
            network_id: "home".to_string(),
            network_secret: "h@me".to_string(),
            owner_id: "alice".to_string(),
        };
        store.save(&credentials).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.join("wifi_config.json")).unwrap(),
            r#"{"ssid":"home","password":"h@me","username":"alice"}"#
        );
        assert_eq!(store.load().unwrap(), StoredCredentials::Valid(credentials));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), StoredCredentials::Missing);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn parses_colon_separated_mac() {
        assert_eq!(
            parse_mac("24:0A:c4:12:34:56"),
            Some([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56])
        );
        assert_eq!(parse_mac("24:0a:c4:12:34"), None);
        assert_eq!(parse_mac("24:0a:c4:12:34:56:78"), None);
        assert_eq!(parse_mac("24:0a:c4:12:34:zz"), None);
        assert_eq!(parse_mac("240ac4123456"), None);
    }

    #[test]
    fn portal_listener_serves_connections_until_shutdown() {
        let shutdown = ShutdownFlag::new();
        let mut sockets = TcpSockets::new(shutdown.clone());
        let mut listener = sockets
            .bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .unwrap();
        let addr = listener.listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
        });

        let mut stream = listener.accept().unwrap();
        let mut received = [0_u8; 4];
        stream.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"ping");
        client.join().unwrap();

        shutdown.request();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
    }

    #[test]
    fn simulated_radio_reports_address_only_after_joining() {
        let mut radio = SimulatedRadio::new(DEFAULT_MAC);
        assert_eq!(radio.station_ip(), None);

        radio.begin_station("home", "secret").unwrap();
        assert_eq!(radio.station_ip(), Some(Ipv4Addr::LOCALHOST));

        radio.start_access_point("ESP32-Setup", "12345678").unwrap();
        assert_eq!(radio.station_ip(), None);
    }
}
