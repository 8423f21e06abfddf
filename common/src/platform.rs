//! Capability interfaces the lock core consumes.
//!
//! Each target (ESP-IDF firmware, host simulation, unit tests) provides its own
//! implementations; nothing in the core talks to a driver directly.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::error::{PlatformError, TransportError};

pub trait WirelessRadio {
    /// Hardware address of the station interface.
    fn mac_address(&self) -> Result<[u8; 6], PlatformError>;

    /// Switch to access-point mode and return the address the AP serves on.
    fn start_access_point(&mut self, ssid: &str, password: &str)
        -> Result<Ipv4Addr, PlatformError>;

    fn stop_access_point(&mut self) -> Result<(), PlatformError>;

    /// Activate station mode and start associating. Does not wait for the link.
    fn begin_station(&mut self, ssid: &str, password: &str) -> Result<(), PlatformError>;

    /// Assigned address while associated, `None` otherwise.
    fn station_ip(&self) -> Option<Ipv4Addr>;
}

pub trait PwmOutput {
    fn set_duty(&mut self, duty: u32) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait HttpTransport {
    /// POST `body` as `application/json`. Any HTTP status is a successful exchange;
    /// only network-level failures are errors.
    fn post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpResponse, TransportError>;
}

/// Small keyed record storage (NVS namespace, data directory, ...).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PlatformError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PlatformError>;
    fn remove(&mut self, key: &str) -> Result<(), PlatformError>;
}

pub trait PortalListener {
    type Stream: Read + Write;

    /// Block until the next client connects. Implementations return
    /// `ErrorKind::Interrupted` once shutdown has been requested.
    fn accept(&mut self) -> io::Result<Self::Stream>;
}

/// Repeat `op` while it fails with `ErrorKind::Interrupted`. Listeners use this
/// so a stray EINTR from the socket is not mistaken for a shutdown request.
pub fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

pub trait PortalSockets {
    type Listener: PortalListener;

    fn bind(&mut self, addr: SocketAddrV4) -> io::Result<Self::Listener>;
}

/// Monotonic time source. Blocking sleeps go through here so tests can run the
/// controller against a virtual clock.
pub trait Clock: Clone {
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Set once by the process interrupt handler; never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bundle of capability types for one target.
pub trait Platform {
    type Radio: WirelessRadio;
    type Pwm: PwmOutput;
    type Http: HttpTransport;
    type Store: KeyValueStore;
    type Sockets: PortalSockets;
    type Clock: Clock;
}

pub struct PlatformServices<P: Platform> {
    pub radio: P::Radio,
    pub pwm: P::Pwm,
    pub http: P::Http,
    pub store: P::Store,
    pub sockets: P::Sockets,
    pub clock: P::Clock,
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
