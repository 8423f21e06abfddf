//! In-memory stand-ins for the platform capabilities.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    io::{self, Cursor, Read, Write},
    net::{Ipv4Addr, SocketAddrV4},
    rc::Rc,
    time::Duration,
};

use crate::{
    error::{PlatformError, TransportError},
    platform::{
        Clock, HttpResponse, HttpTransport, KeyValueStore, Platform, PortalListener,
        PortalSockets, PwmOutput, WirelessRadio,
    },
};

pub const TEST_MAC: [u8; 6] = [0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56];
pub const TEST_DEVICE_ID: &str = "24:0a:c4:12:34:56";
pub const STATION_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);
pub const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Rc<Cell<Duration>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl VirtualClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    pub fn clear_sleeps(&self) {
        self.sleeps.borrow_mut().clear();
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingPwm {
    writes: Rc<RefCell<Vec<u32>>>,
    fail_after: Rc<Cell<Option<usize>>>,
}

impl RecordingPwm {
    pub fn writes(&self) -> Vec<u32> {
        self.writes.borrow().clone()
    }

    pub fn clear(&self) {
        self.writes.borrow_mut().clear();
        self.fail_after.set(None);
    }

    /// Accept `count` more writes, then fail every write after that.
    pub fn fail_after(&self, count: usize) {
        self.fail_after.set(Some(self.writes.borrow().len() + count));
    }
}

impl PwmOutput for RecordingPwm {
    fn set_duty(&mut self, duty: u32) -> Result<(), PlatformError> {
        if let Some(limit) = self.fail_after.get() {
            if self.writes.borrow().len() >= limit {
                return Err(PlatformError::Pwm("channel stalled".to_string()));
            }
        }
        self.writes.borrow_mut().push(duty);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        store
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PlatformError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PlatformError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RadioState {
    events: Vec<String>,
    station_started: bool,
    connected: bool,
    checks: u32,
    connect_on_check: Option<u32>,
}

/// Radio whose station link comes up on a chosen status check.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRadio {
    state: Rc<RefCell<RadioState>>,
}

impl ScriptedRadio {
    pub fn connecting_on_check(check: u32) -> Self {
        let radio = Self::default();
        radio.state.borrow_mut().connect_on_check = Some(check);
        radio
    }

    pub fn never_connecting() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn checks(&self) -> u32 {
        self.state.borrow().checks
    }

    pub fn drop_link(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.connect_on_check = None;
    }

    pub fn restore_link(&self) {
        self.state.borrow_mut().connected = true;
    }
}

impl WirelessRadio for ScriptedRadio {
    fn mac_address(&self) -> Result<[u8; 6], PlatformError> {
        Ok(TEST_MAC)
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        _password: &str,
    ) -> Result<Ipv4Addr, PlatformError> {
        self.state.borrow_mut().events.push(format!("ap-start:{ssid}"));
        Ok(AP_IP)
    }

    fn stop_access_point(&mut self) -> Result<(), PlatformError> {
        self.state.borrow_mut().events.push("ap-stop".to_string());
        Ok(())
    }

    fn begin_station(&mut self, ssid: &str, password: &str) -> Result<(), PlatformError> {
        let mut state = self.state.borrow_mut();
        state.events.push(format!("sta-begin:{ssid}:{password}"));
        state.station_started = true;
        state.checks = 0;
        Ok(())
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        let mut state = self.state.borrow_mut();
        if !state.station_started {
            return None;
        }
        if !state.connected {
            state.checks += 1;
            if state.connect_on_check.is_some_and(|check| state.checks >= check) {
                state.connected = true;
            }
        }
        state.connected.then_some(STATION_IP)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Default)]
struct HttpScript {
    responses: HashMap<String, VecDeque<Result<HttpResponse, String>>>,
    requests: Vec<RecordedRequest>,
}

/// HTTP transport answering from per-path response queues. An exhausted queue
/// behaves like an unreachable server.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHttp {
    script: Rc<RefCell<HttpScript>>,
}

impl ScriptedHttp {
    pub fn respond(&self, path: &str, status: u16, body: &str) -> &Self {
        self.script
            .borrow_mut()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
        self
    }

    pub fn fail(&self, path: &str, message: &str) -> &Self {
        self.script
            .borrow_mut()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.borrow().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.script
            .borrow()
            .requests
            .iter()
            .map(|request| {
                request
                    .url
                    .rsplit_once('/')
                    .map(|(_, path)| format!("/{path}"))
                    .unwrap_or_default()
            })
            .collect()
    }
}

impl HttpTransport for ScriptedHttp {
    fn post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpResponse, TransportError> {
        let mut script = self.script.borrow_mut();
        script.requests.push(RecordedRequest {
            url: url.to_string(),
            body: serde_json::from_slice(body).unwrap_or(serde_json::Value::Null),
        });

        let next = script
            .responses
            .iter_mut()
            .find(|(path, _)| url.ends_with(path.as_str()))
            .and_then(|(_, queue)| queue.pop_front());

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError(message)),
            None => Err(TransportError("connection refused".to_string())),
        }
    }
}

pub struct MemoryStream {
    input: Cursor<Vec<u8>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SocketScript {
    pending: VecDeque<Vec<u8>>,
    responses: Vec<Rc<RefCell<Vec<u8>>>>,
    bound: Vec<SocketAddrV4>,
}

/// Serves queued raw requests one connection at a time. Once the queue is empty,
/// `accept` reports `Interrupted`, as a real listener does after shutdown.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSockets {
    script: Rc<RefCell<SocketScript>>,
}

impl ScriptedSockets {
    pub fn push_request(&self, raw: &str) -> &Self {
        self.script
            .borrow_mut()
            .pending
            .push_back(raw.as_bytes().to_vec());
        self
    }

    pub fn responses(&self) -> Vec<String> {
        self.script
            .borrow()
            .responses
            .iter()
            .map(|output| String::from_utf8_lossy(&output.borrow()).into_owned())
            .collect()
    }

    pub fn bound(&self) -> Vec<SocketAddrV4> {
        self.script.borrow().bound.clone()
    }
}

pub struct ScriptedListener {
    script: Rc<RefCell<SocketScript>>,
}

impl PortalListener for ScriptedListener {
    type Stream = MemoryStream;

    fn accept(&mut self) -> io::Result<MemoryStream> {
        let mut script = self.script.borrow_mut();
        let Some(input) = script.pending.pop_front() else {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown"));
        };
        let output = Rc::new(RefCell::new(Vec::new()));
        script.responses.push(output.clone());
        Ok(MemoryStream {
            input: Cursor::new(input),
            output,
        })
    }
}

impl PortalSockets for ScriptedSockets {
    type Listener = ScriptedListener;

    fn bind(&mut self, addr: SocketAddrV4) -> io::Result<ScriptedListener> {
        self.script.borrow_mut().bound.push(addr);
        Ok(ScriptedListener {
            script: self.script.clone(),
        })
    }
}

pub struct TestPlatform;

impl Platform for TestPlatform {
    type Radio = ScriptedRadio;
    type Pwm = RecordingPwm;
    type Http = ScriptedHttp;
    type Store = MemoryStore;
    type Sockets = ScriptedSockets;
    type Clock = VirtualClock;
}

pub fn form_post(body: &str) -> String {
    format!(
        "POST /save HTTP/1.1\r\nHost: 192.168.4.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}
