//! Device lifecycle: provisioning fallback, station connect, and the periodic
//! status sync that drives the lock.
//!
//! ```text
//! Boot          -> Provisioning | Connecting
//! Provisioning  -> Connecting
//! Connecting    -> Syncing | Provisioning
//! Syncing       -> Syncing | Connecting
//! ```

use std::{ops::ControlFlow, time::Duration};

use log::{debug, info, warn};

use crate::{
    config::LockConfig,
    credentials::{CredentialStore, StoredCredentials},
    error::PortalError,
    network::NetworkConnector,
    platform::{format_mac, Clock, Platform, PlatformServices, ShutdownFlag, WirelessRadio},
    portal::ProvisioningPortal,
    servo::ServoActuator,
    sync::RemoteSyncClient,
    types::{DeviceIdentity, Phase, PollOutcome, SyncState},
};

/// Upper bound for a single sleep while waiting, so shutdown is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

pub struct Controller<P: Platform> {
    config: LockConfig,
    phase: Phase,
    state: SyncState,
    identity: Option<DeviceIdentity>,
    radio: P::Radio,
    sockets: P::Sockets,
    clock: P::Clock,
    credentials: CredentialStore<P::Store>,
    servo: ServoActuator<P::Pwm, P::Clock>,
    sync: RemoteSyncClient<P::Http>,
    portal: ProvisioningPortal,
    connector: NetworkConnector<P::Clock>,
    next_poll: Duration,
    link_lost_since: Option<Duration>,
}

impl<P: Platform> Controller<P> {
    pub fn new(mut config: LockConfig, services: PlatformServices<P>) -> Self {
        config.sanitize();
        let PlatformServices {
            radio,
            pwm,
            http,
            store,
            sockets,
            clock,
        } = services;

        Self {
            servo: ServoActuator::new(pwm, clock.clone(), &config.servo),
            sync: RemoteSyncClient::new(http, &config.sync.server_url),
            portal: ProvisioningPortal::new(config.portal.clone()),
            connector: NetworkConnector::new(clock.clone()),
            credentials: CredentialStore::new(store),
            phase: Phase::Boot,
            state: SyncState::default(),
            identity: None,
            next_poll: Duration::ZERO,
            link_lost_since: None,
            radio,
            sockets,
            clock,
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Drive the state machine until shutdown, then park the servo.
    pub fn run(&mut self, shutdown: &ShutdownFlag) {
        info!("lock controller starting");
        while !shutdown.is_requested() {
            if self.step(shutdown).is_break() {
                break;
            }
        }

        info!("shutting down; parking servo");
        if let Err(err) = self.servo.park() {
            warn!("failed to park servo: {err}");
        }
    }

    /// Perform the work of the current phase once.
    pub fn step(&mut self, shutdown: &ShutdownFlag) -> ControlFlow<()> {
        match self.phase {
            Phase::Boot => self.boot(),
            Phase::Provisioning => return self.provision(shutdown),
            Phase::Connecting => self.connect(shutdown),
            Phase::Syncing => {
                if self.wait_until(self.next_poll, shutdown) {
                    self.tick();
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// One sync round: connectivity check, registration if needed, status poll.
    pub fn tick(&mut self) {
        if !self.check_link() {
            return;
        }

        if !self.state.registered {
            self.register();
        }

        if let Some(identity) = self.identity.clone() {
            let outcome = self.sync.poll_status(&identity);
            self.apply(outcome);
        }

        self.next_poll =
            self.clock.now() + Duration::from_millis(self.config.sync.poll_interval_ms);
    }

    /// Open, hold, and close again. Blocks for the whole sequence.
    pub fn unlock_sequence(&mut self) {
        let servo = &self.config.servo;
        info!(
            "unlocking for {} ms (open {} deg, closed {} deg)",
            self.config.sync.unlock_period_ms, servo.open_angle, servo.closed_angle
        );

        if let Err(err) = self.servo.set_angle(servo.open_angle, servo.speed) {
            warn!("unlock move failed: {err}");
        }
        self.clock.sleep(Duration::from_millis(self.config.sync.unlock_period_ms));
        if let Err(err) = self.servo.set_angle(servo.closed_angle, servo.speed) {
            warn!("re-lock move failed: {err}");
        }
        info!("lock closed again");
    }

    fn boot(&mut self) {
        match self.credentials.load() {
            Ok(StoredCredentials::Valid(credentials)) => {
                self.state.owner_id = Some(credentials.owner_id);
                self.enter(Phase::Connecting);
            }
            Ok(StoredCredentials::Missing) => {
                info!("no stored credentials");
                self.enter(Phase::Provisioning);
            }
            Ok(StoredCredentials::Invalid) => {
                warn!("stored credentials are invalid");
                self.enter(Phase::Provisioning);
            }
            Err(err) => {
                warn!("failed to read stored credentials: {err}");
                self.enter(Phase::Provisioning);
            }
        }
    }

    fn provision(&mut self, shutdown: &ShutdownFlag) -> ControlFlow<()> {
        match self.portal.run(
            &mut self.radio,
            &mut self.sockets,
            &mut self.credentials,
            shutdown,
        ) {
            Ok(credentials) => {
                self.state.owner_id = Some(credentials.owner_id);
                self.enter(Phase::Connecting);
            }
            Err(PortalError::Interrupted) => {
                info!("provisioning interrupted");
                return ControlFlow::Break(());
            }
            Err(err) => {
                warn!("provisioning portal failed: {err}");
                self.pause(shutdown);
            }
        }
        ControlFlow::Continue(())
    }

    fn connect(&mut self, shutdown: &ShutdownFlag) {
        let connection = match self.connector.connect(&mut self.radio, &self.credentials) {
            Ok(connection) => connection,
            Err(err) => {
                warn!("wifi connect failed: {err}");
                self.enter(Phase::Provisioning);
                return;
            }
        };

        let mac = match self.radio.mac_address() {
            Ok(mac) => mac,
            Err(err) => {
                warn!("failed to read station MAC: {err}");
                self.pause(shutdown);
                return;
            }
        };

        self.identity = Some(DeviceIdentity {
            device_id: format_mac(&mac),
            current_ip: Some(connection.ip),
        });
        self.state.owner_id = Some(connection.owner_id);
        self.state.registered = false;
        self.register();

        self.link_lost_since = None;
        self.next_poll = self.clock.now();
        self.enter(Phase::Syncing);
    }

    /// Returns false when the link has been gone long enough to reconnect.
    fn check_link(&mut self) -> bool {
        let now = self.clock.now();
        match self.radio.station_ip() {
            Some(ip) => {
                if let Some(since) = self.link_lost_since.take() {
                    info!("wifi link restored after {} ms", (now - since).as_millis());
                }
                if let Some(identity) = self.identity.as_mut() {
                    if identity.current_ip != Some(ip) {
                        info!("station address is now {ip}");
                        identity.current_ip = Some(ip);
                    }
                }
                true
            }
            None => {
                let since = *self.link_lost_since.get_or_insert(now);
                let grace = Duration::from_millis(self.config.sync.reconnect_grace_ms);
                if now - since >= grace {
                    warn!(
                        "wifi link down for {} ms; reconnecting",
                        (now - since).as_millis()
                    );
                    self.link_lost_since = None;
                    self.enter(Phase::Connecting);
                    return false;
                }
                debug!("wifi link down");
                true
            }
        }
    }

    fn register(&mut self) {
        let (Some(identity), Some(owner_id)) = (&self.identity, &self.state.owner_id) else {
            return;
        };
        self.state.registered = self.sync.register(identity, owner_id, self.state.locked);
    }

    fn apply(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Synced(status) => {
                let was_locked = self.state.locked;
                self.state.locked = !status;
                if was_locked && !self.state.locked {
                    self.unlock_sequence();
                } else if !was_locked && self.state.locked {
                    info!("server cleared unlock request");
                }
            }
            PollOutcome::NotRegistered => {
                warn!("server does not know this lock; will register again");
                self.state.registered = false;
            }
            PollOutcome::ServerError(code) => {
                warn!("status poll failed with HTTP {code}; registering again");
                self.register();
            }
            PollOutcome::InvalidResponse | PollOutcome::TransientFailure => {
                warn!("status poll: {}", outcome.as_str());
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!("phase {} -> {}", self.phase.as_str(), phase.as_str());
        self.phase = phase;
    }

    fn pause(&self, shutdown: &ShutdownFlag) {
        let deadline =
            self.clock.now() + Duration::from_millis(self.config.sync.provisioning_retry_ms);
        self.wait_until(deadline, shutdown);
    }

    /// Sleep in slices until `deadline`. Returns false if shutdown cut the wait short.
    fn wait_until(&self, deadline: Duration, shutdown: &ShutdownFlag) -> bool {
        loop {
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            if shutdown.is_requested() {
                return false;
            }
            self.clock.sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}
