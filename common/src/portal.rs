use std::{
    io::{ErrorKind, Read, Write},
    net::SocketAddrV4,
};

use log::{info, warn};

use crate::{
    config::{Credentials, PortalConfig},
    credentials::CredentialStore,
    endpoints::PORTAL_SAVE_PATH,
    error::{PortalError, RequestError},
    http::{parse_form, percent_decode, write_response, HttpRequest},
    platform::{KeyValueStore, PortalListener, PortalSockets, ShutdownFlag, WirelessRadio},
};

const SAVED_MESSAGE: &str = "Credentials saved. You can now close this page.";

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta name="viewport" content="width=device-width, initial-scale=1"><title>Smart Lock Setup</title></head>
<body>
<h1>Smart Lock Setup</h1>
<form action="/save" method="post">
<label>Account <input name="username" type="text"></label><br>
<label>Network <input name="ssid" type="text"></label><br>
<label>Password <input name="password" type="password"></label><br>
<input type="submit" value="Save">
</form>
</body>
</html>
"#;

/// Captive setup page served from the device's own access point.
pub struct ProvisioningPortal {
    config: PortalConfig,
}

enum Handled {
    Saved(Credentials),
    Served,
}

impl ProvisioningPortal {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    /// Serve the setup form until a valid submission has been persisted.
    ///
    /// The access point is torn down on every exit path.
    pub fn run<R, S, K>(
        &self,
        radio: &mut R,
        sockets: &mut S,
        credentials: &mut CredentialStore<K>,
        shutdown: &ShutdownFlag,
    ) -> Result<Credentials, PortalError>
    where
        R: WirelessRadio,
        S: PortalSockets,
        K: KeyValueStore,
    {
        let ip = radio
            .start_access_point(&self.config.ap_ssid, &self.config.ap_password)
            .map_err(PortalError::AccessPoint)?;
        info!(
            "provisioning access point `{}` up at {ip}",
            self.config.ap_ssid
        );

        let addr = SocketAddrV4::new(ip, self.config.port);
        let result = match sockets.bind(addr) {
            Ok(mut listener) => self.serve(&mut listener, credentials, shutdown),
            Err(source) => Err(PortalError::Bind { addr, source }),
        };

        if let Err(err) = radio.stop_access_point() {
            warn!("failed to stop provisioning access point: {err}");
        }
        result
    }

    fn serve<L, K>(
        &self,
        listener: &mut L,
        credentials: &mut CredentialStore<K>,
        shutdown: &ShutdownFlag,
    ) -> Result<Credentials, PortalError>
    where
        L: PortalListener,
        K: KeyValueStore,
    {
        loop {
            if shutdown.is_requested() {
                return Err(PortalError::Interrupted);
            }

            let mut stream = match listener.accept() {
                Ok(stream) => stream,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    return Err(PortalError::Interrupted)
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!("portal client dropped before accept completed: {err}");
                    continue;
                }
                Err(err) => return Err(PortalError::Accept(err)),
            };

            if let Handled::Saved(saved) = self.handle(&mut stream, credentials) {
                return Ok(saved);
            }
        }
    }

    fn handle<T, K>(&self, stream: &mut T, credentials: &mut CredentialStore<K>) -> Handled
    where
        T: Read + Write,
        K: KeyValueStore,
    {
        let request = match HttpRequest::read_from(stream) {
            Ok(request) => request,
            Err(err) => {
                warn!("portal rejected request: {err}");
                reply(stream, 400, "Bad Request", "text/plain", &err.to_string());
                return Handled::Served;
            }
        };
        info!("portal request {} {}", request.method, request.target);

        if !request.is("POST", PORTAL_SAVE_PATH) {
            reply(stream, 200, "OK", "text/html", FORM_PAGE);
            return Handled::Served;
        }

        let submitted = match self.read_submission(&request) {
            Ok(submitted) => submitted,
            Err(err) => {
                warn!("portal rejected submission: {err}");
                reply(stream, 400, "Bad Request", "text/plain", &err.to_string());
                return Handled::Served;
            }
        };

        if let Err(err) = credentials.save(&submitted) {
            warn!("failed to persist submitted credentials: {err}");
            reply(
                stream,
                500,
                "Internal Server Error",
                "text/plain",
                "Could not save credentials.",
            );
            return Handled::Served;
        }

        reply(stream, 200, "OK", "text/plain", SAVED_MESSAGE);
        Handled::Saved(submitted)
    }

    fn read_submission(&self, request: &HttpRequest) -> Result<Credentials, RequestError> {
        let pairs = parse_form(request.body_str()?)?;

        let field = |name: &'static str| -> Result<String, RequestError> {
            let raw = pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .ok_or(RequestError::MissingField(name))?;
            if self.config.decode_all_fields || name == "password" {
                percent_decode(raw)
            } else {
                Ok(raw.to_string())
            }
        };

        let owner_id = field("username")?;
        let network_id = field("ssid")?;
        let network_secret = field("password")?;

        if network_id.trim().is_empty() {
            return Err(RequestError::EmptyField("ssid"));
        }
        if network_secret.is_empty() {
            return Err(RequestError::EmptyField("password"));
        }

        Ok(Credentials {
            network_id,
            network_secret,
            owner_id,
        })
    }
}

fn reply<W: Write>(stream: &mut W, status: u16, reason: &str, content_type: &str, body: &str) {
    if let Err(err) = write_response(stream, status, reason, content_type, body) {
        warn!("failed to write portal response: {err}");
    }
}
