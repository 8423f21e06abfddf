use thiserror::Error;

/// Failure reported by a platform capability (radio, PWM, storage, sockets).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("radio error: {0}")]
    Radio(String),
    #[error("pwm error: {0}")]
    Pwm(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Network-level HTTP failure: timeout, reset, DNS, and so on.
#[derive(Debug, Error)]
#[error("http transport failed: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("failed to encode credential record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("connection closed before the request was complete")]
    Truncated,
    #[error("failed to read request: {0}")]
    Io(String),
    #[error("request header block exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("malformed request line")]
    RequestLine,
    #[error("malformed header line")]
    Header,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("request is not valid UTF-8")]
    Encoding,
    #[error("malformed form pair `{0}`")]
    FormPair(String),
    #[error("malformed percent escape in `{0}`")]
    Escape(String),
    #[error("missing form field `{0}`")]
    MissingField(&'static str),
    #[error("form field `{0}` cannot be empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("failed to start provisioning access point: {0}")]
    AccessPoint(#[source] PlatformError),
    #[error("failed to bind provisioning portal on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
    #[error("provisioning portal accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("provisioning interrupted by shutdown request")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no stored wifi credentials")]
    CredentialsMissing,
    #[error("stored wifi credentials are invalid")]
    CredentialsInvalid,
    #[error("failed to read stored credentials: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to start station mode: {0}")]
    Radio(#[source] PlatformError),
    #[error("no connection after {attempts} attempts")]
    Timeout { attempts: u32 },
}

#[derive(Debug, Error)]
#[error("servo move to {target_angle} degrees failed: {source}")]
pub struct ActuatorError {
    pub target_angle: i32,
    #[source]
    pub source: PlatformError,
}
