pub const ENDPOINT_ADD_DEVICE: &str = "/add_device";
pub const ENDPOINT_GET_STATUS: &str = "/get_status";

pub const PORTAL_SAVE_PATH: &str = "/save";

pub const CREDENTIALS_KEY: &str = "wifi_config";

pub const STATUS_CREATED: u16 = 201;
pub const STATUS_OK: u16 = 200;
pub const STATUS_UNKNOWN_DEVICE: u16 = 407;
