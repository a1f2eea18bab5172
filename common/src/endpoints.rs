pub const DEVICE_CONFIG_PATH: &str = "/api/iotdevice";
pub const STORAGE_CONDITION_PATH: &str = "/api/storagecondition";

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";

pub const HTTP_OK: u16 = 200;
