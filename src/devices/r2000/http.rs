//! HTTP control plane of the network scanner.
//!
//! Every command is a GET below `http://{host}/cmd/` answering with a JSON
//! object that carries `error_code` and `error_text`. [`CommandClient`]
//! abstracts the transport so the engine can run against a fake device.

use crate::devices::r2000::frame::PacketType;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Issues one control command and returns the raw response body
pub trait CommandClient: Send + Sync {
    /// `command` is the path below `/cmd/`; `query` pairs are URL-encoded
    fn get(&self, command: &str, query: &[(&str, &str)]) -> Result<String>;
}

/// Blocking HTTP client built on `ureq`
pub struct UreqClient {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqClient {
    pub fn new(host: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: format!("http://{}/cmd/", host),
        }
    }
}

impl CommandClient for UreqClient {
    fn get(&self, command: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, command);
        let mut request = self.agent.get(&url);
        for (key, value) in query {
            request = request.query(key, value);
        }
        log::trace!("GET {} {:?}", url, query);
        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(code, _) => Error::Http(format!("HTTP {} from {}", code, url)),
            ureq::Error::Transport(t) => Error::Http(format!("Request to {} failed: {}", url, t)),
        })?;
        response
            .into_string()
            .map_err(|e| Error::Http(format!("Failed to read response from {}: {}", url, e)))
    }
}

/// Device error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    UnknownArgument = 100,
    UnknownParameter = 110,
    InvalidHandle = 120,
    ArgumentMissing = 130,
    InvalidValue = 200,
    ValueOutOfRange = 210,
    WriteToReadOnly = 220,
    OutOfMemory = 230,
    ResourceInUse = 240,
    InternalError = 333,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorCode::Success,
            100 => ErrorCode::UnknownArgument,
            110 => ErrorCode::UnknownParameter,
            120 => ErrorCode::InvalidHandle,
            130 => ErrorCode::ArgumentMissing,
            200 => ErrorCode::InvalidValue,
            210 => ErrorCode::ValueOutOfRange,
            220 => ErrorCode::WriteToReadOnly,
            230 => ErrorCode::OutOfMemory,
            240 => ErrorCode::ResourceInUse,
            333 => ErrorCode::InternalError,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::UnknownArgument => "unknown argument",
            ErrorCode::UnknownParameter => "unknown parameter",
            ErrorCode::InvalidHandle => "invalid handle or no handle provided",
            ErrorCode::ArgumentMissing => "required argument missing",
            ErrorCode::InvalidValue => "invalid value for parameter",
            ErrorCode::ValueOutOfRange => "value for parameter is out of range",
            ErrorCode::WriteToReadOnly => "write access to read only parameter",
            ErrorCode::OutOfMemory => "insufficient memory",
            ErrorCode::ResourceInUse => "resource still/already in use",
            ErrorCode::InternalError => "internal error while processing command",
        }
    }
}

/// Fields present in every command response
#[derive(Debug, Clone, Deserialize)]
pub struct BaseResponse {
    #[serde(default = "undefined_code")]
    pub error_code: i32,
    #[serde(default)]
    pub error_text: String,
}

fn undefined_code() -> i32 {
    -1
}

impl BaseResponse {
    /// Map a non-success code to `Error::Protocol`
    pub fn check(&self, context: &str) -> Result<()> {
        if self.error_code == ErrorCode::Success as i32 {
            return Ok(());
        }
        let detail = match ErrorCode::from_code(self.error_code) {
            Some(code) if self.error_text.is_empty() => code.description().to_string(),
            _ => self.error_text.clone(),
        };
        Err(Error::protocol_with_code(
            format!("{}: {} (code {})", context, detail, self.error_code),
            self.error_code,
        ))
    }
}

/// Streaming session issued by `request_handle_tcp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub port: u16,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct HandleResponse {
    #[serde(default)]
    port: u16,
    #[serde(default)]
    handle: String,
    #[serde(flatten)]
    base: BaseResponse,
}

/// Protocol version reported by `get_protocol_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const V1_00: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    pub const V1_01: ProtocolVersion = ProtocolVersion { major: 1, minor: 1 };
    pub const V1_02: ProtocolVersion = ProtocolVersion { major: 1, minor: 2 };
    pub const V1_03: ProtocolVersion = ProtocolVersion { major: 1, minor: 3 };

    /// TCP back-channel watchdog feeding is available from 1.01
    pub fn supports_tcp_watchdog_feed(self) -> bool {
        self >= Self::V1_01
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{:02}", self.major, self.minor)
    }
}

/// Response of `get_protocol_info`
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolInfo {
    #[serde(default)]
    pub protocol_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(flatten)]
    pub base: BaseResponse,
}

impl ProtocolInfo {
    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion {
            major: self.version_major,
            minor: self.version_minor,
        }
    }
}

/// Typed command set on top of a [`CommandClient`]
#[derive(Clone)]
pub struct DeviceApi {
    client: Arc<dyn CommandClient>,
}

impl DeviceApi {
    pub fn new(client: Arc<dyn CommandClient>) -> Self {
        Self { client }
    }

    fn call<T: DeserializeOwned>(&self, command: &str, query: &[(&str, &str)]) -> Result<T> {
        let body = self.client.get(command, query)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn call_checked(&self, command: &str, query: &[(&str, &str)], context: &str) -> Result<()> {
        let response: BaseResponse = self.call(command, query)?;
        response.check(context)
    }

    pub fn protocol_info(&self) -> Result<ProtocolInfo> {
        let info: ProtocolInfo = self.call("get_protocol_info", &[])?;
        info.base.check("get_protocol_info")?;
        Ok(info)
    }

    /// Request a TCP streaming handle; `watchdog_timeout_ms = None` disables the watchdog
    pub fn request_handle_tcp(
        &self,
        packet_type: PacketType,
        start_angle: i32,
        watchdog_timeout_ms: Option<u64>,
    ) -> Result<Handle> {
        let start_angle = start_angle.to_string();
        let timeout = watchdog_timeout_ms.map(|t| t.to_string());
        let mut query = vec![
            ("packet_type", packet_type.as_str()),
            ("start_angle", start_angle.as_str()),
        ];
        match &timeout {
            Some(t) => {
                query.push(("watchdog", "on"));
                query.push(("watchdogtimeout", t.as_str()));
            }
            None => query.push(("watchdog", "off")),
        }

        let response: HandleResponse = self.call("request_handle_tcp", &query)?;
        response.base.check("Could not acquire tcp handle")?;
        if response.handle.is_empty() || response.port == 0 {
            return Err(Error::protocol("Device returned an empty tcp handle"));
        }
        Ok(Handle {
            port: response.port,
            token: response.handle,
        })
    }

    pub fn start_scanoutput(&self, handle: &Handle) -> Result<()> {
        self.call_checked(
            "start_scanoutput",
            &[("handle", handle.token.as_str())],
            "Couldn't start the tcp data transmission",
        )
    }

    pub fn stop_scanoutput(&self, handle: &Handle) -> Result<()> {
        self.call_checked("stop_scanoutput", &[("handle", handle.token.as_str())], "stop_scanoutput")
    }

    pub fn release_handle(&self, handle: &Handle) -> Result<()> {
        self.call_checked("release_handle", &[("handle", handle.token.as_str())], "release_handle")
    }

    pub fn feed_watchdog(&self, handle: &Handle) -> Result<()> {
        self.call_checked("feed_watchdog", &[("handle", handle.token.as_str())], "feed_watchdog")
    }

    /// Read named parameters; values are returned as raw JSON
    pub fn get_parameters(&self, names: &[&str]) -> Result<serde_json::Map<String, serde_json::Value>> {
        let list = names.join(";");
        let mut values: serde_json::Map<String, serde_json::Value> =
            self.call("get_parameter", &[("list", list.as_str())])?;
        let base: BaseResponse = serde_json::from_value(serde_json::Value::Object(values.clone()))?;
        base.check("get_parameter")?;
        values.remove("error_code");
        values.remove("error_text");
        Ok(values)
    }

    pub fn set_parameters(&self, pairs: &[(&str, &str)]) -> Result<()> {
        self.call_checked("set_parameter", pairs, "set_parameter")
    }
}
