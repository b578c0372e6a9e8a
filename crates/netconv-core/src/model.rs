//! Desired-state data model
//!
//! A [`DesiredState`] is the caller-declared target configuration for one
//! device interface. It is constructed per request and discarded after use;
//! what survives is the [`ConvergenceRecord`](crate::traits::ConvergenceRecord)
//! written by the engine.
//!
//! The JSON shape matches the HTTP surface:
//!
//! ```json
//! {
//!   "host": "10.0.0.1:22",
//!   "description": "uplink",
//!   "username": "admin",
//!   "password": "admin",
//!   "type": "GigabitEthernet",
//!   "number": "0/1",
//!   "ipv4_address": "192.0.2.1",
//!   "ipv4_address_mask": "255.255.255.0",
//!   "mtu": 9000,
//!   "shutdown": false,
//!   "service_policy_input": "POLICE-IN",
//!   "service_policy_output": "SHAPE-OUT"
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Ethernet interface families understood by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterfaceType {
    GigabitEthernet,
    TwoGigabitEthernet,
    FiveGigabitEthernet,
    TenGigabitEthernet,
    TwentyFiveGigE,
    FortyGigabitEthernet,
    HundredGigE,
    TwoHundredGigE,
    FourHundredGigE,
}

impl InterfaceType {
    /// All supported interface types, slowest first
    pub const ALL: [InterfaceType; 9] = [
        InterfaceType::GigabitEthernet,
        InterfaceType::TwoGigabitEthernet,
        InterfaceType::FiveGigabitEthernet,
        InterfaceType::TenGigabitEthernet,
        InterfaceType::TwentyFiveGigE,
        InterfaceType::FortyGigabitEthernet,
        InterfaceType::HundredGigE,
        InterfaceType::TwoHundredGigE,
        InterfaceType::FourHundredGigE,
    ];

    /// CLI keyword for this interface type
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::GigabitEthernet => "GigabitEthernet",
            InterfaceType::TwoGigabitEthernet => "TwoGigabitEthernet",
            InterfaceType::FiveGigabitEthernet => "FiveGigabitEthernet",
            InterfaceType::TenGigabitEthernet => "TenGigabitEthernet",
            InterfaceType::TwentyFiveGigE => "TwentyFiveGigE",
            InterfaceType::FortyGigabitEthernet => "FortyGigabitEthernet",
            InterfaceType::HundredGigE => "HundredGigE",
            InterfaceType::TwoHundredGigE => "TwoHundredGigE",
            InterfaceType::FourHundredGigE => "FourHundredGigE",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::validation(format!("Interface type is not valid. Got {}", s)))
    }
}

/// Username/password pair used for password authentication
///
/// The Debug implementation intentionally does NOT expose the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(default_username(), default_password())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Caller-declared target configuration for one device interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Device address in `host:port` form
    pub host: String,

    #[serde(default)]
    pub description: String,

    #[serde(flatten)]
    pub credentials: Credentials,

    #[serde(rename = "type")]
    pub intf_type: InterfaceType,

    #[serde(default = "default_number")]
    pub number: String,

    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub ipv4_address: Option<String>,

    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub ipv4_address_mask: Option<String>,

    #[serde(
        default,
        deserialize_with = "zero_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub mtu: Option<u32>,

    #[serde(default)]
    pub shutdown: bool,

    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_policy_input: Option<String>,

    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_policy_output: Option<String>,
}

impl DesiredState {
    /// Create a desired state with defaults for every optional field
    pub fn new(host: impl Into<String>, intf_type: InterfaceType, number: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            description: String::new(),
            credentials: Credentials::default(),
            intf_type,
            number: number.into(),
            ipv4_address: None,
            ipv4_address_mask: None,
            mtu: None,
            shutdown: false,
            service_policy_input: None,
            service_policy_output: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ipv4(mut self, address: impl Into<String>, mask: impl Into<String>) -> Self {
        self.ipv4_address = Some(address.into());
        self.ipv4_address_mask = Some(mask.into());
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn with_shutdown(mut self, shutdown: bool) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_service_policies(
        mut self,
        input: Option<String>,
        output: Option<String>,
    ) -> Self {
        self.service_policy_input = input;
        self.service_policy_output = output;
        self
    }

    /// The (host, type, number) triple identifying this interface
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.host.clone(), self.intf_type, self.number.clone())
    }

    /// Validate the desired state
    ///
    /// Runs before any template is rendered or device contacted.
    pub fn validate(&self) -> Result<()> {
        validate_host(&self.host)?;

        if self.number.is_empty() || self.number.chars().any(char::is_whitespace) {
            return Err(Error::validation(format!(
                "Interface number must be non-empty without whitespace. Got '{}'",
                self.number
            )));
        }

        // Every field below is substituted into a CLI line
        if has_line_break(&self.description) {
            return Err(Error::validation("description cannot contain line breaks"));
        }

        match (&self.ipv4_address, &self.ipv4_address_mask) {
            (Some(address), Some(mask)) => {
                parse_ipv4("ipv4_address", address)?;
                parse_ipv4("ipv4_address_mask", mask)?;
            }
            (Some(_), None) => {
                return Err(Error::validation("ipv4_address requires ipv4_address_mask"));
            }
            (None, Some(_)) => {
                return Err(Error::validation("ipv4_address_mask requires ipv4_address"));
            }
            (None, None) => {}
        }

        if self.mtu == Some(0) {
            return Err(Error::validation("mtu must be a positive integer"));
        }

        for (field, value) in [
            ("service_policy_input", &self.service_policy_input),
            ("service_policy_output", &self.service_policy_output),
        ] {
            if let Some(name) = value {
                if name.trim().is_empty() {
                    return Err(Error::validation(format!(
                        "{} cannot be whitespace only",
                        field
                    )));
                }
                if has_line_break(name) {
                    return Err(Error::validation(format!(
                        "{} cannot contain line breaks",
                        field
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validate a `host:port` device address
pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(Error::validation("host is required"));
    }

    if host.chars().any(char::is_whitespace) {
        return Err(Error::validation("item names cannot contain whitespace"));
    }

    let valid = host
        .rsplit_once(':')
        .is_some_and(|(name, port)| !name.is_empty() && port.parse::<u16>().is_ok());
    if !valid {
        return Err(Error::validation(format!(
            "host must be followed by :port. Got {}",
            host
        )));
    }

    Ok(())
}

fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    value.parse().map_err(|_| {
        Error::validation(format!(
            "{} must be a dotted-quad IPv4 address. Got {}",
            field, value
        ))
    })
}

fn has_line_break(value: &str) -> bool {
    value.contains('\n') || value.contains('\r')
}

/// Natural primary key of a managed interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub host: String,
    #[serde(rename = "type")]
    pub intf_type: InterfaceType,
    pub number: String,
}

impl IdentityKey {
    pub fn new(host: impl Into<String>, intf_type: InterfaceType, number: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            intf_type,
            number: number.into(),
        }
    }

    /// True if `state` belongs to this identity
    pub fn matches(&self, state: &DesiredState) -> bool {
        self.host == state.host && self.intf_type == state.intf_type && self.number == state.number
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.host, self.intf_type, self.number)
    }
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_number() -> String {
    "0".to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

fn zero_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.filter(|mtu| *mtu != 0))
}
