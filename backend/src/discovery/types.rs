//! Types for Chromecast receiver discovery over mDNS.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use utoipa::ToSchema;

/// Service type advertised by cast receivers.
pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local";

/// mDNS multicast group.
pub const MDNS_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// mDNS port.
pub const MDNS_PORT: u16 = 5353;

/// Default length of a discovery window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default interval between repeated queries inside a window.
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound for the query interval.
pub const MIN_QUERY_INTERVAL: Duration = Duration::from_millis(100);

/// Value returned for metadata keys a device did not advertise.
pub const UNKNOWN_ATTRIBUTE: &str = "unknown";

/// A cast receiver found during a discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Service instance name (e.g. `Living Room._googlecast._tcp.local`).
    pub instance_name: String,
    /// Target host from the SRV record.
    pub host: Option<String>,
    /// Port from the SRV record.
    pub port: Option<u16>,
    /// Addresses bound to `host`, in arrival order.
    pub addresses: Vec<IpAddr>,
    /// Parsed `key=value` metadata from the TXT record.
    pub attributes: BTreeMap<String, String>,
    /// TXT strings exactly as received.
    pub raw_txt: Vec<String>,
}

impl DeviceDescriptor {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            host: None,
            port: None,
            addresses: Vec::new(),
            attributes: BTreeMap::new(),
            raw_txt: Vec::new(),
        }
    }

    /// Metadata value for `key`, or `"unknown"` when absent.
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes
            .get(key)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_ATTRIBUTE)
    }

    /// User-visible device name (`fn`).
    pub fn friendly_name(&self) -> &str {
        self.attribute("fn")
    }

    /// Device model (`md`).
    pub fn model(&self) -> &str {
        self.attribute("md")
    }

    pub fn first_address(&self) -> Option<IpAddr> {
        self.addresses.first().copied()
    }

    /// Whether `name` refers to this device's SRV target.
    ///
    /// A trailing root dot on either side is ignored, as is ASCII case.
    pub fn matches_host(&self, name: &str) -> bool {
        self.host
            .as_deref()
            .is_some_and(|host| names_equal(host, name))
    }

    pub(crate) fn set_location(&mut self, host: &str, port: u16) {
        self.host = Some(trim_root(host).to_string());
        self.port = Some(port);
    }

    /// Replace all metadata with the given TXT strings.
    ///
    /// An entry without `=` is a key with an empty value. A repeated key
    /// keeps its last value. Empty strings carry no metadata.
    pub(crate) fn replace_attributes(&mut self, strings: &[String]) {
        self.attributes.clear();
        self.raw_txt.clear();
        for entry in strings.iter().filter(|entry| !entry.is_empty()) {
            let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            self.attributes.insert(key.to_string(), value.to_string());
            self.raw_txt.push(entry.clone());
        }
    }

    /// Returns false when the address was already known.
    pub(crate) fn add_address(&mut self, address: IpAddr) -> bool {
        if self.addresses.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Convert to API response format.
    pub fn to_api_response(&self) -> DeviceResponse {
        DeviceResponse {
            instance_name: self.instance_name.clone(),
            friendly_name: self.friendly_name().to_string(),
            model: self.model().to_string(),
            host: self.host.clone(),
            port: self.port,
            addresses: self.addresses.iter().map(ToString::to_string).collect(),
            attributes: self.attributes.clone(),
        }
    }
}

/// API response for a discovered cast receiver.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceResponse {
    pub instance_name: String,
    pub friendly_name: String,
    pub model: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub addresses: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

pub(crate) fn trim_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

pub(crate) fn names_equal(a: &str, b: &str) -> bool {
    trim_root(a).eq_ignore_ascii_case(trim_root(b))
}
