use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::message::generate_id;
use crate::utils::DxlError;

/// Standard TLS port of a fabric broker.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Settings needed to open a fabric session.
///
/// The facade only validates the shape of these settings; their meaning
/// (certificates, endpoints) belongs to the fabric collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricConfig {
    pub client_id: Option<String>,
    pub brokers: Vec<BrokerEndpoint>,
    pub certs: CertSettings,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub register_timeout_secs: u64,
}

/// Certificate material used to authenticate against brokers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertSettings {
    pub broker_ca_bundle: PathBuf,
    pub cert_file: PathBuf,
    pub private_key: PathBuf,
}

/// A broker the client may connect to.
///
/// Parsed from the `[UniqueId;]Port;HostName[;IpAddress]` broker string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub unique_id: Option<String>,
    pub port: u16,
    pub host: String,
    pub ip_address: Option<String>,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            unique_id: None,
            port,
            host: host.into(),
            ip_address: None,
        }
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|port| *port > 0)
}

impl FromStr for BrokerEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let elements: Vec<&str> = s.split(';').map(str::trim).collect();
        if elements.len() < 2 {
            return Err(format!("malformed broker '{s}': missing elements"));
        }

        let non_empty = |value: Option<&&str>| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        // A leading port number means the unique id was omitted.
        let (unique_id, port, host, ip_address) = match parse_port(elements[0]) {
            Some(port) => (None, port, non_empty(elements.get(1)), non_empty(elements.get(2))),
            None => {
                let port = parse_port(elements[1])
                    .ok_or_else(|| format!("malformed broker '{s}': invalid port"))?;
                (
                    non_empty(elements.first()),
                    port,
                    non_empty(elements.get(2)),
                    non_empty(elements.get(3)),
                )
            }
        };

        let host = host.ok_or_else(|| format!("malformed broker '{s}': missing host name"))?;
        Ok(Self {
            unique_id,
            port,
            host,
            ip_address,
        })
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.unique_id {
            write!(f, "{id};")?;
        }
        write!(f, "{};{}", self.port, self.host)?;
        if let Some(ip) = &self.ip_address {
            write!(f, ";{ip}")?;
        }
        Ok(())
    }
}

impl FabricConfig {
    /// Config pointing at a single broker, with default timeouts.
    pub fn for_broker(host: impl Into<String>, port: u16) -> Self {
        Self {
            brokers: vec![BrokerEndpoint::new(host, port)],
            ..Self::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    /// The configured client id, or a freshly generated one.
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_id)
    }

    /// Reject configurations a session cannot be opened with.
    pub fn validate(&self) -> Result<(), DxlError> {
        if self.brokers.is_empty() {
            return Err(DxlError::Connection("no brokers configured".to_string()));
        }
        if let Some(broker) = self.brokers.iter().find(|b| b.host.trim().is_empty()) {
            return Err(DxlError::Connection(format!(
                "broker '{broker}' has an empty host name"
            )));
        }
        if self.connect_timeout_secs == 0
            || self.request_timeout_secs == 0
            || self.register_timeout_secs == 0
        {
            return Err(DxlError::Connection(
                "timeouts must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defaults: no brokers, connect/register timeouts of 10s and an hour-long
/// request timeout.
impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            brokers: Vec::new(),
            certs: CertSettings::default(),
            connect_timeout_secs: 10,
            request_timeout_secs: 3600,
            register_timeout_secs: 10,
        }
    }
}

/// Partial settings as read from a `dxlclient.config` file or the
/// environment. Section and key names accept both the file's CamelCase and
/// the lowercase form.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    #[serde(alias = "General")]
    pub general: Option<PartialGeneralSettings>,
    #[serde(alias = "Certs")]
    pub certs: Option<PartialCertSettings>,
    #[serde(alias = "Brokers")]
    pub brokers: Option<BTreeMap<String, String>>,
    #[serde(alias = "Timeouts")]
    pub timeouts: Option<PartialTimeoutSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialGeneralSettings {
    #[serde(alias = "ClientId", alias = "clientid")]
    pub client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialCertSettings {
    #[serde(alias = "BrokerCertChain", alias = "brokercertchain")]
    pub broker_cert_chain: Option<PathBuf>,
    #[serde(alias = "CertFile", alias = "certfile")]
    pub cert_file: Option<PathBuf>,
    #[serde(alias = "PrivateKey", alias = "privatekey")]
    pub private_key: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialTimeoutSettings {
    #[serde(alias = "ConnectTimeout", alias = "connecttimeout")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(alias = "RequestTimeout", alias = "requesttimeout")]
    pub request_timeout_secs: Option<u64>,
    #[serde(alias = "RegisterTimeout", alias = "registertimeout")]
    pub register_timeout_secs: Option<u64>,
}
