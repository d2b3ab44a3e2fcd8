use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use rumqttc::QoS;

use crate::error::{CipherError, ConfigError};
use crate::middleware::cipher::{self, PayloadKey};
use crate::middleware::transport::tls::{self, TlsMaterial};

/// Environment variables are `OVERLAY_<KEY>` with the option key upper-cased
pub const ENV_PREFIX: &str = "OVERLAY_";

pub const RECOGNIZED_KEYS: &[&str] = &[
    "broker",
    "brokers",
    "connection_timeout",
    "retry_interval",
    "alive_interval",
    "qos",
    "project_name",
    "report_interval",
    "dongle_online_timeout",
    "username",
    "password",
    "ca_cert_file",
    "client_cert_file",
    "client_key_file",
    "key_password",
    "aes_key",
];

// --- ROLE ---

/// Which identity the channel plays. Defaults differ per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Gateway,
    Registry,
}

struct RoleDefaults {
    broker: &'static str,
    connection_timeout: u64,
    retry_interval: u64,
    alive_interval: u64,
    qos: u8,
    project_name: &'static str,
    report_interval: u64,
    online_timeout: u64,
}

impl ChannelRole {
    fn defaults(&self) -> RoleDefaults {
        match self {
            ChannelRole::Gateway => RoleDefaults {
                broker:             "tcp://broker.hivemq.com:1883",
                connection_timeout: 10,
                retry_interval:     15,
                alive_interval:     60,
                qos:                1,
                project_name:       "DEFAULT",
                report_interval:    30,
                online_timeout:     120,
            },
            ChannelRole::Registry => RoleDefaults {
                broker:             "tcp://iot.eclipse.org:1883",
                connection_timeout: 60,
                retry_interval:     15,
                alive_interval:     60,
                qos:                1,
                project_name:       "DEFAULT",
                report_interval:    15,
                online_timeout:     120,
            },
        }
    }
}

// --- BROKER ADDRESS ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Ssl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Accepts `tcp://host:port` and `ssl://host:port` (`mqtt://`, `mqtts://` as aliases)
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidBroker(uri.to_string()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => BrokerScheme::Tcp,
            "ssl" | "tls" | "mqtts" => BrokerScheme::Ssl,
            _ => return Err(ConfigError::InvalidBroker(uri.to_string())),
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidBroker(uri.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidBroker(uri.to_string()))?;
        if host.is_empty() || host.contains('/') || port == 0 {
            return Err(ConfigError::InvalidBroker(uri.to_string()));
        }

        Ok(Self { scheme, host: host.to_string(), port })
    }

    pub fn uses_tls(&self) -> bool {
        self.scheme == BrokerScheme::Ssl
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            BrokerScheme::Tcp => "tcp",
            BrokerScheme::Ssl => "ssl",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

// --- CREDENTIALS ---

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// --- TLS FILES ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_cert_file: PathBuf,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub key_password: Option<String>,
}

// --- CHANNEL CONFIG ---

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub role: ChannelRole,
    pub broker: BrokerAddress,
    /// Fail-over list handed to the transport; empty means "primary broker only"
    pub brokers: Vec<BrokerAddress>,
    pub connection_timeout: Duration,
    pub retry_interval: Duration,
    pub alive_interval: Duration,
    pub qos: QoS,
    pub project_name: String,
    pub report_interval: Duration,
    /// Registry only: a gateway must heartbeat within this window to be reported online
    pub online_timeout: Duration,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsMaterial>,
    /// Present only when payload encryption is enabled
    pub aes_key: Option<PayloadKey>,
}

impl ChannelConfig {
    /// Builds a validated configuration from an option map (keys as in RECOGNIZED_KEYS).
    pub fn from_options(role: ChannelRole, options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let d = role.defaults();
        let get = |key: &str| options.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let broker = BrokerAddress::parse(get("broker").unwrap_or(d.broker))?;
        let brokers = match get("brokers") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|uri| !uri.is_empty())
                .map(BrokerAddress::parse)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let project_name = get("project_name").unwrap_or(d.project_name).to_string();
        if project_name.contains('/') || project_name.contains('#') || project_name.contains('+') {
            return Err(ConfigError::invalid("project_name", "must not contain '/', '#' or '+'"));
        }

        let credentials = match (get("username"), get("password")) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        let tls = match get("ca_cert_file") {
            Some(ca) => {
                let files = TlsFiles {
                    ca_cert_file: PathBuf::from(ca),
                    client_cert_file: get("client_cert_file").map(PathBuf::from),
                    client_key_file: get("client_key_file").map(PathBuf::from),
                    key_password: get("key_password").map(str::to_string),
                };
                Some(tls::load(&files)?)
            }
            None => None,
        };

        let aes_key = match options.get("aes_key") {
            Some(passphrase) => Some(cipher::derive_key(passphrase).map_err(|e| match e {
                CipherError::InvalidKeyMaterial => ConfigError::InvalidKeyMaterial,
                other => ConfigError::invalid("aes_key", other.to_string()),
            })?),
            None => None,
        };

        let config = Self {
            role,
            broker,
            brokers,
            connection_timeout: parse_secs(get("connection_timeout"), "connection_timeout", d.connection_timeout)?,
            retry_interval:     parse_secs(get("retry_interval"), "retry_interval", d.retry_interval)?,
            alive_interval:     parse_secs(get("alive_interval"), "alive_interval", d.alive_interval)?,
            qos:                parse_qos(get("qos"), d.qos)?,
            project_name,
            report_interval:    parse_secs(get("report_interval"), "report_interval", d.report_interval)?,
            online_timeout:     parse_secs(get("dongle_online_timeout"), "dongle_online_timeout", d.online_timeout)?,
            credentials,
            tls,
            aes_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env` then reads `OVERLAY_<KEY>` for every recognized key
    pub fn from_env(role: ChannelRole) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let options: HashMap<String, String> = RECOGNIZED_KEYS
            .iter()
            .filter_map(|key| get_env(key).map(|value| (key.to_string(), value)))
            .collect();
        Self::from_options(role, &options)
    }

    /// Checks cross-field rules; also used for configs built by hand
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.is_empty() {
            return Err(ConfigError::invalid("project_name", "must not be empty"));
        }
        for (key, value) in [
            ("connection_timeout", self.connection_timeout),
            ("retry_interval", self.retry_interval),
            ("alive_interval", self.alive_interval),
            ("report_interval", self.report_interval),
            ("dongle_online_timeout", self.online_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be positive"));
            }
        }
        if self.broker_list().iter().any(BrokerAddress::uses_tls) && self.tls.is_none() {
            return Err(ConfigError::InvalidTls("ssl broker configured without ca_cert_file".to_string()));
        }
        if self.tls.is_some() && !self.tls_in_use() {
            // Still kept: an ssl:// override passed to connect() picks it up
            tracing::warn!("[Config] ca_cert_file is set but no configured broker uses ssl://, TLS stays off");
        }
        Ok(())
    }

    /// True when TLS material is loaded and at least one configured broker is ssl://
    pub fn tls_in_use(&self) -> bool {
        self.tls.is_some() && self.broker_list().iter().any(BrokerAddress::uses_tls)
    }

    /// Brokers tried on each connect attempt, in order
    pub fn broker_list(&self) -> Vec<BrokerAddress> {
        if self.brokers.is_empty() {
            vec![self.broker.clone()]
        } else {
            self.brokers.clone()
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        self.aes_key.is_some()
    }
}

// --- PRIVATE HELPERS ---

fn get_env(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase())).ok()
}

fn parse_secs(value: Option<&str>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a whole number of seconds", raw)))?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::invalid(key, "must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_qos(value: Option<&str>, default: u8) -> Result<QoS, ConfigError> {
    let level = match value {
        Some(raw) => raw
            .parse::<u8>()
            .map_err(|_| ConfigError::invalid("qos", format!("'{}' is not 0, 1 or 2", raw)))?,
        None => default,
    };
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::invalid("qos", format!("'{}' is not 0, 1 or 2", other))),
    }
}
