//! Contains the options used to configure a [`Client`](crate::Client), its sessions and its
//! transactions.


use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use derive_where::derive_where;
use percent_encoding::percent_decode_str;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::{
    concern::{Acknowledgment, ReadConcern, WriteConcern},
    error::{Error, Result},
    event::{command::CommandEvent, sdam::SdamEvent, EventHandler},
    selection_criteria::ReadPreference,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

const URI_SCHEME: &str = "mongodb://";

/// The address of a server: a hostname and a TCP port.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub struct ServerAddress {
    /// The hostname of the address. Stored lowercase.
    pub host: String,

    /// The port of the address. The default is 27017.
    pub port: Option<u16>,
}

impl ServerAddress {
    /// Parses an address string of the form `host[:port]`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');
        let host = match parts.next() {
            Some(host) if !host.is_empty() => host,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid server address: \"{address}\""
                )))
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be valid 16-bit unsigned integer, instead got: {part}"
                    ))
                })?;
                if port == 0 {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{address}\"; port must be non-zero"
                    )));
                }
                if parts.next().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "address \"{address}\" contains more than one unescaped ':'"
                    )));
                }
                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress {
            host: host.to_lowercase(),
            port,
        })
    }

    /// The hostname of this address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port of this address, defaulting to 27017.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port() == other.port()
    }
}

impl Hash for ServerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port().hash(state);
    }
}

impl Display for ServerAddress {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port())
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl Serialize for ServerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| D::Error::custom(format!("{e}")))
    }
}

/// Contains the options that can be used to create a new [`Client`](../struct.Client.html).
#[derive(Clone, TypedBuilder)]
#[derive_where(Debug)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the client should connect to. Other members of the replica
    /// set are discovered from these.
    #[builder(default = vec![ServerAddress::default()], setter(!into))]
    pub hosts: Vec<ServerAddress>,

    /// The application name sent to the server as part of the handshake.
    pub app_name: Option<String>,

    /// The name of the replica set to connect to. Servers reporting a different set name are
    /// treated as unusable.
    pub repl_set_name: Option<String>,

    /// Connect to the single seed host only, without discovering the rest of the deployment.
    pub direct_connection: Option<bool>,

    /// The initial delay before reconnecting to a server after a connection failure. The delay
    /// grows on each consecutive failure.
    ///
    /// The default value is 1 second.
    pub retry_delay: Option<Duration>,

    /// The upper bound for the reconnect delay.
    ///
    /// The default value is 60 seconds.
    pub max_delay: Option<Duration>,

    /// The interval between two consecutive probes of a server.
    ///
    /// The default value is 10 seconds.
    pub heartbeat_freq: Option<Duration>,

    /// The time a single probe is allowed to take before the server is considered unreachable.
    ///
    /// The default value is 10 seconds.
    pub probe_timeout: Option<Duration>,

    /// The timeout for establishing a TCP connection.
    ///
    /// The default value is 10 seconds.
    pub connect_timeout: Option<Duration>,

    /// How long an operation without a deadline waits for a suitable server.
    ///
    /// The default value is 30 seconds.
    pub server_selection_timeout: Option<Duration>,

    /// The default database named in the connection string.
    pub default_database: Option<String>,

    /// The default read preference for operations.
    pub selection_criteria: Option<ReadPreference>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,

    /// The handler that should process all command-related events.
    #[derive_where(skip)]
    #[builder(setter(strip_option, !into))]
    pub command_event_handler: Option<EventHandler<CommandEvent>>,

    /// The handler that should process all topology monitoring events.
    #[derive_where(skip)]
    #[builder(setter(strip_option, !into))]
    pub sdam_event_handler: Option<EventHandler<SdamEvent>>,

    #[cfg(test)]
    #[builder(setter(skip))]
    pub(crate) test_options: Option<TestOptions>,
}

/// Knobs used to speed up monitoring in tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub(crate) struct TestOptions {
    pub(crate) min_heartbeat_freq: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientOptions {
    /// Parses a `mongodb://` connection string into a `ClientOptions`.
    ///
    /// Supported options: `replicaSet`, `directConnection`, `readPreference`, `readConcernLevel`,
    /// `w`, `wtimeoutMS`, `journal`, `appName`, `connectTimeoutMS`, `heartbeatFrequencyMS`,
    /// `serverSelectionTimeoutMS`, `retryDelayMS` and `maxDelayMS`. Unknown options are ignored.
    pub fn parse(uri: impl AsRef<str>) -> Result<Self> {
        let uri = uri.as_ref();
        let after_scheme = uri.strip_prefix(URI_SCHEME).ok_or_else(|| {
            Error::invalid_argument(format!("connection string must start with {URI_SCHEME}"))
        })?;

        let (host_section, path_section) = match after_scheme.find('/') {
            Some(index) => (&after_scheme[..index], Some(&after_scheme[index + 1..])),
            None => match after_scheme.find('?') {
                Some(_) => {
                    return Err(Error::invalid_argument(
                        "connection string options must be preceded by a '/'",
                    ))
                }
                None => (after_scheme, None),
            },
        };

        if host_section.contains('@') {
            return Err(Error::invalid_argument(
                "authentication is not supported by this client",
            ));
        }

        let hosts = host_section
            .split(',')
            .map(|host| ServerAddress::parse(decode(host)?))
            .collect::<Result<Vec<_>>>()?;

        let mut options = ClientOptions::builder().hosts(hosts).build();

        let (database, query) = match path_section {
            Some(path) => match path.find('?') {
                Some(index) => (&path[..index], Some(&path[index + 1..])),
                None => (path, None),
            },
            None => ("", None),
        };
        if !database.is_empty() {
            options.default_database = Some(decode(database)?);
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "connection string option \"{pair}\" is missing a value"
                    ))
                })?;
                options.parse_option(&key.to_lowercase(), &decode(value)?)?;
            }
        }

        options.validate()?;
        Ok(options)
    }

    fn parse_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "replicaset" => self.repl_set_name = Some(value.to_string()),
            "directconnection" => self.direct_connection = Some(parse_bool(key, value)?),
            "appname" => self.app_name = Some(value.to_string()),
            "readpreference" => self.selection_criteria = Some(value.parse()?),
            "readconcernlevel" => self.read_concern = Some(ReadConcern::custom(value)),
            "w" => {
                let w = match value.parse::<u32>() {
                    Ok(n) => Acknowledgment::Nodes(n),
                    Err(_) => Acknowledgment::from(value),
                };
                self.write_concern.get_or_insert_with(Default::default).w = Some(w);
            }
            "wtimeoutms" => {
                self.write_concern
                    .get_or_insert_with(Default::default)
                    .w_timeout = Some(parse_millis(key, value)?);
            }
            "journal" => {
                self.write_concern
                    .get_or_insert_with(Default::default)
                    .journal = Some(parse_bool(key, value)?);
            }
            "connecttimeoutms" => self.connect_timeout = Some(parse_millis(key, value)?),
            "heartbeatfrequencyms" => self.heartbeat_freq = Some(parse_millis(key, value)?),
            "serverselectiontimeoutms" => {
                self.server_selection_timeout = Some(parse_millis(key, value)?)
            }
            "retrydelayms" => self.retry_delay = Some(parse_millis(key, value)?),
            "maxdelayms" => self.max_delay = Some(parse_millis(key, value)?),
            other => {
                tracing::warn!(
                    target: crate::trace::TOPOLOGY_TRACING_EVENT_TARGET,
                    option = other,
                    "ignoring unsupported connection string option"
                );
            }
        }
        Ok(())
    }

    /// Checks that the options describe a usable configuration.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::configuration("at least one host must be specified"));
        }
        if self.direct_connection == Some(true) && self.hosts.len() > 1 {
            return Err(Error::configuration(
                "cannot specify multiple seeds with directConnection=true",
            ));
        }
        if self.retry_delay() > self.max_delay() {
            return Err(Error::configuration(format!(
                "retry delay ({:?}) cannot exceed max delay ({:?})",
                self.retry_delay(),
                self.max_delay()
            )));
        }
        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }
        Ok(())
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY)
    }

    pub(crate) fn max_delay(&self) -> Duration {
        self.max_delay.unwrap_or(DEFAULT_MAX_DELAY)
    }

    pub(crate) fn heartbeat_freq(&self) -> Duration {
        self.heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub(crate) fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT)
    }

    /// A deployment is monitored as a replica set when a set name is configured or when more than
    /// one seed is given.
    pub(crate) fn is_replica_set(&self) -> bool {
        self.repl_set_name.is_some()
            || (self.direct_connection != Some(true) && self.hosts.len() > 1)
    }

    pub(crate) fn is_direct(&self) -> bool {
        self.direct_connection == Some(true)
            || (self.repl_set_name.is_none() && self.hosts.len() == 1)
    }
}

fn decode(s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::invalid_argument(format!("invalid percent-encoding in \"{s}\": {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_argument(format!(
            "connection string option \"{key}\" expects true or false, got \"{value}\""
        ))),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value.parse::<u64>().map(Duration::from_millis).map_err(|_| {
        Error::invalid_argument(format!(
            "connection string option \"{key}\" expects a non-negative integer, got \"{value}\""
        ))
    })
}

/// Contains the options that can be used to create a new
/// [`ClientSession`](../struct.ClientSession.html).
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct SessionOptions {
    /// The default options to use for transactions started on this session.
    ///
    /// Options passed to [`ClientSession::start_transaction`](crate::ClientSession::start_transaction)
    /// take precedence over these.
    pub default_transaction_options: Option<TransactionOptions>,

    /// If true, reads performed with this session observe the writes it has made before them.
    ///
    /// Defaults to true.
    pub causal_consistency: Option<bool>,
}

/// Contains the options that can be used for a transaction.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TransactionOptions {
    /// The read concern to use for the transaction.
    pub read_concern: Option<ReadConcern>,

    /// The write concern to use when committing or aborting a transaction. Individual statements
    /// inside the transaction never carry a write concern.
    pub write_concern: Option<WriteConcern>,

    /// The read preference for the transaction's statements.
    pub selection_criteria: Option<ReadPreference>,

    /// The maximum amount of time to allow a single commitTransaction to run.
    pub max_commit_time: Option<Duration>,
}
