//! Configuration string parsing: `<scheme>::k=v;k=v;…;`.
//!
//! Modeled on the teacher crate's per-backend `ConnectOptions: FromStr`
//! convention (see e.g. `MssqlConnectOptions::from_str`), but the wire
//! grammar here is QuestDB's own `addr=host:port;key=value;…;` dialect
//! rather than a standard URL, so parsing is hand-rolled instead of
//! delegating to the `url` crate.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const ENV_VAR: &str = "QDB_CLIENT_CONF";

/// Wire scheme selected by the configuration string.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tcps,
}

impl Protocol {
    fn default_port(self) -> u16 {
        match self {
            Protocol::Http | Protocol::Https => 9000,
            Protocol::Tcp | Protocol::Tcps => 9009,
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }

    pub fn is_tcp(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tcps)
    }

    pub fn is_tls(self) -> bool {
        matches!(self, Protocol::Https | Protocol::Tcps)
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            "tcps" => Ok(Protocol::Tcps),
            other => Err(Error::config_error(format!(
                "unsupported scheme {:?}, expected one of http, https, tcp, tcps",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Tcps => "tcps",
        };
        f.write_str(s)
    }
}

/// Whether the TLS peer certificate chain (and hostname) is verified.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    On,
    UnsafeOff,
}

impl FromStr for TlsVerify {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(TlsVerify::On),
            "unsafe_off" => Ok(TlsVerify::UnsafeOff),
            other => Err(Error::config_error(format!(
                "invalid tls_verify value {:?}, expected `on` or `unsafe_off`",
                other
            ))),
        }
    }
}

fn parse_bool_on_off(key: &str, s: &str) -> Result<bool> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(Error::config_error(format!(
            "invalid value {:?} for {}, expected `on` or `off`",
            other, key
        ))),
    }
}

fn parse_int(key: &str, s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|e| Error::config_error(format!("invalid integer for {}: {:?} ({})", key, s, e)))
}

/// Immutable, validated configuration for a [`crate::Sender`].
///
/// Every field has a protocol-dependent default per §3 of the specification;
/// `Options` is the single source of truth consulted by the buffer, the
/// transports, and the auto-flush controller.
#[derive(Clone)]
pub struct Options {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,

    pub auto_flush: bool,
    pub auto_flush_rows: i64,
    pub auto_flush_bytes: i64,
    pub auto_flush_interval: Duration,

    pub init_buf_size: usize,
    pub max_buf_size: usize,
    pub max_name_len: usize,

    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,

    pub auth_timeout: Duration,
    pub request_timeout: Duration,
    pub request_min_throughput: u64,
    pub retry_timeout: Duration,
    pub pool_timeout: Duration,

    pub tls_verify: TlsVerify,
    pub tls_roots: Option<PathBuf>,
    pub tls_roots_password: Option<String>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auto_flush", &self.auto_flush)
            .field("auto_flush_rows", &self.auto_flush_rows)
            .field("auto_flush_bytes", &self.auto_flush_bytes)
            .field("auto_flush_interval", &self.auto_flush_interval)
            .field("init_buf_size", &self.init_buf_size)
            .field("max_buf_size", &self.max_buf_size)
            .field("max_name_len", &self.max_name_len)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("auth_timeout", &self.auth_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("request_min_throughput", &self.request_min_throughput)
            .field("retry_timeout", &self.retry_timeout)
            .field("pool_timeout", &self.pool_timeout)
            .field("tls_verify", &self.tls_verify)
            .field("tls_roots", &self.tls_roots)
            .field(
                "tls_roots_password",
                &self.tls_roots_password.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl Options {
    fn defaults_for(protocol: Protocol) -> Options {
        let auto_flush_rows = if protocol.is_http() { 75_000 } else { 600 };
        Options {
            protocol,
            host: "localhost".to_string(),
            port: protocol.default_port(),
            auto_flush: true,
            auto_flush_rows,
            auto_flush_bytes: i64::MAX,
            auto_flush_interval: Duration::from_millis(1000),
            init_buf_size: 65536,
            max_buf_size: 104_857_600,
            max_name_len: 127,
            username: None,
            password: None,
            token: None,
            auth_timeout: Duration::from_millis(15_000),
            request_timeout: Duration::from_millis(10_000),
            request_min_throughput: 102_400,
            retry_timeout: Duration::from_millis(10_000),
            pool_timeout: Duration::from_millis(120_000),
            tls_verify: TlsVerify::On,
            tls_roots: None,
            tls_roots_password: None,
        }
    }

    /// Parses a `QDB_CLIENT_CONF`-style configuration string into an
    /// `Options` value. See module docs for the grammar.
    pub fn from_conf(conf: &str) -> Result<Options> {
        let (scheme, rest) = conf.split_once("::").ok_or_else(|| {
            Error::config_error(
                "configuration string must start with `<scheme>::`, e.g. `http::addr=localhost:9000;`",
            )
        })?;
        let protocol: Protocol = scheme.parse()?;

        if !rest.ends_with(';') {
            return Err(Error::config_error(
                "configuration string must end with `;`",
            ));
        }

        let mut opts = Options::defaults_for(protocol);
        let mut addr_seen = false;

        for entry in rest.trim_end_matches(';').split(';') {
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Error::config_error(format!("malformed key=value entry: {:?}", entry))
            })?;

            match key {
                "addr" => {
                    addr_seen = true;
                    let (host, port) = match value.rsplit_once(':') {
                        Some((h, p)) => (
                            h.to_string(),
                            p.parse::<u16>().map_err(|e| {
                                Error::config_error(format!("invalid port in addr: {}", e))
                            })?,
                        ),
                        None => (value.to_string(), protocol.default_port()),
                    };
                    if host.is_empty() {
                        return Err(Error::config_error("addr host cannot be empty"));
                    }
                    opts.host = host;
                    opts.port = port;
                }
                "auto_flush" => opts.auto_flush = parse_bool_on_off(key, value)?,
                "auto_flush_rows" => opts.auto_flush_rows = parse_int(key, value)?,
                "auto_flush_bytes" => opts.auto_flush_bytes = parse_int(key, value)?,
                "auto_flush_interval" => {
                    opts.auto_flush_interval = Duration::from_millis(parse_int(key, value)?.max(0) as u64)
                }
                "init_buf_size" => {
                    opts.init_buf_size = parse_int(key, value)?.max(1) as usize
                }
                "max_buf_size" => opts.max_buf_size = parse_int(key, value)?.max(1) as usize,
                "max_name_len" => opts.max_name_len = parse_int(key, value)?.max(1) as usize,
                "username" => opts.username = Some(value.to_string()),
                "password" => opts.password = Some(value.to_string()),
                "token" => opts.token = Some(value.to_string()),
                "auth_timeout" => {
                    opts.auth_timeout = Duration::from_millis(parse_int(key, value)?.max(0) as u64)
                }
                "request_timeout" => {
                    opts.request_timeout =
                        Duration::from_millis(parse_int(key, value)?.max(0) as u64)
                }
                "request_min_throughput" => {
                    opts.request_min_throughput = parse_int(key, value)?.max(0) as u64
                }
                "retry_timeout" => {
                    opts.retry_timeout = Duration::from_millis(parse_int(key, value)?.max(0) as u64)
                }
                "pool_timeout" => {
                    opts.pool_timeout = Duration::from_millis(parse_int(key, value)?.max(0) as u64)
                }
                "tls_verify" => opts.tls_verify = value.parse()?,
                "tls_roots" => opts.tls_roots = Some(PathBuf::from(value)),
                "tls_roots_password" => opts.tls_roots_password = Some(value.to_string()),
                unknown => {
                    return Err(Error::config_error(format!(
                        "unknown configuration key: {:?}",
                        unknown
                    )))
                }
            }
        }

        if !addr_seen {
            log::debug!("no addr given, defaulting to {}:{}", opts.host, opts.port);
        }

        // A `username`/`token` mismatch is deliberately not validated here:
        // both directions fail uniformly, with the same `AuthError`, once
        // `transport::tcp::authenticate` actually needs the missing field.

        Ok(opts)
    }

    /// Reads the configuration string from the `QDB_CLIENT_CONF` environment
    /// variable, mirroring the teacher's `ConnectOptions::from_env` reading
    /// `DATABASE_URL`.
    pub fn from_env() -> Result<Options> {
        let conf = std::env::var(ENV_VAR)
            .map_err(|_| Error::config_error(format!("{} is not set", ENV_VAR)))?;
        Options::from_conf(&conf)
    }

    pub fn has_basic_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn has_bearer_auth(&self) -> bool {
        self.token.is_some() && !self.has_basic_auth()
    }
}

impl FromStr for Options {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Options::from_conf(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_http_conf() {
        let opts = Options::from_conf("http::addr=localhost:9000;").unwrap();
        assert_eq!(opts.protocol, Protocol::Http);
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.auto_flush_rows, 75_000);
    }

    #[test]
    fn applies_tcp_default_port_and_row_threshold() {
        let opts = Options::from_conf("tcp::addr=db.local;").unwrap();
        assert_eq!(opts.port, 9009);
        assert_eq!(opts.auto_flush_rows, 600);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = Options::from_conf("http::addr=localhost:9000;bogus=1;").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigError);
    }

    #[test]
    fn rejects_missing_trailing_semicolon() {
        assert!(Options::from_conf("http::addr=localhost:9000").is_err());
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        assert!(Options::from_conf("addr=localhost:9000;").is_err());
    }

    #[test]
    fn parses_auth_and_tls_options() {
        let opts = Options::from_conf(
            "https::addr=host:9000;username=bob;password=secret;tls_verify=unsafe_off;",
        )
        .unwrap();
        assert!(opts.has_basic_auth());
        assert_eq!(opts.tls_verify, TlsVerify::UnsafeOff);
    }

    #[test]
    fn debug_redacts_secrets() {
        let opts = Options::from_conf("http::addr=h:9000;password=secret;token=abc;").unwrap();
        let s = format!("{:?}", opts);
        assert!(!s.contains("secret"));
        assert!(!s.contains("abc"));
    }

    #[test]
    fn non_positive_thresholds_disable_trigger() {
        let opts =
            Options::from_conf("http::addr=h:9000;auto_flush_rows=0;auto_flush_bytes=-1;").unwrap();
        assert_eq!(opts.auto_flush_rows, 0);
        assert_eq!(opts.auto_flush_bytes, -1);
    }
}
