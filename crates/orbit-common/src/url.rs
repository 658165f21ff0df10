//! Endpoint descriptor.
//!
//! A [`Url`] is the single carrier for provider/consumer identity and
//! per-endpoint options:
//!
//! ```text
//! protocol://host:port/path?key=value&key=value
//! ```
//!
//! `path` is the remote interface name. Option values are form-urlencoded on
//! output, so a Url can be embedded as the value of another Url's option and
//! survive a round trip.
//!
//! Urls are never mutated in place: every `with_*` method returns a modified
//! copy, so consumer and provider derivations of one base Url never alias.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::protocol::error::{OrbitError, Result};

pub const DEFAULT_GROUP: &str = "default";
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Well-known option keys.
pub mod keys {
    pub const GROUP: &str = "group";
    pub const VERSION: &str = "version";
    pub const TIMEOUT: &str = "timeout";
    pub const RETRIES: &str = "retries";
    pub const SERIALIZER: &str = "serializer";
    pub const CODEC: &str = "codec";
    pub const TRANSPORT: &str = "transport";
    pub const LOADBALANCE: &str = "loadbalance";
    pub const CLUSTER: &str = "cluster";
    pub const ASYNC: &str = "async";
    pub const CONNECT_TIMEOUT: &str = "connect.timeout";
    pub const HEALTH_INTERVAL: &str = "health.interval";
    pub const REFER: &str = "refer";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: HashMap<String, String>,
}

impl Url {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters: HashMap::new(),
        }
    }

    /// Parses `protocol://host:port/path?k=v`.
    ///
    /// A missing port parses as `0`. Fails on a missing scheme or a port that
    /// is not a `u16`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (protocol, rest) = input
            .split_once("://")
            .ok_or_else(|| OrbitError::invalid_url(input, "missing scheme"))?;
        if protocol.is_empty() {
            return Err(OrbitError::invalid_url(input, "missing scheme"));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (location, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| OrbitError::invalid_url(input, format!("unparsable port '{}': {}", port, e)))?;
                (host, port)
            }
            None => (authority, 0),
        };

        let parameters = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            parameters,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The remote interface name (alias of [`path`](Self::path)).
    pub fn interface(&self) -> &str {
        &self.path
    }

    /// `host:port`, the key for anything bound per listening address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(default)
    }

    /// Parses an option value, `None` when absent or unparsable.
    pub fn parameter_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.parameter(key).and_then(|v| v.parse().ok())
    }

    /// Reads an option holding an embedded Url.
    pub fn parameter_url(&self, key: &str) -> Result<Option<Url>> {
        self.parameter(key).map(Url::parse).transpose()
    }

    pub fn group(&self) -> &str {
        self.parameter_or(keys::GROUP, DEFAULT_GROUP)
    }

    pub fn version(&self) -> &str {
        self.parameter_or(keys::VERSION, DEFAULT_VERSION)
    }

    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Url {
        let mut url = self.clone();
        url.parameters.insert(key.into(), value.into());
        url
    }

    pub fn with_parameters<K, V, I>(&self, params: I) -> Url
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut url = self.clone();
        url.parameters
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        url
    }

    pub fn without_parameter(&self, key: &str) -> Url {
        let mut url = self.clone();
        url.parameters.remove(key);
        url
    }

    pub fn with_protocol(&self, protocol: impl Into<String>) -> Url {
        Url {
            protocol: protocol.into(),
            ..self.clone()
        }
    }

    pub fn with_host(&self, host: impl Into<String>) -> Url {
        Url {
            host: host.into(),
            ..self.clone()
        }
    }

    pub fn with_port(&self, port: u16) -> Url {
        Url {
            port,
            ..self.clone()
        }
    }

    pub fn with_path(&self, path: impl Into<String>) -> Url {
        Url {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Stable cache/registry key: protocol, host, port and path, no options.
    pub fn identity(&self) -> String {
        format!("{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)
    }

    /// `interface:group:version`, the key a provider is routed by.
    pub fn service_key(&self) -> String {
        format!("{}:{}:{}", self.path, self.group(), self.version())
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)?;
        if !self.parameters.is_empty() {
            let mut entries: Vec<_> = self.parameters.iter().collect();
            entries.sort();
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in entries {
                query.append_pair(key, value);
            }
            write!(f, "?{}", query.finish())?;
        }
        Ok(())
    }
}

impl FromStr for Url {
    type Err = OrbitError;

    fn from_str(s: &str) -> Result<Self> {
        Url::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full_url() {
        let url = Url::parse("orbit://10.0.0.1:20880/demo.Echo?group=blue&timeout=3000").unwrap();
        assert_eq!(url.protocol(), "orbit");
        assert_eq!(url.host(), "10.0.0.1");
        assert_eq!(url.port(), 20880);
        assert_eq!(url.path(), "demo.Echo");
        assert_eq!(url.group(), "blue");
        assert_eq!(url.version(), DEFAULT_VERSION);
        assert_eq!(url.parameter_as::<u64>("timeout"), Some(3000));
        assert_eq!(url.address(), "10.0.0.1:20880");
    }

    #[test]
    fn test_parse_without_port_or_path() {
        let url = Url::parse("static://registry").unwrap();
        assert_eq!(url.host(), "registry");
        assert_eq!(url.port(), 0);
        assert_eq!(url.path(), "");
    }

    #[test]
    fn test_parse_missing_scheme_fails() {
        let err = Url::parse("10.0.0.1:20880/demo.Echo").unwrap_err();
        assert!(matches!(err, OrbitError::InvalidUrl { .. }));
        assert!(err.to_string().contains("missing scheme"));
    }

    #[test]
    fn test_parse_bad_port_fails() {
        let err = Url::parse("orbit://host:http/demo.Echo").unwrap_err();
        assert!(err.to_string().contains("unparsable port"));

        assert!(Url::parse("orbit://host:70000/demo.Echo").is_err());
    }

    #[test]
    fn test_modifiers_return_copies() {
        let base = Url::parse("orbit://127.0.0.1:2000/demo.Echo").unwrap();
        let moved = base.with_host("10.1.1.1").with_port(3000).with_parameter("group", "red");

        assert_eq!(base.host(), "127.0.0.1");
        assert_eq!(base.port(), 2000);
        assert!(base.parameter("group").is_none());

        assert_eq!(moved.address(), "10.1.1.1:3000");
        assert_eq!(moved.group(), "red");
    }

    #[test]
    fn test_identity_ignores_options() {
        let a = Url::parse("orbit://h:1/demo.Echo?timeout=1").unwrap();
        let b = Url::parse("orbit://h:1/demo.Echo?timeout=2&group=x").unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), "orbit://h:1/demo.Echo");
    }

    #[test]
    fn test_service_key() {
        let url = Url::parse("orbit://h:1/demo.Echo?group=g&version=1.2.0").unwrap();
        assert_eq!(url.service_key(), "demo.Echo:g:1.2.0");
    }

    #[test]
    fn test_display_is_sorted_and_encoded() {
        let url = Url::new("orbit", "h", 1, "demo.Echo")
            .with_parameter("z", "last")
            .with_parameter("a", "needs encoding&=");
        assert_eq!(
            url.to_string(),
            "orbit://h:1/demo.Echo?a=needs+encoding%26%3D&z=last"
        );
    }

    #[test]
    fn test_embedded_url_round_trip() {
        let consumer = Url::parse("consumer://10.0.0.9:0/demo.Echo?group=g&timeout=50").unwrap();
        let registry = Url::new("static", "localhost", 0, "")
            .with_parameter(keys::REFER, consumer.to_string());

        let reparsed = Url::parse(&registry.to_string()).unwrap();
        let embedded = reparsed.parameter_url(keys::REFER).unwrap().unwrap();
        assert_eq!(embedded, consumer);
    }

    #[test]
    fn test_option_order_is_irrelevant() {
        let a = Url::parse("orbit://h:1/p?x=1&y=2").unwrap();
        let b = Url::parse("orbit://h:1/p?y=2&x=1").unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_serialize_parse_round_trip(
            protocol in "[a-z][a-z0-9+.-]{0,8}",
            host in "[a-z0-9.-]{0,16}",
            port in any::<u16>(),
            path in "[A-Za-z0-9._/]{0,24}",
            params in proptest::collection::hash_map(".{1,8}", ".{0,12}", 0..5),
        ) {
            let url = Url::new(protocol, host, port, path).with_parameters(params);
            let reparsed = Url::parse(&url.to_string()).unwrap();
            prop_assert_eq!(reparsed, url);
        }
    }
}
