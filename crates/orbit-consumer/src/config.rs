use orbit_cluster::{DEFAULT_FAULT_TOLERANCE, DEFAULT_LOAD_BALANCER};
use orbit_common::url::{keys, DEFAULT_GROUP, DEFAULT_VERSION};
use orbit_common::Url;

/// Protocol of consumer Urls.
pub const CONSUMER_PROTOCOL: &str = "consumer";

/// How a consumer refers to one remote interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceConfig {
    pub interface: String,
    pub group: String,
    pub version: String,
    pub load_balancer: String,
    pub fault_tolerance: String,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub serializer: Option<String>,
    pub codec: Option<String>,
    /// Health probe period in milliseconds; no probing when unset.
    pub health_interval_ms: Option<u64>,
}

impl ReferenceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: DEFAULT_GROUP.to_string(),
            version: DEFAULT_VERSION.to_string(),
            load_balancer: DEFAULT_LOAD_BALANCER.to_string(),
            fault_tolerance: DEFAULT_FAULT_TOLERANCE.to_string(),
            timeout_ms: None,
            retries: None,
            serializer: None,
            codec: None,
            health_interval_ms: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn load_balancer(mut self, name: impl Into<String>) -> Self {
        self.load_balancer = name.into();
        self
    }

    pub fn fault_tolerance(mut self, name: impl Into<String>) -> Self {
        self.fault_tolerance = name.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = Some(name.into());
        self
    }

    pub fn codec(mut self, name: impl Into<String>) -> Self {
        self.codec = Some(name.into());
        self
    }

    pub fn health_interval_ms(mut self, interval_ms: u64) -> Self {
        self.health_interval_ms = Some(interval_ms);
        self
    }

    /// The consumer Url carrying every option.
    pub fn to_url(&self) -> Url {
        let mut params = vec![
            (keys::GROUP, self.group.clone()),
            (keys::VERSION, self.version.clone()),
            (keys::LOADBALANCE, self.load_balancer.clone()),
            (keys::CLUSTER, self.fault_tolerance.clone()),
        ];
        if let Some(timeout) = self.timeout_ms {
            params.push((keys::TIMEOUT, timeout.to_string()));
        }
        if let Some(retries) = self.retries {
            params.push((keys::RETRIES, retries.to_string()));
        }
        if let Some(serializer) = &self.serializer {
            params.push((keys::SERIALIZER, serializer.clone()));
        }
        if let Some(codec) = &self.codec {
            params.push((keys::CODEC, codec.clone()));
        }
        if let Some(interval) = self.health_interval_ms {
            params.push((keys::HEALTH_INTERVAL, interval.to_string()));
        }

        Url::new(CONSUMER_PROTOCOL, "127.0.0.1", 0, self.interface.clone()).with_parameters(params)
    }

    /// Reads a config back from a consumer Url; missing options take defaults.
    pub fn from_url(url: &Url) -> Self {
        Self {
            interface: url.interface().to_string(),
            group: url.group().to_string(),
            version: url.version().to_string(),
            load_balancer: url.parameter_or(keys::LOADBALANCE, DEFAULT_LOAD_BALANCER).to_string(),
            fault_tolerance: url.parameter_or(keys::CLUSTER, DEFAULT_FAULT_TOLERANCE).to_string(),
            timeout_ms: url.parameter_as(keys::TIMEOUT),
            retries: url.parameter_as(keys::RETRIES),
            serializer: url.parameter(keys::SERIALIZER).map(str::to_string),
            codec: url.parameter(keys::CODEC).map(str::to_string),
            health_interval_ms: url.parameter_as(keys::HEALTH_INTERVAL),
        }
    }
}
