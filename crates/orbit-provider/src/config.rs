use orbit_common::url::{keys, DEFAULT_GROUP, DEFAULT_VERSION};
use orbit_common::Url;

/// Protocol of provider Urls.
pub const PROVIDER_PROTOCOL: &str = "orbit";

pub const DEFAULT_PORT: u16 = 20880;

/// Where and how one service is exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub interface: String,
    pub group: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub serializer: Option<String>,
    pub codec: Option<String>,
}

impl ServiceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: DEFAULT_GROUP.to_string(),
            version: DEFAULT_VERSION.to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            serializer: None,
            codec: None,
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

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
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

    pub fn to_url(&self) -> Url {
        let mut params = vec![
            (keys::GROUP, self.group.clone()),
            (keys::VERSION, self.version.clone()),
        ];
        if let Some(serializer) = &self.serializer {
            params.push((keys::SERIALIZER, serializer.clone()));
        }
        if let Some(codec) = &self.codec {
            params.push((keys::CODEC, codec.clone()));
        }
        Url::new(PROVIDER_PROTOCOL, self.host.clone(), self.port, self.interface.clone())
            .with_parameters(params)
    }
}
