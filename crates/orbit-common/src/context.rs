//! Process-scoped context.
//!
//! One [`OrbitContext`] is built at startup and handed to every component that
//! needs extension lookup or shutdown registration. Nothing in the framework
//! keeps global state.

use std::sync::Arc;

use crate::codec::{Codec, CodecKind};
use crate::extension::{ExtensionRegistry, Scope};
use crate::protocol::error::Result;
use crate::serialize::{JsonSerializer, PostcardSerializer, Serializer};
use crate::shutdown::ShutdownHooks;
use crate::transport::{TcpTransport, Transport};
use crate::url::{keys, Url};

pub const DEFAULT_SERIALIZER: &str = "json";
pub const DEFAULT_CODEC: &str = "framed";
pub const DEFAULT_TRANSPORT: &str = "tcp";

#[derive(Debug, Default)]
pub struct OrbitContext {
    extensions: ExtensionRegistry,
    shutdown: ShutdownHooks,
}

impl OrbitContext {
    /// An empty context; nothing is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with the built-in serializers and the tcp transport.
    pub fn with_defaults() -> Result<Arc<Self>> {
        let ctx = Self::new();
        ctx.extensions
            .register::<dyn Serializer, _>("json", Scope::Singleton, || Arc::new(JsonSerializer))?;
        ctx.extensions.register::<dyn Serializer, _>("postcard", Scope::Singleton, || {
            Arc::new(PostcardSerializer)
        })?;
        ctx.extensions
            .register::<dyn Transport, _>("tcp", Scope::Singleton, || Arc::new(TcpTransport))?;
        Ok(Arc::new(ctx))
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn shutdown(&self) -> &ShutdownHooks {
        &self.shutdown
    }

    /// The codec a Url asks for (`codec` and `serializer` options). The codec
    /// can decode every serializer registered in this context.
    pub fn codec_for(&self, url: &Url) -> Result<Codec> {
        let kind = CodecKind::from_name(url.parameter_or(keys::CODEC, DEFAULT_CODEC))?;
        let serializer = self
            .extensions
            .resolve::<dyn Serializer>(url.parameter_or(keys::SERIALIZER, DEFAULT_SERIALIZER))?;
        let known = self
            .extensions
            .resolve_all::<dyn Serializer>()?
            .into_iter()
            .map(|(_, s)| s);
        Ok(Codec::with_serializers(kind, serializer, known))
    }

    /// The transport a Url asks for (`transport` option).
    pub fn transport_for(&self, url: &Url) -> Result<Arc<dyn Transport>> {
        self.extensions
            .resolve::<dyn Transport>(url.parameter_or(keys::TRANSPORT, DEFAULT_TRANSPORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OrbitError;
    use crate::serialize::POSTCARD_SERIALIZER_ID;

    #[test]
    fn test_defaults_are_registered() {
        let ctx = OrbitContext::with_defaults().unwrap();
        assert_eq!(
            ctx.extensions().names::<dyn Serializer>(),
            vec!["json", "postcard"]
        );
        assert_eq!(ctx.transport_for(&Url::parse("orbit://h:1/x").unwrap()).unwrap().name(), "tcp");
    }

    #[test]
    fn test_codec_from_url_options() {
        let ctx = OrbitContext::with_defaults().unwrap();
        let url = Url::parse("orbit://h:1/x?codec=legacy&serializer=postcard").unwrap();
        let codec = ctx.codec_for(&url).unwrap();
        assert_eq!(codec.kind(), CodecKind::Legacy);
        assert_eq!(codec.serializer().id(), POSTCARD_SERIALIZER_ID);

        let default = ctx.codec_for(&Url::parse("orbit://h:1/x").unwrap()).unwrap();
        assert_eq!(default.kind(), CodecKind::Framed);
        assert_eq!(default.serializer().name(), "json");
    }

    #[test]
    fn test_unknown_names_fail() {
        let ctx = OrbitContext::with_defaults().unwrap();
        let err = ctx
            .codec_for(&Url::parse("orbit://h:1/x?serializer=kryo").unwrap())
            .unwrap_err();
        assert!(matches!(err, OrbitError::ExtensionNotFound { .. }));

        assert!(ctx
            .transport_for(&Url::parse("orbit://h:1/x?transport=quic").unwrap())
            .is_err());
        assert!(ctx
            .codec_for(&Url::parse("orbit://h:1/x?codec=zip").unwrap())
            .is_err());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = OrbitContext::with_defaults().unwrap();
        let b = OrbitContext::new();
        assert!(a.extensions().contains::<dyn Transport>("tcp"));
        assert!(!b.extensions().contains::<dyn Transport>("tcp"));
    }
}
