//! Transport selection at session open.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::transport::{HttpTransport, LaunchSpec, StreamTransport, Transport, TransportKind};
use async_trait::async_trait;

/// Starts a transport for a launch request.
///
/// The channel owns one launcher for its whole life; tests substitute
/// scripted transports through this seam.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec, config: &EngineConfig) -> Result<Box<dyn Transport>>;
}

/// Launches the real engine with the transport named in the configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineLauncher;

#[async_trait]
impl Launcher for EngineLauncher {
    async fn launch(&self, spec: &LaunchSpec, config: &EngineConfig) -> Result<Box<dyn Transport>> {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Stream => Box::new(StreamTransport::start(spec, config).await?),
            TransportKind::Http => Box::new(HttpTransport::start(spec, config).await?),
        };
        Ok(transport)
    }
}
