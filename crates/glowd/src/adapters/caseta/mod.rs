//! Lutron Caseta adapter
//!
//! Talks LEAP to the Smart Bridge over a persistent TLS connection. The
//! connection is opened lazily and dropped after a transport error or an
//! interrupted exchange, so the next call reconnects.

mod leap;
mod tls;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::info;
use tracing::warn;

use self::leap::LeapConnection;
use super::Adapter;
use super::AdapterContext;
use super::AdapterFactoryResult;
use crate::config::CasetaConfig;
use crate::engine::LightState;
use crate::engine::Rgb;
use crate::error::VendorError;
use crate::registry::Capability;
use crate::registry::Connection;
use crate::registry::Light;
use crate::registry::Vendor;

/// Opens a fresh byte stream to the bridge
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self) -> Result<Self::Stream, VendorError>;
}

/// TLS with client certificate authentication, as the Smart Bridge expects
pub struct TlsBridge {
    host: String,
    port: u16,
    tls: TlsConnector,
}

impl TlsBridge {
    pub fn new(config: &CasetaConfig) -> Result<Self, VendorError> {
        let tls = tls::client_config(&config.cert, &config.key, &config.ca)?;
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            tls: TlsConnector::from(Arc::new(tls)),
        })
    }
}

#[async_trait]
impl Connector for TlsBridge {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream, VendorError> {
        info!("Connecting to Caseta bridge at {}:{}", self.host, self.port);
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| VendorError::Tls(format!("invalid bridge host '{}': {}", self.host, e)))?;
        let stream = self.tls.connect(server_name, tcp).await?;
        info!("Connected to Caseta bridge");
        Ok(stream)
    }
}

pub struct CasetaAdapter<C: Connector = TlsBridge> {
    connector: C,
    connection: Mutex<Option<LeapConnection<C::Stream>>>,
}

impl CasetaAdapter<TlsBridge> {
    pub fn new(config: &CasetaConfig) -> Result<Self, VendorError> {
        Ok(Self::with_connector(TlsBridge::new(config)?))
    }
}

impl<C: Connector> CasetaAdapter<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
        }
    }

    /// Run one LEAP exchange on the shared connection
    ///
    /// The session is taken out of its slot for the duration of the exchange
    /// and only put back once the exchange has finished cleanly. An exchange
    /// that is cancelled part way, e.g. by a timeout, leaves the slot empty
    /// and the next call reconnects.
    async fn with_connection<T>(
        &self,
        op: impl for<'c> FnOnce(
            &'c mut LeapConnection<C::Stream>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<T, VendorError>> + Send + 'c>,
        >,
    ) -> Result<T, VendorError> {
        let mut guard = self.connection.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => LeapConnection::new(self.connector.connect().await?),
        };

        let result = op(&mut conn).await;
        match &result {
            Err(e @ (VendorError::Io(_) | VendorError::Protocol(_))) => {
                warn!("Dropping Caseta bridge connection: {}", e);
            }
            _ => *guard = Some(conn),
        }
        result
    }
}

fn zone(light: &Light) -> Result<u32, VendorError> {
    match light.connection {
        Connection::Caseta { zone } => Ok(zone),
        _ => Err(VendorError::Protocol(format!(
            "light '{}' is not a Caseta light",
            light.id
        ))),
    }
}

#[async_trait]
impl<C: Connector + 'static> Adapter for CasetaAdapter<C> {
    fn vendor(&self) -> Vendor {
        Vendor::Caseta
    }

    async fn set_brightness(&self, light: &Light, brightness: u8) -> Result<(), VendorError> {
        let zone = zone(light)?;
        self.with_connection(|conn| Box::pin(conn.go_to_level(zone, brightness)))
            .await
    }

    async fn set_color(
        &self,
        _light: &Light,
        _color: Rgb,
        _brightness: Option<u8>,
    ) -> Result<(), VendorError> {
        Err(VendorError::Unsupported(Capability::Color, Vendor::Caseta))
    }

    async fn status(&self, light: &Light) -> Result<LightState, VendorError> {
        let zone = zone(light)?;
        let level = self
            .with_connection(|conn| Box::pin(conn.zone_level(zone)))
            .await?;
        Ok(LightState::dimmed(level))
    }
}

#[distributed_slice(super::REGISTRY)]
fn init_caseta(ctx: &AdapterContext) -> AdapterFactoryResult {
    if !ctx.config.lights.iter().any(|l| l.vendor() == Vendor::Caseta) {
        return Ok(None);
    }

    let caseta = ctx
        .config
        .caseta
        .as_ref()
        .context("Caseta lights are configured but [caseta] is missing")?;
    let adapter = CasetaAdapter::new(caseta).context("Failed to set up Caseta TLS")?;
    Ok(Some(Box::new(adapter)))
}
