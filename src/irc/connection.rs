//! Socket setup and the I/O tasks of one live session.
//!
//! A [`Session`] owns three tasks: a reader that frames incoming lines, a
//! writer that serialises outgoing ones, and a ticker that paces the
//! outbound queue. None of them touch protocol state; they only forward
//! [`AppEvent`]s to the manager loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::app::event::{AppEvent, NetId, SessionId};
use crate::config::model::ServerConfig;
use crate::error::ClientError;
use crate::irc::codec::LineCodec;

/// A connected socket that has not started IRC registration yet.
pub enum Established {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Established::Plain(_) => f.write_str("Established::Plain"),
            Established::Tls(_) => f.write_str("Established::Tls"),
        }
    }
}

/// Open a TCP connection, with TLS on top when configured.
pub async fn establish(config: &ServerConfig) -> Result<Established, ClientError> {
    let address = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|source| ClientError::Connect {
            address: address.clone(),
            source,
        })?;
    debug!(%address, tls = config.tls, "TCP connected");

    if !config.tls {
        return Ok(Established::Plain(tcp));
    }

    let tls_config = if config.accept_invalid_certs {
        warn!(%address, "TLS certificate verification disabled");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|_| ClientError::InvalidServerName(config.host.clone()))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|source| ClientError::Tls {
            address: address.clone(),
            source,
        })?;
    info!(%address, "TLS handshake complete");
    Ok(Established::Tls(Box::new(stream)))
}

fn rustls_default_config() -> rustls::ClientConfig {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Handle to the I/O tasks of one session generation.
pub struct Session {
    id: SessionId,
    writer: Option<mpsc::UnboundedSender<String>>,
    /// Reader and ticker.
    tasks: Vec<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Session {
    pub fn start(
        stream: Established,
        net_id: NetId,
        id: SessionId,
        interval: Duration,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        match stream {
            Established::Plain(tcp) => Self::spawn(tcp, net_id, id, interval, events),
            Established::Tls(tls) => Self::spawn(*tls, net_id, id, interval, events),
        }
    }

    /// Spawn reader, writer and ticker tasks over `stream`.
    pub fn spawn<S>(
        stream: S,
        net_id: NetId,
        id: SessionId,
        interval: Duration,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();

        let reader = {
            let net_id = net_id.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut lines = FramedRead::new(read_half, LineCodec::new());
                let mut reason = "connection closed by peer".to_string();
                while let Some(item) = lines.next().await {
                    match item {
                        Ok(line) => {
                            let event = AppEvent::Line {
                                net_id: net_id.clone(),
                                session: id,
                                line,
                            };
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            reason = e.to_string();
                            break;
                        }
                    }
                }
                let _ = events.send(AppEvent::Closed {
                    net_id,
                    session: id,
                    reason,
                });
            })
        };

        let writer = {
            let net_id = net_id.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut sink = FramedWrite::new(write_half, LineCodec::new());
                while let Some(line) = writer_rx.recv().await {
                    if let Err(e) = sink.send(line).await {
                        let _ = events.send(AppEvent::Closed {
                            net_id,
                            session: id,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
                // Sender dropped: flush what was written and shut the socket down.
                let _ = sink.close().await;
            })
        };

        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let tick = AppEvent::Tick {
                    net_id: net_id.clone(),
                    session: id,
                };
                if events.send(tick).is_err() {
                    break;
                }
            }
        });

        Self {
            id,
            writer: Some(writer_tx),
            tasks: vec![reader, ticker],
            writer_task: Some(writer),
        }
    }

    /// A session whose written lines land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn for_tests(id: SessionId) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let session = Self {
            id,
            writer: Some(writer_tx),
            tasks: Vec::new(),
            writer_task: None,
        };
        (session, writer_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.writer.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hand one line to the writer task. A no-op once the session is closed.
    pub fn write(&self, line: String) -> bool {
        match self.writer {
            Some(ref tx) => tx.send(line).is_ok(),
            None => false,
        }
    }

    /// Stop reading and pacing. Lines already handed to the writer are
    /// flushed before the socket shuts down; the returned handle completes
    /// once that has happened.
    pub fn close(&mut self) -> Option<JoinHandle<()>> {
        self.writer = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer_task.take()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
