//! TCP/TLS transport with line framing.

mod codec;

pub use codec::{LineCodec, MAX_IRC_LINE_LEN};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::error::{ProtocolError, Result};

static TLS_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

fn tls_config() -> Arc<ClientConfig> {
    TLS_CONFIG
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// A connected, framed IRC transport.
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    Tcp(Framed<TcpStream, LineCodec>),
    Tls(Framed<TlsStream<TcpStream>, LineCodec>),
}

impl Transport {
    /// Connect, optionally with TLS verified against the bundled roots.
    pub async fn connect(server: &str, port: u16, tls: bool) -> Result<Transport> {
        let stream = TcpStream::connect((server, port)).await?;
        if let Err(e) = enable_keepalive(&stream) {
            warn!(server, "failed to enable TCP keepalive: {}", e);
        }

        if tls {
            let domain = ServerName::try_from(server.to_string())
                .map_err(|_| ProtocolError::InvalidServerName(server.to_string()))?;
            let connector = TlsConnector::from(tls_config());
            let stream = connector.connect(domain, stream).await?;
            Ok(Transport::Tls(Framed::new(stream, LineCodec::new())))
        } else {
            Ok(Transport::Tcp(Framed::new(stream, LineCodec::new())))
        }
    }

    /// Split into independently owned read and write halves.
    pub fn split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Transport::Tcp(framed) => {
                let (sink, stream) = framed.split();
                (ReadHalf::Tcp(stream), WriteHalf::Tcp(sink))
            }
            Transport::Tls(framed) => {
                let (sink, stream) = framed.split();
                (ReadHalf::Tls(stream), WriteHalf::Tls(sink))
            }
        }
    }
}

fn enable_keepalive(stream: &TcpStream) -> Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// The read side: a stream of complete lines.
pub enum ReadHalf {
    Tcp(SplitStream<Framed<TcpStream, LineCodec>>),
    Tls(SplitStream<Framed<TlsStream<TcpStream>, LineCodec>>),
}

impl ReadHalf {
    /// Next complete line; `None` on orderly EOF.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        match self {
            ReadHalf::Tcp(stream) => stream.next().await,
            ReadHalf::Tls(stream) => stream.next().await,
        }
    }
}

/// The write side: a sink of lines; the codec owns the `\r\n`.
pub enum WriteHalf {
    Tcp(SplitSink<Framed<TcpStream, LineCodec>, String>),
    Tls(SplitSink<Framed<TlsStream<TcpStream>, LineCodec>, String>),
}

impl WriteHalf {
    pub async fn send_line(&mut self, line: String) -> Result<()> {
        match self {
            WriteHalf::Tcp(sink) => sink.send(line).await,
            WriteHalf::Tls(sink) => sink.send(line).await,
        }
    }

    /// Flush and close the write direction, tolerating a broken socket.
    pub async fn shutdown(&mut self) {
        let result = match self {
            WriteHalf::Tcp(sink) => sink.close().await,
            WriteHalf::Tls(sink) => sink.close().await,
        };
        if let Err(e) = result {
            warn!("error closing transport: {}", e);
        }
    }
}
