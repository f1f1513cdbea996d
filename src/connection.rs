//! Internal module for establishing the transport to an IMAP server.
//!
//! Produces either a TLS stream or a plain TCP stream behind one [`MailStream`] type.

use crate::error::{Error, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP.
type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// The byte stream an IMAP session runs over.
#[derive(Debug)]
pub(crate) enum MailStream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream>),
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MailStream::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MailStream::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MailStream::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MailStream::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// Transport settings for one connection attempt.
pub(crate) struct TransportConfig<'a> {
    pub host: &'a str,
    pub target_addr: &'a str,
    pub tls: bool,
    pub accept_invalid_certs: bool,
}

/// Connects to the server, performing the TLS handshake when enabled.
#[instrument(
    name = "connection::establish",
    skip_all,
    fields(
        imap_host = %config.host,
        target_addr = %config.target_addr,
        tls = config.tls
    )
)]
pub(crate) async fn establish(config: &TransportConfig<'_>) -> Result<MailStream> {
    let tcp_stream = connect_direct(config.target_addr).await?;

    if !config.tls {
        warn!("TLS disabled, credentials will be sent in clear text");
        return Ok(MailStream::Plain(tcp_stream));
    }

    let connector = create_tls_connector(config.accept_invalid_certs);
    let server_name = parse_server_name(config.host)?;

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map(|stream| MailStream::Tls(Box::new(stream)))
        .map_err(|source| Error::TlsConnect {
            target: config.target_addr.to_string(),
            source,
        })
}

/// Creates a TLS connector with system root certificates, or one that trusts any
/// certificate when validation is relaxed.
fn create_tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let builder = ClientConfig::builder().with_safe_defaults();

    let tls_config = if accept_invalid_certs {
        debug!("Server certificate validation disabled");
        builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_cert_store = rustls::RootCertStore::empty();
        root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        builder
            .with_root_certificates(root_cert_store)
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(tls_config))
}

/// Certificate verifier that accepts every server certificate.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<ServerName> {
    ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

/// Direct TCP connection.
#[instrument(name = "connection::direct", skip_all)]
async fn connect_direct(target_addr: &str) -> Result<TcpStream> {
    debug!(target = %target_addr, "Establishing direct TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}
