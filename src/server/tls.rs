//! TLS termination for incoming connections.
//!
//! The teacher has no TLS support at all; this is grounded on the `rustls`/
//! `tokio-rustls` handshake pattern used by the other example repos (see
//! `DESIGN.md`). A [`tokio_rustls::TlsAcceptor`] is built once, at server-build
//! time, from [`TlsOptions`], and reused for every accepted connection.

use crate::{
    errors::ErrorKind,
    limits::{ClientAuthPolicy, TlsOptions},
};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    server::{Acceptor, WebPkiClientVerifier},
    version::{TLS12, TLS13},
    RootCertStore, ServerConfig,
};
use std::sync::Arc;
use tokio::{net::TcpStream, time::sleep};
use tokio_rustls::{server::TlsStream, LazyConfigAcceptor};

/// Builds the shared [`ServerConfig`] from the embedder-supplied certificate
/// chain and key. Called once, in [`crate::ServerBuilder::build`].
pub(crate) fn build_acceptor(options: &TlsOptions) -> Result<Arc<ServerConfig>, ErrorKind> {
    let certs: Vec<CertificateDer<'static>> = options
        .cert_chain
        .iter()
        .map(|der| CertificateDer::from(der.clone()))
        .collect();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(options.private_key.clone()));

    let protocol_versions = match options.min_protocol_version {
        crate::limits::TlsProtocolVersion::Tls12 => &[&TLS12, &TLS13][..],
        crate::limits::TlsProtocolVersion::Tls13 => &[&TLS13][..],
    };

    let builder = ServerConfig::builder_with_protocol_versions(protocol_versions);

    let config = match options.client_auth {
        ClientAuthPolicy::None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|_| ErrorKind::TlsHandshakeFailed)?,
        ClientAuthPolicy::Optional | ClientAuthPolicy::Required => {
            // No root store is supplied by `TlsOptions`, so client certificates
            // can only be requested against an empty trust anchor set: this
            // rejects every client certificate, which is only useful for the
            // `Optional` case (clients that don't present one are still let
            // through). `Required` with no configured CAs can never succeed.
            let roots = RootCertStore::empty();
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|_| ErrorKind::TlsHandshakeFailed)?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|_| ErrorKind::TlsHandshakeFailed)?
        }
    };

    Ok(Arc::new(config))
}

/// The outcome of a failed [`accept`]: whether the plain TCP socket survived
/// the failure and can still be used to write a best-effort plaintext
/// response (e.g. the canned `TlsHandshakeFailed` body).
pub(crate) enum AcceptFailure {
    /// The `ClientHello` itself could not be parsed (e.g. a non-TLS client),
    /// which `LazyConfigAcceptor` rejects before consuming the socket.
    StreamRecovered(TcpStream),
    /// The handshake failed past that point, or timed out; `rustls`/the
    /// timeout race gives no way to recover the underlying socket.
    StreamLost,
}

/// Performs the TLS handshake on an accepted connection, bounded by
/// [`TlsOptions::handshake_timeout`].
///
/// Uses [`LazyConfigAcceptor`] instead of a plain [`tokio_rustls::TlsAcceptor`]
/// so a `ClientHello`-parse failure (the common case: a non-TLS client landing
/// on a TLS listener) hands the original socket back instead of swallowing it,
/// letting the caller still write a response. A failure further into the
/// handshake, or a timeout racing it, has no such recovery path in the
/// underlying crates and drops the socket.
pub(crate) async fn accept(
    config: &Arc<ServerConfig>,
    stream: TcpStream,
    options: &TlsOptions,
) -> Result<TlsStream<TcpStream>, AcceptFailure> {
    let lazy = LazyConfigAcceptor::new(Acceptor::default(), stream);

    let start = tokio::select! {
        biased;

        result = lazy => result,
        _ = sleep(options.handshake_timeout) => return Err(AcceptFailure::StreamLost),
    };

    let start = match start {
        Ok(start) => start,
        Err((_err, stream)) => return Err(AcceptFailure::StreamRecovered(stream)),
    };

    start
        .into_stream(config.clone())
        .await
        .map_err(|_| AcceptFailure::StreamLost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    const TEST_CERT: &[u8] = include_bytes!("../../testdata/tls/cert.der");
    const TEST_KEY: &[u8] = include_bytes!("../../testdata/tls/key.der");

    fn test_options(client_auth: ClientAuthPolicy) -> TlsOptions {
        TlsOptions {
            cert_chain: vec![TEST_CERT.to_vec()],
            private_key: TEST_KEY.to_vec(),
            client_auth,
            handshake_timeout: Duration::from_millis(200),
            ..TlsOptions::default()
        }
    }

    #[test]
    fn build_acceptor_succeeds_with_no_client_auth() {
        assert!(build_acceptor(&test_options(ClientAuthPolicy::None)).is_ok());
    }

    #[test]
    fn build_acceptor_succeeds_with_optional_client_auth_against_empty_roots() {
        assert!(build_acceptor(&test_options(ClientAuthPolicy::Optional)).is_ok());
    }

    #[test]
    fn build_acceptor_rejects_malformed_key() {
        let mut options = test_options(ClientAuthPolicy::None);
        options.private_key = b"not a key".to_vec();
        assert!(matches!(
            build_acceptor(&options),
            Err(ErrorKind::TlsHandshakeFailed)
        ));
    }

    #[tokio::test]
    async fn accept_recovers_stream_for_plain_tcp_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            // Not a TLS ClientHello - the handshake parser rejects it outright.
            let _ = stream.write_all(b"not a tls handshake at all").await;
        });

        let (stream, _) = listener.accept().await.unwrap();
        let config = build_acceptor(&test_options(ClientAuthPolicy::None)).unwrap();
        let result = accept(&config, stream, &test_options(ClientAuthPolicy::None)).await;

        assert!(matches!(result, Err(AcceptFailure::StreamRecovered(_))));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn accept_times_out_when_client_never_speaks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            // Hold the connection open without sending anything.
            sleep(Duration::from_secs(1)).await;
            drop(stream);
        });

        let (stream, _) = listener.accept().await.unwrap();
        let config = build_acceptor(&test_options(ClientAuthPolicy::None)).unwrap();
        let result = accept(&config, stream, &test_options(ClientAuthPolicy::None)).await;

        assert!(matches!(result, Err(AcceptFailure::StreamLost)));
        client.abort();
    }
}
