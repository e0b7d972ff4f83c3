use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

use spout_io::service::Service;
use spout_io::transport::{
    AcceptorCallbacks, DialerCallbacks, TcpAcceptor, TcpTransport, TlsAcceptor, TlsDialer,
    TlsSyncDialer, TlsTransport, TransportCallbacks,
};

fn wait_until<F: Fn() -> bool>(deadline: Duration, cond: F) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn ephemeral() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
    (vec![cert], key)
}

/// Test-only verifier: the acceptor uses a freshly generated self-signed
/// certificate.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

fn client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Arc::new(config)
}

#[test]
fn tls_echo() {
    let service = Service::new(2).unwrap();
    service.start();

    let (certs, key) = self_signed();
    let acceptor =
        TlsAcceptor::with_cert_chain(certs, key, &ephemeral(), Duration::from_secs(2)).unwrap();

    let server_side: Arc<Mutex<Vec<Arc<TlsTransport>>>> = Arc::new(Mutex::new(Vec::new()));
    let held = server_side.clone();
    let sv = service.clone();
    acceptor
        .start(
            &service,
            AcceptorCallbacks {
                on_accepted: Box::new(move |transport: Arc<TlsTransport>| {
                    let echo = Arc::downgrade(&transport);
                    let cbs = TransportCallbacks {
                        on_read: Box::new(move |data| {
                            if let Some(t) = echo.upgrade() {
                                let _ = t.send(data);
                            }
                        }),
                        ..Default::default()
                    };
                    transport.start(&sv, 0, cbs).unwrap();
                    held.lock().unwrap().push(transport);
                }),
                on_stopped: Box::new(|| {}),
            },
        )
        .unwrap();

    let client = TlsSyncDialer::dial(
        &service,
        client_config(),
        "localhost",
        None,
        acceptor.local_addr(),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client
        .start(
            &service,
            0,
            TransportCallbacks {
                on_read: Box::new(move |data| {
                    sink.lock().unwrap().extend_from_slice(data);
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let mut sent = Vec::new();
    for round in 0..16u32 {
        let chunk: Vec<u8> = (0..2048).map(|i| (round as usize * 13 + i) as u8).collect();
        sent.extend_from_slice(&chunk);
        client.send(&chunk).unwrap();
    }

    assert!(wait_until(Duration::from_secs(4), || {
        received.lock().unwrap().len() == sent.len()
    }));
    assert_eq!(*received.lock().unwrap(), sent);

    service.stop();
    service.wait_stopped();
}

// S3: the peer accepts TCP but never speaks TLS; the dialer times out and
// on_dialed never fires.
#[test]
fn tls_handshake_timeout() {
    let service = Service::new(2).unwrap();
    service.start();

    // Plain TCP acceptor that parks every connection unread.
    let mute: Arc<Mutex<Vec<Arc<TcpTransport>>>> = Arc::new(Mutex::new(Vec::new()));
    let acceptor = TcpAcceptor::new(&ephemeral()).unwrap();
    let held = mute.clone();
    acceptor
        .start(
            &service,
            AcceptorCallbacks {
                on_accepted: Box::new(move |transport| {
                    held.lock().unwrap().push(transport);
                }),
                on_stopped: Box::new(|| {}),
            },
        )
        .unwrap();

    let dialed = Arc::new(AtomicUsize::new(0));
    let timeouts = Arc::new(AtomicUsize::new(0));

    let dialer = TlsDialer::new(
        client_config(),
        "localhost",
        None,
        acceptor.local_addr(),
        Duration::from_secs(2),
        Duration::from_millis(200),
    );

    let dialed_count = dialed.clone();
    let timeout_count = timeouts.clone();
    let started = Instant::now();
    dialer
        .dial(
            &service,
            DialerCallbacks {
                on_dialed: Box::new(move |_transport| {
                    dialed_count.fetch_add(1, Ordering::SeqCst);
                }),
                on_timeout: Box::new(move || {
                    timeout_count.fetch_add(1, Ordering::SeqCst);
                }),
                on_stopped: Box::new(|| {}),
            },
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        timeouts.load(Ordering::SeqCst) == 1
    }));
    assert!(started.elapsed() < Duration::from_millis(1500));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(dialed.load(Ordering::SeqCst), 0);
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);

    service.stop();
    service.wait_stopped();
}

#[test]
fn tls_sync_dial_to_closed_port_fails() {
    let service = Service::new(1).unwrap();
    service.start();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let remote: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let result = TlsSyncDialer::dial(
        &service,
        client_config(),
        "localhost",
        None,
        remote,
        Duration::from_secs(1),
        Duration::from_secs(1),
    );
    assert!(result.is_err());

    service.stop();
    service.wait_stopped();
}
