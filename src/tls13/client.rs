use std::sync::Arc;

use crate::tls13::key_schedule::{HashAlg, KeySchedule, Transcript};
use crate::tls13::message::{
    split_message, CertificateMsg, CertificateRequest, CertificateVerify, ClientHello,
    EncryptedExtensions, Finished, KeyShareEntry, ServerHello,
};
use crate::tls13::{
    CryptoProvider, HandshakeError, KeyExchange, GROUP_P256, GROUP_X25519, MSG_CERTIFICATE,
    MSG_CERTIFICATE_REQUEST, MSG_CERTIFICATE_VERIFY, MSG_ENCRYPTED_EXTENSIONS, MSG_FINISHED,
    MSG_SERVER_HELLO, PSK_MODE_DHE, SIGN_ECDSA_P256_SHA256, SIGN_ECDSA_P384_SHA384, SIGN_ED25519,
    SIGN_PKCS1_SHA256, SIGN_PSS_SHA256, SIGN_PSS_SHA384, TLS_AES_128_GCM_SHA256,
    TLS_AES_256_GCM_SHA384, TLS_CHACHA20_POLY1305_SHA256, TLS_VERSION_12, TLS_VERSION_13,
};

type Result<T> = std::result::Result<T, HandshakeError>;

const SERVER_SIGNATURE_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// Client-side knobs for one handshake.
pub struct HandshakeConfig {
    pub server_name: String,
    pub alpn_protocols: Vec<String>,
    pub cipher_suites: Vec<u16>,
    pub groups: Vec<u16>,
    pub signature_schemes: Vec<u16>,
    pub quic_params: Option<Vec<u8>>,
    pub verify_peer: bool,
}

impl HandshakeConfig {
    pub fn new(server_name: &str) -> HandshakeConfig {
        HandshakeConfig {
            server_name: server_name.to_string(),
            alpn_protocols: Vec::new(),
            cipher_suites: vec![
                TLS_AES_128_GCM_SHA256,
                TLS_AES_256_GCM_SHA384,
                TLS_CHACHA20_POLY1305_SHA256,
            ],
            groups: vec![GROUP_X25519, GROUP_P256],
            signature_schemes: vec![
                SIGN_ECDSA_P256_SHA256,
                SIGN_ECDSA_P384_SHA384,
                SIGN_ED25519,
                SIGN_PSS_SHA256,
                SIGN_PSS_SHA384,
                SIGN_PKCS1_SHA256,
            ],
            quic_params: None,
            verify_peer: true,
        }
    }
}

/// Negotiated handshake state. Fields accrete monotonically; a new
/// handshake allocates a fresh session.
pub struct Session {
    pub suite: u16,
    pub transcript_hash: Vec<u8>,
    pub peer_certs: Vec<Vec<u8>>,
    pub client_handshake_traffic_secret: Vec<u8>,
    pub server_handshake_traffic_secret: Vec<u8>,
    pub client_application_traffic_secret: Vec<u8>,
    pub server_application_traffic_secret: Vec<u8>,
    pub alpn_protocol: Option<String>,
    pub peer_quic_params: Option<Vec<u8>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClientState {
    WaitServerHello,
    WaitEncryptedExtensions,
    WaitCertificate,
    WaitCertificateVerify,
    WaitFinished,
    Done,
    Failed,
}

/// Client-role TLS 1.3 message flow, fed whole (deframed) handshake
/// messages: ClientHello out, ServerHello (maybe HelloRetryRequest),
/// EncryptedExtensions, optional CertificateRequest, Certificate,
/// CertificateVerify, Finished in, Finished out.
pub struct ClientHandshaker {
    provider: Arc<dyn CryptoProvider>,
    config: HandshakeConfig,
    state: ClientState,

    hello: ClientHello,
    hello_raw: Vec<u8>,
    transcript: Option<Transcript>,
    key_exchange: Option<Box<dyn KeyExchange>>,
    key_schedule: Option<KeySchedule>,
    suite: u16,
    retried: bool,

    cert_request_context: Option<Vec<u8>>,
    peer_certs: Vec<Vec<u8>>,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    alpn_protocol: Option<String>,
    peer_quic_params: Option<Vec<u8>>,

    session: Option<Session>,
}

impl ClientHandshaker {
    /// Build the handshaker and the initial ClientHello to put on the wire.
    /// `random` and `session_id` come from the caller so the QUIC layer
    /// controls its own entropy source.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        config: HandshakeConfig,
        random: [u8; 32],
        session_id: Vec<u8>,
    ) -> Result<(ClientHandshaker, Vec<u8>)> {
        let group = *config
            .groups
            .first()
            .ok_or(HandshakeError::Unsupported("no key exchange groups"))?;
        let key_exchange = provider.start_key_exchange(group)?;

        let hello = ClientHello {
            legacy_version: TLS_VERSION_12,
            random,
            session_id,
            cipher_suites: config.cipher_suites.clone(),
            compression_methods: vec![0],
            server_name: Some(config.server_name.clone()),
            supported_groups: config.groups.clone(),
            supported_points: vec![0],
            signature_schemes: config.signature_schemes.clone(),
            alpn_protocols: config.alpn_protocols.clone(),
            supported_versions: vec![TLS_VERSION_13],
            psk_modes: vec![PSK_MODE_DHE],
            key_shares: vec![KeyShareEntry {
                group,
                data: key_exchange.public_key(),
            }],
            cookie: None,
            quic_params: config.quic_params.clone(),
            extra_extensions: Vec::new(),
        };

        let hello_raw = hello.encode();

        let handshaker = ClientHandshaker {
            provider,
            config,
            state: ClientState::WaitServerHello,
            hello,
            hello_raw: hello_raw.clone(),
            transcript: None,
            key_exchange: Some(key_exchange),
            key_schedule: None,
            suite: 0,
            retried: false,
            cert_request_context: None,
            peer_certs: Vec::new(),
            client_hs_secret: Vec::new(),
            server_hs_secret: Vec::new(),
            alpn_protocol: None,
            peer_quic_params: None,
            session: None,
        };

        Ok((handshaker, hello_raw))
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ClientState::Done
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Handshake traffic secrets become available once the ServerHello is
    /// processed; the QUIC layer needs them before the handshake finishes.
    pub fn handshake_traffic_secrets(&self) -> Option<(&[u8], &[u8])> {
        if self.client_hs_secret.is_empty() {
            None
        } else {
            Some((&self.client_hs_secret, &self.server_hs_secret))
        }
    }

    /// Feed one complete handshake message (header included). Returns the
    /// messages to send in response, in order.
    pub fn consume(&mut self, raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let (msg_type, body, rest) =
            split_message(raw)?.ok_or(HandshakeError::Malformed("truncated message"))?;
        if !rest.is_empty() {
            return Err(HandshakeError::Malformed("trailing bytes"));
        }

        let result = self.consume_inner(msg_type, body, raw);
        if result.is_err() {
            self.state = ClientState::Failed;
        }
        result
    }

    fn consume_inner(&mut self, msg_type: u8, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        match (self.state, msg_type) {
            (ClientState::WaitServerHello, MSG_SERVER_HELLO) => self.on_server_hello(body, raw),
            (ClientState::WaitEncryptedExtensions, MSG_ENCRYPTED_EXTENSIONS) => {
                self.on_encrypted_extensions(body, raw)
            }
            (ClientState::WaitCertificate, MSG_CERTIFICATE_REQUEST) => {
                self.on_certificate_request(body, raw)
            }
            (ClientState::WaitCertificate, MSG_CERTIFICATE) => self.on_certificate(body, raw),
            (ClientState::WaitCertificateVerify, MSG_CERTIFICATE_VERIFY) => {
                self.on_certificate_verify(body, raw)
            }
            (ClientState::WaitFinished, MSG_FINISHED) => self.on_finished(body, raw),
            (_, other) => Err(HandshakeError::UnexpectedMessage(other)),
        }
    }

    fn on_server_hello(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let sh = ServerHello::decode(body)?;

        if sh.supported_version != Some(TLS_VERSION_13) {
            return Err(HandshakeError::Unsupported("server not TLS 1.3"));
        }
        if !self.config.cipher_suites.contains(&sh.cipher_suite) {
            return Err(HandshakeError::Unsupported("cipher suite not offered"));
        }
        if sh.session_id_echo != self.hello.session_id {
            return Err(HandshakeError::Malformed("session id echo mismatch"));
        }
        if sh.compression_method != 0 {
            return Err(HandshakeError::Malformed("compression"));
        }
        if self.retried && sh.cipher_suite != self.suite {
            return Err(HandshakeError::Malformed("suite changed after retry"));
        }

        let alg = HashAlg::for_suite(sh.cipher_suite)
            .ok_or(HandshakeError::Unsupported("cipher suite"))?;

        if sh.is_hello_retry_request() {
            return self.on_hello_retry_request(&sh, alg, raw);
        }

        self.suite = sh.cipher_suite;

        let mut transcript = match self.transcript.take() {
            // Post-retry: CH1 substitution, HRR and CH2 already hashed.
            Some(transcript) => transcript,
            None => {
                let mut transcript = Transcript::new(alg);
                transcript.update(&self.hello_raw);
                transcript
            }
        };
        transcript.update(raw);

        let share = sh
            .key_share
            .ok_or(HandshakeError::Malformed("missing key share"))?;
        let key_exchange = self
            .key_exchange
            .take()
            .ok_or(HandshakeError::Crypto("key exchange consumed"))?;
        if share.group != key_exchange.group() {
            return Err(HandshakeError::Malformed("key share group mismatch"));
        }
        let shared = key_exchange.shared_secret(&share.data)?;

        let mut key_schedule = KeySchedule::new(alg);
        key_schedule.derive_handshake(&shared);

        let th = transcript.current_hash();
        self.client_hs_secret = key_schedule
            .client_handshake_traffic_secret(&th)
            .ok_or(HandshakeError::Crypto("key schedule"))?;
        self.server_hs_secret = key_schedule
            .server_handshake_traffic_secret(&th)
            .ok_or(HandshakeError::Crypto("key schedule"))?;

        self.key_schedule = Some(key_schedule);
        self.transcript = Some(transcript);
        self.state = ClientState::WaitEncryptedExtensions;

        Ok(Vec::new())
    }

    fn on_hello_retry_request(
        &mut self,
        sh: &ServerHello,
        alg: HashAlg,
        raw: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        if self.retried {
            return Err(HandshakeError::Malformed("second retry"));
        }
        if sh.selected_group.is_none() && sh.cookie.is_none() {
            return Err(HandshakeError::Malformed("empty retry"));
        }

        self.retried = true;
        self.suite = sh.cipher_suite;

        let mut transcript = Transcript::new(alg);
        transcript.update(&self.hello_raw);
        transcript.retry_substitute(alg);
        transcript.update(raw);

        if let Some(group) = sh.selected_group {
            if !self.config.groups.contains(&group) {
                return Err(HandshakeError::Unsupported("retry group not offered"));
            }
            if self.hello.key_shares.first().map(|share| share.group) == Some(group) {
                return Err(HandshakeError::Malformed("retry with offered group"));
            }

            let key_exchange = self.provider.start_key_exchange(group)?;
            self.hello.key_shares = vec![KeyShareEntry {
                group,
                data: key_exchange.public_key(),
            }];
            self.key_exchange = Some(key_exchange);
        }

        self.hello.cookie = sh.cookie.clone();

        let hello_raw = self.hello.encode();
        transcript.update(&hello_raw);
        self.hello_raw = hello_raw.clone();
        self.transcript = Some(transcript);

        Ok(vec![hello_raw])
    }

    fn on_encrypted_extensions(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let ee = EncryptedExtensions::decode(body)?;

        if let Some(proto) = &ee.alpn_protocol {
            if !self.config.alpn_protocols.iter().any(|p| p == proto) {
                return Err(HandshakeError::Unsupported("alpn not offered"));
            }
        }

        self.alpn_protocol = ee.alpn_protocol;
        self.peer_quic_params = ee.quic_params;

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.update(raw);
        }
        self.state = ClientState::WaitCertificate;

        Ok(Vec::new())
    }

    fn on_certificate_request(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let request = CertificateRequest::decode(body)?;
        self.cert_request_context = Some(request.context);

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.update(raw);
        }

        Ok(Vec::new())
    }

    fn on_certificate(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let msg = CertificateMsg::decode(body)?;
        if msg.entries.is_empty() {
            return Err(HandshakeError::Malformed("empty certificate list"));
        }

        self.peer_certs = msg.entries.into_iter().map(|entry| entry.cert).collect();

        if self.config.verify_peer {
            self.provider
                .verify_certificate_chain(&self.peer_certs, &self.config.server_name)?;
        }

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.update(raw);
        }
        self.state = ClientState::WaitCertificateVerify;

        Ok(Vec::new())
    }

    fn on_certificate_verify(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cv = CertificateVerify::decode(body)?;

        if !self.config.signature_schemes.contains(&cv.scheme) {
            return Err(HandshakeError::Unsupported("signature scheme"));
        }

        let transcript = self
            .transcript
            .as_mut()
            .ok_or(HandshakeError::Crypto("no transcript"))?;

        // Signature covers the transcript up to (excluding) this message.
        let th = transcript.current_hash();
        let mut signed = vec![0x20u8; 64];
        signed.extend_from_slice(SERVER_SIGNATURE_CONTEXT);
        signed.push(0);
        signed.extend_from_slice(&th);

        if self.config.verify_peer {
            self.provider
                .verify_signature(cv.scheme, &self.peer_certs[0], &signed, &cv.signature)?;
        }

        transcript.update(raw);
        self.state = ClientState::WaitFinished;

        Ok(Vec::new())
    }

    fn on_finished(&mut self, body: &[u8], raw: &[u8]) -> Result<Vec<Vec<u8>>> {
        let fin = Finished::decode(body)?;

        let transcript = self
            .transcript
            .as_mut()
            .ok_or(HandshakeError::Crypto("no transcript"))?;
        let key_schedule = self
            .key_schedule
            .as_mut()
            .ok_or(HandshakeError::Crypto("no key schedule"))?;

        let th = transcript.current_hash();
        let expected = key_schedule.finished_verify_data(&self.server_hs_secret, &th);
        if expected != fin.verify_data {
            return Err(HandshakeError::Crypto("finished verification failed"));
        }

        transcript.update(raw);

        // Application traffic keys cover ClientHello..server Finished.
        if !key_schedule.derive_master() {
            return Err(HandshakeError::Crypto("key schedule"));
        }
        let th_server_fin = transcript.current_hash();
        let client_ap = key_schedule
            .client_application_traffic_secret(&th_server_fin)
            .ok_or(HandshakeError::Crypto("key schedule"))?;
        let server_ap = key_schedule
            .server_application_traffic_secret(&th_server_fin)
            .ok_or(HandshakeError::Crypto("key schedule"))?;

        let mut outgoing = Vec::new();

        // Client authentication is not offered; answer a request with an
        // empty certificate list.
        if let Some(context) = self.cert_request_context.take() {
            let empty = CertificateMsg {
                context,
                entries: Vec::new(),
            }
            .encode();
            transcript.update(&empty);
            outgoing.push(empty);
        }

        let verify_data =
            key_schedule.finished_verify_data(&self.client_hs_secret, &transcript.current_hash());
        let client_fin = Finished { verify_data }.encode();
        transcript.update(&client_fin);
        outgoing.push(client_fin);

        self.session = Some(Session {
            suite: self.suite,
            transcript_hash: transcript.current_hash(),
            peer_certs: self.peer_certs.clone(),
            client_handshake_traffic_secret: self.client_hs_secret.clone(),
            server_handshake_traffic_secret: self.server_hs_secret.clone(),
            client_application_traffic_secret: client_ap,
            server_application_traffic_secret: server_ap,
            alpn_protocol: self.alpn_protocol.clone(),
            peer_quic_params: self.peer_quic_params.clone(),
        });
        self.state = ClientState::Done;

        Ok(outgoing)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tls13::key_schedule::{derive_secret, hkdf_extract};
    use crate::tls13::HELLO_RETRY_REQUEST_RANDOM;

    struct StubKeyExchange {
        group: u16,
    }

    impl KeyExchange for StubKeyExchange {
        fn group(&self) -> u16 {
            self.group
        }

        fn public_key(&self) -> Vec<u8> {
            vec![0x20; 32]
        }

        fn shared_secret(self: Box<Self>, _peer_public: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0x33; 32])
        }
    }

    struct StubProvider;

    impl CryptoProvider for StubProvider {
        fn start_key_exchange(&self, group: u16) -> Result<Box<dyn KeyExchange>> {
            Ok(Box::new(StubKeyExchange { group }))
        }

        fn verify_certificate_chain(&self, _certs: &[Vec<u8>], _server_name: &str) -> Result<()> {
            Ok(())
        }

        fn verify_signature(
            &self,
            _scheme: u16,
            _cert: &[u8],
            _message: &[u8],
            _signature: &[u8],
        ) -> Result<()> {
            Ok(())
        }
    }

    fn new_handshaker() -> (ClientHandshaker, Vec<u8>) {
        let config = HandshakeConfig::new("example.com");
        ClientHandshaker::new(Arc::new(StubProvider), config, [0x11; 32], vec![0xAA; 32]).unwrap()
    }

    fn server_hello_for(hello_raw: &[u8]) -> Vec<u8> {
        let hello = ClientHello::decode(&hello_raw[4..]).unwrap();
        ServerHello {
            legacy_version: TLS_VERSION_12,
            random: [0x99; 32],
            session_id_echo: hello.session_id,
            cipher_suite: TLS_AES_128_GCM_SHA256,
            compression_method: 0,
            supported_version: Some(TLS_VERSION_13),
            key_share: Some(KeyShareEntry {
                group: GROUP_X25519,
                data: vec![0x44; 32],
            }),
            selected_group: None,
            cookie: None,
        }
        .encode()
    }

    #[test]
    fn happy_path_reaches_done_with_correct_finished() {
        let (mut hs, ch_raw) = new_handshaker();

        let sh_raw = server_hello_for(&ch_raw);
        assert!(hs.consume(&sh_raw).unwrap().is_empty());
        assert_eq!(hs.state(), ClientState::WaitEncryptedExtensions);
        assert!(hs.handshake_traffic_secrets().is_some());

        let ee_raw = EncryptedExtensions::default().encode();
        hs.consume(&ee_raw).unwrap();

        let cert_raw = CertificateMsg {
            context: vec![],
            entries: vec![crate::tls13::CertificateEntry {
                cert: vec![1, 2, 3],
                extensions: vec![],
            }],
        }
        .encode();
        hs.consume(&cert_raw).unwrap();

        let cv_raw = CertificateVerify {
            scheme: SIGN_PSS_SHA256,
            signature: vec![0; 64],
        }
        .encode();
        hs.consume(&cv_raw).unwrap();
        assert_eq!(hs.state(), ClientState::WaitFinished);

        // Replicate the server's side of the schedule to build a valid
        // Finished message.
        let alg = HashAlg::Sha256;
        let mut transcript = Transcript::new(alg);
        for raw in [&ch_raw[..], &sh_raw[..], &ee_raw[..], &cert_raw[..], &cv_raw[..]] {
            transcript.update(raw);
        }

        let mut schedule = KeySchedule::new(alg);
        schedule.derive_handshake(&[0x33; 32]);

        let mut th_sh = Transcript::new(alg);
        th_sh.update(&ch_raw);
        th_sh.update(&sh_raw);
        let server_hs = schedule
            .server_handshake_traffic_secret(&th_sh.current_hash())
            .unwrap();
        let client_hs = schedule
            .client_handshake_traffic_secret(&th_sh.current_hash())
            .unwrap();

        let verify_data = schedule.finished_verify_data(&server_hs, &transcript.current_hash());
        let fin_raw = Finished { verify_data }.encode();

        let outgoing = hs.consume(&fin_raw).unwrap();
        assert!(hs.is_done());
        assert_eq!(outgoing.len(), 1);

        // The client Finished must verify under the replicated schedule.
        transcript.update(&fin_raw);
        let expected =
            schedule.finished_verify_data(&client_hs, &transcript.current_hash());
        let (typ, body, _) = split_message(&outgoing[0]).unwrap().unwrap();
        assert_eq!(typ, MSG_FINISHED);
        assert_eq!(body, &expected[..]);

        let session = hs.session().unwrap();
        assert_eq!(session.suite, TLS_AES_128_GCM_SHA256);
        assert_eq!(session.peer_certs, vec![vec![1, 2, 3]]);
        assert!(!session.client_application_traffic_secret.is_empty());
    }

    #[test]
    fn bad_finished_fails() {
        let (mut hs, ch_raw) = new_handshaker();

        hs.consume(&server_hello_for(&ch_raw)).unwrap();
        hs.consume(&EncryptedExtensions::default().encode()).unwrap();
        hs.consume(
            &CertificateMsg {
                context: vec![],
                entries: vec![crate::tls13::CertificateEntry {
                    cert: vec![1],
                    extensions: vec![],
                }],
            }
            .encode(),
        )
        .unwrap();
        hs.consume(
            &CertificateVerify {
                scheme: SIGN_PSS_SHA256,
                signature: vec![0; 64],
            }
            .encode(),
        )
        .unwrap();

        let bogus = Finished {
            verify_data: vec![0xEE; 32],
        }
        .encode();
        assert!(hs.consume(&bogus).is_err());
        assert_eq!(hs.state(), ClientState::Failed);
    }

    #[test]
    fn unexpected_message_rejected() {
        let (mut hs, _ch_raw) = new_handshaker();

        let ee_raw = EncryptedExtensions::default().encode();
        assert_eq!(
            hs.consume(&ee_raw),
            Err(HandshakeError::UnexpectedMessage(MSG_ENCRYPTED_EXTENSIONS))
        );
    }

    #[test]
    fn hello_retry_request_resends_hello() {
        let (mut hs, ch_raw) = new_handshaker();
        let hello = ClientHello::decode(&ch_raw[4..]).unwrap();

        let hrr = ServerHello {
            legacy_version: TLS_VERSION_12,
            random: HELLO_RETRY_REQUEST_RANDOM,
            session_id_echo: hello.session_id,
            cipher_suite: TLS_AES_128_GCM_SHA256,
            compression_method: 0,
            supported_version: Some(TLS_VERSION_13),
            key_share: None,
            selected_group: Some(GROUP_P256),
            cookie: Some(b"crumb".to_vec()),
        }
        .encode();

        let outgoing = hs.consume(&hrr).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(hs.state(), ClientState::WaitServerHello);

        let second = ClientHello::decode(&outgoing[0][4..]).unwrap();
        assert_eq!(second.key_shares.len(), 1);
        assert_eq!(second.key_shares[0].group, GROUP_P256);
        assert_eq!(second.cookie.as_deref(), Some(&b"crumb"[..]));

        // A second retry is fatal.
        let hrr2 = ServerHello {
            legacy_version: TLS_VERSION_12,
            random: HELLO_RETRY_REQUEST_RANDOM,
            session_id_echo: second.session_id,
            cipher_suite: TLS_AES_128_GCM_SHA256,
            compression_method: 0,
            supported_version: Some(TLS_VERSION_13),
            key_share: None,
            selected_group: None,
            cookie: Some(b"again".to_vec()),
        }
        .encode();
        assert!(hs.consume(&hrr2).is_err());
    }

    #[test]
    fn schedule_replication_sanity() {
        // hkdf_extract and derive_secret compose the same way both sides.
        let alg = HashAlg::Sha256;
        let zeros = vec![0u8; 32];
        let early = hkdf_extract(alg, &zeros, &zeros);
        let derived = derive_secret(alg, &early, "derived", &alg.empty_hash());
        let handshake = hkdf_extract(alg, &derived, &[0x33; 32]);

        let mut schedule = KeySchedule::new(alg);
        schedule.derive_handshake(&[0x33; 32]);
        assert_eq!(schedule.handshake_secret().unwrap(), &handshake[..]);
    }
}
