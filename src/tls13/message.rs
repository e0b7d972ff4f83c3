use crate::tls13::{
    HandshakeError, EXT_ALPN, EXT_COOKIE, EXT_KEY_SHARE, EXT_PSK_MODES,
    EXT_QUIC_TRANSPORT_PARAMETERS, EXT_SERVER_NAME, EXT_SIGNATURE_ALGORITHMS,
    EXT_SUPPORTED_GROUPS, EXT_SUPPORTED_POINTS, EXT_SUPPORTED_VERSIONS, HELLO_RETRY_REQUEST_RANDOM,
    MSG_CERTIFICATE, MSG_CERTIFICATE_REQUEST, MSG_CERTIFICATE_VERIFY, MSG_CLIENT_HELLO,
    MSG_ENCRYPTED_EXTENSIONS, MSG_FINISHED, MSG_SERVER_HELLO,
};

type Result<T> = std::result::Result<T, HandshakeError>;

// ---------------------------------------------------------------------------
// Byte cursor helpers. All vectors on the wire are length-prefixed with 1, 2
// or 3 bytes.

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(HandshakeError::Malformed("short read"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    pub fn vec8(&mut self) -> Result<&'a [u8]> {
        let n = self.u8()? as usize;
        self.take(n)
    }

    pub fn vec16(&mut self) -> Result<&'a [u8]> {
        let n = self.u16()? as usize;
        self.take(n)
    }

    pub fn vec24(&mut self) -> Result<&'a [u8]> {
        let n = self.u24()?;
        self.take(n)
    }
}

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn vec8<F: FnOnce(&mut Writer)>(&mut self, f: F) {
        let mark = self.buf.len();
        self.buf.push(0);
        f(self);
        let len = self.buf.len() - mark - 1;
        self.buf[mark] = len as u8;
    }

    pub fn vec16<F: FnOnce(&mut Writer)>(&mut self, f: F) {
        let mark = self.buf.len();
        self.buf.extend_from_slice(&[0, 0]);
        f(self);
        let len = self.buf.len() - mark - 2;
        self.buf[mark..mark + 2].copy_from_slice(&(len as u16).to_be_bytes());
    }

    pub fn vec24<F: FnOnce(&mut Writer)>(&mut self, f: F) {
        let mark = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0]);
        f(self);
        let len = self.buf.len() - mark - 3;
        self.buf[mark] = (len >> 16) as u8;
        self.buf[mark + 1] = (len >> 8) as u8;
        self.buf[mark + 2] = len as u8;
    }
}

/// Frame `body` as a handshake message: type byte plus u24 length.
pub fn frame_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(msg_type);
    out.push((body.len() >> 16) as u8);
    out.push((body.len() >> 8) as u8);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
    out
}

/// Split one complete handshake message off the front of `buf`. Returns
/// `None` while the header or body is still incomplete.
pub fn split_message(buf: &[u8]) -> Result<Option<(u8, &[u8], &[u8])>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | buf[3] as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    Ok(Some((buf[0], &buf[4..4 + len], &buf[4 + len..])))
}

// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Extension {
    pub typ: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KeyShareEntry {
    pub group: u16,
    pub data: Vec<u8>,
}

/// ClientHello with the extension set this library offers. Unknown
/// extensions survive decoding in `extra_extensions`.
#[derive(Clone, Debug)]
pub struct ClientHello {
    pub legacy_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub server_name: Option<String>,
    pub supported_groups: Vec<u16>,
    pub supported_points: Vec<u8>,
    pub signature_schemes: Vec<u16>,
    pub alpn_protocols: Vec<String>,
    pub supported_versions: Vec<u16>,
    pub psk_modes: Vec<u8>,
    pub key_shares: Vec<KeyShareEntry>,
    pub cookie: Option<Vec<u8>>,
    pub quic_params: Option<Vec<u8>>,
    pub extra_extensions: Vec<Extension>,
}

impl ClientHello {
    /// Encode as a full handshake message (header included).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.u16(self.legacy_version);
        w.bytes(&self.random);
        w.vec8(|w| w.bytes(&self.session_id));
        w.vec16(|w| {
            for suite in &self.cipher_suites {
                w.u16(*suite);
            }
        });
        w.vec8(|w| w.bytes(&self.compression_methods));

        w.vec16(|w| {
            if let Some(name) = &self.server_name {
                w.u16(EXT_SERVER_NAME);
                w.vec16(|w| {
                    w.vec16(|w| {
                        w.u8(0); // host_name
                        w.vec16(|w| w.bytes(name.as_bytes()));
                    });
                });
            }

            if !self.supported_groups.is_empty() {
                w.u16(EXT_SUPPORTED_GROUPS);
                w.vec16(|w| {
                    w.vec16(|w| {
                        for group in &self.supported_groups {
                            w.u16(*group);
                        }
                    });
                });
            }

            if !self.supported_points.is_empty() {
                w.u16(EXT_SUPPORTED_POINTS);
                w.vec16(|w| {
                    w.vec8(|w| w.bytes(&self.supported_points));
                });
            }

            if !self.signature_schemes.is_empty() {
                w.u16(EXT_SIGNATURE_ALGORITHMS);
                w.vec16(|w| {
                    w.vec16(|w| {
                        for scheme in &self.signature_schemes {
                            w.u16(*scheme);
                        }
                    });
                });
            }

            if !self.alpn_protocols.is_empty() {
                w.u16(EXT_ALPN);
                w.vec16(|w| {
                    w.vec16(|w| {
                        for proto in &self.alpn_protocols {
                            w.vec8(|w| w.bytes(proto.as_bytes()));
                        }
                    });
                });
            }

            if !self.supported_versions.is_empty() {
                w.u16(EXT_SUPPORTED_VERSIONS);
                w.vec16(|w| {
                    w.vec8(|w| {
                        for version in &self.supported_versions {
                            w.u16(*version);
                        }
                    });
                });
            }

            if let Some(cookie) = &self.cookie {
                w.u16(EXT_COOKIE);
                w.vec16(|w| {
                    w.vec16(|w| w.bytes(cookie));
                });
            }

            if !self.psk_modes.is_empty() {
                w.u16(EXT_PSK_MODES);
                w.vec16(|w| {
                    w.vec8(|w| w.bytes(&self.psk_modes));
                });
            }

            if let Some(params) = &self.quic_params {
                w.u16(EXT_QUIC_TRANSPORT_PARAMETERS);
                w.vec16(|w| w.bytes(params));
            }

            for ext in &self.extra_extensions {
                w.u16(ext.typ);
                w.vec16(|w| w.bytes(&ext.data));
            }

            if !self.key_shares.is_empty() {
                w.u16(EXT_KEY_SHARE);
                w.vec16(|w| {
                    w.vec16(|w| {
                        for share in &self.key_shares {
                            w.u16(share.group);
                            w.vec16(|w| w.bytes(&share.data));
                        }
                    });
                });
            }
        });

        frame_message(MSG_CLIENT_HELLO, &w.into_bytes())
    }

    pub fn decode(body: &[u8]) -> Result<ClientHello> {
        let mut r = Reader::new(body);

        let legacy_version = r.u16()?;
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?.to_vec();

        let mut cipher_suites = Vec::new();
        {
            let mut suites = Reader::new(r.vec16()?);
            while !suites.is_empty() {
                cipher_suites.push(suites.u16()?);
            }
        }
        let compression_methods = r.vec8()?.to_vec();

        let mut hello = ClientHello {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            server_name: None,
            supported_groups: Vec::new(),
            supported_points: Vec::new(),
            signature_schemes: Vec::new(),
            alpn_protocols: Vec::new(),
            supported_versions: Vec::new(),
            psk_modes: Vec::new(),
            key_shares: Vec::new(),
            cookie: None,
            quic_params: None,
            extra_extensions: Vec::new(),
        };

        if r.is_empty() {
            return Ok(hello);
        }

        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let typ = exts.u16()?;
            let data = exts.vec16()?;
            let mut er = Reader::new(data);

            match typ {
                EXT_SERVER_NAME => {
                    let mut list = Reader::new(er.vec16()?);
                    while !list.is_empty() {
                        let name_type = list.u8()?;
                        let name = list.vec16()?;
                        if name_type == 0 {
                            hello.server_name = Some(
                                String::from_utf8(name.to_vec())
                                    .map_err(|_| HandshakeError::Malformed("server name"))?,
                            );
                        }
                    }
                }
                EXT_SUPPORTED_GROUPS => {
                    let mut groups = Reader::new(er.vec16()?);
                    while !groups.is_empty() {
                        hello.supported_groups.push(groups.u16()?);
                    }
                }
                EXT_SUPPORTED_POINTS => {
                    hello.supported_points = er.vec8()?.to_vec();
                }
                EXT_SIGNATURE_ALGORITHMS => {
                    let mut schemes = Reader::new(er.vec16()?);
                    while !schemes.is_empty() {
                        hello.signature_schemes.push(schemes.u16()?);
                    }
                }
                EXT_ALPN => {
                    let mut protos = Reader::new(er.vec16()?);
                    while !protos.is_empty() {
                        let proto = protos.vec8()?;
                        hello.alpn_protocols.push(
                            String::from_utf8(proto.to_vec())
                                .map_err(|_| HandshakeError::Malformed("alpn"))?,
                        );
                    }
                }
                EXT_SUPPORTED_VERSIONS => {
                    let mut versions = Reader::new(er.vec8()?);
                    while !versions.is_empty() {
                        hello.supported_versions.push(versions.u16()?);
                    }
                }
                EXT_COOKIE => {
                    hello.cookie = Some(er.vec16()?.to_vec());
                }
                EXT_PSK_MODES => {
                    hello.psk_modes = er.vec8()?.to_vec();
                }
                EXT_KEY_SHARE => {
                    let mut shares = Reader::new(er.vec16()?);
                    while !shares.is_empty() {
                        let group = shares.u16()?;
                        let data = shares.vec16()?.to_vec();
                        hello.key_shares.push(KeyShareEntry { group, data });
                    }
                }
                EXT_QUIC_TRANSPORT_PARAMETERS => {
                    hello.quic_params = Some(data.to_vec());
                }
                _ => hello.extra_extensions.push(Extension {
                    typ,
                    data: data.to_vec(),
                }),
            }
        }

        Ok(hello)
    }
}

#[derive(Clone, Debug)]
pub struct ServerHello {
    pub legacy_version: u16,
    pub random: [u8; 32],
    pub session_id_echo: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub supported_version: Option<u16>,
    pub key_share: Option<KeyShareEntry>,
    /// HelloRetryRequest variant of key_share: the group the server wants.
    pub selected_group: Option<u16>,
    pub cookie: Option<Vec<u8>>,
}

impl ServerHello {
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    pub fn decode(body: &[u8]) -> Result<ServerHello> {
        let mut r = Reader::new(body);

        let legacy_version = r.u16()?;
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id_echo = r.vec8()?.to_vec();
        let cipher_suite = r.u16()?;
        let compression_method = r.u8()?;

        let mut hello = ServerHello {
            legacy_version,
            random,
            session_id_echo,
            cipher_suite,
            compression_method,
            supported_version: None,
            key_share: None,
            selected_group: None,
            cookie: None,
        };

        let retry = hello.is_hello_retry_request();

        if r.is_empty() {
            return Ok(hello);
        }

        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let typ = exts.u16()?;
            let data = exts.vec16()?;
            let mut er = Reader::new(data);

            match typ {
                EXT_SUPPORTED_VERSIONS => {
                    hello.supported_version = Some(er.u16()?);
                }
                EXT_KEY_SHARE => {
                    if retry {
                        hello.selected_group = Some(er.u16()?);
                    } else {
                        let group = er.u16()?;
                        let data = er.vec16()?.to_vec();
                        hello.key_share = Some(KeyShareEntry { group, data });
                    }
                }
                EXT_COOKIE => {
                    hello.cookie = Some(er.vec16()?.to_vec());
                }
                _ => {}
            }
        }

        Ok(hello)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.u16(self.legacy_version);
        w.bytes(&self.random);
        w.vec8(|w| w.bytes(&self.session_id_echo));
        w.u16(self.cipher_suite);
        w.u8(self.compression_method);

        w.vec16(|w| {
            if let Some(version) = self.supported_version {
                w.u16(EXT_SUPPORTED_VERSIONS);
                w.vec16(|w| w.u16(version));
            }

            if let Some(group) = self.selected_group {
                w.u16(EXT_KEY_SHARE);
                w.vec16(|w| w.u16(group));
            } else if let Some(share) = &self.key_share {
                w.u16(EXT_KEY_SHARE);
                w.vec16(|w| {
                    w.u16(share.group);
                    w.vec16(|w| w.bytes(&share.data));
                });
            }

            if let Some(cookie) = &self.cookie {
                w.u16(EXT_COOKIE);
                w.vec16(|w| {
                    w.vec16(|w| w.bytes(cookie));
                });
            }
        });

        frame_message(MSG_SERVER_HELLO, &w.into_bytes())
    }
}

#[derive(Clone, Debug, Default)]
pub struct EncryptedExtensions {
    pub alpn_protocol: Option<String>,
    pub quic_params: Option<Vec<u8>>,
    pub extensions: Vec<Extension>,
}

impl EncryptedExtensions {
    pub fn decode(body: &[u8]) -> Result<EncryptedExtensions> {
        let mut r = Reader::new(body);
        let mut out = EncryptedExtensions::default();

        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let typ = exts.u16()?;
            let data = exts.vec16()?;

            match typ {
                EXT_ALPN => {
                    let mut er = Reader::new(data);
                    let mut protos = Reader::new(er.vec16()?);
                    if !protos.is_empty() {
                        let proto = protos.vec8()?;
                        out.alpn_protocol = Some(
                            String::from_utf8(proto.to_vec())
                                .map_err(|_| HandshakeError::Malformed("alpn"))?,
                        );
                    }
                }
                EXT_QUIC_TRANSPORT_PARAMETERS => {
                    out.quic_params = Some(data.to_vec());
                }
                _ => out.extensions.push(Extension {
                    typ,
                    data: data.to_vec(),
                }),
            }
        }

        Ok(out)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.vec16(|w| {
            if let Some(proto) = &self.alpn_protocol {
                w.u16(EXT_ALPN);
                w.vec16(|w| {
                    w.vec16(|w| {
                        w.vec8(|w| w.bytes(proto.as_bytes()));
                    });
                });
            }

            if let Some(params) = &self.quic_params {
                w.u16(EXT_QUIC_TRANSPORT_PARAMETERS);
                w.vec16(|w| w.bytes(params));
            }

            for ext in &self.extensions {
                w.u16(ext.typ);
                w.vec16(|w| w.bytes(&ext.data));
            }
        });

        frame_message(MSG_ENCRYPTED_EXTENSIONS, &w.into_bytes())
    }
}

#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub cert: Vec<u8>,
    pub extensions: Vec<Extension>,
}

#[derive(Clone, Debug, Default)]
pub struct CertificateMsg {
    pub context: Vec<u8>,
    pub entries: Vec<CertificateEntry>,
}

impl CertificateMsg {
    pub fn decode(body: &[u8]) -> Result<CertificateMsg> {
        let mut r = Reader::new(body);

        let context = r.vec8()?.to_vec();
        let mut entries = Vec::new();

        let mut list = Reader::new(r.vec24()?);
        while !list.is_empty() {
            let cert = list.vec24()?.to_vec();
            let mut extensions = Vec::new();
            let mut exts = Reader::new(list.vec16()?);
            while !exts.is_empty() {
                let typ = exts.u16()?;
                let data = exts.vec16()?.to_vec();
                extensions.push(Extension { typ, data });
            }
            entries.push(CertificateEntry { cert, extensions });
        }

        Ok(CertificateMsg { context, entries })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.vec8(|w| w.bytes(&self.context));
        w.vec24(|w| {
            for entry in &self.entries {
                w.vec24(|w| w.bytes(&entry.cert));
                w.vec16(|w| {
                    for ext in &entry.extensions {
                        w.u16(ext.typ);
                        w.vec16(|w| w.bytes(&ext.data));
                    }
                });
            }
        });

        frame_message(MSG_CERTIFICATE, &w.into_bytes())
    }
}

#[derive(Clone, Debug, Default)]
pub struct CertificateRequest {
    pub context: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl CertificateRequest {
    pub fn decode(body: &[u8]) -> Result<CertificateRequest> {
        let mut r = Reader::new(body);

        let context = r.vec8()?.to_vec();
        let mut extensions = Vec::new();
        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let typ = exts.u16()?;
            let data = exts.vec16()?.to_vec();
            extensions.push(Extension { typ, data });
        }

        Ok(CertificateRequest {
            context,
            extensions,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.vec8(|w| w.bytes(&self.context));
        w.vec16(|w| {
            for ext in &self.extensions {
                w.u16(ext.typ);
                w.vec16(|w| w.bytes(&ext.data));
            }
        });

        frame_message(MSG_CERTIFICATE_REQUEST, &w.into_bytes())
    }
}

#[derive(Clone, Debug)]
pub struct CertificateVerify {
    pub scheme: u16,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn decode(body: &[u8]) -> Result<CertificateVerify> {
        let mut r = Reader::new(body);

        let scheme = r.u16()?;
        let signature = r.vec16()?.to_vec();

        Ok(CertificateVerify { scheme, signature })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();

        w.u16(self.scheme);
        w.vec16(|w| w.bytes(&self.signature));

        frame_message(MSG_CERTIFICATE_VERIFY, &w.into_bytes())
    }
}

#[derive(Clone, Debug)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn decode(body: &[u8]) -> Result<Finished> {
        Ok(Finished {
            verify_data: body.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        frame_message(MSG_FINISHED, &self.verify_data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tls13::{
        GROUP_X25519, PSK_MODE_DHE, TLS_AES_128_GCM_SHA256, TLS_VERSION_12, TLS_VERSION_13,
    };

    fn sample_hello() -> ClientHello {
        ClientHello {
            legacy_version: TLS_VERSION_12,
            random: [7u8; 32],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![TLS_AES_128_GCM_SHA256],
            compression_methods: vec![0],
            server_name: Some("example.com".into()),
            supported_groups: vec![GROUP_X25519],
            supported_points: vec![0],
            signature_schemes: vec![0x0804],
            alpn_protocols: vec!["h3".into()],
            supported_versions: vec![TLS_VERSION_13],
            psk_modes: vec![PSK_MODE_DHE],
            key_shares: vec![KeyShareEntry {
                group: GROUP_X25519,
                data: vec![0xAB; 32],
            }],
            cookie: None,
            quic_params: Some(vec![0x01, 0x02]),
            extra_extensions: Vec::new(),
        }
    }

    #[test]
    fn client_hello_header_and_fields() {
        let hello = sample_hello();
        let raw = hello.encode();

        assert_eq!(raw[0], MSG_CLIENT_HELLO);
        let len = ((raw[1] as usize) << 16) | ((raw[2] as usize) << 8) | raw[3] as usize;
        assert_eq!(len, raw.len() - 4);

        let decoded = ClientHello::decode(&raw[4..]).unwrap();
        assert_eq!(decoded.legacy_version, TLS_VERSION_12);
        assert_eq!(decoded.server_name.as_deref(), Some("example.com"));
        assert_eq!(decoded.supported_versions, vec![TLS_VERSION_13]);
        assert_eq!(decoded.psk_modes, vec![PSK_MODE_DHE]);
        assert_eq!(decoded.key_shares[0].group, GROUP_X25519);
        assert_eq!(decoded.quic_params.as_deref(), Some(&[0x01, 0x02][..]));
    }

    #[test]
    fn client_hello_extension_numbering_on_the_wire() {
        let hello = sample_hello();
        let raw = hello.encode();

        // supported_versions=43, psk_modes=45, key_share=51, quic=0xffa5
        let has = |needle: [u8; 2]| raw.windows(2).any(|w| w == needle);
        assert!(has(43u16.to_be_bytes()));
        assert!(has(45u16.to_be_bytes()));
        assert!(has(51u16.to_be_bytes()));
        assert!(has(0xffa5u16.to_be_bytes()));
    }

    #[test]
    fn server_hello_retry_detection() {
        let hello = ServerHello {
            legacy_version: TLS_VERSION_12,
            random: HELLO_RETRY_REQUEST_RANDOM,
            session_id_echo: vec![],
            cipher_suite: TLS_AES_128_GCM_SHA256,
            compression_method: 0,
            supported_version: Some(TLS_VERSION_13),
            key_share: None,
            selected_group: Some(GROUP_X25519),
            cookie: None,
        };

        let raw = hello.encode();
        let (typ, body, rest) = split_message(&raw).unwrap().unwrap();
        assert_eq!(typ, MSG_SERVER_HELLO);
        assert!(rest.is_empty());

        let decoded = ServerHello::decode(body).unwrap();
        assert!(decoded.is_hello_retry_request());
        assert_eq!(decoded.selected_group, Some(GROUP_X25519));
    }

    #[test]
    fn split_message_incomplete() {
        let raw = frame_message(MSG_FINISHED, &[0xAA; 8]);
        assert!(split_message(&raw[..3]).unwrap().is_none());
        assert!(split_message(&raw[..7]).unwrap().is_none());
        let (typ, body, _) = split_message(&raw).unwrap().unwrap();
        assert_eq!(typ, MSG_FINISHED);
        assert_eq!(body, &[0xAA; 8]);
    }

    #[test]
    fn certificate_entries_round_trip() {
        let msg = CertificateMsg {
            context: vec![],
            entries: vec![CertificateEntry {
                cert: vec![0xDE, 0xAD, 0xBE, 0xEF],
                extensions: vec![],
            }],
        };

        let raw = msg.encode();
        let (typ, body, _) = split_message(&raw).unwrap().unwrap();
        assert_eq!(typ, MSG_CERTIFICATE);

        let decoded = CertificateMsg::decode(body).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].cert, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
