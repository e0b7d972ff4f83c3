use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use crate::tls13::{
    MSG_MESSAGE_HASH, TLS_AES_128_GCM_SHA256, TLS_AES_256_GCM_SHA384,
    TLS_CHACHA20_POLY1305_SHA256,
};

/// Hash behind a negotiated TLS 1.3 suite.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    pub fn for_suite(suite: u16) -> Option<HashAlg> {
        match suite {
            TLS_AES_128_GCM_SHA256 | TLS_CHACHA20_POLY1305_SHA256 => Some(HashAlg::Sha256),
            TLS_AES_256_GCM_SHA384 => Some(HashAlg::Sha384),
            _ => None,
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }

    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha256 => Sha256::digest(data).to_vec(),
            HashAlg::Sha384 => Sha384::digest(data).to_vec(),
        }
    }

    pub fn empty_hash(self) -> Vec<u8> {
        self.hash(b"")
    }

    fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlg::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .expect("hmac accepts any key length");
                for part in parts {
                    mac.update(part);
                }
                mac.finalize().into_bytes().to_vec()
            }
            HashAlg::Sha384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(key)
                    .expect("hmac accepts any key length");
                for part in parts {
                    mac.update(part);
                }
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}

pub fn hkdf_extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    alg.hmac(salt, &[ikm])
}

pub fn hkdf_expand(alg: HashAlg, prk: &[u8], info: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut block: Vec<u8> = Vec::new();
    let mut counter = 1u8;

    while out.len() < out_len {
        block = alg.hmac(prk, &[&block[..], info, &[counter]]);
        out.extend_from_slice(&block);
        counter += 1;
    }

    out.truncate(out_len);
    out
}

/// HKDF-Expand-Label (RFC 8446, 7.1): the label goes on the wire prefixed
/// with "tls13 ".
pub fn hkdf_expand_label(
    alg: HashAlg,
    secret: &[u8],
    label: &str,
    context: &[u8],
    out_len: usize,
) -> Vec<u8> {
    let mut info = Vec::with_capacity(label.len() + context.len() + 10);
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label.as_bytes());
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    hkdf_expand(alg, secret, &info, out_len)
}

pub fn derive_secret(alg: HashAlg, secret: &[u8], label: &str, transcript_hash: &[u8]) -> Vec<u8> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_len())
}

/// Running handshake transcript.
#[derive(Clone)]
pub enum Transcript {
    Sha256(Sha256),
    Sha384(Sha384),
}

impl Transcript {
    pub fn new(alg: HashAlg) -> Transcript {
        match alg {
            HashAlg::Sha256 => Transcript::Sha256(Sha256::new()),
            HashAlg::Sha384 => Transcript::Sha384(Sha384::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Transcript::Sha256(h) => h.update(data),
            Transcript::Sha384(h) => h.update(data),
        }
    }

    pub fn current_hash(&self) -> Vec<u8> {
        match self {
            Transcript::Sha256(h) => h.clone().finalize().to_vec(),
            Transcript::Sha384(h) => h.clone().finalize().to_vec(),
        }
    }

    /// HelloRetryRequest transcript substitution (RFC 8446, 4.4.1): replace
    /// everything so far with a synthetic message_hash message.
    pub fn retry_substitute(&mut self, alg: HashAlg) {
        let digest = self.current_hash();
        *self = Transcript::new(alg);
        self.update(&[MSG_MESSAGE_HASH, 0, 0, digest.len() as u8]);
        self.update(&digest);
    }
}

/// The early → handshake → master secret chain. Secrets only accrete; a new
/// handshake starts a new schedule.
pub struct KeySchedule {
    alg: HashAlg,
    early_secret: Vec<u8>,
    handshake_secret: Option<Vec<u8>>,
    master_secret: Option<Vec<u8>>,
}

impl KeySchedule {
    pub fn new(alg: HashAlg) -> KeySchedule {
        let zeros = vec![0u8; alg.output_len()];
        KeySchedule {
            alg,
            early_secret: hkdf_extract(alg, &zeros, &zeros),
            handshake_secret: None,
            master_secret: None,
        }
    }

    pub fn with_psk(alg: HashAlg, psk: &[u8]) -> KeySchedule {
        let zeros = vec![0u8; alg.output_len()];
        KeySchedule {
            alg,
            early_secret: hkdf_extract(alg, &zeros, psk),
            handshake_secret: None,
            master_secret: None,
        }
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }

    pub fn early_secret(&self) -> &[u8] {
        &self.early_secret
    }

    pub fn handshake_secret(&self) -> Option<&[u8]> {
        self.handshake_secret.as_deref()
    }

    pub fn master_secret(&self) -> Option<&[u8]> {
        self.master_secret.as_deref()
    }

    /// Mix the (EC)DHE shared secret in.
    pub fn derive_handshake(&mut self, shared: &[u8]) {
        let derived = derive_secret(
            self.alg,
            &self.early_secret,
            "derived",
            &self.alg.empty_hash(),
        );
        self.handshake_secret = Some(hkdf_extract(self.alg, &derived, shared));
    }

    pub fn derive_master(&mut self) -> bool {
        let handshake = match &self.handshake_secret {
            Some(secret) => secret,
            None => return false,
        };

        let derived = derive_secret(self.alg, handshake, "derived", &self.alg.empty_hash());
        let zeros = vec![0u8; self.alg.output_len()];
        self.master_secret = Some(hkdf_extract(self.alg, &derived, &zeros));
        true
    }

    pub fn client_handshake_traffic_secret(&self, transcript_hash: &[u8]) -> Option<Vec<u8>> {
        self.handshake_secret
            .as_ref()
            .map(|secret| derive_secret(self.alg, secret, "c hs traffic", transcript_hash))
    }

    pub fn server_handshake_traffic_secret(&self, transcript_hash: &[u8]) -> Option<Vec<u8>> {
        self.handshake_secret
            .as_ref()
            .map(|secret| derive_secret(self.alg, secret, "s hs traffic", transcript_hash))
    }

    pub fn client_application_traffic_secret(&self, transcript_hash: &[u8]) -> Option<Vec<u8>> {
        self.master_secret
            .as_ref()
            .map(|secret| derive_secret(self.alg, secret, "c ap traffic", transcript_hash))
    }

    pub fn server_application_traffic_secret(&self, transcript_hash: &[u8]) -> Option<Vec<u8>> {
        self.master_secret
            .as_ref()
            .map(|secret| derive_secret(self.alg, secret, "s ap traffic", transcript_hash))
    }

    /// Finished verify_data for either side (RFC 8446, 4.4.4).
    pub fn finished_verify_data(&self, traffic_secret: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
        let finished_key = hkdf_expand_label(
            self.alg,
            traffic_secret,
            "finished",
            b"",
            self.alg.output_len(),
        );
        self.alg.hmac(&finished_key, &[transcript_hash])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // Known values from the RFC 8448 handshake traces.
    #[test]
    fn early_secret_zero_psk() {
        let ks = KeySchedule::new(HashAlg::Sha256);
        assert_eq!(
            hex(ks.early_secret()),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );
    }

    #[test]
    fn derived_from_early_secret() {
        let ks = KeySchedule::new(HashAlg::Sha256);
        let derived = derive_secret(
            HashAlg::Sha256,
            ks.early_secret(),
            "derived",
            &HashAlg::Sha256.empty_hash(),
        );
        assert_eq!(
            hex(&derived),
            "6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba"
        );
    }

    #[test]
    fn empty_hash_sha256() {
        assert_eq!(
            hex(&HashAlg::Sha256.empty_hash()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn expand_label_length() {
        let secret = [0x17u8; 32];
        let out = hkdf_expand_label(HashAlg::Sha256, &secret, "key", b"", 16);
        assert_eq!(out.len(), 16);

        let out = hkdf_expand_label(HashAlg::Sha384, &[0x17u8; 48], "iv", b"", 12);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn schedule_accretes_monotonically() {
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        assert!(ks.handshake_secret().is_none());
        assert!(!ks.derive_master());

        ks.derive_handshake(&[0x42; 32]);
        assert!(ks.handshake_secret().is_some());

        let th = HashAlg::Sha256.empty_hash();
        let c = ks.client_handshake_traffic_secret(&th).unwrap();
        let s = ks.server_handshake_traffic_secret(&th).unwrap();
        assert_ne!(c, s);

        assert!(ks.derive_master());
        assert!(ks.master_secret().is_some());
    }

    #[test]
    fn retry_substitute_changes_transcript() {
        let mut t = Transcript::new(HashAlg::Sha256);
        t.update(b"client hello one");
        let before = t.current_hash();

        t.retry_substitute(HashAlg::Sha256);
        let after = t.current_hash();
        assert_ne!(before, after);

        // Substitution is Hash(message_hash header || Hash(CH1)).
        let mut expected = Transcript::new(HashAlg::Sha256);
        expected.update(&[super::MSG_MESSAGE_HASH, 0, 0, 32]);
        expected.update(&before);
        assert_eq!(after, expected.current_hash());
    }
}
