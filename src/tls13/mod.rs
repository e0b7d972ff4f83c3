//! TLS 1.3 handshake message layer (RFC 8446 wire formats).
//!
//! This is the deframed-message flow used by QUIC: the caller owns record
//! protection and hands whole handshake messages in; key exchange and
//! certificate verification stay behind [`CryptoProvider`].

use thiserror::Error;

pub use client::{ClientHandshaker, ClientState, HandshakeConfig, Session};
pub use key_schedule::{
    derive_secret, hkdf_expand, hkdf_expand_label, hkdf_extract, HashAlg, KeySchedule, Transcript,
};
pub use message::{
    frame_message, split_message, CertificateEntry, CertificateMsg, CertificateRequest,
    CertificateVerify, ClientHello, EncryptedExtensions, Extension, Finished, KeyShareEntry,
    ServerHello,
};

mod client;
mod key_schedule;
mod message;

pub type TlsVersion = u16;
pub const TLS_VERSION_10: TlsVersion = 0x0301;
pub const TLS_VERSION_11: TlsVersion = 0x0302;
pub const TLS_VERSION_12: TlsVersion = 0x0303;
pub const TLS_VERSION_13: TlsVersion = 0x0304;

// Handshake message types.
pub const MSG_HELLO_REQUEST: u8 = 0;
pub const MSG_CLIENT_HELLO: u8 = 1;
pub const MSG_SERVER_HELLO: u8 = 2;
pub const MSG_NEW_SESSION_TICKET: u8 = 4;
pub const MSG_END_OF_EARLY_DATA: u8 = 5;
pub const MSG_ENCRYPTED_EXTENSIONS: u8 = 8;
pub const MSG_CERTIFICATE: u8 = 11;
pub const MSG_CERTIFICATE_REQUEST: u8 = 13;
pub const MSG_CERTIFICATE_VERIFY: u8 = 15;
pub const MSG_FINISHED: u8 = 20;
pub const MSG_KEY_UPDATE: u8 = 24;
// Synthetic message replacing the first ClientHello after a
// HelloRetryRequest (RFC 8446, 4.4.1).
pub const MSG_MESSAGE_HASH: u8 = 254;

// TLS 1.3 cipher suites.
pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;

// Supported groups.
pub const GROUP_P256: u16 = 23;
pub const GROUP_P384: u16 = 24;
pub const GROUP_P521: u16 = 25;
pub const GROUP_X25519: u16 = 29;

// Signature schemes.
pub const SIGN_PKCS1_SHA256: u16 = 0x0401;
pub const SIGN_PKCS1_SHA384: u16 = 0x0501;
pub const SIGN_PKCS1_SHA512: u16 = 0x0601;
pub const SIGN_PSS_SHA256: u16 = 0x0804;
pub const SIGN_PSS_SHA384: u16 = 0x0805;
pub const SIGN_PSS_SHA512: u16 = 0x0806;
pub const SIGN_ECDSA_P256_SHA256: u16 = 0x0403;
pub const SIGN_ECDSA_P384_SHA384: u16 = 0x0503;
pub const SIGN_ECDSA_P521_SHA512: u16 = 0x0603;
pub const SIGN_ED25519: u16 = 0x0807;

// PSK key exchange modes (RFC 8446, 4.2.9).
pub const PSK_MODE_PLAIN: u8 = 0;
pub const PSK_MODE_DHE: u8 = 1;

// Extension ids, IANA numbering.
pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_MAX_FRAGMENT_LENGTH: u16 = 1;
pub const EXT_STATUS_REQUEST: u16 = 5;
pub const EXT_SUPPORTED_GROUPS: u16 = 10;
pub const EXT_SUPPORTED_POINTS: u16 = 11;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
pub const EXT_ALPN: u16 = 16;
pub const EXT_SCT: u16 = 18;
pub const EXT_SESSION_TICKET: u16 = 35;
pub const EXT_PRE_SHARED_KEY: u16 = 41;
pub const EXT_EARLY_DATA: u16 = 42;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const EXT_COOKIE: u16 = 44;
pub const EXT_PSK_MODES: u16 = 45;
pub const EXT_CERTIFICATE_AUTHORITIES: u16 = 47;
pub const EXT_SIGNATURE_ALGORITHMS_CERT: u16 = 50;
pub const EXT_KEY_SHARE: u16 = 51;
pub const EXT_RENEGOTIATION_INFO: u16 = 0xff01;
pub const EXT_QUIC_TRANSPORT_PARAMETERS: u16 = 0xffa5;

/// The fixed ServerHello.random marking a HelloRetryRequest
/// (RFC 8446, 4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
    0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
    0x33, 0x9C,
];

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum HandshakeError {
    #[error("malformed handshake message: {0}")]
    Malformed(&'static str),
    #[error("unexpected handshake message type {0}")]
    UnexpectedMessage(u8),
    #[error("unsupported parameter: {0}")]
    Unsupported(&'static str),
    #[error("crypto operation failed: {0}")]
    Crypto(&'static str),
    #[error("peer alert {0}")]
    Alert(u8),
}

/// One in-flight (EC)DHE exchange. Consumed when the peer share arrives.
pub trait KeyExchange: Send {
    fn group(&self) -> u16;
    fn public_key(&self) -> Vec<u8>;
    fn shared_secret(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>, HandshakeError>;
}

/// Cryptographic primitives the handshake flow delegates: key exchange,
/// chain validation and signature checks. Hashing and the HKDF schedule are
/// in-library ([`key_schedule`]).
pub trait CryptoProvider: Send + Sync {
    fn start_key_exchange(&self, group: u16) -> Result<Box<dyn KeyExchange>, HandshakeError>;

    fn verify_certificate_chain(
        &self,
        certs: &[Vec<u8>],
        server_name: &str,
    ) -> Result<(), HandshakeError>;

    fn verify_signature(
        &self,
        scheme: u16,
        end_entity_cert: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), HandshakeError>;
}
