//! Error types for HomeKit accessory clients.

use thiserror::Error;

/// Primary error type for all accessory operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Accessory is already paired")]
    AlreadyPaired,

    #[error("No pairing material available for accessory")]
    NotPaired,

    #[error("Accessory does not expose required characteristic: {feature}")]
    UnsupportedFeature { feature: &'static str },

    #[error("Operation timed out")]
    Timeout,

    #[error("Pairing store error: {0}")]
    Storage(String),
}

/// Errors during mDNS service discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    #[error("Service resolution failed: {0}")]
    Resolution(String),

    #[error("Cannot find {0}")]
    DeviceNotFound(String),
}

/// Errors during pair-setup, pair-verify and pairing management.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Invalid setup code: {0}")]
    InvalidSetupCode(String),

    #[error("Pairing rejected by accessory: {0}")]
    Rejected(&'static str),

    #[error("Accessory asked to back off for {retry_delay} seconds")]
    Backoff { retry_delay: u16 },

    #[error("Accessory cannot accept any more pairings")]
    MaxPeers,

    #[error("Too many failed pairing attempts")]
    MaxTries,

    #[error("Accessory is busy pairing with another controller")]
    Busy,

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Invalid server public key")]
    InvalidServerPublicKey,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Pairing state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: u8, actual: u8 },

    #[error("TLV parsing error: {0}")]
    TlvParse(String),

    #[error("Missing required TLV type: {0}")]
    MissingTlv(u8),

    #[error("Invalid pairing state: {0}")]
    InvalidState(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors during HTTP communication with an accessory.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Characteristic {aid}.{iid} returned HAP status {status}")]
    CharacteristicStatus { aid: u64, iid: u64, status: i64 },

    #[error("Session not established")]
    NoSession,
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,
}

/// Parsing errors for various formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
