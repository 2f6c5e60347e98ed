//! Shared checks for accessory TLV responses.

use hap_core::error::{Error, PairingError, Result};
use hap_crypto::tlv::{Tlv8, TlvError, TlvType};

/// Which exchange a response belongs to; decides how `Authentication` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exchange {
    Setup,
    Verify,
    Pairings,
}

/// Parse a response, map any `Error` item, and check its `State`.
pub(crate) fn expect_state(data: &[u8], expected: u8, exchange: Exchange) -> Result<Tlv8> {
    let tlv = Tlv8::parse(data).map_err(|e| PairingError::TlvParse(e.to_string()))?;

    if let Some(code) = tlv.error() {
        return Err(map_error(&tlv, code, exchange));
    }

    match tlv.state() {
        Some(actual) if actual == expected => Ok(tlv),
        Some(actual) => Err(PairingError::StateMismatch { expected, actual }.into()),
        None => Err(PairingError::MissingTlv(TlvType::State as u8).into()),
    }
}

fn map_error(tlv: &Tlv8, code: u8, exchange: Exchange) -> Error {
    match TlvError::try_from(code).ok() {
        Some(TlvError::Authentication) => match exchange {
            Exchange::Setup => {
                PairingError::InvalidSetupCode("rejected by accessory".to_string()).into()
            }
            Exchange::Verify => PairingError::Rejected("controller not recognized").into(),
            Exchange::Pairings => PairingError::Rejected("controller lacks admin permission").into(),
        },
        Some(TlvError::Backoff) => PairingError::Backoff {
            retry_delay: tlv.retry_delay().unwrap_or(0),
        }
        .into(),
        Some(TlvError::MaxPeers) => PairingError::MaxPeers.into(),
        Some(TlvError::MaxTries) => PairingError::MaxTries.into(),
        Some(TlvError::Unavailable) => Error::AlreadyPaired,
        Some(TlvError::Busy) => PairingError::Busy.into(),
        Some(TlvError::Unknown) => PairingError::Rejected("unknown error").into(),
        None => PairingError::Protocol(format!("unknown TLV error code 0x{:02x}", code)).into(),
    }
}
