//! TLV8 bodies of `/pair-setup`, `/pair-verify` and `/pairings`.
//!
//! Each item is `type(1) | length(1) | value`. Values over 255 bytes are
//! sent as consecutive fragments of the same type and joined on parse.
//! Items keep insertion order; accessories expect `State` first.

use hap_core::error::ParseError;

const FRAGMENT_LEN: usize = 255;

/// Item types used by the pairing exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Signature = 0x0A,
    Permissions = 0x0B,
}

/// `kTLVError_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

impl TryFrom<u8> for TlvError {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0x01 => Self::Unknown,
            0x02 => Self::Authentication,
            0x03 => Self::Backoff,
            0x04 => Self::MaxPeers,
            0x05 => Self::MaxTries,
            0x06 => Self::Unavailable,
            0x07 => Self::Busy,
            other => return Err(other),
        })
    }
}

/// Values of the `Method` item.
pub mod method {
    pub const PAIR_SETUP: u8 = 0x00;
    pub const PAIR_SETUP_WITH_AUTH: u8 = 0x01;
    pub const ADD_PAIRING: u8 = 0x03;
    pub const REMOVE_PAIRING: u8 = 0x04;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(mut data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();

        while let [typ, len, rest @ ..] = data {
            let len = usize::from(*len);
            if rest.len() < len {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8 item 0x{typ:02x} wants {len} bytes, {} left",
                    rest.len()
                )));
            }
            let (value, tail) = rest.split_at(len);

            match items.last_mut() {
                Some((last, joined)) if *last == *typ => joined.extend_from_slice(value),
                _ => items.push((*typ, value.to_vec())),
            }
            data = tail;
        }

        if !data.is_empty() {
            return Err(ParseError::InvalidFormat("TLV8 header cut short".to_string()));
        }
        Ok(Self { items })
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = self.items.iter().map(|(_, v)| v.len() + 2).sum();
        let mut out = Vec::with_capacity(size);

        for (typ, value) in &self.items {
            if value.is_empty() {
                out.extend([*typ, 0]);
                continue;
            }
            for fragment in value.chunks(FRAGMENT_LEN) {
                out.extend([*typ, fragment.len() as u8]);
                out.extend_from_slice(fragment);
            }
        }
        out
    }

    /// First item of `typ`.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ as u8)
            .map(|(_, v)| v.as_slice())
    }

    pub fn require(&self, typ: TlvType, name: &'static str) -> Result<&[u8], ParseError> {
        self.get(typ).ok_or(ParseError::MissingField(name))
    }

    /// Replace an existing item in place, or append.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ as u8) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ as u8, value)),
        }
    }

    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    fn byte(&self, typ: TlvType) -> Option<u8> {
        self.get(typ).and_then(|v| v.first().copied())
    }

    pub fn state(&self) -> Option<u8> {
        self.byte(TlvType::State)
    }

    /// Raw `Error` code, known or not.
    pub fn error(&self) -> Option<u8> {
        self.byte(TlvType::Error)
    }

    /// Backoff delay in seconds, little-endian over one or two bytes.
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v {
            [] => 0,
            [lo] => u16::from(*lo),
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        })
    }

    /// Pair-setup M1.
    pub fn pair_setup_m1(pair_method: u8) -> Self {
        Self::new()
            .with(TlvType::State, [0x01])
            .with(TlvType::Method, [pair_method])
    }

    /// Pair-verify M1.
    pub fn pair_verify_m1(public_key: &[u8; 32]) -> Self {
        Self::new()
            .with(TlvType::State, [0x01])
            .with(TlvType::PublicKey, public_key.to_vec())
    }

    pub fn add_pairing(identifier: &str, public_key: &[u8; 32], admin: bool) -> Self {
        Self::new()
            .with(TlvType::State, [0x01])
            .with(TlvType::Method, [method::ADD_PAIRING])
            .with(TlvType::Identifier, identifier.as_bytes().to_vec())
            .with(TlvType::PublicKey, public_key.to_vec())
            .with(TlvType::Permissions, [u8::from(admin)])
    }

    pub fn remove_pairing(identifier: &str) -> Self {
        Self::new()
            .with(TlvType::State, [0x01])
            .with(TlvType::Method, [method::REMOVE_PAIRING])
            .with(TlvType::Identifier, identifier.as_bytes().to_vec())
    }
}
