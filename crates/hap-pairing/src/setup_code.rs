//! Setup codes and pair-setup method selection.

use std::fmt;
use std::str::FromStr;

use hap_core::error::PairingError;
use hap_core::FeatureFlags;
use hap_crypto::tlv::method;

/// Accessory setup code, normalized to `XXX-XX-XXX`.
///
/// The normalized form is the SRP password.
#[derive(Clone, PartialEq, Eq)]
pub struct SetupCode(String);

/// Codes accessories must refuse (HAP "trivial" codes).
const TRIVIAL_CODES: &[&str] = &[
    "00000000", "11111111", "22222222", "33333333", "44444444", "55555555", "66666666",
    "77777777", "88888888", "99999999", "12345678", "87654321",
];

impl SetupCode {
    /// Parse `XXX-XX-XXX` or eight bare digits.
    pub fn parse(input: &str) -> Result<Self, PairingError> {
        let trimmed = input.trim();
        let digits: String = match trimmed.len() {
            8 => trimmed.to_string(),
            10 if trimmed.as_bytes()[3] == b'-' && trimmed.as_bytes()[6] == b'-' => {
                trimmed.chars().filter(|c| *c != '-').collect()
            }
            _ => return Err(PairingError::InvalidSetupCode(input.to_string())),
        };

        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PairingError::InvalidSetupCode(input.to_string()));
        }
        if TRIVIAL_CODES.contains(&digits.as_str()) {
            return Err(PairingError::InvalidSetupCode(input.to_string()));
        }

        Ok(Self(format!("{}-{}-{}", &digits[0..3], &digits[3..5], &digits[5..8])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for SetupCode {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetupCode(***-**-***)")
    }
}

/// Pair-setup method sent in M1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairMethod {
    PairSetup,
    PairSetupWithAuth,
}

impl PairMethod {
    /// Accessories with an authentication coprocessor expect method 1.
    pub fn for_features(flags: FeatureFlags) -> Self {
        if flags.supports_hardware_auth() {
            PairMethod::PairSetupWithAuth
        } else {
            PairMethod::PairSetup
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PairMethod::PairSetup => method::PAIR_SETUP,
            PairMethod::PairSetupWithAuth => method::PAIR_SETUP_WITH_AUTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod setup_code {
        use super::*;

        #[test]
        fn accepts_dashed_form() {
            let code = SetupCode::parse("031-45-154").unwrap();
            assert_eq!(code.as_str(), "031-45-154");
        }

        #[test]
        fn normalizes_bare_digits() {
            let code: SetupCode = "03145154".parse().unwrap();
            assert_eq!(code.as_str(), "031-45-154");
            assert_eq!(code.as_bytes(), b"031-45-154");
        }

        #[test]
        fn trims_whitespace() {
            assert!(SetupCode::parse(" 031-45-154\n").is_ok());
        }

        #[test]
        fn rejects_malformed_codes() {
            for input in ["", "1234", "031-45-15a", "0314-5-154", "031451540", "abc-de-fgh"] {
                assert!(
                    matches!(SetupCode::parse(input), Err(PairingError::InvalidSetupCode(_))),
                    "accepted {:?}",
                    input
                );
            }
        }

        #[test]
        fn rejects_trivial_codes() {
            assert!(SetupCode::parse("123-45-678").is_err());
            assert!(SetupCode::parse("111-11-111").is_err());
        }

        #[test]
        fn debug_hides_digits() {
            let code = SetupCode::parse("031-45-154").unwrap();
            assert!(!format!("{:?}", code).contains("031"));
        }
    }

    mod pair_method {
        use super::*;

        #[test]
        fn hardware_auth_selects_method_1() {
            let method = PairMethod::for_features(FeatureFlags(FeatureFlags::HARDWARE_AUTHENTICATION));
            assert_eq!(method, PairMethod::PairSetupWithAuth);
            assert_eq!(method.as_byte(), 1);
        }

        #[test]
        fn otherwise_method_0() {
            assert_eq!(PairMethod::for_features(FeatureFlags(0)), PairMethod::PairSetup);
            assert_eq!(
                PairMethod::for_features(FeatureFlags(FeatureFlags::SOFTWARE_AUTHENTICATION)),
                PairMethod::PairSetup
            );
            assert_eq!(PairMethod::PairSetup.as_byte(), 0);
        }
    }
}
