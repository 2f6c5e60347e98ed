//! SRP-6a over the RFC 5054 3072-bit group with SHA-512, as HAP pair-setup
//! uses it.
//!
//! Apple hashes the raw generator (`H(0x05)`) inside M1 but the padded one
//! inside `k`. Both forms appear below on purpose.

use std::sync::OnceLock;

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Width of N, and of every padded group element on the wire.
pub const GROUP_BYTES: usize = 384;

const PRIME_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

const GENERATOR: u32 = 5;
const EPHEMERAL_BITS: u64 = 256;

fn sha512(parts: &[&[u8]]) -> Vec<u8> {
    parts
        .iter()
        .fold(Sha512::new(), |hasher, part| hasher.chain_update(part))
        .finalize()
        .to_vec()
}

/// Group constants plus the values derived from them once.
struct Group {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    /// `H(N) XOR H(g)`, the first M1 input.
    ng_xor: Vec<u8>,
}

fn group() -> &'static Group {
    static GROUP: OnceLock<Group> = OnceLock::new();
    GROUP.get_or_init(Group::hap)
}

impl Group {
    fn hap() -> Self {
        let n = BigUint::parse_bytes(PRIME_3072.as_bytes(), 16)
            .expect("RFC 5054 prime is valid hex");
        let g = BigUint::from(GENERATOR);

        let n_bytes = pad(&n);
        let k = BigUint::from_bytes_be(&sha512(&[&n_bytes, &pad(&g)]));
        let ng_xor = sha512(&[&n_bytes])
            .iter()
            .zip(sha512(&[&g.to_bytes_be()]))
            .map(|(n, g)| n ^ g)
            .collect();

        Self { n, g, k, ng_xor }
    }

    /// Reject elements congruent to zero.
    fn check_element(&self, value: &BigUint, what: &str) -> Result<BigUint, CryptoError> {
        let reduced = value % &self.n;
        if reduced == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation(format!("{what} is 0 mod N")));
        }
        Ok(reduced)
    }

    /// `u = H(PAD(A) | PAD(B))`
    fn scramble(&self, a: &BigUint, b: &BigUint) -> BigUint {
        BigUint::from_bytes_be(&sha512(&[&pad(a), &pad(b)]))
    }

    /// `M1 = H(H(N) xor H(g) | H(I) | s | PAD(A) | PAD(B) | K)`
    fn client_evidence(
        &self,
        identity: &[u8],
        salt: &[u8],
        a: &BigUint,
        b: &BigUint,
        key: &[u8],
    ) -> Vec<u8> {
        sha512(&[
            &self.ng_xor,
            &sha512(&[identity]),
            salt,
            &pad(a),
            &pad(b),
            key,
        ])
    }

    /// `M2 = H(PAD(A) | M1 | K)`
    fn server_evidence(&self, a: &BigUint, m1: &[u8], key: &[u8]) -> Vec<u8> {
        sha512(&[&pad(a), m1, key])
    }
}

/// Left-pad to the group width.
fn pad(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let skip = bytes.len().saturating_sub(GROUP_BYTES);
    let mut out = vec![0u8; GROUP_BYTES.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// `x = H(s | H(I ":" P))`
fn password_exponent(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let inner = sha512(&[identity, b":", password]);
    BigUint::from_bytes_be(&sha512(&[salt, &inner]))
}

/// Salt and `B` from pair-setup M2.
pub struct SrpChallenge {
    pub salt: [u8; 16],
    pub server_public_key: Vec<u8>,
}

/// Client output for M3, plus what M4 must prove.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    /// Session key `K = H(PAD(S))`.
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpProof {
    /// Constant-time check of the accessory's M4 proof.
    pub fn verifies(&self, server_proof: &[u8]) -> bool {
        self.expected_server_proof.ct_eq(server_proof).into()
    }
}

/// Controller side of the exchange.
pub struct SrpClient {
    identity: Vec<u8>,
    password: Zeroizing<Vec<u8>>,
    secret: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl SrpClient {
    /// `identity` is `Pair-Setup`; `password` is the `XXX-XX-XXX` setup code.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let grp = group();
        let a = OsRng.gen_biguint(EPHEMERAL_BITS);
        let public = grp.g.modpow(&a, &grp.n);

        Self {
            identity: identity.to_vec(),
            password: Zeroizing::new(password.to_vec()),
            secret: Zeroizing::new(a.to_bytes_be()),
            public,
        }
    }

    /// Padded `A`.
    pub fn public_key(&self) -> Vec<u8> {
        pad(&self.public)
    }

    /// Derive M1, `K` and the expected M2 from the accessory's challenge.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let grp = group();
        let b_raw = BigUint::from_bytes_be(&challenge.server_public_key);
        let b = grp.check_element(&b_raw, "server public key")?;

        let u = grp.scramble(&self.public, &b_raw);
        if u == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation("scrambling parameter is 0".to_string()));
        }

        let x = password_exponent(&challenge.salt, &self.identity, &self.password);
        let a = BigUint::from_bytes_be(&self.secret);

        // S = (B - k * g^x) ^ (a + u * x)
        let kgx = (&grp.k * grp.g.modpow(&x, &grp.n)) % &grp.n;
        let base = (b + &grp.n - kgx) % &grp.n;
        let s = base.modpow(&(a + u * x), &grp.n);

        let key = sha512(&[&pad(&s)]);
        let client_proof =
            grp.client_evidence(&self.identity, &challenge.salt, &self.public, &b_raw, &key);
        let expected_server_proof = grp.server_evidence(&self.public, &client_proof, &key);

        Ok(SrpProof {
            client_proof,
            shared_secret: key,
            expected_server_proof,
        })
    }
}

/// Accessory side, used to simulate devices in tests.
#[cfg(any(test, feature = "testing"))]
pub struct SrpServer {
    identity: Vec<u8>,
    salt: [u8; 16],
    verifier: BigUint,
    secret: BigUint,
    public: BigUint,
}

#[cfg(any(test, feature = "testing"))]
impl SrpServer {
    pub fn new(identity: &[u8], password: &[u8], salt: [u8; 16]) -> Self {
        let grp = group();
        let verifier = grp
            .g
            .modpow(&password_exponent(&salt, identity, password), &grp.n);
        let secret = OsRng.gen_biguint(EPHEMERAL_BITS);
        // B = k * v + g^b
        let public = (&grp.k * &verifier + grp.g.modpow(&secret, &grp.n)) % &grp.n;

        Self {
            identity: identity.to_vec(),
            salt,
            verifier,
            secret,
            public,
        }
    }

    pub fn challenge(&self) -> SrpChallenge {
        SrpChallenge {
            salt: self.salt,
            server_public_key: pad(&self.public),
        }
    }

    /// Check M1. Returns `K` and M2.
    pub fn verify_client(
        &self,
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let grp = group();
        let a_raw = BigUint::from_bytes_be(client_public);
        let a = grp.check_element(&a_raw, "client public key")?;

        // S = (A * v^u) ^ b
        let u = grp.scramble(&a_raw, &self.public);
        let s = (a * self.verifier.modpow(&u, &grp.n)).modpow(&self.secret, &grp.n);
        let key = sha512(&[&pad(&s)]);

        let expected = grp.client_evidence(&self.identity, &self.salt, &a_raw, &self.public, &key);
        if !bool::from(expected.ct_eq(client_proof)) {
            return Err(CryptoError::AuthTagMismatch);
        }

        let server_proof = grp.server_evidence(&a_raw, client_proof, &key);
        Ok((key, server_proof))
    }
}
