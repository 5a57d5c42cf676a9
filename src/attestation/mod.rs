//! Device Attestation
//!
//! One-time attestation exchange converting a platform-level attestation
//! into a long-lived artifact plus an initial token.

pub mod exchanger;
pub mod platform;

pub use exchanger::{AttestationExchange, AttestationExchanger, ExchangeState};
pub use platform::{
    MockPlatformAttestor, PlatformAttestation, PlatformAttestationFailure, PlatformAttestor,
};

use sha2::{Digest, Sha256};

/// Hash binding a server challenge to the attested key material.
pub fn client_data_hash(challenge: &[u8]) -> Vec<u8> {
    Sha256::digest(challenge).to_vec()
}
