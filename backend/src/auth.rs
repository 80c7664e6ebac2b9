//! Wallet signature auth helpers.
//!
//! The nonce store is a bounded in-process cache with an explicit
//! lifecycle: initialized at boot, cleared on teardown, dropped wholesale
//! when it hits capacity. Identity sessions themselves never live here;
//! the datastore is authoritative for those.

use crate::error::{ServiceError, ServiceResult};
use crate::schema::normalize_address;
use ethers::types::Signature;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Cache capacity; reaching it flushes every outstanding nonce.
const NONCE_CAPACITY: usize = 10_000;

lazy_static! {
    static ref NONCES: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
}

/// Boot-time initialization.
pub fn init() {
    clear();
}

/// Teardown: drop all outstanding nonces.
pub fn clear() {
    if let Ok(mut nonces) = NONCES.lock() {
        nonces.clear();
    }
}

/// Issue a fresh single-use nonce for an address, replacing any prior one.
pub fn issue_nonce(address: &str) -> String {
    let nonce = Uuid::new_v4().to_string();
    if let Ok(mut nonces) = NONCES.lock() {
        if nonces.len() >= NONCE_CAPACITY {
            warn!(capacity = NONCE_CAPACITY, "nonce cache full, flushing");
            nonces.clear();
        }
        nonces.insert(normalize_address(address), nonce.clone());
    }
    nonce
}

/// Consume the outstanding nonce for an address; true only when it
/// matches. A nonce never validates twice.
pub fn consume_nonce(address: &str, nonce: &str) -> bool {
    match NONCES.lock() {
        Ok(mut nonces) => nonces
            .remove(&normalize_address(address))
            .is_some_and(|stored| stored == nonce),
        Err(_) => false,
    }
}

/// Recover the signer of a personal-sign message and compare against the
/// claimed address.
pub fn verify_signature(address: &str, message: &str, signature: &str) -> ServiceResult<bool> {
    let signature: Signature = signature
        .parse()
        .map_err(|_| ServiceError::Validation("malformed signature".into()))?;
    let claimed = crate::abi::parse_address(address)
        .map_err(|_| ServiceError::Validation(format!("invalid address: {address}")))?;
    match signature.recover(message.to_string()) {
        Ok(recovered) => Ok(recovered == claimed),
        Err(_) => Ok(false),
    }
}

/// Full signed-nonce check: consume the nonce, then verify the signature
/// over it.
pub fn verify_signed_nonce(address: &str, nonce: &str, signature: &str) -> ServiceResult<bool> {
    if !consume_nonce(address, nonce) {
        return Ok(false);
    }
    verify_signature(address, nonce, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x5555555555555555555555555555555555555555";

    #[test]
    fn test_nonce_round_trip() {
        clear();
        let nonce = issue_nonce(ADDR);
        assert!(consume_nonce(&ADDR.to_uppercase(), &nonce));
        // Single use.
        assert!(!consume_nonce(ADDR, &nonce));
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        clear();
        issue_nonce(ADDR);
        assert!(!consume_nonce(ADDR, "not-the-nonce"));
    }

    #[test]
    fn test_reissue_replaces_nonce() {
        clear();
        let first = issue_nonce(ADDR);
        let second = issue_nonce(ADDR);
        assert!(!consume_nonce(ADDR, &first));
        // Consuming `first` removed the entry, so `second` is gone too;
        // reissue and verify the fresh one round-trips.
        let third = issue_nonce(ADDR);
        assert_ne!(second, third);
        assert!(consume_nonce(ADDR, &third));
    }

    #[test]
    fn test_malformed_signature_is_validation_error() {
        assert!(matches!(
            verify_signature(ADDR, "msg", "zz"),
            Err(ServiceError::Validation(_))
        ));
    }
}
