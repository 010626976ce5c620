use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

pub fn generate_pkce() -> PkcePair {
    // 64 hex characters, within the 43..=128 range RFC 7636 allows
    let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let challenge = challenge_for(&verifier);
    PkcePair { verifier, challenge }
}

pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Opaque, unguessable state token for an authorization flow
pub fn generate_state() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-1mB0UZ9e0WYmB5zCqnN1dhDxWT-TUk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuIDPmLSS2g"
        );
    }

    #[test]
    fn test_generated_pairs_are_unique() {
        let a = generate_pkce();
        let b = generate_pkce();

        assert_eq!(a.verifier.len(), 64);
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.challenge, challenge_for(&a.verifier));
        assert_ne!(generate_state(), generate_state());
    }
}
