use sha3::{Digest, Sha3_256};

/// Hex SHA3-256 of the shared secret, the form clients present.
pub fn secret_digest(secret: &str) -> String {
    hex::encode(Sha3_256::digest(secret.as_bytes()))
}

/// The configured secret, kept only as its digest.
#[derive(Debug, Clone)]
pub struct Credential {
    digest: String,
}

impl Credential {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            digest: secret_digest(secret),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn verify(&self, presented: &str) -> bool {
        let presented = presented.trim().as_bytes();
        let expected = self.digest.as_bytes();
        if presented.len() != expected.len() {
            return false;
        }
        presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a.to_ascii_lowercase() ^ b))
            == 0
    }
}
