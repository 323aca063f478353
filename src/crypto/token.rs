use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

/// Generate a cryptographically random API token and its storage hash (4.A).
///
/// Returns `(plaintext, hash)`. Plaintext is hex of 32 random bytes (64
/// hex chars) and is shown to the caller exactly once; only `hash` is
/// ever persisted.
pub fn generate_api_token() -> (String, String) {
    let plaintext = random_hex_token();
    let hash = hash_token(&plaintext);
    (plaintext, hash)
}

/// Hash a presented token the same way at issue and at verification time.
pub fn hash_token(plaintext: &str) -> String {
    let digest = digest::digest(&digest::SHA256, plaintext.as_bytes());
    hex::encode(digest.as_ref())
}

/// Generate a high-entropy session secret / cookie token: hex of 32
/// cryptographically random bytes.
pub fn generate_session_secret() -> String {
    random_hex_token()
}

fn random_hex_token() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).expect("system RNG failure");
    hex::encode(bytes)
}
