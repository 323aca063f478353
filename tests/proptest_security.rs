//! Property-based coverage for SPEC_FULL.md §8 properties 1-4 and 8: the
//! cryptographic and rate-limiting primitives that the rest of the crate
//! leans on for its safety guarantees.

use inkwell::crypto::{check_password, generate_api_token, hash_password, hash_token};
use inkwell::crypto::Vault;
use inkwell::gate::sanitize_redirect_path;
use inkwell::ratelimit::{Decision, RateLimiter, RateLimiterConfig};
use proptest::prelude::*;
use std::time::Duration;

const ARGON2_TEST_COST: u32 = 8; // cheapest cost proptest can afford at hundreds of cases

proptest! {
    /// Property 1: hashing and then checking the same password always
    /// succeeds, and a single-byte mutation always fails.
    #[test]
    fn password_roundtrips_and_rejects_mutation(password in "[ -~]{12,72}") {
        let hash = hash_password(&password, ARGON2_TEST_COST).unwrap();
        prop_assert!(check_password(&password, &hash).is_ok());

        let mut mutated = password.clone().into_bytes();
        mutated[0] ^= 0x01;
        let mutated = String::from_utf8_lossy(&mutated).to_string();
        if mutated != password {
            prop_assert!(check_password(&mutated, &hash).is_err());
        }
    }

    /// Property 2: token hashing is a deterministic function of the
    /// plaintext, and freshly generated tokens never collide.
    #[test]
    fn token_hash_is_deterministic(plaintext in "[a-zA-Z0-9]{1,128}") {
        prop_assert_eq!(hash_token(&plaintext), hash_token(&plaintext));
    }

    #[test]
    fn generated_tokens_have_unique_plaintext_and_matching_hash(_seed in any::<u8>()) {
        let (plaintext, hash) = generate_api_token();
        prop_assert_eq!(plaintext.len(), 64);
        prop_assert_eq!(hash, hash_token(&plaintext));
    }

    /// Property 3: any plaintext survives an encrypt/decrypt roundtrip under
    /// the same key, and never decrypts under a different one.
    #[test]
    fn vault_roundtrips_under_same_key_and_fails_under_different(
        plaintext in ".{0,256}",
        key_a in any::<[u8; 32]>(),
        key_b in any::<[u8; 32]>(),
    ) {
        let vault_a = Vault::from_key_bytes(&key_a).unwrap();
        let ciphertext = vault_a.encrypt(&plaintext).unwrap();
        prop_assert_eq!(vault_a.decrypt(&ciphertext).unwrap(), plaintext);

        if key_a != key_b {
            let vault_b = Vault::from_key_bytes(&key_b).unwrap();
            prop_assert!(vault_b.decrypt(&ciphertext).is_err());
        }
    }

    /// Property 4: the rate limiter allows exactly `max_attempts` failures
    /// before denying, a success clears the counter, and distinct
    /// `ip:username` keys never interfere with each other.
    #[test]
    fn rate_limiter_threshold_and_key_independence(
        max_attempts in 1u32..8,
        extra_failures in 0u32..5,
        ip in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        username in "[a-z]{3,12}",
        other_username in "[A-Z]{3,12}",
    ) {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts,
            window: Duration::from_secs(900),
            lockout: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(300),
        });

        for _ in 0..max_attempts {
            prop_assert_eq!(limiter.allow(&ip, &username), Decision::Allow);
            limiter.record_failure(&ip, &username);
        }
        for _ in 0..extra_failures {
            limiter.record_failure(&ip, &username);
        }
        prop_assert!(matches!(limiter.allow(&ip, &username), Decision::Deny { .. }));

        // An independent username at the same IP is unaffected.
        prop_assert_eq!(limiter.allow(&ip, &other_username), Decision::Allow);

        limiter.record_success(&ip, &username);
        prop_assert_eq!(limiter.allow(&ip, &username), Decision::Allow);
    }

    /// Property 8: the redirect sanitizer only ever passes through paths
    /// that are same-origin relative paths; everything else collapses to
    /// `/`, and the function never panics on arbitrary input.
    #[test]
    fn redirect_sanitizer_never_emits_cross_origin_paths(raw in ".{0,128}") {
        let sanitized = sanitize_redirect_path(&raw);
        let looks_safe = sanitized.starts_with('/')
            && !sanitized.starts_with("//")
            && !sanitized.contains("://")
            && !sanitized.contains('\\');
        prop_assert!(looks_safe);
        if sanitized != "/" {
            prop_assert_eq!(&sanitized, &raw);
        }
    }
}
