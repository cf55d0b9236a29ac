// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `X-Signature` computation: `sha256=<hex hmac of the exact request body>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    }
}

/// Signs `body` with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(body);
    format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `sha256=<hex>` header against `body` in constant time.
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(expected) = header.strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let mut mac = mac(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let body = br#"{"category":"message.received"}"#;
        let sig = sign("s3cret", body);
        assert!(verify("s3cret", body, &sig));
        assert!(!verify("other", body, &sig));
        assert!(!verify("s3cret", b"{}", &sig));
        assert!(!verify("s3cret", body, sig.trim_start_matches(PREFIX)));
        assert!(!verify("s3cret", body, "sha256=zz"));
    }

    proptest::proptest! {
        #[test]
        fn signature_is_deterministic(secret in ".{0,32}", body in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let a = sign(&secret, &body);
            proptest::prop_assert_eq!(&a, &sign(&secret, &body));
            proptest::prop_assert!(verify(&secret, &body, &a));
        }
    }
}
