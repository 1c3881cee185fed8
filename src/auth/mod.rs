//! PLAIN and CRAM-MD5 authentication flows, attempt counting, and the
//! password oracle an embedder plugs in.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use subtle::ConstantTimeEq;

type HmacMd5 = Hmac<Md5>;

/// The password oracle: given a username, produce the expected password
/// (or `None` if the user doesn't exist). Also governs how many bad
/// attempts a session gets before it's latched forbidden.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn password_for(&self, user: &str) -> Option<String>;

    /// Keep this small; a generous ceiling just gives a brute-force
    /// client more tries per connection.
    fn max_tries(&self) -> u32 {
        3
    }
}

/// Decodes an `AUTH PLAIN` initial response: base64 of
/// `authzid\0authcid\0password`. `authzid` may be empty and is ignored by
/// the caller per spec.
pub fn decode_plain(b64: &str) -> Option<(String, String, String)> {
    let raw = STANDARD.decode(b64.trim()).ok()?;
    let mut parts = raw.splitn(3, |&b| b == 0);
    let authzid = parts.next()?;
    let authcid = parts.next()?;
    let password = parts.next()?;
    Some((
        String::from_utf8(authzid.to_vec()).ok()?,
        String::from_utf8(authcid.to_vec()).ok()?,
        String::from_utf8(password.to_vec()).ok()?,
    ))
}

/// Generates a CRAM-MD5 challenge of the shape `<rand-long.now-millis@domain>`,
/// using the process-wide CSPRNG, and returns it both as plain text (for the
/// HMAC computation later) and base64-encoded (for the wire).
pub fn generate_cram_challenge(domain: &str) -> (String, String) {
    let mut rng = rand::thread_rng();
    let rand_long = rng.next_u64();
    let now_millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let challenge = format!("<{:x}.{}@{}>", rand_long, now_millis, domain);
    let encoded = STANDARD.encode(challenge.as_bytes());
    (challenge, encoded)
}

/// Decodes a CRAM-MD5 response line (base64 of `user digest`).
pub fn decode_cram_response(b64: &str) -> Option<(String, String)> {
    let raw = STANDARD.decode(b64.trim()).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (user, digest) = text.rsplit_once(' ')?;
    Some((user.to_string(), digest.to_string()))
}

/// Computes HMAC-MD5(key = password, message = challenge), hex-lowercased.
pub fn cram_digest(password: &str, challenge: &str) -> String {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes()).expect("HMAC accepts any key length");
    mac.update(challenge.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two UTF-8 strings, used for both PLAIN
/// password checks and CRAM-MD5 digest checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_payload() {
        let payload = "\0user\0secret";
        let b64 = STANDARD.encode(payload);
        let (authzid, authcid, password) = decode_plain(&b64).unwrap();
        assert_eq!(authzid, "");
        assert_eq!(authcid, "user");
        assert_eq!(password, "secret");
    }

    #[test]
    fn malformed_base64_is_none() {
        assert!(decode_plain("not base64!!").is_none());
    }

    #[test]
    fn cram_round_trip() {
        let (challenge, challenge_b64) = generate_cram_challenge("localhost");
        assert!(challenge.starts_with('<'));
        assert!(challenge.ends_with('>'));
        assert_eq!(STANDARD.decode(&challenge_b64).unwrap(), challenge.as_bytes());

        let digest = cram_digest("secret", &challenge);
        let response = format!("user {}", digest);
        let response_b64 = STANDARD.encode(&response);

        let (user, got_digest) = decode_cram_response(&response_b64).unwrap();
        assert_eq!(user, "user");
        assert!(constant_time_eq(&got_digest, &digest));
    }

    #[test]
    fn cram_digest_is_deterministic_per_challenge() {
        let d1 = cram_digest("pw", "<chal@host>");
        let d2 = cram_digest("pw", "<chal@host>");
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 32);
    }
}
