//! Web push message encryption and request signing.
//!
//! Implements the `aes128gcm` content coding from RFC 8291 (one record, no
//! padding beyond the delimiter byte) and the VAPID ES256 authorization
//! token from RFC 8292.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use base64::Engine as _;
use chrono::Utc;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha2::Sha256;
use url::Url;

use crate::{Error, Result};

/// Uncompressed SEC1 P-256 point length.
pub const PUBLIC_KEY_LEN: usize = 65;
/// Client auth secret length.
pub const AUTH_SECRET_LEN: usize = 16;

const SALT_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;

const IKM_INFO_PREFIX: &str = "WebPush: info\0";
const CEK_INFO: &str = "Content-Encoding: aes128gcm\0";
const NONCE_INFO: &str = "Content-Encoding: nonce\0";

/// An encrypted push body plus the header parameters the request carries.
pub struct EncryptedPush {
    pub body: Vec<u8>,
    pub salt_b64: String,
    pub dh_b64: String,
}

pub fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input.as_bytes())
}

pub fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

/// VAPID audience of a push endpoint: its origin, `scheme://host[:port]`.
pub fn push_audience(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Other(format!("Invalid push endpoint URL: {}", e)))?;
    let host = url
        .host()
        .ok_or_else(|| Error::Other("Push endpoint missing host".to_string()))?;

    let host = match host {
        url::Host::Domain(d) => d.to_string(),
        url::Host::Ipv4(ip) => ip.to_string(),
        url::Host::Ipv6(ip) => format!("[{}]", ip),
    };

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::Other("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Record IV: the low 8 bytes of the derived nonce xor the record counter.
fn record_iv(nonce: &[u8], counter: u64) -> [u8; 12] {
    let mut iv = [0u8; 12];
    let offset = 12 - 8;
    iv[0..offset].copy_from_slice(&nonce[0..offset]);
    let mask = u64::from_be_bytes(nonce[offset..].try_into().unwrap_or_default());
    iv[offset..].copy_from_slice(&(mask ^ counter).to_be_bytes());
    iv
}

/// Encrypt a payload for one subscription.
///
/// A fresh salt and ephemeral ECDH keypair per message; the returned body
/// carries the RFC 8188 header (salt, record size, sender public key)
/// followed by the single ciphertext record.
pub fn encrypt_payload(
    plaintext: &[u8],
    client_public_raw: &[u8; PUBLIC_KEY_LEN],
    client_auth: &[u8; AUTH_SECRET_LEN],
) -> Result<EncryptedPush> {
    if plaintext.is_empty() {
        return Err(Error::Other("Web push payload cannot be empty".to_string()));
    }

    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let client_public = p256::PublicKey::from_sec1_bytes(client_public_raw)
        .map_err(|_| Error::Other("Invalid subscription public key".to_string()))?;

    let local_secret = EphemeralSecret::random(&mut rng);
    let local_public = p256::PublicKey::from(&local_secret);
    let local_public_point = local_public.to_encoded_point(false);
    let local_public_raw: [u8; PUBLIC_KEY_LEN] = local_public_point
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Other("Invalid local public key length".to_string()))?;

    let shared_secret = local_secret.diffie_hellman(&client_public);
    let shared_secret = shared_secret.raw_secret_bytes();

    // ikm info = "WebPush: info\0" || client public || sender public
    let mut ikm_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    ikm_info.extend_from_slice(IKM_INFO_PREFIX.as_bytes());
    ikm_info.extend_from_slice(client_public_raw);
    ikm_info.extend_from_slice(&local_public_raw);

    let ikm = hkdf_sha256(client_auth, shared_secret.as_slice(), &ikm_info, 32)?;
    let cek = hkdf_sha256(&salt, &ikm, CEK_INFO.as_bytes(), 16)?;
    let nonce = hkdf_sha256(&salt, &ikm, NONCE_INFO.as_bytes(), 12)?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| Error::Other("Invalid CEK length".to_string()))?;
    let iv = record_iv(&nonce, 0);

    // Single record: plaintext plus the final-record delimiter byte.
    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(2);

    let ciphertext = cipher
        .encrypt((&iv).into(), padded.as_slice())
        .map_err(|_| Error::Other("AES-GCM encryption failed".to_string()))?;

    let mut body = Vec::with_capacity(SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&local_public_raw);
    body.extend_from_slice(&ciphertext);

    Ok(EncryptedPush {
        body,
        salt_b64: encode_b64url(&salt),
        dh_b64: encode_b64url(&local_public_raw),
    })
}

/// Build a VAPID ES256 token for the given audience; returns the token and
/// its expiry as a Unix timestamp.
pub fn vapid_token(
    aud: &str,
    subject: &str,
    private_key: &[u8; 32],
    exp_secs: i64,
) -> Result<(String, i64)> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: u64,
        sub: &'a str,
    }

    let header = serde_json::json!({ "typ": "JWT", "alg": "ES256" });
    let exp_unix = (Utc::now() + chrono::Duration::seconds(exp_secs)).timestamp();
    let claims = Claims {
        aud,
        exp: exp_unix.max(0) as u64,
        sub: subject,
    };

    let header_b64 = encode_b64url(serde_json::to_string(&header)?.as_bytes());
    let claims_b64 = encode_b64url(serde_json::to_vec(&claims)?.as_slice());
    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|_| Error::Other("Invalid VAPID private key".to_string()))?;
    let signature: p256::ecdsa::Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = encode_b64url(signature.to_bytes().as_slice());

    Ok((format!("{}.{}", signing_input, signature_b64), exp_unix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> ([u8; 32], [u8; PUBLIC_KEY_LEN]) {
        let signing_key = SigningKey::random(&mut OsRng);
        let private: [u8; 32] = signing_key.to_bytes().into();
        let public: [u8; PUBLIC_KEY_LEN] = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();
        (private, public)
    }

    #[test]
    fn audience_is_the_endpoint_origin() {
        assert_eq!(
            push_audience("https://fcm.googleapis.com/fcm/send/abc123").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            push_audience("https://push.example:8443/x/y").unwrap(),
            "https://push.example:8443"
        );
        assert!(push_audience("not a url").is_err());
    }

    #[test]
    fn record_iv_xors_the_counter_into_the_tail() {
        let nonce = [1u8; 12];
        let iv0 = record_iv(&nonce, 0);
        let iv1 = record_iv(&nonce, 1);
        assert_eq!(iv0[..4], nonce[..4]);
        assert_eq!(iv0[..11], iv1[..11]);
        assert_eq!(iv0[11] ^ iv1[11], 1);
    }

    #[test]
    fn encrypted_body_carries_the_rfc8188_header() {
        let (_, public) = test_keypair();
        let auth = [7u8; AUTH_SECRET_LEN];
        let plaintext = b"{\"title\":\"hi\"}";

        let encrypted = encrypt_payload(plaintext, &public, &auth).unwrap();
        let body = &encrypted.body;

        // salt || u32 record size || key id length || sender key || ciphertext
        assert_eq!(&body[16..20], &RECORD_SIZE.to_be_bytes());
        assert_eq!(body[20] as usize, PUBLIC_KEY_LEN);
        // ciphertext = plaintext + delimiter + 16-byte GCM tag
        assert_eq!(body.len(), 16 + 4 + 1 + PUBLIC_KEY_LEN + plaintext.len() + 1 + 16);
        assert_eq!(decode_b64url(&encrypted.salt_b64).unwrap(), body[..16]);
    }

    #[test]
    fn empty_payload_is_rejected() {
        let (_, public) = test_keypair();
        let auth = [0u8; AUTH_SECRET_LEN];
        assert!(encrypt_payload(b"", &public, &auth).is_err());
    }

    #[test]
    fn vapid_token_has_three_segments_and_sane_claims() {
        let (private, _) = test_keypair();
        let (token, exp) = vapid_token(
            "https://push.example",
            "mailto:ops@tasktide.app",
            &private,
            3600,
        )
        .unwrap();

        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&decode_b64url(segments[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example");
        assert_eq!(claims["sub"], "mailto:ops@tasktide.app");
        assert_eq!(claims["exp"], exp);
        assert!(exp > Utc::now().timestamp());
    }
}
