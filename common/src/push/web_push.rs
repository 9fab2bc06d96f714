// Web Push transport over HTTP with VAPID authentication and
// aes128gcm payload encryption (RFC 8291)

use super::PushTransport;
use crate::errors::PushError;
use crate::models::PushSubscription;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

/// VAPID JWTs are valid for 12 hours
const VAPID_TOKEN_LIFETIME_HOURS: i64 = 12;

/// Uncompressed P-256 public key: 0x04 prefix plus two 32-byte coordinates
const P256DH_LENGTH: usize = 65;
const AUTH_SECRET_LENGTH: usize = 16;

#[derive(Debug, Serialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

/// Application server identity used to sign push requests
#[derive(Clone)]
pub struct VapidCredentials {
    subject: String,
    public_key: String,
    encoding_key: EncodingKey,
}

impl VapidCredentials {
    /// Build from a PKCS#8 PEM encoded P-256 private key
    pub fn from_pem(subject: &str, public_key: &str, private_key_pem: &str) -> Result<Self, PushError> {
        let encoding_key = EncodingKey::from_ec_pem(private_key_pem.as_bytes())
            .map_err(|e| PushError::Vapid(format!("Invalid VAPID private key: {}", e)))?;

        Ok(Self {
            subject: subject.to_string(),
            public_key: public_key.to_string(),
            encoding_key,
        })
    }

    /// `Authorization` header value for a request to `endpoint`
    pub fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let claims = VapidClaims {
            aud: endpoint_origin(endpoint)?,
            exp: (Utc::now() + ChronoDuration::hours(VAPID_TOKEN_LIFETIME_HOURS)).timestamp(),
            sub: self.subject.clone(),
        };

        let token = encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key)
            .map_err(|e| PushError::Vapid(format!("Failed to sign VAPID token: {}", e)))?;

        Ok(format!("vapid t={}, k={}", token, self.public_key))
    }
}

/// Scheme, host and port of the push service, as the VAPID audience
fn endpoint_origin(endpoint: &str) -> Result<String, PushError> {
    let url = Url::parse(endpoint)
        .map_err(|e| PushError::Network(format!("Invalid push endpoint '{}': {}", endpoint, e)))?;
    Ok(url.origin().ascii_serialization())
}

/// Decode a subscription key; browsers emit unpadded URL-safe base64
fn decode_key(name: &str, value: &str) -> Result<Vec<u8>, PushError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| PushError::InvalidSubscription(format!("Undecodable {} key: {}", name, e)))
}

/// Encrypt `payload` for the subscriber's user agent
fn encrypt_payload(subscription: &PushSubscription, payload: &str) -> Result<Vec<u8>, PushError> {
    let p256dh = decode_key("p256dh", &subscription.keys.p256dh)?;
    let auth = decode_key("auth", &subscription.keys.auth)?;

    if p256dh.len() != P256DH_LENGTH || p256dh[0] != 0x04 {
        return Err(PushError::InvalidSubscription(format!(
            "p256dh must be an uncompressed P-256 point, got {} bytes",
            p256dh.len()
        )));
    }
    if auth.len() != AUTH_SECRET_LENGTH {
        return Err(PushError::InvalidSubscription(format!(
            "auth secret must be {} bytes, got {}",
            AUTH_SECRET_LENGTH,
            auth.len()
        )));
    }

    ece::encrypt(&p256dh, &auth, payload.as_bytes())
        .map_err(|e| PushError::Encryption(e.to_string()))
}

/// WebPushTransport posts encrypted payloads to browser push services
pub struct WebPushTransport {
    client: Client,
    vapid: Option<VapidCredentials>,
    ttl_seconds: u32,
}

impl WebPushTransport {
    /// Create a transport with the given request timeout and message TTL
    pub fn new(
        timeout_seconds: u64,
        ttl_seconds: u32,
        vapid: Option<VapidCredentials>,
    ) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| PushError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            vapid,
            ttl_seconds,
        })
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    #[tracing::instrument(skip(self, subscription, payload), fields(endpoint = %subscription.endpoint))]
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<(), PushError> {
        let body = encrypt_payload(subscription, payload)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_seconds.to_string())
            .header(CONTENT_ENCODING, "aes128gcm")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);

        if let Some(vapid) = &self.vapid {
            request = request.header(AUTHORIZATION, vapid.authorization(&subscription.endpoint)?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Push service accepted message");
            return Ok(());
        }

        match status.as_u16() {
            404 | 410 => Err(PushError::Gone {
                status: status.as_u16(),
            }),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(PushError::Rejected { status: code, body })
            }
        }
    }
}
