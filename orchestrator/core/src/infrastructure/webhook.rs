// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Outbound webhook signing and delivery, used by the HITL gateway (C12) to
//! notify sponsor-configured reviewer endpoints.
//!
//! Signature: HMAC-SHA256 over `timestamp + "." + canonical_body`, carried
//! in `X-Aegis-Signature: sha256=<hex>` and `X-Aegis-Timestamp: <unix>`.
//! Verification on the receiving side rejects timestamps older than 300s.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SIGNATURE_MAX_AGE_SECS: i64 = 300;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

pub fn sign(body: &str, secret: &str, timestamp: i64) -> String {
    let payload = format!("{}.{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_signature(body: &str, timestamp: i64, signature_hex: &str, secret: &str, now: i64) -> bool {
    if (now - timestamp).abs() > SIGNATURE_MAX_AGE_SECS {
        return false;
    }
    let expected = sign(body, secret, timestamp);
    expected.as_bytes().ct_eq(signature_hex.as_bytes()).into()
}

pub struct WebhookClient {
    http: reqwest::Client,
    secret: String,
}

impl WebhookClient {
    pub fn new(secret: String) -> Self {
        let http = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build().expect("reqwest client must build");
        Self { http, secret }
    }

    /// Delivers `body` to `url`, signed with the configured HMAC secret.
    /// Delivery failures are logged and swallowed — a reviewer notification
    /// is best-effort, not part of the pipeline's success path.
    pub async fn deliver(&self, url: &str, body: &serde_json::Value) {
        let timestamp = Utc::now().timestamp();
        let serialized = body.to_string();
        let signature = sign(&serialized, &self.secret, timestamp);

        let result = self
            .http
            .post(url)
            .header("X-Aegis-Signature", format!("sha256={}", signature))
            .header("X-Aegis-Timestamp", timestamp.to_string())
            .header("Content-Type", "application/json")
            .body(serialized)
            .send()
            .await;

        if let Err(err) = result {
            tracing::warn!(%url, error = %err, "webhook delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_valid_signature_within_window() {
        let secret = "webhook-secret";
        let body = r#"{"event":"hitl.created"}"#;
        let now = Utc::now().timestamp();
        let signature = sign(body, secret, now);
        assert!(verify_signature(body, now, &signature, secret, now));
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = "webhook-secret";
        let body = "{}";
        let old = Utc::now().timestamp() - SIGNATURE_MAX_AGE_SECS - 1;
        let signature = sign(body, secret, old);
        assert!(!verify_signature(body, old, &signature, secret, Utc::now().timestamp()));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = "webhook-secret";
        let now = Utc::now().timestamp();
        let signature = sign("original", secret, now);
        assert!(!verify_signature("tampered", now, &signature, secret, now));
    }
}
