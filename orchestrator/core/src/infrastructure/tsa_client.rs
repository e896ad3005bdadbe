// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! RFC 3161 timestamp authority client, used optionally by the forensic
//! exporter (C14) to attach a trusted timestamp token to each export batch.
//!
//! This crate does not implement ASN.1 TimeStampReq/TimeStampResp encoding
//! from scratch; it sends the already-hashed digest to the configured TSA
//! endpoint over the conventional `application/timestamp-query` content
//! type and returns the raw DER response body, which callers store as an
//! opaque blob (§9: dynamic blobs are never parsed by the core).

use std::time::Duration;

const TSA_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TsaClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TsaError {
    #[error("TSA request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("TSA returned non-2xx status: {0}")]
    BadStatus(u16),
}

impl TsaClient {
    pub fn new(endpoint: String) -> Self {
        let http = reqwest::Client::builder().timeout(TSA_TIMEOUT).build().expect("reqwest client must build");
        Self { http, endpoint }
    }

    /// Requests a timestamp token over the SHA-256 of `digest` and returns
    /// the raw DER bytes of the TimeStampResp.
    pub async fn timestamp(&self, digest: &[u8]) -> Result<Vec<u8>, TsaError> {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(digest);
        let hashed = hasher.finalize();

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/timestamp-query")
            .body(hashed.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TsaError::BadStatus(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
