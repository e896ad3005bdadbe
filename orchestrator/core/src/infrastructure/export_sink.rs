// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Write-once sink for forensic audit exports (C14), backed by `opendal` so
//! the same interface works against local disk in development and an
//! object store (S3-compatible, with retention/legal-hold) in production.

use opendal::{services, Operator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportSinkError {
    #[error("export sink error: {0}")]
    Operator(#[from] opendal::Error),
}

#[derive(Debug, Clone)]
pub enum ExportSinkConfig {
    LocalFilesystem { root: String },
    S3 { bucket: String, region: String, endpoint: Option<String>, prefix: String },
}

#[derive(Clone)]
pub struct ExportSink {
    operator: Operator,
}

impl ExportSink {
    pub fn new(config: &ExportSinkConfig) -> Result<Self, ExportSinkError> {
        let operator = match config {
            ExportSinkConfig::LocalFilesystem { root } => {
                let builder = services::Fs::default().root(root);
                Operator::new(builder)?.finish()
            }
            ExportSinkConfig::S3 { bucket, region, endpoint, prefix } => {
                let mut builder = services::S3::default().bucket(bucket).region(region).root(prefix);
                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint(endpoint);
                }
                Operator::new(builder)?.finish()
            }
        };
        Ok(Self { operator })
    }

    /// Uploads `bytes` to `path`. The sink is write-once by convention: the
    /// caller always derives `path` from the export batch id, which is
    /// monotonic and never reused.
    pub async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ExportSinkError> {
        self.operator.write(path, bytes).await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>, ExportSinkError> {
        let buf = self.operator.read(path).await?;
        Ok(buf.to_vec())
    }
}
