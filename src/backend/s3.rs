//! S3 wiring for `OpendalClient`.

use super::{
    client::{AttributeSync, OpendalClient, PrefixDelete},
    operator_error,
};
use crate::{
    config::{ServiceKind, StorageConfig},
    errors::StorageResult,
};
use opendal::{Operator, layers::TracingLayer, services};

/// Region used when only a custom endpoint is configured.
const FALLBACK_REGION: &str = "us-east-1";

/// Multipart part size for streamed uploads. S3 rejects parts under 5 MiB.
const MULTIPART_CHUNK: usize = 8 * 1024 * 1024;

impl OpendalClient {
    pub fn s3(config: &StorageConfig) -> StorageResult<Self> {
        let mut builder = services::S3::default().bucket(&config.bucket);

        // A custom endpoint wins; the region is still required for signing.
        if let Some(endpoint) = config.endpoint() {
            builder = builder
                .endpoint(endpoint)
                .region(config.region().unwrap_or(FALLBACK_REGION));
        } else if let Some(region) = config.region() {
            builder = builder.region(region);
        }
        if let Some(key_id) = config.access_key_id.as_deref() {
            builder = builder.access_key_id(key_id);
        }
        if let Some(secret) = config.secret_access_key.as_deref() {
            builder = builder.secret_access_key(secret);
        }

        let operator = Operator::new(builder)
            .map_err(|err| operator_error("building s3 operator", err))?
            .layer(TracingLayer)
            .finish();

        Ok(Self::s3_from_operator(operator, config.bucket.clone()))
    }

    /// S3 client over an existing operator. Prefix deletes are batched and
    /// attributes travel as request headers; CopyObject with a metadata
    /// directive is not exposed by the operator, so attribute rewrites
    /// stream the body back onto the key.
    pub fn s3_from_operator(operator: Operator, bucket: impl Into<String>) -> Self {
        Self::new(
            ServiceKind::S3,
            operator,
            bucket,
            MULTIPART_CHUNK,
            PrefixDelete::Batched,
            AttributeSync::OnWrite,
        )
    }
}
