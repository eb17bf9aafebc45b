//! GCS wiring: the OpenDAL operator plus a small JSON API client for the
//! object attributes the operator cannot set.
//!
//! OpenDAL's single-request GCS upload sends content type and user metadata
//! but not content-disposition, and it has no metadata patch. Both are done
//! here with `PATCH /storage/v1/b/{bucket}/o/{object}`, signed with the same
//! reqsign loaders OpenDAL uses.

use super::{
    client::{AttributeSync, OpendalClient, PrefixDelete},
    operator_error,
};
use crate::{
    config::{ServiceKind, StorageConfig},
    errors::{StorageError, StorageResult},
    models::{metadata::Metadata, object::ObjectAttributes},
};
use opendal::{Operator, layers::TracingLayer, services};
use reqsign::{GoogleCredentialLoader, GoogleSigner, GoogleTokenLoader};
use serde::Serialize;
use tracing::debug;

/// Resumable upload chunk; GCS wants multiples of 256 KiB.
const RESUMABLE_CHUNK: usize = 32 * 256 * 1024;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const READ_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

impl OpendalClient {
    /// GCS client. Credentials come from `credential_path` when set,
    /// otherwise from the ambient Google environment.
    pub fn gcs(config: &StorageConfig) -> StorageResult<Self> {
        let credential_path = config
            .credential_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let mut builder = services::Gcs::default().bucket(&config.bucket);
        if let Some(endpoint) = config.endpoint() {
            builder = builder.endpoint(endpoint);
        }
        if let Some(path) = credential_path {
            builder = builder.credential_path(path);
        }

        let operator = Operator::new(builder)
            .map_err(|err| operator_error("building gcs operator", err))?
            .layer(TracingLayer)
            .finish();

        let api = GcsJsonApi::new(
            config.endpoint().unwrap_or(DEFAULT_ENDPOINT),
            &config.bucket,
        )
        .with_credentials(credential_path)?;

        Ok(Self::gcs_from_parts(operator, api))
    }

    /// GCS client over an existing operator and JSON API client.
    pub fn gcs_from_parts(operator: Operator, api: GcsJsonApi) -> Self {
        let bucket = api.bucket.clone();
        Self::new(
            ServiceKind::Gcs,
            operator,
            bucket,
            RESUMABLE_CHUNK,
            PrefixDelete::PerObject,
            AttributeSync::Patch(api),
        )
    }
}

/// Body of an object metadata patch. Absent fields are left untouched by
/// GCS; `metadata` entries are merged key by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl ObjectPatch {
    pub fn disposition(disposition: &str) -> Self {
        Self {
            content_disposition: Some(disposition.to_string()),
            ..Self::default()
        }
    }
}

impl From<&ObjectAttributes> for ObjectPatch {
    fn from(attrs: &ObjectAttributes) -> Self {
        Self {
            content_type: attrs.content_type.clone(),
            content_disposition: attrs.content_disposition.clone(),
            metadata: Some(attrs.metadata.clone()),
        }
    }
}

struct GcsAuth {
    signer: GoogleSigner,
    tokens: GoogleTokenLoader,
}

/// Client for the GCS JSON API object endpoints.
pub struct GcsJsonApi {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    auth: Option<GcsAuth>,
}

impl GcsJsonApi {
    /// Unauthenticated client; requests go out unsigned.
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            auth: None,
        }
    }

    /// Sign requests with OAuth tokens for the service account at `path`,
    /// or for the ambient Google credentials when `None`.
    pub fn with_credentials(mut self, path: Option<&str>) -> StorageResult<Self> {
        let mut credentials = GoogleCredentialLoader::default();
        if let Some(path) = path {
            credentials = credentials.with_path(path);
        }

        let mut tokens = GoogleTokenLoader::new(READ_WRITE_SCOPE, self.http.clone());
        let loaded = credentials.load().map_err(|err| {
            StorageError::configuration(format!("loading gcs credentials: {err}"))
        })?;
        if let Some(credential) = loaded {
            tokens = tokens.with_credentials(credential);
        }

        self.auth = Some(GcsAuth {
            signer: GoogleSigner::new("storage"),
            tokens,
        });
        Ok(self)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(key)
        )
    }

    /// Apply `patch` to the object at `key`.
    pub async fn patch(&self, key: &str, patch: &ObjectPatch) -> StorageResult<()> {
        let mut request = self.http.patch(self.object_url(key)).json(patch).build()?;

        if let Some(auth) = &self.auth {
            let token = auth
                .tokens
                .load()
                .await
                .map_err(|err| StorageError::configuration(format!("loading gcs token: {err}")))?
                .ok_or_else(|| StorageError::configuration("no valid gcs credential found"))?;
            auth.signer
                .sign(&mut request, &token)
                .map_err(|err| StorageError::configuration(format!("signing gcs request: {err}")))?;
            request.headers_mut().remove(reqwest::header::HOST);
        }

        let response = self.http.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::from_api(status, &self.bucket, key, message));
        }

        debug!("patched attributes of {}/{}", self.bucket, key);
        Ok(())
    }
}
