//! Uploads into Supabase Storage buckets

use serde_json::{json, Value as JsonValue};
use tracing::{error, info};

use dataport_adapter::session::{reset_on_auth_error, AuthErrorSignal};
use dataport_adapter::transport::HttpMethod;
use dataport_adapter::upload::{generate_file_name, storage_path, validate_files, UploadParams, UploadedFile};
use dataport_common::error::TransportError;
use dataport_common::response::DataProviderResponse;

use crate::adapter::{error_object, Response, SupabaseAdapter};

impl SupabaseAdapter {
    /// Store every file under `{resource}/[{directory}/]{uuid}.{ext}` in the bucket.
    ///
    /// The bucket is the storage `disk`, falling back to the configured
    /// default bucket. The first failed object stops the batch.
    pub(crate) async fn upload_files(&self, resource: &str, params: UploadParams) -> Response {
        let storage = params.effective_storage(&self.storage);
        let files = params.file.files();
        validate_files(files, &storage)?;

        let bucket = storage
            .disk
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.settings.default_bucket.clone());

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let file_name = generate_file_name(&file.name);
            let path = storage_path(resource, &storage, &file_name);
            let request = self
                .request(HttpMethod::Post, &format!("storage/v1/object/{bucket}/{path}"))
                .header("x-upsert", "true")
                .bytes(file.content_type.clone(), file.data.clone());

            if let Err(err) = self.send(request).await {
                return Ok(self.upload_failure(&err, &path));
            }

            uploaded.push(UploadedFile {
                file_name,
                original_name: file.name.clone(),
                url: self.object_url(&bucket, &path, storage.public.unwrap_or(true)),
                path,
                content_type: file.content_type.clone(),
                size: file.data.len() as u64,
                metadata: params.metadata.clone(),
            });
        }

        info!(bucket = %bucket, resource, count = uploaded.len(), "files uploaded");
        Ok(DataProviderResponse::from_result(
            Some(serde_json::to_value(uploaded)?),
            None,
            Some(200),
            None,
        ))
    }

    /// Public objects get the CDN-style public URL, private ones the authenticated path
    fn object_url(&self, bucket: &str, path: &str, public: bool) -> String {
        let visibility = if public { "public" } else { "authenticated" };
        self.endpoint(&format!("storage/v1/object/{visibility}/{bucket}/{path}"))
    }

    /// Upload failures always report 500; the session is still reset on auth errors
    fn upload_failure(&self, err: &TransportError, path: &str) -> DataProviderResponse<JsonValue> {
        error!(path, error = %err, "upload failed");
        let (error, signal) = match err.body() {
            Some(body) => {
                let error = error_object(body, err.status().unwrap_or(500));
                let mut signal = AuthErrorSignal::from_json(&error);
                signal.status = err.status();
                (error, signal)
            }
            None => (json!({ "message": err.to_string() }), AuthErrorSignal::from_transport(err)),
        };
        reset_on_auth_error(self.session.as_ref(), &signal);
        DataProviderResponse::from_result(None, Some(error), Some(500), None)
    }
}
