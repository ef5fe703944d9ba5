use crate::config::OperatorArgs;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{Api, Client};

pub const INTEGRATION_SECRET_NAME: &str = "integration";
pub const MINIO_CREDENTIALS_SECRET_NAME: &str = "minio-credentials";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

fn decode(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|ByteString(bytes)| String::from_utf8_lossy(bytes).into_owned())
}

/// Resolves the object-store coordinates a session's sidecars should use,
/// per spec.md §4.4. Returns `Err(message)` rather than [`Error`]: a
/// resolution failure is never fatal to the session, only downgrades
/// `S3Available` and leaves the sync sidecars in no-op mode.
pub async fn resolve_object_store_config(
    client: Client,
    namespace: &str,
    args: &OperatorArgs,
) -> Result<ObjectStoreConfig, String> {
    let integration: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let integration = match integration.get(INTEGRATION_SECRET_NAME).await {
        Ok(secret) => Some(secret),
        Err(kube::Error::Api(ae)) if ae.code == 404 => None,
        Err(e) => return Err(format!("reading {INTEGRATION_SECRET_NAME} secret: {e}")),
    };

    let storage_mode = integration
        .as_ref()
        .and_then(|s| decode(s, "STORAGE_MODE"))
        .unwrap_or_default();

    if storage_mode == "custom" {
        let integration = integration.as_ref().unwrap();
        let endpoint = decode(integration, "S3_ENDPOINT")
            .ok_or_else(|| "custom storage mode missing S3_ENDPOINT".to_string())?;
        let bucket = decode(integration, "S3_BUCKET")
            .ok_or_else(|| "custom storage mode missing S3_BUCKET".to_string())?;
        let access_key = decode(integration, "S3_ACCESS_KEY")
            .ok_or_else(|| "custom storage mode missing S3_ACCESS_KEY".to_string())?;
        let secret_key = decode(integration, "S3_SECRET_KEY")
            .ok_or_else(|| "custom storage mode missing S3_SECRET_KEY".to_string())?;
        return Ok(ObjectStoreConfig {
            endpoint,
            bucket,
            access_key,
            secret_key,
        });
    }

    let endpoint = args
        .object_store
        .s3_endpoint
        .clone()
        .ok_or_else(|| "no shared-cluster S3_ENDPOINT configured".to_string())?;
    let bucket = args
        .object_store
        .s3_bucket
        .clone()
        .ok_or_else(|| "no shared-cluster S3_BUCKET configured".to_string())?;

    let minio: Api<Secret> = Api::namespaced(client, &args.backend.backend_namespace);
    let minio = minio
        .get(MINIO_CREDENTIALS_SECRET_NAME)
        .await
        .map_err(|e| format!("reading {MINIO_CREDENTIALS_SECRET_NAME} secret: {e}"))?;
    let access_key = decode(&minio, "access_key")
        .ok_or_else(|| format!("{MINIO_CREDENTIALS_SECRET_NAME} missing access_key"))?;
    let secret_key = decode(&minio, "secret_key")
        .ok_or_else(|| format!("{MINIO_CREDENTIALS_SECRET_NAME} missing secret_key"))?;

    Ok(ObjectStoreConfig {
        endpoint,
        bucket,
        access_key,
        secret_key,
    })
}
