//! AWS client construction from project config plus per-target overrides.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use tracing::debug;

use hourglass_core::config::AwsConfig;
use hourglass_core::ConnectionConfig;

/// Endpoint override for `conn`, falling back to the project-wide one.
fn endpoint(aws: &AwsConfig, conn: &ConnectionConfig) -> Option<String> {
    let endpoint = conn
        .endpoint_url
        .as_deref()
        .or(aws.endpoint_url.as_deref())
        .filter(|e| !e.is_empty())?;

    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Some(endpoint.to_string())
    } else {
        Some(format!("https://{endpoint}"))
    }
}

/// Shared SDK config: region (target override wins), static credentials when
/// configured, otherwise the default provider chain.
pub async fn sdk_config(aws: &AwsConfig, conn: &ConnectionConfig) -> SdkConfig {
    let region = conn.region.clone().unwrap_or_else(|| aws.region.clone());
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "hourglass-static",
        );
        loader = loader.credentials_provider(creds);
    }

    debug!(region = %region, "Loading AWS config");
    loader.load().await
}

pub async fn sqs_client(aws: &AwsConfig, conn: &ConnectionConfig) -> aws_sdk_sqs::Client {
    let sdk = sdk_config(aws, conn).await;
    let mut builder = aws_sdk_sqs::config::Builder::from(&sdk);
    if let Some(url) = endpoint(aws, conn) {
        builder = builder.endpoint_url(url);
    }
    aws_sdk_sqs::Client::from_conf(builder.build())
}

pub async fn lambda_client(aws: &AwsConfig, conn: &ConnectionConfig) -> aws_sdk_lambda::Client {
    let sdk = sdk_config(aws, conn).await;
    let mut builder = aws_sdk_lambda::config::Builder::from(&sdk);
    if let Some(url) = endpoint(aws, conn) {
        builder = builder.endpoint_url(url);
    }
    aws_sdk_lambda::Client::from_conf(builder.build())
}
