//! Shared AWS SDK plumbing for the S3 and SQS adapters.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use tracing::debug;

use crate::config::AwsConfig;

const CREDENTIALS_PROVIDER_NAME: &str = "fleetlink_static";

/// Loads the shared SDK config: default provider chain, overridden by any
/// region, endpoint or static credentials in `aws`.
pub(crate) async fn load_sdk_config(aws: &AwsConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = aws.region.clone() {
        loader = loader.region(Region::new(region));
    }
    if let Some(endpoint) = aws.endpoint_url.as_deref() {
        debug!("Using AWS endpoint override {}", endpoint);
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key_id), Some(secret_access_key)) =
        (aws.access_key_id.clone(), aws.secret_access_key.clone())
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            aws.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER_NAME,
        ));
    }
    loader.load().await
}

/// Raw HTTP status of a failed call, when the service answered at all.
pub(crate) fn http_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

pub(crate) fn boxed_error<E>(err: &SdkError<E, HttpResponse>) -> Box<dyn std::error::Error + Send + Sync>
where
    E: std::error::Error + 'static,
{
    DisplayErrorContext(err).to_string().into()
}
