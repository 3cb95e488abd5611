//! S3 Credentials Module
//!
//! Resolves static credentials from configuration. When none are configured
//! the SDK's default provider chain is left in charge (environment
//! variables, shared profile, instance metadata).

use crate::config::S3Config;
use aws_credential_types::Credentials;
use thiserror::Error;

/// Provider name reported by the SDK for configured keys
const PROVIDER_NAME: &str = "funnel-config";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Static credentials from the `s3` section, if any.
///
/// Returns `Ok(None)` when neither key is set. Setting only one of the two
/// keys is a configuration mistake and is rejected.
pub fn static_credentials(config: &S3Config) -> Result<Option<Credentials>, CredentialsError> {
    let access_key = non_blank(config.access_key.as_deref());
    let secret_key = non_blank(config.secret_key.as_deref());

    match (access_key, secret_key) {
        (None, None) => {
            if config.session_token.is_some() {
                return Err(CredentialsError::InvalidCredentials(
                    "session_token set without access_key and secret_key".into(),
                ));
            }
            Ok(None)
        }
        (Some(_), None) => Err(CredentialsError::MissingCredentials(
            "secret_key not set in config".into(),
        )),
        (None, Some(_)) => Err(CredentialsError::MissingCredentials(
            "access_key not set in config".into(),
        )),
        (Some(access), Some(secret)) => Ok(Some(Credentials::new(
            access,
            secret,
            config.session_token.clone(),
            None,
            PROVIDER_NAME,
        ))),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
