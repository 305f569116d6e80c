//! Push credentials and how they reach git.
//!
//! For HTTP(S) destinations the username and password are embedded in the
//! remote URL (percent-encoded). Local paths and `file://` URLs are pushed
//! without credentials.

use reqwest::Url;
use serde::Deserialize;

use construct::ServiceCredential;

/// Username/password pair used to push to the destination.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PushCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PushCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<&ServiceCredential> for PushCredentials {
    fn from(credential: &ServiceCredential) -> Self {
        Self {
            username: credential.username.clone(),
            password: credential.password.clone(),
        }
    }
}

impl PushCredentials {
    /// Values that must never appear in logs or errors: the password and the
    /// encoded form it takes inside a URL.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = vec![self.password.clone()];
        if let Some(encoded) = encoded_password(&self.password) {
            if encoded != self.password {
                secrets.push(encoded);
            }
        }
        secrets
    }
}

/// Returns `url` with `credentials` embedded when it is an HTTP(S) URL that
/// does not already carry user info; otherwise returns `url` unchanged.
pub fn authenticated_url(url: &str, credentials: Option<&PushCredentials>) -> String {
    let Some(credentials) = credentials else {
        return url.to_string();
    };
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https")
        || !parsed.username().is_empty()
        || parsed.password().is_some()
    {
        return url.to_string();
    }

    if parsed.set_username(&credentials.username).is_err()
        || parsed.set_password(Some(&credentials.password)).is_err()
    {
        return url.to_string();
    }
    parsed.into()
}

fn encoded_password(password: &str) -> Option<String> {
    let mut url = Url::parse("http://localhost/").ok()?;
    url.set_password(Some(password)).ok()?;
    url.password().map(str::to_string)
}
