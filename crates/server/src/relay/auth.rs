//! Web-surface authentication flows: public registration, password
//! verification and password recovery.
//!
//! The provider has no credential-check API, so password verification
//! drives the real login form and classifies the outcome from redirects,
//! session cookies and page content. Every ambiguous outcome counts as a
//! failed verification.

use relaylink_core::Email;
use tracing::{debug, instrument, warn};

use super::client::RelayClient;
use super::error::RelayError;
use super::types::NewAccount;

/// Markers that identify a rendered login form (verification failed).
const LOGIN_FORM_MARKERS: [&str; 2] = ["name=\"password\"", "name=\"email\""];

/// Markers that identify a logged-in page (verification succeeded).
const LOGGED_IN_MARKERS: [&str; 4] = ["logout", "Sign Out", "sign out", "/auth/logout"];

/// Error strings the login page embeds on rejected credentials.
const LOGIN_ERROR_MARKERS: [&str; 4] = [
    "Invalid credentials",
    "incorrect password",
    "login failed",
    "error",
];

impl RelayClient {
    /// Register an account through the public signup form.
    ///
    /// A 302 redirect or a plain 200 both count as accepted; the form
    /// does not return the new account id, so the caller re-resolves it
    /// through the admin listing afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Api` if the form rejects the submission outright.
    #[instrument(skip(self, account), fields(email = %account.email))]
    pub async fn register_public(&self, account: &NewAccount) -> Result<(), RelayError> {
        let url = format!("{}/auth/register", self.config().web_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[
                ("name", account.name.as_str()),
                ("email", account.email.as_str()),
                ("password", account.password.as_str()),
                ("terms", "1"),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 302 || status == 200 {
            return Ok(());
        }

        Err(RelayError::Api {
            status,
            message: "Public registration was rejected".to_string(),
        })
    }

    /// Trigger the provider's password recovery email.
    ///
    /// # Errors
    ///
    /// Returns `Api` on a non-success status.
    #[instrument(skip(self))]
    pub async fn send_password_reset(&self, email: &Email) -> Result<(), RelayError> {
        let url = format!("{}/auth/recovery", self.config().web_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[("email", email.as_str())])
            .send()
            .await?;

        // Recovery endpoint does not return JSON; only the status matters.
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }

        Err(RelayError::Api {
            status: status.as_u16(),
            message: "Password reset request failed".to_string(),
        })
    }

    /// Check credentials against the provider's login form.
    ///
    /// The form redirects to the homepage on both success and failure, so
    /// a single response proves nothing. This follows the first redirect
    /// with the issued session cookie and classifies where it lands:
    /// back at `/auth/login` means rejected, a dashboard or a page with
    /// logout affordances means accepted.
    ///
    /// Fail-closed: network errors and unclassifiable responses all
    /// return `false`. Never errors.
    #[instrument(skip(self, password))]
    pub async fn verify_password(&self, email: &Email, password: &str) -> bool {
        match self.try_verify_password(email, password).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "Password verification errored; treating as invalid");
                false
            }
        }
    }

    async fn try_verify_password(&self, email: &Email, password: &str) -> Result<bool, RelayError> {
        let web_base = self.config().web_base_url.clone();
        let url = format!("{web_base}/auth/login");

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[("email", email.as_str()), ("password", password)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let location = header_string(&response, "location");
        let session_cookie = extract_session_cookie(&response);

        if status == 302
            && let Some(location) = location
        {
            let follow_url = resolve_redirect(&web_base, &location);
            debug!(%follow_url, "Following login redirect");

            let mut request = self.inner.client.get(&follow_url);
            if let Some(cookie) = &session_cookie {
                request = request.header("Cookie", cookie);
            }
            let follow = request.send().await?;

            let follow_status = follow.status().as_u16();
            if follow_status == 302
                && let Some(next) = header_string(&follow, "location")
            {
                return Ok(!next.contains("/auth/login"));
            }

            if follow_status == 200 {
                let body = follow.text().await?;
                if LOGIN_FORM_MARKERS.iter().all(|m| body.contains(m)) {
                    return Ok(false);
                }
                if LOGGED_IN_MARKERS.iter().any(|m| body.contains(m)) {
                    return Ok(true);
                }
                // Ambiguous page; a session cookie is the remaining signal.
                return Ok(session_cookie.is_some());
            }

            return Ok(false);
        }

        if status == 200 {
            let body = response.text().await?;
            if LOGIN_ERROR_MARKERS.iter().any(|m| body.contains(m)) {
                return Ok(false);
            }
        }

        Ok(false)
    }
}

/// Read a response header as a string.
fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Extract the PHP session cookie pair from `Set-Cookie` headers.
fn extract_session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .map(str::trim)
        .find(|part| part.starts_with("PHPSESSID="))
        .map(String::from)
}

/// Resolve a `Location` header value against the web base URL.
fn resolve_redirect(web_base: &str, location: &str) -> String {
    if let Some(rest) = location.strip_prefix("//") {
        format!("https://{rest}")
    } else if location.starts_with('/') {
        format!("{web_base}{location}")
    } else {
        location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_redirect_protocol_relative() {
        assert_eq!(
            resolve_redirect("https://hoprelay.com", "//hoprelay.com/home"),
            "https://hoprelay.com/home"
        );
    }

    #[test]
    fn test_resolve_redirect_absolute_path() {
        assert_eq!(
            resolve_redirect("https://hoprelay.com", "/dashboard"),
            "https://hoprelay.com/dashboard"
        );
    }

    #[test]
    fn test_resolve_redirect_full_url() {
        assert_eq!(
            resolve_redirect("https://hoprelay.com", "https://other.example/x"),
            "https://other.example/x"
        );
    }
}
