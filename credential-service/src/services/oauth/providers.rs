use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration as StdDuration;

use crate::config::ProviderCredentials;
use crate::models::{ProviderTokens, ProviderUserInfo};
use crate::services::error::ProviderError;

pub const GOOGLE: &str = "google";
pub const GITHUB: &str = "github";
pub const MICROSOFT: &str = "microsoft";

/// One upstream identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Where to send the browser. `code_challenge` is the PKCE S256 value.
    fn authorization_url(&self, state: &str, redirect_uri: &str, code_challenge: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, ProviderError>;

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self) -> Result<ProviderTokens, ProviderError> {
        if let Some(error) = self.error {
            let detail = self.error_description.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{}: {}", error, detail)));
        }
        let access_token = self
            .access_token
            .ok_or(ProviderError::MissingField("access_token"))?;

        Ok(ProviderTokens {
            access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            scope: self.scope,
        })
    }
}

/// Authorization-code client shared by every provider.
struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    authorize_url: &'static str,
    token_url: &'static str,
    scope: &'static str,
}

impl OAuthClient {
    fn new(
        credentials: &ProviderCredentials,
        timeout: StdDuration,
        authorize_url: &'static str,
        token_url: &'static str,
        scope: &'static str,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("credential-service/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            authorize_url,
            token_url,
            scope,
        })
    }

    fn authorization_url(
        &self,
        state: &str,
        redirect_uri: &str,
        code_challenge: &str,
        extra: &[(&str, &str)],
    ) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}\
             &code_challenge={}&code_challenge_method=S256",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(self.scope),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        );
        for (key, value) in extra {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<ProviderTokens, ProviderError> {
        let res = self
            .http
            .post(self.token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Provider token request failed");
            return Err(ProviderError::Rejected(format!("token endpoint returned {}", status)));
        }

        res.json::<TokenResponse>().await?.into_tokens()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        accept: &str,
    ) -> Result<T, ProviderError> {
        let res = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, accept)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected(format!("{} returned {}", url, status)));
        }
        Ok(res.json::<T>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
}

impl From<GoogleUser> for ProviderUserInfo {
    fn from(user: GoogleUser) -> Self {
        ProviderUserInfo {
            provider_account_id: user.id,
            email: user.email,
            email_verified: user.verified_email,
            name: user.name,
        }
    }
}

pub struct GoogleProvider {
    client: OAuthClient,
}

impl GoogleProvider {
    pub fn new(
        credentials: &ProviderCredentials,
        timeout: StdDuration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: OAuthClient::new(
                credentials,
                timeout,
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                "openid email profile",
            )?,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn id(&self) -> &str {
        GOOGLE
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str, code_challenge: &str) -> String {
        // offline access is what makes Google return a refresh token
        self.client.authorization_url(
            state,
            redirect_uri,
            code_challenge,
            &[("access_type", "offline"), ("prompt", "select_account consent")],
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        self.client.exchange_code(code, redirect_uri, code_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError> {
        let user: GoogleUser = self
            .client
            .get_json(
                "https://www.googleapis.com/oauth2/v2/userinfo",
                access_token,
                "application/json",
            )
            .await?;
        Ok(user.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        self.client.refresh(refresh_token).await
    }
}

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Public profile email first, then the primary address from the emails
/// list, then the account's noreply alias (never treated as verified).
fn github_identity(user: GitHubUser, emails: &[GitHubEmail]) -> ProviderUserInfo {
    let (email, verified) = match user.email.filter(|e| !e.is_empty()) {
        Some(email) => (email, true),
        None => match emails.iter().find(|e| e.primary) {
            Some(primary) => (primary.email.clone(), primary.verified),
            None => (format!("{}@users.noreply.github.com", user.login), false),
        },
    };

    ProviderUserInfo {
        provider_account_id: user.id.to_string(),
        email: Some(email),
        email_verified: verified,
        name: user.name.or(Some(user.login)),
    }
}

pub struct GitHubProvider {
    client: OAuthClient,
}

impl GitHubProvider {
    pub fn new(
        credentials: &ProviderCredentials,
        timeout: StdDuration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: OAuthClient::new(
                credentials,
                timeout,
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
                "read:user user:email",
            )?,
        })
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn id(&self) -> &str {
        GITHUB
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str, code_challenge: &str) -> String {
        self.client
            .authorization_url(state, redirect_uri, code_challenge, &[])
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        self.client.exchange_code(code, redirect_uri, code_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError> {
        let user: GitHubUser = self
            .client
            .get_json("https://api.github.com/user", access_token, GITHUB_ACCEPT)
            .await?;

        let emails: Vec<GitHubEmail> = if user.email.as_deref().is_some_and(|e| !e.is_empty()) {
            Vec::new()
        } else {
            match self
                .client
                .get_json("https://api.github.com/user/emails", access_token, GITHUB_ACCEPT)
                .await
            {
                Ok(emails) => emails,
                Err(e) => {
                    tracing::warn!(error = %e, "GitHub email lookup failed; using noreply address");
                    Vec::new()
                }
            }
        };

        Ok(github_identity(user, &emails))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        // OAuth app tokens do not expire and come without a refresh token.
        Err(ProviderError::Unsupported("token refresh"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MicrosoftUser {
    id: String,
    mail: Option<String>,
    user_principal_name: Option<String>,
    display_name: Option<String>,
}

impl From<MicrosoftUser> for ProviderUserInfo {
    fn from(user: MicrosoftUser) -> Self {
        // Graph does not assert ownership of `mail`, so it is never treated
        // as verified.
        ProviderUserInfo {
            provider_account_id: user.id,
            email: user.mail.or(user.user_principal_name),
            email_verified: false,
            name: user.display_name,
        }
    }
}

pub struct MicrosoftProvider {
    client: OAuthClient,
}

impl MicrosoftProvider {
    pub fn new(
        credentials: &ProviderCredentials,
        timeout: StdDuration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: OAuthClient::new(
                credentials,
                timeout,
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                "openid email profile offline_access User.Read",
            )?,
        })
    }
}

#[async_trait]
impl OAuthProvider for MicrosoftProvider {
    fn id(&self) -> &str {
        MICROSOFT
    }

    fn authorization_url(&self, state: &str, redirect_uri: &str, code_challenge: &str) -> String {
        self.client.authorization_url(
            state,
            redirect_uri,
            code_challenge,
            &[("response_mode", "query")],
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        self.client.exchange_code(code, redirect_uri, code_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError> {
        let user: MicrosoftUser = self
            .client
            .get_json("https://graph.microsoft.com/v1.0/me", access_token, "application/json")
            .await?;
        Ok(user.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        self.client.refresh(refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            client_id: "client id".to_string(),
            client_secret: SecretString::new("secret".to_string()),
        }
    }

    #[test]
    fn test_authorization_url_encodes_parameters() -> Result<(), anyhow::Error> {
        let google = GoogleProvider::new(&credentials(), StdDuration::from_secs(5))?;
        let url = google.authorization_url("st@te", "https://app.test/cb?x=1", "chal");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.test%2Fcb%3Fx%3D1"));
        assert!(url.contains("state=st%40te"));
        assert!(url.contains("code_challenge=chal&code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        Ok(())
    }

    #[test]
    fn test_token_response_error_is_rejected() {
        let res: TokenResponse = serde_json::from_str(
            r#"{"error":"bad_verification_code","error_description":"expired"}"#,
        )
        .expect("parse");
        assert!(matches!(res.into_tokens(), Err(ProviderError::Rejected(_))));
    }

    #[test]
    fn test_token_response_computes_expiry() {
        let res: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","expires_in":3600,"scope":"email"}"#)
                .expect("parse");
        let tokens = res.into_tokens().expect("tokens");
        assert_eq!(tokens.access_token, "at");
        assert!(tokens.expires_at.expect("expiry") > Utc::now() + Duration::minutes(59));
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn test_github_prefers_public_email() {
        let user = GitHubUser {
            id: 42,
            login: "octo".into(),
            name: None,
            email: Some("octo@example.com".into()),
        };
        let info = github_identity(user, &[]);
        assert_eq!(info.email.as_deref(), Some("octo@example.com"));
        assert_eq!(info.provider_account_id, "42");
        assert_eq!(info.name.as_deref(), Some("octo"));
    }

    #[test]
    fn test_github_falls_back_to_primary_then_noreply() {
        let user = || GitHubUser {
            id: 7,
            login: "octo".into(),
            name: Some("Octo Cat".into()),
            email: None,
        };
        let emails = vec![
            GitHubEmail {
                email: "old@example.com".into(),
                primary: false,
                verified: true,
            },
            GitHubEmail {
                email: "main@example.com".into(),
                primary: true,
                verified: true,
            },
        ];

        let info = github_identity(user(), &emails);
        assert_eq!(info.email.as_deref(), Some("main@example.com"));
        assert!(info.email_verified);

        let info = github_identity(user(), &[]);
        assert_eq!(info.email.as_deref(), Some("octo@users.noreply.github.com"));
        assert!(!info.email_verified);
    }

    #[test]
    fn test_microsoft_falls_back_to_principal_name() {
        let user: MicrosoftUser = serde_json::from_str(
            r#"{"id":"abc","mail":null,"userPrincipalName":"bob@contoso.com","displayName":"Bob"}"#,
        )
        .expect("parse");
        let info = ProviderUserInfo::from(user);
        assert_eq!(info.email.as_deref(), Some("bob@contoso.com"));
        assert!(!info.email_verified);
    }
}
