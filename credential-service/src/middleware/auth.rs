use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::services::api_key::parse_api_key_header;
use crate::services::{AuthContext, Credential};
use crate::AppState;

const API_KEY_HEADERS: [&str; 2] = ["x-api-key", "api-key"];

/// Find the caller's credential. The `Authorization` header wins, then the
/// API key headers, then the session cookie.
pub fn extract_credential(
    headers: &HeaderMap,
    jar: &CookieJar,
    cookie_name: &str,
) -> Option<Credential> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(key) = parse_api_key_header(value) {
            return Some(Credential::ApiKey(key.to_string()));
        }
        if let Some(token) = value.strip_prefix("Bearer ").map(str::trim) {
            if !token.is_empty() {
                return Some(Credential::Bearer(token.to_string()));
            }
        }
    }

    for name in API_KEY_HEADERS {
        if let Some(key) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Some(Credential::ApiKey(key.to_string()));
        }
    }

    jar.get(cookie_name)
        .map(|c| c.value().trim())
        .filter(|v| !v.is_empty())
        .map(|v| Credential::SessionToken(v.to_string()))
}

/// Authenticate the request and attach its [`AuthContext`].
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = extract_credential(req.headers(), &jar, &state.session_cookie)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing credentials")))?;

    let context = state.auth.authenticate(&credential).await.map_err(|e| {
        tracing::debug!(code = e.code(), "Request authentication failed");
        AppError::from(e)
    })?;

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Reject requests whose context lacks any of `required`. Layer after
/// [`require_auth`].
pub async fn require_scopes(
    required: &'static [&'static str],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("Auth context missing from request extensions"))
    })?;

    if let Err(e) = context.require_scopes(required) {
        tracing::warn!(
            user_id = %context.user_id,
            required = ?required,
            granted = ?context.scopes,
            "Insufficient scopes"
        );
        return Err(e.into());
    }

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unauthorized")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::Cookie;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_bearer_jwt() {
        let creds = extract_credential(
            &headers(&[("authorization", "Bearer eyJ.abc.def")]),
            &CookieJar::new(),
            "session_token",
        );
        assert_eq!(creds, Some(Credential::Bearer("eyJ.abc.def".into())));
    }

    #[test]
    fn test_api_key_forms() {
        let jar = CookieJar::new();
        for pairs in [
            [("authorization", "ApiKey sk_live_1")],
            [("authorization", "Bearer sk_live_1")],
            [("x-api-key", "sk_live_1")],
            [("api-key", "sk_live_1")],
        ] {
            assert_eq!(
                extract_credential(&headers(&pairs), &jar, "session_token"),
                Some(Credential::ApiKey("sk_live_1".into()))
            );
        }
    }

    #[test]
    fn test_authorization_header_wins_over_cookie() {
        let jar = CookieJar::new().add(Cookie::new("session_token", "opaque"));
        let creds = extract_credential(
            &headers(&[("authorization", "Bearer eyJ.a.b")]),
            &jar,
            "session_token",
        );
        assert_eq!(creds, Some(Credential::Bearer("eyJ.a.b".into())));
    }

    #[test]
    fn test_session_cookie_fallback() {
        let jar = CookieJar::new().add(Cookie::new("session_token", "opaque"));
        assert_eq!(
            extract_credential(&HeaderMap::new(), &jar, "session_token"),
            Some(Credential::SessionToken("opaque".into()))
        );
        assert_eq!(extract_credential(&HeaderMap::new(), &jar, "other"), None);
    }

    #[test]
    fn test_unknown_scheme_ignored() {
        assert_eq!(
            extract_credential(
                &headers(&[("authorization", "Basic dXNlcjpwYXNz")]),
                &CookieJar::new(),
                "session_token"
            ),
            None
        );
    }
}
