use crate::error::{Error, Result};
use async_trait::async_trait;
use cookie::Cookie;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CSRF_COOKIE: &str = "MMCSRF";

/// How requests authenticate against the server. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Browser session, e.g. `MMAUTHTOKEN=...; MMCSRF=...`.
    SessionCookie(String),
    /// Personal access token sent as a bearer token.
    Token(String),
}

impl Credentials {
    /// Picks the session cookie when both are present. Blank values count as missing.
    pub fn from_parts(session_cookie: Option<&str>, token: Option<&str>) -> Result<Self> {
        let session_cookie = session_cookie.map(str::trim).filter(|v| !v.is_empty());
        let token = token.map(str::trim).filter(|v| !v.is_empty());
        match (session_cookie, token) {
            (Some(cookie), _) => Ok(Credentials::SessionCookie(cookie.to_string())),
            (None, Some(token)) => Ok(Credentials::Token(token.to_string())),
            (None, None) => Err(Error::config("a session cookie or access token is required")),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::SessionCookie(_) => "sessionCookie",
            Credentials::Token(_) => "token",
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Credentials::SessionCookie(secret) | Credentials::Token(secret) => {
                secret.trim().is_empty()
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials::{}(<redacted>)", self.mode())
    }
}

/// Status and body text of an upstream reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewReaction<'a> {
    pub user_id: &'a str,
    pub post_id: &'a str,
    pub emoji_name: &'a str,
}

/// The slice of the Mattermost REST API the catalog and dispatcher depend on.
#[async_trait]
pub trait MattermostApi: Send + Sync {
    async fn current_user_id(&self) -> Result<String>;

    async fn emoji_page(&self, page: usize, per_page: usize, sorted: bool)
    -> Result<UpstreamResponse>;

    async fn add_reaction(&self, reaction: &NewReaction<'_>) -> Result<UpstreamResponse>;
}

/// Strips surrounding whitespace and trailing slashes.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Extracts the percent-decoded `MMCSRF` value from a cookie header.
pub fn csrf_token(cookie_header: &str) -> Option<String> {
    Cookie::split_parse(cookie_header)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == CSRF_COOKIE)
        .map(|cookie| percent_decode_str(cookie.value()).decode_utf8_lossy().into_owned())
        .filter(|value| !value.is_empty())
}

pub fn build_http_client() -> Result<Client> {
    Ok(Client::builder().use_rustls_tls().build()?)
}

#[derive(Clone)]
pub struct MattermostClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl MattermostClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        Self::with_http(build_http_client()?, base_url, credentials)
    }

    /// Reuses an existing connection pool.
    pub fn with_http(http: Client, base_url: &str, credentials: Credentials) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(Error::config("a base URL is required"));
        }
        if credentials.is_blank() {
            return Err(Error::config("a session cookie or access token is required"));
        }
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::SessionCookie(cookie) => {
                let builder = builder.header(reqwest::header::COOKIE, cookie);
                match csrf_token(cookie) {
                    Some(csrf) => builder
                        .header("X-CSRF-Token", csrf)
                        .header("X-Requested-With", "XMLHttpRequest"),
                    None => builder,
                }
            }
            Credentials::Token(token) => builder.bearer_auth(token),
        }
    }

    async fn read(response: Response) -> Result<UpstreamResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(UpstreamResponse { status, body })
    }

    /// Raw image response, left unread so callers can stream it.
    pub async fn emoji_image(&self, emoji_id: &str) -> Result<Response> {
        let id = utf8_percent_encode(emoji_id, NON_ALPHANUMERIC).to_string();
        let url = self.url(&format!("/api/v4/emoji/{id}/image"));
        Ok(self.authorize(self.http.get(url)).send().await?)
    }
}

#[derive(Deserialize)]
struct CurrentUser {
    #[serde(default)]
    id: String,
}

#[async_trait]
impl MattermostApi for MattermostClient {
    async fn current_user_id(&self) -> Result<String> {
        let response = self
            .authorize(self.http.get(self.url("/api/v4/users/me")))
            .send()
            .await?;
        let reply = Self::read(response).await?;
        if !reply.is_success() {
            return Err(Error::upstream("users/me", reply.status, reply.body));
        }
        let me: CurrentUser = serde_json::from_str(&reply.body)?;
        if me.id.is_empty() {
            return Err(Error::upstream(
                "users/me",
                reply.status,
                "response carried no user id",
            ));
        }
        Ok(me.id)
    }

    async fn emoji_page(
        &self,
        page: usize,
        per_page: usize,
        sorted: bool,
    ) -> Result<UpstreamResponse> {
        let mut url = self.url(&format!("/api/v4/emoji?page={page}&per_page={per_page}"));
        if sorted {
            url.push_str("&sort=name");
        }
        debug!(page, per_page, sorted, "fetching emoji page");
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::read(response).await
    }

    async fn add_reaction(&self, reaction: &NewReaction<'_>) -> Result<UpstreamResponse> {
        let response = self
            .authorize(self.http.post(self.url("/api/v4/reactions")))
            .json(reaction)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slashes() {
        assert_eq!(
            normalize_base_url(" https://chat.example.com// "),
            "https://chat.example.com"
        );
    }

    #[test]
    fn csrf_is_read_from_cookie_header() {
        assert_eq!(
            csrf_token("MMAUTHTOKEN=abc; MMCSRF=x%2By").as_deref(),
            Some("x+y")
        );
        assert_eq!(csrf_token("MMCSRF=first;MMUSERID=u").as_deref(), Some("first"));
        assert_eq!(csrf_token("MMAUTHTOKEN=abc"), None);
        assert_eq!(csrf_token("MMCSRF="), None);
    }

    #[test]
    fn credentials_prefer_session_cookie() {
        let creds = Credentials::from_parts(Some("MMAUTHTOKEN=a"), Some("pat")).unwrap();
        assert_eq!(creds, Credentials::SessionCookie("MMAUTHTOKEN=a".into()));
        let creds = Credentials::from_parts(Some("  "), Some("pat")).unwrap();
        assert_eq!(creds, Credentials::Token("pat".into()));
        assert!(matches!(
            Credentials::from_parts(None, Some("")),
            Err(Error::Config(_))
        ));
        assert!(!format!("{creds:?}").contains("pat"));
    }

    #[test]
    fn client_requires_base_url() {
        let creds = Credentials::Token("pat".into());
        assert!(matches!(
            MattermostClient::new("  / ", creds.clone()),
            Err(Error::Config(_))
        ));
        let client = MattermostClient::new("http://localhost:8065/", creds).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8065");
    }

    #[test]
    fn client_rejects_blank_credentials() {
        let blank = Credentials::SessionCookie(" ".into());
        let err = MattermostClient::new("http://localhost:8065", blank).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
