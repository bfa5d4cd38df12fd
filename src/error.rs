use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid input; raised before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {status} {body}")]
    Auth { status: u16, body: String },

    #[error("{context} failed: {status} {body}")]
    Upstream {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Classifies a non-2xx upstream reply; 401/403 count as bad credentials.
    pub fn upstream(context: &'static str, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Error::Auth { status, body },
            _ => Error::Upstream {
                context,
                status,
                body,
            },
        }
    }

    /// Upstream status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. } | Error::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_classifies_credential_failures() {
        assert!(matches!(
            Error::upstream("users/me", 401, "nope"),
            Error::Auth { status: 401, .. }
        ));
        assert!(matches!(
            Error::upstream("users/me", 403, ""),
            Error::Auth { status: 403, .. }
        ));
        let err = Error::upstream("emoji index", 500, "boom");
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "emoji index failed: 500 boom");
    }

    #[test]
    fn config_has_no_status() {
        assert_eq!(Error::config("missing base").status(), None);
    }
}
