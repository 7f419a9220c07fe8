use thiserror::Error;

/// Why the identity service rejected a sign-in attempt.
///
/// The backend reports rejection causes as upper-snake-case codes in the
/// error body. Codes without a dedicated variant are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidPassword,
    EmailNotFound,
    InvalidEmail,
    UserDisabled,
    TooManyAttempts,
    Other(String),
}

impl RejectionReason {
    pub(crate) fn from_backend_code(code: &str) -> Self {
        // Newer identity backends collapse password and email errors into
        // INVALID_LOGIN_CREDENTIALS; treat it as a bad password.
        match code {
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => RejectionReason::InvalidPassword,
            "EMAIL_NOT_FOUND" => RejectionReason::EmailNotFound,
            "INVALID_EMAIL" => RejectionReason::InvalidEmail,
            "USER_DISABLED" => RejectionReason::UserDisabled,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => RejectionReason::TooManyAttempts,
            other => RejectionReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::InvalidPassword => write!(f, "invalid password"),
            RejectionReason::EmailNotFound => write!(f, "no account exists for this email"),
            RejectionReason::InvalidEmail => write!(f, "malformed email address"),
            RejectionReason::UserDisabled => write!(f, "account is disabled"),
            RejectionReason::TooManyAttempts => write!(f, "too many attempts, try again later"),
            RejectionReason::Other(code) => write!(f, "{}", code),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Sign-in rejected: {0}")]
    InvalidCredentials(RejectionReason),

    #[error("Not authenticated - log in or restore a session first")]
    Unauthenticated,

    #[error("Authentication service unavailable: {0}")]
    AuthServiceUnavailable(String),

    #[error("API error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Malformed document from {endpoint}: missing or mistyped field '{field}'")]
    Decode { endpoint: String, field: String },

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Maximum length for response bodies carried inside error values.
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl Error {
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        // Back up to a char boundary; byte 500 may fall inside a
        // multibyte character.
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        )
    }

    pub(crate) fn api(status: reqwest::StatusCode, body: &str) -> Self {
        Error::Api {
            status,
            body: Self::truncate_body(body),
        }
    }

    pub(crate) fn decode(endpoint: impl Into<String>, field: impl Into<String>) -> Self {
        Error::Decode {
            endpoint: endpoint.into(),
            field: field.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
