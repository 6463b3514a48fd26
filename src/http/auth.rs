//! HTTP authentication challenges and credentials.
//!
//! Only Basic is implemented. Digest and NTLM challenges are recognized so
//! they can be reported, but are never answered.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// An authentication scheme named in a `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
}

impl AuthScheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Digest => "Digest",
            Self::Ntlm => "NTLM",
        }
    }

    /// Whether this client can answer the scheme.
    #[must_use]
    pub fn is_supported(self) -> bool {
        self == Self::Basic
    }

    fn from_challenge(challenge: &str) -> Option<Self> {
        let name = challenge
            .trim_start()
            .split(|c: char| c.is_ascii_whitespace() || c == ',')
            .next()?;
        [Self::Basic, Self::Digest, Self::Ntlm]
            .into_iter()
            .find(|scheme| scheme.as_str().eq_ignore_ascii_case(name))
    }
}

/// Picks the scheme to answer from all `WWW-Authenticate` values.
///
/// A supported scheme wins over unsupported ones; otherwise the first
/// recognized scheme is returned so the caller can say what was asked for.
#[must_use]
pub fn select_scheme<'a>(challenges: impl IntoIterator<Item = &'a str>) -> Option<AuthScheme> {
    let mut first = None;
    for challenge in challenges {
        if let Some(scheme) = AuthScheme::from_challenge(challenge) {
            if scheme.is_supported() {
                return Some(scheme);
            }
            first.get_or_insert(scheme);
        }
    }
    first
}

/// The `Authorization` value for Basic credentials.
#[must_use]
pub fn basic_authorization(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}
