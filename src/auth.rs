use base64::engine::general_purpose;
use base64::Engine;
use hyper::header::HeaderValue;
use std::str::FromStr;

/// Challenge sent back in `Proxy-Authenticate` on a 407.
pub const PROXY_CHALLENGE: &str = "Basic";

/// Credentials HTTP clients must present to use the proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Compare a decoded `username:password` token without allocating
    fn matches(&self, decoded: &[u8]) -> bool {
        let user = self.username.as_bytes();
        let pass = self.password.as_bytes();

        decoded.len() == user.len() + 1 + pass.len()
            && decoded.starts_with(user)
            && decoded[user.len()] == b':'
            && &decoded[user.len() + 1..] == pass
    }
}

#[derive(Debug, thiserror::Error)]
#[error("credentials must take the username:password form")]
pub struct InvalidCredentials;

impl FromStr for Credentials {
    type Err = InvalidCredentials;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (username, password) = s.split_once(':').ok_or(InvalidCredentials)?;
        Ok(Self::new(username.to_owned(), password.to_owned()))
    }
}

/// Gate in front of the dispatcher.
///
/// With no credentials configured every request is let through. Otherwise the
/// request must carry `Proxy-Authorization: Basic <base64(username:password)>`
/// matching the configured pair exactly.
#[derive(Clone, Debug, Default)]
pub struct Authenticator {
    credentials: Option<Credentials>,
}

impl Authenticator {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Decide whether a request carrying `header` may proceed
    pub fn authorize(&self, header: Option<&HeaderValue>) -> bool {
        let Some(credentials) = &self.credentials else {
            return true;
        };

        let Some(value) = header.and_then(|h| h.to_str().ok()) else {
            return false;
        };

        let Some((scheme, token)) = value.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("Basic") {
            return false;
        }

        match general_purpose::STANDARD.decode(token.trim()) {
            Ok(decoded) => credentials.matches(&decoded),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).expect("valid header value")
    }

    fn basic(token: &str) -> HeaderValue {
        header(&format!("Basic {}", general_purpose::STANDARD.encode(token)))
    }

    fn gate() -> Authenticator {
        Authenticator::new(Some(Credentials::new("alice".into(), "s3cret".into())))
    }

    #[test]
    fn test_no_credentials_allows_everything() {
        let auth = Authenticator::default();
        assert!(!auth.is_enabled());
        assert!(auth.authorize(None));
        assert!(auth.authorize(Some(&header("Bearer abc"))));
        assert!(auth.authorize(Some(&basic("mallory:nope"))));
    }

    #[test]
    fn test_valid_basic_credentials_allowed() {
        assert!(gate().authorize(Some(&basic("alice:s3cret"))));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let value = format!("basic {}", general_purpose::STANDARD.encode("alice:s3cret"));
        assert!(gate().authorize(Some(&header(&value))));
    }

    #[test]
    fn test_missing_header_denied() {
        assert!(!gate().authorize(None));
    }

    #[test]
    fn test_other_scheme_denied() {
        let value = format!("Digest {}", general_purpose::STANDARD.encode("alice:s3cret"));
        assert!(!gate().authorize(Some(&header(&value))));
    }

    #[test]
    fn test_wrong_username_or_password_denied() {
        let auth = gate();
        assert!(!auth.authorize(Some(&basic("alice:wrong"))));
        assert!(!auth.authorize(Some(&basic("bob:s3cret"))));
        assert!(!auth.authorize(Some(&basic("alice:s3cret "))));
        assert!(!auth.authorize(Some(&basic("alices3cret"))));
    }

    #[test]
    fn test_malformed_token_denied() {
        let auth = gate();
        assert!(!auth.authorize(Some(&header("Basic !!!not-base64!!!"))));
        assert!(!auth.authorize(Some(&header("Basic"))));
    }

    #[test]
    fn test_credentials_parse() {
        let creds: Credentials = "user:pa:ss".parse().expect("should parse");
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pa:ss");

        assert!("no-colon".parse::<Credentials>().is_err());
    }

    #[test]
    fn test_password_with_colon_round_trips() {
        let auth = Authenticator::new(Some("user:pa:ss".parse().expect("should parse")));
        assert!(auth.authorize(Some(&basic("user:pa:ss"))));
        assert!(!auth.authorize(Some(&basic("user:pa"))));
    }
}
