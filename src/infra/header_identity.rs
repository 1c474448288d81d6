use crate::app::ports::IdentityPort;
use axum::http::{HeaderMap, HeaderName};

/// Reads the user id an upstream auth proxy forwards in a request header.
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl IdentityPort for HeaderIdentity {
    fn user_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_reads_trimmed_user_id() {
        let identity = HeaderIdentity::new(HeaderName::from_static("x-user-id"));
        let mut headers = HeaderMap::new();
        assert_eq!(identity.user_id(&headers), None);

        headers.insert("x-user-id", HeaderValue::from_static("   "));
        assert_eq!(identity.user_id(&headers), None);

        headers.insert("x-user-id", HeaderValue::from_static(" user-42 "));
        assert_eq!(identity.user_id(&headers).as_deref(), Some("user-42"));
    }
}
