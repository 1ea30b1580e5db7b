use reqwest::Method;
use url::Url;

/// Authorizes an outgoing SmugMug request.
///
/// Implementations may append query parameters to `url` and may return a
/// value for the `Authorization` header. OAuth 1.0a signers built by an
/// interactive handshake plug in here; the two provided implementations
/// cover key-only access and a header obtained elsewhere.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, method: &Method, url: &mut Url) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ApiKeySigner {
    api_key: String,
}

impl ApiKeySigner {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl RequestSigner for ApiKeySigner {
    fn sign(&self, _method: &Method, url: &mut Url) -> Option<String> {
        url.query_pairs_mut().append_pair("APIKey", &self.api_key);
        None
    }
}

#[derive(Debug, Clone)]
pub struct StaticAuthorization {
    value: String,
}

impl StaticAuthorization {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl RequestSigner for StaticAuthorization {
    fn sign(&self, _method: &Method, _url: &mut Url) -> Option<String> {
        Some(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_signer_appends_query_param() {
        let mut url = Url::parse("https://api.smugmug.com/api/v2!authuser?start=1").unwrap();
        let header = ApiKeySigner::new("k-123").sign(&Method::GET, &mut url);
        assert!(header.is_none());
        assert_eq!(url.query(), Some("start=1&APIKey=k-123"));
    }

    #[test]
    fn static_authorization_leaves_url_untouched() {
        let mut url = Url::parse("https://api.smugmug.com/api/v2!authuser").unwrap();
        let header = StaticAuthorization::new("OAuth abc").sign(&Method::GET, &mut url);
        assert_eq!(header.as_deref(), Some("OAuth abc"));
        assert_eq!(url.query(), None);
    }
}
