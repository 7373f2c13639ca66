//! # Auth Transport
//!
//! Adds the backend's two auth headers to requests bound for it:
//!
//! ```text
//! apikey: <anon key>
//! Authorization: Bearer <anon key>
//! ```
//!
//! Headers the caller already set are left alone, and requests to other
//! hosts (e.g. the SMS gateway) pass through untouched.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

use crate::config::BackendConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Layer, Request, Response, Transport};

const APIKEY_HEADER: &str = "apikey";

/// Injects backend credentials.
pub struct AuthTransport {
    inner: Arc<dyn Transport>,
    backend: Url,
    apikey: HeaderValue,
    bearer: HeaderValue,
}

impl AuthTransport {
    /// Wraps `inner`, or returns it unchanged if it already injects auth.
    pub fn wrap(inner: Arc<dyn Transport>, backend: &BackendConfig) -> SyncResult<Arc<dyn Transport>> {
        if inner.has_layer(Layer::Auth) {
            debug!("Transport already authenticated, not re-wrapping");
            return Ok(inner);
        }

        let backend_url = Url::parse(&backend.url)?;
        let apikey = HeaderValue::from_str(&backend.anon_key)
            .map_err(|e| SyncError::InvalidConfig(format!("anon_key: {}", e)))?;
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", backend.anon_key))
            .map_err(|e| SyncError::InvalidConfig(format!("anon_key: {}", e)))?;
        bearer.set_sensitive(true);

        Ok(Arc::new(AuthTransport {
            inner,
            backend: backend_url,
            apikey,
            bearer,
        }))
    }

    /// True if `target` lives under the backend base URL.
    fn targets_backend(&self, target: &str) -> bool {
        let Ok(url) = Url::parse(target) else {
            return false;
        };

        url.scheme() == self.backend.scheme()
            && url.host_str() == self.backend.host_str()
            && url.port_or_known_default() == self.backend.port_or_known_default()
            && url
                .path()
                .starts_with(self.backend.path().trim_end_matches('/'))
    }
}

#[async_trait]
impl Transport for AuthTransport {
    async fn send(&self, mut request: Request) -> SyncResult<Response> {
        if self.targets_backend(&request.url) {
            let apikey = HeaderName::from_static(APIKEY_HEADER);
            if !request.headers.contains_key(&apikey) {
                request.headers.insert(apikey, self.apikey.clone());
            }
            if !request.headers.contains_key(AUTHORIZATION) {
                request.headers.insert(AUTHORIZATION, self.bearer.clone());
            }
        } else {
            trace!(url = %request.url, "Not a backend request, no auth headers");
        }

        self.inner.send(request).await
    }

    fn layers(&self) -> Vec<Layer> {
        let mut layers = vec![Layer::Auth];
        layers.extend(self.inner.layers());
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use reqwest::StatusCode;

    fn backend() -> BackendConfig {
        BackendConfig {
            url: "https://backend.example.com".into(),
            anon_key: "anon-123".into(),
            disabled: false,
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_injects_both_headers_for_backend_requests() {
        let stub = ScriptedTransport::always(StatusCode::OK);
        let transport = AuthTransport::wrap(stub.clone(), &backend()).unwrap();

        transport
            .send(Request::get("https://backend.example.com/tables/orders"))
            .await
            .unwrap();

        let seen = stub.last_request().unwrap();
        assert_eq!(seen.header("apikey"), Some("anon-123"));
        assert_eq!(seen.header("authorization"), Some("Bearer anon-123"));
    }

    #[tokio::test]
    async fn test_never_overwrites_caller_headers() {
        let stub = ScriptedTransport::always(StatusCode::OK);
        let transport = AuthTransport::wrap(stub.clone(), &backend()).unwrap();

        let request = Request::get("https://backend.example.com/tables/orders")
            .with_header(HeaderName::from_static("apikey"), HeaderValue::from_static("caller-key"))
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer user-jwt"));
        transport.send(request).await.unwrap();

        let seen = stub.last_request().unwrap();
        assert_eq!(seen.header("apikey"), Some("caller-key"));
        assert_eq!(seen.header("authorization"), Some("Bearer user-jwt"));
        assert_eq!(seen.headers.get_all("apikey").iter().count(), 1);
    }

    #[tokio::test]
    async fn test_other_hosts_are_untouched() {
        let stub = ScriptedTransport::always(StatusCode::OK);
        let transport = AuthTransport::wrap(stub.clone(), &backend()).unwrap();

        transport
            .send(Request::get("https://backend.example.com.attacker.net/tables/orders"))
            .await
            .unwrap();
        transport
            .send(Request::get("https://sms.example.com/send"))
            .await
            .unwrap();

        for seen in stub.requests() {
            assert!(seen.header("apikey").is_none());
            assert!(seen.header("authorization").is_none());
        }
    }

    #[tokio::test]
    async fn test_wrapping_twice_is_a_no_op() {
        let stub = ScriptedTransport::always(StatusCode::OK);
        let once = AuthTransport::wrap(stub.clone(), &backend()).unwrap();
        let twice = AuthTransport::wrap(once.clone(), &backend()).unwrap();

        assert!(Arc::ptr_eq(&once, &twice));
        assert_eq!(twice.layers(), vec![Layer::Auth]);
    }
}
