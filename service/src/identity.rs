//! HTTP client for the identity service.
//!
//! Buyers are fetched from `GET {base_url}/users/{id}`. A `404` means the
//! buyer does not exist; any other non-success status is an outage. The id
//! is always sent as one percent-encoded path segment.

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use ticketsync_core::directory::{Buyer, BuyerDirectory, DirectoryError};
use ticketsync_core::ticket::BuyerId;

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(alias = "username", alias = "full_name")]
    name: String,
    email: String,
}

/// [`BuyerDirectory`] backed by the identity service.
#[derive(Clone, Debug)]
pub struct HttpBuyerDirectory {
    http_client: Client,
    base_url: Url,
}

impl HttpBuyerDirectory {
    /// Create a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] if `base_url` is not an
    /// absolute http(s) URL or the HTTP client cannot be built (for example
    /// when no TLS backend is available).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            DirectoryError::Unavailable(format!("Invalid identity service URL {base_url}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Unavailable(format!(
                "Identity service URL {base_url} cannot carry a path"
            )));
        }
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http_client, base_url))
    }

    /// Use an existing client.
    #[must_use]
    pub const fn with_client(http_client: Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    /// URL of one buyer record.
    #[must_use]
    pub fn user_url(&self, id: &BuyerId) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so there are always segments
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["users", id.as_str()]);
        }
        url
    }

    async fn fetch(&self, id: &BuyerId) -> Result<Option<Buyer>, DirectoryError> {
        let response = self
            .http_client
            .get(self.user_url(id))
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(DirectoryError::Unavailable(format!(
                    "identity service returned {status}"
                )));
            },
            _ => {},
        }

        let record: UserRecord = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;

        Ok(Some(Buyer {
            id: id.clone(),
            name: record.name,
            email: record.email,
        }))
    }
}

impl BuyerDirectory for HttpBuyerDirectory {
    fn lookup(
        &self,
        id: &BuyerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Buyer>, DirectoryError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            let result = self.fetch(&id).await;
            if let Err(e) = &result {
                tracing::warn!(buyer_id = %id, error = %e, "Buyer lookup failed");
            }
            result
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn user(Path(id): Path<String>) -> Response {
        match id.as_str() {
            "u1" => axum::Json(json!({"id": "u1", "username": "Ada", "email": "ada@example.com"}))
                .into_response(),
            "broken" => (HttpStatus::OK, "not json").into_response(),
            "down" => HttpStatus::SERVICE_UNAVAILABLE.into_response(),
            "u2" => axum::Json(json!({"name": "Grace", "email": "grace@example.com"}))
                .into_response(),
            other if other.contains("u2") => {
                axum::Json(json!({"name": other, "email": "other@example.com"})).into_response()
            },
            _ => HttpStatus::NOT_FOUND.into_response(),
        }
    }

    async fn identity_service() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/users/:id", get(user));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn directory(base_url: &str) -> HttpBuyerDirectory {
        HttpBuyerDirectory::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_has_no_double_slash() {
        let directory = directory("http://identity:8001/");
        assert_eq!(
            directory.user_url(&BuyerId::new("u1")).as_str(),
            "http://identity:8001/users/u1"
        );
        let nested = self::directory("http://gw/identity");
        assert_eq!(
            nested.user_url(&BuyerId::new("u1")).as_str(),
            "http://gw/identity/users/u1"
        );
    }

    #[test]
    fn buyer_id_stays_one_segment() {
        let directory = directory("http://identity:8001");
        let url = |id: &str| directory.user_url(&BuyerId::new(id)).to_string();
        assert_eq!(url("u2#x"), "http://identity:8001/users/u2%23x");
        assert_eq!(url("u2?a=1"), "http://identity:8001/users/u2%3Fa=1");
        assert_eq!(url("../admin/u2"), "http://identity:8001/users/..%2Fadmin%2Fu2");
    }

    #[test]
    fn relative_base_url_is_refused() {
        assert!(matches!(
            HttpBuyerDirectory::new("identity:8001", Duration::from_secs(1)),
            Err(DirectoryError::Unavailable(_))
        ));
        assert!(matches!(
            HttpBuyerDirectory::new("/users", Duration::from_secs(1)),
            Err(DirectoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn special_characters_do_not_reach_another_buyer() {
        let directory = directory(&identity_service().await);
        for id in ["u2#x", "u2?a=1", "../admin/u2"] {
            let buyer = directory.lookup(&BuyerId::new(id)).await.unwrap().unwrap();
            assert_eq!(buyer.name, id);
            assert_ne!(buyer.email, "grace@example.com");
        }
    }

    #[tokio::test]
    async fn known_buyer_is_returned() {
        let directory = directory(&identity_service().await);
        let buyer = directory.lookup(&BuyerId::new("u1")).await.unwrap().unwrap();
        assert_eq!(buyer.name, "Ada");
        assert_eq!(buyer.email, "ada@example.com");
    }

    #[tokio::test]
    async fn missing_buyer_is_none() {
        let directory = directory(&identity_service().await);
        assert_eq!(directory.lookup(&BuyerId::new("ghost")).await, Ok(None));
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let directory = directory(&identity_service().await);
        assert!(matches!(
            directory.lookup(&BuyerId::new("down")).await,
            Err(DirectoryError::Unavailable(_))
        ));
        assert!(matches!(
            directory.lookup(&BuyerId::new("broken")).await,
            Err(DirectoryError::InvalidResponse(_))
        ));
    }
}
