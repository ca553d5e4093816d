//! Bearer-key authorization layer.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::AuthConfig;
use http::{HeaderValue, Request, Response, StatusCode, header};
use tower::Layer;

pub(crate) struct AuthLayer(Arc<AuthConfig>);

impl AuthLayer {
    pub fn new(config: AuthConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl Clone for AuthLayer {
    fn clone(&self) -> Self {
        AuthLayer(self.0.clone())
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            config: self.0.clone(),
        }
    }
}

pub(crate) struct AuthService<Service> {
    next: Service,
    config: Arc<AuthConfig>,
}

impl<Service: Clone> Clone for AuthService<Service> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            config: self.config.clone(),
        }
    }
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let authorized = gateway::extract_client_token(request.headers())
                .map(|token| config.accepts(&token))
                .unwrap_or(false);

            if authorized {
                return next.call(request).await;
            }

            log::debug!("Rejecting request without a valid client token");
            Ok(unauthorized_response())
        })
    }
}

fn unauthorized_response() -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "message": "Unauthorized",
            "type": "invalid_request_error",
            "code": "unauthorized",
        }
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));

    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::{Layer, Service, ServiceExt};

    use super::AuthLayer;

    fn layer(keys: &[&str]) -> AuthLayer {
        AuthLayer::new(config::AuthConfig {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
    }

    async fn status_for(layer: AuthLayer, request: Request<Body>) -> StatusCode {
        let inner = tower::service_fn(|_request: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(http::Response::new(Body::empty()))
        });

        let mut service = layer.layer(inner);
        let response = service.ready().await.unwrap().call(request).await.unwrap();

        response.status()
    }

    #[tokio::test]
    async fn accepts_known_bearer_tokens() {
        let request = Request::builder()
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();

        assert_eq!(status_for(layer(&["secret"]), request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn accepts_x_api_key_and_bare_authorization() {
        let request = Request::builder()
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_for(layer(&["secret"]), request).await, StatusCode::OK);

        let request = Request::builder()
            .header("authorization", "secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_for(layer(&["secret"]), request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_missing_and_unknown_tokens() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(status_for(layer(&["secret"]), request).await, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();

        let status = status_for(layer(&["secret"]), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
