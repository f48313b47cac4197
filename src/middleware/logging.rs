use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    http::StatusCode,
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_CLIENT_ID_LEN: usize = 128;

/// Logs each request with a request id, echoed back in `x-request-id`.
///
/// A client-supplied id is reused so calls can be correlated across services.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

/// What every log line for one request carries.
struct RequestContext {
    id: String,
    method: String,
    uri: String,
    peer: String,
    started: Instant,
}

impl RequestContext {
    fn capture(req: &ServiceRequest) -> Self {
        let id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= MAX_CLIENT_ID_LEN)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            id,
            method: req.method().to_string(),
            uri: req.uri().to_string(),
            peer: req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string(),
            started: Instant::now(),
        }
    }

    fn finished(&self, status: StatusCode) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            warn!(
                request_id = %self.id,
                method = %self.method,
                uri = %self.uri,
                status = status.as_u16(),
                elapsed_ms,
                "Request finished with server error"
            );
        } else {
            info!(
                request_id = %self.id,
                method = %self.method,
                uri = %self.uri,
                status = status.as_u16(),
                elapsed_ms,
                "Request finished"
            );
        }
    }

    fn failed(&self, err: &Error) {
        error!(
            request_id = %self.id,
            method = %self.method,
            uri = %self.uri,
            peer = %self.peer,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            error = %err,
            "Request failed before a response was produced"
        );
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ctx = RequestContext::capture(&req);
        debug!(request_id = %ctx.id, method = %ctx.method, uri = %ctx.uri, peer = %ctx.peer, "Request received");

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut response = fut.await.map_err(|err| {
                ctx.failed(&err);
                err
            })?;
            ctx.finished(response.status());

            if let Ok(value) = HeaderValue::from_str(&ctx.id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(response)
        })
    }
}
