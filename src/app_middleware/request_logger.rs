use super::correlation_id::CorrelationId;
use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::time::Instant;

pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware { service }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
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
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let query = req.query_string().to_string();

        let correlation_id =
            req.extensions().get::<CorrelationId>().map(|c| c.0.clone()).unwrap_or_else(|| "unknown".to_string());

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis();

            match &result {
                Ok(res) => {
                    let status = res.status().as_u16();
                    if status >= 500 {
                        tracing::error!(request_id = %correlation_id, method = %method, path = %path, query = %query, status, duration_ms, "request completed with server error");
                    } else if status >= 400 {
                        tracing::warn!(request_id = %correlation_id, method = %method, path = %path, query = %query, status, duration_ms, "request completed with client error");
                    } else {
                        tracing::info!(request_id = %correlation_id, method = %method, path = %path, query = %query, status, duration_ms, "request completed");
                    }
                }
                Err(err) => {
                    tracing::error!(request_id = %correlation_id, method = %method, path = %path, query = %query, error = %err, duration_ms, "request failed with error");
                }
            }

            result
        })
    }
}
