use std::rc::Rc;

use actix_utils::future::ok;
use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse},
    http::{
        header::{self, HeaderValue},
        Method,
    },
    Error, HttpResponse,
};
use futures_util::future::{FutureExt as _, LocalBoxFuture};
use log::debug;

use crate::{
    error::CorsError,
    policy::{intersperse_header_values, Policy, DEFAULT_METHODS},
};

/// Service wrapper applying the configured CORS policy to each request.
///
/// Preflight requests are answered directly; all other admissible requests
/// are forwarded to the wrapped service and their responses annotated.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct CorsFilterMiddleware<S> {
    pub(crate) service: S,
    pub(crate) inner: Rc<Policy>,
}

impl<S> CorsFilterMiddleware<S> {
    fn handle_preflight(inner: &Policy, origin: &HeaderValue, req: ServiceRequest) -> ServiceResponse {
        let request_method = match inner.preflight_request_method(req.head()) {
            Ok(method) => method,
            Err(err) => {
                debug!("preflight request was rejected: {}", err);
                return req.error_response(err);
            }
        };

        let accepted_headers = match inner.preflight_request_headers(req.head()) {
            Ok(headers) => headers,
            Err(err) => {
                debug!("preflight request was rejected: {}", err);
                return req.error_response(err);
            }
        };

        let mut res = HttpResponse::build(inner.preflight_status);

        if !accepted_headers.is_empty() {
            res.insert_header((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                intersperse_header_values(&accepted_headers),
            ));
        }

        if let Some(max_age) = inner.max_age {
            res.insert_header((header::ACCESS_CONTROL_MAX_AGE, max_age.to_string()));
        }

        // mirror the requested method only; the always-implicit defaults
        // need no announcement
        if !DEFAULT_METHODS.contains(&request_method) {
            res.insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, request_method.as_str()));
        }

        let mut res = res.finish();

        for (name, value) in inner.shared_headers(req.head(), origin) {
            res.headers_mut().insert(name, value);
        }

        req.into_response(res)
    }

    fn augment_response<B>(
        inner: &Policy,
        origin: &HeaderValue,
        mut res: ServiceResponse<B>,
    ) -> ServiceResponse<B> {
        let shared = inner.shared_headers(res.request().head(), origin);

        let headers = res.headers_mut();

        if let Some(expose) = &inner.expose_headers_baked {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }

        for (name, value) in shared {
            headers.insert(name, value);
        }

        res
    }
}

impl<S, B> Service<ServiceRequest> for CorsFilterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // keep the origin header only when it admits the request
        let origin = match req.headers().get(header::ORIGIN) {
            Some(hdr) => match hdr.to_str() {
                Ok(origin)
                    if !origin.is_empty()
                        && self.inner.is_origin_allowed(req.head(), origin) =>
                {
                    Some(hdr.clone())
                }
                _ => None,
            },
            None => None,
        };

        match origin {
            None => {
                if req.method() != Method::OPTIONS || self.inner.ignore_preflight {
                    // forward unchanged; inadmissible requests get no CORS headers
                    let fut = self.service.call(req);

                    async move { fut.await.map(|res| res.map_into_left_body()) }.boxed_local()
                } else {
                    debug!("preflight origin is not allowed; request is terminated");

                    ok(req
                        .error_response(CorsError::OriginNotAllowed)
                        .map_into_right_body())
                    .boxed_local()
                }
            }

            Some(origin) if req.method() == Method::OPTIONS => {
                if self.inner.ignore_preflight {
                    let fut = self.service.call(req);

                    async move { fut.await.map(|res| res.map_into_left_body()) }.boxed_local()
                } else {
                    let res = Self::handle_preflight(&self.inner, &origin, req);

                    ok(res.map_into_right_body()).boxed_local()
                }
            }

            Some(origin) => {
                let inner = Rc::clone(&self.inner);
                let fut = self.service.call(req);

                async move {
                    let res = fut.await?;

                    Ok(Self::augment_response(&inner, &origin, res).map_into_left_body())
                }
                .boxed_local()
            }
        }
    }
}
