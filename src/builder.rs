use std::rc::Rc;

use actix_utils::future::{self, Ready};
use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{RequestHead, Service, ServiceRequest, ServiceResponse, Transform},
    error::HttpError,
    http::{
        header::{HeaderName, HeaderValue},
        Method, StatusCode,
    },
    Error,
};
use log::error;

use crate::{
    middleware::CorsFilterMiddleware,
    policy::{
        filter_origins, intersperse_header_values, HeadersFn, OriginValidator, OriginsFn,
        Policy, DEFAULT_ALLOWED_HEADERS, DEFAULT_METHODS,
    },
};

/// Upper bound (10 minutes) applied to `Access-Control-Max-Age`.
const MAX_AGE_CEILING: usize = 600;

/// Builder for a CORS filter wrapping one downstream service.
///
/// The policy is assembled by chaining the named setters below and becomes
/// immutable once the filter is passed to `App::wrap()` (or a sibling `wrap`
/// method). Invalid configuration arguments are collected and reported when
/// the middleware is constructed.
///
/// # Example
/// ```
/// use actix_cors_filter::CorsFilter;
/// use actix_web::http::header;
///
/// let cors = CorsFilter::default()
///     .allowed_origins(["https://www.rust-lang.org"])
///     .allowed_methods(["GET", "POST"])
///     .allowed_headers([header::AUTHORIZATION, header::ACCEPT])
///     .allowed_header(header::CONTENT_TYPE)
///     .max_age(600);
///
/// // `cors` can now be used in `App::wrap`.
/// ```
#[derive(Debug)]
pub struct CorsFilter {
    inner: Rc<Policy>,
    error: Option<HttpError>,
}

impl Default for CorsFilter {
    /// A filter with the default policy: methods `GET`, `HEAD` and `POST`;
    /// the always-implicit request headers; any origin admitted and answered
    /// with a wildcard allow-origin; preflights answered with `200 OK`.
    fn default() -> CorsFilter {
        CorsFilter {
            inner: Rc::new(Policy {
                allowed_methods: DEFAULT_METHODS.into_iter().collect(),
                allowed_headers: DEFAULT_ALLOWED_HEADERS.clone(),
                allowed_headers_fn: None,
                allowed_origins: Vec::new(),
                allowed_origins_fn: None,
                origin_validator: None,
                expose_headers_baked: None,
                max_age: None,
                ignore_preflight: false,
                allow_credentials: false,
                allow_default_origins: true,
                default_return_origin: HeaderValue::from_static("*"),
                preflight_status: StatusCode::OK,
            }),
            error: None,
        }
    }
}

impl CorsFilter {
    /// Sets the origins allowed to make cross-origin requests.
    ///
    /// This is a replacement operation. Origins are matched against the
    /// `Origin` request header literally and case-sensitively; passing the
    /// wildcard `"*"` anywhere in the list allows any origin. Duplicate and
    /// empty entries are dropped. An empty (or never set) list falls back to
    /// default-origin admission; see [`CorsFilter::disallow_default_origins`].
    pub fn allowed_origins<U, O>(mut self, origins: U) -> CorsFilter
    where
        U: IntoIterator<Item = O>,
        O: Into<String>,
    {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allowed_origins =
                filter_origins(origins.into_iter().map(Into::into).collect());
        }

        self
    }

    /// Determines the allowed origin set per request.
    ///
    /// The function receives the `RequestHead` of each request and fully
    /// replaces the static origin list configured with
    /// [`CorsFilter::allowed_origins`] for that request. Its output is
    /// subject to the same wildcard collapse rule.
    pub fn allowed_origins_fn<F>(mut self, f: F) -> CorsFilter
    where
        F: Fn(&RequestHead) -> Vec<String> + 'static,
    {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allowed_origins_fn = Some(OriginsFn {
                boxed_fn: Rc::new(f),
            });
        }

        self
    }

    /// Sets a predicate as the sole authority for origin admission.
    ///
    /// When configured, the predicate receives the raw `Origin` header value
    /// and its verdict bypasses the origin set entirely. The origin set is
    /// still consulted when computing the returned allow-origin value and the
    /// `Vary` header.
    pub fn origin_validator<F>(mut self, f: F) -> CorsFilter
    where
        F: Fn(&str) -> bool + 'static,
    {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.origin_validator = Some(OriginValidator {
                boxed_fn: Rc::new(f),
            });
        }

        self
    }

    /// Sets the methods a preflight may request.
    ///
    /// This is a replacement operation, so `GET`, `HEAD` and `POST` must be
    /// passed again if they should remain supported. Method matching is
    /// case-sensitive.
    ///
    /// Defaults to `[GET, HEAD, POST]`.
    pub fn allowed_methods<U, M>(mut self, methods: U) -> CorsFilter
    where
        U: IntoIterator<Item = M>,
        M: TryInto<Method>,
        <M as TryInto<Method>>::Error: Into<HttpError>,
    {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allowed_methods.clear();
        }

        for method in methods {
            match method.try_into() {
                Ok(method) => {
                    if let Some(policy) = Rc::get_mut(&mut self.inner) {
                        policy.allowed_methods.insert(method);
                    }
                }

                Err(err) => {
                    self.error = Some(err.into());
                    break;
                }
            }
        }

        self
    }

    /// Adds an allowed request header.
    ///
    /// See [`CorsFilter::allowed_headers`] for details.
    pub fn allowed_header<H>(mut self, header: H) -> CorsFilter
    where
        H: TryInto<HeaderName>,
        <H as TryInto<HeaderName>>::Error: Into<HttpError>,
    {
        match header.try_into() {
            Ok(header) => {
                if let Some(policy) = Rc::get_mut(&mut self.inner) {
                    policy.allowed_headers.insert(header);
                }
            }

            Err(err) => self.error = Some(err.into()),
        }

        self
    }

    /// Adds to the list of request headers a preflight may carry.
    ///
    /// This is an append operation, so the headers `Accept`,
    /// `Accept-Language`, `Content-Language` and `Origin` are always allowed.
    /// `Content-Type` must be declared explicitly when accepting content
    /// types other than the form-safelisted ones.
    pub fn allowed_headers<U, H>(mut self, headers: U) -> CorsFilter
    where
        U: IntoIterator<Item = H>,
        H: TryInto<HeaderName>,
        <H as TryInto<HeaderName>>::Error: Into<HttpError>,
    {
        for header in headers {
            match header.try_into() {
                Ok(header) => {
                    if let Some(policy) = Rc::get_mut(&mut self.inner) {
                        policy.allowed_headers.insert(header);
                    }
                }

                Err(err) => {
                    self.error = Some(err.into());
                    break;
                }
            }
        }

        self
    }

    /// Appends allowed request headers per request.
    ///
    /// The function's output is unioned with the static allow-list configured
    /// with [`CorsFilter::allowed_headers`] for that request only.
    pub fn allowed_headers_fn<F>(mut self, f: F) -> CorsFilter
    where
        F: Fn(&RequestHead) -> Vec<HeaderName> + 'static,
    {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allowed_headers_fn = Some(HeadersFn {
                boxed_fn: Rc::new(f),
            });
        }

        self
    }

    /// Sets the headers which are safe to expose to cross-origin script.
    ///
    /// This is a replacement operation and corresponds to the
    /// `Access-Control-Expose-Headers` header emitted on non-preflight
    /// responses. Defaults to an empty set.
    pub fn expose_headers<U, H>(mut self, headers: U) -> CorsFilter
    where
        U: IntoIterator<Item = H>,
        H: TryInto<HeaderName>,
        <H as TryInto<HeaderName>>::Error: Into<HttpError>,
    {
        let mut list = Vec::new();

        for header in headers {
            match header.try_into() {
                Ok(header) => {
                    if !list.contains(&header) {
                        list.push(header);
                    }
                }

                Err(err) => {
                    self.error = Some(err.into());
                    return self;
                }
            }
        }

        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.expose_headers_baked = if list.is_empty() {
                None
            } else {
                Some(intersperse_header_values(&list))
            };
        }

        self
    }

    /// Sets the maximum time (in seconds) a preflight response may be cached.
    ///
    /// Values above 600 seconds (10 minutes) are clamped to 600; `0`
    /// suppresses the `Access-Control-Max-Age` header entirely, which is the
    /// default.
    pub fn max_age(mut self, secs: usize) -> CorsFilter {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.max_age = match secs {
                0 => None,
                secs => Some(secs.min(MAX_AGE_CEILING)),
            };
        }

        self
    }

    /// Sets the status code returned for successful preflight responses.
    ///
    /// Defaults to `200 OK`; `204 No Content` is a common alternative.
    pub fn preflight_status_code(mut self, status: StatusCode) -> CorsFilter {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.preflight_status = status;
        }

        self
    }

    /// Causes the filter to pass `OPTIONS` requests through to the wrapped
    /// service, bypassing all CORS logic.
    ///
    /// Useful when the application has a pre-existing mechanism for
    /// responding to `OPTIONS` requests.
    pub fn ignore_preflight(mut self) -> CorsFilter {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.ignore_preflight = true;
        }

        self
    }

    /// Allows user agents to pass credentials along with cross-origin
    /// requests.
    ///
    /// When set, the `Access-Control-Allow-Credentials: true` header is
    /// emitted on all admissible responses.
    pub fn allow_credentials(mut self) -> CorsFilter {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allow_credentials = true;
        }

        self
    }

    /// Rejects requests whose origin is not explicitly configured.
    ///
    /// By default, when no origin list, provider function or validator is
    /// configured, every request carrying a non-empty `Origin` header is
    /// admissible and answered with a wildcard allow-origin. This setter
    /// turns that fallback off.
    pub fn disallow_default_origins(mut self) -> CorsFilter {
        if let Some(policy) = Rc::get_mut(&mut self.inner) {
            policy.allow_default_origins = false;
        }

        self
    }

    #[cfg(test)]
    pub(crate) fn into_policy(self) -> Rc<Policy> {
        self.inner
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsFilter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsFilterMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        if let Some(err) = &self.error {
            error!("invalid CORS filter configuration: {}", err);
            return future::err(());
        }

        future::ok(CorsFilterMiddleware {
            service,
            inner: Rc::clone(&self.inner),
        })
    }
}

#[cfg(test)]
mod test {
    use actix_web::http::header;

    use super::*;

    #[test]
    fn max_age_is_clamped() {
        let filter = CorsFilter::default().max_age(9999);
        assert_eq!(filter.inner.max_age, Some(600));

        let filter = CorsFilter::default().max_age(120);
        assert_eq!(filter.inner.max_age, Some(120));

        let filter = CorsFilter::default().max_age(0);
        assert_eq!(filter.inner.max_age, None);
    }

    #[test]
    fn wildcard_collapses_origin_list() {
        let filter =
            CorsFilter::default().allowed_origins(["https://a.com", "*", "https://b.com"]);
        assert_eq!(filter.inner.allowed_origins, ["*".to_owned()]);
    }

    #[test]
    fn allowed_methods_replace_defaults() {
        let filter = CorsFilter::default().allowed_methods([Method::DELETE]);

        assert!(filter.inner.allowed_methods.contains(&Method::DELETE));
        assert!(!filter.inner.allowed_methods.contains(&Method::GET));
    }

    #[test]
    fn expose_headers_are_baked() {
        let filter = CorsFilter::default().expose_headers([header::CONTENT_DISPOSITION]);

        assert_eq!(
            filter.inner.expose_headers_baked,
            Some(header::HeaderValue::from_static("content-disposition")),
        );
    }

    #[actix_web::test]
    async fn invalid_header_name_fails_construction() {
        let result = CorsFilter::default()
            .allowed_headers(["bad header name"])
            .new_transform(actix_web::test::ok_service())
            .await;

        assert!(result.is_err());
    }

    #[actix_web::test]
    async fn valid_configuration_constructs() {
        let result = CorsFilter::default()
            .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .new_transform(actix_web::test::ok_service())
            .await;

        assert!(result.is_ok());
    }
}
