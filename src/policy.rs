use std::{borrow::Cow, collections::HashSet, fmt, rc::Rc};

use actix_web::{
    dev::RequestHead,
    http::{
        header::{self, HeaderName, HeaderValue},
        Method, StatusCode,
    },
};
use once_cell::sync::Lazy;
use smallvec::SmallVec;

use crate::error::CorsError;

pub(crate) const WILDCARD: &str = "*";

/// Methods a preflight may request without an `Access-Control-Allow-Methods`
/// response header being emitted.
pub(crate) const DEFAULT_METHODS: [Method; 3] = [Method::GET, Method::HEAD, Method::POST];

/// Headers that are always permitted, regardless of configuration.
///
/// Requested header names in this set are skipped before the allow-list is
/// consulted and never echoed in `Access-Control-Allow-Headers`.
#[allow(clippy::mutable_key_type)]
pub(crate) static DEFAULT_ALLOWED_HEADERS: Lazy<HashSet<HeaderName>> = Lazy::new(|| {
    HashSet::from([
        header::ACCEPT,
        header::ACCEPT_LANGUAGE,
        header::CONTENT_LANGUAGE,
        header::ORIGIN,
    ])
});

/// Header names accepted during a preflight, in request order.
pub(crate) type AcceptedHeaders = SmallVec<[HeaderName; 8]>;

#[derive(Clone)]
pub(crate) struct OriginsFn {
    pub(crate) boxed_fn: Rc<dyn Fn(&RequestHead) -> Vec<String>>,
}

impl fmt::Debug for OriginsFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allowed_origins_fn")
    }
}

#[derive(Clone)]
pub(crate) struct HeadersFn {
    pub(crate) boxed_fn: Rc<dyn Fn(&RequestHead) -> Vec<HeaderName>>,
}

impl fmt::Debug for HeadersFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allowed_headers_fn")
    }
}

#[derive(Clone)]
pub(crate) struct OriginValidator {
    pub(crate) boxed_fn: Rc<dyn Fn(&str) -> bool>,
}

impl fmt::Debug for OriginValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin_validator")
    }
}

/// Immutable access-control policy shared, read-only, across all requests to
/// one wrapped service.
#[derive(Debug)]
pub(crate) struct Policy {
    pub(crate) allowed_methods: HashSet<Method>,

    #[allow(clippy::mutable_key_type)]
    pub(crate) allowed_headers: HashSet<HeaderName>,
    pub(crate) allowed_headers_fn: Option<HeadersFn>,

    /// Either `["*"]` or a duplicate-free list of literal origins; empty
    /// means unset.
    pub(crate) allowed_origins: Vec<String>,
    pub(crate) allowed_origins_fn: Option<OriginsFn>,
    pub(crate) origin_validator: Option<OriginValidator>,

    pub(crate) expose_headers_baked: Option<HeaderValue>,
    pub(crate) max_age: Option<usize>,
    pub(crate) ignore_preflight: bool,
    pub(crate) allow_credentials: bool,
    pub(crate) allow_default_origins: bool,
    pub(crate) default_return_origin: HeaderValue,
    pub(crate) preflight_status: StatusCode,
}

impl Policy {
    /// Resolves whether `origin` is admissible for this request.
    ///
    /// A configured validator is the sole authority for admission; otherwise
    /// the effective origin set decides, falling back to
    /// `allow_default_origins` when that set is empty.
    pub(crate) fn is_origin_allowed(&self, head: &RequestHead, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }

        if let Some(validator) = &self.origin_validator {
            return (validator.boxed_fn)(origin);
        }

        let allowed_origins = self.effective_origins(head);

        if allowed_origins.is_empty() {
            return self.allow_default_origins;
        }

        allowed_origins
            .iter()
            .any(|allowed| allowed == origin || allowed == WILDCARD)
    }

    /// Per-request origin set: the provider's output (wildcard-collapsed)
    /// when one is configured, else the static list.
    pub(crate) fn effective_origins(&self, head: &RequestHead) -> Cow<'_, [String]> {
        match &self.allowed_origins_fn {
            Some(origins_fn) => Cow::Owned(filter_origins((origins_fn.boxed_fn)(head))),
            None => Cow::Borrowed(self.allowed_origins.as_slice()),
        }
    }

    /// Union of the static allow-list and the per-request provider's output.
    #[allow(clippy::mutable_key_type)]
    pub(crate) fn effective_allowed_headers(
        &self,
        head: &RequestHead,
    ) -> Cow<'_, HashSet<HeaderName>> {
        match &self.allowed_headers_fn {
            Some(headers_fn) => {
                let mut headers = self.allowed_headers.clone();
                headers.extend((headers_fn.boxed_fn)(head));
                Cow::Owned(headers)
            }
            None => Cow::Borrowed(&self.allowed_headers),
        }
    }

    /// Extracts and validates the preflight's requested method.
    pub(crate) fn preflight_request_method(
        &self,
        head: &RequestHead,
    ) -> Result<Method, CorsError> {
        // a preflight without a requested method is malformed
        let request_method = head
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_METHOD)
            .ok_or(CorsError::MissingRequestMethod)?;

        let method = request_method
            .to_str()
            .ok()
            .and_then(|method| Method::try_from(method).ok())
            .ok_or(CorsError::BadRequestMethod)?;

        if self.allowed_methods.contains(&method) {
            Ok(method)
        } else {
            Err(CorsError::MethodNotAllowed)
        }
    }

    /// Validates the preflight's requested header list against the effective
    /// allow-list, failing on the first disallowed entry.
    ///
    /// Returns the accepted names in request order, with empty entries and
    /// the always-implicit defaults skipped.
    #[allow(clippy::mutable_key_type)]
    pub(crate) fn preflight_request_headers(
        &self,
        head: &RequestHead,
    ) -> Result<AcceptedHeaders, CorsError> {
        let mut accepted = AcceptedHeaders::new();

        // header format is a comma-separated list of header names
        let request_headers = match head
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .map(|hdr| hdr.to_str())
        {
            Some(Ok(headers)) => headers,
            Some(Err(_)) => return Err(CorsError::BadRequestHeaders),
            None => return Ok(accepted),
        };

        let allowed_headers = self.effective_allowed_headers(head);

        for name in request_headers.split(',') {
            let name = name.trim();

            if name.is_empty() {
                continue;
            }

            // HeaderName parsing doubles as canonicalization (lowercase)
            let name =
                HeaderName::try_from(name).map_err(|_| CorsError::BadRequestHeaders)?;

            if DEFAULT_ALLOWED_HEADERS.contains(&name) {
                continue;
            }

            if !allowed_headers.contains(&name) {
                return Err(CorsError::HeadersNotAllowed);
            }

            accepted.push(name);
        }

        Ok(accepted)
    }

    /// Headers emitted on every admissible request, preflight or not.
    pub(crate) fn shared_headers(
        &self,
        head: &RequestHead,
        origin: &HeaderValue,
    ) -> SmallVec<[(HeaderName, HeaderValue); 3]> {
        let mut headers = SmallVec::new();

        if self.allow_credentials {
            headers.push((
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            ));
        }

        let allowed_origins = self.effective_origins(head);

        // with more than one candidate origin the response depends on the
        // request, so caches must key on it
        if allowed_origins.len() > 1 {
            headers.push((header::VARY, HeaderValue::from_static("Origin")));
        }

        // Even with an explicit allow-list, the allow-origin header reflects
        // the requesting origin rather than a configured entry; echoing an
        // arbitrary list entry is unsafe and not required by any use case.
        let return_origin = if self.origin_validator.is_none() && allowed_origins.is_empty() {
            self.default_return_origin.clone()
        } else if allowed_origins.iter().any(|origin| origin == WILDCARD) {
            HeaderValue::from_static(WILDCARD)
        } else {
            origin.clone()
        };

        headers.push((header::ACCESS_CONTROL_ALLOW_ORIGIN, return_origin));

        headers
    }
}

/// Applies wildcard collapse and drops duplicate and empty entries,
/// preserving order.
pub(crate) fn filter_origins(origins: Vec<String>) -> Vec<String> {
    if origins.iter().any(|origin| origin == WILDCARD) {
        return vec![WILDCARD.to_owned()];
    }

    let mut filtered = Vec::with_capacity(origins.len());

    for origin in origins {
        if !origin.is_empty() && !filtered.contains(&origin) {
            filtered.push(origin);
        }
    }

    filtered
}

/// Creates a comma-separated header value from an iterator of header names.
///
/// Caller must ensure `names` is non-empty.
pub(crate) fn intersperse_header_values<'a, I>(names: I) -> HeaderValue
where
    I: IntoIterator<Item = &'a HeaderName>,
{
    let joined = names
        .into_iter()
        .fold(String::with_capacity(32), |mut acc, name| {
            acc.push_str(", ");
            acc.push_str(name.as_str());
            acc
        });

    // strip leading ", "; the result is a valid value since header names are
    joined[2..].try_into().unwrap()
}

#[cfg(test)]
mod test {
    use actix_web::{test::TestRequest, HttpRequest};

    use super::*;
    use crate::CorsFilter;

    fn req_with_origin(origin: &str) -> HttpRequest {
        TestRequest::default()
            .insert_header((header::ORIGIN, origin))
            .to_http_request()
    }

    fn policy(filter: CorsFilter) -> Rc<Policy> {
        filter.into_policy()
    }

    #[test]
    fn wildcard_collapse_and_dedupe() {
        assert_eq!(
            filter_origins(vec![
                "https://a.com".to_owned(),
                "*".to_owned(),
                "https://b.com".to_owned(),
            ]),
            vec!["*".to_owned()],
        );

        assert_eq!(
            filter_origins(vec![
                "https://a.com".to_owned(),
                "".to_owned(),
                "https://a.com".to_owned(),
                "https://b.com".to_owned(),
            ]),
            vec!["https://a.com".to_owned(), "https://b.com".to_owned()],
        );
    }

    #[test]
    fn empty_origin_is_never_admissible() {
        let policy = policy(CorsFilter::default());
        let req = req_with_origin("https://a.com");

        assert!(!policy.is_origin_allowed(req.head(), ""));
    }

    #[test]
    fn unset_origins_fall_back_to_default_admission() {
        let req = req_with_origin("https://a.com");

        let policy = self::policy(CorsFilter::default());
        assert!(policy.is_origin_allowed(req.head(), "https://a.com"));

        let policy = self::policy(CorsFilter::default().disallow_default_origins());
        assert!(!policy.is_origin_allowed(req.head(), "https://a.com"));
    }

    #[test]
    fn explicit_list_matches_literally() {
        let policy = policy(CorsFilter::default().allowed_origins(["https://a.com"]));
        let req = req_with_origin("https://a.com");

        assert!(policy.is_origin_allowed(req.head(), "https://a.com"));
        assert!(!policy.is_origin_allowed(req.head(), "https://b.com"));
        assert!(!policy.is_origin_allowed(req.head(), "https://a.com:8080"));
    }

    #[test]
    fn wildcard_list_admits_any_origin() {
        let policy = policy(CorsFilter::default().allowed_origins(["*"]));
        let req = req_with_origin("https://anywhere.test");

        assert!(policy.is_origin_allowed(req.head(), "https://anywhere.test"));
    }

    #[test]
    fn validator_bypasses_origin_list() {
        let policy = policy(
            CorsFilter::default()
                .allowed_origins(["https://a.com"])
                .origin_validator(|origin| origin.ends_with(".example.com")),
        );
        let req = req_with_origin("https://api.example.com");

        // in the list but rejected by the validator
        assert!(!policy.is_origin_allowed(req.head(), "https://a.com"));
        // not in the list but accepted by the validator
        assert!(policy.is_origin_allowed(req.head(), "https://api.example.com"));
    }

    #[test]
    fn origins_fn_replaces_static_list() {
        let policy = policy(
            CorsFilter::default()
                .allowed_origins(["https://a.com"])
                .allowed_origins_fn(|_head| vec!["https://b.com".to_owned()]),
        );
        let req = req_with_origin("https://b.com");

        assert!(!policy.is_origin_allowed(req.head(), "https://a.com"));
        assert!(policy.is_origin_allowed(req.head(), "https://b.com"));
    }

    #[test]
    fn origins_fn_output_is_wildcard_collapsed() {
        let policy = policy(CorsFilter::default().allowed_origins_fn(|_head| {
            vec!["https://a.com".to_owned(), "*".to_owned()]
        }));
        let req = req_with_origin("https://b.com");

        assert_eq!(
            policy.effective_origins(req.head()).as_ref(),
            ["*".to_owned()].as_slice(),
        );
        assert!(policy.is_origin_allowed(req.head(), "https://b.com"));
    }

    #[test]
    fn headers_fn_unions_with_static_list() {
        let policy = policy(
            CorsFilter::default()
                .allowed_header(HeaderName::from_static("x-static"))
                .allowed_headers_fn(|_head| vec![HeaderName::from_static("x-dynamic")]),
        );
        let req = req_with_origin("https://a.com");

        let headers = policy.effective_allowed_headers(req.head());
        assert!(headers.contains(&HeaderName::from_static("x-static")));
        assert!(headers.contains(&HeaderName::from_static("x-dynamic")));
    }

    #[test]
    fn return_origin_echoes_request_origin_for_explicit_lists() {
        let policy = policy(
            CorsFilter::default().allowed_origins(["https://a.com", "https://b.com"]),
        );
        let req = req_with_origin("https://a.com");
        let origin = HeaderValue::from_static("https://a.com");

        let headers = policy.shared_headers(req.head(), &origin);
        assert!(headers.contains(&(header::VARY, HeaderValue::from_static("Origin"))));
        assert!(headers.contains(&(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://a.com"),
        )));
    }

    #[test]
    fn return_origin_defaults_to_wildcard_when_unset() {
        let policy = policy(CorsFilter::default());
        let req = req_with_origin("https://a.com");
        let origin = HeaderValue::from_static("https://a.com");

        let headers = policy.shared_headers(req.head(), &origin);
        assert!(headers.contains(&(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        )));
        // a single (or empty) candidate set never varies by origin
        assert!(!headers.iter().any(|(name, _)| *name == header::VARY));
    }

    #[test]
    fn join_header_names() {
        let names = [
            HeaderName::from_static("x-one"),
            HeaderName::from_static("x-two"),
        ];

        assert_eq!(
            intersperse_header_values(&names),
            HeaderValue::from_static("x-one, x-two"),
        );
    }
}
