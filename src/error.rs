use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use derive_more::derive::{Display, Error};

/// Errors that can occur when processing CORS guarded requests.
///
/// Each variant maps to the response status the filter terminates the request
/// with; CORS failures are terminal per request and are never retried.
#[derive(Debug, Clone, Display, Error)]
#[non_exhaustive]
pub enum CorsError {
    /// Request header `Access-Control-Request-Method` is required but is missing.
    #[display("Request header `Access-Control-Request-Method` is required but is missing")]
    MissingRequestMethod,

    /// Request header `Access-Control-Request-Method` has an invalid value.
    #[display("Request header `Access-Control-Request-Method` has an invalid value")]
    BadRequestMethod,

    /// Request header `Access-Control-Request-Headers` has an invalid value.
    #[display("Request header `Access-Control-Request-Headers` has an invalid value")]
    BadRequestHeaders,

    /// Origin is not allowed to make this request.
    #[display("Origin is not allowed to make this request")]
    OriginNotAllowed,

    /// Requested method is not allowed.
    #[display("Requested method is not allowed")]
    MethodNotAllowed,

    /// One or more request headers are not allowed.
    #[display("One or more request headers are not allowed")]
    HeadersNotAllowed,
}

impl ResponseError for CorsError {
    fn status_code(&self) -> StatusCode {
        match self {
            CorsError::MissingRequestMethod
            | CorsError::BadRequestMethod
            | CorsError::BadRequestHeaders => StatusCode::BAD_REQUEST,

            CorsError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            CorsError::OriginNotAllowed | CorsError::HeadersNotAllowed => {
                StatusCode::FORBIDDEN
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::with_body(self.status_code(), self.to_string()).map_into_boxed_body()
    }
}
