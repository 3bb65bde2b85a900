//! Policy-driven Cross-Origin Resource Sharing (CORS) filter for Actix Web.
//!
//! The filter wraps exactly one downstream service and decides, per request,
//! whether the request's origin is permitted by an immutable [`CorsFilter`]
//! policy. Preflight (`OPTIONS`) requests are answered directly without
//! invoking the wrapped service; all other admissible requests are forwarded
//! and their responses annotated with the appropriate CORS headers.
//!
//! Once built, a [`CorsFilter`] can be used as an argument for Actix Web's
//! `App::wrap()`, `Scope::wrap()`, or `Resource::wrap()` methods.
//!
//! # Example
//! ```no_run
//! use actix_cors_filter::CorsFilter;
//! use actix_web::{get, http::header, App, HttpServer};
//!
//! #[get("/index.html")]
//! async fn index() -> &'static str {
//!     "<p>Hello World!</p>"
//! }
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     HttpServer::new(|| {
//!         let cors = CorsFilter::default()
//!             .allowed_origins(["https://www.rust-lang.org"])
//!             .allowed_methods(["GET", "POST"])
//!             .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
//!             .max_age(600);
//!
//!         App::new().wrap(cors).service(index)
//!     })
//!     .bind(("127.0.0.1", 8080))?
//!     .run()
//!     .await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(future_incompatible, missing_docs, missing_debug_implementations)]

mod builder;
mod error;
mod middleware;
mod policy;

pub use crate::{builder::CorsFilter, error::CorsError, middleware::CorsFilterMiddleware};
