use actix_cors_filter::CorsFilter;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("starting HTTP server at http://localhost:8080");

    HttpServer::new(move || {
        App::new()
            .wrap(
                CorsFilter::default()
                    // add specific origins to the allow list
                    .allowed_origins(["http://project.local:8080"])
                    // additionally allow any port on localhost, per request
                    .origin_validator(|origin| origin.starts_with("http://localhost"))
                    // set allowed methods list (replaces the defaults)
                    .allowed_methods(["GET", "POST"])
                    // add headers to the allowed request header list
                    .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                    // set list of headers that are safe to expose
                    .expose_headers([header::CONTENT_DISPOSITION])
                    // set preflight cache TTL
                    .max_age(600),
            )
            .wrap(Logger::default())
            .default_service(web::to(|| async { "Hello, cross-origin world!" }))
    })
    .workers(1)
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
}
