//! # rl-api
//!
//! The web routing and orchestration layer for Rapline.

pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::web;

pub use error::ApiError;
pub use handlers::AppState;

/// Configures the routes and extractor behaviour.
///
/// # Developer Note
/// Body and query decoding failures are rerouted through `ApiError` so they
/// carry the same JSON error payload as every other failure. The client has
/// never sent a JSON content type, so it is not required.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .content_type_required(false)
            .error_handler(|err, _req| error::bad_input(err).into()),
    )
    .app_data(
        web::QueryConfig::default().error_handler(|err, _req| error::bad_input(err).into()),
    )
    .service(
        web::resource("/user")
            .route(web::post().to(handlers::register_user))
            .route(web::get().to(handlers::get_user)),
    )
    .route("/login", web::post().to(handlers::login))
    .service(
        web::resource("/posts")
            .route(web::post().to(handlers::create_post))
            .route(web::get().to(handlers::list_posts)),
    )
    .service(
        web::resource("/comments")
            .route(web::post().to(handlers::create_comment))
            .route(web::get().to(handlers::list_comments)),
    )
    .route("/lreply", web::post().to(handlers::upload_reply));
}
