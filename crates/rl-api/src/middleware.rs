//! rapline/crates/rl-api/src/middleware.rs Middleware
//!
//! Access logging and cross-origin policy for the Rapline API.

use actix_cors::Cors;
use actix_web::middleware::Logger;

// Access log line:
// remote-ip "request-line" status-code response-size duration-secs
pub fn standard_middleware() -> Logger {
    Logger::new(r#"%a "%r" %s %b %Ts"#)
}

// The mobile client and the web player are served from other origins.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_header()
        .allowed_methods(vec!["GET", "POST"])
        .max_age(3600)
}
