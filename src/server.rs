//! Loopback token service answering `rpc_token_call` requests.
//!
//! It accepts the same JSON body the op sends and acknowledges it, which is
//! enough for local smoke runs of graphs that contain remote calls.

use crate::io_struct::{TokenCallRequest, TokenCallResponse};
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use serde_json::json;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default)]
pub struct ServiceState {
    pub calls: AtomicU64,
    pub tokens: AtomicU64,
}

#[get("/health")]
pub async fn health(_req: HttpRequest, _: web::Data<ServiceState>) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/generate")]
pub async fn generate(
    _req: HttpRequest,
    req: web::Json<TokenCallRequest>,
    state: web::Data<ServiceState>,
) -> Result<HttpResponse, actix_web::Error> {
    let req = req.into_inner();
    req.validate()?;
    let num_tokens = req.token_count();
    state.calls.fetch_add(1, Ordering::Relaxed);
    state.tokens.fetch_add(num_tokens as u64, Ordering::Relaxed);
    log::debug!("Accepted token call with {} tokens", num_tokens);
    Ok(HttpResponse::Ok().json(TokenCallResponse {
        accepted: true,
        num_tokens,
        echo: serde_json::to_value(&req)?,
    }))
}

#[get("/stats")]
pub async fn stats(_req: HttpRequest, state: web::Data<ServiceState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "calls": state.calls.load(Ordering::Relaxed),
        "tokens": state.tokens.load(Ordering::Relaxed),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(generate).service(stats);
}

/// Serves on an already bound listener until the server stops.
pub async fn serve(listener: TcpListener, state: web::Data<ServiceState>) -> std::io::Result<()> {
    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .listen(listener)?
    .run()
    .await
}

pub async fn startup(config: TokenServiceConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    log::info!("Starting token service at {}", listener.local_addr()?);
    serve(listener, web::Data::new(ServiceState::default())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    #[actix_web::test]
    async fn test_generate_acknowledges_ids() {
        let state = web::Data::new(ServiceState::default());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_json(json!({"input_ids": [3, 7]}))
            .to_request();
        let resp: TokenCallResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.accepted);
        assert_eq!(resp.num_tokens, 2);
        assert_eq!(resp.echo, json!({"input_ids": [3, 7]}));
        assert_eq!(state.calls.load(Ordering::Relaxed), 1);
    }

    #[actix_web::test]
    async fn test_generate_rejects_ambiguous_body() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ServiceState::default()))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_json(json!({"input_ids": [1], "text": "a"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ServiceState::default()))
                .configure(configure),
        )
        .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }
}
