use crate::engine::GatewayEngine;
use crate::errors::ApiError;
use crate::types::{ChatRequest, RequestContext};
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(post_chat_completion)
        .service(get_liveness)
        .service(get_upstream_health)
        .service(get_stats);
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn request_context(req: &HttpRequest) -> RequestContext {
    let request_id =
        header(req, "x-request-id").unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let user_id = header(req, "x-user-id");
    let client_id = user_id
        .clone()
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into());
    RequestContext {
        request_id,
        client_id,
        user_id,
        tier_override: header(req, "x-user-tier"),
        forced_engine: header(req, "x-engine"),
    }
}

#[post("/api/chat/completion")]
async fn post_chat_completion(
    engine: web::Data<Arc<GatewayEngine>>,
    payload: web::Json<ChatRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let ctx = request_context(&req);
    let chat = payload.into_inner();
    if chat.message.trim().is_empty() {
        return Err(ApiError::with_request_id(
            crate::errors::GatewayError::InvalidRequest("message must not be empty".into()),
            ctx.request_id,
        ));
    }

    let reply = engine
        .complete(&ctx, &chat)
        .await
        .map_err(|err| ApiError::with_request_id(err, ctx.request_id.clone()))?;

    let mut response = HttpResponse::Ok();
    response.append_header(("x-request-id", ctx.request_id.clone()));
    response.append_header(("x-engine-used", reply.engine.clone()));
    response.append_header(("x-route-tier", reply.tier.as_str()));
    Ok(response.json(reply))
}

#[get("/healthz")]
async fn get_liveness(engine: web::Data<Arc<GatewayEngine>>) -> impl Responder {
    #[derive(Serialize)]
    struct Liveness {
        status: &'static str,
        strategy: String,
        engines: usize,
        timestamp: String,
    }

    HttpResponse::Ok().json(Liveness {
        status: "ok",
        strategy: engine.strategy().to_string(),
        engines: engine.engine_count(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[get("/health/upstreams")]
async fn get_upstream_health(
    engine: web::Data<Arc<GatewayEngine>>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    authorize(&engine, &req)?;
    let snapshot = engine.check_upstreams().await;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[get("/stats")]
async fn get_stats(
    engine: web::Data<Arc<GatewayEngine>>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    authorize(&engine, &req)?;
    Ok(HttpResponse::Ok().json(engine.stats()))
}

fn authorize(engine: &GatewayEngine, req: &HttpRequest) -> Result<(), ApiError> {
    let token = header(req, "x-admin-token");
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    engine
        .authorize_admin(token.as_deref(), peer.as_deref())
        .map_err(ApiError::new)
}
