use crate::{
    error::{EmojiError, GenerationError},
    models::{
        ErrorResponse, GalleryEntry, GenerateRequest, GenerateResponse, LikeResponse,
        NewGalleryEntry,
    },
    server::AppState,
};
use actix_web::{http::StatusCode, web, HttpResponse};
use serde_json::json;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/generate").route(web::post().to(generate)))
        .service(
            web::resource("/api/emojis")
                .route(web::get().to(list_emojis))
                .route(web::post().to(create_emoji)),
        )
        .service(web::resource("/api/emojis/{id}/like").route(web::post().to(like_emoji)))
        .service(web::resource("/health").route(web::get().to(health)));
}

/// A body that is not JSON, or has no usable `prompt`, reads as no prompt.
fn read_prompt(body: &[u8]) -> Result<String, GenerationError> {
    serde_json::from_slice::<GenerateRequest>(body)
        .ok()
        .and_then(|req| req.prompt)
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or_else(GenerationError::invalid_prompt)
}

fn generation_failure(err: &GenerationError) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(ErrorResponse {
        error: err.to_string(),
    })
}

fn store_failure(err: &EmojiError) -> HttpResponse {
    let response = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        EmojiError::NotFound(_) => HttpResponse::NotFound().json(response),
        _ => HttpResponse::InternalServerError().json(response),
    }
}

async fn generate(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let prompt = match read_prompt(&body) {
        Ok(prompt) => prompt,
        Err(e) => return generation_failure(&e),
    };

    match state.generator.generate(&prompt).await {
        Ok(image_url) => HttpResponse::Ok().json(GenerateResponse { image_url }),
        Err(e) => {
            log::error!("Error generating emoji: {}", e);
            generation_failure(&e)
        }
    }
}

async fn list_emojis(state: web::Data<AppState>) -> HttpResponse {
    match state.store.list().await {
        Ok(entries) => {
            let valid: Vec<GalleryEntry> = entries
                .into_iter()
                .filter(GalleryEntry::has_valid_url)
                .collect();
            HttpResponse::Ok().json(valid)
        }
        Err(e) => {
            log::error!("Error fetching emojis: {}", e);
            store_failure(&e)
        }
    }
}

/// Generate, then record. Nothing is written when generation fails.
async fn create_emoji(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let prompt = match read_prompt(&body) {
        Ok(prompt) => prompt,
        Err(e) => return generation_failure(&e),
    };

    let image_url = match state.generator.generate(&prompt).await {
        Ok(url) if !url.trim().is_empty() => url,
        Ok(_) => return generation_failure(&GenerationError::EmptyOutput),
        Err(e) => {
            log::error!("Error generating emoji: {}", e);
            return generation_failure(&e);
        }
    };

    match state
        .store
        .insert(NewGalleryEntry::new(prompt, image_url))
        .await
    {
        Ok(entry) => HttpResponse::Created().json(entry),
        Err(e) => {
            log::error!("Error saving emoji: {}", e);
            store_failure(&e)
        }
    }
}

async fn like_emoji(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    match state.store.increment_likes(&id).await {
        Ok(likes) => HttpResponse::Ok().json(LikeResponse { id, likes }),
        Err(e) => {
            log::error!("Error liking emoji: {}", e);
            store_failure(&e)
        }
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.store.health_check().await {
        Ok(true) => HttpResponse::Ok().json(json!({ "status": "ok" })),
        Ok(false) => HttpResponse::ServiceUnavailable().json(json!({ "status": "degraded" })),
        Err(e) => {
            log::warn!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable()
                .json(json!({ "status": "down", "error": e.to_string() }))
        }
    }
}
