use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use log::{error, info};
use shared::{ClassificationResponse, HealthResponse};

use crate::error::{ApiError, EMPTY_FILE, EMPTY_FILENAME, FILE_TOO_LARGE, MISSING_FILE};
use crate::pipeline::{Classification, Pipeline};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_bytes: usize,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/imagen").route(web::post().to(handle_image)))
        .service(web::resource("/salud").route(web::get().to(health)));
}

async fn handle_image(
    pipeline: web::Data<Pipeline>,
    limits: web::Data<UploadLimits>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let upload = read_upload(payload, limits.max_bytes).await?;
    let size = upload.len();

    let pipeline = pipeline.into_inner();
    let outcome = web::block(move || pipeline.run(&upload))
        .await
        .map_err(|e| {
            error!("Classification task did not complete: {}", e);
            ApiError::Classification(e.to_string())
        })?;

    match outcome {
        Ok(classification) => {
            info!(
                "Classified {} byte upload as {}",
                size, classification.category
            );
            Ok(HttpResponse::Ok().json(to_response(classification)))
        }
        Err(e) => {
            error!("Classification failed ({}): {}", e.kind(), e);
            Err(e.into())
        }
    }
}

async fn health(pipeline: web::Data<Pipeline>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        actuator_enabled: pipeline.actuator().is_enabled(),
    })
}

/// Pulls the `file` field out of the form. Other fields are skipped.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let (is_upload, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name() == Some(UPLOAD_FIELD),
                cd.get_filename().map(str::to_owned),
            ),
            None => (false, None),
        };

        if !is_upload {
            while field.try_next().await.map_err(malformed)?.is_some() {}
            continue;
        }

        if filename.as_deref().is_none_or(str::is_empty) {
            return Err(ApiError::validation(EMPTY_FILENAME));
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            if image_data.len() + chunk.len() > max_bytes {
                return Err(ApiError::validation(FILE_TOO_LARGE));
            }
            image_data.extend_from_slice(&chunk);
        }

        if image_data.is_empty() {
            return Err(ApiError::validation(EMPTY_FILE));
        }
        return Ok(image_data);
    }

    Err(ApiError::validation(MISSING_FILE))
}

fn malformed(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::validation(format!("Solicitud multipart inválida: {}", err))
}

fn to_response(classification: Classification) -> ClassificationResponse {
    ClassificationResponse {
        category: classification.category,
        details: classification
            .predictions
            .into_iter()
            .map(|p| (p.label, round_confidence(p.confidence)))
            .collect(),
    }
}

fn round_confidence(confidence: f32) -> f64 {
    (f64::from(confidence) * 10_000.0).round() / 10_000.0
}
