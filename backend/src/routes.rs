use actix_cors::Cors;
use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use oct_shared::{ImageId, MaskResponse, StatusResponse, UploadResponse};
use std::path::PathBuf;

use crate::analysis::service::AnalysisService;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::report::pdf::{self, ReportData};
use crate::storage::upload_store::{StorageError, UploadStore};

const UPLOAD_FIELD: &str = "image";

pub fn configure_routes(cfg: &mut web::ServiceConfig, results_dir: PathBuf) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/upload").route(web::post().to(upload_image)))
        .service(web::resource("/predict/{image_id}").route(web::get().to(predict)))
        .service(web::resource("/mask/{image_id}").route(web::get().to(mask)))
        .service(web::resource("/report/{image_id}").route(web::get().to(report)))
        .service(Files::new("/results", results_dir));
}

pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .max_age(3600)
}

fn parse_image_id(raw: &str) -> Result<ImageId, ApiError> {
    ImageId::parse(raw).ok_or_else(|| ApiError::BadRequest("Invalid image id.".into()))
}

fn public_base_url(req: &HttpRequest, config: &AppConfig) -> String {
    match &config.server_base_url {
        Some(base) => base.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    }
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        status: "success".into(),
        message: "OCT-AI API is running!".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: chrono::Local::now().to_rfc3339(),
    })
}

async fn upload_image(
    store: web::Data<UploadStore>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            return Err(StorageError::MissingFile.into());
        }
        if !UploadStore::is_allowed_file(&filename) {
            return Err(StorageError::UnsupportedType.into());
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
            store.validate_image_size(image_data.len() + data.len())?;
            image_data.extend_from_slice(&data);
        }

        let stored = store.save(&filename, &image_data).await?;
        return Ok(HttpResponse::Ok().json(UploadResponse {
            status: "success".into(),
            image_id: stored.image_id,
            message: "Image uploaded successfully.".into(),
        }));
    }

    Err(StorageError::MissingFile.into())
}

async fn predict(
    store: web::Data<UploadStore>,
    analysis: web::Data<AnalysisService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let image_id = parse_image_id(&path.into_inner())?;
    let stored = store.require(&image_id).await?;
    let prediction = analysis.predict(&stored.path).await?;
    Ok(HttpResponse::Ok().json(prediction.into_response(image_id)))
}

async fn mask(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    store: web::Data<UploadStore>,
    analysis: web::Data<AnalysisService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let image_id = parse_image_id(&path.into_inner())?;
    let stored = store.require(&image_id).await?;
    let overlay = analysis
        .render_overlay(&image_id, &stored.path, &config.results_folder)
        .await?;

    let base = public_base_url(&req, &config);
    let notes = match &overlay {
        Some(_) => "Layer thickness values are reference figures pending layer segmentation.",
        None => "No segmentation overlay is available for this scan.",
    };
    Ok(HttpResponse::Ok().json(MaskResponse {
        image_id,
        overlay_mask_url: overlay.map(|file| format!("{}/results/{}", base, file)),
        retinal_layer_thickness: analysis.config().layer_thickness.clone(),
        notes: notes.into(),
    }))
}

async fn report(
    config: web::Data<AppConfig>,
    store: web::Data<UploadStore>,
    analysis: web::Data<AnalysisService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let image_id = parse_image_id(&path.into_inner())?;
    let stored = store.require(&image_id).await?;
    let prediction = analysis.predict(&stored.path).await?;
    let mask_image =
        AnalysisService::existing_overlay(&image_id, &config.results_folder).await;

    let data = ReportData::new(
        &image_id,
        &prediction,
        analysis.config(),
        chrono::Local::now(),
        Some(stored.path.clone()),
        mask_image.map(|file| config.results_folder.join(file)),
    );
    let bytes = web::block(move || pdf::render(&data)).await??;
    pdf::save(&config.reports_folder, &image_id, &bytes).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(pdf::download_name(&image_id))],
        })
        .body(bytes))
}
