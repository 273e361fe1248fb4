use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use oct_backend::analysis::model::{AnalysisError, Analyzer};
use oct_backend::analysis::preprocess::ModelInput;
use oct_backend::analysis::service::AnalysisService;
use oct_backend::config::AppConfig;
use oct_backend::routes::{configure_routes, cors_policy};
use oct_backend::storage::upload_store::{ensure_directories, UploadStore};
use oct_shared::{MaskResponse, PredictionResponse, StatusResponse, UploadResponse};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

const BOUNDARY: &str = "----octbackendtestboundary";

struct StubAnalyzer {
    probabilities: Vec<f32>,
    segment: bool,
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn classify(&self, _input: ModelInput) -> Result<Vec<f32>, AnalysisError> {
        Ok(self.probabilities.clone())
    }

    fn can_segment(&self) -> bool {
        self.segment
    }

    async fn segment(&self, image: &DynamicImage) -> Result<Option<GrayImage>, AnalysisError> {
        if !self.segment {
            return Ok(None);
        }
        let rgb = image.to_rgb8();
        Ok(Some(GrayImage::from_pixel(rgb.width(), rgb.height(), Luma([255]))))
    }
}

struct Harness {
    _dir: TempDir,
    config: AppConfig,
}

impl Harness {
    fn new(base_url: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.upload_folder = dir.path().join("uploads");
        config.results_folder = dir.path().join("results");
        config.reports_folder = dir.path().join("reports");
        config.max_content_length = 64 * 1024;
        config.server_base_url = base_url.map(str::to_string);
        ensure_directories(&config.storage_dirs()).unwrap();
        Self { _dir: dir, config }
    }
}

macro_rules! init_app {
    ($harness:expr, $analyzer:expr) => {{
        let config = $harness.config.clone();
        let store = UploadStore::new(config.upload_folder.clone(), config.max_content_length);
        let analysis = AnalysisService::new(Arc::new($analyzer), config.analysis.clone());
        let results = config.results_folder.clone();
        test::init_service(
            App::new()
                .wrap(cors_policy())
                .app_data(web::Data::new(config))
                .app_data(web::Data::new(store))
                .app_data(web::Data::new(analysis))
                .configure(|cfg| configure_routes(cfg, results)),
        )
        .await
    }};
}

fn cnv_analyzer(segment: bool) -> StubAnalyzer {
    StubAnalyzer {
        probabilities: vec![0.02, 0.81, 0.02, 0.05, 0.02, 0.03, 0.02, 0.03],
        segment,
    }
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([120, 110, 100])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(field: &str, filename: &str, data: &[u8]) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/upload")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(field, filename, data))
}

#[actix_web::test]
async fn index_reports_service_status() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    let status: StatusResponse =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(status.status, "success");
    assert_eq!(status.message, "OCT-AI API is running!");
}

#[actix_web::test]
async fn upload_then_predict_returns_prediction() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.png", &png_bytes()).to_request(),
    )
    .await;
    assert_eq!(uploaded.status, "success");
    assert!(uploaded.image_id.as_str().starts_with("oct_"));

    let stored: Vec<_> = std::fs::read_dir(&harness.config.upload_folder)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored, [format!("{}_scan.png", uploaded.image_id)]);

    let prediction: PredictionResponse = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/predict/{}", uploaded.image_id))
            .to_request(),
    )
    .await;
    assert_eq!(prediction.image_id, uploaded.image_id);
    assert_eq!(prediction.top_disease, "CNV");
    assert_eq!(prediction.predictions.len(), 8);
    assert_eq!(prediction.summary, "AI suggests CNV with 81.0% confidence.");
}

#[actix_web::test]
async fn upload_rejects_missing_unsupported_and_oversized_files() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    let resp = test::call_service(&app, upload_request("file", "scan.png", b"data").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(&app, upload_request("image", "notes.txt", b"data").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let oversized = vec![0u8; 64 * 1024 + 1];
    let resp = test::call_service(&app, upload_request("image", "big.png", &oversized).to_request()).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let leftover = std::fs::read_dir(&harness.config.upload_folder).unwrap().count();
    assert_eq!(leftover, 0);
}

#[actix_web::test]
async fn unknown_ids_are_not_found_on_every_read_endpoint() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(true));

    for endpoint in ["predict", "mask", "report"] {
        let req = test::TestRequest::get()
            .uri(&format!("/{}/oct_00000000", endpoint))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "/{}", endpoint);
    }

    let req = test::TestRequest::get().uri("/predict/bad%20id").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn mask_writes_overlay_and_links_it_under_base_url() {
    let harness = Harness::new(Some("https://oct.example.org"));
    let app = init_app!(harness, cnv_analyzer(true));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.png", &png_bytes()).to_request(),
    )
    .await;

    let mask: MaskResponse = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/mask/{}", uploaded.image_id))
            .to_request(),
    )
    .await;
    let expected = format!(
        "https://oct.example.org/results/{}_overlay.png",
        uploaded.image_id
    );
    assert_eq!(mask.overlay_mask_url.as_deref(), Some(expected.as_str()));
    assert_eq!(mask.retinal_layer_thickness.len(), 6);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/results/{}_overlay.png", uploaded.image_id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn mask_without_segmentation_has_no_overlay() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.png", &png_bytes()).to_request(),
    )
    .await;
    let mask: MaskResponse = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/mask/{}", uploaded.image_id))
            .to_request(),
    )
    .await;
    assert!(mask.overlay_mask_url.is_none());
}

#[actix_web::test]
async fn mask_links_overlay_under_request_host_without_base_url() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(true));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.png", &png_bytes()).to_request(),
    )
    .await;
    let mask: MaskResponse = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/mask/{}", uploaded.image_id))
            .insert_header((header::HOST, "oct.local:5000"))
            .to_request(),
    )
    .await;
    let expected = format!(
        "http://oct.local:5000/results/{}_overlay.png",
        uploaded.image_id
    );
    assert_eq!(mask.overlay_mask_url.as_deref(), Some(expected.as_str()));
}

#[actix_web::test]
async fn mask_serves_demo_overlay_for_undecodable_upload() {
    let harness = Harness::new(Some("https://oct.example.org"));
    std::fs::write(harness.config.results_folder.join("result.jpg"), b"jpeg").unwrap();
    let app = init_app!(harness, cnv_analyzer(false));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.dcm", b"DICM not an image").to_request(),
    )
    .await;
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/mask/{}", uploaded.image_id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let mask: MaskResponse = test::read_body_json(resp).await;
    assert_eq!(
        mask.overlay_mask_url.as_deref(),
        Some("https://oct.example.org/results/result.jpg")
    );
}

#[actix_web::test]
async fn report_returns_pdf_attachment_and_keeps_a_copy() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    let uploaded: UploadResponse = test::call_and_read_body_json(
        &app,
        upload_request("image", "scan.png", &png_bytes()).to_request(),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/report/{}", uploaded.image_id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains(&format!("report_{}.pdf", uploaded.image_id)));

    let body = test::read_body(resp).await;
    assert!(body.starts_with(b"%PDF"));

    let saved = harness
        .config
        .reports_folder
        .join(format!("{}_report.pdf", uploaded.image_id));
    assert!(saved.is_file());
}

#[actix_web::test]
async fn cors_headers_are_present_for_any_origin() {
    let harness = Harness::new(None);
    let app = init_app!(harness, cnv_analyzer(false));

    for origin in ["http://localhost:3000", "https://clinic.example.com"] {
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((header::ORIGIN, origin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "missing CORS header for {}",
            origin
        );
    }

    let req = test::TestRequest::get()
        .uri("/predict/oct_00000000")
        .insert_header((header::ORIGIN, "http://localhost:3000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
