use pulldown_cmark::{html, Event, Options, Parser};
use serde::Serialize;

use crate::handlers::AnalysisError;
use crate::models::{AnalysisReport, FoodImage, ImageError};

/// JSON body returned by the analysis endpoints. `status` tells the page
/// which way to render; it never has to inspect `text` or `message`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse {
    Success {
        headline: String,
        /// Model output exactly as returned
        text: String,
        /// `text` rendered from markdown, raw HTML escaped
        html: String,
        attempts: u32,
    },
    Error {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingImage,
    InvalidImage,
    Busy,
    Failed,
    BadRequest,
}

impl ApiResponse {
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        ApiResponse::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn from_outcome(outcome: Result<AnalysisReport, AnalysisError>) -> Self {
        match outcome {
            Ok(report) => ApiResponse::Success {
                headline: report.task.headline().to_string(),
                html: render_markdown(&report.text),
                text: report.text,
                attempts: report.attempts,
            },
            Err(e) => {
                let kind = match e {
                    AnalysisError::MissingImage => FailureKind::MissingImage,
                    AnalysisError::Busy { .. } => FailureKind::Busy,
                    AnalysisError::Failed { .. } => FailureKind::Failed,
                };
                ApiResponse::error(kind, e.user_message())
            }
        }
    }
}

/// Render model markdown (tables included) to HTML. Any HTML the model
/// emits is shown as text, never passed through.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Fields collected from an analysis form submission
#[derive(Debug, Default)]
pub struct AnalysisForm {
    pub image: Option<Vec<u8>>,
    pub extra_ingredients: Option<String>,
}

/// Turn an uploaded file into a `FoodImage`. No file, or an empty one, is
/// "no image" rather than an invalid one.
pub fn intake_image(
    upload: Option<Vec<u8>>,
    max_bytes: usize,
) -> Result<Option<FoodImage>, ImageError> {
    match upload {
        None => Ok(None),
        Some(bytes) if bytes.is_empty() => Ok(None),
        Some(bytes) => FoodImage::from_bytes(bytes, max_bytes).map(Some),
    }
}

#[cfg(feature = "web-server")]
pub mod ui;

#[cfg(feature = "web-server")]
pub mod server {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use axum::{
        extract::{
            multipart::{MultipartError, MultipartRejection},
            DefaultBodyLimit, Multipart, State,
        },
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use tower_http::services::ServeDir;

    use crate::handlers::AnalysisHandler;
    use crate::models::AnalysisTask;

    /// Room for multipart framing and the text fields on top of the image
    const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

    type Reply = (StatusCode, Json<ApiResponse>);

    pub struct AppState {
        pub handler: Arc<AnalysisHandler>,
        pub max_image_bytes: usize,
    }

    pub fn create_router(
        handler: Arc<AnalysisHandler>,
        max_image_bytes: usize,
        static_dir: &Path,
    ) -> Router {
        let state = Arc::new(AppState {
            handler,
            max_image_bytes,
        });

        Router::new()
            .route("/", get(ui::index_page))
            .route("/health", get(health_check))
            .route("/api/nutrition", post(nutrition_handler))
            .route("/api/recipes", post(recipes_handler))
            .nest_service("/assets", ServeDir::new(static_dir))
            .layer(DefaultBodyLimit::max(
                max_image_bytes.saturating_add(FORM_OVERHEAD_BYTES),
            ))
            .with_state(state)
    }

    type FormBody = Result<Multipart, MultipartRejection>;

    async fn nutrition_handler(State(state): State<Arc<AppState>>, multipart: FormBody) -> Reply {
        run_analysis(&state, multipart, |_| AnalysisTask::Nutrition).await
    }

    async fn recipes_handler(State(state): State<Arc<AppState>>, multipart: FormBody) -> Reply {
        run_analysis(&state, multipart, |form| {
            AnalysisTask::recipes(form.extra_ingredients.take())
        })
        .await
    }

    async fn run_analysis<F>(state: &AppState, multipart: FormBody, make_task: F) -> Reply
    where
        F: FnOnce(&mut AnalysisForm) -> AnalysisTask,
    {
        let multipart = match multipart {
            Ok(multipart) => multipart,
            Err(rejection) => {
                log::warn!("⚠️ Not a multipart form: {}", rejection);
                return (
                    rejection.status(),
                    Json(ApiResponse::error(FailureKind::BadRequest, rejection.body_text())),
                );
            }
        };

        let mut form = match read_form(multipart).await {
            Ok(form) => form,
            Err(reply) => return reply,
        };
        let task = make_task(&mut form);
        log::info!("📨 {} request received", task);

        let image = match intake_image(form.image, state.max_image_bytes) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("⚠️ Rejected upload for {}: {}", task, e);
                let status = match e {
                    ImageError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                return (status, Json(ApiResponse::error(FailureKind::InvalidImage, e.to_string())));
            }
        };

        let outcome = state.handler.analyze(task, image).await;
        let status = match &outcome {
            Ok(_) => StatusCode::OK,
            Err(AnalysisError::MissingImage) => StatusCode::BAD_REQUEST,
            Err(AnalysisError::Busy { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Err(AnalysisError::Failed { .. }) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(ApiResponse::from_outcome(outcome)))
    }

    async fn read_form(mut multipart: Multipart) -> Result<AnalysisForm, Reply> {
        let mut form = AnalysisForm::default();

        while let Some(field) = multipart.next_field().await.map_err(form_rejection)? {
            let name = field.name().unwrap_or("").to_string();

            match name.as_str() {
                "image" => {
                    let data = field.bytes().await.map_err(form_rejection)?;
                    log::debug!("📸 Received image field: {} bytes", data.len());
                    form.image = Some(data.to_vec());
                }
                "extra_ingredients" => {
                    form.extra_ingredients = Some(field.text().await.map_err(form_rejection)?);
                }
                other => log::debug!("Ignoring form field: {}", other),
            }
        }

        Ok(form)
    }

    fn form_rejection(e: MultipartError) -> Reply {
        log::warn!("⚠️ Failed to read form: {}", e);
        let status = e.status();
        let kind = if status == StatusCode::PAYLOAD_TOO_LARGE {
            FailureKind::InvalidImage
        } else {
            FailureKind::BadRequest
        };
        (status, Json(ApiResponse::error(kind, e.body_text())))
    }

    async fn health_check() -> &'static str {
        "OK"
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::models::{FoodImage, Prompt};
        use crate::services::{Backoff, ModelError, QuotaMatcher, RetryPolicy, VisionModel};
        use axum::body::Body;
        use axum::http::Request;
        use serde_json::Value;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;
        use tower::ServiceExt;

        const BOUNDARY: &str = "smartplate-test-boundary";
        const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];

        /// Always answers the same way and counts calls
        struct FixedModel {
            reply: fn() -> Result<String, ModelError>,
            calls: AtomicUsize,
            last_prompt: std::sync::Mutex<String>,
        }

        #[async_trait::async_trait]
        impl VisionModel for FixedModel {
            async fn generate(&self, prompt: &Prompt, _image: &FoodImage) -> Result<String, ModelError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                *self.last_prompt.lock().unwrap() = prompt.as_str().to_string();
                (self.reply)()
            }
        }

        fn setup(reply: fn() -> Result<String, ModelError>) -> (Router, Arc<FixedModel>) {
            let model = Arc::new(FixedModel {
                reply,
                calls: AtomicUsize::new(0),
                last_prompt: std::sync::Mutex::new(String::new()),
            });
            let policy = RetryPolicy::new(2, Backoff::Fixed(Duration::ZERO), QuotaMatcher::default());
            let handler = Arc::new(AnalysisHandler::new(model.clone(), policy));
            let router = create_router(handler, 1024, Path::new("static"));
            (router, model)
        }

        fn multipart_request(uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
            let mut body = Vec::new();
            for (name, data) in fields {
                body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
                if *name == "image" {
                    body.extend_from_slice(
                        b"Content-Disposition: form-data; name=\"image\"; filename=\"plate.jpg\"\r\n\
                          Content-Type: image/jpeg\r\n\r\n",
                    );
                } else {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                    );
                }
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

            Request::builder()
                .method("POST")
                .uri(uri)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap()
        }

        async fn json_body(response: axum::response::Response) -> Value {
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        #[tokio::test]
        async fn test_health_and_index() {
            let (router, _) = setup(|| Ok(String::new()));

            let health = router
                .clone()
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(health.status(), StatusCode::OK);

            let index = router
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(index.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(index.into_body(), usize::MAX).await.unwrap();
            let html = String::from_utf8(bytes.to_vec()).unwrap();
            assert!(html.contains("SmartPlate AI"));
            assert!(html.contains("Calculate Calories"));
        }

        #[tokio::test]
        async fn test_nutrition_success() {
            let (router, model) = setup(|| Ok("| Item | Estimated Calories |".to_string()));

            let response = router
                .oneshot(multipart_request("/api/nutrition", &[("image", JPEG_BYTES)]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["status"], "success");
            assert_eq!(body["headline"], "Analysis Complete!");
            assert_eq!(body["text"], "| Item | Estimated Calories |");
            assert!(body["html"].is_string());
            assert_eq!(body["attempts"], 1);
            assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_recipes_forward_extra_ingredients() {
            let (router, model) = setup(|| Ok("### 🍲 Pasta".to_string()));

            let response = router
                .oneshot(multipart_request(
                    "/api/recipes",
                    &[("image", JPEG_BYTES), ("extra_ingredients", &b"spinach, butter"[..])],
                ))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["headline"], "Recipes Generated!");
            assert!(model
                .last_prompt
                .lock()
                .unwrap()
                .contains("Combine them with: spinach, butter."));
        }

        #[tokio::test]
        async fn test_missing_image_skips_model() {
            let (router, model) = setup(|| Ok("unused".to_string()));

            let response = router
                .oneshot(multipart_request("/api/recipes", &[("extra_ingredients", &b"eggs"[..])]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["kind"], "missing_image");
            assert_eq!(body["message"], "Please upload an image first!");
            assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_unsupported_image_rejected() {
            let (router, model) = setup(|| Ok("unused".to_string()));

            let response = router
                .oneshot(multipart_request("/api/nutrition", &[("image", &b"GIF89a......"[..])]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["kind"], "invalid_image");
            assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_busy_maps_to_503() {
            let (router, model) = setup(|| {
                Err(ModelError::ResourceExhausted {
                    message: "quota".to_string(),
                })
            });

            let response = router
                .oneshot(multipart_request("/api/nutrition", &[("image", JPEG_BYTES)]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body = json_body(response).await;
            assert_eq!(body["kind"], "busy");
            assert_eq!(
                body["message"],
                "**Traffic Limit Hit**: Server is too busy right now. Please wait 1 minute."
            );
            assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_oversized_image_maps_to_413() {
            let (router, model) = setup(|| Ok("unused".to_string()));
            let mut oversized = JPEG_BYTES.to_vec();
            oversized.resize(2048, 0);

            let response = router
                .oneshot(multipart_request("/api/nutrition", &[("image", &oversized[..])]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["kind"], "invalid_image");
            assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_truncated_form_maps_to_bad_request() {
            let (router, model) = setup(|| Ok("unused".to_string()));
            let body = format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"\r\n\r\nhalf an ima",
                BOUNDARY
            );
            let request = Request::builder()
                .method("POST")
                .uri("/api/nutrition")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap();

            let response = router.oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["kind"], "bad_request");
            assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_non_multipart_request_gets_json_error() {
            let (router, model) = setup(|| Ok("unused".to_string()));
            let request = Request::builder()
                .method("POST")
                .uri("/api/recipes")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"extra_ingredients":"eggs"}"#))
                .unwrap();

            let response = router.oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["kind"], "bad_request");
            assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_terminal_failure_maps_to_502() {
            let (router, model) = setup(|| {
                Err(ModelError::Api {
                    status: 403,
                    message: "permission denied".to_string(),
                })
            });

            let response = router
                .oneshot(multipart_request("/api/nutrition", &[("image", JPEG_BYTES)]))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
            let body = json_body(response).await;
            assert_eq!(body["kind"], "failed");
            assert_eq!(
                body["message"],
                "An error occurred: Model API error (403): permission denied"
            );
            assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        }
    }
}
