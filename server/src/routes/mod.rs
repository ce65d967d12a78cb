//! HTTP routes, grouped by domain:
//! - `health`: service status and prediction telemetry
//! - `predict`: single-image classification
//! - `upload`: labelled training data
//! - `retrain`: background fine-tuning jobs
//! - `models`: stored versions and promotion

pub mod health;
pub mod models;
pub mod predict;
pub mod retrain;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config().server.max_body_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/predict", post(predict::predict))
        .route("/upload_training_data", post(upload::upload_training_data))
        .route("/upload_stats", get(upload::upload_stats))
        .route("/retrain", post(retrain::trigger_retrain))
        .route("/retrain_status/:job_id", get(retrain::retrain_status))
        .route("/retrain_jobs", get(retrain::list_jobs))
        .route("/retrain_jobs/:job_id/cancel", post(retrain::cancel_job))
        .route("/models", get(models::list_models))
        .route("/models/:version/promote", post(models::promote_model))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Runs blocking library work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, crate::error::ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| crate::error::ApiError::internal(format!("worker task failed: {}", e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use image::{Rgb, RgbImage};
    use mriscan::config::Config;
    use mriscan::model::{ClassifierNet, InferenceBackend};
    use mriscan::{ModelMetadata, ModelMetrics, Normalization};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::state::AppState;

    pub const BOUNDARY: &str = "mriscan-test-boundary";

    pub struct TestApp {
        pub temp_dir: TempDir,
        pub state: AppState,
    }

    impl TestApp {
        pub fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let mut config = Config::default().with_root(temp_dir.path());
            config.model.image_size = [16, 16];
            config.model.normalization = Normalization::UnitScale;
            config.model.hidden_units = 8;
            config.model.pool_size = 2;
            config.model.dropout = 0.0;
            let state = AppState::new(config);
            Self { temp_dir, state }
        }

        /// An app serving a freshly initialised, promoted v1.
        pub fn with_model() -> Self {
            let app = Self::new();
            let retrainer = &app.state.retrainer;
            let model = &retrainer.config().model;
            let classes = model.class_set();
            let metadata = ModelMetadata {
                version: 1,
                name: model.name.clone(),
                architecture: model.architecture.clone(),
                input_shape: [16, 16, 3],
                class_labels: classes.labels(),
                metrics: ModelMetrics::default(),
                created_at: chrono::Utc::now(),
                learning_rate: 1e-3,
                batch_size: 1,
                epochs_requested: 1,
                epochs_trained: 1,
                samples_used: 1,
                parent_version: None,
                hidden_units: model.hidden_units,
                pool_size: model.pool_size,
                dropout: model.dropout,
                normalization: model.normalization.clone(),
            };
            let net = ClassifierNet::<InferenceBackend>::new(
                &metadata.network_config(),
                &Default::default(),
            );
            retrainer.models().write_version(&net, &metadata).unwrap();
            retrainer.promote(1).unwrap();
            app
        }

        pub fn router(&self) -> Router {
            super::router(self.state.clone())
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            self.send(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        pub async fn post(&self, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        pub async fn post_multipart(
            &self,
            uri: &str,
            parts: &[Part<'_>],
        ) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::post(uri)
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(multipart_body(parts)))
                    .unwrap(),
            )
            .await
        }
    }

    pub enum Part<'a> {
        Text { name: &'a str, value: &'a str },
        File { name: &'a str, filename: &'a str, content: Vec<u8> },
    }

    pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    filename,
                    content,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(content);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    pub fn png(seed: u8) -> Vec<u8> {
        let image = RgbImage::from_fn(20, 20, |x, y| {
            Rgb([seed, (x as u8).wrapping_mul(7), (y as u8).wrapping_add(seed)])
        });
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }
}
