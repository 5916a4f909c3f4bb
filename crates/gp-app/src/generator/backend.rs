//! HTTP client for the generation worker pool.
//!
//! Three calls matter: creating a generation job for a modality, creating a
//! CLIP interrogation job for one image, and fetching the status of either by
//! id. [`GenBackend`] is the seam the orchestrator talks to, so tests can script
//! the worker without a server.

pub mod config;
pub mod schemas;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use gp_core::{ImageData, InputImage, JobId, Modality};
use crate::generator::backend::config::GenBackendConfig;
use crate::generator::backend::schemas::{JobCreateRequest, JobCreateResponse, JobStatusResponse};

/// Errors from the generation API layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, bad body).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait GenBackend: Send + Sync {
    async fn create_job(
        &self,
        modality: Modality,
        request: &JobCreateRequest,
    ) -> Result<JobCreateResponse, BackendError>;

    /// Ask the worker to describe `image` as prompt phrases.
    async fn create_clip_job(&self, image: &InputImage) -> Result<JobCreateResponse, BackendError>;

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, BackendError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    config: GenBackendConfig,
}

impl HttpBackend {
    pub fn new(config: GenBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GenBackendConfig {
        &self.config
    }

    fn create_url(&self, modality: Modality) -> String {
        format!(
            "{}/generation/{}/{}",
            self.config.api_url,
            modality.id(),
            self.config.gpu_env
        )
    }

    fn clip_url(&self) -> String {
        format!("{}/generation/clip/{}", self.config.api_url, self.config.gpu_env)
    }

    fn status_url(&self, job_id: &JobId) -> String {
        format!("{}/generation/task/{}", self.config.api_url, job_id)
    }

    fn build_form(&self, modality: Modality, request: &JobCreateRequest) -> Result<Form, BackendError> {
        let mut form = Form::new()
            .text("gpu_device", self.config.gpu_device.to_string())
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .text("width", request.width.to_string())
            .text("height", request.height.to_string())
            .text("num_inference_steps", request.num_inference_steps.to_string())
            .text("guidance_scale", request.guidance_scale.to_string())
            .text("seed", request.seed.to_string())
            .text("batch_count", request.batch_count.to_string())
            .text("batch_size", request.batch_size.to_string());

        if let Some(scheduler) = &request.scheduler {
            form = form.text("scheduler", scheduler.clone());
        }
        if let Some(negative_prompt) = &request.negative_prompt {
            form = form.text("negative_prompt", negative_prompt.clone());
        }
        if let Some(strength) = request.strength {
            form = form.text("strength", strength.to_string());
        }
        if let Some(input_path) = &request.input_path {
            form = form.text("input_path", input_path.clone());
        }
        if let Some(init_input_path) = &request.init_input_path {
            form = form.text("init_input_path", init_input_path.clone());
        }
        if let Some(mask_input_path) = &request.mask_input_path {
            form = form.text("mask_input_path", mask_input_path.clone());
        }

        let image_field = if modality.takes_masks() { "init_image" } else { "image" };
        form = attach_images(form, image_field, &request.images)?;
        form = attach_images(form, "mask_image", &request.masks)?;

        Ok(form)
    }

    /// Return the response unchanged on 2xx, otherwise an [`BackendError::Api`]
    /// carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Files go out as `{field}_list` parts, already-hosted images as `{field}_url_list` text.
fn attach_images(mut form: Form, field: &str, images: &[InputImage]) -> Result<Form, BackendError> {
    for image in images {
        form = match &image.data {
            ImageData::Bytes(bytes) => {
                let part = Part::bytes(bytes.clone())
                    .file_name(image.name.clone())
                    .mime_str(&image.mime_type)?;
                form.part(format!("{field}_list"), part)
            }
            ImageData::Uri(uri) => form.text(format!("{field}_url_list"), uri.clone()),
        };
    }
    Ok(form)
}

#[async_trait]
impl GenBackend for HttpBackend {
    async fn create_job(
        &self,
        modality: Modality,
        request: &JobCreateRequest,
    ) -> Result<JobCreateResponse, BackendError> {
        let form = self.build_form(modality, request)?;

        let response = self
            .client
            .post(self.create_url(modality))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn create_clip_job(&self, image: &InputImage) -> Result<JobCreateResponse, BackendError> {
        let form = Form::new().text("gpu_device", self.config.gpu_device.to_string());
        let form = attach_images(form, "image", std::slice::from_ref(image))?;

        let response = self
            .client
            .post(self.clip_url())
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, BackendError> {
        let response = self
            .client
            .get(self.status_url(job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}
