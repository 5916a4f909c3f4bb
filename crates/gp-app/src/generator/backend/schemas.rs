use serde::{Deserialize, Serialize};
use gp_core::{ImageSource, InputImage, JobId, ParameterSnapshot};

/// Body of a create-job call, flattened from a snapshot.
///
/// Folder sources are already resolved into `images` and `masks` by the time this
/// is built; the folder paths are still sent along.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobCreateRequest {
    pub model: String,
    pub scheduler: Option<String>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: i64,
    pub batch_count: u32,
    pub batch_size: u32,
    pub strength: Option<f32>,
    pub input_path: Option<String>,
    pub init_input_path: Option<String>,
    pub mask_input_path: Option<String>,
    #[serde(skip)]
    pub images: Vec<InputImage>,
    #[serde(skip)]
    pub masks: Vec<InputImage>,
}

fn folder_of(source: Option<&ImageSource>) -> Option<String> {
    source
        .and_then(ImageSource::folder)
        .map(|p| p.to_string_lossy().into_owned())
}

impl JobCreateRequest {
    /// Request carrying only the hand-picked images of the snapshot.
    pub fn from_snapshot(snapshot: &ParameterSnapshot) -> Self {
        let images = snapshot.inputs.image_source().map(|s| s.manual().to_vec()).unwrap_or_default();
        let masks = snapshot.inputs.mask_source().map(|s| s.manual().to_vec()).unwrap_or_default();
        Self::with_images(snapshot, images, masks)
    }

    /// `images` and `masks` stand in for the snapshot's sources, folders included.
    pub fn with_images(snapshot: &ParameterSnapshot, images: Vec<InputImage>, masks: Vec<InputImage>) -> Self {
        let (input_path, init_input_path, mask_input_path) = if snapshot.inputs.mask_source().is_some() {
            (
                None,
                folder_of(snapshot.inputs.image_source()),
                folder_of(snapshot.inputs.mask_source()),
            )
        } else {
            (folder_of(snapshot.inputs.image_source()), None, None)
        };

        Self {
            model: snapshot.model.clone(),
            scheduler: snapshot.scheduler.clone(),
            prompt: snapshot.prompt.clone(),
            negative_prompt: snapshot.negative_prompt.clone(),
            width: snapshot.width,
            height: snapshot.height,
            num_inference_steps: snapshot.num_inference_steps,
            guidance_scale: snapshot.guidance_scale,
            seed: snapshot.seed,
            batch_count: snapshot.batch_count,
            batch_size: snapshot.batch_size,
            strength: snapshot.inputs.strength(),
            input_path,
            init_input_path,
            mask_input_path,
            images,
            masks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCreateResponse {
    #[serde(alias = "task_id")]
    pub job_id: JobId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultDataLog {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl ResultDataLog {
    /// The worker sends either a numeric or a string id
    pub fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    pub task_status: TaskStatus,
    #[serde(default)]
    pub result_data: Option<Vec<String>>,
    #[serde(default)]
    pub result_data_log: Option<ResultDataLog>,
}

impl JobStatusResponse {
    pub fn pending() -> Self {
        Self { task_status: TaskStatus::Pending, result_data: None, result_data_log: None }
    }

    pub fn success(uris: Vec<String>, log: Option<ResultDataLog>) -> Self {
        Self { task_status: TaskStatus::Success, result_data: Some(uris), result_data_log: log }
    }

    pub fn failure() -> Self {
        Self { task_status: TaskStatus::Failure, result_data: None, result_data_log: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gp_core::{ImageData, ModalityInputs};

    #[test]
    fn test_status_response_parses_worker_payload() {
        let body = r#"{
            "task_status": "SUCCESS",
            "result_data": ["https://cdn/1.png", "https://cdn/2.png"],
            "result_data_log": { "id": 42, "prompt": "a red fox" }
        }"#;
        let resp: JobStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.task_status, TaskStatus::Success);
        assert_eq!(resp.result_data.as_ref().map(Vec::len), Some(2));
        let log = resp.result_data_log.unwrap();
        assert_eq!(log.id_string().as_deref(), Some("42"));
        assert_eq!(log.prompt.as_deref(), Some("a red fox"));
    }

    #[test]
    fn test_unknown_status_is_not_terminal() {
        let resp: JobStatusResponse =
            serde_json::from_str(r#"{ "task_status": "PROGRESS", "result_data": null }"#).unwrap();
        assert_eq!(resp.task_status, TaskStatus::Unknown);
        assert!(!resp.task_status.is_terminal());
        assert!(TaskStatus::Revoked.is_terminal());
    }

    #[test]
    fn test_create_response_accepts_task_id() {
        let resp: JobCreateResponse = serde_json::from_str(r#"{ "task_id": "abc-123" }"#).unwrap();
        assert_eq!(resp.job_id, JobId::from("abc-123"));
    }

    #[test]
    fn test_request_uses_resolved_folder_files() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::ImageToImage {
            strength: 0.3,
            source: ImageSource::Folder("/data/in".into()),
        })
        .with_prompt("watercolor");
        let files = vec![InputImage::from_bytes("a.png", vec![1, 2, 3])];

        let request = JobCreateRequest::with_images(&snapshot, files, Vec::new());
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.images[0].data, ImageData::Bytes(vec![1, 2, 3]));
        assert_eq!(request.strength, Some(0.3));
        assert_eq!(request.input_path.as_deref(), Some("/data/in"));
        assert_eq!(request.init_input_path, None);
    }

    #[test]
    fn test_paired_folders_go_out_as_init_and_mask_paths() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::Inpainting {
            strength: 0.7,
            images: ImageSource::Folder("/data/init".into()),
            masks: ImageSource::Manual(vec![InputImage::from_bytes("m.png", vec![9])]),
        })
        .with_prompt("a door");

        let request = JobCreateRequest::from_snapshot(&snapshot);
        assert!(request.images.is_empty());
        assert_eq!(request.masks.len(), 1);
        assert_eq!(request.input_path, None);
        assert_eq!(request.init_input_path.as_deref(), Some("/data/init"));
        assert_eq!(request.mask_input_path, None);
    }
}
