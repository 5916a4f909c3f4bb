use std::sync::Arc;
use chrono::Utc;
use tokio::sync::broadcast;
use gp_core::{JobId, Modality, OutputBatch, SaveSettings};
use crate::error::AppError;
use crate::events::AppEvent;
use crate::generator::backend::schemas::ResultDataLog;
use crate::persistence::ImagePersistence;
use crate::state::{ModalityStore, StoreEvent, Transition};

/// Folds a succeeded job into its modality's gallery.
pub struct OutputAggregator {
    persistence: Option<Arc<dyn ImagePersistence>>,
    notices: broadcast::Sender<AppEvent>,
}

impl OutputAggregator {
    pub fn new(persistence: Option<Arc<dyn ImagePersistence>>, notices: broadcast::Sender<AppEvent>) -> Self {
        Self { persistence, notices }
    }

    pub fn set_persistence(&mut self, persistence: Arc<dyn ImagePersistence>) {
        self.persistence = Some(persistence);
    }

    /// Record the batch, then save it in the background if the job asked for it.
    ///
    /// The gallery keeps the batch whatever happens on disk.
    pub fn on_succeeded(
        &self,
        store: &mut ModalityStore,
        job_id: JobId,
        result_uris: Vec<String>,
        log: Option<ResultDataLog>,
    ) -> Transition {
        let Some(job) = store.state().active_job.as_ref().filter(|j| j.id == job_id) else {
            return Transition::Stale;
        };
        let save = job.snapshot.save.clone();
        let fallback_prompt = job.snapshot.prompt.clone();

        let batch_id = log
            .as_ref()
            .and_then(ResultDataLog::id_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let prompt_used = log
            .and_then(|l| l.prompt)
            .unwrap_or(fallback_prompt);

        if result_uris.is_empty() {
            tracing::warn!(modality = %store.modality(), %job_id, "Job succeeded without images");
        }

        let batch = OutputBatch {
            batch_id,
            source_job_id: job_id.clone(),
            image_uris: result_uris.clone(),
            prompt_used,
            created_at: Utc::now(),
        };

        let transition = store.dispatch(StoreEvent::JobSucceeded { job_id: job_id.clone(), batch });
        if transition != Transition::Applied {
            return transition;
        }

        let _ = self.notices.send(AppEvent::JobComplete {
            modality: store.modality(),
            job_id: job_id.clone(),
            images: result_uris.len(),
        });

        match (save, self.persistence.as_ref()) {
            (Some(_), _) if result_uris.is_empty() => {}
            (Some(save), Some(persistence)) => {
                self.persist(Arc::clone(persistence), store.modality(), job_id, result_uris, save);
            }
            (Some(save), None) => {
                tracing::warn!(
                    modality = %store.modality(),
                    %job_id,
                    destination = %save.destination.display(),
                    "Save requested but no persistence is configured"
                );
            }
            (None, _) => {}
        }

        transition
    }

    fn persist(
        &self,
        persistence: Arc<dyn ImagePersistence>,
        modality: Modality,
        job_id: JobId,
        uris: Vec<String>,
        save: SaveSettings,
    ) {
        let notices = self.notices.clone();

        tokio::spawn(async move {
            let result = persistence
                .save_images_archived(&uris, &save.destination, save.format, save.archive)
                .await;

            let notice = match result {
                Ok(paths) => {
                    tracing::info!(%modality, %job_id, count = paths.len(), "Saved generated images");
                    AppEvent::ImagesSaved { modality, job_id, paths }
                }
                Err(e) => {
                    let error = AppError::from(e).to_string();
                    tracing::error!(%modality, %job_id, %error, "Saving generated images failed");
                    AppEvent::SaveFailed { modality, job_id, error }
                }
            };
            let _ = notices.send(notice);
        });
    }
}
