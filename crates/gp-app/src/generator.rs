use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use gp_core::snapshot::check_pairs;
use gp_core::{GenerationJob, ImageSource, InputImage, JobId, Modality, ParameterSnapshot, SnapshotError};
use crate::error::AppError;
use crate::events::{AppEvent, GenEvent, JobKind, PollOutcome};
use crate::folder::{FolderSource, LocalFolder};
use crate::generator::aggregator::OutputAggregator;
use crate::generator::backend::GenBackend;
use crate::generator::backend::schemas::JobCreateRequest;
use crate::generator::poller::{DEFAULT_POLL_INTERVAL, PollScheduler};
use crate::persistence::ImagePersistence;
use crate::state::{ModalityState, ModalityStore, StoreEvent, Transition, prompt_phrases};

pub mod aggregator;
pub mod backend;
pub mod poller;

/// Broadcast channel capacity for notices.
const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Owns every modality store and is the only code that writes to them.
///
/// Polling runs in background tasks that report back through a channel; call
/// [`Generator::next_event`] and [`Generator::on_gen_event`] (or
/// [`Generator::wait_idle`]) to apply their results.
pub struct Generator {
    backend: Arc<dyn GenBackend>,
    folders: Arc<dyn FolderSource>,
    stores: HashMap<Modality, ModalityStore>,
    poller: PollScheduler,
    aggregator: OutputAggregator,
    events_rx: mpsc::UnboundedReceiver<GenEvent>,
    notices: broadcast::Sender<AppEvent>,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenBackend>) -> Self {
        Self::with_poll_interval(backend, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(backend: Arc<dyn GenBackend>, period: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let stores = Modality::all()
            .into_iter()
            .map(|m| (m, ModalityStore::new(m)))
            .collect();

        Self {
            poller: PollScheduler::new(Arc::clone(&backend), period, events_tx),
            aggregator: OutputAggregator::new(None, notices.clone()),
            backend,
            folders: Arc::new(LocalFolder),
            stores,
            events_rx,
            notices,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn ImagePersistence>) -> Self {
        self.aggregator.set_persistence(persistence);
        self
    }

    pub fn with_folder_source(mut self, folders: Arc<dyn FolderSource>) -> Self {
        self.folders = folders;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.notices.subscribe()
    }

    pub fn state(&self, modality: Modality) -> &ModalityState {
        self.stores[&modality].state()
    }

    fn store_mut(&mut self, modality: Modality) -> &mut ModalityStore {
        self.stores
            .entry(modality)
            .or_insert_with(|| ModalityStore::new(modality))
    }

    /// Whether the modality's generation job has a running status timer
    pub fn is_polling(&self, modality: Modality) -> bool {
        self.poller.is_active(modality, JobKind::Generation)
    }

    pub fn is_interrogating(&self, modality: Modality) -> bool {
        self.poller.is_active(modality, JobKind::Clip)
    }

    /// Hand-picked images pass through; a folder is listed and must not be empty.
    async fn resolve(&self, source: Option<&ImageSource>) -> Result<Vec<InputImage>, AppError> {
        let Some(source) = source else {
            return Ok(Vec::new());
        };
        let Some(path) = source.folder() else {
            return Ok(source.manual().to_vec());
        };

        let files = self
            .folders
            .list_files(path)
            .await
            .map_err(|source| AppError::InputFolder { path: path.to_path_buf(), source })?;
        if files.is_empty() {
            return Err(SnapshotError::NoSourceImages.into());
        }
        tracing::debug!(path = %path.display(), count = files.len(), "Resolved input folder");
        Ok(files)
    }

    /// Create a remote job for `snapshot` and start polling it.
    pub async fn submit(&mut self, modality: Modality, snapshot: ParameterSnapshot) -> Result<JobId, AppError> {
        if self.state(modality).is_busy() {
            return Err(AppError::Busy(modality));
        }
        snapshot.check(modality)?;

        let images = self.resolve(snapshot.inputs.image_source()).await?;
        let masks = self.resolve(snapshot.inputs.mask_source()).await?;
        if modality.takes_masks() {
            check_pairs(images.len(), masks.len())?;
        }

        let request = JobCreateRequest::with_images(&snapshot, images, masks);
        let expected = snapshot.expected_count(request.images.len());

        let resp = match self.backend.create_job(modality, &request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(%modality, error = %e, "Failed to create job");
                return Err(e.into());
            }
        };
        let job_id = resp.job_id;

        let job = GenerationJob::new(job_id.clone(), modality, Arc::new(snapshot), expected);
        self.store_mut(modality).dispatch(StoreEvent::JobSubmitted(job));
        self.poller.start(modality, JobKind::Generation, job_id.clone());
        self.store_mut(modality).dispatch(StoreEvent::JobPolling(job_id.clone()));

        tracing::info!(%modality, %job_id, expected, "Job submitted");
        let _ = self.notices.send(AppEvent::JobQueued {
            modality,
            job_id: job_id.clone(),
            expected,
        });

        Ok(job_id)
    }

    /// Ask the worker for prompt phrases describing `image`.
    ///
    /// Runs in its own slot, so a generation job may be in flight at the same time.
    pub async fn interrogate(&mut self, modality: Modality, image: InputImage) -> Result<JobId, AppError> {
        if !modality.takes_images() {
            return Err(AppError::NoImageInputs(modality));
        }
        if self.state(modality).clip.is_busy() {
            return Err(AppError::ClipBusy(modality));
        }

        let resp = match self.backend.create_clip_job(&image).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(%modality, error = %e, "Failed to create CLIP job");
                return Err(e.into());
            }
        };
        let job_id = resp.job_id;

        self.store_mut(modality).dispatch(StoreEvent::ClipSubmitted(job_id.clone()));
        self.poller.start(modality, JobKind::Clip, job_id.clone());
        tracing::info!(%modality, %job_id, image = %image.name, "CLIP job submitted");

        Ok(job_id)
    }

    pub async fn next_event(&mut self) -> Option<GenEvent> {
        self.events_rx.recv().await
    }

    /// Apply a polling result to its modality, unless it is stale.
    pub fn on_gen_event(&mut self, event: GenEvent) -> Transition {
        let GenEvent::JobStatus { modality, kind, job_id, outcome } = event;

        let active = match kind {
            JobKind::Generation => self.state(modality).active_job_id(),
            JobKind::Clip => self.state(modality).clip.active_job.as_ref(),
        };
        if active != Some(&job_id) {
            tracing::debug!(%modality, ?kind, %job_id, "Discarding result for inactive job");
            return Transition::Stale;
        }

        // The task already exited; drop its handle before the slot is cleared.
        if self.poller.active_job(modality, kind) == Some(&job_id) {
            self.poller.stop(modality, kind);
        }

        match (kind, outcome) {
            (JobKind::Generation, PollOutcome::Succeeded { result_uris, log }) => {
                tracing::info!(%modality, %job_id, images = result_uris.len(), "Job complete");
                let store = self
                    .stores
                    .entry(modality)
                    .or_insert_with(|| ModalityStore::new(modality));
                self.aggregator.on_succeeded(store, job_id, result_uris, log)
            }
            (JobKind::Clip, PollOutcome::Succeeded { result_uris, .. }) => {
                let phrases = prompt_phrases(&result_uris);
                tracing::info!(%modality, %job_id, phrases = phrases.len(), "CLIP job complete");
                let transition = self.store_mut(modality).dispatch(StoreEvent::ClipSucceeded {
                    job_id: job_id.clone(),
                    phrases: phrases.clone(),
                });
                let _ = self.notices.send(AppEvent::ClipReady { modality, job_id, phrases });
                transition
            }
            (kind, PollOutcome::Failed { reason }) => {
                let error = AppError::RemoteFailure { job_id: job_id.clone(), reason };
                self.fail_job(modality, kind, job_id, error)
            }
            (kind, PollOutcome::Errored { error }) => {
                let error = AppError::Poll { job_id: job_id.clone(), error };
                self.fail_job(modality, kind, job_id, error)
            }
        }
    }

    fn fail_job(&mut self, modality: Modality, kind: JobKind, job_id: JobId, error: AppError) -> Transition {
        let error = error.to_string();
        tracing::warn!(%modality, ?kind, %job_id, %error, "Job failed");

        let (event, notice) = match kind {
            JobKind::Generation => (
                StoreEvent::JobFailed { job_id: job_id.clone(), error: error.clone() },
                AppEvent::JobFailed { modality, job_id, error },
            ),
            JobKind::Clip => (
                StoreEvent::ClipFailed { job_id: job_id.clone(), error: error.clone() },
                AppEvent::ClipFailed { modality, job_id, error },
            ),
        };

        let transition = self.store_mut(modality).dispatch(event);
        if transition == Transition::Applied {
            let _ = self.notices.send(notice);
        }
        transition
    }

    /// Apply polling results until `modality` has no generation job in flight.
    ///
    /// Returns straight away if the modality is busy but its timer was stopped.
    pub async fn wait_idle(&mut self, modality: Modality) {
        self.drain_while(modality, JobKind::Generation).await;
    }

    /// Like [`Generator::wait_idle`], for the CLIP slot.
    pub async fn wait_clip(&mut self, modality: Modality) {
        self.drain_while(modality, JobKind::Clip).await;
    }

    async fn drain_while(&mut self, modality: Modality, kind: JobKind) {
        loop {
            let busy = match kind {
                JobKind::Generation => self.state(modality).is_busy(),
                JobKind::Clip => self.state(modality).clip.is_busy(),
            };
            if !busy || !self.poller.is_active(modality, kind) {
                return;
            }
            match self.next_event().await {
                Some(event) => {
                    self.on_gen_event(event);
                }
                None => return,
            }
        }
    }

    /// Stop the modality's timers, e.g. when its view goes away. Its jobs stay active.
    pub fn stop(&mut self, modality: Modality) -> bool {
        let generation = self.poller.stop(modality, JobKind::Generation);
        let clip = self.poller.stop(modality, JobKind::Clip);
        generation || clip
    }

    /// Restart polling for jobs whose timers were stopped.
    pub fn resume(&mut self, modality: Modality) -> bool {
        let state = self.state(modality);
        let pending = [
            (JobKind::Generation, state.active_job_id().cloned()),
            (JobKind::Clip, state.clip.active_job.clone()),
        ];

        let mut resumed = false;
        for (kind, job_id) in pending {
            if let Some(job_id) = job_id {
                if !self.poller.is_active(modality, kind) {
                    self.poller.start(modality, kind, job_id);
                    resumed = true;
                }
            }
        }
        resumed
    }

    /// Empty the modality, cancelling whatever it was waiting for.
    pub fn reset(&mut self, modality: Modality) {
        self.stop(modality);
        self.store_mut(modality).dispatch(StoreEvent::Reset);
        tracing::info!(%modality, "Modality reset");
    }

    pub fn mark_viewed(&mut self, modality: Modality) {
        self.store_mut(modality).dispatch(StoreEvent::OutputViewed);
    }

    /// Hand images shown in `from` over as the input images of `to`.
    ///
    /// `from` is only read.
    pub fn export_images(&mut self, from: Modality, to: Modality, uris: Vec<String>) -> Result<(), AppError> {
        if !to.takes_images() {
            return Err(AppError::NoImageInputs(to));
        }

        let output = &self.state(from).output;
        let missing = uris.iter().filter(|uri| !output.contains(uri)).count();
        if missing > 0 {
            return Err(AppError::NotDisplayed { modality: from, count: missing });
        }

        tracing::debug!(%from, %to, count = uris.len(), "Staging images");
        self.store_mut(to).dispatch(StoreEvent::StageInputs(uris));
        Ok(())
    }

    /// Take the staged images for building the modality's next snapshot.
    pub fn take_staged_inputs(&mut self, modality: Modality) -> Vec<InputImage> {
        let staged = self.state(modality).staged_inputs.clone();
        self.store_mut(modality).dispatch(StoreEvent::ClearStagedInputs);
        staged.into_iter().map(InputImage::from_uri).collect()
    }

    pub fn shutdown(&mut self) {
        self.poller.shutdown();
    }
}
