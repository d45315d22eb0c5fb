//! Upload coordinator: plan, initiate or resume, upload, complete.
//!
//! Parts are uploaded one at a time in ascending order. A new session is
//! checkpointed as soon as the store issues its upload id, and each part's
//! checkpoint is written before the next part starts, so a resumed run
//! never skips a part the store has not confirmed.

use std::path::Path;

use maap_s3_protocol::PartRecord;
use maap_s3_transfer::{
    Planner, SessionStore, UploadPlan, UploadRoute, UploadSession, file_size,
    validate_destination_key,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::provider::{PartUploader, PresignedUrlProvider, SingleShotUploader};
use crate::types::{UploadEvent, UploadOutcome, UploadState};

/// Default number of part URLs requested per call.
pub const DEFAULT_URL_BATCH_SIZE: usize = 100;

/// Where a run was when it stopped.
struct RunPosition {
    stage: UploadState,
    part_number: Option<u32>,
}

/// Drives one upload through the state machine.
pub struct UploadCoordinator<'a> {
    urls: &'a dyn PresignedUrlProvider,
    uploader: &'a dyn PartUploader,
    single_shot: &'a dyn SingleShotUploader,
    store: &'a dyn SessionStore,
    planner: Planner,
    url_batch_size: usize,
    cancel: CancellationToken,
    events_tx: Option<mpsc::Sender<UploadEvent>>,
}

impl<'a> UploadCoordinator<'a> {
    /// Creates a coordinator with the default planner.
    pub fn new(
        urls: &'a dyn PresignedUrlProvider,
        uploader: &'a dyn PartUploader,
        single_shot: &'a dyn SingleShotUploader,
        store: &'a dyn SessionStore,
    ) -> Self {
        Self {
            urls,
            uploader,
            single_shot,
            store,
            planner: Planner::default(),
            url_batch_size: DEFAULT_URL_BATCH_SIZE,
            cancel: CancellationToken::new(),
            events_tx: None,
        }
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    /// Caps the number of part URLs requested at once. 0 is treated as 1.
    pub fn with_url_batch_size(mut self, size: usize) -> Self {
        self.url_batch_size = size.max(1);
        self
    }

    /// Stops issuing new parts once `cancel` fires. A part already in
    /// flight finishes and is checkpointed.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events_tx: mpsc::Sender<UploadEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// Uploads `source_path` to `destination_key`.
    ///
    /// A stored checkpoint for the pair is resumed, or rejected as stale if
    /// the file no longer matches it. Without one, small files take the
    /// single-shot path and larger files start a new session.
    pub async fn upload(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let mut pos = RunPosition {
            stage: UploadState::Planning,
            part_number: None,
        };
        let result = self.upload_inner(source_path, destination_key, &mut pos).await;
        self.finish_run(destination_key, pos, result).await
    }

    /// Continues the checkpointed upload of `source_path` to `destination_key`.
    ///
    /// Fails with [`UploadError::InvalidInput`] if there is no checkpoint.
    pub async fn resume(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let mut pos = RunPosition {
            stage: UploadState::Planning,
            part_number: None,
        };
        let result = async {
            let existing = self
                .store
                .load(source_path, destination_key)?
                .ok_or_else(|| {
                    UploadError::InvalidInput(format!(
                        "no interrupted upload of {} to {destination_key}; run upload instead",
                        source_path.display()
                    ))
                })?;
            let total_size = file_size(source_path)?;
            self.resume_session(existing, total_size, &mut pos).await
        }
        .await;
        self.finish_run(destination_key, pos, result).await
    }

    /// Resumes the most recently updated checkpoint.
    pub async fn resume_latest(&self) -> Result<UploadOutcome, UploadError> {
        let latest = self
            .store
            .list()?
            .into_iter()
            .next()
            .ok_or_else(|| {
                UploadError::InvalidInput("there is no upload to resume; run upload".into())
            })?;
        info!(
            source = %latest.source_path().display(),
            destination = %latest.destination_key(),
            "resuming most recent upload"
        );
        self.resume(latest.source_path(), latest.destination_key())
            .await
    }

    /// Releases the remote session and deletes the local checkpoint.
    ///
    /// Returns the upload id that was aborted.
    pub async fn abort(
        &self,
        source_path: &Path,
        destination_key: &str,
    ) -> Result<String, UploadError> {
        let session = self
            .store
            .load(source_path, destination_key)?
            .ok_or_else(|| {
                UploadError::InvalidInput(format!(
                    "no upload of {} to {destination_key} to abort",
                    source_path.display()
                ))
            })?;

        self.urls
            .abort(session.session_id(), destination_key)
            .await?;
        self.store.delete(source_path, destination_key)?;

        info!(upload_id = %session.session_id(), destination = %destination_key, "upload aborted");
        Ok(session.session_id().to_string())
    }

    /// Deletes the local checkpoint only. Returns whether one existed.
    pub fn discard(&self, source_path: &Path, destination_key: &str) -> Result<bool, UploadError> {
        let existed = self.store.load(source_path, destination_key)?.is_some();
        self.store.delete(source_path, destination_key)?;
        Ok(existed)
    }

    /// Submits the manifest of a fully uploaded session and drops its checkpoint.
    ///
    /// A session with missing parts is rejected before any remote call.
    pub async fn complete_session(&self, session: &UploadSession) -> Result<(), UploadError> {
        let manifest = session.manifest()?;

        self.urls
            .complete(session.session_id(), session.destination_key(), &manifest)
            .await?;

        if let Err(e) = self
            .store
            .delete(session.source_path(), session.destination_key())
        {
            warn!(
                destination = %session.destination_key(),
                error = %e,
                "upload completed but its checkpoint could not be removed; \
                 the next upload to this destination will validate it"
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn upload_inner(
        &self,
        source_path: &Path,
        destination_key: &str,
        pos: &mut RunPosition,
    ) -> Result<UploadOutcome, UploadError> {
        self.emit(UploadEvent::State(UploadState::Planning)).await;
        validate_destination_key(destination_key)?;
        let total_size = file_size(source_path)?;

        // A checkpoint is resumed or reported stale whatever the route.
        if let Some(existing) = self.store.load(source_path, destination_key)? {
            return self.resume_session(existing, total_size, pos).await;
        }

        match self.planner.route(total_size)? {
            UploadRoute::SingleShot { total_size } => {
                debug!(
                    source = %source_path.display(),
                    bytes = total_size,
                    limit = self.planner.single_shot_limit(),
                    "below single-shot limit"
                );
                self.check_cancelled()?;
                pos.stage = UploadState::Uploading;
                self.emit(UploadEvent::State(UploadState::Uploading)).await;
                self.single_shot
                    .put_object(source_path, destination_key)
                    .await?;
                Ok(UploadOutcome::SingleShot { bytes: total_size })
            }
            UploadRoute::Multipart(plan) => {
                self.start_session(source_path, destination_key, plan, pos)
                    .await
            }
        }
    }

    /// Initiates a remote session and checkpoints it before any part.
    async fn start_session(
        &self,
        source_path: &Path,
        destination_key: &str,
        plan: UploadPlan,
        pos: &mut RunPosition,
    ) -> Result<UploadOutcome, UploadError> {
        pos.stage = UploadState::Initiating;
        self.emit(UploadEvent::State(UploadState::Initiating)).await;
        self.check_cancelled()?;

        let upload_id = self.urls.initiate(destination_key).await?;
        info!(
            upload_id = %upload_id,
            destination = %destination_key,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "multipart upload initiated"
        );

        let session = UploadSession::new(upload_id, source_path, destination_key, &plan);
        self.store.save(&session)?;
        self.run_parts(session, plan, pos).await
    }

    /// Continues a stored session if it still describes the source file.
    async fn resume_session(
        &self,
        existing: UploadSession,
        total_size: u64,
        pos: &mut RunPosition,
    ) -> Result<UploadOutcome, UploadError> {
        pos.stage = UploadState::Resuming;
        // Judge the checkpoint by its own part size so a changed default
        // does not orphan it.
        let plan = UploadPlan::new(total_size, existing.part_size())?;
        if !existing.matches_plan(&plan) {
            return Err(UploadError::StaleSession {
                destination: existing.destination_key().to_string(),
                stored_parts: existing.part_count(),
                stored_size: existing.total_size(),
                current_parts: plan.part_count(),
                current_size: plan.total_size(),
            });
        }

        self.emit(UploadEvent::State(UploadState::Resuming)).await;
        info!(
            upload_id = %existing.session_id(),
            destination = %existing.destination_key(),
            done = existing.completed_parts().len(),
            parts = existing.part_count(),
            "resuming upload"
        );
        self.run_parts(existing, plan, pos).await
    }

    async fn run_parts(
        &self,
        mut session: UploadSession,
        plan: UploadPlan,
        pos: &mut RunPosition,
    ) -> Result<UploadOutcome, UploadError> {
        let resumed_parts = session.completed_parts().len() as u32;

        pos.stage = UploadState::Uploading;
        self.emit(UploadEvent::State(UploadState::Uploading)).await;
        self.upload_outstanding(&mut session, &plan, pos).await?;

        pos.stage = UploadState::Completing;
        pos.part_number = None;
        self.emit(UploadEvent::State(UploadState::Completing)).await;
        self.complete_session(&session).await?;

        Ok(UploadOutcome::Multipart {
            upload_id: session.session_id().to_string(),
            part_count: plan.part_count(),
            resumed_parts,
            bytes: plan.total_size(),
        })
    }

    /// Uploads every part not yet in the session, checkpointing each one.
    async fn upload_outstanding(
        &self,
        session: &mut UploadSession,
        plan: &UploadPlan,
        pos: &mut RunPosition,
    ) -> Result<(), UploadError> {
        let mut outstanding = session.outstanding_parts();

        while !outstanding.is_empty() {
            self.check_cancelled()?;

            let batch_len = outstanding.len().min(self.url_batch_size);
            let batch = &outstanding[..batch_len];
            let urls = self
                .urls
                .upload_urls(session.session_id(), session.destination_key(), batch)
                .await?;

            for &part_number in batch {
                self.check_cancelled()?;
                pos.part_number = Some(part_number);

                let range = plan.part_range(part_number).ok_or_else(|| {
                    UploadError::InvalidInput(format!("part {part_number} is not in the plan"))
                })?;
                let url = urls.get(&part_number).ok_or_else(|| UploadError::RemoteService {
                    status: None,
                    body: format!("no presigned URL returned for part {part_number}"),
                })?;

                let etag = self
                    .uploader
                    .upload_part(session.source_path(), range, url)
                    .await?;

                session.record_part(PartRecord::new(part_number, etag))?;
                self.store.save(session)?;

                debug!(
                    part = part_number,
                    parts = plan.part_count(),
                    bytes = range.length,
                    "part uploaded"
                );
                self.emit(UploadEvent::PartUploaded {
                    part_number,
                    part_count: plan.part_count(),
                    bytes_done: session.uploaded_bytes(),
                    total_bytes: plan.total_size(),
                })
                .await;
            }

            outstanding.drain(..batch_len);
        }

        Ok(())
    }

    async fn finish_run(
        &self,
        destination_key: &str,
        pos: RunPosition,
        result: Result<UploadOutcome, UploadError>,
    ) -> Result<UploadOutcome, UploadError> {
        match result {
            Ok(outcome) => {
                self.emit(UploadEvent::State(UploadState::Done)).await;
                self.emit(UploadEvent::Completed {
                    destination: destination_key.to_string(),
                })
                .await;
                info!(destination = %destination_key, "upload completed");
                Ok(outcome)
            }
            Err(e) => {
                match pos.part_number {
                    Some(part) => {
                        error!(stage = %pos.stage, part, destination = %destination_key, error = %e, "upload failed")
                    }
                    None => {
                        error!(stage = %pos.stage, destination = %destination_key, error = %e, "upload failed")
                    }
                }
                self.emit(UploadEvent::State(UploadState::Failed)).await;
                self.emit(UploadEvent::Failed {
                    stage: pos.stage,
                    part_number: pos.part_number,
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }
}
