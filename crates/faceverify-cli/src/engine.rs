use faceverify_core::matcher::validate_threshold;
use faceverify_core::{
    BatchEntry, Embedding, FaceRegion, ImageSource, VerificationOutcome, Verifier, VerifyError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine task failed: {0}")]
    TaskFailed(String),
}

/// Clone-safe handle running pipeline calls off the async runtime.
///
/// Each call runs on the blocking pool under a timeout. A timed-out call is
/// reported, not retried; the blocking work is abandoned, not interrupted.
#[derive(Clone)]
pub struct EngineHandle {
    verifier: Arc<Verifier>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn new(verifier: Arc<Verifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    pub fn model_version(&self) -> &str {
        self.verifier.model_version()
    }

    /// Verify a probe against a reference. Timeouts and task failures become
    /// `processing_error` outcomes; only caller mistakes are errors.
    pub async fn verify_one(
        &self,
        reference: ImageSource,
        probe: ImageSource,
        threshold: f32,
    ) -> Result<VerificationOutcome, VerifyError> {
        validate_threshold(threshold)?;
        match self
            .run("verify_one", move |v| v.verify_one(&reference, &probe, threshold))
            .await
        {
            Ok(result) => result,
            Err(e) => Ok(VerificationOutcome::processing_error(e.to_string())),
        }
    }

    /// Compare a probe against known embeddings. On timeout or task failure
    /// every candidate is rejected.
    pub async fn verify_many<Id>(
        &self,
        probe: ImageSource,
        known: Vec<(Id, Embedding)>,
        threshold: f32,
    ) -> Result<Vec<BatchEntry<Id>>, VerifyError>
    where
        Id: Clone + Send + Sync + 'static,
    {
        validate_threshold(threshold)?;
        let ids: Vec<Id> = known.iter().map(|(id, _)| id.clone()).collect();

        match self
            .run("verify_many", move |v| v.verify_many(&probe, &known, threshold))
            .await
        {
            Ok(result) => result,
            Err(_) => Ok(ids.into_iter().map(BatchEntry::rejected).collect()),
        }
    }

    pub async fn locate(&self, source: ImageSource) -> Result<Vec<FaceRegion>, EngineError> {
        Ok(self.run("locate", move |v| v.locate_faces(&source)).await??)
    }

    pub async fn embed(&self, source: ImageSource) -> Result<Option<Embedding>, EngineError> {
        Ok(self.run("embed", move |v| v.embed(&source)).await??)
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Verifier) -> T + Send + 'static,
        T: Send + 'static,
    {
        let verifier = Arc::clone(&self.verifier);
        let task = tokio::task::spawn_blocking(move || f(&verifier));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_err)) => {
                tracing::error!(op, error = %join_err, "engine task failed");
                Err(EngineError::TaskFailed(join_err.to_string()))
            }
            Err(_) => {
                tracing::warn!(op, timeout = ?self.timeout, "engine call timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}
