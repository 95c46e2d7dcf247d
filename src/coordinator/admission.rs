//! Process-wide admission control for scans

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Scan capacity exhausted: {max_concurrent} scans already running")]
    Saturated { max_concurrent: usize },

    #[error("Admission pool closed")]
    Closed,
}

/// Snapshot of the admission pool, derived from the live permit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub max_concurrent: usize,
    pub running: usize,
    pub available: usize,
}

/// Held for the lifetime of one admitted scan; dropping it frees the slot
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded pool of scan slots. Waiters are admitted in arrival order.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(AdmissionError::Saturated {
                max_concurrent: self.max_concurrent,
            }),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
        }
    }

    pub fn queue_info(&self) -> QueueInfo {
        let available = self.semaphore.available_permits().min(self.max_concurrent);
        QueueInfo {
            max_concurrent: self.max_concurrent,
            running: self.max_concurrent - available,
            available,
        }
    }
}
