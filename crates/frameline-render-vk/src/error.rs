// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Failures of the presentation chain and frame synchronizer.
///
/// Suboptimal and out-of-date results are not errors; they come back as
/// [`AcquireOutcome`](crate::AcquireOutcome) / [`PresentOutcome`](crate::PresentOutcome)
/// values so the caller can pick its own rebuild policy.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("failed to create {what}: {result}")]
    Construction {
        what: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("none of {candidates:?} supports the required features")]
    NoSupportedFormat { candidates: Vec<vk::Format> },

    #[error("acquire_next_image failed: {0}")]
    Acquire(#[source] vk::Result),

    #[error("wait_for_fences failed: {0}")]
    FenceWait(#[source] vk::Result),

    #[error("queue_submit failed: {0}")]
    Submission(#[source] vk::Result),

    #[error("queue_present failed: {0}")]
    Present(#[source] vk::Result),

    #[error("image index {index} out of range for a chain of {count} images")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("presentation chain has been destroyed")]
    Destroyed,
}

impl ChainError {
    pub(crate) fn construction(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| ChainError::Construction { what, result }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
