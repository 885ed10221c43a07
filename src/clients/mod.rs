//! External collaborators reached over the network: the judge that scores a
//! round and the hint service that suggests words.

#[cfg(feature = "http-clients")]
pub mod http;

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::dto::{
    hint::{HintRequest, HintResponse},
    judge::{JudgeRequest, JudgeResponse},
};

/// Result alias for external service calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure talking to an external service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("service answered with status {status}")]
    Status { status: u16 },
    #[error("response parsing failed: {0}")]
    Parse(String),
}

/// Scores the answers of a round.
///
/// Callers must tolerate repeated invocations for the same round.
pub trait JudgeService: Send + Sync {
    fn score(&self, request: JudgeRequest) -> BoxFuture<'static, ClientResult<JudgeResponse>>;
}

/// Suggests a word for a category.
pub trait HintService: Send + Sync {
    fn suggest(&self, request: HintRequest) -> BoxFuture<'static, ClientResult<HintResponse>>;
}
