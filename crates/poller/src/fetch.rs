use async_trait::async_trait;
use thiserror::Error;
use vigil_reconcile::EntityRecord;

/// One whole-collection fetch result: keyed entity records for one kind.
pub type FetchBatch = Vec<(String, EntityRecord)>;

/// Failure taxonomy for the fetch collaborator.
///
/// Only `Timeout`, `Network`, and `Server` feed the backoff controller.
/// `Auth` and `Client` are fatal and stop the task immediately; retrying
/// them on a timer cannot succeed without user intervention. `Cancelled`
/// is excluded from failure accounting entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
	/// The fetch did not settle before the task's time ceiling.
	#[error("request exceeded its time budget")]
	Timeout,
	/// The backend is unreachable.
	#[error("network unavailable: {0}")]
	Network(String),
	/// The backend answered with a 5xx-class failure.
	#[error("server error: {0}")]
	Server(String),
	/// The request itself was malformed or rejected (4xx-class).
	#[error("client error: {0}")]
	Client(String),
	/// Credentials were rejected.
	#[error("authentication failed: {0}")]
	Auth(String),
	/// The request's token was invalidated while in flight.
	#[error("request cancelled")]
	Cancelled,
}

impl FetchError {
	/// Returns whether this failure escalates the backoff controller.
	pub const fn feeds_backoff(&self) -> bool {
		matches!(self, Self::Timeout | Self::Network(_) | Self::Server(_))
	}

	/// Returns whether this failure stops the task outright.
	pub const fn is_fatal(&self) -> bool {
		matches!(self, Self::Auth(_) | Self::Client(_))
	}

	/// Returns whether offering the user a retry makes sense.
	///
	/// Retrying an auth failure without fixing credentials is futile.
	pub const fn is_retryable(&self) -> bool {
		!matches!(self, Self::Auth(_))
	}

	/// Short category label for logs and sink notices.
	pub const fn category(&self) -> &'static str {
		match self {
			Self::Timeout => "timeout",
			Self::Network(_) => "network",
			Self::Server(_) => "server",
			Self::Client(_) => "client",
			Self::Auth(_) => "auth",
			Self::Cancelled => "cancelled",
		}
	}
}

/// Fetch collaborator contract.
///
/// Implementations wrap one backend (a hypervisor API, a backup-agent API)
/// and resolve a whole keyed collection per call. The engine never
/// interprets payloads beyond this contract.
#[async_trait]
pub trait Fetcher: Send + Sync {
	async fn fetch(&self, entity_kind: &str, task_id: &str) -> Result<FetchBatch, FetchError>;
}
