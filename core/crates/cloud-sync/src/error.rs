//! Crate-wide error taxonomy.

use std::fmt;

/// Coarse error code carried on `TaskInfo::err_code` and
/// `SyncProcess::err_code`. Kept distinct from [`Error`] because it has to
/// be `Copy` and cheaply comparable for the "first error wins" rule in
/// [`crate::notifier::Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrCode {
	Ok,
	InvalidArgs,
	Busy,
	NotSupport,
	NotFound,
	InternalError,
	CloudError,
	CloudSchemaMismatch,
	DbClosed,
	QueryEnd,
	Unfinished,
	SecurityError,
}

impl fmt::Display for ErrCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	#[error("invalid arguments: {0}")]
	InvalidArgs(String),
	#[error("syncer is busy, task queue is full")]
	Busy,
	#[error("operation not supported: {0}")]
	NotSupport(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("internal error: {0}")]
	Internal(String),
	#[error("cloud error: {0}")]
	Cloud(String),
	#[error("cloud schema mismatch: {0}")]
	CloudSchemaMismatch(String),
	#[error("db closed")]
	DbClosed,
	#[error("query end")]
	QueryEnd,
	#[error("unfinished")]
	Unfinished,
	#[error("security error: {0}")]
	Security(String),

	#[error("storage proxy error: {0}")]
	Storage(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
	/// Maps any crate error onto the coarse [`ErrCode`] stored on tasks and
	/// notifications, per §7: "every failure path ends with exactly one
	/// final notification whose errCode is the first recorded error".
	pub fn code(&self) -> ErrCode {
		match self {
			Self::InvalidArgs(_) => ErrCode::InvalidArgs,
			Self::Busy => ErrCode::Busy,
			Self::NotSupport(_) => ErrCode::NotSupport,
			Self::NotFound(_) => ErrCode::NotFound,
			Self::Internal(_) => ErrCode::InternalError,
			Self::Cloud(_) => ErrCode::CloudError,
			Self::CloudSchemaMismatch(_) => ErrCode::CloudSchemaMismatch,
			Self::DbClosed => ErrCode::DbClosed,
			Self::QueryEnd => ErrCode::QueryEnd,
			Self::Unfinished => ErrCode::Unfinished,
			Self::Security(_) => ErrCode::SecurityError,
			Self::Storage(_) => ErrCode::InternalError,
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
