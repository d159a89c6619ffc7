//! Task lifecycle data.

use std::sync::Arc;

use crate::{error::ErrCode, notifier::SyncProcess};

/// Sync direction / conflict policy, selected per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
	PushOnly,
	PullOnly,
	PushPull,
	ForcePush,
	ForcePull,
	Merge,
}

impl SyncMode {
	pub(crate) const ALL: [SyncMode; 6] = [
		SyncMode::PushOnly,
		SyncMode::PullOnly,
		SyncMode::PushPull,
		SyncMode::ForcePush,
		SyncMode::ForcePull,
		SyncMode::Merge,
	];

	pub fn is_valid(self) -> bool {
		Self::ALL.contains(&self)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
	Prepared,
	Processing,
	Finished,
}

/// The user callback invoked with per-device sync progress.
pub type SyncCallback = Arc<dyn Fn(std::collections::HashMap<String, SyncProcess>) + Send + Sync>;

/// Caller-supplied description of one sync run.
#[derive(Clone)]
pub struct TaskInfo {
	pub task_id: u64,
	pub mode: SyncMode,
	/// Ordered, non-empty.
	pub tables: Vec<String>,
	/// Exactly one non-empty identifier, per `submit`'s validation.
	pub devices: Vec<String>,
	pub callback: SyncCallback,
	pub timeout_ms: u64,
	pub status: TaskStatus,
	pub err_code: Option<ErrCode>,
}

impl std::fmt::Debug for TaskInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskInfo")
			.field("task_id", &self.task_id)
			.field("mode", &self.mode)
			.field("tables", &self.tables)
			.field("devices", &self.devices)
			.field("timeout_ms", &self.timeout_ms)
			.field("status", &self.status)
			.field("err_code", &self.err_code)
			.finish()
	}
}

impl TaskInfo {
	/// A task's `errCode` is set at most once to a non-OK value; later failures during teardown are logged but ignored.
	pub fn set_err_once(&mut self, code: ErrCode) {
		if self.err_code.is_none() {
			self.err_code = Some(code);
		} else {
			tracing::debug!(
				task_id = self.task_id,
				existing = ?self.err_code,
				attempted = ?code,
				"ignoring subsequent error, first error already recorded"
			);
		}
	}
}
