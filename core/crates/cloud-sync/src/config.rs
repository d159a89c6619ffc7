//! Tunables the original hardcodes or reads from build-time constants.

#[derive(Debug, Clone)]
pub struct SyncerConfig {
	/// Maximum number of tasks that may sit in the queue at once (spec
	/// §4.1 `submit`).
	pub queue_limit: usize,
	/// Two consecutive heartbeat failures fail the task.
	pub heartbeat_failure_limit: u32,
	/// Cap on empty-batch-with-rotated-cursor retries before surfacing
	/// `CloudError`.
	pub cursor_rotation_retry_limit: u32,
	/// Page size passed through to `query` calls, advisory only — the
	/// cloud DB decides its own page size.
	pub query_page_size: u32,
}

impl Default for SyncerConfig {
	fn default() -> Self {
		Self {
			queue_limit: 32,
			heartbeat_failure_limit: 2,
			cursor_rotation_retry_limit: 16,
			query_page_size: 1000,
		}
	}
}
