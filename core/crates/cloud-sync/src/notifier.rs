//! Notifier: accumulates and emits per-table progress to the
//! user callback.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	},
};

use tokio::sync::{Mutex, Notify};

use crate::{
	error::ErrCode,
	interfaces::RuntimeContext,
	task::{SyncCallback, TaskInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
	Processing,
	Finished,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionInfo {
	/// Monotonic per direction, bumped each batch.
	pub batch_index: u32,
	pub total: u64,
	pub success_count: u64,
	pub fail_count: u64,
}

impl DirectionInfo {
	/// Counter law: successCount + failCount <= total.
	pub fn merge(&mut self, delta: DirectionInfo) {
		self.batch_index = self.batch_index.max(delta.batch_index);
		self.total = self.total.max(delta.total);
		self.success_count += delta.success_count;
		self.fail_count += delta.fail_count;
	}
}

#[derive(Debug, Clone, Default)]
pub struct TableProcess {
	pub status_finished: bool,
	pub download: DirectionInfo,
	pub upload: DirectionInfo,
}

#[derive(Debug, Clone, Default)]
pub struct SyncProcess {
	pub err_code: Option<ErrCode>,
	pub overall_finished: bool,
	pub table_process: HashMap<String, TableProcess>,
}

/// A delta update for a single table's download or upload counters (spec
/// §4.7 `update`).
#[derive(Debug, Clone)]
pub enum ProcessUpdate {
	Download { table: String, info: DirectionInfo },
	Upload { table: String, info: DirectionInfo },
	TableFinished { table: String },
}

struct Inner {
	process: SyncProcess,
}

/// Holds the accumulated [`SyncProcess`] plus the ordered device list.
/// In-flight callback-schedule count is tracked so `close()` can wait for
/// delivery to drain.
pub struct Notifier {
	inner: Mutex<Inner>,
	devices: Vec<String>,
	runtime: RuntimeContext,
	in_flight: AtomicU32,
	drained: Notify,
}

impl Notifier {
	pub fn new(devices: Vec<String>, runtime: RuntimeContext) -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(Inner {
				process: SyncProcess::default(),
			}),
			devices,
			runtime,
			in_flight: AtomicU32::new(0),
			drained: Notify::new(),
		})
	}

	async fn update(&self, delta: ProcessUpdate) {
		let mut guard = self.inner.lock().await;
		match delta {
			ProcessUpdate::Download { table, info } => {
				guard
					.process
					.table_process
					.entry(table)
					.or_default()
					.download
					.merge(info);
			}
			ProcessUpdate::Upload { table, info } => {
				guard
					.process
					.table_process
					.entry(table)
					.or_default()
					.upload
					.merge(info);
			}
			ProcessUpdate::TableFinished { table } => {
				guard
					.process
					.table_process
					.entry(table)
					.or_default()
					.status_finished = true;
			}
		}
	}

	/// Folds `update` then, if the task has no stored error (or
	/// `notify_when_error` is true), schedules the user callback on a
	/// worker.
	pub async fn notify(
		self: &Arc<Self>,
		task: &TaskInfo,
		delta: ProcessUpdate,
		notify_when_error: bool,
	) {
		self.update(delta).await;

		if task.err_code.is_some() && !notify_when_error {
			return;
		}

		let snapshot = {
			let mut guard = self.inner.lock().await;
			guard.process.err_code = task.err_code;
			guard.process.clone()
		};

		self.deliver(task.callback.clone(), snapshot);
	}

	/// Emits the final, terminal notification for a task.
	pub async fn notify_final(self: &Arc<Self>, task: &TaskInfo) {
		let snapshot = {
			let mut guard = self.inner.lock().await;
			guard.process.err_code = task.err_code;
			guard.process.overall_finished = true;
			guard.process.clone()
		};

		self.deliver(task.callback.clone(), snapshot);
	}

	fn deliver(self: &Arc<Self>, callback: SyncCallback, snapshot: SyncProcess) {
		self.in_flight.fetch_add(1, Ordering::SeqCst);
		let devices = self.devices.clone();
		let this = Arc::clone(self);

		self.runtime.spawn(async move {
			let per_device = devices
				.iter()
				.cloned()
				.map(|d| (d, snapshot.clone()))
				.collect::<HashMap<_, _>>();
			(callback)(per_device);
			this.mark_delivered();
		});
	}

	/// `close()` waits until this counter returns to zero.
	pub async fn wait_drained(&self) {
		while self.in_flight.load(Ordering::SeqCst) != 0 {
			self.drained.notified().await;
		}
	}

	fn mark_delivered(&self) {
		if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.drained.notify_waiters();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn counter_law_holds_after_merge() {
		let mut acc = DirectionInfo::default();
		acc.merge(DirectionInfo {
			batch_index: 1,
			total: 5,
			success_count: 5,
			fail_count: 0,
		});
		assert!(acc.success_count + acc.fail_count <= acc.total);
	}
}
