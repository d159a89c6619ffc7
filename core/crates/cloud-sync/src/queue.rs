//! Task Queue & Lifecycle and `cleanCloudData`. `CloudSyncer` is the crate's single public entry point.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

use tokio::sync::{Mutex, Notify};

use crate::{
	config::SyncerConfig,
	driver,
	error::{ErrCode, Error, Result},
	interfaces::{CleanMode, DynCloudDb, DynStorageProxy, RuntimeContext},
	notifier::SyncProcess,
	task::{SyncCallback, SyncMode, TaskInfo, TaskStatus},
};

const MAX_DEVICE_LEN: usize = 256;

struct QueueState {
	queue: VecDeque<u64>,
	tasks: HashMap<u64, Arc<Mutex<TaskInfo>>>,
	next_task_id: u64,
}

impl QueueState {
	fn new() -> Self {
		Self {
			queue: VecDeque::new(),
			tasks: HashMap::new(),
			next_task_id: 1,
		}
	}

	/// Assigns the next non-zero taskId, skipping zero on wraparound (spec
	/// §4.1 `submit`).
	fn allocate_task_id(&mut self) -> u64 {
		let id = self.next_task_id;
		self.next_task_id = self.next_task_id.wrapping_add(1);
		if self.next_task_id == 0 {
			self.next_task_id = 1;
		}
		id
	}
}

/// The crate's single public entry point: a per-store bidirectional cloud
/// sync engine.
pub struct CloudSyncer {
	cloud_db: DynCloudDb,
	storage: DynStorageProxy,
	runtime: RuntimeContext,
	config: SyncerConfig,

	queue: Mutex<QueueState>,
	/// Zero iff no task is executing; signaled whenever
	/// a task finishes so `close()` can proceed (the Context condition
	/// variable).
	current_task_id: AtomicU64,
	current_task_done: Notify,
	/// Serializes `run_task` against `clean_cloud_data` (the Sync mutex).
	sync_lock: Mutex<()>,
	closed: Arc<AtomicBool>,
}

impl CloudSyncer {
	pub fn new(cloud_db: DynCloudDb, storage: DynStorageProxy, runtime: RuntimeContext, config: SyncerConfig) -> Arc<Self> {
		Arc::new(Self {
			cloud_db,
			storage,
			runtime,
			config,
			queue: Mutex::new(QueueState::new()),
			current_task_id: AtomicU64::new(0),
			current_task_done: Notify::new(),
			sync_lock: Mutex::new(()),
			closed: Arc::new(AtomicBool::new(false)),
		})
	}

	/// `submit(taskInfo) -> taskId | Busy`. Validates devices
	/// and mode, enforces the queue limit, then schedules a driver run.
	pub async fn submit(
		self: &Arc<Self>,
		mode: SyncMode,
		tables: Vec<String>,
		devices: Vec<String>,
		callback: SyncCallback,
		timeout_ms: u64,
	) -> Result<u64> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::DbClosed);
		}
		if !mode.is_valid() {
			return Err(Error::InvalidArgs("unrecognized sync mode".to_string()));
		}
		if tables.is_empty() {
			return Err(Error::InvalidArgs("tables must be non-empty".to_string()));
		}
		if devices.len() != 1 || devices[0].is_empty() || devices[0].len() > MAX_DEVICE_LEN {
			return Err(Error::InvalidArgs(
				"devices must contain exactly one non-empty identifier".to_string(),
			));
		}

		let mut guard = self.queue.lock().await;
		if guard.queue.len() >= self.config.queue_limit {
			return Err(Error::Busy);
		}

		let task_id = guard.allocate_task_id();
		let task = Arc::new(Mutex::new(TaskInfo {
			task_id,
			mode,
			tables,
			devices,
			callback,
			timeout_ms,
			status: TaskStatus::Prepared,
			err_code: None,
		}));

		guard.queue.push_back(task_id);
		guard.tasks.insert(task_id, task);
		let should_start = guard.queue.len() == 1 && self.current_task_id.load(Ordering::SeqCst) == 0;
		drop(guard);

		if should_start {
			self.schedule_next();
		}

		Ok(task_id)
	}

	/// Pops the queue head, runs it to completion, tears down, then
	/// schedules itself again if more work remains.
	fn schedule_next(self: &Arc<Self>) {
		let this = Arc::clone(self);
		let _ = self.runtime.spawn(async move {
			this.drive_one().await;
		});
	}

	async fn drive_one(self: &Arc<Self>) {
		let task = {
			let mut guard = self.queue.lock().await;
			let Some(task_id) = guard.queue.pop_front() else {
				return;
			};
			let Some(task) = guard.tasks.get(&task_id).cloned() else {
				return;
			};
			drop(guard);

			task.lock().await.status = TaskStatus::Processing;
			self.current_task_id.store(task_id, Ordering::SeqCst);
			task
		};

		let _sync_guard = self.sync_lock.lock().await;
		driver::run_task(
			Arc::clone(&task),
			Arc::clone(&self.cloud_db),
			Arc::clone(&self.storage),
			self.runtime.clone(),
			&self.config,
			Arc::clone(&self.closed),
		)
		.await;
		drop(_sync_guard);

		let task_id = {
			let mut guard = task.lock().await;
			guard.status = TaskStatus::Finished;
			guard.task_id
		};

		let mut guard = self.queue.lock().await;
		guard.tasks.remove(&task_id);
		let has_more = !guard.queue.is_empty();
		drop(guard);

		self.current_task_id.store(0, Ordering::SeqCst);
		self.current_task_done.notify_waiters();

		if has_more {
			self.schedule_next();
		}
	}

	/// `close()`: stop accepting new work, close the cloud DB,
	/// wait for the current task to drain, fail every still-queued task
	/// with `DbClosed`, close the storage proxy, and wait for every
	/// scheduled callback to be delivered.
	pub async fn close(self: &Arc<Self>) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		self.cloud_db.close().await.map_err(|e| Error::Cloud(e.to_string()))?;

		while self.current_task_id.load(Ordering::SeqCst) != 0 {
			self.current_task_done.notified().await;
		}

		let remaining: Vec<Arc<Mutex<TaskInfo>>> = {
			let mut guard = self.queue.lock().await;
			let drained = guard.queue.drain(..).collect::<Vec<_>>();
			drained
				.into_iter()
				.filter_map(|id| guard.tasks.remove(&id))
				.collect()
		};

		// Callbacks are delivered on the runtime, never on the caller's
		// thread; `close()` waits for every one to run before
		// returning.
		let mut deliveries = Vec::with_capacity(remaining.len());
		for task in remaining {
			let mut guard = task.lock().await;
			guard.set_err_once(ErrCode::DbClosed);
			guard.status = TaskStatus::Finished;
			let devices = guard.devices.clone();
			let callback = guard.callback.clone();
			let err_code = guard.err_code;
			drop(guard);

			let process = SyncProcess {
				err_code,
				overall_finished: true,
				table_process: HashMap::new(),
			};
			deliveries.push(self.runtime.spawn(async move {
				let per_device = devices
					.into_iter()
					.map(|d| (d, process.clone()))
					.collect::<HashMap<_, _>>();
				(callback)(per_device);
			}));
		}
		for handle in deliveries {
			let _ = handle.await;
		}

		self.storage.close().await.map_err(Error::Storage)?;

		Ok(())
	}

	/// `cleanCloudData(mode, tables)`: validates
	/// inputs, serializes against `runTask` via the Sync mutex, and for
	/// each table removes local assets (when `FlagAndData`) before asking
	/// the storage proxy to clear the row's cloud metadata or data.
	pub async fn clean_cloud_data(self: &Arc<Self>, mode: CleanMode, tables: Vec<String>) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::DbClosed);
		}
		if tables.is_empty() {
			return Err(Error::InvalidArgs("tables must be non-empty".to_string()));
		}

		let _sync_guard = self.sync_lock.lock().await;

		for table in &tables {
			if mode == CleanMode::FlagAndData {
				let assets = self.storage.list_local_assets(table).await.map_err(Error::Storage)?;
				if !assets.is_empty() {
					self.cloud_db
						.remove_local_assets(&assets)
						.await
						.map_err(|e| Error::Cloud(e.to_string()))?;
				}
			}

			self.storage
				.clean_cloud_data(table, mode)
				.await
				.map_err(Error::Storage)?;
		}

		Ok(())
	}
}
