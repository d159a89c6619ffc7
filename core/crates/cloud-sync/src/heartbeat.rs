//! Heartbeat & Lock: a periodic-tick pattern (interval + spawned ticks)
//! paired with `Notify`-based stop racing so a lock-refresh loop can be
//! cancelled cleanly from the driver once a task finishes.

use std::sync::{
	atomic::{AtomicU32, AtomicUsize, Ordering},
	Arc,
};

use tokio::{
	sync::Notify,
	time::{interval, Duration, MissedTickBehavior},
};

use crate::{
	error::ErrCode,
	interfaces::{DynCloudDb, RuntimeContext},
	task::TaskInfo,
};

/// How many heartbeat ticks may be queued (not yet run) before the task is
/// considered stalled.
const HEARTBEAT_TASK_QUEUE_LIMIT: usize = 8;

struct State {
	failed_count: AtomicU32,
	queued_ticks: AtomicUsize,
}

/// Owns the periodic lock-renewal timer for one task. `lock_cloud` starts
/// it; `unlock_cloud` cancels it and waits for all scheduled heartbeat
/// tasks to drain.
pub struct HeartbeatHandle {
	stop: Arc<Notify>,
	stopped_ack: Arc<Notify>,
	state: Arc<State>,
	timer_task: Option<tokio::task::JoinHandle<()>>,
}

impl HeartbeatHandle {
	/// `lockCloud(taskId)`: acquires the cloud lock, then starts a
	/// periodic timer with period `leaseMs / 3`. Each tick schedules a
	/// worker that calls `cloudDb.heartbeat()`.
	pub async fn lock_cloud(
		runtime: RuntimeContext,
		cloud_db: DynCloudDb,
		task: Arc<tokio::sync::Mutex<TaskInfo>>,
		config_failure_limit: u32,
		on_failed: Arc<dyn Fn() + Send + Sync>,
	) -> Result<Self, crate::error::Error> {
		let (_status, lease_ms) = cloud_db
			.lock()
			.await
			.map_err(|e| crate::error::Error::Cloud(e.to_string()))?;

		let period = Duration::from_millis((lease_ms / 3).max(1));

		let stop = Arc::new(Notify::new());
		let stopped_ack = Arc::new(Notify::new());
		let state = Arc::new(State {
			failed_count: AtomicU32::new(0),
			queued_ticks: AtomicUsize::new(0),
		});

		let timer_task = {
			let stop = Arc::clone(&stop);
			let stopped_ack = Arc::clone(&stopped_ack);
			let state = Arc::clone(&state);
			let cloud_db = Arc::clone(&cloud_db);
			let runtime_inner = runtime.clone();

			runtime.spawn(async move {
				let mut ticker = interval(period);
				ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
				// First tick fires immediately; skip it so the lease has
				// at least one full period before the first renewal.
				ticker.tick().await;

				loop {
					tokio::select! {
						_ = stop.notified() => break,
						_ = ticker.tick() => {
							if state.queued_ticks.load(Ordering::SeqCst) >= HEARTBEAT_TASK_QUEUE_LIMIT {
								tracing::warn!(
									"heartbeat ticks queuing faster than they run, failing task"
								);
								(on_failed)();
								break;
							}

							state.queued_ticks.fetch_add(1, Ordering::SeqCst);
							let cloud_db = Arc::clone(&cloud_db);
							let state = Arc::clone(&state);
							let on_failed = Arc::clone(&on_failed);
							let task = Arc::clone(&task);
							let failure_limit = config_failure_limit;

							runtime_inner.spawn(async move {
								let result = cloud_db.heartbeat().await;
								state.queued_ticks.fetch_sub(1, Ordering::SeqCst);

								match result {
									Ok(()) => {
										state.failed_count.store(0, Ordering::SeqCst);
									}
									Err(e) => {
										let failed = state.failed_count.fetch_add(1, Ordering::SeqCst) + 1;
										tracing::warn!(?e, failed, "heartbeat failed");
										if failed >= failure_limit {
											let mut guard = task.lock().await;
											guard.set_err_once(ErrCode::CloudError);
											drop(guard);
											(on_failed)();
										}
									}
								}
							});
						}
					}
				}

				stopped_ack.notify_waiters();
			})
		};

		Ok(Self {
			stop,
			stopped_ack,
			state,
			timer_task: Some(timer_task),
		})
	}

	/// `unlockCloud()`: cancels the timer, calls `cloudDb.unlock()`, and
	/// waits for all scheduled heartbeat tasks to drain.
	pub async fn unlock_cloud(mut self, cloud_db: DynCloudDb) {
		self.stop.notify_waiters();
		self.stopped_ack.notified().await;

		if let Some(handle) = self.timer_task.take() {
			let _ = handle.await;
		}

		while self.state.queued_ticks.load(Ordering::SeqCst) != 0 {
			tokio::task::yield_now().await;
		}

		if let Err(e) = cloud_db.unlock().await {
			tracing::warn!(?e, "failed to release cloud lock");
		}
	}
}
