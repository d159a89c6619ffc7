//! Sync Driver: per-task orchestration — lock, download every
//! table, upload every table if the strategy calls for it, unlock, notify.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use crate::{
	config::SyncerConfig,
	context::Context,
	download::{download_table, prepare_table_metadata},
	error::{ErrCode, Error, Result},
	heartbeat::HeartbeatHandle,
	interfaces::{DynCloudDb, DynStorageProxy, RuntimeContext},
	notifier::Notifier,
	strategy::strategy_for_mode,
	task::TaskInfo,
	upload::upload_table,
};

/// Returns the task's first recorded error, if any, without taking the
/// wider Queue/Sync locks.
async fn check_task_valid(task: &Arc<tokio::sync::Mutex<TaskInfo>>, closed: &AtomicBool) -> Result<()> {
	if closed.load(Ordering::SeqCst) {
		return Err(Error::DbClosed);
	}
	if let Some(code) = task.lock().await.err_code {
		return Err(code_to_error(code));
	}
	Ok(())
}

fn code_to_error(code: ErrCode) -> Error {
	match code {
		ErrCode::InvalidArgs => Error::InvalidArgs("task failed earlier".to_string()),
		ErrCode::Busy => Error::Busy,
		ErrCode::NotSupport => Error::NotSupport("task failed earlier".to_string()),
		ErrCode::NotFound => Error::NotFound("task failed earlier".to_string()),
		ErrCode::CloudError => Error::Cloud("task failed earlier".to_string()),
		ErrCode::CloudSchemaMismatch => Error::CloudSchemaMismatch("task failed earlier".to_string()),
		ErrCode::DbClosed => Error::DbClosed,
		ErrCode::QueryEnd => Error::QueryEnd,
		ErrCode::Unfinished => Error::Unfinished,
		ErrCode::SecurityError => Error::Security("task failed earlier".to_string()),
		ErrCode::Ok | ErrCode::InternalError => Error::Internal("task failed earlier".to_string()),
	}
}

/// Runs one task to completion: acquires the cloud lock, downloads every
/// table, uploads if the strategy permits, releases the lock, and always
/// ends with exactly one final notification.
pub async fn run_task(
	task: Arc<tokio::sync::Mutex<TaskInfo>>,
	cloud_db: DynCloudDb,
	storage: DynStorageProxy,
	runtime: RuntimeContext,
	config: &SyncerConfig,
	closed: Arc<AtomicBool>,
) {
	let notifier = {
		let guard = task.lock().await;
		Notifier::new(guard.devices.clone(), runtime.clone())
	};

	let result = run_task_inner(&task, &cloud_db, &storage, &runtime, config, &closed, &notifier).await;

	if let Err(e) = result {
		task.lock().await.set_err_once(e.code());
	}

	notifier.notify_final(&*task.lock().await).await;
	notifier.wait_drained().await;
}

async fn run_task_inner(
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	runtime: &RuntimeContext,
	config: &SyncerConfig,
	closed: &Arc<AtomicBool>,
	notifier: &Arc<Notifier>,
) -> Result<()> {
	check_task_valid(task, closed).await?;

	let (task_id, mode, tables) = {
		let guard = task.lock().await;
		(guard.task_id, guard.mode, guard.tables.clone())
	};

	let strategy = strategy_for_mode(mode);
	let needs_upload = strategy.judge_upload();
	let context = Context::new(task_id, strategy);

	let task_for_heartbeat = Arc::clone(task);
	let on_failed: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
		tracing::warn!(task_id, "heartbeat declared the task failed; next batch boundary will observe it");
	});

	let heartbeat = HeartbeatHandle::lock_cloud(
		runtime.clone(),
		Arc::clone(cloud_db),
		task_for_heartbeat,
		config.heartbeat_failure_limit,
		on_failed,
	)
	.await?;

	let result = prepare_all_tables(task, &tables, &context, cloud_db, storage, closed).await;

	let result = match result {
		Ok(()) if context.strategy.judge_download() => {
			download_all_tables(task, &tables, &context, cloud_db, storage, notifier, config, closed).await
		}
		other => other,
	};

	let result = match result {
		Ok(()) if needs_upload => {
			upload_all_tables(task, &tables, &context, cloud_db, storage, notifier, closed).await
		}
		other => other,
	};

	heartbeat.unlock_cloud(Arc::clone(cloud_db)).await;

	result
}

/// Runs schema validation and fetches per-table metadata (asset fields,
/// cloud watermark) for every table, regardless of whether the strategy
/// ends up running the download loop — the upload pipeline's asset
/// tagging depends on this metadata too.
async fn prepare_all_tables(
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	tables: &[String],
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	closed: &Arc<AtomicBool>,
) -> Result<()> {
	let cloud_schema = cloud_db.schema().await.map_err(|e| Error::Cloud(e.to_string()))?;

	for table in tables {
		check_task_valid(task, closed).await?;
		storage
			.check_schema(table, &cloud_schema)
			.await
			.map_err(Error::Storage)?;
		prepare_table_metadata(table, context, storage).await?;
	}
	Ok(())
}

/// Downloads every table in declared order, aborting if the task becomes
/// invalid at a table boundary.
async fn download_all_tables(
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	tables: &[String],
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	notifier: &Arc<Notifier>,
	config: &SyncerConfig,
	closed: &Arc<AtomicBool>,
) -> Result<()> {
	for table in tables {
		check_task_valid(task, closed).await?;
		context.set_current_table(table).await;
		download_table(
			table,
			task,
			context,
			cloud_db,
			storage,
			notifier,
			config.cursor_rotation_retry_limit,
		)
		.await?;
	}
	Ok(())
}

/// Uploads every table inside a single storage transaction, rolling back
/// the whole pass on any failure.
async fn upload_all_tables(
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	tables: &[String],
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	notifier: &Arc<Notifier>,
	closed: &Arc<AtomicBool>,
) -> Result<()> {
	for table in tables {
		check_task_valid(task, closed).await?;
		context.set_current_table(table).await;
		upload_table(table, task, context, cloud_db, storage, notifier).await?;
	}
	Ok(())
}
