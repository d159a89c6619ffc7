//! Download Pipeline.

use std::{collections::HashMap, sync::Arc};

use crate::{
	asset_tagger::tag_assets,
	context::{Context, PendingAssetDownload},
	error::{Error, Result},
	interfaces::{CloudDbStatus, DynCloudDb, DynStorageProxy},
	notifier::{DirectionInfo, Notifier, ProcessUpdate},
	reserved::{extract_reserved, validate_no_duplicate_asset_names},
	task::TaskInfo,
	types::{ChangedData, DownloadBatch, OpType, TaggedRecord, Value, VBucket},
};

async fn notify_download(
	notifier: &Arc<Notifier>,
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	table: &str,
	info: DirectionInfo,
	notify_when_error: bool,
) {
	let snapshot = task.lock().await.clone();
	notifier
		.notify(
			&snapshot,
			ProcessUpdate::Download {
				table: table.to_string(),
				info,
			},
			notify_when_error,
		)
		.await;
}

/// Fetches per-table metadata (declared asset fields, cloud watermark)
/// into the context. Runs for every table regardless of whether the
/// strategy actually executes the download loop, because the upload
/// pipeline's asset tagging depends on the declared asset fields too
///.
pub async fn prepare_table_metadata(
	table: &str,
	context: &Context,
	storage: &DynStorageProxy,
) -> Result<()> {
	context.set_current_table(table).await;

	let (_pk_cols, asset_fields) = storage
		.get_primary_col_names_with_assets_fields(table)
		.await
		.map_err(Error::Storage)?;
	context.set_asset_fields(table, asset_fields).await;

	let starting_mark = storage
		.get_cloud_water_mark(table)
		.await
		.map_err(Error::Storage)?;
	context.set_cloud_water_mark(table, starting_mark).await;

	Ok(())
}

/// Per-table download loop: batch query, tag, save in one transaction,
/// notify, advance the cursor. Assumes
/// [`prepare_table_metadata`] already ran for this table.
pub async fn download_table(
	table: &str,
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	notifier: &Arc<Notifier>,
	cursor_rotation_retry_limit: u32,
) -> Result<()> {
	context.set_current_table(table).await;

	let starting_mark = context.cloud_water_mark(table).await.unwrap_or_default();

	let mut batch_index: u32 = 0;
	let mut empty_retries: u32 = 0;
	let mut cursor = starting_mark;

	loop {
		let mut extend: HashMap<String, Value> = HashMap::new();
		extend.insert("cursor".to_string(), Value::Text(cursor.clone()));

		let mut data = Vec::new();
		let status = cloud_db
			.query(table, &mut extend, &mut data)
			.await
			.map_err(|e| Error::Cloud(e.to_string()))?;

		if data.is_empty() {
			match status {
				CloudDbStatus::QueryEnd => {
					notify_download(
						notifier,
						task,
						table,
						DirectionInfo {
							batch_index,
							total: 0,
							success_count: 0,
							fail_count: 0,
						},
						false,
					)
					.await;
					break;
				}
				CloudDbStatus::Ok => {
					// The cloud may have rotated the cursor with no data
					// yet to return; adopt it and retry, capped.
					if let Some(Value::Text(new_cursor)) = extend.get("cursor") {
						cursor = new_cursor.clone();
					}
					empty_retries += 1;
					if empty_retries > cursor_rotation_retry_limit {
						tracing::warn!(
							table,
							empty_retries,
							"exceeded empty-batch cursor rotation retry limit"
						);
						return Err(Error::Cloud(
							"cursor rotation retry limit exceeded".to_string(),
						));
					}
					continue;
				}
			}
		}

		empty_retries = 0;
		batch_index += 1;

		storage.start_transaction().await.map_err(Error::Storage)?;

		match process_batch(table, &data, context, storage).await {
			Ok((download_batch, changed, last_cursor)) => {
				// rowId backfill (for tables whose primary key is the synthetic
				// rowId) is the storage proxy's responsibility; `process_batch`
				// already keys deferred change entries off the record's own
				// primary key, so the ids returned here need no further use.
				if let Err(e) = storage.put_cloud_sync_data(table, &download_batch).await {
					storage.rollback().await.map_err(Error::Storage)?;
					notify_download(
						notifier,
						task,
						table,
						DirectionInfo {
							batch_index,
							total: data.len() as u64,
							success_count: 0,
							fail_count: data.len() as u64,
						},
						true,
					)
					.await;
					return Err(Error::Storage(e));
				}
				storage.commit().await.map_err(Error::Storage)?;

				if !changed.is_empty() {
					storage
						.notify_changed_data(&changed)
						.await
						.map_err(Error::Storage)?;
				}

				notify_download(
					notifier,
					task,
					table,
					DirectionInfo {
						batch_index,
						total: data.len() as u64,
						success_count: data.len() as u64,
						fail_count: 0,
					},
					false,
				)
				.await;

				reconcile_asset_downloads(table, context, cloud_db, storage).await?;

				notify_download(notifier, task, table, DirectionInfo::default(), false).await;

				if let Some(last_cursor) = last_cursor {
					context.set_cloud_water_mark(table, last_cursor.clone()).await;
					cursor = last_cursor.clone();
					if context.strategy.judge_update_cursor() {
						storage
							.set_cloud_water_mark(table, &last_cursor)
							.await
							.map_err(Error::Storage)?;
					}
				}
			}
			Err(e) => {
				storage.rollback().await.map_err(Error::Storage)?;
				notify_download(
					notifier,
					task,
					table,
					DirectionInfo {
						batch_index,
						total: data.len() as u64,
						success_count: 0,
						fail_count: data.len() as u64,
					},
					true,
				)
				.await;
				return Err(e);
			}
		}

		if status == CloudDbStatus::QueryEnd {
			break;
		}
	}

	Ok(())
}

/// Tags every record of one batch: validates reserved fields, looks up
/// local state, asks the strategy, computes the asset diff, and
/// accumulates the `ChangedData` delta.
async fn process_batch(
	table: &str,
	data: &[VBucket],
	context: &Context,
	storage: &DynStorageProxy,
) -> Result<(DownloadBatch, ChangedData, Option<String>)> {
	let mut batch = DownloadBatch::default();
	let mut changed = ChangedData::new(table);
	let mut last_cursor = None;

	let asset_fields = context.asset_fields(table).await;

	for record in data {
		validate_no_duplicate_asset_names(record)?;
		let reserved = extract_reserved(record)?;
		last_cursor = Some(reserved.cursor.clone());

		let mut primary_key_filter: HashMap<String, Value> = HashMap::new();
		if let Some(v) = record.get("id") {
			primary_key_filter.insert("id".to_string(), v.clone());
		}

		let local_info = storage
			.get_info_by_primary_key_or_gid(
				table,
				Some(&reserved.gid),
				&primary_key_filter,
			)
			.await
			.map_err(Error::Storage)?;

		let is_exist = local_info.is_some();
		let local_log = local_info.as_ref().map(|i| i.log.clone());
		let cloud_log = reserved.to_log_info(0);

		let op = context.strategy.tag(is_exist, local_log.as_ref(), &cloud_log);

		let mut tagged_record = record.clone();

		if !asset_fields.is_empty() && !reserved.deleted {
			let empty = VBucket::new();
			let local_assets_bucket = local_info
				.as_ref()
				.map(|i| {
					let mut v = VBucket::new();
					for (field, assets) in &i.assets {
						v.insert(field.clone(), Value::Assets(assets.clone()));
					}
					v
				})
				.unwrap_or(empty);

			let diff = tag_assets(&mut tagged_record, &local_assets_bucket, &asset_fields, false);

			for (field, ops) in diff {
				for op_entry in ops {
					let pending = PendingAssetDownload {
						table: table.to_string(),
						gid: reserved.gid.clone(),
						primary_key: primary_key_filter.values().cloned().collect(),
						field: field.clone(),
						assets: vec![op_entry.asset],
					};
					let completing = matches!(op, OpType::Delete);
					context.push_download(pending, completing).await;
				}
			}
		}

		if matches!(op, OpType::NotHandle | OpType::OnlyUpdateGid | OpType::ClearGidFlag) {
			if let Some(info) = &local_info {
				context
					.snapshot_assets_info(table, &reserved.gid, info.assets.clone())
					.await;
			}
		}

		if let Some(change_type) = op.change_type() {
			let key: Vec<Value> = if primary_key_filter.is_empty() {
				vec![Value::Text(reserved.gid.clone())]
			} else {
				primary_key_filter.values().cloned().collect()
			};
			changed.push(change_type, key);
		}

		batch.records.push(TaggedRecord {
			data: tagged_record,
			op,
		});
	}

	debug_assert_eq!(batch.records.len(), data.len());

	Ok((batch, changed, last_cursor))
}

/// Post-download reconciliation: calls `cloudDb.download` for
/// each queued entry, then `storageProxy.fillCloudAssetForDownload` with
/// the reconciled per-field success/failure split.
async fn reconcile_asset_downloads(
	table: &str,
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
) -> Result<()> {
	let (download_list, complete_list) = context.take_asset_download_list().await;

	for (gid, pendings) in download_list.into_iter().chain(complete_list) {
		for pending in pendings {
			let mut assets_by_field: HashMap<String, Vec<crate::types::Asset>> = HashMap::new();
			assets_by_field.insert(pending.field.clone(), pending.assets.clone());

			cloud_db
				.download(table, &gid, &pending.primary_key, &mut assets_by_field)
				.await
				.map_err(|e| Error::Cloud(e.to_string()))?;

			for (field, assets) in assets_by_field {
				for asset in assets {
					let is_success = match asset.status {
						crate::types::AssetStatus::Normal => true,
						crate::types::AssetStatus::Abnormal => false,
						crate::types::AssetStatus::Downloading => {
							tracing::error!(
								table,
								gid,
								field,
								"asset still Downloading after cloudDb.download returned"
							);
							false
						}
						_ => true,
					};

					storage
						.fill_cloud_asset_for_download(table, &gid, &field, is_success)
						.await
						.map_err(Error::Storage)?;
				}
			}
		}
	}

	Ok(())
}
