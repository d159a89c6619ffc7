//! Upload Pipeline.

use std::sync::Arc;

use crate::{
	asset_tagger::tag_assets,
	context::Context,
	error::{ErrCode, Error, Result},
	interfaces::{DynCloudDb, DynStorageProxy, FillOp},
	notifier::{DirectionInfo, Notifier, ProcessUpdate},
	task::TaskInfo,
	types::{reserved_fields as rf, UploadBatch, UploadGroup, VBucket, Value, CLOUD_TIME_SCALE},
};

async fn notify_upload(
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
			ProcessUpdate::Upload {
				table: table.to_string(),
				info,
			},
			notify_when_error,
		)
		.await;
}

/// Per-table upload loop: paged local reads, asset tagging, one transaction
/// per batch, cloud writes, watermark advance, notify.
pub async fn upload_table(
	table: &str,
	task: &Arc<tokio::sync::Mutex<TaskInfo>>,
	context: &Context,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
	notifier: &Arc<Notifier>,
) -> Result<()> {
	if !context.strategy.judge_upload() {
		return Ok(());
	}

	let force_full = context.strategy.force_full_upload();
	let water_mark = if force_full {
		0
	} else {
		storage.get_local_water_mark(table).await.map_err(Error::Storage)?
	};

	let total = storage
		.get_upload_count(table, water_mark)
		.await
		.map_err(Error::Storage)?;

	if total == 0 {
		notifier
			.notify(
				&*task.lock().await,
				ProcessUpdate::TableFinished {
					table: table.to_string(),
				},
				false,
			)
			.await;
		return Ok(());
	}

	let asset_fields = context.asset_fields(table).await;
	let mut scratch_water_mark = water_mark;
	let mut batch_index: u32 = 0;
	let mut token: Option<String> = None;
	let mut processed: u64 = 0;

	loop {
		let mut batch = UploadBatch::default();
		let status = match &token {
			Some(tok) => storage
				.get_cloud_data_next(tok, &mut batch)
				.await
				.map_err(Error::Storage)?,
			None => storage
				.get_cloud_data(table, water_mark, &mut token, &mut batch)
				.await
				.map_err(Error::Storage)?,
		};

		// getCloudData(Next) reports Ok for the final page, Unfinished when a
		// continuation token must be used for the next page; any other
		// status is a storage-proxy contract violation.
		if !matches!(status, ErrCode::Ok | ErrCode::Unfinished) {
			return Err(Error::Internal(format!(
				"storage proxy returned unexpected status {status:?} from getCloudData"
			)));
		}

		let batch_len = batch.ins_data.len() + batch.upd_data.len() + batch.del_data.len();

		if batch_len == 0 {
			if status == ErrCode::Ok {
				break;
			}
			continue;
		}

		batch_index += 1;

		tag_upload_assets(&mut batch, context, table, &asset_fields).await;
		update_scratch_water_mark(&mut scratch_water_mark, &batch);
		rewrite_time_fields(&mut batch);

		storage.start_transaction().await.map_err(Error::Storage)?;

		match apply_batch(table, &mut batch, cloud_db, storage).await {
			Ok((success, fail)) => {
				storage.commit().await.map_err(Error::Storage)?;

				if !force_full {
					storage
						.put_local_water_mark(table, scratch_water_mark)
						.await
						.map_err(Error::Storage)?;
				}

				processed += success + fail;

				notify_upload(
					notifier,
					task,
					table,
					DirectionInfo {
						batch_index,
						total,
						success_count: success,
						fail_count: fail,
					},
					fail > 0,
				)
				.await;
			}
			Err(e) => {
				storage.rollback().await.map_err(Error::Storage)?;
				notify_upload(
					notifier,
					task,
					table,
					DirectionInfo {
						batch_index,
						total,
						success_count: 0,
						fail_count: batch_len as u64,
					},
					true,
				)
				.await;
				if let Some(tok) = &token {
					let _ = storage.release_continue_token(tok).await;
				}
				return Err(e);
			}
		}

		if status == ErrCode::Ok {
			if let Some(tok) = &token {
				storage.release_continue_token(tok).await.map_err(Error::Storage)?;
			}
			break;
		}
	}

	if processed >= total {
		notifier
			.notify(
				&*task.lock().await,
				ProcessUpdate::TableFinished {
					table: table.to_string(),
				},
				false,
			)
			.await;
	}

	Ok(())
}

/// Diffs local assets against the last known cloud-side snapshot (captured
/// during the download pass for rows tagged NotHandle / OnlyUpdateGid /
/// ClearGidFlag) and folds the result into each record in place. Delete
/// groups carry no asset payload upstream.
async fn tag_upload_assets(batch: &mut UploadBatch, context: &Context, table: &str, asset_fields: &[String]) {
	if asset_fields.is_empty() {
		return;
	}
	tag_upload_group(&mut batch.ins_data, context, table, asset_fields).await;
	tag_upload_group(&mut batch.upd_data, context, table, asset_fields).await;
}

async fn tag_upload_group(group: &mut UploadGroup, context: &Context, table: &str, asset_fields: &[String]) {
	for (record, extend) in group.records.iter_mut().zip(group.extends.iter()) {
		let gid = extend.get(rf::GID).and_then(Value::as_str).unwrap_or_default();

		let previous = if gid.is_empty() {
			VBucket::new()
		} else {
			match context.assets_info(table, gid).await {
				Some(assets) => {
					let mut v = VBucket::new();
					for (field, list) in assets {
						v.insert(field, Value::Assets(list));
					}
					v
				}
				None => VBucket::new(),
			}
		};

		tag_assets(record, &previous, asset_fields, true);
	}
}

/// Tracks the highest local modify time present in any group of a batch;
/// used as the next local watermark.
fn update_scratch_water_mark(mark: &mut u64, batch: &UploadBatch) {
	for group in [&batch.ins_data, &batch.upd_data, &batch.del_data] {
		for extend in &group.extends {
			if let Some(Value::Int(modify_time)) = extend.get(rf::MODIFY_TIME) {
				if *modify_time > 0 {
					*mark = (*mark).max(*modify_time as u64);
				}
			}
		}
	}
}

/// Rewrites `#_createTime`/`#_modifyTime` into the cloud's wire scale
///.
fn rewrite_time_fields(batch: &mut UploadBatch) {
	for group in [&mut batch.ins_data, &mut batch.upd_data, &mut batch.del_data] {
		for extend in &mut group.extends {
			if let Some(Value::Int(t)) = extend.get(rf::CREATE_TIME) {
				let scaled = t * CLOUD_TIME_SCALE;
				extend.insert(rf::CREATE_TIME.to_string(), Value::Int(scaled));
			}
			if let Some(Value::Int(t)) = extend.get(rf::MODIFY_TIME) {
				let scaled = t * CLOUD_TIME_SCALE;
				extend.insert(rf::MODIFY_TIME.to_string(), Value::Int(scaled));
			}
		}
	}
}

/// Issues delete, then insert, then update, reconciling cloud-assigned gids
/// and asset status back to local storage after insert/update. Returns (success, fail) counts across all three groups.
async fn apply_batch(
	table: &str,
	batch: &mut UploadBatch,
	cloud_db: &DynCloudDb,
	storage: &DynStorageProxy,
) -> Result<(u64, u64)> {
	let mut success: u64 = 0;
	let mut fail: u64 = 0;

	if !batch.del_data.is_empty() {
		let len = batch.del_data.len();
		let info = cloud_db
			.batch_delete(table, &mut batch.del_data.extends)
			.await
			.map_err(|e| Error::Cloud(e.to_string()))?;
		success += info.success_count as u64;
		fail += (len - info.success_count) as u64;
	}

	if !batch.ins_data.is_empty() {
		let len = batch.ins_data.len();
		let info = cloud_db
			.batch_insert(table, &batch.ins_data.records, &mut batch.ins_data.extends)
			.await
			.map_err(|e| Error::Cloud(e.to_string()))?;
		success += info.success_count as u64;
		fail += (len - info.success_count) as u64;
		storage
			.fill_cloud_gid_and_asset(table, FillOp::Insert, batch)
			.await
			.map_err(Error::Storage)?;
	}

	if !batch.upd_data.is_empty() {
		let len = batch.upd_data.len();
		let info = cloud_db
			.batch_update(table, &batch.upd_data.records, &mut batch.upd_data.extends)
			.await
			.map_err(|e| Error::Cloud(e.to_string()))?;
		success += info.success_count as u64;
		fail += (len - info.success_count) as u64;
		storage
			.fill_cloud_gid_and_asset(table, FillOp::Update, batch)
			.await
			.map_err(Error::Storage)?;
	}

	Ok((success, fail))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn time_fields_scale_by_cloud_time_scale() {
		let mut batch = UploadBatch::default();
		let mut extend = std::collections::HashMap::new();
		extend.insert(rf::MODIFY_TIME.to_string(), Value::Int(7));
		batch.ins_data.records.push(VBucket::new());
		batch.ins_data.extends.push(extend);

		rewrite_time_fields(&mut batch);

		assert_eq!(
			batch.ins_data.extends[0].get(rf::MODIFY_TIME),
			Some(&Value::Int(7 * CLOUD_TIME_SCALE))
		);
	}

	#[test]
	fn scratch_water_mark_tracks_max_modify_time() {
		let mut batch = UploadBatch::default();
		for t in [5_i64, 20, 3] {
			let mut extend = std::collections::HashMap::new();
			extend.insert(rf::MODIFY_TIME.to_string(), Value::Int(t));
			batch.upd_data.records.push(VBucket::new());
			batch.upd_data.extends.push(extend);
		}

		let mut mark = 0_u64;
		update_scratch_water_mark(&mut mark, &batch);
		assert_eq!(mark, 20);
	}
}
