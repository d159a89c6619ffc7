//! Per-task context. At most one live per syncer; all
//! fields guarded by a single mutex, one owning structure per concern.

use std::collections::HashMap;

use crate::{
	asset_tagger::AssetOp,
	strategy::Strategy,
	types::{Asset, CloudWaterMark},
};

/// An asset pending download, keyed by (table, gid, field).
#[derive(Debug, Clone)]
pub struct PendingAssetDownload {
	pub table: String,
	pub gid: String,
	pub primary_key: Vec<crate::types::Value>,
	pub field: String,
	pub assets: Vec<Asset>,
}

#[derive(Default)]
struct Inner {
	current_table_name: Option<String>,
	/// Declared asset-bearing field names, by table.
	asset_fields_by_table: HashMap<String, Vec<String>>,
	/// Snapshot of a record's assets for rows tagged NotHandle /
	/// OnlyUpdateGid / ClearGidFlag, keyed by (table, gid), used later by
	/// upload tagging.
	assets_info_by_table: HashMap<String, HashMap<String, HashMap<String, Vec<Asset>>>>,
	/// Assets queued for download/completion, keyed by gid.
	asset_download_list: HashMap<String, Vec<PendingAssetDownload>>,
	complete_download_list: HashMap<String, Vec<PendingAssetDownload>>,
	cloud_water_marks_by_table: HashMap<String, CloudWaterMark>,
}

/// Created at task start, cleared at task end.
pub struct Context {
	pub current_task_id: u64,
	pub strategy: Box<dyn Strategy>,
	inner: tokio::sync::Mutex<Inner>,
}

impl Context {
	pub fn new(task_id: u64, strategy: Box<dyn Strategy>) -> Self {
		Self {
			current_task_id: task_id,
			strategy,
			inner: tokio::sync::Mutex::new(Inner::default()),
		}
	}

	pub async fn set_current_table(&self, table: &str) {
		self.inner.lock().await.current_table_name = Some(table.to_string());
	}

	pub async fn set_asset_fields(&self, table: &str, fields: Vec<String>) {
		self.inner
			.lock()
			.await
			.asset_fields_by_table
			.insert(table.to_string(), fields);
	}

	pub async fn asset_fields(&self, table: &str) -> Vec<String> {
		self.inner
			.lock()
			.await
			.asset_fields_by_table
			.get(table)
			.cloned()
			.unwrap_or_default()
	}

	pub async fn snapshot_assets_info(
		&self,
		table: &str,
		gid: &str,
		assets: HashMap<String, Vec<Asset>>,
	) {
		self.inner
			.lock()
			.await
			.assets_info_by_table
			.entry(table.to_string())
			.or_default()
			.insert(gid.to_string(), assets);
	}

	pub async fn assets_info(&self, table: &str, gid: &str) -> Option<HashMap<String, Vec<Asset>>> {
		self.inner
			.lock()
			.await
			.assets_info_by_table
			.get(table)
			.and_then(|m| m.get(gid))
			.cloned()
	}

	pub async fn push_download(&self, pending: PendingAssetDownload, completing: bool) {
		let mut guard = self.inner.lock().await;
		let map = if completing {
			&mut guard.complete_download_list
		} else {
			&mut guard.asset_download_list
		};
		map.entry(pending.gid.clone()).or_default().push(pending);
	}

	pub async fn take_asset_download_list(
		&self,
	) -> (
		HashMap<String, Vec<PendingAssetDownload>>,
		HashMap<String, Vec<PendingAssetDownload>>,
	) {
		let mut guard = self.inner.lock().await;
		(
			std::mem::take(&mut guard.asset_download_list),
			std::mem::take(&mut guard.complete_download_list),
		)
	}

	pub async fn set_cloud_water_mark(&self, table: &str, mark: CloudWaterMark) {
		self.inner
			.lock()
			.await
			.cloud_water_marks_by_table
			.insert(table.to_string(), mark);
	}

	pub async fn cloud_water_mark(&self, table: &str) -> Option<CloudWaterMark> {
		self.inner
			.lock()
			.await
			.cloud_water_marks_by_table
			.get(table)
			.cloned()
	}
}

/// Grouping type returned by the asset tagger when invoked from the
/// pipelines; kept here so download/upload modules share one name.
pub type AssetDiff = HashMap<String, Vec<AssetOp>>;
