//! Plugin contracts the core consumes. Implementations live in
//! the embedding application; this crate never talks to a concrete
//! transport or storage engine directly.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;

use crate::types::{Asset, LogInfo, UploadBatch, VBucket, Value};

/// Status a `CloudDb` call can return, beyond an outright error. `Ok`/`QueryEnd` only matter for `query`; the others are used as
/// described per-method below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudDbStatus {
	Ok,
	QueryEnd,
}

pub type CollabError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a batch cloud-side mutation: how many of the rows the cloud
/// actually applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchInfo {
	pub success_count: usize,
}

/// The op a `fillCloudGidAndAsset` call is reconciling (upload insert vs
/// update — deletes carry no new gid/asset state to fill in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOp {
	Insert,
	Update,
}

/// The cloud-transport collaborator.
#[async_trait]
pub trait CloudDb: fmt::Debug + Send + Sync {
	/// The cached cloud schema the Schema Manager checks the local table
	/// against at sync start, per table. Implementations are
	/// expected to serve this from a local cache rather than a network
	/// round trip per table.
	async fn schema(&self) -> Result<CloudDatabaseSchema, CollabError>;

	/// Fills each extend with `gid`, `cursor`, `deleted=false`.
	async fn batch_insert(
		&self,
		table: &str,
		records: &[VBucket],
		extends: &mut [HashMap<String, Value>],
	) -> Result<BatchInfo, CollabError>;

	/// Requires `gid` present in each extend; updates `cursor`,
	/// `deleted=false`.
	async fn batch_update(
		&self,
		table: &str,
		records: &[VBucket],
		extends: &mut [HashMap<String, Value>],
	) -> Result<BatchInfo, CollabError>;

	/// Requires `gid`; sets `deleted=true` and a new `cursor`.
	async fn batch_delete(
		&self,
		table: &str,
		extends: &mut [HashMap<String, Value>],
	) -> Result<BatchInfo, CollabError>;

	/// Returns records strictly newer than `extend[cursor]`, up to an
	/// implementation-defined page size. `QueryEnd`'s final page may be
	/// non-empty.
	async fn query(
		&self,
		table: &str,
		extend: &mut HashMap<String, Value>,
		out_data: &mut Vec<VBucket>,
	) -> Result<CloudDbStatus, CollabError>;

	/// Transfers asset bytes; updates each asset's status in place.
	async fn download(
		&self,
		table: &str,
		gid: &str,
		primary_key: &[Value],
		assets: &mut HashMap<String, Vec<Asset>>,
	) -> Result<(), CollabError>;

	async fn lock(&self) -> Result<(CloudDbStatus, u64), CollabError>;
	async fn heartbeat(&self) -> Result<(), CollabError>;
	async fn unlock(&self) -> Result<(), CollabError>;

	/// Used only by `cleanCloudData` when mode is `FlagAndData`.
	async fn remove_local_assets(&self, assets: &[Asset]) -> Result<(), CollabError>;

	async fn close(&self) -> Result<(), CollabError>;
}

/// A declared column.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
	pub name: String,
	pub kind: crate::types::FieldKind,
	pub nullable: bool,
	pub is_primary: bool,
}

/// The cloud schema as cached locally, consumed by the schema manager
///.
#[derive(Debug, Clone, Default)]
pub struct CloudTableSchema {
	pub fields: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct CloudDatabaseSchema {
	pub tables: HashMap<String, CloudTableSchema>,
}

/// How `cleanCloudData` should treat the local rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanMode {
	/// Clears cloud gid/cursor/log metadata but keeps row data.
	CleanLogOnly,
	/// Additionally removes local assets and deletes the local rows.
	FlagAndData,
}

/// Existing local row info located by gid or primary key. `None` means "not exist".
#[derive(Debug, Clone)]
pub struct LocalRecordInfo {
	pub log: LogInfo,
	pub primary_key: Vec<Value>,
	pub assets: HashMap<String, Vec<Asset>>,
}

/// The local storage collaborator.
#[async_trait]
pub trait StorageProxy: fmt::Debug + Send + Sync {
	async fn start_transaction(&self) -> Result<(), CollabError>;
	async fn commit(&self) -> Result<(), CollabError>;
	async fn rollback(&self) -> Result<(), CollabError>;

	async fn check_schema(
		&self,
		table: &str,
		cloud_schema: &CloudDatabaseSchema,
	) -> Result<(), CollabError>;

	async fn get_primary_col_names_with_assets_fields(
		&self,
		table: &str,
	) -> Result<(Vec<String>, Vec<String>), CollabError>;

	async fn get_cloud_water_mark(&self, table: &str) -> Result<String, CollabError>;
	async fn set_cloud_water_mark(&self, table: &str, mark: &str) -> Result<(), CollabError>;

	async fn get_local_water_mark(&self, table: &str) -> Result<u64, CollabError>;
	async fn put_local_water_mark(&self, table: &str, mark: u64) -> Result<(), CollabError>;

	async fn get_info_by_primary_key_or_gid(
		&self,
		table: &str,
		gid: Option<&str>,
		primary_key: &HashMap<String, Value>,
	) -> Result<Option<LocalRecordInfo>, CollabError>;

	/// Applies a whole tagged batch inside the caller's open transaction.
	/// Returns the rowIds newly assigned to inserted rows, in the same
	/// order as the batch's `Insert`-tagged records, so the caller can
	/// backfill rowId-only change entries.
	async fn put_cloud_sync_data(
		&self,
		table: &str,
		batch: &crate::types::DownloadBatch,
	) -> Result<Vec<i64>, CollabError>;

	async fn get_upload_count(&self, table: &str, water_mark: u64) -> Result<u64, CollabError>;

	async fn get_cloud_data(
		&self,
		table: &str,
		water_mark: u64,
		token: &mut Option<String>,
		out_batch: &mut UploadBatch,
	) -> Result<crate::error::ErrCode, CollabError>;

	async fn get_cloud_data_next(
		&self,
		token: &str,
		out_batch: &mut UploadBatch,
	) -> Result<crate::error::ErrCode, CollabError>;

	async fn release_continue_token(&self, token: &str) -> Result<(), CollabError>;

	async fn fill_cloud_gid_and_asset(
		&self,
		table: &str,
		op: FillOp,
		batch: &UploadBatch,
	) -> Result<(), CollabError>;

	async fn fill_cloud_asset_for_download(
		&self,
		table: &str,
		gid: &str,
		field: &str,
		is_success: bool,
	) -> Result<(), CollabError>;

	async fn notify_changed_data(
		&self,
		changed: &crate::types::ChangedData,
	) -> Result<(), CollabError>;

	/// Every asset currently attached to `table`'s rows, for `cleanCloudData`
	/// to hand to `CloudDb::remove_local_assets` under `FlagAndData` (spec
	/// §2 supplement).
	async fn list_local_assets(&self, table: &str) -> Result<Vec<Asset>, CollabError>;

	async fn clean_cloud_data(&self, table: &str, mode: CleanMode) -> Result<(), CollabError>;

	async fn close(&self) -> Result<(), CollabError>;
}

/// Handle used to spawn background work (driver runs, heartbeat ticks,
/// callback delivery) instead of a process-wide singleton executor — the
/// caller hands in a runtime handle at construction.
#[derive(Clone)]
pub struct RuntimeContext {
	handle: tokio::runtime::Handle,
}

impl fmt::Debug for RuntimeContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RuntimeContext").finish_non_exhaustive()
	}
}

impl RuntimeContext {
	pub fn current() -> Self {
		Self {
			handle: tokio::runtime::Handle::current(),
		}
	}

	pub fn new(handle: tokio::runtime::Handle) -> Self {
		Self { handle }
	}

	pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
	where
		F: std::future::Future + Send + 'static,
		F::Output: Send + 'static,
	{
		self.handle.spawn(fut)
	}
}

pub type DynCloudDb = Arc<dyn CloudDb>;
pub type DynStorageProxy = Arc<dyn StorageProxy>;
