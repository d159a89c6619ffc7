//! Bidirectional cloud sync engine for a single local store.
//!
//! The crate owns the task queue, the download/upload state machines, the
//! asset diffing algorithm, the heartbeat/lock protocol and the schema
//! checker. It never touches a concrete transport or on-disk format itself;
//! callers plug those in through [`CloudDb`] and [`StorageProxy`].

mod asset_tagger;
mod config;
mod context;
mod download;
mod driver;
mod error;
mod heartbeat;
mod interfaces;
mod notifier;
mod queue;
mod reserved;
mod schema;
mod strategy;
mod task;
mod types;
mod upload;

pub use config::SyncerConfig;
pub use error::{ErrCode, Error, Result};
pub use interfaces::{
	BatchInfo, CleanMode, CloudDatabaseSchema, CloudDb, CloudDbStatus, CloudTableSchema, CollabError,
	ColumnDescriptor, DynCloudDb, DynStorageProxy, FillOp, LocalRecordInfo, RuntimeContext, StorageProxy,
};
pub use notifier::{DirectionInfo, ProcessUpdate, SyncProcess, TableProcess, TableStatus};
pub use queue::CloudSyncer;
pub use schema::check_schema;
pub use task::{SyncCallback, SyncMode, TaskInfo, TaskStatus};
pub use types::{
	reserved_fields, Asset, AssetFlag, AssetStatus, ChangeType, ChangedData, CloudWaterMark, DownloadBatch,
	FieldKind, LocalWaterMark, LogInfo, OpType, TaggedRecord, UploadBatch, UploadGroup, VBucket, Value,
	CLOUD_TIME_SCALE,
};
