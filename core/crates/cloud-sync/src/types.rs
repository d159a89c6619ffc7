//! Record and watermark data model.

use std::collections::HashMap;

/// Reserved field names every cloud record must carry.
pub mod reserved_fields {
	pub const GID: &str = "#_gid";
	pub const CREATE_TIME: &str = "#_createTime";
	pub const MODIFY_TIME: &str = "#_modifyTime";
	pub const DELETED: &str = "#_deleted";
	pub const CURSOR: &str = "#_cursor";
}

/// The wire scale factor between the cloud's stored time units and the
/// local microsecond-ish unit the storage proxy works in.
pub const CLOUD_TIME_SCALE: i64 = 10_000;

/// One column value in a [`VBucket`]. Ten variants: the nine named in the
/// original plus `Nil`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Nil,
	Int(i64),
	Double(f64),
	Bool(bool),
	Text(String),
	Bytes(Vec<u8>),
	Asset(Asset),
	Assets(Vec<Asset>),
}

impl Value {
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Text(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(v) => Some(*v),
			_ => None,
		}
	}

	pub fn kind(&self) -> FieldKind {
		match self {
			Self::Nil => FieldKind::Nil,
			Self::Int(_) => FieldKind::Int,
			Self::Double(_) => FieldKind::Float,
			Self::Bool(_) => FieldKind::Bool,
			Self::Text(_) => FieldKind::String,
			Self::Bytes(_) => FieldKind::Bytes,
			Self::Asset(_) => FieldKind::Asset,
			Self::Assets(_) => FieldKind::Assets,
		}
	}
}

/// Broad field type used by the schema manager.
/// `Nil` is not a declared column kind; it is the wildcard value that is
/// always compatible with a nullable field of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
	Nil,
	Int,
	Float,
	String,
	Bytes,
	Bool,
	Asset,
	Assets,
}

/// Ordered column-name -> tagged-value mapping representing one record on
/// the wire. Insertion order is not semantically significant so
/// this is backed by a plain map rather than preserving iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VBucket {
	fields: HashMap<String, Value>,
}

impl VBucket {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.fields.get(name)
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
		self.fields.get_mut(name)
	}

	pub fn insert(&mut self, name: impl Into<String>, value: Value) {
		self.fields.insert(name.into(), value);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.fields.contains_key(name)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.fields.iter()
	}

	pub fn field_names(&self) -> impl Iterator<Item = &String> {
		self.fields.keys()
	}
}

/// The flag describes the desired operation on an asset; the status
/// describes transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFlag {
	NoChange,
	Insert,
	Update,
	Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
	Normal,
	Downloading,
	Abnormal,
	Insert,
	Update,
	Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
	pub name: String,
	pub uri: String,
	pub hash: String,
	pub flag: AssetFlag,
	pub status: AssetStatus,
	pub timestamp: i64,
}

impl Asset {
	/// An asset whose status is `Delete` overrides its flag to `Delete`
	/// regardless of diff outcome.
	pub fn normalize_status_override(&mut self) {
		if self.status == AssetStatus::Delete {
			self.flag = AssetFlag::Delete;
		}
	}
}

/// Per-row bookkeeping, local or cloud-side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogInfo {
	pub timestamp: i64,
	/// Creation time ("w" for "write").
	pub w_timestamp: i64,
	/// Bit 0 = deleted.
	pub flag: u32,
	/// Local row id, empty/0 before first local insert.
	pub data_key: i64,
	/// Cloud global id; empty string if this row was never synced.
	pub cloud_gid: String,
}

impl LogInfo {
	pub fn is_deleted(&self) -> bool {
		self.flag & 0x1 != 0
	}

	pub fn set_deleted(&mut self, deleted: bool) {
		if deleted {
			self.flag |= 0x1;
		} else {
			self.flag &= !0x1;
		}
	}

	pub fn has_synced(&self) -> bool {
		!self.cloud_gid.is_empty()
	}
}

/// Per-record action decided by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
	Insert,
	Update,
	Delete,
	NotHandle,
	OnlyUpdateGid,
	ClearGidFlag,
}

/// The notification-level classification of an [`OpType`]. `NotHandle` produces no `ChangedData` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
	Insert,
	Update,
	Delete,
}

impl OpType {
	pub fn change_type(self) -> Option<ChangeType> {
		match self {
			Self::Insert => Some(ChangeType::Insert),
			Self::Update | Self::OnlyUpdateGid | Self::ClearGidFlag => Some(ChangeType::Update),
			Self::Delete => Some(ChangeType::Delete),
			Self::NotHandle => None,
		}
	}
}

/// One tagged record after the download pipeline has decided its op. The
/// parallel-array shape of the original `DownloadBatch` (`data[]` /
/// `opType[]`) is an implementation artifact; this
/// crate keeps a single array of paired structs instead.
#[derive(Debug, Clone)]
pub struct TaggedRecord {
	pub data: VBucket,
	pub op: OpType,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadBatch {
	pub records: Vec<TaggedRecord>,
}

impl DownloadBatch {
	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}

/// One table's accumulated per-change-type primary key rows for a single
/// notification.
#[derive(Debug, Clone, Default)]
pub struct ChangedData {
	pub table_name: String,
	pub primary_data: HashMap<ChangeType, Vec<Vec<Value>>>,
}

impl ChangedData {
	pub fn new(table_name: impl Into<String>) -> Self {
		Self {
			table_name: table_name.into(),
			primary_data: HashMap::new(),
		}
	}

	pub fn push(&mut self, change: ChangeType, primary_key: Vec<Value>) {
		self.primary_data.entry(change).or_default().push(primary_key);
	}

	pub fn is_empty(&self) -> bool {
		self.primary_data.values().all(Vec::is_empty)
	}
}

/// An upload-direction batch: parallel insert/update/delete groups, each
/// with a record and an "extend" map carrying reserved fields
/// (gid/cursor/deleted) that the cloud DB fills in or requires.
#[derive(Debug, Clone, Default)]
pub struct UploadGroup {
	pub records: Vec<VBucket>,
	pub extends: Vec<HashMap<String, Value>>,
}

impl UploadGroup {
	pub fn len(&self) -> usize {
		debug_assert_eq!(self.records.len(), self.extends.len());
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}

#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
	pub ins_data: UploadGroup,
	pub upd_data: UploadGroup,
	pub del_data: UploadGroup,
}

/// Opaque cursor issued by the cloud, demarcating how much of a table has
/// been observed.
pub type CloudWaterMark = String;

/// u64 timestamp marking the maximum record modify-time already uploaded
///.
pub type LocalWaterMark = u64;
