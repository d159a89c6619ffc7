//! Strategy Engine.

use crate::{
	task::SyncMode,
	types::{LogInfo, OpType},
};

/// A `Strategy` is selected at task start by `mode` and owns `tag` plus
/// two predicates governing whether the upload pipeline runs and whether
/// the cloud watermark may be advanced.
pub trait Strategy: Send + Sync {
	fn tag(&self, is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType;
	fn judge_upload(&self) -> bool;
	fn judge_update_cursor(&self) -> bool;
	/// Whether the download loop mutates local data at all, vs. running
	/// only to drain/align the cloud watermark (`ForcePush`/`PushOnly`).
	fn judge_download(&self) -> bool {
		true
	}
	/// Whether the upload pipeline should ignore the stored local watermark
	/// and re-upload every row.
	fn force_full_upload(&self) -> bool {
		false
	}
}

/// Shared tagging logic for Merge, ForcePull, PullOnly, and PushPull, which
/// all resolve conflicts the same way and differ only in their upload /
/// cursor predicates.
fn merge_tag(is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType {
	let Some(local) = (if is_exist { local } else { None }) else {
		return OpType::Insert;
	};

	match (local.is_deleted(), cloud.is_deleted()) {
		(false, true) => OpType::Delete,
		(true, false) => OpType::Update,
		(true, true) => OpType::OnlyUpdateGid,
		(false, false) => {
			if local.timestamp == cloud.timestamp
				&& local.w_timestamp == cloud.w_timestamp
				&& local.cloud_gid == cloud.cloud_gid
			{
				OpType::NotHandle
			} else {
				OpType::Update
			}
		}
	}
}

#[derive(Debug, Default)]
pub struct Merge;

impl Strategy for Merge {
	fn tag(&self, is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType {
		merge_tag(is_exist, local, cloud)
	}
	fn judge_upload(&self) -> bool {
		true
	}
	fn judge_update_cursor(&self) -> bool {
		true
	}
}

/// General bidirectional case; `Merge` is its historical alias.
#[derive(Debug, Default)]
pub struct PushPull;

impl Strategy for PushPull {
	fn tag(&self, is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType {
		merge_tag(is_exist, local, cloud)
	}
	fn judge_upload(&self) -> bool {
		true
	}
	fn judge_update_cursor(&self) -> bool {
		true
	}
}

/// Behaves like Merge but uploads nothing.
#[derive(Debug, Default)]
pub struct ForcePull;

impl Strategy for ForcePull {
	fn tag(&self, is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType {
		merge_tag(is_exist, local, cloud)
	}
	fn judge_upload(&self) -> bool {
		false
	}
	fn judge_update_cursor(&self) -> bool {
		true
	}
}

/// Downloads fully (with deletions) but never uploads.
#[derive(Debug, Default)]
pub struct PullOnly;

impl Strategy for PullOnly {
	fn tag(&self, is_exist: bool, local: Option<&LogInfo>, cloud: &LogInfo) -> OpType {
		merge_tag(is_exist, local, cloud)
	}
	fn judge_upload(&self) -> bool {
		false
	}
	fn judge_update_cursor(&self) -> bool {
		true
	}
}

/// Never downloads data changes (the download loop still runs to drain
/// queries for watermark alignment when configured), always uploads. This
/// crate resolves "when configured" as "never"; see DESIGN.md.
#[derive(Debug, Default)]
pub struct ForcePush;

impl Strategy for ForcePush {
	fn tag(&self, _is_exist: bool, _local: Option<&LogInfo>, _cloud: &LogInfo) -> OpType {
		OpType::NotHandle
	}
	fn judge_upload(&self) -> bool {
		true
	}
	fn judge_update_cursor(&self) -> bool {
		false
	}
	fn judge_download(&self) -> bool {
		false
	}
	fn force_full_upload(&self) -> bool {
		true
	}
}

/// Skips the download loop's mutation entirely; only upload watermark
/// bookkeeping applies.
#[derive(Debug, Default)]
pub struct PushOnly;

impl Strategy for PushOnly {
	fn tag(&self, _is_exist: bool, _local: Option<&LogInfo>, _cloud: &LogInfo) -> OpType {
		OpType::NotHandle
	}
	fn judge_upload(&self) -> bool {
		true
	}
	fn judge_update_cursor(&self) -> bool {
		false
	}
	fn judge_download(&self) -> bool {
		false
	}
}

pub fn strategy_for_mode(mode: SyncMode) -> Box<dyn Strategy> {
	match mode {
		SyncMode::Merge => Box::new(Merge),
		SyncMode::PushPull => Box::new(PushPull),
		SyncMode::ForcePull => Box::new(ForcePull),
		SyncMode::PullOnly => Box::new(PullOnly),
		SyncMode::ForcePush => Box::new(ForcePush),
		SyncMode::PushOnly => Box::new(PushOnly),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn log(timestamp: i64, w_timestamp: i64, deleted: bool, gid: &str) -> LogInfo {
		let mut l = LogInfo {
			timestamp,
			w_timestamp,
			data_key: 1,
			cloud_gid: gid.to_string(),
			..Default::default()
		};
		l.set_deleted(deleted);
		l
	}

	#[test]
	fn merge_inserts_when_not_exist() {
		let cloud = log(10, 10, false, "g1");
		assert_eq!(Merge.tag(false, None, &cloud), OpType::Insert);
	}

	#[test]
	fn merge_deletes_when_cloud_deleted() {
		let local = log(10, 10, false, "");
		let cloud = log(20, 10, true, "g1");
		assert_eq!(Merge.tag(true, Some(&local), &cloud), OpType::Delete);
	}

	#[test]
	fn merge_updates_when_local_deleted() {
		let local = log(10, 10, true, "");
		let cloud = log(20, 10, false, "g1");
		assert_eq!(Merge.tag(true, Some(&local), &cloud), OpType::Update);
	}

	#[test]
	fn merge_only_updates_gid_when_both_deleted() {
		let local = log(10, 10, true, "");
		let cloud = log(20, 10, true, "g1");
		assert_eq!(Merge.tag(true, Some(&local), &cloud), OpType::OnlyUpdateGid);
	}

	#[test]
	fn merge_not_handle_when_identical() {
		let local = log(10, 5, false, "g1");
		let cloud = log(10, 5, false, "g1");
		assert_eq!(Merge.tag(true, Some(&local), &cloud), OpType::NotHandle);
	}

	#[test]
	fn merge_updates_otherwise() {
		let local = log(10, 5, false, "g1");
		let cloud = log(20, 5, false, "g1");
		assert_eq!(Merge.tag(true, Some(&local), &cloud), OpType::Update);
	}

	#[test]
	fn force_pull_never_uploads() {
		assert!(!ForcePull.judge_upload());
		assert!(ForcePull.judge_update_cursor());
	}

	#[test]
	fn force_push_always_uploads_never_updates_cursor() {
		assert!(ForcePush.judge_upload());
		assert!(!ForcePush.judge_update_cursor());
	}
}
