//! Asset Tagger: per-field Asset/Assets diff producing an
//! `AssetOp` list and mutating the "covered" side in place.

use std::collections::{HashMap, HashSet};

use crate::types::{Asset, AssetFlag, AssetStatus, Value};

#[derive(Debug, Clone)]
pub struct AssetOp {
	pub field: String,
	pub asset: Asset,
}

/// Diffs a single record pair for one field's worth of assets. `covered`
/// is the side whose operation dominates (cloud side on download; local
/// side on upload); `be_covered` is the other side. Returns the list of
/// asset changes for this field and mutates `covered` in place so a
/// downstream save can record tombstones for list-typed fields.
fn tag_single_asset_field(
	covered: &mut Option<Asset>,
	be_covered: &Option<Asset>,
	set_normal_status: bool,
) -> Vec<Asset> {
	let status = if set_normal_status {
		AssetStatus::Normal
	} else {
		AssetStatus::Downloading
	};

	let mut out = Vec::new();

	match (covered.as_mut(), be_covered.as_ref()) {
		(None, None) => {}
		(Some(c), None) => {
			c.flag = AssetFlag::Insert;
			c.status = status;
			c.normalize_status_override();
			out.push(c.clone());
		}
		(None, Some(b)) => {
			let mut deleted = b.clone();
			deleted.flag = AssetFlag::Delete;
			deleted.status = status;
			deleted.normalize_status_override();
			out.push(deleted);
		}
		(Some(c), Some(b)) => {
			if c.name == b.name {
				if c.hash != b.hash {
					c.flag = AssetFlag::Update;
					c.status = status;
					c.normalize_status_override();
					out.push(c.clone());
				}
				// same name, same hash: no change.
			} else {
				let mut deleted = b.clone();
				deleted.flag = AssetFlag::Delete;
				deleted.status = status;
				deleted.normalize_status_override();

				c.flag = AssetFlag::Insert;
				c.status = status;
				c.normalize_status_override();

				out.push(c.clone());
				out.push(deleted);
			}
		}
	}

	out
}

/// Diffs a list-typed asset field. Builds a `name -> position` index from
/// `covered`, walks `be_covered` matching names, and appends Delete
/// tombstones for names absent from `covered` so the downstream save can
/// record them.
fn tag_asset_list_field(
	covered: &mut Vec<Asset>,
	be_covered: &[Asset],
	set_normal_status: bool,
) -> Vec<Asset> {
	let status = if set_normal_status {
		AssetStatus::Normal
	} else {
		AssetStatus::Downloading
	};

	let mut index: HashMap<String, usize> = covered
		.iter()
		.enumerate()
		.map(|(i, a)| (a.name.clone(), i))
		.collect();

	let mut out = Vec::new();
	let mut matched: HashSet<String> = HashSet::new();

	for b in be_covered {
		if let Some(&pos) = index.get(&b.name) {
			matched.insert(b.name.clone());
			let c = &mut covered[pos];
			if c.hash != b.hash {
				c.flag = AssetFlag::Update;
				c.status = status;
				c.normalize_status_override();
				out.push(c.clone());
			} else {
				// same name, same hash: no change, but still tracked for status.
				let mut unchanged = c.clone();
				unchanged.flag = AssetFlag::NoChange;
				unchanged.status = status;
				out.push(unchanged);
			}
			index.remove(&b.name);
		} else {
			let mut deleted = b.clone();
			deleted.flag = AssetFlag::Delete;
			deleted.status = status;
			deleted.normalize_status_override();
			out.push(deleted.clone());
			covered.push(deleted);
		}
	}

	for (_, pos) in index {
		let c = &mut covered[pos];
		c.flag = AssetFlag::Insert;
		c.status = status;
		c.normalize_status_override();
		out.push(c.clone());
	}

	out
}

/// Diffs every declared asset-bearing field between `covered` and
/// `be_covered`, mutating `covered`'s field values in place. Returns the
/// map of per-field change lists. Non-asset fields and fields not present
/// in `asset_fields` are untouched.
pub fn tag_assets(
	covered: &mut crate::types::VBucket,
	be_covered: &crate::types::VBucket,
	asset_fields: &[String],
	set_normal_status: bool,
) -> HashMap<String, Vec<Asset>> {
	let mut result = HashMap::new();

	for field in asset_fields {
		let c_val = covered.get(field).cloned();
		let b_val = be_covered.get(field).cloned();

		match (c_val, b_val) {
			(Some(Value::Assets(mut c_list)), maybe_b) => {
				let b_list = match maybe_b {
					Some(Value::Assets(b)) => b,
					_ => Vec::new(),
				};
				let ops = tag_asset_list_field(&mut c_list, &b_list, set_normal_status);
				covered.insert(field.clone(), Value::Assets(c_list));
				if !ops.is_empty() {
					result.insert(field.clone(), ops);
				}
			}
			(c_single, maybe_b) => {
				let mut c_asset = match c_single {
					Some(Value::Asset(a)) => Some(a),
					_ => None,
				};
				let b_asset = match maybe_b {
					Some(Value::Asset(a)) => Some(a),
					_ => None,
				};

				let ops = tag_single_asset_field(&mut c_asset, &b_asset, set_normal_status);

				if let Some(a) = c_asset {
					covered.insert(field.clone(), Value::Asset(a));
				}
				if !ops.is_empty() {
					result.insert(field.clone(), ops);
				}
			}
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;

	fn asset(name: &str, hash: &str) -> Asset {
		Asset {
			name: name.to_string(),
			uri: String::new(),
			hash: hash.to_string(),
			flag: AssetFlag::NoChange,
			status: AssetStatus::Normal,
			timestamp: 0,
		}
	}

	#[test]
	fn single_asset_insert_only_on_covered() {
		let mut covered = Some(asset("a", "h1"));
		let be_covered = None;
		let ops = tag_single_asset_field(&mut covered, &be_covered, true);
		assert_eq!(ops.len(), 1);
		assert_eq!(ops[0].flag, AssetFlag::Insert);
	}

	#[test]
	fn single_asset_delete_only_on_be_covered() {
		let mut covered = None;
		let be_covered = Some(asset("a", "h1"));
		let ops = tag_single_asset_field(&mut covered, &be_covered, true);
		assert_eq!(ops.len(), 1);
		assert_eq!(ops[0].flag, AssetFlag::Delete);
	}

	#[test]
	fn single_asset_same_name_same_hash_no_change() {
		let mut covered = Some(asset("a", "h1"));
		let be_covered = Some(asset("a", "h1"));
		let ops = tag_single_asset_field(&mut covered, &be_covered, true);
		assert!(ops.is_empty());
	}

	#[test]
	fn single_asset_same_name_diff_hash_update() {
		let mut covered = Some(asset("a", "h2"));
		let be_covered = Some(asset("a", "h1"));
		let ops = tag_single_asset_field(&mut covered, &be_covered, false);
		assert_eq!(ops.len(), 1);
		assert_eq!(ops[0].flag, AssetFlag::Update);
		assert_eq!(ops[0].status, AssetStatus::Downloading);
	}

	#[test]
	fn single_asset_diff_name_insert_and_delete() {
		let mut covered = Some(asset("b", "h2"));
		let be_covered = Some(asset("a", "h1"));
		let ops = tag_single_asset_field(&mut covered, &be_covered, true);
		assert_eq!(ops.len(), 2);
		assert!(ops.iter().any(|a| a.flag == AssetFlag::Insert && a.name == "b"));
		assert!(ops.iter().any(|a| a.flag == AssetFlag::Delete && a.name == "a"));
	}

	#[test]
	fn asset_list_symmetry_when_identical() {
		let mut covered = vec![asset("a", "h1"), asset("b", "h2")];
		let be_covered = covered.clone();
		let ops = tag_asset_list_field(&mut covered, &be_covered, true);
		assert!(ops.iter().all(|o| o.flag == AssetFlag::NoChange));
	}

	#[test]
	fn asset_list_insert_update_delete() {
		// covered has "a" (new) and "b" (changed hash); be_covered has "b" (old hash) and "c" (removed)
		let mut covered = vec![asset("a", "h1"), asset("b", "h2")];
		let be_covered = vec![asset("b", "h1"), asset("c", "h3")];

		let ops = tag_asset_list_field(&mut covered, &be_covered, true);

		assert!(ops.iter().any(|o| o.name == "a" && o.flag == AssetFlag::Insert));
		assert!(ops.iter().any(|o| o.name == "b" && o.flag == AssetFlag::Update));
		assert!(ops.iter().any(|o| o.name == "c" && o.flag == AssetFlag::Delete));
	}

	#[test]
	fn delete_status_override_forces_delete_flag() {
		let mut covered = Some(Asset {
			status: AssetStatus::Delete,
			..asset("a", "h1")
		});
		covered.as_mut().unwrap().flag = AssetFlag::Update;
		covered.as_mut().unwrap().normalize_status_override();
		assert_eq!(covered.unwrap().flag, AssetFlag::Delete);
	}
}
