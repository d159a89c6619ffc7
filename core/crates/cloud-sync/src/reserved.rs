//! Validation of the five reserved cloud record fields.

use crate::{
	error::{Error, Result},
	types::{reserved_fields as rf, LogInfo, Value, VBucket},
};

#[derive(Debug, Clone)]
pub struct ReservedFields {
	pub gid: String,
	pub create_time: i64,
	pub modify_time: i64,
	pub deleted: bool,
	pub cursor: String,
}

/// Validates that `record` contains the five reserved fields with their
/// exact expected types; any deviation is a hard `CloudError`.
pub fn extract_reserved(record: &VBucket) -> Result<ReservedFields> {
	let gid = match record.get(rf::GID) {
		Some(Value::Text(s)) => s.clone(),
		Some(_) => return Err(type_mismatch(rf::GID, "string")),
		None => return Err(missing(rf::GID)),
	};

	let create_time = match record.get(rf::CREATE_TIME) {
		Some(Value::Int(i)) => *i,
		Some(_) => return Err(type_mismatch(rf::CREATE_TIME, "i64")),
		None => return Err(missing(rf::CREATE_TIME)),
	};

	let modify_time = match record.get(rf::MODIFY_TIME) {
		Some(Value::Int(i)) => *i,
		Some(_) => return Err(type_mismatch(rf::MODIFY_TIME, "i64")),
		None => return Err(missing(rf::MODIFY_TIME)),
	};

	let deleted = match record.get(rf::DELETED) {
		Some(Value::Bool(b)) => *b,
		Some(_) => return Err(type_mismatch(rf::DELETED, "bool")),
		None => return Err(missing(rf::DELETED)),
	};

	let cursor = match record.get(rf::CURSOR) {
		Some(Value::Text(s)) => s.clone(),
		Some(_) => return Err(type_mismatch(rf::CURSOR, "string")),
		None => return Err(missing(rf::CURSOR)),
	};

	Ok(ReservedFields {
		gid,
		create_time,
		modify_time,
		deleted,
		cursor,
	})
}

fn missing(field: &str) -> Error {
	Error::Cloud(format!("record missing reserved field {field}"))
}

fn type_mismatch(field: &str, expected: &str) -> Error {
	Error::Cloud(format!("reserved field {field} must be {expected}"))
}

impl ReservedFields {
	pub fn to_log_info(&self, data_key: i64) -> LogInfo {
		let mut log = LogInfo {
			timestamp: self.modify_time,
			w_timestamp: self.create_time,
			data_key,
			cloud_gid: self.gid.clone(),
			..Default::default()
		};
		log.set_deleted(self.deleted);
		log
	}
}

/// Rejects duplicate asset names within an `Assets` list field (spec
/// §4.3 step 5).
pub fn validate_no_duplicate_asset_names(record: &VBucket) -> Result<()> {
	for (field, value) in record.iter() {
		if let Value::Assets(list) = value {
			let mut seen = std::collections::HashSet::new();
			for asset in list {
				if !seen.insert(asset.name.clone()) {
					return Err(Error::Cloud(format!(
						"duplicate asset name {} in field {field}",
						asset.name
					)));
				}
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{Asset, AssetFlag, AssetStatus};

	fn good_record() -> VBucket {
		let mut v = VBucket::new();
		v.insert(rf::GID, Value::Text("g1".into()));
		v.insert(rf::CREATE_TIME, Value::Int(1));
		v.insert(rf::MODIFY_TIME, Value::Int(2));
		v.insert(rf::DELETED, Value::Bool(false));
		v.insert(rf::CURSOR, Value::Text("c1".into()));
		v
	}

	#[test]
	fn valid_record_extracts() {
		let r = extract_reserved(&good_record()).unwrap();
		assert_eq!(r.gid, "g1");
		assert_eq!(r.cursor, "c1");
	}

	#[test]
	fn gid_as_int_is_rejected() {
		let mut v = good_record();
		v.insert(rf::GID, Value::Int(0));
		let err = extract_reserved(&v).unwrap_err();
		assert!(matches!(err, Error::Cloud(_)));
	}

	#[test]
	fn missing_field_is_rejected() {
		let mut v = good_record();
		v.get_mut(rf::CURSOR); // no-op; just demonstrate field presence
		let mut v2 = VBucket::new();
		v2.insert(rf::GID, Value::Text("g1".into()));
		let err = extract_reserved(&v2).unwrap_err();
		assert!(matches!(err, Error::Cloud(_)));
		let _ = v;
	}

	#[test]
	fn duplicate_asset_names_rejected() {
		let mut v = good_record();
		let a = Asset {
			name: "a".into(),
			uri: String::new(),
			hash: "h".into(),
			flag: AssetFlag::NoChange,
			status: AssetStatus::Normal,
			timestamp: 0,
		};
		v.insert("photos", Value::Assets(vec![a.clone(), a]));
		assert!(validate_no_duplicate_asset_names(&v).is_err());
	}
}
