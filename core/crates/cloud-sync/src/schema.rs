//! Schema Manager: compares a local table's declared columns and primary
//! keys against the cloud's cached schema before a sync task touches it.

use crate::{
	error::{Error, Result},
	interfaces::{CloudDatabaseSchema, ColumnDescriptor},
	types::FieldKind,
};

/// Checks, in order: table exists in cloud schema; every local primary
/// key column has a matching cloud field with `primary = true`; every
/// cloud field has a matching local column of the same broad type and
/// compatible nullability.
pub fn check_schema(
	table: &str,
	local_primary_keys: &[String],
	local_columns: &[ColumnDescriptor],
	cloud_schema: &CloudDatabaseSchema,
) -> Result<()> {
	let cloud_table = cloud_schema
		.tables
		.get(table)
		.ok_or_else(|| Error::CloudSchemaMismatch(format!("table {table} not found in cloud schema")))?;

	for pk in local_primary_keys {
		let matches = cloud_table
			.fields
			.iter()
			.any(|f| f.name == *pk && f.is_primary);
		if !matches {
			return Err(Error::CloudSchemaMismatch(format!(
				"primary key column {pk} on table {table} has no matching cloud primary field"
			)));
		}
	}

	for cloud_field in &cloud_table.fields {
		let local = local_columns
			.iter()
			.find(|c| c.name == cloud_field.name)
			.ok_or_else(|| {
				Error::CloudSchemaMismatch(format!(
					"cloud field {} on table {table} has no matching local column",
					cloud_field.name
				))
			})?;

		if !compare_type(local.kind, cloud_field.kind) {
			return Err(Error::CloudSchemaMismatch(format!(
				"field {} on table {table} has mismatched type: local={:?} cloud={:?}",
				cloud_field.name, local.kind, cloud_field.kind
			)));
		}

		if !compare_nullable(local.nullable, cloud_field.nullable) {
			return Err(Error::CloudSchemaMismatch(format!(
				"field {} on table {table} has incompatible nullability",
				cloud_field.name
			)));
		}
	}

	Ok(())
}

fn compare_type(local: FieldKind, cloud: FieldKind) -> bool {
	local == cloud
}

/// The local side may be more permissive (nullable) than the cloud side
/// declares; the reverse is a mismatch.
fn compare_nullable(local_nullable: bool, cloud_nullable: bool) -> bool {
	local_nullable == cloud_nullable || local_nullable
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	use crate::interfaces::CloudTableSchema;

	fn col(name: &str, kind: FieldKind, nullable: bool, is_primary: bool) -> ColumnDescriptor {
		ColumnDescriptor {
			name: name.to_string(),
			kind,
			nullable,
			is_primary,
		}
	}

	#[test]
	fn missing_table_is_mismatch() {
		let schema = CloudDatabaseSchema::default();
		let err = check_schema("t", &[], &[], &schema).unwrap_err();
		assert!(matches!(err, Error::CloudSchemaMismatch(_)));
	}

	#[test]
	fn missing_primary_key_is_mismatch() {
		let mut schema = CloudDatabaseSchema::default();
		schema.tables.insert(
			"t".into(),
			CloudTableSchema {
				fields: vec![col("id", FieldKind::Int, false, false)],
			},
		);
		let err = check_schema("t", &["id".into()], &[], &schema).unwrap_err();
		assert!(matches!(err, Error::CloudSchemaMismatch(_)));
	}

	#[test]
	fn matching_schema_passes() {
		let mut tables = HashMap::new();
		tables.insert(
			"t".into(),
			CloudTableSchema {
				fields: vec![
					col("id", FieldKind::Int, false, true),
					col("name", FieldKind::String, true, false),
				],
			},
		);
		let schema = CloudDatabaseSchema { tables };
		let local = vec![
			col("id", FieldKind::Int, false, true),
			col("name", FieldKind::String, true, false),
		];
		assert!(check_schema("t", &["id".into()], &local, &schema).is_ok());
	}

	#[test]
	fn local_more_permissive_nullable_is_allowed() {
		assert!(compare_nullable(true, false));
		assert!(!compare_nullable(false, true));
	}
}
