use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub const ID: &str = "id";
pub const DOCUMENT: &str = "document";
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";
pub const DISTANCE: &str = "_distance";

/// Collection layout. `dim` is fixed by the first write.
pub fn build_entry_schema(dim: i32) -> SchemaRef {
	Arc::new(Schema::new(vec![
		Field::new(ID, DataType::Utf8, false),
		Field::new(DOCUMENT, DataType::Utf8, false),
		// JSON-encoded metadata object, field order preserved
		Field::new(METADATA, DataType::Utf8, false),
		Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Vector width of an existing collection, if its schema has one.
pub fn vector_dim(schema: &Schema) -> Option<i32> {
	match schema.field_with_name(VECTOR).ok()?.data_type() {
		DataType::FixedSizeList(_, dim) => Some(*dim),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dim_round_trips_through_schema() {
		assert_eq!(vector_dim(&build_entry_schema(1024)), Some(1024));
		assert_eq!(vector_dim(&Schema::new(vec![Field::new(ID, DataType::Utf8, false)])), None);
	}
}
