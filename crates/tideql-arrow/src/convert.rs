use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::{
    DataType as ArrowDataType, Field, Schema as ArrowSchema, SchemaRef,
};
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::{Map, Value as JsonValue};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::DataType;

/// One loosely-typed row as returned by a remote API.
pub type JsonRecord = Map<String, JsonValue>;

pub fn data_type_to_arrow(data_type: &DataType) -> ArrowDataType {
    match data_type {
        DataType::Integer => ArrowDataType::Int64,
        DataType::Floating => ArrowDataType::Float64,
        DataType::Boolean => ArrowDataType::Boolean,
        DataType::Binary => ArrowDataType::Binary,
        // Date-like remote fields stay strings on the wire.
        DataType::String | DataType::Date | DataType::DateTime | DataType::Reference => {
            ArrowDataType::Utf8
        }
    }
}

pub fn arrow_to_data_type(data_type: &ArrowDataType) -> DataType {
    match data_type {
        ArrowDataType::Boolean => DataType::Boolean,
        ArrowDataType::Int8
        | ArrowDataType::Int16
        | ArrowDataType::Int32
        | ArrowDataType::Int64
        | ArrowDataType::UInt8
        | ArrowDataType::UInt16
        | ArrowDataType::UInt32
        | ArrowDataType::UInt64 => DataType::Integer,
        ArrowDataType::Float16 | ArrowDataType::Float32 | ArrowDataType::Float64 => {
            DataType::Floating
        }
        ArrowDataType::Binary | ArrowDataType::LargeBinary | ArrowDataType::FixedSizeBinary(_) => {
            DataType::Binary
        }
        ArrowDataType::Date32 | ArrowDataType::Date64 => DataType::Date,
        ArrowDataType::Timestamp(_, _) => DataType::DateTime,
        _ => DataType::String,
    }
}

pub fn schema_from_columns(columns: &[ColumnInfo]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, data_type_to_arrow(&c.data_type), c.nullable))
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

pub fn columns_from_schema(schema: &ArrowSchema) -> Vec<ColumnInfo> {
    schema
        .fields()
        .iter()
        .map(|f| {
            ColumnInfo::new(f.name(), arrow_to_data_type(f.data_type()))
                .with_nullable(f.is_nullable())
        })
        .collect()
}

/// Infers column metadata from the first record, the way the remote sources
/// themselves are probed: booleans, integers and floats keep their JSON
/// type, everything else (including null) is a string.
pub fn infer_columns(records: &[JsonRecord]) -> Vec<ColumnInfo> {
    let Some(sample) = records.first() else {
        return Vec::new();
    };
    sample
        .iter()
        .map(|(name, value)| ColumnInfo::new(name, DataType::infer_json(value)))
        .collect()
}

pub fn empty_batch(columns: &[ColumnInfo]) -> RecordBatch {
    RecordBatch::new_empty(schema_from_columns(columns))
}

fn selected(selection: Option<&[String]>, name: &str) -> bool {
    match selection {
        None => true,
        Some(cols) if cols.is_empty() => true,
        Some(cols) if cols.len() == 1 && cols[0] == "*" => true,
        Some(cols) => cols.iter().any(|c| c == name),
    }
}

fn json_as_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn string_column(records: &[JsonRecord], name: &str) -> ArrayRef {
    let values: Vec<Option<String>> = records
        .iter()
        .map(|r| r.get(name).and_then(json_as_string))
        .collect();
    Arc::new(StringArray::from(values))
}

/// Builds one typed array for `column`, falling back to a string column when
/// any non-null value refuses the declared type.
fn build_column(records: &[JsonRecord], column: &ColumnInfo) -> (Field, ArrayRef) {
    let target = data_type_to_arrow(&column.data_type);
    let array: Option<ArrayRef> = match target {
        ArrowDataType::Int64 => records
            .iter()
            .map(|r| match r.get(&column.name) {
                None | Some(JsonValue::Null) => Some(None),
                Some(JsonValue::Number(n)) => n.as_i64().map(Some),
                Some(_) => None,
            })
            .collect::<Option<Vec<Option<i64>>>>()
            .map(|values| Arc::new(Int64Array::from(values)) as ArrayRef),
        ArrowDataType::Float64 => records
            .iter()
            .map(|r| match r.get(&column.name) {
                None | Some(JsonValue::Null) => Some(None),
                Some(JsonValue::Number(n)) => n.as_f64().map(Some),
                Some(_) => None,
            })
            .collect::<Option<Vec<Option<f64>>>>()
            .map(|values| Arc::new(Float64Array::from(values)) as ArrayRef),
        ArrowDataType::Boolean => records
            .iter()
            .map(|r| match r.get(&column.name) {
                None | Some(JsonValue::Null) => Some(None),
                Some(JsonValue::Bool(b)) => Some(Some(*b)),
                Some(_) => None,
            })
            .collect::<Option<Vec<Option<bool>>>>()
            .map(|values| Arc::new(BooleanArray::from(values)) as ArrayRef),
        _ => None,
    };

    match array {
        Some(array) => (
            Field::new(&column.name, array.data_type().clone(), true),
            array,
        ),
        None => (
            Field::new(&column.name, ArrowDataType::Utf8, true),
            string_column(records, &column.name),
        ),
    }
}

/// Converts API records into a batch, keeping only the selected columns
/// (`None`, `[]` or `["*"]` select everything).
pub fn records_to_batch(
    records: &[JsonRecord],
    columns: &[ColumnInfo],
    selection: Option<&[String]>,
) -> Result<RecordBatch> {
    let kept: Vec<&ColumnInfo> = columns
        .iter()
        .filter(|c| selected(selection, &c.name))
        .collect();

    if records.is_empty() {
        let owned: Vec<ColumnInfo> = kept.into_iter().cloned().collect();
        return Ok(empty_batch(&owned));
    }

    let mut fields = Vec::with_capacity(kept.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(kept.len());
    for column in kept {
        let (field, array) = build_column(records, column);
        fields.push(field);
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), arrays)
        .map_err(|e| Error::adapter(format!("failed to assemble batch: {}", e)))
}

pub fn concat(batches: &[RecordBatch]) -> Result<RecordBatch> {
    match batches {
        [] => Err(Error::adapter("cannot concatenate zero batches")),
        [single] => Ok(single.clone()),
        [first, ..] => concat_batches(&first.schema(), batches)
            .map_err(|e| Error::adapter(format!("failed to concatenate batches: {}", e))),
    }
}

/// Caps a batch at `limit` rows without copying column data.
pub fn truncate(batch: RecordBatch, limit: usize) -> RecordBatch {
    if batch.num_rows() > limit {
        batch.slice(0, limit)
    } else {
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> JsonRecord {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_type_round_trip() {
        assert_eq!(data_type_to_arrow(&DataType::Integer), ArrowDataType::Int64);
        assert_eq!(data_type_to_arrow(&DataType::Date), ArrowDataType::Utf8);
        assert_eq!(arrow_to_data_type(&ArrowDataType::Int32), DataType::Integer);
        assert_eq!(arrow_to_data_type(&ArrowDataType::Utf8), DataType::String);
        assert_eq!(
            arrow_to_data_type(&ArrowDataType::Date32),
            DataType::Date
        );
    }

    #[test]
    fn test_infer_columns_from_first_record() {
        let records = vec![record(json!({"id": 1, "name": "Alice", "active": true, "score": 1.5}))];
        let columns = infer_columns(&records);
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].data_type, DataType::Integer);
        assert_eq!(columns[1].data_type, DataType::String);
        assert_eq!(columns[2].data_type, DataType::Boolean);
        assert_eq!(columns[3].data_type, DataType::Floating);
    }

    #[test]
    fn test_infer_columns_empty() {
        assert!(infer_columns(&[]).is_empty());
    }

    #[test]
    fn test_records_to_batch_typed() {
        let records = vec![
            record(json!({"id": 1, "name": "Alice"})),
            record(json!({"id": 2, "name": null})),
        ];
        let columns = infer_columns(&records);
        let batch = records_to_batch(&records, &columns, None).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(0).data_type(), &ArrowDataType::Int64);
        assert!(batch.column(1).is_null(1));
    }

    #[test]
    fn test_records_to_batch_falls_back_to_strings() {
        // Second record carries a string where an integer was inferred.
        let records = vec![
            record(json!({"id": 1})),
            record(json!({"id": "INC0002"})),
        ];
        let columns = infer_columns(&records);
        let batch = records_to_batch(&records, &columns, None).unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &ArrowDataType::Utf8);
    }

    #[test]
    fn test_records_to_batch_selection() {
        let records = vec![record(json!({"id": 1, "name": "Alice", "role": "admin"}))];
        let columns = infer_columns(&records);
        let selection = vec!["name".to_string()];
        let batch = records_to_batch(&records, &columns, Some(&selection)).unwrap();
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(batch.schema().field(0).name(), "name");

        let star = vec!["*".to_string()];
        let batch = records_to_batch(&records, &columns, Some(&star)).unwrap();
        assert_eq!(batch.num_columns(), 3);
    }

    #[test]
    fn test_records_to_batch_empty_keeps_schema() {
        let columns = vec![
            ColumnInfo::new("id", DataType::Integer),
            ColumnInfo::new("name", DataType::String),
        ];
        let batch = records_to_batch(&[], &columns, None).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }

    #[test]
    fn test_concat_and_truncate() {
        let records: Vec<JsonRecord> = (0..5).map(|i| record(json!({"id": i}))).collect();
        let columns = infer_columns(&records);
        let a = records_to_batch(&records[..2], &columns, None).unwrap();
        let b = records_to_batch(&records[2..], &columns, None).unwrap();
        let merged = concat(&[a, b]).unwrap();
        assert_eq!(merged.num_rows(), 5);

        let capped = truncate(merged, 3);
        assert_eq!(capped.num_rows(), 3);
        assert!(concat(&[]).is_err());
    }

    #[test]
    fn test_columns_from_schema() {
        let schema = ArrowSchema::new(vec![
            Field::new("id", ArrowDataType::Int64, false),
            Field::new("name", ArrowDataType::Utf8, true),
        ]);
        let columns = columns_from_schema(&schema);
        assert_eq!(columns[0].data_type, DataType::Integer);
        assert!(!columns[0].nullable);
        assert_eq!(columns[1].data_type, DataType::String);
    }
}
