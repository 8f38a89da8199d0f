use datafusion::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeBinaryArray, LargeStringArray, StringArray,
    UInt32Array, UInt64Array,
};
use datafusion::arrow::datatypes::DataType as ArrowDataType;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::array_value_to_string;
use tideql_common::error::{Error, Result};
use tideql_common::types::Value;

fn downcast_err(expected: &str) -> Error {
    Error::adapter(format!("column is not a {} array", expected))
}

fn value_at(array: &ArrayRef, index: usize) -> Result<Value> {
    if array.is_null(index) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        ArrowDataType::Boolean => {
            let arr = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| downcast_err("boolean"))?;
            Value::Bool(arr.value(index))
        }
        ArrowDataType::Int8 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int8Array>()
                .ok_or_else(|| downcast_err("int8"))?;
            Value::Int64(arr.value(index) as i64)
        }
        ArrowDataType::Int16 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int16Array>()
                .ok_or_else(|| downcast_err("int16"))?;
            Value::Int64(arr.value(index) as i64)
        }
        ArrowDataType::Int32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| downcast_err("int32"))?;
            Value::Int64(arr.value(index) as i64)
        }
        ArrowDataType::Int64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| downcast_err("int64"))?;
            Value::Int64(arr.value(index))
        }
        ArrowDataType::UInt32 => {
            let arr = array
                .as_any()
                .downcast_ref::<UInt32Array>()
                .ok_or_else(|| downcast_err("uint32"))?;
            Value::Int64(arr.value(index) as i64)
        }
        ArrowDataType::UInt64 => {
            let arr = array
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(|| downcast_err("uint64"))?;
            Value::Int64(arr.value(index) as i64)
        }
        ArrowDataType::Float32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| downcast_err("float32"))?;
            Value::Float64(arr.value(index) as f64)
        }
        ArrowDataType::Float64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| downcast_err("float64"))?;
            Value::Float64(arr.value(index))
        }
        ArrowDataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| downcast_err("string"))?;
            Value::String(arr.value(index).to_string())
        }
        ArrowDataType::LargeUtf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .ok_or_else(|| downcast_err("large string"))?;
            Value::String(arr.value(index).to_string())
        }
        ArrowDataType::Binary => {
            let arr = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| downcast_err("binary"))?;
            Value::Bytes(arr.value(index).to_vec())
        }
        ArrowDataType::LargeBinary => {
            let arr = array
                .as_any()
                .downcast_ref::<LargeBinaryArray>()
                .ok_or_else(|| downcast_err("large binary"))?;
            Value::Bytes(arr.value(index).to_vec())
        }
        // Dates, timestamps, decimals and anything else render through
        // Arrow's display path.
        _ => Value::String(
            array_value_to_string(array, index)
                .map_err(|e| Error::adapter(format!("failed to render value: {}", e)))?,
        ),
    };
    Ok(value)
}

/// Materialises one row of a batch as scalar values.
pub fn row_at(batch: &RecordBatch, index: usize) -> Result<Vec<Value>> {
    if index >= batch.num_rows() {
        return Err(Error::adapter(format!(
            "row {} out of bounds for batch of {} rows",
            index,
            batch.num_rows()
        )));
    }
    batch
        .columns()
        .iter()
        .map(|array| value_at(array, index))
        .collect()
}

/// Materialises the whole batch row by row.
pub fn batch_rows(batch: &RecordBatch) -> Result<Vec<Vec<Value>>> {
    (0..batch.num_rows()).map(|i| row_at(batch, i)).collect()
}

/// Extracts a string column by name; non-string columns render as text.
pub fn string_column_values(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let index = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::schema(format!("column not found: {}", name)))?;
    let array = batch.column(index).clone();
    (0..batch.num_rows())
        .map(|i| match value_at(&array, i)? {
            Value::Null => Ok(String::new()),
            value => Ok(value.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{infer_columns, records_to_batch, JsonRecord};
    use serde_json::json;

    fn sample_batch() -> RecordBatch {
        let records: Vec<JsonRecord> = vec![
            json!({"id": 1, "name": "Alice", "active": true, "score": 1.5}),
            json!({"id": 2, "name": null, "active": false, "score": 2.0}),
        ]
        .into_iter()
        .map(|v| match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect();
        let columns = infer_columns(&records);
        records_to_batch(&records, &columns, None).unwrap()
    }

    #[test]
    fn test_row_at() {
        let batch = sample_batch();
        let row = row_at(&batch, 0).unwrap();
        assert_eq!(
            row,
            vec![
                Value::Int64(1),
                Value::String("Alice".to_string()),
                Value::Bool(true),
                Value::Float64(1.5),
            ]
        );
        let row = row_at(&batch, 1).unwrap();
        assert_eq!(row[1], Value::Null);
    }

    #[test]
    fn test_row_at_out_of_bounds() {
        let batch = sample_batch();
        assert!(row_at(&batch, 2).is_err());
    }

    #[test]
    fn test_batch_rows() {
        let batch = sample_batch();
        let rows = batch_rows(&batch).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Value::Int64(2));
    }

    #[test]
    fn test_string_column_values() {
        let batch = sample_batch();
        assert_eq!(
            string_column_values(&batch, "name").unwrap(),
            vec!["Alice".to_string(), String::new()]
        );
        assert_eq!(
            string_column_values(&batch, "id").unwrap(),
            vec!["1".to_string(), "2".to_string()]
        );
        assert!(string_column_values(&batch, "missing").is_err());
    }
}
