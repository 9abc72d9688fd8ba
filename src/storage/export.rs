use crate::domain::model::{Row, Value};
use crate::storage::schema::{ColumnType, TableSchema};
use crate::utils::error::Result;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Serialize a canonical batch to one Parquet file per dataset id,
/// SNAPPY-compressed. Geometry and timestamp values are stringified;
/// Parquet only carries primitive scalars here.
pub fn export_parquet(
    schema: &TableSchema,
    rows: &[Row],
    dataset_id: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}.parquet", dataset_id));
    tracing::info!("Exporting {} rows to {}", rows.len(), path.display());

    // An empty batch still gets a schema-only file; Arrow rejects a
    // batch with zero columns, so fall back to the full column list.
    let columns: Vec<_> = schema
        .columns
        .iter()
        .filter(|col| rows.first().map_or(true, |r| r.contains(&col.name)))
        .collect();

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for col in &columns {
        match col.ty {
            ColumnType::Serial | ColumnType::Integer => {
                fields.push(Field::new(&col.name, DataType::Int64, true));
                let values: Vec<Option<i64>> = rows
                    .iter()
                    .map(|row| match row.get(&col.name) {
                        Some(Value::Int(i)) => Some(*i),
                        Some(Value::Float(f)) if !f.is_nan() => Some(*f as i64),
                        _ => None,
                    })
                    .collect();
                arrays.push(Arc::new(Int64Array::from(values)));
            }
            ColumnType::Decimal { .. } => {
                fields.push(Field::new(&col.name, DataType::Float64, true));
                let values: Vec<Option<f64>> = rows
                    .iter()
                    .map(|row| row.get(&col.name).and_then(Value::as_f64))
                    .collect();
                arrays.push(Arc::new(Float64Array::from(values)));
            }
            _ => {
                fields.push(Field::new(&col.name, DataType::Utf8, true));
                let values: Vec<Option<String>> = rows
                    .iter()
                    .map(|row| match row.get(&col.name) {
                        None | Some(Value::Null) => None,
                        Some(value) => Some(value.key_repr()),
                    })
                    .collect();
                arrays.push(Arc::new(StringArray::from(values)));
            }
        }
    }

    let arrow_schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(arrow_schema.clone(), arrays)?;

    let file = File::create(&path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, arrow_schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(path)
}
