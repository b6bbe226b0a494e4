//! Writes ImageRecords to Parquet files using Arrow.

use crate::types::ImageRecord;
use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::path::PathBuf;
use std::sync::Arc;

/// Arrow schema for image Parquet files (2 columns).
pub fn image_schema() -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new(
            "pixels",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, false))),
            false,
        ),
    ])
}

/// Buffers image records and writes them to a Parquet file.
pub struct ImageWriter {
    records: Vec<ImageRecord>,
    output_path: PathBuf,
}

impl ImageWriter {
    /// Create a new writer that will write to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            records: Vec::new(),
            output_path,
        }
    }

    /// Buffer a single image record.
    pub fn record(&mut self, record: ImageRecord) {
        self.records.push(record);
    }

    /// Buffer multiple image records.
    pub fn record_all(&mut self, records: Vec<ImageRecord>) {
        self.records.extend(records);
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write all buffered records to the Parquet file and return the output path.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        let schema = Arc::new(image_schema());

        let batch = if self.records.is_empty() {
            RecordBatch::new_empty(schema.clone())
        } else {
            build_record_batch(&self.records, schema.clone())?
        };

        let file = std::fs::File::create(&self.output_path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            records = self.records.len(),
            path = %self.output_path.display(),
            "Wrote image Parquet file"
        );

        Ok(self.output_path)
    }
}

fn build_record_batch(records: &[ImageRecord], schema: Arc<Schema>) -> anyhow::Result<RecordBatch> {
    let labels: UInt32Array = records.iter().map(|r| Some(r.label)).collect();

    let mut all_values = Vec::new();
    let mut offsets = vec![0i32];
    for record in records {
        all_values.extend_from_slice(&record.pixels);
        offsets.push(all_values.len() as i32);
    }

    let pixels = ListArray::new(
        Arc::new(Field::new("item", DataType::Float32, false)),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(all_values)),
        None,
    );

    Ok(RecordBatch::try_new(
        schema,
        vec![Arc::new(labels), Arc::new(pixels)],
    )?)
}
