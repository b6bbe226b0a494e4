//! Reads ImageRecords from Parquet files.

use crate::types::{DatasetSummary, ImageRecord};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::{Path, PathBuf};

/// Static methods for reading image data from Parquet files.
pub struct ImageReader;

impl ImageReader {
    /// Read all image records from a Parquet file.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<ImageRecord>> {
        let file = std::fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            let mut batch_records = extract_records_from_batch(&batch)?;
            records.append(&mut batch_records);
        }

        tracing::debug!(
            count = records.len(),
            path = %path.display(),
            "Read image records"
        );

        Ok(records)
    }

    /// Read image records from multiple Parquet files, in path order.
    pub fn read_multiple(paths: &[PathBuf]) -> anyhow::Result<Vec<ImageRecord>> {
        let mut all_records = Vec::new();
        for path in paths {
            let mut records = Self::read_all(path)?;
            all_records.append(&mut records);
        }
        Ok(all_records)
    }

    /// Compute summary statistics from an image Parquet file.
    pub fn read_summary(path: &Path) -> anyhow::Result<DatasetSummary> {
        let records = Self::read_all(path)?;
        DatasetSummary::from_records(&records)
    }
}

/// Extract image records from a single Arrow RecordBatch.
fn extract_records_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<ImageRecord>> {
    let labels = batch
        .column(0)
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 0 (label) is not UInt32Array"))?;

    let pixels = batch
        .column(1)
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 1 (pixels) is not ListArray"))?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = pixels.value(i);
        let float_array = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow::anyhow!("Pixel values are not Float32Array"))?;

        records.push(ImageRecord {
            label: labels.value(i),
            pixels: float_array.values().to_vec(),
        });
    }

    Ok(records)
}
