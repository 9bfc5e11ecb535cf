//! # 寄存器表 (Register Table)
//!
//! 批量查询的结果：每帧一行，列按声明顺序排列并带名称。
//! 数据保存在一个行主序的 `(N, 列数)` 数组中。

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use ndarray::{Array2, ArrayView1, ArrayView2, ErrorKind, ShapeError, s};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterTable {
    names: Vec<String>,
    data: Array2<f64>,
}

impl RegisterTable {
    /// 按列拼接若干 `(N, k)` 块
    pub(crate) fn from_blocks(rows: usize, blocks: Vec<(Vec<String>, Array2<f64>)>) -> Result<Self> {
        let width = blocks.iter().map(|(_, block)| block.ncols()).sum();
        let mut names = Vec::with_capacity(width);
        let mut data = Array2::zeros((rows, width));
        let mut start = 0;
        for (block_names, block) in blocks {
            let k = block.ncols();
            if block.nrows() != rows {
                return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
            }
            data.slice_mut(s![.., start..start + k]).assign(&block);
            names.extend(block_names);
            start += k;
        }

        Ok(Self { names, data })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.data.ncols()
    }

    /// 按名称取列，重名时取第一列
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.names.iter().position(|n| n == name)?;
        Some(self.data.column(j))
    }

    /// 名称 -> 列位置（重名时保留第一个）
    pub fn column_index(&self) -> HashMap<&str, usize> {
        let mut index = HashMap::with_capacity(self.names.len());
        for (j, name) in self.names.iter().enumerate() {
            index.entry(name.as_str()).or_insert(j);
        }
        index
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn into_values(self) -> Array2<f64> {
        self.data
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .names
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Float64, false))
            .collect();
        let arrays: Vec<ArrayRef> = self
            .data
            .columns()
            .into_iter()
            .map(|col| Arc::new(Float64Array::from(col.to_vec())) as ArrayRef)
            .collect();

        let options = RecordBatchOptions::new().with_row_count(Some(self.n_rows()));
        let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)?;
        Ok(batch)
    }
}

/// 表的二维视图，与表共享存储
pub fn flatten_table(table: &RegisterTable) -> ArrayView2<'_, f64> {
    table.values()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use ndarray::array;

    fn table() -> RegisterTable {
        RegisterTable::from_blocks(
            3,
            vec![
                (vec!["3-T".to_string()], array![[1.0], [2.0], [3.0]]),
                (
                    vec!["7-temp-0".to_string(), "7-temp-1".to_string()],
                    array![[10.0, 11.0], [20.0, 21.0], [30.0, 31.0]],
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_concatenate_blocks() {
        let t = table();
        assert_eq!(t.names(), &["3-T", "7-temp-0", "7-temp-1"]);
        assert_eq!((t.n_rows(), t.n_columns()), (3, 3));
        assert_eq!(t.column("7-temp-1").unwrap().to_vec(), vec![11.0, 21.0, 31.0]);
        assert!(t.column("nope").is_none());
        assert_eq!(t.column_index()["7-temp-0"], 1);
    }

    #[test]
    fn test_flatten_aliases_storage() {
        let t = table();
        let flat = flatten_table(&t);
        assert_eq!(flat.as_ptr(), t.values().as_ptr());
        assert_eq!(flat[[1, 2]], 21.0);
    }

    #[test]
    fn test_empty_table() {
        let t = RegisterTable::from_blocks(4, Vec::new()).unwrap();
        assert_eq!((t.n_rows(), t.n_columns()), (4, 0));
        assert_eq!(t.to_record_batch().unwrap().num_rows(), 4);
    }

    #[test]
    fn test_record_batch() {
        let batch = table().to_record_batch().unwrap();
        assert_eq!(batch.num_columns(), 3);
        assert_eq!(batch.schema().field(1).name(), "7-temp-0");
        let col = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(col.values().to_vec(), vec![11.0, 21.0, 31.0]);
    }
}
