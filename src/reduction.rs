//! # 采样归约 (Sample Reduction)
//!
//! `nsamples > 1` 的寄存器在查询时沿采样轴归约为每通道一个值。
//! 归约函数接收 `(N, nch, nsamples)` 的 f64 数组和采样轴，
//! 返回去掉该轴后的 `(N, nch)` 数组；查询引擎在边界上检查结果形状。
//!
//! 任何 `Fn(ArrayView3<f64>, Axis) -> ArrayD<f64>` 闭包都可以作为归约函数。

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayView3, Axis};

pub trait Reduction: Send + Sync {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64>;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Reduction for F
where
    F: Fn(ArrayView3<'_, f64>, Axis) -> ArrayD<f64> + Send + Sync,
{
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        self(block, axis)
    }
}

/// 算术平均（默认）
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl Reduction for Mean {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        let n = block.len_of(axis) as f64;
        (block.sum_axis(axis) / n).into_dyn()
    }

    fn name(&self) -> &str {
        "mean"
    }
}

impl Reduction for Median {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        block
            .map_axis(axis, |lane| {
                let mut values = lane.to_vec();
                values.sort_by(f64::total_cmp);
                let mid = values.len() / 2;
                match values.len() {
                    0 => f64::NAN,
                    n if n % 2 == 0 => (values[mid - 1] + values[mid]) / 2.0,
                    _ => values[mid],
                }
            })
            .into_dyn()
    }

    fn name(&self) -> &str {
        "median"
    }
}

impl Reduction for Min {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        block
            .fold_axis(axis, f64::INFINITY, |acc, &x| acc.min(x))
            .into_dyn()
    }

    fn name(&self) -> &str {
        "min"
    }
}

impl Reduction for Max {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        block
            .fold_axis(axis, f64::NEG_INFINITY, |acc, &x| acc.max(x))
            .into_dyn()
    }

    fn name(&self) -> &str {
        "max"
    }
}

impl Reduction for Sum {
    fn reduce(&self, block: ArrayView3<'_, f64>, axis: Axis) -> ArrayD<f64> {
        block.sum_axis(axis).into_dyn()
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// 按名称取内置归约函数
pub fn builtin(name: &str) -> Option<Arc<dyn Reduction>> {
    match name {
        "mean" => Some(Arc::new(Mean)),
        "median" => Some(Arc::new(Median)),
        "min" => Some(Arc::new(Min)),
        "max" => Some(Arc::new(Max)),
        "sum" => Some(Arc::new(Sum)),
        _ => None,
    }
}

impl fmt::Debug for dyn Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reduction({})", self.name())
    }
}
