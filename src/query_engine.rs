//! # 查询引擎 (Query Engine)
//!
//! 打开文件时一次性完成头部解析、布局计算和帧解码，之后只读。
//!
//! ## 查询流程
//! 1. 按位置或名称定位寄存器
//! 2. 选择数据来源：归约列 / 原始列线性化 / 原始列
//! 3. 整形为 `(N, nch, nsamples)`，`nsamples == 1` 时直接去掉采样轴，
//!    否则沿采样轴归约
//! 4. 按调用方给定的顺序选择通道
//!
//! 批量查询把每个寄存器的结果按列拼成一张每帧一行的表。

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use metrics::counter;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, Ix2};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::descriptor_parser::{
    BoardDescriptor, FileDescriptor, RegisterDescriptor, RegisterFlags, parse_header,
};
use crate::error::{HkeError, Result};
use crate::file_source::FileSource;
use crate::frame_store::{Column, FrameStore};
use crate::record_layout::RecordLayout;
use crate::reduction::{Mean, Reduction};
use crate::register_table::{RegisterTable, flatten_table};

/// 板卡标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardId {
    /// 列表位置，负数从末尾计
    Index(isize),
    /// `<描述> (<地址>-<板卡类型>)`
    Label(String),
    Address(u8),
}

impl From<isize> for BoardId {
    fn from(index: isize) -> Self {
        BoardId::Index(index)
    }
}

impl From<i32> for BoardId {
    fn from(index: i32) -> Self {
        BoardId::Index(index as isize)
    }
}

impl From<&str> for BoardId {
    fn from(label: &str) -> Self {
        BoardId::Label(label.to_string())
    }
}

impl From<String> for BoardId {
    fn from(label: String) -> Self {
        BoardId::Label(label)
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardId::Index(i) => write!(f, "#{i}"),
            BoardId::Label(label) => write!(f, "{label}"),
            BoardId::Address(address) => write!(f, "地址 {address}"),
        }
    }
}

/// 寄存器标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterId {
    /// 列表位置，负数从末尾计
    Index(isize),
    /// 全名 `<板卡标签>: <名称>`、列名 `<地址>-<名称>`，
    /// 或在文件内唯一的寄存器名称
    Key(String),
}

impl From<isize> for RegisterId {
    fn from(index: isize) -> Self {
        RegisterId::Index(index)
    }
}

impl From<i32> for RegisterId {
    fn from(index: i32) -> Self {
        RegisterId::Index(index as isize)
    }
}

impl From<usize> for RegisterId {
    fn from(index: usize) -> Self {
        RegisterId::Index(index as isize)
    }
}

impl From<&str> for RegisterId {
    fn from(key: &str) -> Self {
        RegisterId::Key(key.to_string())
    }
}

impl From<String> for RegisterId {
    fn from(key: String) -> Self {
        RegisterId::Key(key)
    }
}

impl From<&String> for RegisterId {
    fn from(key: &String) -> Self {
        RegisterId::Key(key.clone())
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterId::Index(i) => write!(f, "#{i}"),
            RegisterId::Key(key) => write!(f, "{key}"),
        }
    }
}

/// 通道选择
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Channels {
    /// 全部通道，按顺序
    #[default]
    All,
    /// 单个通道，结果去掉通道维
    One(usize),
    /// 按给定顺序选择，允许重复
    Many(Vec<usize>),
}

impl Channels {
    fn resolve(&self, register: &RegisterDescriptor) -> Result<Vec<usize>> {
        let nch = register.nch();
        let selected = match self {
            Channels::All => return Ok((0..nch).collect()),
            Channels::One(ch) => vec![*ch],
            Channels::Many(chs) => chs.clone(),
        };
        if let Some(&channel) = selected.iter().find(|&&ch| ch >= nch) {
            return Err(HkeError::InvalidChannelSelection {
                register: register.fullname.clone(),
                channel,
                nch,
            });
        }
        Ok(selected)
    }
}

impl From<usize> for Channels {
    fn from(ch: usize) -> Self {
        Channels::One(ch)
    }
}

impl From<Vec<usize>> for Channels {
    fn from(chs: Vec<usize>) -> Self {
        Channels::Many(chs)
    }
}

impl From<&[usize]> for Channels {
    fn from(chs: &[usize]) -> Self {
        Channels::Many(chs.to_vec())
    }
}

/// 单寄存器查询选项
#[derive(Clone)]
pub struct DataOptions {
    /// 默认取归约数据
    pub reduced: bool,
    pub channels: Channels,
    /// 为空时使用算术平均
    pub reduction: Option<Arc<dyn Reduction>>,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            reduced: true,
            channels: Channels::All,
            reduction: None,
        }
    }
}

impl fmt::Debug for DataOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataOptions")
            .field("reduced", &self.reduced)
            .field("channels", &self.channels)
            .field("reduction", &self.reduction.as_ref().map(|r| r.name()))
            .finish()
    }
}

impl DataOptions {
    pub fn raw() -> Self {
        Self {
            reduced: false,
            ..Self::default()
        }
    }

    pub fn reduced(mut self, reduced: bool) -> Self {
        self.reduced = reduced;
        self
    }

    pub fn channels(mut self, channels: impl Into<Channels>) -> Self {
        self.channels = channels.into();
        self
    }

    pub fn reduction(mut self, reduction: Arc<dyn Reduction>) -> Self {
        self.reduction = Some(reduction);
        self
    }

    /// 用闭包作为归约函数
    pub fn reduce_with<F>(self, f: F) -> Self
    where
        F: Fn(ArrayView3<'_, f64>, Axis) -> ArrayD<f64> + Send + Sync + 'static,
    {
        self.reduction(Arc::new(f))
    }
}

/// 批量参数：所有寄存器共用一个值，或按位置逐个给出
#[derive(Debug, Clone, PartialEq)]
pub enum PerRegister<T> {
    Shared(T),
    Each(Vec<T>),
}

impl<T: Default> Default for PerRegister<T> {
    fn default() -> Self {
        PerRegister::Shared(T::default())
    }
}

impl<T> PerRegister<T> {
    fn check(&self, argument: &'static str, expected: usize) -> Result<()> {
        match self {
            PerRegister::Each(values) if values.len() != expected => {
                Err(HkeError::BatchArgumentMismatch {
                    argument,
                    expected,
                    found: values.len(),
                })
            }
            _ => Ok(()),
        }
    }

    fn get(&self, i: usize) -> &T {
        match self {
            PerRegister::Shared(value) => value,
            PerRegister::Each(values) => &values[i],
        }
    }
}

/// 批量查询选项
#[derive(Clone)]
pub struct TableOptions {
    pub reduced: PerRegister<bool>,
    pub channels: PerRegister<Channels>,
    pub reduction: Option<Arc<dyn Reduction>>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            reduced: PerRegister::Shared(true),
            channels: PerRegister::Shared(Channels::All),
            reduction: None,
        }
    }
}

impl TableOptions {
    pub fn reduced(mut self, reduced: PerRegister<bool>) -> Self {
        self.reduced = reduced;
        self
    }

    pub fn channels(mut self, channels: PerRegister<Channels>) -> Self {
        self.channels = channels;
        self
    }

    pub fn reduction(mut self, reduction: Arc<dyn Reduction>) -> Self {
        self.reduction = Some(reduction);
        self
    }
}

/// 数据实际来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// 帧内存储的归约列
    Reduced,
    /// 原始列经线性标定
    Calibrated,
    Raw,
    /// 请求归约数据但寄存器没有，退回原始列
    RawFallback,
}

/// 单寄存器查询结果，`(N, 选中通道数)`
#[derive(Debug, Clone)]
pub struct RegisterData {
    pub register: String,
    pub source: DataSource,
    pub channels: Vec<usize>,
    values: Array2<f64>,
    squeezed: bool,
}

impl RegisterData {
    /// 帧数 N
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// 第 `j` 个选中通道的时间序列
    pub fn column(&self, j: usize) -> Option<ArrayView1<'_, f64>> {
        (j < self.values.ncols()).then(|| self.values.column(j))
    }

    /// 只有一列时的时间序列
    pub fn series(&self) -> Option<ArrayView1<'_, f64>> {
        if self.values.ncols() == 1 {
            self.column(0)
        } else {
            None
        }
    }

    /// 单通道选择为 `[N]`，其余为 `[N, k]`
    pub fn shape(&self) -> Vec<usize> {
        if self.squeezed {
            vec![self.len()]
        } else {
            self.values.shape().to_vec()
        }
    }

    pub fn into_dyn(self) -> ArrayD<f64> {
        if self.squeezed {
            self.values.index_axis_move(Axis(1), 0).into_dyn()
        } else {
            self.values.into_dyn()
        }
    }
}

/// 已打开的HKE二进制文件
#[derive(Debug)]
pub struct HkeBinaryFile {
    path: Option<PathBuf>,
    descriptor: FileDescriptor,
    layout: RecordLayout,
    store: FrameStore,
    raw_header: Vec<u8>,
    boards_by_label: HashMap<String, usize>,
    boards_by_address: HashMap<u8, usize>,
    registers_by_key: HashMap<String, usize>,
    registers_by_column: HashMap<String, usize>,
    /// 寄存器短名，重名时为 `None`
    registers_by_name: HashMap<String, Option<usize>>,
}

impl HkeBinaryFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &EngineConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("📂 读取HKE文件: {:?}", path);
        let source = FileSource::open(path, config)?;
        let mut file = Self::from_bytes(source.as_slice(), config)?;
        file.path = Some(path.to_path_buf());
        Ok(file)
    }

    /// 在阻塞线程池中打开，不占用异步运行时
    pub async fn open_async(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        task::spawn_blocking(move || Self::open_with_config(&path, &config)).await?
    }

    /// 并发打开多个文件，任一失败即返回错误
    pub async fn open_many<P: AsRef<Path>>(paths: &[P], config: &EngineConfig) -> Result<Vec<Self>> {
        let tasks = paths
            .iter()
            .map(|path| Self::open_async(path.as_ref().to_path_buf(), config.clone()));
        try_join_all(tasks).await
    }

    pub fn from_bytes(bytes: &[u8], config: &EngineConfig) -> Result<Self> {
        let descriptor = parse_header(bytes)?;
        let layout = RecordLayout::from_descriptor(&descriptor);
        let header_len = descriptor.header_len;
        let store = FrameStore::decode(&layout, &bytes[header_len..], header_len, config)?;

        let mut boards_by_label: HashMap<String, usize> = HashMap::with_capacity(descriptor.boards.len());
        let mut boards_by_address: HashMap<u8, usize> = HashMap::with_capacity(descriptor.boards.len());
        for board in &descriptor.boards {
            if boards_by_address.contains_key(&board.address) {
                warn!("板卡地址 {} 重复，按地址查找时使用第一块板卡", board.address);
            }
            boards_by_address.entry(board.address).or_insert(board.index);
            boards_by_label.entry(board.label()).or_insert(board.index);
        }

        let mut registers_by_key: HashMap<String, usize> = HashMap::with_capacity(descriptor.registers.len());
        let mut registers_by_column: HashMap<String, usize> = HashMap::with_capacity(descriptor.registers.len());
        let mut registers_by_name: HashMap<String, Option<usize>> = HashMap::with_capacity(descriptor.registers.len());
        for register in &descriptor.registers {
            if registers_by_key.contains_key(&register.fullname) {
                warn!("寄存器名称重复: {}，按名称查找时使用第一个", register.fullname);
            }
            registers_by_key
                .entry(register.fullname.clone())
                .or_insert(register.index);
            registers_by_column
                .entry(register.column_name.clone())
                .or_insert(register.index);
            registers_by_name
                .entry(register.name.clone())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(register.index));
        }

        counter!("hke_files_opened_total").increment(1);
        info!(
            "✅ HKE文件已加载: 版本={} 板卡={} 寄存器={} 帧={}",
            descriptor.version,
            descriptor.boards.len(),
            descriptor.registers.len(),
            store.frame_count()
        );
        if config.log_summary {
            store.stats().print_summary();
        }

        Ok(Self {
            path: None,
            raw_header: bytes[..header_len].to_vec(),
            descriptor,
            layout,
            store,
            boards_by_label,
            boards_by_address,
            registers_by_key,
            registers_by_column,
            registers_by_name,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// 头部原始字节
    pub fn raw_header(&self) -> &[u8] {
        &self.raw_header
    }

    pub fn frame_count(&self) -> usize {
        self.store.frame_count()
    }

    pub fn frame_counters(&self) -> &[u32] {
        self.store.frame_counters()
    }

    pub fn received_ms(&self) -> &[u32] {
        self.store.received_ms()
    }

    /// 板卡标签，文件顺序
    pub fn list_boards(&self) -> Vec<String> {
        self.descriptor.boards.iter().map(BoardDescriptor::label).collect()
    }

    pub fn get_board(&self, id: impl Into<BoardId>) -> Result<&BoardDescriptor> {
        let id = id.into();
        let index = match &id {
            BoardId::Index(i) => wrap_index(*i, self.descriptor.boards.len()),
            BoardId::Label(label) => self.boards_by_label.get(label).copied(),
            BoardId::Address(address) => self.boards_by_address.get(address).copied(),
        };
        index
            .map(|i| &self.descriptor.boards[i])
            .ok_or_else(|| HkeError::lookup("板卡", id))
    }

    /// 寄存器全名，文件顺序
    pub fn list_registers(&self) -> &[String] {
        &self.descriptor.register_keys
    }

    pub fn get_register_description(&self, id: impl Into<RegisterId>) -> Result<&RegisterDescriptor> {
        let index = self.resolve_register(&id.into())?;
        Ok(&self.descriptor.registers[index])
    }

    /// 寄存器原始列，保留文件中的类型
    pub fn get_raw_column(&self, id: impl Into<RegisterId>) -> Result<&Column> {
        let index = self.resolve_register(&id.into())?;
        self.raw_column(index)
    }

    pub fn get_data(&self, id: impl Into<RegisterId>, options: &DataOptions) -> Result<RegisterData> {
        let index = self.resolve_register(&id.into())?;
        let reduction = reduction_or_mean(&options.reduction);
        self.extract(index, options.reduced, &options.channels, reduction)
    }

    /// 批量查询，每帧一行
    ///
    /// 单通道寄存器的列名为 `<地址>-<名称>`，多通道寄存器每个选中通道一列，
    /// 列名为 `<地址>-<名称>-<通道>`。
    pub fn get_table<I>(&self, ids: &[I], options: &TableOptions) -> Result<RegisterTable>
    where
        I: Clone + Into<RegisterId>,
    {
        options.reduced.check("reduced", ids.len())?;
        options.channels.check("channels", ids.len())?;
        let reduction = reduction_or_mean(&options.reduction);

        let mut blocks = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let index = self.resolve_register(&id.clone().into())?;
            let register = &self.descriptor.registers[index];
            let data = self.extract(
                index,
                *options.reduced.get(i),
                options.channels.get(i),
                reduction,
            )?;

            let names = data
                .channels
                .iter()
                .map(|ch| {
                    if register.nch() == 1 {
                        register.column_name.clone()
                    } else {
                        format!("{}-{}", register.column_name, ch)
                    }
                })
                .collect();
            blocks.push((names, data.values));
        }

        RegisterTable::from_blocks(self.frame_count(), blocks)
    }

    pub fn flatten_table<'t>(&self, table: &'t RegisterTable) -> ArrayView2<'t, f64> {
        flatten_table(table)
    }

    fn resolve_register(&self, id: &RegisterId) -> Result<usize> {
        let index = match id {
            RegisterId::Index(i) => wrap_index(*i, self.descriptor.registers.len()),
            RegisterId::Key(key) => self
                .registers_by_key
                .get(key)
                .or_else(|| self.registers_by_column.get(key))
                .copied()
                .or_else(|| self.registers_by_name.get(key).copied().flatten()),
        };
        index.ok_or_else(|| HkeError::lookup("寄存器", id))
    }

    fn raw_column(&self, index: usize) -> Result<&Column> {
        self.layout
            .raw_index(index)
            .and_then(|field| self.store.column_at(field))
            .ok_or_else(|| HkeError::lookup("原始列", &self.descriptor.registers[index].fullname))
    }

    fn extract(
        &self,
        index: usize,
        reduced: bool,
        channels: &Channels,
        reduction: &dyn Reduction,
    ) -> Result<RegisterData> {
        let register = &self.descriptor.registers[index];
        let selected = channels.resolve(register)?;
        let linearized = register.flags == RegisterFlags::Calibrated;

        let mut reduced = reduced;
        if reduced && register.flags == RegisterFlags::RawOnly {
            warn!("寄存器 {} 没有归约数据，改为读取原始数据", register.fullname);
            counter!("hke_query_fallback_total").increment(1);
            reduced = false;
        }

        let (column, source) = if reduced && !linearized {
            match self
                .layout
                .reduced_index(index)
                .and_then(|field| self.store.column_at(field))
            {
                Some(column) => (column, DataSource::Reduced),
                None => {
                    warn!(
                        "寄存器 {} (标志={}) 缺少归约列，改为读取原始数据",
                        register.fullname,
                        register.flags.bits()
                    );
                    counter!("hke_query_fallback_total").increment(1);
                    (self.raw_column(index)?, DataSource::RawFallback)
                }
            }
        } else if reduced {
            (self.raw_column(index)?, DataSource::Calibrated)
        } else {
            (self.raw_column(index)?, DataSource::Raw)
        };

        let mut block = column.to_array()?;
        if source == DataSource::Calibrated {
            if let Some(calibration) = register.calibration {
                block.mapv_inplace(|v| calibration.apply(v));
            }
        }

        let (frames, nch, nsamples) = column.shape();
        let per_channel: Array2<f64> = if nsamples == 1 {
            block.index_axis_move(Axis(2), 0)
        } else {
            let result = reduction.reduce(block.view(), Axis(2));
            if result.shape() != [frames, nch] {
                return Err(HkeError::ReductionContractViolation {
                    register: register.fullname.clone(),
                    expected: vec![frames, nch],
                    found: result.shape().to_vec(),
                });
            }
            result.into_dimensionality::<Ix2>()?
        };

        debug!(
            "查询 {}: 来源={:?} 通道={:?} 形状=({}, {})",
            register.fullname,
            source,
            selected,
            frames,
            selected.len()
        );

        Ok(RegisterData {
            register: register.fullname.clone(),
            source,
            values: per_channel.select(Axis(1), &selected),
            squeezed: matches!(channels, Channels::One(_)),
            channels: selected,
        })
    }
}

fn reduction_or_mean(reduction: &Option<Arc<dyn Reduction>>) -> &dyn Reduction {
    match reduction {
        Some(reduction) => reduction.as_ref(),
        None => &Mean,
    }
}

fn wrap_index(index: isize, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        len as isize + index
    } else {
        index
    };
    (0..len as isize).contains(&resolved).then_some(resolved as usize)
}
