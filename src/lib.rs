pub mod error;
pub mod config;
pub mod register_type;
pub mod byte_cursor;
pub mod descriptor_parser;
pub mod record_layout;
pub mod frame_store;
pub mod reduction;
pub mod register_table;
pub mod file_source;
pub mod query_engine;
pub mod test_data_generator;

pub use error::{HkeError, Result};
pub use config::EngineConfig;
pub use register_type::RegisterType;
pub use descriptor_parser::{BoardDescriptor, FileDescriptor, LinearCalibration, RegisterDescriptor, RegisterFlags, parse_header};
pub use record_layout::{FieldKind, FieldLayout, RecordLayout};
pub use frame_store::{Column, ColumnData, DecodeStats, FrameStore};
pub use reduction::{Max, Mean, Median, Min, Reduction, Sum};
pub use register_table::{RegisterTable, flatten_table};
pub use query_engine::{BoardId, Channels, DataOptions, DataSource, HkeBinaryFile, PerRegister, RegisterData, RegisterId, TableOptions};
pub use test_data_generator::{TestDataGenerator, TestDataConfig, TestFileBuilder};
