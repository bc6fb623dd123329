pub mod parquet;

pub use self::parquet::{ParquetBarRepository, ParquetBarRepositoryParameters};
