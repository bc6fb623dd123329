use arrow::array::{
    Array, ArrayRef, Decimal128Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gapwatch_application::ports::{BarRepository, RepositoryError};
use gapwatch_domain::{Bar, Timeframe};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use shaku::Component;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

const PRICE_PRECISION: u8 = 38;
const PRICE_SCALE: i8 = gapwatch_domain::PRICE_SCALE as i8;

/// Bar series as Parquet files, one per (symbol, timeframe, UTC day):
/// `{data_dir}/{symbol}/{timeframe}/{YYYYMMDD}.parquet`.
///
/// Appending rewrites the day file through a temporary file and an atomic
/// rename, so a crash leaves either the old day or the new one.
#[derive(Component)]
#[shaku(interface = BarRepository)]
pub struct ParquetBarRepository {
    data_dir: PathBuf,
    #[shaku(default = Mutex::new(()))]
    write_lock: Mutex<()>,
}

impl ParquetBarRepository {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            write_lock: Mutex::new(()),
        }
    }

    fn create_schema() -> Arc<Schema> {
        let price = DataType::Decimal128(PRICE_PRECISION, PRICE_SCALE);
        Arc::new(Schema::new(vec![
            Field::new(
                "open_time",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("symbol", DataType::Utf8, false),
            Field::new("timeframe", DataType::Utf8, false),
            Field::new("open", price.clone(), false),
            Field::new("high", price.clone(), false),
            Field::new("low", price.clone(), false),
            Field::new("close", price.clone(), false),
            Field::new("volume", price, false),
        ]))
    }

    fn series_dir(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir.join(symbol).join(timeframe.as_str())
    }

    fn day_file(&self, symbol: &str, timeframe: Timeframe, ts: DateTime<Utc>) -> PathBuf {
        self.series_dir(symbol, timeframe)
            .join(format!("{}.parquet", ts.format("%Y%m%d")))
    }

    // Day files in chronological order; names sort as dates.
    fn day_files(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<PathBuf>, RepositoryError> {
        let dir = self.series_dir(symbol, timeframe);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_file(path: &Path) -> Result<Vec<Bar>, RepositoryError> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .and_then(|builder| builder.build())
            .map_err(|e| corrupt(path, e))?;

        let mut bars = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| corrupt(path, e))?;
            bars.extend(Self::record_batch_to_bars(path, &batch)?);
        }
        bars.sort_by_key(Bar::open_time);
        Ok(bars)
    }

    fn record_batch_to_bars(path: &Path, batch: &RecordBatch) -> Result<Vec<Bar>, RepositoryError> {
        let open_times = column::<TimestampMicrosecondArray>(path, batch, "open_time")?;
        let symbols = column::<StringArray>(path, batch, "symbol")?;
        let timeframes = column::<StringArray>(path, batch, "timeframe")?;
        let opens = column::<Decimal128Array>(path, batch, "open")?;
        let highs = column::<Decimal128Array>(path, batch, "high")?;
        let lows = column::<Decimal128Array>(path, batch, "low")?;
        let closes = column::<Decimal128Array>(path, batch, "close")?;
        let volumes = column::<Decimal128Array>(path, batch, "volume")?;

        let mut bars = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let open_time = DateTime::from_timestamp_micros(open_times.value(row))
                .ok_or_else(|| corrupt(path, "timestamp out of range"))?;
            let timeframe = timeframes
                .value(row)
                .parse::<Timeframe>()
                .map_err(|e| corrupt(path, e))?;
            let bar = Bar::new(
                symbols.value(row).to_string(),
                timeframe,
                open_time,
                from_raw(path, opens.value(row))?,
                from_raw(path, highs.value(row))?,
                from_raw(path, lows.value(row))?,
                from_raw(path, closes.value(row))?,
                from_raw(path, volumes.value(row))?,
            )
            .map_err(|e| corrupt(path, e))?;
            bars.push(bar);
        }
        Ok(bars)
    }

    fn bars_to_record_batch(bars: &[Bar]) -> Result<RecordBatch, RepositoryError> {
        let decimals = |field: fn(&Bar) -> Decimal| -> Result<ArrayRef, RepositoryError> {
            let raw = bars
                .iter()
                .map(|bar| to_raw(field(bar)))
                .collect::<Result<Vec<i128>, _>>()?;
            let array = Decimal128Array::from(raw)
                .with_precision_and_scale(PRICE_PRECISION, PRICE_SCALE)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
            Ok(Arc::new(array))
        };

        let open_times: Vec<i64> = bars.iter().map(|b| b.open_time().timestamp_micros()).collect();
        let symbols: Vec<&str> = bars.iter().map(Bar::symbol).collect();
        let timeframes: Vec<&str> = bars.iter().map(|b| b.timeframe().as_str()).collect();

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(TimestampMicrosecondArray::from(open_times).with_timezone("UTC")),
            Arc::new(StringArray::from(symbols)),
            Arc::new(StringArray::from(timeframes)),
            decimals(Bar::open)?,
            decimals(Bar::high)?,
            decimals(Bar::low)?,
            decimals(Bar::close)?,
            decimals(Bar::volume)?,
        ];

        RecordBatch::try_new(Self::create_schema(), arrays)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    fn write_file(path: &Path, bars: &[Bar]) -> Result<(), RepositoryError> {
        let dir = path
            .parent()
            .ok_or_else(|| RepositoryError::SerializationError("day file has no parent".into()))?;
        fs::create_dir_all(dir)?;

        let batch = Self::bars_to_record_batch(bars)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), Self::create_schema(), Some(props))
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
            writer
                .write(&batch)
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
            writer
                .close()
                .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RepositoryError::IoError(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl BarRepository for ParquetBarRepository {
    async fn append(&self, bar: &Bar) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let path = self.day_file(bar.symbol(), bar.timeframe(), bar.open_time());

        let mut bars = Self::read_file(&path)?;
        if bars.iter().any(|b| b.open_time() == bar.open_time()) {
            return Ok(());
        }
        bars.push(bar.clone());
        bars.sort_by_key(Bar::open_time);

        Self::write_file(&path, &bars)?;
        debug!("Persisted {} {} bar at {} to {}", bar.symbol(), bar.timeframe(), bar.open_time(), path.display());
        Ok(())
    }

    async fn load_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, RepositoryError> {
        let mut newest_first: Vec<Bar> = Vec::new();
        for path in self.day_files(symbol, timeframe)?.iter().rev() {
            if newest_first.len() >= n {
                break;
            }
            newest_first.extend(Self::read_file(path)?.into_iter().rev());
        }
        newest_first.truncate(n);
        newest_first.reverse();
        Ok(newest_first)
    }

    async fn load_all(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, RepositoryError> {
        let mut bars = Vec::new();
        for path in self.day_files(symbol, timeframe)? {
            bars.extend(Self::read_file(&path)?);
        }
        Ok(bars)
    }

    async fn contains(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let path = self.day_file(symbol, timeframe, open_time);
        Ok(Self::read_file(&path)?
            .iter()
            .any(|bar| bar.open_time() == open_time))
    }
}

fn column<'a, T: Array + 'static>(
    path: &Path,
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, RepositoryError> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| corrupt(path, format!("missing or mistyped column {}", name)))
}

fn to_raw(value: Decimal) -> Result<i128, RepositoryError> {
    let mut scaled = value;
    scaled.rescale(PRICE_SCALE as u32);
    if scaled != value {
        return Err(RepositoryError::SerializationError(format!(
            "{} does not fit {} decimal places",
            value, PRICE_SCALE
        )));
    }
    Ok(scaled.mantissa())
}

fn from_raw(path: &Path, raw: i128) -> Result<Decimal, RepositoryError> {
    Decimal::try_from_i128_with_scale(raw, PRICE_SCALE as u32)
        .map(|value| value.normalize())
        .map_err(|e| corrupt(path, e))
}

fn corrupt(path: &Path, reason: impl ToString) -> RepositoryError {
    RepositoryError::CorruptRecord {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
