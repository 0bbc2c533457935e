use polars::prelude::*;

/// Name of the derived, timezone-labelled timestamp column appended to every table.
pub const DATETIME_COLUMN: &str = "datetime";

/// Physical type of one source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    Boolean,
    Utf8,
}

impl ColumnType {
    pub fn dtype(&self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Utf8 => DataType::String,
        }
    }
}

/// How the timestamp column is encoded in the CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeEncoding {
    /// Integer epoch milliseconds (microseconds are detected and scaled).
    EpochMillis,
    /// UTC wall-clock text in the given `strftime` format.
    Formatted(&'static str),
}

/// Fixed positional layout of one kind's CSV payload.
#[derive(Debug)]
pub struct TableSchema {
    pub columns: &'static [(&'static str, ColumnType)],
    /// Index into `columns` of the column the `datetime` column is derived from.
    pub time_column: usize,
    pub time_encoding: TimeEncoding,
}

use ColumnType::{Boolean, Float64, Int64, Utf8};

pub static KLINES: TableSchema = TableSchema {
    columns: &[
        ("open_time", Int64),
        ("open", Float64),
        ("high", Float64),
        ("low", Float64),
        ("close", Float64),
        ("volume", Float64),
        ("close_time", Int64),
        ("quote_volume", Float64),
        ("count", Int64),
        ("taker_buy_volume", Float64),
        ("taker_buy_quote_volume", Float64),
        ("ignore", Float64),
    ],
    time_column: 0,
    time_encoding: TimeEncoding::EpochMillis,
};

pub static AGG_TRADES: TableSchema = TableSchema {
    columns: &[
        ("agg_trade_id", Int64),
        ("price", Float64),
        ("quantity", Float64),
        ("first_trade_id", Int64),
        ("last_trade_id", Int64),
        ("transact_time", Int64),
        ("is_buyer_maker", Boolean),
    ],
    time_column: 5,
    time_encoding: TimeEncoding::EpochMillis,
};

pub static BOOK_TICKER: TableSchema = TableSchema {
    columns: &[
        ("update_id", Int64),
        ("bid_price", Float64),
        ("bid_quantity", Float64),
        ("ask_price", Float64),
        ("ask_quantity", Float64),
        ("transaction_time", Int64),
        ("event_time", Int64),
    ],
    time_column: 6,
    time_encoding: TimeEncoding::EpochMillis,
};

pub static FUNDING_RATE: TableSchema = TableSchema {
    columns: &[
        ("calc_time", Int64),
        ("funding_interval_hours", Int64),
        ("last_funding_rate", Float64),
    ],
    time_column: 0,
    time_encoding: TimeEncoding::EpochMillis,
};

pub static TRADES: TableSchema = TableSchema {
    columns: &[
        ("id", Int64),
        ("price", Float64),
        ("qty", Float64),
        ("base_qty", Float64),
        ("time", Int64),
        ("is_buyer_maker", Boolean),
    ],
    time_column: 4,
    time_encoding: TimeEncoding::EpochMillis,
};

pub static METRICS: TableSchema = TableSchema {
    columns: &[
        ("create_time", Utf8),
        ("symbol", Utf8),
        ("sum_open_interest", Float64),
        ("sum_open_interest_value", Float64),
        ("count_toptrader_long_short_ratio", Float64),
        ("sum_toptrader_long_short_ratio", Float64),
        ("count_long_short_ratio", Float64),
        ("sum_taker_long_short_vol_ratio", Float64),
    ],
    time_column: 0,
    time_encoding: TimeEncoding::Formatted("%Y-%m-%d %H:%M:%S"),
};

impl TableSchema {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    /// Output schema: source columns followed by `datetime` labelled with `tz`.
    pub fn schema(&self, tz: &str) -> Schema {
        let mut fields: Vec<Field> = self
            .columns
            .iter()
            .map(|(name, ty)| Field::new((*name).into(), ty.dtype()))
            .collect();
        fields.push(Field::new(DATETIME_COLUMN.into(), datetime_dtype(tz)));
        Schema::from_iter(fields)
    }

    /// An empty table with this schema.
    pub fn empty(&self, tz: &str) -> DataFrame {
        DataFrame::empty_with_schema(&self.schema(tz))
    }

    /// Validate a DataFrame against this schema (names and types, `datetime` zone ignored).
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let actual = df.schema();

        for (name, ty) in self.columns {
            let actual_dtype = actual
                .get(name)
                .ok_or_else(|| SchemaError::MissingColumn((*name).to_string()))?;
            let expected = ty.dtype();
            if *actual_dtype != expected {
                return Err(SchemaError::TypeMismatch {
                    column: (*name).to_string(),
                    expected,
                    actual: actual_dtype.clone(),
                });
            }
        }

        match actual.get(DATETIME_COLUMN) {
            None => Err(SchemaError::MissingColumn(DATETIME_COLUMN.to_string())),
            Some(DataType::Datetime(TimeUnit::Milliseconds, _)) => Ok(()),
            Some(other) => Err(SchemaError::TypeMismatch {
                column: DATETIME_COLUMN.to_string(),
                expected: datetime_dtype("UTC"),
                actual: other.clone(),
            }),
        }
    }
}

pub fn datetime_dtype(tz: &str) -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, Some(tz.into()))
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
