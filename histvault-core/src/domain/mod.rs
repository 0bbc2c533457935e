//! Domain types: archive coordinates and symbols

pub mod kind;
pub mod period;
pub mod symbol;

pub use kind::{DataKind, Granularity, Interval, ParseError, Segment};
pub use period::{days_between, months_between, Period};
pub use symbol::{normalize_symbol, Symbol, SymbolType};
