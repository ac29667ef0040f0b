pub mod catalog;
pub mod connect;
mod executor;
pub mod snapshot;
pub mod value;

pub use catalog::{
    describe_table, is_system_column, list_tables, primary_key_columns, ColumnInfo,
    TableDescriptor, TableName, CREATED_AT, SYSTEM_COLUMNS, UPDATED_AT,
};
pub use connect::{ConnectionSpec, Connector, Credential};
pub use executor::*;
pub use snapshot::{load_snapshot, row_from_json, Snapshot};
pub use value::{
    format_literal, normalize_epoch, normalize_epoch_f64, quote_ident, ColumnKind, Row, Value,
};
