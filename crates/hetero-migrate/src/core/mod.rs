//! Engine-neutral core types: schema metadata, SQL values, and the
//! connector capability traits.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnRole, ColumnSpec, ForeignKey, SchemaArtifact, TableSpec};
pub use traits::{
    encode_key, hash_row, AggregateFn, BulkLoadOutcome, ChunkQuery, ColumnStats, KeyHash,
    KeysetCursor, RowError, SampleSpec, SourceConnector, TableRef, TargetConnector,
};
pub use value::{Row, SqlValue};
