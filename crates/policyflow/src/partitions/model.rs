use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::PartitionKeyType;

pub type ChunkId = i32;

/// Schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationName {
    pub schema: String,
    pub name: String,
}

impl RelationName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Identifier-quoted form usable as a `regclass` literal.
    pub fn quoted(&self) -> String {
        format!(
            "\"{}\".\"{}\"",
            self.schema.replace('"', "\"\""),
            self.name.replace('"', "\"\"")
        )
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypertable {
    pub id: i32,
    pub relation: RelationName,
}

/// Name of a user function returning "now" for integer-keyed dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerNowFunc {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub id: i32,
    pub hypertable_id: i32,
    pub column_name: String,
    pub key_type: PartitionKeyType,
    pub integer_now_func: Option<IntegerNowFunc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSlice {
    pub id: i32,
    pub dimension_id: i32,
    pub range_start: i64,
    pub range_end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub hypertable_id: i32,
    pub relation: RelationName,
    pub compressed: bool,
    pub dropped: bool,
}

/// An index together with the relation it is defined on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub index: RelationName,
    pub table: RelationName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousAgg {
    pub mat_hypertable_id: i32,
    pub raw_hypertable_id: i32,
    pub user_view: RelationName,
}
