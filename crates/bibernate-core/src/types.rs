//! Declared SQL column types.

use serde::{Deserialize, Serialize};

/// The declared type of a mapped field.
///
/// Each entity field declares one of these. It drives identifier casting
/// (a generated key is converted to the id field's type) and the SQL type
/// name carried by column descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Decimal,
    Text,
    Blob,
}

impl SqlType {
    /// The SQL type name used in column descriptors.
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Text => "VARCHAR",
            SqlType::Blob => "BLOB",
        }
    }

    /// Whether values of this type are integral.
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }
}
