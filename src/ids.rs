//! Identifier types shared by the menu and order sides.
//!
//! Every syncable entity has two identities: the row id the local store
//! assigns (`LocalId`) and the id the POS assigns (`PosId`). The POS id is
//! the join key between a POS snapshot and the local cache.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned row id. Stable across syncs once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub i64);

/// POS-assigned id, unique per entity type within the POS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PosId(pub i64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! sql_id {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($ty)
            }
        }
    };
}

sql_id!(LocalId);
sql_id!(PosId);

/// A decoded entry of a POS line's signed modifier list.
///
/// The POS encodes removal by negating the modifier id: `456` adds modifier
/// 456 to the line, `-456` removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierRef {
    pub pos_id: PosId,
    pub added: bool,
}

impl ModifierRef {
    /// Returns `None` for `i64::MIN`, which has no positive counterpart.
    pub fn decode(raw: i64) -> Option<Self> {
        let abs = raw.checked_abs()?;
        Some(Self {
            pos_id: PosId(abs),
            added: raw >= 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_signed_modifier_ids() {
        assert_eq!(
            ModifierRef::decode(456),
            Some(ModifierRef {
                pos_id: PosId(456),
                added: true
            })
        );
        assert_eq!(
            ModifierRef::decode(-456),
            Some(ModifierRef {
                pos_id: PosId(456),
                added: false
            })
        );
        // zero counts as added
        assert_eq!(ModifierRef::decode(0).map(|m| m.added), Some(true));
        assert_eq!(ModifierRef::decode(i64::MIN), None);
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&(LocalId(7), PosId(123))).expect("serialize ids");
        assert_eq!(json, "[7,123]");
    }
}
