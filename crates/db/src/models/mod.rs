//! Row types for the lead distribution tables.
//!
//! Enumerations are stored as TEXT, conditions and snapshots as JSONB. Each
//! row converts into its `leadroute_core` entity with `TryFrom`, failing with
//! [`StoreError::Invalid`] on text the domain does not recognise.

pub mod agent;
pub mod assignment;
pub mod lead;
pub mod rule;

use std::str::FromStr;

use leadroute_core::error::CoreError;

use crate::error::{StoreError, StoreResult};

/// Parse a stored TEXT column into a domain enum.
pub(crate) fn parse_text<T>(column: &str, value: &str) -> StoreResult<T>
where
    T: FromStr<Err = CoreError>,
{
    value
        .parse()
        .map_err(|e: CoreError| StoreError::Invalid(format!("{column}: {e}")))
}
