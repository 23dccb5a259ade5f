//! redb table definitions for the output store.
//!
//! Keys follow `{execution_id}/{level}/{owner}/{name}` with escaped
//! components; values are the JSON-serialized `OutputEntry`.

use redb::TableDefinition;

/// Published outputs keyed by their rendered scope key.
pub const OUTPUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("sweeping_outputs");
