//! Redb table definitions for persistent table metadata.

use redb::TableDefinition;

// Key: table name, Value: bincode-encoded TableSchema
pub const SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new("schemas");
// Key: "table\x00{seq:016x}", Value: bincode-encoded StoredRow
pub const ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("rows");
