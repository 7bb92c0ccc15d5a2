//! # Store Primitives
//!
//! Fixed constants shared across the Grove store.

/// Separator between the encoded components of an edge identity.
pub const EDGE_ID_SEPARATOR: char = '|';

/// First handle allocated by a `StoreRegistry`.
pub const FIRST_STORE_HANDLE: u64 = 1;

/// Action kind that writes a node.
pub const PUT_NODE_ACTION: &str = "put node";

/// Action kind that writes an edge.
pub const PUT_EDGE_ACTION: &str = "put edge";

/// Extension name holding the engine's `Lifecycle` implementation.
pub const LIFECYCLE_EXTENSION: &str = "lifecycle";

/// Field carrying a record's identity in published snapshots.
pub const RECORD_ID_FIELD: &str = "recordId";

/// Field carrying a record's version in published snapshots.
pub const VERSION_FIELD: &str = "version";

/// Field used by `GraphContext::select_named`.
pub const NAME_FIELD: &str = "name";

/// Separator between names in builder node paths (and generated node ids).
pub const PATH_SEPARATOR: char = '/';

// =============================================================================
// CANONICAL EXPORT
// =============================================================================

/// Magic bytes for the canonical export format.
pub const MAGIC_BYTES: &[u8; 4] = b"GRVX";

/// Current canonical export format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum accepted size of a canonical export payload.
pub const MAX_EXPORT_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kinds_are_distinct() {
        assert_ne!(PUT_NODE_ACTION, PUT_EDGE_ACTION);
    }

    #[test]
    fn handles_start_at_one() {
        assert_eq!(FIRST_STORE_HANDLE, 1);
    }
}
