//! Namespace registry and schema migrator (spec §4.2 / §4.3).
//!
//! Every namespace the server knows about — its id, bearer-token hash,
//! physical location, and metadata — lives in one registry, independent of
//! which backend that namespace's messages are actually stored in. Namespace
//! and metadata bootstrap SQL/DDL templates live in [`migrate`].

mod error;
mod migrate;
mod registry;

pub use error::{Error, Result};
pub use migrate::{
    render_namespace_migration, sanitize_schema_name, Migration, METADATA_MIGRATIONS,
    NAMESPACE_MIGRATIONS,
};
pub use registry::{NamespaceRow, RegistryHandle};
