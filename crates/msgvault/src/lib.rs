//! Core types shared by every msgvault backend: stream names, the hashing
//! scheme used for advisory locks and consumer-group assignment, the message
//! envelope, and the backend-agnostic [`Store`] contract.

mod error;
mod hash;
mod message;
pub mod stream_name;
mod store;

pub use error::{Error, Result};
pub use hash::{assigned_to_member, hash64};
pub use message::{Message, Metadata, NewMessage};
pub use store::{
    CategoryOpts, ConsumerGroup, ImportRecord, ListCategoriesItem, ListStreamsItem,
    ListStreamsOpts, NamespaceInfo, Store, StreamOpts, WriteOpts,
};
pub use stream_name::{Category, StreamName, ID};
