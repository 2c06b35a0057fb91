//! URI dispatch: the path trie with prefix fallback, the resource handler
//! contract, and the manager that routes decoded messages and translates
//! handler errors into wire responses.

pub mod handler;
pub mod manager;
pub mod trie;

pub use handler::{Resource, Respond};
pub use manager::ResourceManager;
pub use trie::PathTrie;
