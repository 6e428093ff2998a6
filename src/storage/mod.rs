//! Persistence: console cache, credential store and their JSON codec

pub mod cache;
pub mod codec;
pub mod credentials;
pub mod paths;

pub use cache::{ConsoleCache, ValidationReport};
pub use credentials::{Credential, CredentialStore};
pub use paths::DataPaths;
