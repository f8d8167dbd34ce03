//! Message CRUD, split into read and write operations.

pub mod read;
pub mod write;
