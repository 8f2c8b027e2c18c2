//! Concrete implementations of the driven ports.

pub mod address_book;
pub mod memory;
pub mod time;

pub use address_book::AddressBook;
pub use memory::{
    CipherSession, MemoryConnection, MemoryConnectionPool, MemoryNetwork, DEFAULT_FRAME_CAPACITY,
};
pub use time::SystemTimeSource;
