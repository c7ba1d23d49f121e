//! SQL layer over the events and outbox tables.
//!
//! Repository functions take an executor so the same code runs against the
//! pool or inside an explicit transaction; the transactional writer owns
//! begin/commit.

pub mod events;
pub mod outbox;
pub mod writer;

pub use writer::TransactionalWriter;
