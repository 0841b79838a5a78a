//! Service layer
//!
//! Services contain the persistence-facing business logic of the engine:
//! transactional job updates on top of the job repository.

mod transactions;

pub use transactions::{FINAL_WRITE_ATTEMPTS, INTERMEDIATE_WRITE_ATTEMPTS, JobTransactions};
