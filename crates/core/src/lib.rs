pub mod category;
pub mod gateway;
pub mod transaction;

pub use category::{Category, CategoryId};
pub use gateway::{CallCounts, FailPoint, MemoryGateway, StorageError, StorageGateway};
pub use transaction::{NewTransaction, Transaction, TransactionId, TransactionKind, UnknownKind};
