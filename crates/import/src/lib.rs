pub mod csv;
pub mod importer;
pub mod resolver;

pub use csv::{CandidateRecord, CandidateRecords, CsvError, ParserOptions};
pub use importer::{delete_transaction, ImportError, ImportOptions, Importer};
pub use resolver::{CategoryResolver, ResolvedCategories};
