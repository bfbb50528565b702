use std::io::Read;
use std::path::Path;

use tally_core::{
    NewTransaction, StorageError, StorageGateway, Transaction, TransactionId, TransactionKind,
};
use thiserror::Error;

use crate::csv::{self, CsvError, ParserOptions};
use crate::resolver::{CategoryResolver, ResolvedCategories};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to open import source: {0}")]
    Source(#[from] std::io::Error),
    #[error("Failed to read import source: {0}")]
    Read(#[from] CsvError),
    #[error("Category resolution failed: {0}")]
    Resolution(#[source] StorageError),
    #[error("Persisting transactions failed: {0}")]
    Persistence(#[source] StorageError),
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub parser: ParserOptions,
    /// Delete the source file once the import has finished, whatever the outcome.
    pub remove_source: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            remove_source: true,
        }
    }
}

/// A row that passed both structural and domain checks.
#[derive(Debug)]
struct PendingRow {
    title: String,
    kind: TransactionKind,
    value: i64,
    category_name: String,
}

#[derive(Debug, Default)]
struct Batch {
    rows: Vec<PendingRow>,
    /// One entry per row, empty names included, in row order.
    category_names: Vec<String>,
}

fn collect_batch<R: Read>(data: R, options: &ParserOptions) -> Result<Batch, CsvError> {
    let mut batch = Batch::default();
    for candidate in csv::parse(data, options) {
        let candidate = candidate?;
        let kind = match candidate.kind.parse::<TransactionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!(row = candidate.row, "Skipping row: {e}");
                continue;
            }
        };
        batch.category_names.push(candidate.category_name.clone());
        batch.rows.push(PendingRow {
            title: candidate.title,
            kind,
            value: candidate.value,
            category_name: candidate.category_name,
        });
    }
    Ok(batch)
}

fn bind(rows: Vec<PendingRow>, categories: &ResolvedCategories) -> Vec<NewTransaction> {
    rows.into_iter()
        .map(|row| {
            let category_id = if row.category_name.is_empty() {
                None
            } else {
                let id = categories.get(&row.category_name).map(|c| c.id);
                if id.is_none() {
                    tracing::warn!(
                        "Category '{}' was not resolved; storing '{}' without one",
                        row.category_name,
                        row.title
                    );
                }
                id
            };
            NewTransaction {
                title: row.title,
                kind: row.kind,
                value: row.value,
                category_id,
            }
        })
        .collect()
}

/// Orchestrates: parse → collect → resolve categories → bind → bulk create.
pub struct Importer<'a, G> {
    gateway: &'a G,
    options: ImportOptions,
}

impl<'a, G: StorageGateway> Importer<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self::with_options(gateway, ImportOptions::default())
    }

    pub fn with_options(gateway: &'a G, options: ImportOptions) -> Self {
        Self { gateway, options }
    }

    /// Import a file on disk. The file is removed afterwards (when
    /// `remove_source` is set) even if the import failed; a failed removal is
    /// only logged.
    pub async fn import_file(&self, path: &Path) -> Result<Vec<Transaction>, ImportError> {
        let result = self.import_path(path).await;
        if self.options.remove_source {
            remove_source(path).await;
        }
        result
    }

    async fn import_path(&self, path: &Path) -> Result<Vec<Transaction>, ImportError> {
        // Read fully up front: the file handle is closed before any storage work.
        let data = tokio::fs::read(path).await?;
        self.import_reader(data.as_slice()).await
    }

    /// Import from any reader. Returns the created transactions in the order
    /// their rows appeared.
    pub async fn import_reader<R: Read>(&self, data: R) -> Result<Vec<Transaction>, ImportError> {
        let batch = collect_batch(data, &self.options.parser)?;

        let categories = CategoryResolver::new(self.gateway)
            .resolve(&batch.category_names)
            .await
            .map_err(ImportError::Resolution)?;

        let records = bind(batch.rows, &categories);
        if records.is_empty() {
            tracing::info!("Import contained no usable rows");
            return Ok(Vec::new());
        }

        let created = self
            .gateway
            .create_transactions(&records)
            .await
            .map_err(ImportError::Persistence)?;

        tracing::info!(
            transactions = created.len(),
            categories_created = categories.created().len(),
            "Import complete"
        );
        Ok(created)
    }
}

async fn remove_source(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Could not remove import source {}: {e}", path.display());
    }
}

/// Remove a single transaction. An unknown id is not an error.
pub async fn delete_transaction<G: StorageGateway>(
    gateway: &G,
    id: TransactionId,
) -> Result<(), StorageError> {
    gateway.delete_transaction(id).await?;
    tracing::info!(%id, "Deleted transaction");
    Ok(())
}
