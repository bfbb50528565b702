use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::category::Category;
use crate::transaction::{NewTransaction, Transaction, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence operations the import pipeline depends on.
///
/// Both bulk creates are atomic per call: either every row is stored or none
/// is. Nothing is atomic *across* calls unless the implementation says so.
pub trait StorageGateway: Send + Sync {
    /// Every stored category whose title exactly matches one of `titles`.
    fn find_categories_by_titles(
        &self,
        titles: &[String],
    ) -> impl Future<Output = Result<Vec<Category>, StorageError>> + Send;

    /// Insert one category per title, returned in input order with their
    /// assigned identities.
    fn create_categories(
        &self,
        titles: &[String],
    ) -> impl Future<Output = Result<Vec<Category>, StorageError>> + Send;

    /// Insert the records, returned in input order.
    fn create_transactions(
        &self,
        records: &[NewTransaction],
    ) -> impl Future<Output = Result<Vec<Transaction>, StorageError>> + Send;

    /// Remove a transaction. Deleting an unknown id succeeds.
    fn delete_transaction(
        &self,
        id: TransactionId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

// ── In-memory backend (always available, used for tests) ──────────────────────

/// Number of times each gateway operation has been invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub find_categories: usize,
    pub create_categories: usize,
    pub create_transactions: usize,
    pub delete_transaction: usize,
}

/// Which bulk create should fail on its next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateCategories,
    CreateTransactions,
}

#[derive(Default)]
struct MemoryState {
    categories: Vec<Category>,
    transactions: Vec<Transaction>,
    calls: CallCounts,
    fail_next: Option<FailPoint>,
}

/// Keeps categories and transactions in a `Vec` behind a mutex. Enforces the
/// same constraints as the SQLite schema: unique category titles and category
/// references that must exist.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given categories already stored.
    pub fn with_categories(titles: &[&str]) -> Self {
        let gateway = Self::new();
        gateway.state().categories = titles.iter().map(|t| Category::new(t)).collect();
        gateway
    }

    pub fn categories(&self) -> Vec<Category> {
        self.state().categories.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Make the next call at `point` fail with a conflict, leaving state untouched.
    pub fn fail_next(&self, point: FailPoint) {
        self.state().fail_next = Some(point);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn take_failure(&mut self, point: FailPoint) -> bool {
        if self.fail_next == Some(point) {
            self.fail_next = None;
            true
        } else {
            false
        }
    }
}

impl StorageGateway for MemoryGateway {
    async fn find_categories_by_titles(
        &self,
        titles: &[String],
    ) -> Result<Vec<Category>, StorageError> {
        let mut state = self.state();
        state.calls.find_categories += 1;
        let wanted: HashSet<&str> = titles.iter().map(String::as_str).collect();
        Ok(state
            .categories
            .iter()
            .filter(|c| wanted.contains(c.title.as_str()))
            .cloned()
            .collect())
    }

    async fn create_categories(&self, titles: &[String]) -> Result<Vec<Category>, StorageError> {
        let mut state = self.state();
        state.calls.create_categories += 1;
        if state.take_failure(FailPoint::CreateCategories) {
            return Err(StorageError::Conflict("injected category failure".to_string()));
        }

        let mut seen: HashSet<&str> = state.categories.iter().map(|c| c.title.as_str()).collect();
        for title in titles {
            if !seen.insert(title.as_str()) {
                return Err(StorageError::Conflict(format!(
                    "category title already exists: {title}"
                )));
            }
        }

        let created: Vec<Category> = titles.iter().map(|t| Category::new(t)).collect();
        state.categories.extend(created.iter().cloned());
        Ok(created)
    }

    async fn create_transactions(
        &self,
        records: &[NewTransaction],
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut state = self.state();
        state.calls.create_transactions += 1;
        if state.take_failure(FailPoint::CreateTransactions) {
            return Err(StorageError::Backend("injected transaction failure".to_string()));
        }

        for record in records {
            if let Some(category_id) = record.category_id {
                if !state.categories.iter().any(|c| c.id == category_id) {
                    return Err(StorageError::Backend(format!(
                        "category {category_id} does not exist"
                    )));
                }
            }
        }

        let now = Utc::now();
        let created: Vec<Transaction> = records
            .iter()
            .cloned()
            .map(|r| Transaction::from_new(r, now))
            .collect();
        state.transactions.extend(created.iter().cloned());
        Ok(created)
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.delete_transaction += 1;
        state.transactions.retain(|t| t.id != id);
        Ok(())
    }
}
