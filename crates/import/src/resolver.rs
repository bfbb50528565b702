use std::collections::{HashMap, HashSet};

use tally_core::{Category, StorageError, StorageGateway};

/// Every category a batch refers to, keyed by exact title.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCategories {
    by_title: HashMap<String, Category>,
    created: Vec<Category>,
}

impl ResolvedCategories {
    pub fn get(&self, title: &str) -> Option<&Category> {
        self.by_title.get(title)
    }

    /// Categories that did not exist before this resolution, in first-seen order.
    pub fn created(&self) -> &[Category] {
        &self.created
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }
}

/// Distinct non-empty names, in first-seen order.
pub fn distinct_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| !name.is_empty() && seen.insert(name))
        .map(str::to_string)
        .collect()
}

/// Maps category names to stored categories, creating whichever are absent.
/// One lookup and at most one bulk create per call; never a query per row.
pub struct CategoryResolver<'a, G> {
    gateway: &'a G,
}

impl<'a, G: StorageGateway> CategoryResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    pub async fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<ResolvedCategories, StorageError> {
        let wanted = distinct_names(names);
        if wanted.is_empty() {
            return Ok(ResolvedCategories::default());
        }

        let existing = self.gateway.find_categories_by_titles(&wanted).await?;
        let known: HashSet<&str> = existing.iter().map(|c| c.title.as_str()).collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();

        let created = if missing.is_empty() {
            Vec::new()
        } else {
            self.gateway.create_categories(&missing).await?
        };

        tracing::debug!(
            requested = wanted.len(),
            existing = existing.len(),
            created = created.len(),
            "Resolved categories"
        );

        let by_title = existing
            .into_iter()
            .chain(created.iter().cloned())
            .map(|c| (c.title.clone(), c))
            .collect();

        Ok(ResolvedCategories { by_title, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{FailPoint, MemoryGateway};

    #[test]
    fn distinct_names_drops_empty_and_duplicates_in_order() {
        let names = ["Food", "", "Work", "Food", "food", "", "Work"];
        assert_eq!(distinct_names(&names), vec!["Food", "Work", "food"]);
    }

    #[tokio::test]
    async fn creates_one_category_per_distinct_name() {
        let gw = MemoryGateway::new();
        let names = ["Travel", "Travel", "Food", "Travel", "", "Food"];
        let resolved = CategoryResolver::new(&gw).resolve(&names).await.unwrap();

        assert_eq!(resolved.len(), 2);
        let created: Vec<&str> = resolved.created().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(created, vec!["Travel", "Food"]);
        assert_eq!(gw.categories().len(), 2);
        assert_eq!(gw.calls().create_categories, 1);
    }

    #[tokio::test]
    async fn existing_categories_are_reused() {
        let gw = MemoryGateway::with_categories(&["Food"]);
        let food_id = gw.categories()[0].id;

        let resolved = CategoryResolver::new(&gw)
            .resolve(&["Work", "Food"])
            .await
            .unwrap();

        assert_eq!(resolved.get("Food").unwrap().id, food_id);
        assert!(resolved.get("Work").is_some());
        assert_eq!(resolved.created().len(), 1);
        assert_eq!(gw.categories().len(), 2);
    }

    #[tokio::test]
    async fn second_resolution_creates_nothing() {
        let gw = MemoryGateway::new();
        let resolver = CategoryResolver::new(&gw);
        let names = ["Work", "Food", "Work"];

        let first = resolver.resolve(&names).await.unwrap();
        let second = resolver.resolve(&names).await.unwrap();

        assert!(second.created().is_empty());
        assert_eq!(gw.calls().create_categories, 1);
        assert_eq!(first.get("Work").unwrap().id, second.get("Work").unwrap().id);
    }

    #[tokio::test]
    async fn titles_are_case_sensitive() {
        let gw = MemoryGateway::with_categories(&["food"]);
        let resolved = CategoryResolver::new(&gw).resolve(&["Food"]).await.unwrap();
        assert_eq!(resolved.created().len(), 1);
        assert!(resolved.get("food").is_none());
        assert_eq!(gw.categories().len(), 2);
    }

    #[tokio::test]
    async fn empty_input_touches_no_storage() {
        let gw = MemoryGateway::new();
        let resolved = CategoryResolver::new(&gw).resolve(&["", ""]).await.unwrap();
        assert!(resolved.is_empty());
        assert_eq!(gw.calls().find_categories, 0);
        assert_eq!(gw.calls().create_categories, 0);
    }

    #[tokio::test]
    async fn all_known_skips_bulk_create() {
        let gw = MemoryGateway::with_categories(&["Food", "Work"]);
        CategoryResolver::new(&gw)
            .resolve(&["Work", "Food"])
            .await
            .unwrap();
        assert_eq!(gw.calls().find_categories, 1);
        assert_eq!(gw.calls().create_categories, 0);
    }

    #[tokio::test]
    async fn bulk_create_failure_propagates() {
        let gw = MemoryGateway::new();
        gw.fail_next(FailPoint::CreateCategories);
        let err = CategoryResolver::new(&gw)
            .resolve(&["Travel"])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(gw.categories().is_empty());
    }
}
