use std::collections::{HashMap, HashSet};

use folio_types::{DocumentId, Record, Stored};
use tracing::debug;

use crate::collection::Collection;
use crate::error::CollectionResult;

/// Memoizes reads by id for the lifetime of the scope.
///
/// Misses, absent documents included, are remembered as well. Entries are
/// never refreshed on their own: the scope sees the collection as it was at
/// first read, until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear). Reads bypass transactions.
pub struct ReadThroughCache<'c, T: Record> {
    collection: &'c Collection<T>,
    entries: HashMap<DocumentId, Option<Stored<T>>>,
}

impl<'c, T: Record> ReadThroughCache<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>) -> Self {
        Self {
            collection,
            entries: HashMap::new(),
        }
    }

    pub async fn get(&mut self, id: &DocumentId) -> CollectionResult<Option<Stored<T>>> {
        if let Some(hit) = self.entries.get(id) {
            return Ok(hit.clone());
        }
        let found = self.collection.query().by_id(id, None).await?;
        self.entries.insert(id.clone(), found.clone());
        Ok(found)
    }

    /// Read several ids, fetching all misses in one store call.
    pub async fn get_many(&mut self, ids: &[DocumentId]) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let mut seen = HashSet::new();
        let missing: Vec<DocumentId> = ids
            .iter()
            .filter(|id| !self.entries.contains_key(*id) && seen.insert(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(
                collection = %self.collection.name(),
                hits = ids.len() - missing.len(),
                misses = missing.len(),
                "read-through fetch"
            );
            let found = self.collection.query().by_ids(&missing, None).await?;
            self.entries.extend(missing.into_iter().zip(found));
        }
        Ok(ids
            .iter()
            .map(|id| self.entries.get(id).cloned().flatten())
            .collect())
    }

    /// Forget one id; the next read goes to the store.
    pub fn invalidate(&mut self, id: &DocumentId) {
        self.entries.remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use folio_store::InMemoryStore;
    use folio_types::Draft;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::config::CollectionDeclaration;
    use crate::hooks::NoOpHooks;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    fn notes(store: Arc<InMemoryStore>) -> Collection<Note> {
        Collection::new(CollectionDeclaration::new("notes", &["v1"]), store, Arc::new(NoOpHooks)).unwrap()
    }

    fn note(id: &str, title: &str) -> Draft<Note> {
        Draft::new(Note { title: title.into() }).with_id(DocumentId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn repeated_reads_hit_the_scope() {
        let store = Arc::new(InMemoryStore::new());
        let notes = notes(store.clone());
        notes.create().item(note("a", "first"), None).await.unwrap();

        let mut cache = notes.read_through_cache();
        let id = DocumentId::parse("a").unwrap();
        assert_eq!(cache.get(&id).await.unwrap().unwrap().data.title, "first");

        // A write behind the scope's back stays invisible until invalidated.
        notes
            .update()
            .item(&id, folio_types::Patch::new().set("title", "second"), None)
            .await
            .unwrap();
        assert_eq!(cache.get(&id).await.unwrap().unwrap().data.title, "first");

        cache.invalidate(&id);
        assert_eq!(cache.get(&id).await.unwrap().unwrap().data.title, "second");
    }

    #[tokio::test]
    async fn get_many_remembers_absent_ids() {
        let store = Arc::new(InMemoryStore::new());
        let notes = notes(store);
        notes.create().item(note("a", "x"), None).await.unwrap();

        let mut cache = notes.read_through_cache();
        let a = DocumentId::parse("a").unwrap();
        let b = DocumentId::parse("b").unwrap();
        let found = cache.get_many(&[a.clone(), b.clone(), a.clone()]).await.unwrap();
        assert_eq!(found.len(), 3);
        assert!(found[0].is_some());
        assert!(found[1].is_none());
        assert_eq!(found[0], found[2]);
        assert_eq!(cache.len(), 2);

        notes.create().item(note("b", "late"), None).await.unwrap();
        assert!(cache.get(&b).await.unwrap().is_none());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&b).await.unwrap().is_some());
    }
}
