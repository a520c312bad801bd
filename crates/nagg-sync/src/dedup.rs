use std::collections::HashMap;

use nagg_storage::{ArticleStore, StoreError};

/// Per-run view of stored titles and their fingerprints.
///
/// Skips records that would be exact no-op upserts. A title whose fingerprint differs still
/// goes to the store, and a stale snapshot only costs an extra upsert.
#[derive(Debug, Clone, Default)]
pub struct TitleSnapshot {
    entries: HashMap<String, String>,
}

impl TitleSnapshot {
    pub async fn load(store: &dyn ArticleStore) -> Result<Self, StoreError> {
        Ok(Self {
            entries: store.title_fingerprints().await?,
        })
    }

    pub fn is_duplicate(&self, title: &str, fingerprint: &str) -> bool {
        self.entries.get(title).is_some_and(|known| known == fingerprint)
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.entries.contains_key(title)
    }

    pub fn record(&mut self, title: &str, fingerprint: String) {
        self.entries.insert(title.to_string(), fingerprint);
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
    use super::*;
    use nagg_core::ArticleDraft;
    use nagg_storage::{fingerprint, MemoryArticleStore};

    fn draft(content: &str) -> ArticleDraft {
        ArticleDraft {
            title: "AI Advances".into(),
            content: content.into(),
            author: "Unknown".into(),
            source: "https://www.theguardian.com/technology/ai".into(),
            category: "Technology".into(),
            image: None,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn snapshot_skips_identical_records_only() {
        let store = MemoryArticleStore::default();
        store.upsert(&draft("Details...")).await.unwrap();
        let snapshot = TitleSnapshot::load(&store).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_title("AI Advances"));
        assert!(snapshot.is_duplicate("AI Advances", &fingerprint(&draft("Details..."))));
        assert!(!snapshot.is_duplicate("AI Advances", &fingerprint(&draft("New details"))));
        assert!(!snapshot.is_duplicate("Other", &fingerprint(&draft("Details..."))));
    }

    #[test]
    fn recording_makes_later_repeats_duplicates() {
        let mut snapshot = TitleSnapshot::default();
        let fp = fingerprint(&draft("Details..."));
        assert!(!snapshot.is_duplicate("AI Advances", &fp));
        snapshot.record("AI Advances", fp.clone());
        assert!(snapshot.is_duplicate("AI Advances", &fp));
    }
}
