//! In-process article store. Single-node deployments and tests use it in place of Postgres.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use nagg_core::{Article, ArticleDraft, ArticleQuery, Page, SearchQuery};
use uuid::Uuid;

use crate::cache::{invalidate_article, ArticleCache, NoopArticleCache};
use crate::{fingerprint, ArticleStore, StoreError, UpsertOutcome};

#[derive(Debug, Clone)]
struct StoredArticle {
    article: Article,
    fingerprint: String,
    seq: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    by_title: HashMap<String, StoredArticle>,
    next_seq: u64,
}

pub struct MemoryArticleStore {
    state: Mutex<MemoryState>,
    cache: Arc<dyn ArticleCache>,
}

impl Default for MemoryArticleStore {
    fn default() -> Self {
        Self::new(Arc::new(NoopArticleCache))
    }
}

impl MemoryArticleStore {
    pub fn new(cache: Arc<dyn ArticleCache>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            cache,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Matching articles, newest first (ties broken by insertion order).
    fn newest_first(&self, keep: impl Fn(&Article) -> bool) -> Vec<Article> {
        let state = self.lock();
        let mut rows: Vec<&StoredArticle> = state
            .by_title
            .values()
            .filter(|stored| keep(&stored.article))
            .collect();
        rows.sort_by(|a, b| {
            b.article
                .created_at
                .cmp(&a.article.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        rows.into_iter().map(|stored| stored.article.clone()).collect()
    }

    fn distinct(&self, pick: impl Fn(&Article) -> Option<String>) -> Vec<String> {
        let state = self.lock();
        state
            .by_title
            .values()
            .filter_map(|stored| pick(&stored.article))
            .filter(|value| !value.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn find_by_title(&self, title: &str) -> Result<Option<Article>, StoreError> {
        Ok(self.lock().by_title.get(title).map(|s| s.article.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
        Ok(self
            .lock()
            .by_title
            .values()
            .find(|s| s.article.id == id)
            .map(|s| s.article.clone()))
    }

    async fn upsert(&self, draft: &ArticleDraft) -> Result<UpsertOutcome, StoreError> {
        let fp = fingerprint(draft);
        let now = Utc::now();

        // The whole compare-and-write happens under one guard.
        let outcome = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let seq = state.next_seq;
            match state.by_title.get_mut(&draft.title) {
                Some(stored) if stored.fingerprint == fp => UpsertOutcome {
                    article: stored.article.clone(),
                    created: false,
                    changed: false,
                },
                Some(stored) => {
                    stored.article.apply_draft(draft, now);
                    stored.fingerprint = fp;
                    UpsertOutcome {
                        article: stored.article.clone(),
                        created: false,
                        changed: true,
                    }
                }
                None => {
                    let article = Article::from_draft(Uuid::new_v4(), draft, now);
                    state.next_seq = seq + 1;
                    state.by_title.insert(
                        draft.title.clone(),
                        StoredArticle {
                            article: article.clone(),
                            fingerprint: fp,
                            seq,
                        },
                    );
                    UpsertOutcome {
                        article,
                        created: true,
                        changed: false,
                    }
                }
            }
        };

        if outcome.needs_notification() {
            self.invalidate_cache(outcome.article.id);
        }
        Ok(outcome)
    }

    async fn list_titles(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock().by_title.keys().cloned().collect())
    }

    async fn title_fingerprints(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .lock()
            .by_title
            .iter()
            .map(|(title, stored)| (title.clone(), stored.fingerprint.clone()))
            .collect())
    }

    fn invalidate_cache(&self, id: Uuid) {
        invalidate_article(self.cache.as_ref(), id);
    }

    async fn list(&self, query: &ArticleQuery) -> Result<Page<Article>, StoreError> {
        let query = query.clone().normalized();
        let rows = self.newest_first(|a| query.filter.matches(a));
        Ok(Page::paginate(rows, &query))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Page<Article>, StoreError> {
        let listing = query.as_listing();
        let rows = self.newest_first(|a| query.matches(a));
        Ok(Page::paginate(rows, &listing))
    }

    async fn distinct_categories(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.distinct(|a| Some(a.category.clone())))
    }

    async fn distinct_authors(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.distinct(|a| Some(a.author.clone())))
    }

    async fn list_sources(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.distinct(Article::source_domain))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let removed = {
            let mut state = self.lock();
            let removed = state.by_title.len() as u64;
            state.by_title.clear();
            removed
        };
        self.cache.clear();
        Ok(removed)
    }
}
