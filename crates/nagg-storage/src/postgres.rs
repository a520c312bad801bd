//! PostgreSQL article store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nagg_core::{source_domain, Article, ArticleDraft, ArticleFilter, ArticleQuery, Page, SearchQuery};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::cache::{invalidate_article, ArticleCache};
use crate::{fingerprint, ArticleStore, StoreError, UpsertOutcome};

const ARTICLE_COLUMNS: &str =
    "id, title, content, author, source, category, image, published_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: Uuid,
    title: String,
    content: String,
    author: String,
    source: String,
    category: String,
    image: Option<String>,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            title: row.title,
            content: row.content,
            author: row.author,
            source: row.source,
            category: row.category,
            image: row.image,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    article: ArticleRow,
    inserted: bool,
}

pub struct PgArticleStore {
    pool: PgPool,
    cache: Arc<dyn ArticleCache>,
}

impl PgArticleStore {
    pub async fn connect(database_url: &str, cache: Arc<dyn ArticleCache>) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool, cache))
    }

    pub fn from_pool(pool: PgPool, cache: Arc<dyn ArticleCache>) -> Self {
        Self { pool, cache }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn page_of(
        &self,
        filter: &ArticleFilter,
        search: Option<&SearchQuery>,
        listing: &ArticleQuery,
    ) -> Result<Page<Article>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM articles");
        push_conditions(&mut count, filter, search);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles"));
        push_conditions(&mut select, filter, search);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(listing.per_page).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(listing.offset()).unwrap_or(i64::MAX));
        let rows: Vec<ArticleRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page::new(
            rows.into_iter().map(Article::from).collect(),
            listing.page,
            listing.per_page,
            usize::try_from(total).unwrap_or_default(),
        ))
    }

    async fn distinct_column(&self, sql: &str) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>(sql).fetch_all(&self.pool).await?)
    }
}

fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, filter: &ArticleFilter, search: Option<&SearchQuery>) {
    let (categories, sources, authors) = filter.lowered();
    qb.push(" WHERE TRUE");
    if !categories.is_empty() {
        qb.push(" AND LOWER(category) = ANY(").push_bind(categories).push(")");
    }
    if !authors.is_empty() {
        qb.push(" AND LOWER(author) = ANY(").push_bind(authors).push(")");
    }
    if !sources.is_empty() {
        qb.push(" AND (LOWER(source) = ANY(")
            .push_bind(sources.clone())
            .push(") OR source_domain = ANY(")
            .push_bind(sources)
            .push("))");
    }
    if let Some(search) = search {
        let term = search.term.trim();
        if !term.is_empty() {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR content ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(from) = search.created_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = search.created_to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn find_by_title(&self, title: &str) -> Result<Option<Article>, StoreError> {
        let row: Option<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE title = $1"))
                .bind(title)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Article::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
        let row: Option<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Article::from))
    }

    async fn upsert(&self, draft: &ArticleDraft) -> Result<UpsertOutcome, StoreError> {
        // One statement decides insert / update / no-op, so racing writers cannot lose updates.
        // `xmax = 0` holds only for a freshly inserted tuple.
        let row: Option<UpsertRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO articles
                (id, title, content, author, source, source_domain, category, image, published_at, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (title) DO UPDATE
               SET content = EXCLUDED.content,
                   author = EXCLUDED.author,
                   source = EXCLUDED.source,
                   source_domain = EXCLUDED.source_domain,
                   category = EXCLUDED.category,
                   image = EXCLUDED.image,
                   published_at = EXCLUDED.published_at,
                   fingerprint = EXCLUDED.fingerprint,
                   updated_at = NOW()
             WHERE articles.fingerprint IS DISTINCT FROM EXCLUDED.fingerprint
            RETURNING {ARTICLE_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.author)
        .bind(&draft.source)
        .bind(source_domain(&draft.source))
        .bind(&draft.category)
        .bind(&draft.image)
        .bind(draft.published_at)
        .bind(fingerprint(draft))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let outcome = UpsertOutcome {
                    article: row.article.into(),
                    created: row.inserted,
                    changed: !row.inserted,
                };
                self.invalidate_cache(outcome.article.id);
                Ok(outcome)
            }
            None => {
                let article = self
                    .find_by_title(&draft.title)
                    .await?
                    .ok_or_else(|| StoreError::Vanished {
                        title: draft.title.clone(),
                    })?;
                Ok(UpsertOutcome {
                    article,
                    created: false,
                    changed: false,
                })
            }
        }
    }

    async fn list_titles(&self) -> Result<HashSet<String>, StoreError> {
        let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM articles")
            .fetch_all(&self.pool)
            .await?;
        Ok(titles.into_iter().collect())
    }

    async fn title_fingerprints(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT title, fingerprint FROM articles")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    fn invalidate_cache(&self, id: Uuid) {
        invalidate_article(self.cache.as_ref(), id);
    }

    async fn list(&self, query: &ArticleQuery) -> Result<Page<Article>, StoreError> {
        let query = query.clone().normalized();
        self.page_of(&query.filter, None, &query).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Page<Article>, StoreError> {
        let listing = query.as_listing();
        self.page_of(&query.filter, Some(query), &listing).await
    }

    async fn distinct_categories(&self) -> Result<Vec<String>, StoreError> {
        self.distinct_column(
            "SELECT DISTINCT category FROM articles WHERE btrim(category) <> '' ORDER BY category",
        )
        .await
    }

    async fn distinct_authors(&self) -> Result<Vec<String>, StoreError> {
        self.distinct_column("SELECT DISTINCT author FROM articles WHERE btrim(author) <> '' ORDER BY author")
            .await
    }

    async fn list_sources(&self) -> Result<Vec<String>, StoreError> {
        self.distinct_column(
            "SELECT DISTINCT source_domain FROM articles WHERE source_domain IS NOT NULL ORDER BY source_domain",
        )
        .await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM articles").execute(&self.pool).await?;
        self.cache.clear();
        Ok(result.rows_affected())
    }
}
