use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{
    DEFAULT_ENDPOINT,
    models::{BookRow, DatesReadInput, UserBookRead, UserBookRow},
    transport::{RateLimitConfig, Transport},
};
use crate::error::{AbsHardcoverResult, SyncError};

const BOOK_FIELDS: &str = "id canonical_id book_status_id editions { id asin isbn_13 isbn_10 format language audio_seconds }";

/// High-level Hardcover operations used by the sync pipeline. A trait so
/// the resolver/mutation layers can be exercised against an in-memory fake.
#[async_trait::async_trait]
pub trait HardcoverOps: Send + Sync {
    async fn current_user_id(&self) -> AbsHardcoverResult<i64>;

    async fn lookup_by_asin(&self, asin: &str) -> AbsHardcoverResult<Vec<BookRow>>;
    async fn lookup_by_isbn13(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>>;
    async fn lookup_by_isbn10(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>>;
    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> AbsHardcoverResult<Vec<BookRow>>;

    async fn get_user_book(
        &self,
        user_id: i64,
        book_id: i64,
    ) -> AbsHardcoverResult<Option<UserBookRow>>;
    async fn insert_user_book(
        &self,
        book_id: i64,
        status_id: i64,
        edition_id: Option<i64>,
    ) -> AbsHardcoverResult<i64>;
    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status_id: i64,
    ) -> AbsHardcoverResult<()>;

    async fn list_user_book_reads(
        &self,
        user_book_id: i64,
    ) -> AbsHardcoverResult<Vec<UserBookRead>>;
    async fn insert_user_book_read(
        &self,
        user_book_id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<i64>;
    async fn update_user_book_read(
        &self,
        id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<()>;

    async fn mark_owned(&self, user_book_id: i64) -> AbsHardcoverResult<()>;
}

/// Live client against the Hardcover GraphQL API.
pub struct HardcoverClient {
    transport: Transport,
    user_id: OnceCell<i64>,
}

impl HardcoverClient {
    pub fn new(
        token: impl Into<String>,
        limits: RateLimitConfig,
        cancel: CancellationToken,
    ) -> AbsHardcoverResult<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, token, limits, cancel)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        limits: RateLimitConfig,
        cancel: CancellationToken,
    ) -> AbsHardcoverResult<Self> {
        Ok(HardcoverClient {
            transport: Transport::new(endpoint, token, limits, cancel)?,
            user_id: OnceCell::new(),
        })
    }

    async fn books_where(&self, filter: Value) -> AbsHardcoverResult<Vec<BookRow>> {
        let query =
            format!("query BooksBy($where: books_bool_exp!) {{ books(where: $where, limit: 10) {{ {BOOK_FIELDS} }} }}");
        let data = self
            .transport
            .execute(&query, json!({ "where": filter }))
            .await?;
        Ok(serde_json::from_value(
            data.get("books").cloned().unwrap_or(Value::Array(vec![])),
        )?)
    }
}

#[async_trait::async_trait]
impl HardcoverOps for HardcoverClient {
    /// The authenticated user's numeric id, fetched once and cached for the
    /// lifetime of the client (one sync run).
    async fn current_user_id(&self) -> AbsHardcoverResult<i64> {
        self.user_id
            .get_or_try_init(|| async {
                let data = self
                    .transport
                    .execute("query Me { me { id } }", json!({}))
                    .await?;
                // `me` comes back as a single-element list.
                let me = data.get("me").cloned().unwrap_or(Value::Null);
                let id = match &me {
                    Value::Array(items) => items.first().and_then(|v| v.get("id")),
                    other => other.get("id"),
                }
                .and_then(Value::as_i64);
                id.ok_or_else(|| {
                    SyncError::upstream(200, "me query returned no user id").into()
                })
            })
            .await
            .map(|id| *id)
    }

    async fn lookup_by_asin(&self, asin: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        self.books_where(json!({ "editions": { "asin": { "_eq": asin } } }))
            .await
    }

    async fn lookup_by_isbn13(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        self.books_where(json!({ "editions": { "isbn_13": { "_eq": isbn } } }))
            .await
    }

    async fn lookup_by_isbn10(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        self.books_where(json!({ "editions": { "isbn_10": { "_eq": isbn } } }))
            .await
    }

    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> AbsHardcoverResult<Vec<BookRow>> {
        let query = format!(
            "query BooksByTitle($title: String!) {{ books(where: {{ title: {{ _ilike: $title }} }}, limit: 25) {{ {BOOK_FIELDS} title contributions {{ author {{ name }} }} }} }}"
        );
        let pattern = format!("%{}%", title.replace('%', "\\%"));
        let data = self
            .transport
            .execute(&query, json!({ "title": pattern }))
            .await?;
        let _ = author; // scoring happens in the resolver
        Ok(serde_json::from_value(
            data.get("books").cloned().unwrap_or(Value::Array(vec![])),
        )?)
    }

    async fn get_user_book(
        &self,
        user_id: i64,
        book_id: i64,
    ) -> AbsHardcoverResult<Option<UserBookRow>> {
        let query = "query UserBook($userId: Int!, $bookId: Int!) { user_books(where: { user_id: { _eq: $userId }, book_id: { _eq: $bookId } }, limit: 1) { id user_id book_id status_id edition_id owned } }";
        let data = self
            .transport
            .execute(query, json!({ "userId": user_id, "bookId": book_id }))
            .await?;
        let rows: Vec<UserBookRow> = serde_json::from_value(
            data.get("user_books")
                .cloned()
                .unwrap_or(Value::Array(vec![])),
        )?;
        Ok(rows.into_iter().next())
    }

    async fn insert_user_book(
        &self,
        book_id: i64,
        status_id: i64,
        edition_id: Option<i64>,
    ) -> AbsHardcoverResult<i64> {
        let query = "mutation InsertUserBook($object: UserBookCreateInput!) { insert_user_book(object: $object) { id user_book { id } } }";
        let mut object = json!({ "book_id": book_id, "status_id": status_id });
        if let Some(edition) = edition_id {
            object["edition_id"] = json!(edition);
        }
        let data = self
            .transport
            .execute(query, json!({ "object": object }))
            .await?;
        extract_id(&data, "insert_user_book")
            .ok_or_else(|| SyncError::upstream(200, "insert_user_book returned no id").into())
    }

    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status_id: i64,
    ) -> AbsHardcoverResult<()> {
        let query = "mutation UpdateUserBook($id: Int!, $object: UserBookUpdateInput!) { update_user_book(id: $id, object: $object) { id } }";
        self.transport
            .execute(
                query,
                json!({ "id": user_book_id, "object": { "status_id": status_id } }),
            )
            .await?;
        Ok(())
    }

    async fn list_user_book_reads(
        &self,
        user_book_id: i64,
    ) -> AbsHardcoverResult<Vec<UserBookRead>> {
        let query = "query UserBookReads($userBookId: Int!) { user_book_reads(where: { user_book_id: { _eq: $userBookId } }, order_by: { id: asc }) { id user_book_id progress_seconds started_at finished_at edition_id reading_format_id } }";
        let data = self
            .transport
            .execute(query, json!({ "userBookId": user_book_id }))
            .await?;
        Ok(serde_json::from_value(
            data.get("user_book_reads")
                .cloned()
                .unwrap_or(Value::Array(vec![])),
        )?)
    }

    async fn insert_user_book_read(
        &self,
        user_book_id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<i64> {
        let query = "mutation InsertUserBookRead($userBookId: Int!, $datesRead: DatesReadInput!) { insert_user_book_read(user_book_id: $userBookId, user_book_read: $datesRead) { id user_book_read { id } } }";
        let data = self
            .transport
            .execute(
                query,
                json!({ "userBookId": user_book_id, "datesRead": input }),
            )
            .await?;
        extract_id(&data, "insert_user_book_read")
            .ok_or_else(|| SyncError::upstream(200, "insert_user_book_read returned no id").into())
    }

    async fn update_user_book_read(
        &self,
        id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<()> {
        let query = "mutation UpdateUserBookRead($id: Int!, $object: DatesReadInput!) { update_user_book_read(id: $id, object: $object) { id } }";
        self.transport
            .execute(query, json!({ "id": id, "object": input }))
            .await?;
        Ok(())
    }

    async fn mark_owned(&self, user_book_id: i64) -> AbsHardcoverResult<()> {
        let query = "mutation MarkOwned($id: Int!, $object: UserBookUpdateInput!) { update_user_book(id: $id, object: $object) { id } }";
        self.transport
            .execute(query, json!({ "id": user_book_id, "object": { "owned": true } }))
            .await?;
        Ok(())
    }
}

// Mutation payloads either carry the id directly or nest it one level down.
fn extract_id(data: &Value, field: &str) -> Option<i64> {
    let node = data.get(field)?;
    node.get("id")
        .and_then(Value::as_i64)
        .or_else(|| {
            node.get("user_book")
                .and_then(|v| v.get("id"))
                .and_then(Value::as_i64)
        })
        .or_else(|| {
            node.get("user_book_read")
                .and_then(|v| v.get("id"))
                .and_then(Value::as_i64)
        })
}
