// In-memory HardcoverOps double for pipeline tests: behaves like a tiny
// user_books/user_book_reads store and records every call so tests can
// assert on wire traffic (probes issued, mutation counts).

use std::{collections::HashMap, sync::Mutex};

use super::{
    models::{BookRow, DatesReadInput, UserBookRead, UserBookRow},
    ops::HardcoverOps,
};
use crate::error::AbsHardcoverResult;

#[derive(Debug, Default)]
pub struct FakeState {
    pub user_id: i64,
    pub books_by_asin: HashMap<String, Vec<BookRow>>,
    pub books_by_isbn13: HashMap<String, Vec<BookRow>>,
    pub books_by_isbn10: HashMap<String, Vec<BookRow>>,
    pub search_results: Vec<BookRow>,
    pub user_books: Vec<UserBookRow>,
    pub reads: Vec<UserBookRead>,
    next_id: i64,

    // Call log.
    pub probed_user_book_ids: Vec<i64>,
    pub lookup_calls: u32,
    /// Cancel this token once `lookup_calls` reaches the count; lets tests
    /// cancel a run at a deterministic item boundary.
    pub cancel_after_lookups: Option<(u32, tokio_util::sync::CancellationToken)>,
    pub search_calls: u32,
    pub inserted_user_books: u32,
    pub status_updates: u32,
    pub inserted_reads: Vec<(i64, DatesReadInput)>,
    pub updated_reads: Vec<(i64, DatesReadInput)>,
    pub mark_owned_calls: u32,
}

impl FakeState {
    pub fn mutation_count(&self) -> u32 {
        self.inserted_user_books
            + self.status_updates
            + self.inserted_reads.len() as u32
            + self.updated_reads.len() as u32
            + self.mark_owned_calls
    }
}

#[derive(Debug, Default)]
pub struct FakeHardcover {
    pub state: Mutex<FakeState>,
}

impl FakeHardcover {
    pub fn new(user_id: i64) -> Self {
        let fake = FakeHardcover::default();
        fake.state.lock().unwrap().user_id = user_id;
        fake.state.lock().unwrap().next_id = 1000;
        fake
    }

    pub fn with_asin_book(self, asin: &str, row: BookRow) -> Self {
        self.state
            .lock()
            .unwrap()
            .books_by_asin
            .entry(asin.to_string())
            .or_default()
            .push(row);
        self
    }

    pub fn seed_user_book(&self, row: UserBookRow) {
        self.state.lock().unwrap().user_books.push(row);
    }

    pub fn seed_read(&self, read: UserBookRead) {
        self.state.lock().unwrap().reads.push(read);
    }

    fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

fn apply_input(read: &mut UserBookRead, input: &DatesReadInput) {
    if let Some(v) = input.progress_seconds {
        read.progress_seconds = Some(v);
    }
    if let Some(v) = input.edition_id {
        read.edition_id = Some(v);
    }
    if let Some(v) = input.reading_format_id {
        read.reading_format_id = Some(v);
    }
    if let Some(v) = input.started_at {
        read.started_at = Some(v);
    }
    if let Some(v) = input.finished_at {
        read.finished_at = Some(v);
    }
}

#[async_trait::async_trait]
impl HardcoverOps for FakeHardcover {
    async fn current_user_id(&self) -> AbsHardcoverResult<i64> {
        Ok(self.state.lock().unwrap().user_id)
    }

    async fn lookup_by_asin(&self, asin: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        let mut state = self.state.lock().unwrap();
        state.lookup_calls += 1;
        if let Some((after, token)) = &state.cancel_after_lookups {
            if state.lookup_calls >= *after {
                token.cancel();
            }
        }
        Ok(state.books_by_asin.get(asin).cloned().unwrap_or_default())
    }

    async fn lookup_by_isbn13(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .books_by_isbn13
            .get(isbn)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_by_isbn10(&self, isbn: &str) -> AbsHardcoverResult<Vec<BookRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .books_by_isbn10
            .get(isbn)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_by_title_author(
        &self,
        _title: &str,
        _author: &str,
    ) -> AbsHardcoverResult<Vec<BookRow>> {
        let mut state = self.state.lock().unwrap();
        state.search_calls += 1;
        Ok(state.search_results.clone())
    }

    async fn get_user_book(
        &self,
        user_id: i64,
        book_id: i64,
    ) -> AbsHardcoverResult<Option<UserBookRow>> {
        let mut state = self.state.lock().unwrap();
        state.probed_user_book_ids.push(book_id);
        Ok(state
            .user_books
            .iter()
            .find(|ub| ub.user_id == user_id && ub.book_id == book_id)
            .cloned())
    }

    async fn insert_user_book(
        &self,
        book_id: i64,
        status_id: i64,
        edition_id: Option<i64>,
    ) -> AbsHardcoverResult<i64> {
        let id = self.next_id();
        let mut state = self.state.lock().unwrap();
        state.inserted_user_books += 1;
        let user_id = state.user_id;
        state.user_books.push(UserBookRow {
            id,
            user_id,
            book_id,
            status_id,
            edition_id,
            owned: Some(false),
        });
        Ok(id)
    }

    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status_id: i64,
    ) -> AbsHardcoverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.status_updates += 1;
        if let Some(row) = state.user_books.iter_mut().find(|ub| ub.id == user_book_id) {
            row.status_id = status_id;
        }
        Ok(())
    }

    async fn list_user_book_reads(
        &self,
        user_book_id: i64,
    ) -> AbsHardcoverResult<Vec<UserBookRead>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reads
            .iter()
            .filter(|r| r.user_book_id == user_book_id)
            .cloned()
            .collect())
    }

    async fn insert_user_book_read(
        &self,
        user_book_id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<i64> {
        let id = self.next_id();
        let mut state = self.state.lock().unwrap();
        state.inserted_reads.push((user_book_id, input.clone()));
        let mut read = UserBookRead {
            id,
            user_book_id,
            ..Default::default()
        };
        apply_input(&mut read, input);
        state.reads.push(read);
        Ok(id)
    }

    async fn update_user_book_read(
        &self,
        id: i64,
        input: &DatesReadInput,
    ) -> AbsHardcoverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.updated_reads.push((id, input.clone()));
        if let Some(read) = state.reads.iter_mut().find(|r| r.id == id) {
            apply_input(read, input);
        }
        Ok(())
    }

    async fn mark_owned(&self, user_book_id: i64) -> AbsHardcoverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mark_owned_calls += 1;
        if let Some(row) = state.user_books.iter_mut().find(|ub| ub.id == user_book_id) {
            row.owned = Some(true);
        }
        Ok(())
    }
}
