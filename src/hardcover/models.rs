use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}

/// A book as returned by the lookup and search queries. `title` and
/// `contributions` are only selected by the title/author search; lookups by
/// identifier leave them empty.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BookRow {
    pub id: i64,
    #[serde(default)]
    pub canonical_id: Option<i64>,
    #[serde(default)]
    pub book_status_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    #[serde(default)]
    pub editions: Vec<EditionRow>,
}

impl BookRow {
    pub fn author_names(&self) -> impl Iterator<Item = &str> {
        self.contributions
            .iter()
            .filter_map(|c| c.author.as_ref())
            .map(|a| a.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Contribution {
    #[serde(default)]
    pub author: Option<Author>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Author {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EditionRow {
    pub id: i64,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub isbn_13: Option<String>,
    #[serde(default)]
    pub isbn_10: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub audio_seconds: Option<i64>,
}

impl EditionRow {
    /// Whether this edition is an audiobook. Hardcover uses both spellings.
    pub fn is_audiobook(&self) -> bool {
        self.format
            .as_deref()
            .map(|f| {
                let f = f.to_ascii_lowercase();
                f == "audiobook" || f == "audible audio"
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserBookRow {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub status_id: i64,
    #[serde(default)]
    pub edition_id: Option<i64>,
    #[serde(default)]
    pub owned: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserBookRead {
    pub id: i64,
    pub user_book_id: i64,
    #[serde(default)]
    pub progress_seconds: Option<i64>,
    #[serde(default)]
    pub started_at: Option<NaiveDate>,
    #[serde(default)]
    pub finished_at: Option<NaiveDate>,
    #[serde(default)]
    pub edition_id: Option<i64>,
    #[serde(default)]
    pub reading_format_id: Option<i64>,
}

/// Fields accepted by the `DatesReadInput` GraphQL input type. Absent
/// fields are omitted from the serialized object, which is how "leave this
/// column alone" is expressed on the wire.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DatesReadInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_format_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<NaiveDate>,
}
