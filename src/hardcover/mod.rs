// Hardcover GraphQL client: a rate-limited transport plus the high-level
// operations the sync pipeline uses. The operations are a trait so the
// pipeline can run against an in-memory fake in tests.

#[cfg(test)]
pub mod fake;
pub mod models;
pub mod ops;
pub mod transport;

pub use models::{BookRow, DatesReadInput, EditionRow, UserBookRead, UserBookRow};
pub use ops::{HardcoverClient, HardcoverOps};
pub use transport::{RateLimitConfig, Transport};

pub const DEFAULT_ENDPOINT: &str = "https://api.hardcover.app/v1/graphql";

/// `book_status_id` marking a record merged into a canonical one.
pub const BOOK_STATUS_DEDUPED: i64 = 4;

/// `reading_format_id` for audiobook editions.
pub const READING_FORMAT_AUDIOBOOK: i64 = 2;
