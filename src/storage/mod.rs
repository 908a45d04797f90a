mod history;
mod legacy;
mod posted;
mod schema;
mod types;

pub use legacy::split_legacy_list;
pub use schema::{Database, RETENTION_LIMIT};
pub use types::{DatabaseError, HistoryEvent, ImportReport, Page, PostedItem, Row, Table};
