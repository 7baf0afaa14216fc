use crate::resilience::DeadlineExceeded;

/// Failure talking to PostgreSQL.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("error connecting to {target}: {}", server_message(.source))]
    Connect {
        target: String,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("{}", server_message(.0))]
    Query(#[source] tokio_postgres::Error),
    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("unexpected result shape: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("query returned no rows")]
    NoRows,
}

impl From<tokio_postgres::Error> for DbError {
    fn from(error: tokio_postgres::Error) -> Self {
        DbError::Query(error)
    }
}

/// The server's own message with its detail and hint, else the client error.
fn server_message(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => describe(db.message(), db.detail(), db.hint()),
        None => error.to_string(),
    }
}

fn describe(message: &str, detail: Option<&str>, hint: Option<&str>) -> String {
    let mut text = message.to_string();
    if let Some(detail) = detail {
        text.push_str("\nDETAIL: ");
        text.push_str(detail);
    }
    if let Some(hint) = hint {
        text.push_str("\nHINT: ");
        text.push_str(hint);
    }
    text
}

impl DbError {
    /// Whether the connection that produced this error may be reused.
    pub fn is_reusable(&self) -> bool {
        matches!(self, DbError::InvalidIdentifier(_) | DbError::Decode(_) | DbError::NoRows)
    }
}
