use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness, foreign-key or check constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("record not found")]
    NotFound,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db)
                if matches!(
                    db.kind(),
                    ErrorKind::UniqueViolation
                        | ErrorKind::ForeignKeyViolation
                        | ErrorKind::CheckViolation
                ) =>
            {
                StoreError::Constraint(db.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}
