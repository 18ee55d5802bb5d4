use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record under {0}")]
    CorruptRecord(String),

    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("database is closed")]
    DatabaseClosed,
}

pub type DbResult<T> = Result<T, DbError>;

impl From<bincode::Error> for DbError {
    fn from(err: bincode::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}
