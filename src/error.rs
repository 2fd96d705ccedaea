use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("error creating destination `{display_name}` for partition {partition_key}: {cause}")]
    CreationFailure {
        partition_key: String,
        display_name: String,
        cause: String,
    },
    #[error(
        "destination {destination_id} created for partition {partition_key} but ledger write failed: {cause}"
    )]
    LedgerWriteFailure {
        partition_key: String,
        destination_id: String,
        cause: String,
    },
    #[error("error processing batch {batch_index} for destination {destination_id}: {cause}")]
    BatchWriteFailure {
        destination_id: String,
        batch_index: usize,
        cause: String,
    },
    #[error(
        "records copied to destination {destination_id} but flag update of chunk {chunk_index} failed for {record_count} records: {cause}"
    )]
    PartialUpdateFailure {
        destination_id: String,
        chunk_index: usize,
        record_count: usize,
        cause: String,
    },
    #[error("eligible records could not be read: {0}")]
    SourceUnreadable(String),
    #[error("archive ledger could not be read: {0}")]
    LedgerUnreadable(String),
    #[error("another run holds the lock for this source: {0}")]
    Locked(String),
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
}

impl ArchiveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Locked(_) => ErrorCode::E001Locked,
            Self::InvalidConfig(_) => ErrorCode::E002ConfigInvalid,
            Self::SourceUnreadable(_) => ErrorCode::E003SourceUnreadable,
            Self::CreationFailure { .. } => ErrorCode::E004CreationFailed,
            Self::LedgerWriteFailure { .. } => ErrorCode::E005LedgerWriteFailed,
            Self::BatchWriteFailure { .. } => ErrorCode::E006BatchWriteFailed,
            Self::PartialUpdateFailure { .. } => ErrorCode::E007FlagUpdateFailed,
            Self::LedgerUnreadable(_) => ErrorCode::E008LedgerUnreadable,
        }
    }

    /// Failures that end the run before any write; everything else is
    /// accumulated into the run report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Locked(_)
                | Self::InvalidConfig(_)
                | Self::SourceUnreadable(_)
                | Self::LedgerUnreadable(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003SourceUnreadable,
    E004CreationFailed,
    E005LedgerWriteFailed,
    E006BatchWriteFailed,
    E007FlagUpdateFailed,
    E008LedgerUnreadable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003SourceUnreadable => "E003_SOURCE_UNREADABLE",
            Self::E004CreationFailed => "E004_CREATION_FAILED",
            Self::E005LedgerWriteFailed => "E005_LEDGER_WRITE_FAILED",
            Self::E006BatchWriteFailed => "E006_BATCH_WRITE_FAILED",
            Self::E007FlagUpdateFailed => "E007_FLAG_UPDATE_FAILED",
            Self::E008LedgerUnreadable => "E008_LEDGER_UNREADABLE",
        }
    }
}
