use stowage_types::PluginIdentifier;

/// Failure taxonomy for the inventory and metadata stores.
///
/// Callers branch on these kinds: the lifecycle engine maps
/// `AlreadyExists` and `MissingReference` to publisher-facing diagnostics,
/// everything else is surfaced with context.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The database file could not be opened.
    #[error("failed to open inventory database {path}: {source}")]
    DbOpen {
        /// Path of the database file.
        path: String,
        /// Underlying driver error.
        #[source]
        source: rusqlite::Error,
    },

    /// Schema creation failed.
    #[error("failed to create inventory schema: {0}")]
    Schema(#[source] rusqlite::Error),

    /// An insert collided with an existing primary key.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A plugin group referenced a plugin that is not in the inventory
    /// (or is hidden, without the test-only override).
    #[error("plugin {identifier} is not present in the inventory")]
    MissingReference {
        /// The `(name, target, version)` the group pointed at.
        identifier: PluginIdentifier,
    },

    /// An update or query matched no rows.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row failed to parse back into domain types.
    #[error("corrupt inventory row: {0}")]
    CorruptRow(String),

    /// The caller's input cannot be stored as given.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other driver failure.
    #[error("inventory database error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl InventoryError {
    /// Classify a driver error from an INSERT, turning primary-key
    /// collisions into [`InventoryError::AlreadyExists`].
    pub(crate) fn from_insert(err: rusqlite::Error, what: String) -> Self {
        if is_unique_violation(&err) {
            InventoryError::AlreadyExists(what)
        } else {
            InventoryError::Sql(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
