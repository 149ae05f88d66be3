/// Errors that can occur during scoped query execution.
#[derive(thiserror::Error, Debug)]
pub enum ScopeError {
    /// Database error occurred during query execution.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// The request is malformed with respect to the entity (for example a
    /// missing tenant column value, or an attempt to re-parent a row).
    #[error("invalid scope: {0}")]
    Invalid(&'static str),

    /// The target row or tenant is outside the current scope.
    #[error("access denied: {0}")]
    Denied(&'static str),
}
