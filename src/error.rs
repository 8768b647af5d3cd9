use thiserror::Error;

/// Errors the table engine surfaces to a caller.
///
/// Everything else the design treats as an internal condition — a
/// saturated group, a shared buffer that needs to be forked before a
/// mutation — is handled by rehashing and never reaches this type.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to allocate storage for capacity {capacity}")]
    AllocationFailed { capacity: usize },

    #[error("requested capacity overflows usize")]
    CapacityOverflow,
}

pub type Result<T> = std::result::Result<T, TableError>;
