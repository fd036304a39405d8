use slotfloor_types::slot::BalanceOverflow;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    pub fn player_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "player",
            id: id.to_string(),
        }
    }

    pub fn team_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "team",
            id: id.to_string(),
        }
    }

    /// Errors a caller may retry without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::Persistence(_) => "persistence",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}

impl From<BalanceOverflow> for LedgerError {
    fn from(err: BalanceOverflow) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
