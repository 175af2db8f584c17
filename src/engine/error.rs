use crate::engine::types::{CommodityId, SystemId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("system {0} not found")]
    SystemNotFound(SystemId),

    #[error("commodity {0} not found")]
    CommodityNotFound(CommodityId),

    #[error("no path from {from} to {to}")]
    NoPath { from: SystemId, to: SystemId },

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("insufficient cargo space or holding: requested {requested}, available {available}")]
    InsufficientCargo { requested: i64, available: i64 },

    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("invalid quantity {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("player is not docked at {0}")]
    NotDocked(SystemId),

    #[error("commodity {commodity} is banned at {system}")]
    IllegalCommodity { system: SystemId, commodity: CommodityId },

    #[error("market row {system}/{commodity} is busy")]
    MarketRowBusy { system: SystemId, commodity: CommodityId },

    #[error("quoted price {quoted} no longer matches market price {current}")]
    QuoteChanged { quoted: i64, current: i64 },

    #[error("transaction failed and was rolled back: {source}")]
    TransactionFailed { source: Box<EngineError> },

    /// A compensation failed, so some effects of the operation are still in place.
    #[error("transaction failed and could not be fully rolled back (stuck steps: {failed_steps:?}): {source}")]
    CompensationFailed { source: Box<EngineError>, failed_steps: Vec<&'static str> },

    #[error("invalid universe settings: {0}")]
    InvalidUniverse(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl EngineError {
    /// Transient failures that can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::MarketRowBusy { .. } | EngineError::QuoteChanged { .. } => true,
            EngineError::TransactionFailed { source } => source.is_retryable(),
            // Part of the operation is still applied; retrying would repeat it.
            EngineError::CompensationFailed { .. } => false,
            _ => false,
        }
    }

    pub(crate) fn rolled_back(source: EngineError) -> Self {
        EngineError::TransactionFailed { source: Box::new(source) }
    }

    pub(crate) fn rollback_incomplete(source: EngineError, failed_steps: Vec<&'static str>) -> Self {
        EngineError::CompensationFailed { source: Box::new(source), failed_steps }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
