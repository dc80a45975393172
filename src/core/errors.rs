// src/core/errors.rs

//! Defines the primary error type for the meta-service core.

use strum_macros::Display;
use thiserror::Error;

/// The opaque status codes surfaced to RPC callers. Every `MetaError`
/// collapses onto one of these through [`MetaError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrCode {
    Success,
    InputParamError,
    SerializeFail,
    InternalError,
    NotLeader,
}

/// The main error enum, representing all failures within the control plane.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetaError {
    /// An invalid operand: unknown name, duplicate name, or an unmet
    /// precondition such as dropping a non-empty room.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A record could not be encoded for persistence.
    #[error("serialize record fail: {0}")]
    Serialize(String),

    /// The meta store rejected a write. In-memory state is unchanged
    /// because persistence always precedes the memory swap.
    #[error("meta store write fail: {0}")]
    StoreWrite(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A mutating operation reached a non-leader replica. The hint, when
    /// present, is the address of the current leader.
    #[error("not leader")]
    NotLeader { leader: Option<String> },
}

impl MetaError {
    pub fn code(&self) -> ErrCode {
        match self {
            MetaError::InvalidInput(_) => ErrCode::InputParamError,
            MetaError::Serialize(_) => ErrCode::SerializeFail,
            MetaError::StoreWrite(_) | MetaError::Internal(_) => ErrCode::InternalError,
            MetaError::NotLeader { .. } => ErrCode::NotLeader,
        }
    }
}

impl From<bincode::error::EncodeError> for MetaError {
    fn from(e: bincode::error::EncodeError) -> Self {
        MetaError::Serialize(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for MetaError {
    fn from(e: bincode::error::DecodeError) -> Self {
        MetaError::Serialize(e.to_string())
    }
}
