//! Errors surfaced by the report API client.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network or transport failure before a response was read.
    #[error("transport error on {resource}: {message}")]
    Transport { resource: String, message: String },

    /// Non-2xx response.
    #[error("HTTP {code} from {resource}: {body}")]
    Status { resource: String, code: u16, body: String },

    /// The response body did not decode into the expected record(s).
    #[error("malformed response from {resource}: {reason}")]
    Malformed { resource: String, reason: String },

    #[error("invalid API base URL '{base}': {reason}")]
    InvalidBaseUrl { base: String, reason: String },

    #[error("node '{uid}' at depth {depth} has no REST resource")]
    UnsupportedDepth { depth: usize, uid: String },
}

impl ApiError {
    pub fn transport(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn malformed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure concerns the shape of the payload rather than its delivery.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}
