//! Error types for the gNB L2 stack.
//!
//! Per the spec's error model, only construction-time configuration
//! mistakes are allowed to surface as a hard `Err` from a public
//! constructor. Everything encountered on the per-slot hot path
//! (malformed PDUs, resource exhaustion, policy timeouts, invariant
//! violations) is handled in place: logged, counted, and the caller moves
//! on. `L2Error` exists to give those paths a uniform shape when they do
//! need to travel (e.g. a batch of `sched_result.failed_attempts`
//! entries), not to be `?`-propagated out of the scheduler.

use thiserror::Error;

/// Result type alias for fallible, non-hot-path operations.
pub type Result<T> = std::result::Result<T, L2Error>;

/// Crate-wide error type, one variant per error kind from the spec's
/// error handling design (§7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum L2Error {
    /// Truncated/reserved-bit PDU, unknown SI, out-of-window SN.
    #[error("malformed PDU ({context})")]
    MalformedPdu {
        /// What was wrong and where.
        context: String,
    },

    /// No free HARQ process, no free PUCCH resource, PDCCH candidate
    /// blocked, or a `max_*_per_slot` cap reached.
    #[error("resource exhausted: {context}")]
    ResourceExhausted {
        /// Which resource and why.
        context: String,
    },

    /// RLC AM reached `max_retx_thresh` on an SDU.
    #[error("protocol exhausted: {context}")]
    ProtocolExhausted {
        /// Bearer / SDU identifying context.
        context: String,
    },

    /// HARQ ack-timeout or RLC reassembly-timeout fired.
    #[error("policy timeout: {context}")]
    PolicyTimeout {
        /// Which timer and owner.
        context: String,
    },

    /// A CRC/UCI for an unknown RNTI, an illegal state transition, or a
    /// configuration inconsistency discovered on reconfiguration.
    #[error("invariant violation: {context}")]
    InvariantViolation {
        /// What invariant and where it was observed.
        context: String,
    },

    /// Invalid cell or UE configuration discovered at construction time.
    /// The only variant a public constructor may return as a hard error.
    #[error("invalid configuration: {context}")]
    Config {
        /// What was invalid.
        context: String,
    },
}

impl L2Error {
    /// Build a [`L2Error::MalformedPdu`].
    pub fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedPdu { context: context.into() }
    }

    /// Build a [`L2Error::ResourceExhausted`].
    pub fn exhausted(context: impl Into<String>) -> Self {
        Self::ResourceExhausted { context: context.into() }
    }

    /// Build a [`L2Error::ProtocolExhausted`].
    pub fn protocol_exhausted(context: impl Into<String>) -> Self {
        Self::ProtocolExhausted { context: context.into() }
    }

    /// Build a [`L2Error::PolicyTimeout`].
    pub fn policy_timeout(context: impl Into<String>) -> Self {
        Self::PolicyTimeout { context: context.into() }
    }

    /// Build a [`L2Error::InvariantViolation`].
    pub fn invariant(context: impl Into<String>) -> Self {
        Self::InvariantViolation { context: context.into() }
    }

    /// Build a [`L2Error::Config`].
    pub fn config(context: impl Into<String>) -> Self {
        Self::Config { context: context.into() }
    }
}
