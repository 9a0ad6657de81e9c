//! Error taxonomy for the copy-trading pipeline
//!
//! Transient errors are absorbed inside components; permanent per-plan errors
//! become a terminal trade outcome. Only infrastructure failures at startup
//! escalate as fatal.

use std::fmt;

/// Why a plan terminated without a submission landing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Sell with no readable holding of the mint being sold
    NoPosition,
    /// Follower balance cannot cover the scaled input plus fee buffer
    NoFunds,
    /// Pool state fetch failed after one retry with invalidation
    PoolUnavailable,
    /// Router clone could not rewrite the master instruction safely
    Unclonable,
    /// Plan deadline passed before submission
    DeadlineExpired,
    /// Signing oracle refused or is unreachable
    Signer,
    /// Dropped from a full follower queue before execution
    QueueOverflow,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoPosition => "NoPosition",
            SkipReason::NoFunds => "NoFunds",
            SkipReason::PoolUnavailable => "PoolUnavailable",
            SkipReason::Unclonable => "Unclonable",
            SkipReason::DeadlineExpired => "DeadlineExpired",
            SkipReason::Signer => "Signer",
            SkipReason::QueueOverflow => "QueueOverflow",
        };
        f.write_str(s)
    }
}

/// Terminal status of a trade plan; exactly one is emitted per plan
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    /// Confirmed on chain within the deadline
    Landed,
    /// Simulation rejected the assembled transaction
    SimulatedReject,
    /// Definitive rejection from the submission endpoint
    SubmittedFailed,
    /// Submitted but not confirmed within the deadline
    TimedOut,
    /// Dry-run mode: simulated clean, intentionally not submitted
    SimulatedOnly,
    /// Never submitted
    Skipped(SkipReason),
}

impl OutcomeStatus {
    /// Stable label for metrics and the event sink
    pub fn label(&self) -> String {
        match self {
            OutcomeStatus::Landed => "landed".to_string(),
            OutcomeStatus::SimulatedReject => "simulated_reject".to_string(),
            OutcomeStatus::SubmittedFailed => "submitted_failed".to_string(),
            OutcomeStatus::TimedOut => "timed_out".to_string(),
            OutcomeStatus::SimulatedOnly => "simulated_only".to_string(),
            OutcomeStatus::Skipped(reason) => format!("skipped_{}", reason).to_lowercase(),
        }
    }
}

/// Analyzer failures that must surface for observability.
///
/// `None` from the analyzer means "not a swap we handle" and is silent;
/// these variants are the rare decode-level failures that are logged.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeError {
    /// Address-table data was missing; the caller may refetch and retry once
    IncompleteAccounts,
    /// Unrecoverable decode failure
    Decode(String),
}

impl fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzeError::IncompleteAccounts => write!(f, "incomplete address-table accounts"),
            AnalyzeError::Decode(msg) => write!(f, "transaction decode error: {}", msg),
        }
    }
}

impl std::error::Error for AnalyzeError {}

/// Failures while building follower swap instructions
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Pool or config account could not be fetched or parsed
    PoolStateUnavailable(String),
    /// Router clone: the master amount was not found in the instruction data
    AmountFieldNotFound,
    /// Router clone: the master amount matched at more than one offset
    AmbiguousAmountField,
    /// Router clone: an account index resolved neither statically nor via tables
    UnresolvedAccountIndex(u8),
    /// Router clone: the master wallet does not appear in the account list
    MasterSignerNotFound,
    /// Aggregator fallback returned an unusable plan
    Aggregator(String),
    /// The quote produced a zero or unrepresentable output
    ZeroQuote,
    /// RPC failure during the build
    Rpc(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::PoolStateUnavailable(msg) => write!(f, "pool state unavailable: {}", msg),
            BuildError::AmountFieldNotFound => write!(f, "amount field not found in router data"),
            BuildError::AmbiguousAmountField => {
                write!(f, "amount pattern matched more than one offset")
            }
            BuildError::UnresolvedAccountIndex(idx) => {
                write!(f, "unresolved account index {}", idx)
            }
            BuildError::MasterSignerNotFound => {
                write!(f, "master signer not present in cloned account list")
            }
            BuildError::Aggregator(msg) => write!(f, "aggregator error: {}", msg),
            BuildError::ZeroQuote => write!(f, "quote produced zero output"),
            BuildError::Rpc(msg) => write!(f, "rpc error during build: {}", msg),
        }
    }
}

impl std::error::Error for BuildError {}

impl BuildError {
    /// Skip reason recorded when this error terminates a plan
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            BuildError::PoolStateUnavailable(_) | BuildError::Rpc(_) => SkipReason::PoolUnavailable,
            BuildError::AmountFieldNotFound
            | BuildError::AmbiguousAmountField
            | BuildError::UnresolvedAccountIndex(_)
            | BuildError::MasterSignerNotFound
            | BuildError::Aggregator(_)
            | BuildError::ZeroQuote => SkipReason::Unclonable,
        }
    }

    /// Pool-state failures are worth one retry after cache invalidation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BuildError::PoolStateUnavailable(_) | BuildError::Rpc(_)
        )
    }
}

/// Classification of a chain RPC failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Worth retrying with backoff or a fresh blockhash
    Transient,
    /// Definitive rejection
    Permanent,
}

/// A chain RPC failure carrying its classification
#[derive(Debug, Clone)]
pub struct ChainRpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl ChainRpcError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Classify a raw RPC error message by its text
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let transient = lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("blockhash")
            || lower.contains("connection")
            || lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("node is behind")
            || lower.contains("busy");
        if transient {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    pub fn is_blockhash_expiry(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("blockhash")
    }
}

impl fmt::Display for ChainRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} rpc error: {}", self.kind, self.message)
    }
}

impl std::error::Error for ChainRpcError {}
