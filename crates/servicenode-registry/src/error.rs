use crate::chain::ChainUnavailable;
use crate::types::Outpoint;

/// Why a gossiped announcement or ping was refused.
///
/// Never a local fault: the caller forwards [`ValidationError::misbehavior`]
/// to peer scoring and, for retryable errors, forgets the message hash so a
/// later re-delivery is evaluated again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("signature time {sig_time} is too far in the future (now {now})")]
    FutureTimestamp { sig_time: i64, now: i64 },

    #[error("signature time {sig_time} is too far in the past (now {now})")]
    PastTimestamp { sig_time: i64, now: i64 },

    #[error("announcement carries no liveness proof")]
    MissingPing,

    #[error("embedded ping rejected: {0}")]
    InvalidPing(Box<ValidationError>),

    #[error("outdated protocol version {version} (minimum {minimum})")]
    ObsoleteProtocol { version: u32, minimum: u32 },

    #[error("public key does not produce a standard payout script")]
    MalformedKey,

    #[error("collateral input carries a non-empty spend authorization")]
    NonEmptyScriptSig,

    #[error("bad announcement signature")]
    BadSignature { score: u32 },

    #[error("bad ping signature")]
    BadPingSignature,

    #[error("port {port} is not the network port {expected}")]
    WrongPort { port: u16, expected: u16 },

    #[error("signature time {incoming} not newer than existing record ({existing})")]
    NotNewer { incoming: i64, existing: i64 },

    #[error("unknown service node {0}")]
    UnknownNode(Outpoint),

    #[error("service node {0} is not enabled")]
    NotEnabled(Outpoint),

    #[error("ping arrived too early")]
    TooEarly,

    #[error("ping anchor block is unknown")]
    UnknownAnchor,

    #[error("ping anchor block is {depth} blocks behind tip")]
    StaleAnchor { depth: u32 },

    #[error("collateral output is not {expected} to the collateral key")]
    CollateralMismatch { expected: i64 },

    #[error("collateral has {confirmations} confirmations, need {required}")]
    InsufficientConfirmations { confirmations: u32, required: u32 },

    #[error("chain data unavailable: {0}")]
    Chain(#[from] ChainUnavailable),

    #[error("signature time {sig_time} predates collateral maturity at {matured_at}")]
    Backdated { sig_time: i64, matured_at: i64 },
}

impl ValidationError {
    /// Score forwarded to peer reputation (0 = do not penalize).
    pub fn misbehavior(&self) -> u32 {
        match self {
            ValidationError::FutureTimestamp { .. } | ValidationError::PastTimestamp { .. } => 1,
            ValidationError::InvalidPing(inner) => inner.misbehavior(),
            ValidationError::MalformedKey => 100,
            ValidationError::BadSignature { score } => *score,
            ValidationError::BadPingSignature | ValidationError::CollateralMismatch { .. } => 33,
            _ => 0,
        }
    }

    /// The referenced chain data may just not be synced yet.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ValidationError::Chain(_) | ValidationError::InsufficientConfirmations { .. }
        )
    }
}

/// Local faults surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache load failed: {0}")]
    Load(#[from] LoadError),

    #[error("chain has no tip")]
    NoChainTip,

    #[error("chain data unavailable: {0}")]
    Chain(#[from] ChainUnavailable),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("runtime shut down")]
    RuntimeShutDown,
}

impl From<rmp_serde::encode::Error> for RegistryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RegistryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RegistryError::Deserialization(e.to_string())
    }
}

/// Distinguishable reasons a persisted cache could not be restored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read cache file: {0}")]
    FileError(String),

    #[error("cache file too short to hold a checksum")]
    HashReadError,

    #[error("checksum mismatch, cache is corrupt")]
    IncorrectHash,

    #[error("cache magic message mismatch")]
    IncorrectMagicMessage,

    #[error("cache belongs to another network")]
    IncorrectMagicNumber,

    #[error("cache format invalid: {0}")]
    IncorrectFormat(String),
}
