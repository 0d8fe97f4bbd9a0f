use thiserror::Error;

/// Discriminant of [`ClientError`], used for notification copy and retry decisions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    WalletUnavailable,
    UserRejected,
    NetworkMismatchUnresolvable,
    ReadFailure,
    InsufficientFunds,
    TransactionReverted,
    PreconditionFailed,
}

/// Local validation failures that never reach the chain.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Precondition {
    #[error("no wallet account is connected")]
    NotConnected,
    #[error("select YES or NO first")]
    NoSideSelected,
    #[error("stake must be greater than zero")]
    NonPositiveStake,
    #[error("stake {stake} has more than {decimals} decimal places")]
    StakeTooPrecise { stake: String, decimals: u32 },
    #[error("stake {0} does not fit in the chain's base unit")]
    StakeOutOfRange(String),
    #[error("a connection request is already in progress")]
    ConnectInFlight,
    #[error("wallet is already connected")]
    AlreadyConnected,
    #[error("a transaction is already being submitted")]
    SubmissionInFlight,
    #[error("price must be greater than zero")]
    NonPositivePrice,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ClientError {
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),
    #[error("request rejected: {0}")]
    UserRejected(String),
    #[error("cannot switch to chain {expected}: {reason}")]
    NetworkMismatchUnresolvable { expected: u64, reason: String },
    #[error("read failed: {0}")]
    ReadFailure(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error(transparent)]
    PreconditionFailed(#[from] Precondition),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::WalletUnavailable(_) => ErrorKind::WalletUnavailable,
            ClientError::UserRejected(_) => ErrorKind::UserRejected,
            ClientError::NetworkMismatchUnresolvable { .. } => {
                ErrorKind::NetworkMismatchUnresolvable
            }
            ClientError::ReadFailure(_) => ErrorKind::ReadFailure,
            ClientError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            ClientError::TransactionReverted(_) => ErrorKind::TransactionReverted,
            ClientError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
        }
    }

    /// Read failures clear up on their own; the next refresh cycle retries them.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::ReadFailure)
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn kind__matches_variant() {
        let cases = [
            (
                ClientError::WalletUnavailable("none".into()),
                ErrorKind::WalletUnavailable,
            ),
            (ClientError::UserRejected("no".into()), ErrorKind::UserRejected),
            (
                ClientError::NetworkMismatchUnresolvable {
                    expected: 0,
                    reason: "x".into(),
                },
                ErrorKind::NetworkMismatchUnresolvable,
            ),
            (ClientError::ReadFailure("rpc".into()), ErrorKind::ReadFailure),
            (
                ClientError::InsufficientFunds("low".into()),
                ErrorKind::InsufficientFunds,
            ),
            (
                ClientError::TransactionReverted("closed".into()),
                ErrorKind::TransactionReverted,
            ),
            (
                Precondition::NotConnected.into(),
                ErrorKind::PreconditionFailed,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn is_transient__only_for_read_failures() {
        assert!(ClientError::ReadFailure("timeout".into()).is_transient());
        assert!(!ClientError::TransactionReverted("closed".into()).is_transient());
        assert!(!ClientError::from(Precondition::NoSideSelected).is_transient());
    }
}
