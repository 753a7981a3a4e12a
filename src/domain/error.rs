/// Error classification shared by both domains.
///
/// Every operation error maps onto exactly one kind. The first four are the
/// caller-facing taxonomy; `Arithmetic` and `Collaborator` cover overflow and
/// failures of the ledger, yield protocols, or tunnel.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input; retry only after correcting it
    Validation,
    /// Inbound message references a batch in the wrong lifecycle state
    Sequencing,
    /// Operation invoked before its lifecycle precondition holds
    Precondition,
    /// Caller lacks the administrative or operator role
    Authorization,
    /// Checked arithmetic overflowed
    Arithmetic,
    /// Ledger, yield protocol, codec or tunnel failure
    Collaborator,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Sequencing => "sequencing",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Arithmetic => "arithmetic",
            ErrorKind::Collaborator => "collaborator",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
