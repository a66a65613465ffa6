//! Error taxonomy for the engine.
//!
//! Plain enums with hand-written `Display`/`Error` impls, no `thiserror` —
//! this crate's one external dependency for errors is the standard library.

use std::fmt;

/// Everything that can go wrong applying a gate, measuring, or moving data
/// between ranks.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A logical qubit index was out of range, or the same qubit appeared
    /// twice in one operation's argument list (e.g. a qubit used as both a
    /// target and a control, or `permutate(q, q)`).
    InvalidQubit { qubit: usize, num_qubits: usize },
    /// A cluster/gate configuration is internally inconsistent: e.g.
    /// `processes_per_unit` does not divide `2^num_unit_qubits`, or
    /// `num_page_qubits > num_local_qubits`, or a fused operation names
    /// more operated qubits than there are local-nonpage slots.
    InvalidConfiguration(String),
    /// The selected kernel family does not implement this combination of
    /// paged/unit/global operated-qubit positions, and the driver could
    /// not reroute via an interchange.
    UnsupportedPageGateOperation(String),
    /// `clear`/`set` (or any projective collapse) landed on a subspace
    /// with zero norm.
    CollapseToZero,
    /// The collective-communication backend reported a failure. The
    /// amplitude vector is left in an unspecified state; no recovery is
    /// attempted inside the core.
    TransportFailure(String),
    /// The optional checkpoint read/write path failed.
    IOFailure(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidQubit { qubit, num_qubits } => write!(
                f,
                "qubit {qubit} is out of range for a {num_qubits}-qubit register"
            ),
            Error::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Error::UnsupportedPageGateOperation(msg) => {
                write!(f, "unsupported page/unit/global gate layout: {msg}")
            }
            Error::CollapseToZero => write!(f, "projected subspace has zero norm"),
            Error::TransportFailure(msg) => write!(f, "transport failure: {msg}"),
            Error::IOFailure(msg) => write!(f, "checkpoint I/O failure: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
