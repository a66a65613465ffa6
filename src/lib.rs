#![warn(clippy::cargo)]
#![allow(clippy::comparison_chain)]
#![doc = include_str!("../README.md")]

//! The local-amplitude update engine of a distributed quantum state-vector
//! simulator: data layout across processes, qubit permutation bookkeeping,
//! bit-indexed gate kernels, the gate-fusion scratchpad, and the
//! inter-process qubit-swap protocol that keeps operated qubits local
//! before a kernel fires. The circuit-text parser, CLI front end, result
//! serialization, and logging are left to callers; see each module's own
//! doc comment for the component of the design it implements.

pub mod bits;
pub mod distribution;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod interchange;
pub mod kernel;
pub mod pages;
pub mod permutation;
pub mod rng;
pub mod state;
pub mod threads;
pub mod transport;
pub mod types;

#[doc(hidden)]
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::gate::{Gate, Pauli};
    pub use crate::state::{ClusterConfig, DistributedState};
    pub use crate::types::{C, N, R};
}
