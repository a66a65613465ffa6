//! Gate descriptors feeding the local kernels in [`crate::kernel`].
//!
//! One tagged enum covers the whole gate vocabulary (sqrt-Pauli family,
//! U1/U2/U3, arbitrary exp(iφP) Pauli strings, the XX/YY/ZZ/√ZZ/expSWAP
//! two-qubit family...) rather than one type per gate — with this many
//! variants a struct-per-gate split stops paying for itself, and
//! [`crate::kernel`] just matches on the tag instead of dispatching through
//! a trait object.

use crate::types::{N, R};

/// A single-qubit Pauli operator, used as a gate and as a term inside a
/// Pauli string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pauli {
    I,
    X,
    Y,
    Z,
}

/// One gate application in terms of *logical* qubit indices. The circuit
/// driver resolves these to physical positions through the live
/// [`crate::permutation::Permutation`] and, if any operand is not local,
/// runs an interchange before a kernel ever sees it.
#[derive(Clone, Debug, PartialEq)]
pub enum Gate {
    Id(N),
    H(N),
    X(N),
    Y(N),
    Z(N),
    SqrtX(N),
    SqrtXDagger(N),
    SqrtY(N),
    SqrtYDagger(N),
    SqrtZ(N),
    SqrtZDagger(N),
    /// ±X_{π/2}: rotation by ±π/2 about the X axis.
    RotXPlus(N),
    RotXMinus(N),
    RotYPlus(N),
    RotYMinus(N),
    U1 { qubit: N, lambda: R },
    U2 { qubit: N, phi: R, lambda: R },
    U3 { qubit: N, theta: R, phi: R, lambda: R },
    PhaseShift { qubit: N, phase: R },
    /// exp(iφP) for a single-qubit Pauli `P`.
    ExpPauli { qubit: N, pauli: Pauli, phase: R },
    Swap(N, N),
    /// exp(iφ·Xₐ⊗Xᵦ), and likewise for YY/ZZ.
    XX { a: N, b: N, phase: R },
    YY { a: N, b: N, phase: R },
    ZZ { a: N, b: N, phase: R },
    SqrtZZ(N, N),
    SqrtZZDagger(N, N),
    /// exp(iφ·P₁⊗P₂) for two independently-chosen Paulis.
    ExpPauliProduct { a: N, pauli_a: Pauli, b: N, pauli_b: Pauli, phase: R },
    /// exp(iφ·SWAP).
    ExpSwap { a: N, b: N, phase: R },
    /// Direct application of a tensor product of single-qubit Paulis —
    /// not exponentiated, the multi-qubit generalization of `X`/`Y`/`Z`.
    PauliString(Vec<(N, Pauli)>),
    Controlled { controls: Vec<N>, gate: Box<Gate> },
}

impl Gate {
    /// Wraps `self` so it only fires when every qubit in `controls` reads 1.
    pub fn controlled(self, controls: Vec<N>) -> Self {
        Gate::Controlled { controls, gate: Box::new(self) }
    }

    /// Every logical qubit this gate touches, including controls.
    pub fn qubits(&self) -> Vec<N> {
        match self {
            Gate::Id(q)
            | Gate::H(q)
            | Gate::X(q)
            | Gate::Y(q)
            | Gate::Z(q)
            | Gate::SqrtX(q)
            | Gate::SqrtXDagger(q)
            | Gate::SqrtY(q)
            | Gate::SqrtYDagger(q)
            | Gate::SqrtZ(q)
            | Gate::SqrtZDagger(q)
            | Gate::RotXPlus(q)
            | Gate::RotXMinus(q)
            | Gate::RotYPlus(q)
            | Gate::RotYMinus(q) => vec![*q],
            Gate::U1 { qubit, .. } => vec![*qubit],
            Gate::U2 { qubit, .. } => vec![*qubit],
            Gate::U3 { qubit, .. } => vec![*qubit],
            Gate::PhaseShift { qubit, .. } => vec![*qubit],
            Gate::ExpPauli { qubit, .. } => vec![*qubit],
            Gate::Swap(a, b) | Gate::SqrtZZ(a, b) | Gate::SqrtZZDagger(a, b) => vec![*a, *b],
            Gate::XX { a, b, .. } | Gate::YY { a, b, .. } | Gate::ZZ { a, b, .. } => vec![*a, *b],
            Gate::ExpPauliProduct { a, b, .. } => vec![*a, *b],
            Gate::ExpSwap { a, b, .. } => vec![*a, *b],
            Gate::PauliString(terms) => terms.iter().map(|(q, _)| *q).collect(),
            Gate::Controlled { controls, gate } => {
                let mut qs = gate.qubits();
                qs.extend(controls.iter().copied());
                qs
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            Gate::Id(q) => format!("I{q}"),
            Gate::H(q) => format!("H{q}"),
            Gate::X(q) => format!("X{q}"),
            Gate::Y(q) => format!("Y{q}"),
            Gate::Z(q) => format!("Z{q}"),
            Gate::SqrtX(q) => format!("SqrtX{q}"),
            Gate::SqrtXDagger(q) => format!("SqrtXDagger{q}"),
            Gate::SqrtY(q) => format!("SqrtY{q}"),
            Gate::SqrtYDagger(q) => format!("SqrtYDagger{q}"),
            Gate::SqrtZ(q) => format!("SqrtZ{q}"),
            Gate::SqrtZDagger(q) => format!("SqrtZDagger{q}"),
            Gate::RotXPlus(q) => format!("RotXPlus{q}"),
            Gate::RotXMinus(q) => format!("RotXMinus{q}"),
            Gate::RotYPlus(q) => format!("RotYPlus{q}"),
            Gate::RotYMinus(q) => format!("RotYMinus{q}"),
            Gate::U1 { qubit, .. } => format!("U1[{qubit}]"),
            Gate::U2 { qubit, .. } => format!("U2[{qubit}]"),
            Gate::U3 { qubit, .. } => format!("U3[{qubit}]"),
            Gate::PhaseShift { qubit, .. } => format!("PhaseShift[{qubit}]"),
            Gate::ExpPauli { qubit, .. } => format!("ExpPauli[{qubit}]"),
            Gate::Swap(a, b) => format!("Swap[{a},{b}]"),
            Gate::XX { a, b, .. } => format!("XX[{a},{b}]"),
            Gate::YY { a, b, .. } => format!("YY[{a},{b}]"),
            Gate::ZZ { a, b, .. } => format!("ZZ[{a},{b}]"),
            Gate::SqrtZZ(a, b) => format!("SqrtZZ[{a},{b}]"),
            Gate::SqrtZZDagger(a, b) => format!("SqrtZZDagger[{a},{b}]"),
            Gate::ExpPauliProduct { a, b, .. } => format!("ExpPauliProduct[{a},{b}]"),
            Gate::ExpSwap { a, b, .. } => format!("ExpSwap[{a},{b}]"),
            Gate::PauliString(terms) => format!("PauliString{:?}", terms),
            Gate::Controlled { controls, gate } => format!("C{:?}_{}", controls, gate.name()),
        }
    }
}
