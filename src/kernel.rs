//! Local gate kernels: the per-amplitude math for every [`Gate`] variant.
//!
//! [`eval_index`] computes a single output amplitude as a gather from its
//! inputs, so [`crate::threads`] can drive it with an ordinary (possibly
//! parallel) loop over output indices. A handful of gates (the X/Y-basis
//! Pauli exponentials) can't be written as one gather per output cell —
//! they go through [`apply_local`]'s staged buffer pipeline instead;
//! [`needs_staging`] tells the driver which path a gate needs. Every
//! position passed in here is assumed already physical *and* local —
//! bringing a qubit local is the interchange layer's job, not this one's.

use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

use crate::gate::{Gate, Pauli};
use crate::types::{C, C_IMAG, C_ONE, C_ZERO, M1, N, R};

/// Whether `gate` can only be computed through [`apply_local`]'s staged
/// buffer pipeline (an X/Y-basis Pauli exponential, or a control wrapping
/// one) rather than one independent gather per output cell.
pub fn needs_staging(gate: &Gate) -> bool {
    match gate {
        Gate::XX { .. } | Gate::YY { .. } => true,
        Gate::ExpPauli { pauli, .. } => matches!(pauli, Pauli::X | Pauli::Y),
        Gate::ExpPauliProduct { pauli_a, pauli_b, .. } => {
            matches!(pauli_a, Pauli::X | Pauli::Y) || matches!(pauli_b, Pauli::X | Pauli::Y)
        }
        Gate::Controlled { gate, .. } => needs_staging(gate),
        _ => false,
    }
}

/// Computes amplitude `out[idx]` for any gate with `!needs_staging(gate)`,
/// reading only from `psi`.
pub fn eval_index(gate: &Gate, resolve: &dyn Fn(N) -> N, psi: &[C], idx: usize) -> C {
    match gate {
        Gate::Id(_) => psi[idx],
        Gate::H(q) => eval_single(psi, idx, resolve(*q), &h_matrix()),
        Gate::X(q) => eval_single(psi, idx, resolve(*q), &x_matrix()),
        Gate::Y(q) => eval_single(psi, idx, resolve(*q), &y_matrix()),
        Gate::Z(q) => eval_single(psi, idx, resolve(*q), &z_matrix()),
        Gate::SqrtX(q) => eval_single(psi, idx, resolve(*q), &sqrt_x_matrix()),
        Gate::SqrtXDagger(q) => eval_single(psi, idx, resolve(*q), &dagger(&sqrt_x_matrix())),
        Gate::SqrtY(q) => eval_single(psi, idx, resolve(*q), &sqrt_y_matrix()),
        Gate::SqrtYDagger(q) => eval_single(psi, idx, resolve(*q), &dagger(&sqrt_y_matrix())),
        Gate::SqrtZ(q) => eval_single(psi, idx, resolve(*q), &[[C_ONE, C_ZERO], [C_ZERO, C_IMAG]]),
        Gate::SqrtZDagger(q) => eval_single(psi, idx, resolve(*q), &[[C_ONE, C_ZERO], [C_ZERO, -C_IMAG]]),
        Gate::RotXPlus(q) => eval_single(psi, idx, resolve(*q), &rx_matrix(1.0)),
        Gate::RotXMinus(q) => eval_single(psi, idx, resolve(*q), &rx_matrix(-1.0)),
        Gate::RotYPlus(q) => eval_single(psi, idx, resolve(*q), &ry_matrix(1.0)),
        Gate::RotYMinus(q) => eval_single(psi, idx, resolve(*q), &ry_matrix(-1.0)),
        Gate::U1 { qubit, lambda } => eval_single(psi, idx, resolve(*qubit), &u1_matrix(*lambda)),
        Gate::U2 { qubit, phi, lambda } => eval_single(psi, idx, resolve(*qubit), &u2_matrix(*phi, *lambda)),
        Gate::U3 { qubit, theta, phi, lambda } => {
            eval_single(psi, idx, resolve(*qubit), &u3_matrix(*theta, *phi, *lambda))
        }
        Gate::PhaseShift { qubit, phase } => eval_single(psi, idx, resolve(*qubit), &u1_matrix(*phase)),
        Gate::ExpPauli { qubit, pauli: Pauli::Z, phase } => {
            eval_diagonal_parity(psi, idx, &[resolve(*qubit)], *phase)
        }
        Gate::ExpPauli { qubit: _, pauli: Pauli::I, phase } => C::new(phase.cos(), phase.sin()) * psi[idx],
        Gate::ExpPauli { .. } => unreachable!("X/Y exp-Pauli goes through the staged pipeline"),
        Gate::Swap(a, b) => eval_swap(psi, idx, resolve(*a), resolve(*b)),
        Gate::ZZ { a, b, phase } => eval_diagonal_parity(psi, idx, &[resolve(*a), resolve(*b)], *phase),
        Gate::SqrtZZ(a, b) => eval_diagonal_parity(psi, idx, &[resolve(*a), resolve(*b)], FRAC_PI_4),
        Gate::SqrtZZDagger(a, b) => eval_diagonal_parity(psi, idx, &[resolve(*a), resolve(*b)], -FRAC_PI_4),
        Gate::ExpPauliProduct { a, pauli_a, b, pauli_b, phase }
            if !matches!(pauli_a, Pauli::X | Pauli::Y) && !matches!(pauli_b, Pauli::X | Pauli::Y) =>
        {
            let positions: Vec<N> = [(*pauli_a, resolve(*a)), (*pauli_b, resolve(*b))]
                .into_iter()
                .filter(|(p, _)| !matches!(p, Pauli::I))
                .map(|(_, pos)| pos)
                .collect();
            eval_diagonal_parity(psi, idx, &positions, *phase)
        }
        Gate::XX { .. } | Gate::YY { .. } | Gate::ExpPauliProduct { .. } => {
            unreachable!("handled by the staged pipeline")
        }
        Gate::ExpSwap { a, b, phase } => eval_exp_swap(psi, idx, resolve(*a), resolve(*b), *phase),
        Gate::PauliString(terms) => {
            let resolved: Vec<(N, Pauli)> = terms.iter().map(|(q, p)| (resolve(*q), *p)).collect();
            eval_pauli_string(psi, idx, &resolved)
        }
        Gate::Controlled { controls, gate } => {
            let control_mask: usize = controls.iter().map(|&q| 1usize << resolve(q)).sum();
            if idx & control_mask == control_mask {
                eval_index(gate, resolve, psi, idx)
            } else {
                psi[idx]
            }
        }
    }
}

/// Applies `gate` to `psi`, writing the result into `out`
/// (`out.len() == psi.len()`, both indexed by the *physical* local basis).
/// `resolve` maps a gate's logical qubit operands to physical positions —
/// the circuit driver supplies `|q| permutation.to_physical(q)`.
pub fn apply_local(gate: &Gate, resolve: &dyn Fn(N) -> N, psi: &[C], out: &mut [C]) {
    if needs_staging(gate) {
        apply_staged(gate, resolve, psi, out);
        return;
    }
    for idx in 0..psi.len() {
        out[idx] = eval_index(gate, resolve, psi, idx);
    }
}

fn apply_staged(gate: &Gate, resolve: &dyn Fn(N) -> N, psi: &[C], out: &mut [C]) {
    match gate {
        Gate::ExpPauli { qubit, pauli, phase } => {
            apply_pauli_exponential(psi, out, &[(resolve(*qubit), *pauli)], *phase)
        }
        Gate::XX { a, b, phase } => {
            apply_pauli_exponential(psi, out, &[(resolve(*a), Pauli::X), (resolve(*b), Pauli::X)], *phase)
        }
        Gate::YY { a, b, phase } => {
            apply_pauli_exponential(psi, out, &[(resolve(*a), Pauli::Y), (resolve(*b), Pauli::Y)], *phase)
        }
        Gate::ExpPauliProduct { a, pauli_a, b, pauli_b, phase } => {
            apply_pauli_exponential(psi, out, &[(resolve(*a), *pauli_a), (resolve(*b), *pauli_b)], *phase)
        }
        Gate::Controlled { controls, gate } => {
            let control_mask: usize = controls.iter().map(|&q| 1usize << resolve(q)).sum();
            let mut inner = vec![C_ZERO; psi.len()];
            apply_local(gate, resolve, psi, &mut inner);
            for idx in 0..psi.len() {
                out[idx] = if idx & control_mask == control_mask { inner[idx] } else { psi[idx] };
            }
        }
        _ => unreachable!("apply_staged only called for needs_staging gates"),
    }
}

fn dagger(m: &M1) -> M1 {
    [[m[0][0].conj(), m[1][0].conj()], [m[0][1].conj(), m[1][1].conj()]]
}

fn h_matrix() -> M1 {
    let s = C::new(FRAC_1_SQRT_2, 0.0);
    [[s, s], [s, -s]]
}

fn x_matrix() -> M1 {
    [[C_ZERO, C_ONE], [C_ONE, C_ZERO]]
}

fn y_matrix() -> M1 {
    [[C_ZERO, -C_IMAG], [C_IMAG, C_ZERO]]
}

fn z_matrix() -> M1 {
    [[C_ONE, C_ZERO], [C_ZERO, -C_ONE]]
}

/// The principal branch of `sqrt(X)`: `(SX)^2 == X`.
fn sqrt_x_matrix() -> M1 {
    let a = C::new(0.5, 0.5);
    let b = C::new(0.5, -0.5);
    [[a, b], [b, a]]
}

/// The principal branch of `sqrt(Y)`: `(SY)^2 == Y`.
fn sqrt_y_matrix() -> M1 {
    let a = C::new(0.5, 0.5);
    let b = C::new(-0.5, -0.5);
    [[a, b], [a, a]]
}

fn rx_matrix(sign: R) -> M1 {
    let c = C::new(FRAC_1_SQRT_2, 0.0);
    let s = C::new(0.0, -FRAC_1_SQRT_2 * sign);
    [[c, s], [s, c]]
}

fn ry_matrix(sign: R) -> M1 {
    let c = C::new(FRAC_1_SQRT_2, 0.0);
    let s = C::new(FRAC_1_SQRT_2 * sign, 0.0);
    [[c, -s], [s, c]]
}

fn u1_matrix(lambda: R) -> M1 {
    [[C_ONE, C_ZERO], [C_ZERO, C::new(lambda.cos(), lambda.sin())]]
}

fn u2_matrix(phi: R, lambda: R) -> M1 {
    let s = C::new(FRAC_1_SQRT_2, 0.0);
    let e_il = C::new(lambda.cos(), lambda.sin());
    let e_ip = C::new(phi.cos(), phi.sin());
    let e_ipl = C::new((phi + lambda).cos(), (phi + lambda).sin());
    [[s, -s * e_il], [s * e_ip, s * e_ipl]]
}

fn u3_matrix(theta: R, phi: R, lambda: R) -> M1 {
    let c = C::new((theta / 2.0).cos(), 0.0);
    let s = C::new((theta / 2.0).sin(), 0.0);
    let e_il = C::new(lambda.cos(), lambda.sin());
    let e_ip = C::new(phi.cos(), phi.sin());
    let e_ipl = C::new((phi + lambda).cos(), (phi + lambda).sin());
    [[c, -s * e_il], [s * e_ip, c * e_ipl]]
}

/// The basis change that diagonalizes Pauli `p` into `Z` (`U p U^† == Z`),
/// or `None` for `I`/`Z` which need no change.
fn diagonalizing_change(p: Pauli) -> Option<M1> {
    match p {
        Pauli::I | Pauli::Z => None,
        Pauli::X => Some(h_matrix()),
        Pauli::Y => {
            // Eigenvectors of Y are (1, i)/sqrt2 (+1) and (1, -i)/sqrt2 (-1);
            // U is that eigenvector matrix's conjugate transpose.
            let s = C::new(FRAC_1_SQRT_2, 0.0);
            Some([[s, -s * C_IMAG], [s, s * C_IMAG]])
        }
    }
}

#[inline]
fn eval_single(psi: &[C], idx: usize, pos: N, m: &M1) -> C {
    let bit = 1usize << pos;
    if idx & bit == 0 {
        m[0][0] * psi[idx] + m[0][1] * psi[idx | bit]
    } else {
        m[1][0] * psi[idx & !bit] + m[1][1] * psi[idx]
    }
}

#[inline]
fn eval_swap(psi: &[C], idx: usize, pos_a: N, pos_b: N) -> C {
    let bit_a = 1usize << pos_a;
    let bit_b = 1usize << pos_b;
    let a_set = idx & bit_a != 0;
    let b_set = idx & bit_b != 0;
    let source = if a_set == b_set { idx } else { idx ^ bit_a ^ bit_b };
    psi[source]
}

/// `exp(i*phase*SWAP)`: acts as `e^{i*phase}` on `|00>`/`|11>`, and mixes
/// `|01>`/`|10>` as `cos(phase)*I + i*sin(phase)*SWAP` restricted to that
/// 2-dimensional subspace — the closed form of SWAP's eigendecomposition
/// (symmetric subspace eigenvalue `+1`, antisymmetric `-1`).
#[inline]
fn eval_exp_swap(psi: &[C], idx: usize, pos_a: N, pos_b: N, phase: R) -> C {
    let bit_a = 1usize << pos_a;
    let bit_b = 1usize << pos_b;
    let a_set = idx & bit_a != 0;
    let b_set = idx & bit_b != 0;
    if a_set == b_set {
        C::new(phase.cos(), phase.sin()) * psi[idx]
    } else {
        let partner = idx ^ bit_a ^ bit_b;
        C::new(phase.cos(), 0.0) * psi[idx] + C::new(0.0, phase.sin()) * psi[partner]
    }
}

/// `psi[idx] * exp(i*phase*s)`, `s = (-1)^(number of `positions` set in
/// `idx`)` — the eigenvalue of `Z⊗Z⊗...` on basis state `idx`.
#[inline]
fn eval_diagonal_parity(psi: &[C], idx: usize, positions: &[N], phase: R) -> C {
    let parity = positions.iter().filter(|&&p| idx & (1usize << p) != 0).count() % 2;
    let plus = C::new(phase.cos(), phase.sin());
    psi[idx] * if parity == 0 { plus } else { plus.conj() }
}

/// Direct (non-exponentiated) application of a tensor product of
/// single-qubit Paulis, as a gather: `X`/`Y` terms make `idx`'s source the
/// same bit-flip away (the flip is its own inverse), `Y`/`Z` contribute a
/// phase from the *source*'s bit value.
#[inline]
pub(crate) fn eval_pauli_string(psi: &[C], idx: usize, terms: &[(N, Pauli)]) -> C {
    let flip_mask: usize = terms
        .iter()
        .filter(|(_, p)| matches!(p, Pauli::X | Pauli::Y))
        .map(|&(pos, _)| 1usize << pos)
        .sum();
    let source = idx ^ flip_mask;
    let mut phase = C_ONE;
    for &(pos, pauli) in terms {
        let set = source & (1usize << pos) != 0;
        match pauli {
            Pauli::I | Pauli::X => {}
            Pauli::Y => phase *= if set { -C_IMAG } else { C_IMAG },
            Pauli::Z => {
                if set {
                    phase = -phase;
                }
            }
        }
    }
    phase * psi[source]
}

/// `exp(i*phase*P1⊗P2⊗...)` for an arbitrary multi-qubit Pauli string:
/// rotate every non-Z/I term into the Z basis, apply the diagonal parity
/// phase, then rotate back. Each stage is itself a full `eval_single` /
/// `eval_diagonal_parity` pass, so [`crate::threads`] can still
/// parallelize within a stage even though the three stages run in order.
fn apply_pauli_exponential(psi: &[C], out: &mut [C], terms: &[(N, Pauli)], phase: R) {
    let len = psi.len();
    let mut buf_a = psi.to_vec();
    let mut buf_b = vec![C_ZERO; len];

    for &(pos, pauli) in terms {
        if let Some(change) = diagonalizing_change(pauli) {
            for idx in 0..len {
                buf_b[idx] = eval_single(&buf_a, idx, pos, &change);
            }
            std::mem::swap(&mut buf_a, &mut buf_b);
        }
    }

    let z_positions: Vec<N> = terms.iter().filter(|(_, p)| !matches!(p, Pauli::I)).map(|&(pos, _)| pos).collect();
    for idx in 0..len {
        buf_b[idx] = eval_diagonal_parity(&buf_a, idx, &z_positions, phase);
    }
    std::mem::swap(&mut buf_a, &mut buf_b);

    for &(pos, pauli) in terms.iter().rev() {
        if let Some(change) = diagonalizing_change(pauli) {
            let dag = dagger(&change);
            for idx in 0..len {
                buf_b[idx] = eval_single(&buf_a, idx, pos, &dag);
            }
            std::mem::swap(&mut buf_a, &mut buf_b);
        }
    }
    out.copy_from_slice(&buf_a);
}
