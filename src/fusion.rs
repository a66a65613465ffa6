//! Gate-fusion scratchpad: batches a run of queued gates into one dense
//! matrix instead of replaying each gate's kernel separately.
//!
//! Between `begin_fusion`/`end_fusion` the driver appends every incoming
//! [`Gate`] to a [`FusionBuffer`] instead of dispatching it. On
//! `end_fusion`, [`fuse_matrix`] folds the whole list into one
//! `2^k × 2^k` unitary over the union of touched qubits — built by running
//! [`crate::kernel::apply_local`] on each computational basis vector of the
//! k-qubit subspace (column `j` of a unitary is just that unitary applied
//! to `|j⟩`), then composing the per-gate matrices by ordinary matrix
//! multiplication. Avoiding per-gate virtual dispatch at replay time
//! matters once a fusion group spans many gates: [`apply_fused`] applies
//! the single combined matrix once, using [`crate::bits::compose_index`]
//! to gather/scatter the `2^k` relevant amplitudes per non-fused-bits
//! enumeration value.

use crate::bits::compose_index;
use crate::gate::Gate;
use crate::kernel;
use crate::types::{C, C_ONE, C_ZERO, N};

/// Gate descriptors queued between `begin_fusion`/`end_fusion`, in
/// insertion order. Discarded (via [`Self::take`]) once replayed.
#[derive(Default)]
pub struct FusionBuffer {
    gates: Vec<Gate>,
}

impl FusionBuffer {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    pub fn push(&mut self, gate: Gate) {
        self.gates.push(gate);
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// The union of every logical qubit touched by any queued gate, in
    /// first-occurrence order — this fixes the subspace bit ordering that
    /// both [`fuse_matrix`] and the gather/scatter in [`apply_fused`] must
    /// agree on.
    pub fn union_qubits(&self) -> Vec<N> {
        let mut union = Vec::new();
        for gate in &self.gates {
            for q in gate.qubits() {
                if !union.contains(&q) {
                    union.push(q);
                }
            }
        }
        union
    }

    /// Drains the buffer, returning its gates in insertion order.
    pub fn take(&mut self) -> Vec<Gate> {
        std::mem::take(&mut self.gates)
    }
}

/// Builds the dense `2^k × 2^k` unitary (row-major) for `gate` restricted
/// to the k-qubit subspace whose member `i` occupies local bit `i` —
/// column `j` is `gate` applied to basis state `|j⟩` of that subspace,
/// computed via [`kernel::apply_local`] so this matches the per-amplitude
/// semantics of every kernel exactly, without re-deriving them.
pub(crate) fn single_gate_matrix(gate: &Gate, position_of: &dyn Fn(N) -> N, k: N) -> Vec<C> {
    let dim = 1usize << k;
    let mut matrix = vec![C_ZERO; dim * dim];
    let mut basis = vec![C_ZERO; dim];
    let mut column = vec![C_ZERO; dim];
    for j in 0..dim {
        basis[j] = C_ONE;
        kernel::apply_local(gate, position_of, &basis, &mut column);
        basis[j] = C_ZERO;
        for (i, &amp) in column.iter().enumerate() {
            matrix[i * dim + j] = amp;
        }
    }
    matrix
}

fn matmul(a: &[C], b: &[C], dim: usize) -> Vec<C> {
    let mut out = vec![C_ZERO; dim * dim];
    for i in 0..dim {
        for j in 0..dim {
            let mut acc = C_ZERO;
            for l in 0..dim {
                acc += a[i * dim + l] * b[l * dim + j];
            }
            out[i * dim + j] = acc;
        }
    }
    out
}

/// Folds `gates` (applied in order: `gates[0]` first) into one
/// `2^k × 2^k` row-major unitary over `qubits` (`qubits[i]` maps to local
/// subspace bit `i`). `combined = G_last · … · G_0`, matching sequential
/// application `ψ' = G_last(…(G_0(ψ)))`.
pub fn fuse_matrix(gates: &[Gate], qubits: &[N]) -> Vec<C> {
    let k = qubits.len();
    let dim = 1usize << k;
    let position_of = |q: N| qubits.iter().position(|&u| u == q).expect("fused gate touches a qubit outside the fusion union");

    let mut combined = identity(dim);
    for gate in gates {
        let m = single_gate_matrix(gate, &position_of, k);
        combined = matmul(&m, &combined, dim);
    }
    combined
}

fn identity(dim: usize) -> Vec<C> {
    let mut m = vec![C_ZERO; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = C_ONE;
    }
    m
}

/// Applies the fused `matrix` (as built by [`fuse_matrix`], `qubits[i]`
/// maps to subspace bit `i`) over `flat`, whose operated qubits currently
/// sit at the *physical* local positions in `positions` (already brought
/// local before this is called): for each enumeration value `v` over the
/// non-operated bits, load the `2^k` relevant amplitudes, apply `matrix`,
/// write back.
pub fn apply_fused(positions: &[N], matrix: &[C], flat: &mut [C]) {
    let k = positions.len();
    let dim = 1usize << k;
    let m = flat.len().trailing_zeros() as N;
    let mut gathered = vec![C_ZERO; dim];
    let mut scattered = vec![C_ZERO; dim];

    for v in 0..(1usize << (m - k)) {
        for b in 0..dim {
            gathered[b] = flat[compose_index(v, b, positions)];
        }
        for row in 0..dim {
            let mut acc = C_ZERO;
            for col in 0..dim {
                acc += matrix[row * dim + col] * gathered[col];
            }
            scattered[row] = acc;
        }
        for b in 0..dim {
            flat[compose_index(v, b, positions)] = scattered[b];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Gate;

    fn identity_resolve(q: N) -> N {
        q
    }

    #[test]
    fn union_qubits_is_first_occurrence_order() {
        let mut buf = FusionBuffer::new();
        buf.push(Gate::H(2));
        buf.push(Gate::Swap(0, 2));
        buf.push(Gate::X(1));
        assert_eq!(buf.union_qubits(), vec![2, 0, 1]);
    }

    #[test]
    fn single_gate_fused_matches_direct_application() {
        let psi = vec![C::new(0.6, 0.0), C::new(0.3, 0.4), C::new(0.2, -0.1), C::new(0.1, 0.2)];
        let qubits = vec![0, 1];
        let matrix = fuse_matrix(&[Gate::H(0)], &qubits);

        let mut direct = vec![C_ZERO; 4];
        kernel::apply_local(&Gate::H(0), &identity_resolve, &psi, &mut direct);

        let mut fused = psi.clone();
        apply_fused(&qubits, &matrix, &mut fused);

        for (a, b) in direct.iter().zip(fused.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn two_gate_fusion_matches_sequential_application() {
        let psi = vec![C::new(1.0, 0.0), C_ZERO, C_ZERO, C_ZERO];
        let qubits = vec![0, 1];
        let gates = vec![Gate::H(0), Gate::X(1).controlled(vec![0])];
        let matrix = fuse_matrix(&gates, &qubits);

        let mut sequential = psi.clone();
        for gate in &gates {
            let mut out = vec![C_ZERO; 4];
            kernel::apply_local(gate, &identity_resolve, &sequential, &mut out);
            sequential = out;
        }

        let mut fused = psi.clone();
        apply_fused(&qubits, &matrix, &mut fused);

        for (a, b) in sequential.iter().zip(fused.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn fusion_preserves_norm() {
        let psi = vec![C::new(0.5, 0.0), C::new(0.5, 0.0), C::new(0.5, 0.0), C::new(0.5, 0.0)];
        let qubits = vec![0, 1];
        let gates = vec![Gate::H(0), Gate::H(1), Gate::Swap(0, 1)];
        let matrix = fuse_matrix(&gates, &qubits);
        let mut fused = psi;
        apply_fused(&qubits, &matrix, &mut fused);
        let norm: f64 = fused.iter().map(C::norm_sqr).sum();
        assert!(crate::types::approx_eq_real(norm, 1.0, 1e-9));
    }
}
