//! The qubit permutation map: a forward/inverse array pair tracking which
//! physical position currently holds each logical qubit.
//!
//! `forward[logical] = physical`, `inverse[physical] = logical`, mutated
//! only through `permutate(q1, q2)` which swaps both arrays in lock step so
//! the invariant `inverse[forward[q]] == q` (and vice versa) never breaks.

use crate::error::{Error, Result};
use crate::types::N;

/// Bidirectional mapping between logical qubits and their current
/// physical bit position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    /// `forward[logical] = physical`
    forward: Vec<N>,
    /// `inverse[physical] = logical`
    inverse: Vec<N>,
}

impl Permutation {
    /// The identity permutation on `num_qubits` qubits.
    pub fn identity(num_qubits: N) -> Self {
        let ids: Vec<N> = (0..num_qubits).collect();
        Self { forward: ids.clone(), inverse: ids }
    }

    pub fn num_qubits(&self) -> N {
        self.forward.len()
    }

    /// The current physical position of logical qubit `q`.
    #[inline]
    pub fn to_physical(&self, logical: N) -> N {
        self.forward[logical]
    }

    /// The logical qubit currently sitting at physical position `p`.
    #[inline]
    pub fn to_logical(&self, physical: N) -> N {
        self.inverse[physical]
    }

    /// Swaps the physical positions of logical qubits `q1` and `q2`. This
    /// is the *only* mutator: every other bookkeeping operation in the
    /// driver goes through this so the forward/inverse invariant is
    /// maintained by construction.
    pub fn permutate(&mut self, q1: N, q2: N) -> Result<()> {
        if q1 == q2 {
            return Err(Error::InvalidQubit { qubit: q1, num_qubits: self.num_qubits() });
        }
        let p1 = self.forward[q1];
        let p2 = self.forward[q2];
        self.forward.swap(q1, q2);
        self.inverse.swap(p1, p2);
        Ok(())
    }

    /// Swaps whichever two logical qubits currently sit at physical
    /// positions `p1` and `p2` — the form an inter-process interchange
    /// needs, since it knows physical slots, not logical qubits.
    pub fn permutate_physical(&mut self, p1: N, p2: N) -> Result<()> {
        let q1 = self.inverse[p1];
        let q2 = self.inverse[p2];
        self.permutate(q1, q2)
    }

    /// Applies the permutation bit-by-bit to an integer: maps a logical
    /// basis-state index to its current physical index.
    pub fn permutate_bits(&self, x: usize) -> usize {
        permute_bits_with(x, &self.forward)
    }

    /// Inverse of [`Self::permutate_bits`].
    pub fn inverse_permutate_bits(&self, x: usize) -> usize {
        permute_bits_with(x, &self.inverse)
    }
}

/// `result` has bit `table[i]` set iff `x` has bit `i` set.
fn permute_bits_with(x: usize, table: &[N]) -> usize {
    let mut result = 0usize;
    for (i, &dest) in table.iter().enumerate() {
        if (x >> i) & 1 != 0 {
            result |= 1 << dest;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let perm = Permutation::identity(5);
        for q in 0..5 {
            assert_eq!(perm.to_physical(q), q);
            assert_eq!(perm.to_logical(q), q);
        }
    }

    #[test]
    fn permutate_preserves_bijection_invariant() {
        let mut perm = Permutation::identity(6);
        perm.permutate(1, 4).unwrap();
        perm.permutate(0, 5).unwrap();
        for q in 0..6 {
            assert_eq!(perm.to_logical(perm.to_physical(q)), q);
        }
        for p in 0..6 {
            assert_eq!(perm.to_physical(perm.to_logical(p)), p);
        }
    }

    #[test]
    fn self_swap_is_rejected() {
        let mut perm = Permutation::identity(3);
        assert_eq!(
            perm.permutate(1, 1),
            Err(Error::InvalidQubit { qubit: 1, num_qubits: 3 })
        );
    }

    #[test]
    fn permutate_bits_inverse_round_trips_all_values() {
        let mut perm = Permutation::identity(4);
        perm.permutate(0, 3).unwrap();
        perm.permutate(1, 2).unwrap();
        for x in 0..16usize {
            assert_eq!(perm.permutate_bits(perm.inverse_permutate_bits(x)), x);
            assert_eq!(perm.inverse_permutate_bits(perm.permutate_bits(x)), x);
        }
    }
}
