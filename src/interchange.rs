//! Inter-process qubit interchange.
//!
//! A local kernel can only touch a qubit sitting at a local physical
//! position. When a gate operand's physical position is unit or global,
//! the rank holding it and one partner rank exchange half their local
//! amplitude array over [`Transport::exchange`] — the data move and the
//! permutation-table update happen as one atomic step so [`Permutation`]
//! never observes a half-migrated state.
//!
//! For a global position, only one rank's bit of the global value changes
//! per swap, so the partner is unambiguous: flip that one bit of the
//! global value, recompute the rank from it. A unit position works the
//! same way over the rank's position within its unit (`rank_in_unit`)
//! instead of the global value — valid as long as this rank holds exactly
//! one data block, since then the unit bits being interchanged select a
//! *rank* rather than a locally-held data block.

use crate::distribution::{DistributionPolicy, QubitClass};
use crate::error::{Error, Result};
use crate::permutation::Permutation;
use crate::transport::Transport;
use crate::types::{C, C_ZERO, N};

/// Brings every qubit in `logical_qubits` to a local physical position,
/// swapping with partner ranks over `transport` as needed. Mutates `psi`
/// and `permutation` in lock step; after this returns,
/// `policy.is_local(permutation.to_physical(q))` holds for every `q` in
/// `logical_qubits`.
pub fn maybe_interchange_qubits(
    policy: &DistributionPolicy,
    permutation: &mut Permutation,
    psi: &mut [C],
    transport: &dyn Transport,
    logical_qubits: &[N],
) -> Result<()> {
    for &q in logical_qubits {
        while !policy.is_local(permutation.to_physical(q)) {
            let target_pos = pick_local_nonpage_slot(policy, permutation, logical_qubits);
            interchange_one(policy, permutation, psi, transport, q, target_pos)?;
        }
    }
    Ok(())
}

/// Picks a local-nonpage physical position not currently hosting one of
/// `reserved` — the operands of the gate in flight, which must not be
/// evicted mid-interchange.
fn pick_local_nonpage_slot(policy: &DistributionPolicy, permutation: &Permutation, reserved: &[N]) -> N {
    (0..policy.num_local_nonpage_qubits())
        .find(|&pos| !reserved.contains(&permutation.to_logical(pos)))
        .expect("no free local-nonpage slot to interchange into — num_local_nonpage_qubits too small for this gate")
}

fn interchange_one(
    policy: &DistributionPolicy,
    permutation: &mut Permutation,
    psi: &mut [C],
    transport: &dyn Transport,
    logical_q: N,
    target_pos: N,
) -> Result<()> {
    let phys = permutation.to_physical(logical_q);
    let rank = transport.rank();

    let (own_bit, partner_rank) = match policy.classify(phys) {
        QubitClass::Global => {
            let own_global_value = policy.global_qubit_value(rank);
            let g_rel = phys - policy.num_nonglobal_qubits();
            let own_bit = (own_global_value >> g_rel) & 1;
            let partner_global = own_global_value ^ (1 << g_rel);
            let partner_rank = partner_global * policy.processes_per_unit() + policy.rank_in_unit(rank);
            (own_bit, partner_rank)
        }
        QubitClass::Unit => {
            if policy.num_data_blocks(rank) != 1 {
                return Err(Error::UnsupportedPageGateOperation(format!(
                    "unit-qubit interchange requires exactly one data block per rank, rank {rank} holds {}",
                    policy.num_data_blocks(rank)
                )));
            }
            let own_rank_in_unit = policy.rank_in_unit(rank);
            let u_rel = phys - policy.num_local_qubits();
            let own_bit = (own_rank_in_unit >> u_rel) & 1;
            let partner_rank_in_unit = own_rank_in_unit ^ (1 << u_rel);
            let partner_rank = policy.global_qubit_value(rank) * policy.processes_per_unit() + partner_rank_in_unit;
            (own_bit, partner_rank)
        }
        QubitClass::LocalNonpage | QubitClass::Page => {
            unreachable!("maybe_interchange_qubits only calls this for non-local positions")
        }
    };

    // The half where local bit `target_pos` disagrees with this rank's own
    // global bit is exactly the half the partner needs, and exactly the
    // half this rank receives in return — see the module doc for why.
    let mismatched = 1 - own_bit;
    let mask_p = 1usize << target_pos;
    let half_len = psi.len() / 2;

    let mut send_buf = Vec::with_capacity(half_len);
    for idx in 0..psi.len() {
        if usize::from(idx & mask_p != 0) == mismatched {
            send_buf.push(psi[idx]);
        }
    }

    let mut recv_buf = vec![C_ZERO; half_len];
    transport.exchange(partner_rank, &send_buf, &mut recv_buf)?;

    let mut received = recv_buf.into_iter();
    for idx in 0..psi.len() {
        if usize::from(idx & mask_p != 0) == mismatched {
            psi[idx] = received.next().expect("recv_buf sized to exactly one half of psi");
        }
    }

    permutation.permutate_physical(phys, target_pos)?;
    Ok(())
}
