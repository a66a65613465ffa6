//! The circuit driver ([`DistributedState`]) and its [`ClusterConfig`]
//! builder.
//!
//! [`DistributedState`] is this crate's top-level type — the rank-local
//! half of one participant in a `num_ranks`-process cluster simulating an
//! `N`-qubit state vector. It owns a [`DistributionPolicy`], a live
//! [`Permutation`], the local [`PagedBuffer`], a [`Transport`] and a
//! [`RandomSource`]. Every public verb resolves logical qubits to physical
//! positions through the permutation, calls [`maybe_interchange_qubits`]
//! to bring any non-local operand home, then dispatches a kernel (through
//! the thread pool) or folds a fusion group.

use crate::distribution::{Distribution, DistributionPolicy, QubitClass};
use crate::error::{Error, Result};
use crate::fusion::{self, FusionBuffer};
use crate::gate::{Gate, Pauli};
use crate::interchange::maybe_interchange_qubits;
use crate::pages::PagedBuffer;
use crate::permutation::Permutation;
use crate::rng::{RandomSource, SeededRng};
use crate::threads;
use crate::transport::{SingleRankTransport, Transport};
use crate::types::{C, C_ZERO, N, R};

/// Assembles the fixed cluster shape consumed once at construction: qubit
/// count, paging, distribution strategy, and thread pool size.
#[derive(Clone, Copy, Debug)]
pub struct ClusterConfig {
    num_qubits: N,
    num_page_qubits: N,
    distribution: Distribution,
    num_threads: N,
}

impl ClusterConfig {
    /// A single-rank, unpaged cluster on `num_qubits` qubits — the common
    /// desktop-run shape.
    pub fn new(num_qubits: N) -> Self {
        Self {
            num_qubits,
            num_page_qubits: 0,
            distribution: Distribution::Simple { num_global_qubits: 0 },
            num_threads: 1,
        }
    }

    pub fn with_page_qubits(mut self, num_page_qubits: N) -> Self {
        self.num_page_qubits = num_page_qubits;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_num_threads(mut self, num_threads: N) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    fn policy(&self) -> Result<DistributionPolicy> {
        DistributionPolicy::new(self.num_qubits, self.num_page_qubits, self.distribution)
    }
}

/// One rank's share of a distributed `N`-qubit amplitude vector, plus the
/// bookkeeping needed to keep every rank's view consistent as gates apply.
pub struct DistributedState {
    num_qubits: N,
    policy: DistributionPolicy,
    permutation: Permutation,
    psi: PagedBuffer,
    transport: Box<dyn Transport>,
    rng: Box<dyn RandomSource>,
    fusion: Option<FusionBuffer>,
    num_threads: N,
}

impl DistributedState {
    /// Builds the rank identified by `transport.rank()`, with the
    /// computational basis state `initial_index`: amplitude 1 at that
    /// index, 0 elsewhere.
    pub fn new(
        config: ClusterConfig,
        initial_index: N,
        transport: Box<dyn Transport>,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self> {
        let policy = config.policy()?;
        if initial_index >= 1usize << config.num_qubits {
            return Err(Error::InvalidQubit { qubit: initial_index, num_qubits: config.num_qubits });
        }
        if policy.num_data_blocks(transport.rank()) != 1 {
            return Err(Error::InvalidConfiguration(
                "this driver holds exactly one data block per rank; unit distributions that \
                 would give a rank more than one data block are rejected at construction \
                 rather than dispatched against incorrectly"
                    .to_string(),
            ));
        }

        let permutation = Permutation::identity(config.num_qubits);
        let mut psi = PagedBuffer::new(policy.num_local_nonpage_qubits(), policy.num_page_qubits());

        let physical_index = permutation.permutate_bits(initial_index);
        let (owner_rank, _, offset) = policy.locate(physical_index);
        if owner_rank == transport.rank() {
            psi.set(offset, C::new(1.0, 0.0));
        }

        Ok(Self {
            num_qubits: config.num_qubits,
            policy,
            permutation,
            psi,
            transport,
            rng,
            fusion: None,
            num_threads: config.num_threads,
        })
    }

    /// Convenience constructor for the common single-process case: one
    /// rank, no paging, no distribution.
    pub fn single(num_qubits: N, initial_index: N, seed: u64) -> Result<Self> {
        Self::new(
            ClusterConfig::new(num_qubits),
            initial_index,
            Box::new(SingleRankTransport),
            Box::new(SeededRng::new(seed)),
        )
    }

    pub fn num_qubits(&self) -> N {
        self.num_qubits
    }

    pub fn rank(&self) -> N {
        self.transport.rank()
    }

    fn validate_qubit(&self, qubit: N) -> Result<()> {
        if qubit >= self.num_qubits {
            Err(Error::InvalidQubit { qubit, num_qubits: self.num_qubits })
        } else {
            Ok(())
        }
    }

    fn validate_distinct(&self, qubits: &[N]) -> Result<()> {
        for &q in qubits {
            self.validate_qubit(q)?;
        }
        for i in 0..qubits.len() {
            for j in (i + 1)..qubits.len() {
                if qubits[i] == qubits[j] {
                    return Err(Error::InvalidQubit { qubit: qubits[i], num_qubits: self.num_qubits });
                }
            }
        }
        Ok(())
    }

    fn flatten(&self) -> Vec<C> {
        self.psi.pages().flat_map(|p| p.iter().copied()).collect()
    }

    fn unflatten(&mut self, flat: Vec<C>) {
        let page_size = self.psi.page_size();
        for (page_value, chunk) in flat.chunks(page_size).enumerate() {
            self.psi.page_mut(page_value).copy_from_slice(chunk);
        }
    }

    /// Brings every qubit in `qubits` to a local physical position,
    /// returning the rank's flattened local amplitudes for further work.
    fn bring_local_and_flatten(&mut self, qubits: &[N]) -> Result<Vec<C>> {
        let mut flat = self.flatten();
        maybe_interchange_qubits(&self.policy, &mut self.permutation, &mut flat, self.transport.as_ref(), qubits)?;
        Ok(flat)
    }

    /// Applies `gate` immediately (bypassing any open fusion group):
    /// interchange whatever operand isn't already local, then dispatch
    /// through [`Self::apply_local_paged`] without ever flattening a page
    /// that doesn't need it.
    fn apply_now(&mut self, gate: &Gate) -> Result<()> {
        let qubits = gate.qubits();
        self.validate_distinct(&qubits)?;

        let already_local = qubits.iter().all(|&q| self.policy.is_local(self.permutation.to_physical(q)));
        if !already_local {
            let mut flat = self.flatten();
            maybe_interchange_qubits(&self.policy, &mut self.permutation, &mut flat, self.transport.as_ref(), &qubits)?;
            self.unflatten(flat);
        }

        self.apply_local_paged(gate, &qubits)
    }

    /// Applies `gate` directly against the paged local buffer, once every
    /// operand already sits at a local physical position. A `Swap` between
    /// two page qubits goes through [`PagedBuffer::swap_pages`] — no
    /// amplitude moves, only the page table does. A gate touching a page
    /// qubit otherwise goes through [`PagedBuffer::apply_gate`]'s indirected
    /// gather/scatter. Everything else (no page qubit involved at all) is
    /// dispatched one page at a time through the thread pool, so pages stay
    /// independent contiguous slices rather than one flattened copy.
    fn apply_local_paged(&mut self, gate: &Gate, qubits: &[N]) -> Result<()> {
        if let Gate::Swap(a, b) = gate {
            let pa = self.permutation.to_physical(*a);
            let pb = self.permutation.to_physical(*b);
            if self.policy.classify(pa) == QubitClass::Page && self.policy.classify(pb) == QubitClass::Page {
                let nonpage_bits = self.policy.num_local_nonpage_qubits();
                let bit_a = pa - nonpage_bits;
                let bit_b = pb - nonpage_bits;
                for page_value in 0..self.psi.num_pages() {
                    let val_a = (page_value >> bit_a) & 1;
                    let val_b = (page_value >> bit_b) & 1;
                    if val_a != val_b {
                        let partner = page_value ^ (1 << bit_a) ^ (1 << bit_b);
                        if page_value < partner {
                            self.psi.swap_pages(page_value, partner);
                        }
                    }
                }
                self.permutation.permutate(*a, *b)?;
                return Ok(());
            }
        }

        let positions: Vec<N> = qubits.iter().map(|&q| self.permutation.to_physical(q)).collect();
        let touches_page = positions.iter().any(|&p| self.policy.classify(p) == QubitClass::Page);
        let permutation = &self.permutation;
        let resolve = |q: N| permutation.to_physical(q);

        if touches_page {
            self.psi.apply_gate(gate, &resolve);
        } else {
            let num_threads = self.num_threads;
            for page_value in 0..self.psi.num_pages() {
                let page = self.psi.page_mut(page_value);
                let mut out = vec![C_ZERO; page.len()];
                threads::apply_parallel(gate, &resolve, page, &mut out, num_threads);
                page.copy_from_slice(&out);
            }
        }
        Ok(())
    }

    /// Queues `gate` into the open fusion group if one is active, otherwise
    /// dispatches it immediately.
    pub fn apply(&mut self, gate: Gate) -> Result<()> {
        self.validate_distinct(&gate.qubits())?;
        if let Some(buffer) = &mut self.fusion {
            buffer.push(gate);
            Ok(())
        } else {
            self.apply_now(&gate)
        }
    }

    /// Opens a fusion group: every gate applied afterward queues instead of
    /// dispatching, until [`Self::end_fusion`]. Opening one while one is
    /// already open is a no-op on the existing group.
    pub fn begin_fusion(&mut self) {
        if self.fusion.is_none() {
            self.fusion = Some(FusionBuffer::new());
        }
    }

    /// Closes the open fusion group: union the touched qubits, bring them
    /// local with one multi-qubit interchange if needed, fold every queued
    /// gate's matrix into one `2^k × 2^k` unitary, and apply it once
    /// through [`PagedBuffer::apply_matrix`] — no flatten/unflatten unless
    /// an interchange was actually required.
    pub fn end_fusion(&mut self) -> Result<()> {
        let mut buffer = match self.fusion.take() {
            Some(buffer) => buffer,
            None => return Ok(()),
        };
        if buffer.is_empty() {
            return Ok(());
        }

        let qubits = buffer.union_qubits();
        if qubits.len() > self.policy.num_local_qubits() {
            return Err(Error::InvalidConfiguration(format!(
                "fused operation touches {} qubits, more than the {} local slots available",
                qubits.len(),
                self.policy.num_local_qubits()
            )));
        }

        let already_local = qubits.iter().all(|&q| self.policy.is_local(self.permutation.to_physical(q)));
        if !already_local {
            let mut flat = self.flatten();
            maybe_interchange_qubits(&self.policy, &mut self.permutation, &mut flat, self.transport.as_ref(), &qubits)?;
            self.unflatten(flat);
        }

        let gates = buffer.take();
        let positions: Vec<N> = qubits.iter().map(|&q| self.permutation.to_physical(q)).collect();
        let matrix = fusion::fuse_matrix(&gates, &qubits);
        self.psi.apply_matrix(&positions, &matrix);
        Ok(())
    }

    /// Measures `qubit` in the computational basis: local partial P₀,
    /// all-reduce, draw, project, renormalize. Returns the outcome bit.
    pub fn measure(&mut self, qubit: N) -> Result<N> {
        self.validate_qubit(qubit)?;
        let mut flat = self.bring_local_and_flatten(&[qubit])?;
        let phys = self.permutation.to_physical(qubit);
        let bit = 1usize << phys;

        let local_p0: R = flat.iter().enumerate().filter(|&(idx, _)| idx & bit == 0).map(|(_, c)| c.norm_sqr()).sum();
        let p0 = self.transport.all_reduce_sum_real(local_p0)?;

        let draw = self.rng.next_real();
        let outcome = if draw < p0 { 0 } else { 1 };
        self.project_bit(&mut flat, bit, outcome, if outcome == 0 { p0 } else { 1.0 - p0 })?;
        self.unflatten(flat);
        Ok(outcome)
    }

    /// Alias for [`Self::measure`].
    pub fn projective_measurement(&mut self, qubit: N) -> Result<N> {
        self.measure(qubit)
    }

    /// Projects `qubit` onto `|0⟩`, renormalizing.
    pub fn clear(&mut self, qubit: N) -> Result<()> {
        self.collapse_to(qubit, 0)
    }

    /// Projects `qubit` onto `|1⟩`, renormalizing.
    pub fn set(&mut self, qubit: N) -> Result<()> {
        self.collapse_to(qubit, 1)
    }

    fn collapse_to(&mut self, qubit: N, value: N) -> Result<()> {
        self.validate_qubit(qubit)?;
        let mut flat = self.bring_local_and_flatten(&[qubit])?;
        let phys = self.permutation.to_physical(qubit);
        let bit = 1usize << phys;
        let local_p: R = flat
            .iter()
            .enumerate()
            .filter(|&(idx, _)| (idx & bit != 0) as usize == value)
            .map(|(_, c)| c.norm_sqr())
            .sum();
        let p = self.transport.all_reduce_sum_real(local_p)?;
        self.project_bit(&mut flat, bit, value, p)?;
        self.unflatten(flat);
        Ok(())
    }

    fn project_bit(&self, flat: &mut [C], bit: usize, keep_value: N, probability: R) -> Result<()> {
        if probability <= R::EPSILON * (flat.len() as R) {
            return Err(Error::CollapseToZero);
        }
        let scale = 1.0 / probability.sqrt();
        for (idx, amp) in flat.iter_mut().enumerate() {
            if (idx & bit != 0) as usize == keep_value {
                *amp *= scale;
            } else {
                *amp = C_ZERO;
            }
        }
        Ok(())
    }

    /// Expectation value `⟨ψ|P|ψ⟩` of a Pauli-string observable: local
    /// contribution, then all-reduce.
    pub fn expectation_value(&mut self, observable: &[(N, Pauli)]) -> Result<R> {
        let qubits: Vec<N> = observable.iter().map(|&(q, _)| q).collect();
        self.validate_distinct(&qubits)?;
        let flat = self.bring_local_and_flatten(&qubits)?;
        let resolved: Vec<(N, Pauli)> =
            observable.iter().map(|&(q, p)| (self.permutation.to_physical(q), p)).collect();
        let local: C = flat
            .iter()
            .enumerate()
            .map(|(idx, amp)| amp.conj() * crate::kernel::eval_pauli_string(&flat, idx, &resolved))
            .sum();
        self.unflatten(flat);
        let total = self.transport.all_reduce_sum_complex(local)?;
        Ok(total.re)
    }

    /// One expectation value per observable, delivered only to `root` —
    /// every rank still computes and all-reduces each value, since
    /// [`Self::expectation_value`] is itself a collective operation every
    /// rank must participate in.
    pub fn expectation_value_vector(&mut self, observables: &[Vec<(N, Pauli)>], root: N) -> Result<Option<Vec<R>>> {
        let mut values = Vec::with_capacity(observables.len());
        for observable in observables {
            values.push(self.expectation_value(observable)?);
        }
        Ok(if self.transport.rank() == root { Some(values) } else { None })
    }

    /// `⟨ψ|φ⟩`: elementwise local contribution, all-reduce. Assumes `self`
    /// and `other` share the same distribution policy and an identical gate
    /// history (so their permutations and local shapes line up
    /// index-for-index) — the common case of comparing two runs of the same
    /// circuit.
    pub fn inner_product(&self, other: &Self) -> Result<C> {
        let a = self.flatten();
        let b = other.flatten();
        let local: C = a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum();
        self.transport.all_reduce_sum_complex(local)
    }

    /// `|⟨ψ|φ⟩|²`.
    pub fn fidelity(&self, other: &Self) -> Result<R> {
        Ok(self.inner_product(other)?.norm_sqr())
    }

    fn gather_logical(&self, local: &[C], root: N) -> Result<Option<Vec<C>>> {
        let gathered = self.transport.gather_complex(local, root)?;
        Ok(gathered.map(|flat| {
            let mut out = vec![C_ZERO; 1usize << self.num_qubits];
            let block = self.policy.data_block_size();
            for rank in 0..self.transport.size() {
                for offset in 0..block {
                    let physical = self.policy.rank_index_to_qubit_value(rank, 0, offset);
                    let logical = self.permutation.inverse_permutate_bits(physical);
                    out[logical] = flat[rank * block + offset];
                }
            }
            out
        }))
    }

    /// Gathers and reconstructs the full amplitude vector in logical basis
    /// order, at `root` only.
    pub fn dump_amplitudes(&self, root: N) -> Result<Option<Vec<C>>> {
        let local = self.flatten();
        self.gather_logical(&local, root)
    }

    /// Samples `num_events` basis-state indices from the current
    /// probability distribution without mutating the state. Every rank
    /// draws the same `num_events` reals off the shared RNG stream (even
    /// ranks that discard the result) so the injected RNG stays in
    /// lock-step for any gates applied afterward.
    pub fn generate_events(&mut self, num_events: N, root: N) -> Result<Option<Vec<N>>> {
        let local: Vec<C> = self.flatten().iter().map(|c| C::new(c.norm_sqr(), 0.0)).collect();
        let probabilities = self.gather_logical(&local, root)?;
        let draws: Vec<R> = (0..num_events).map(|_| self.rng.next_real()).collect();
        Ok(probabilities.map(|probs| draws.iter().map(|&r| sample_index(&probs, r)).collect()))
    }

    /// Overwrites the state with `Σ_x |x⟩|a^x mod d⟩ / √(2^|x|)`, `x`
    /// ranging over the basis values of `exponent_qubits`.
    pub fn shor_box(&mut self, divisor: N, base: N, exponent_qubits: &[N], mod_exp_qubits: &[N]) -> Result<()> {
        let mut all_qubits = exponent_qubits.to_vec();
        all_qubits.extend_from_slice(mod_exp_qubits);
        self.validate_distinct(&all_qubits)?;
        if divisor == 0 {
            return Err(Error::InvalidConfiguration("shor_box divisor must be nonzero".to_string()));
        }

        for page_value in 0..self.psi.num_pages() {
            self.psi.page_mut(page_value).fill(C_ZERO);
        }

        let x_count = exponent_qubits.len();
        let amplitude = C::new(1.0 / ((1usize << x_count) as R).sqrt(), 0.0);
        let rank = self.transport.rank();

        for x in 0..(1usize << x_count) {
            let y = mod_pow(base, x, divisor);
            let mut logical_index = 0usize;
            for (i, &q) in exponent_qubits.iter().enumerate() {
                if (x >> i) & 1 != 0 {
                    logical_index |= 1 << q;
                }
            }
            for (i, &q) in mod_exp_qubits.iter().enumerate() {
                if (y >> i) & 1 != 0 {
                    logical_index |= 1 << q;
                }
            }
            let physical_index = self.permutation.permutate_bits(logical_index);
            let (owner_rank, _, offset) = self.policy.locate(physical_index);
            if owner_rank == rank {
                self.psi.set(offset, amplitude);
            }
        }
        Ok(())
    }

    /// Little-endian `[page][amplitude]`, real-then-imaginary checkpoint
    /// layout for this rank's local amplitudes.
    pub fn write_checkpoint(&self, writer: &mut impl std::io::Write) -> Result<()> {
        for page in self.psi.pages() {
            for amp in page {
                writer.write_all(&amp.re.to_le_bytes()).map_err(|e| Error::IOFailure(e.to_string()))?;
                writer.write_all(&amp.im.to_le_bytes()).map_err(|e| Error::IOFailure(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub fn read_checkpoint(&mut self, reader: &mut impl std::io::Read) -> Result<()> {
        let mut flat = vec![C_ZERO; self.psi.total_len()];
        for amp in flat.iter_mut() {
            let mut re_bytes = [0u8; 8];
            let mut im_bytes = [0u8; 8];
            reader.read_exact(&mut re_bytes).map_err(|e| Error::IOFailure(e.to_string()))?;
            reader.read_exact(&mut im_bytes).map_err(|e| Error::IOFailure(e.to_string()))?;
            *amp = C::new(R::from_le_bytes(re_bytes), R::from_le_bytes(im_bytes));
        }
        self.unflatten(flat);
        Ok(())
    }
}

/// Modular exponentiation `base^exp mod modulus`, the kernel [`shor_box`]
/// needs and no crate in the example pack already provides.
fn mod_pow(base: N, exp: N, modulus: N) -> N {
    if modulus == 1 {
        return 0;
    }
    let mut result = 1usize;
    let mut base = base % modulus;
    let mut exp = exp;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base) % modulus;
        }
        exp >>= 1;
        base = (base * base) % modulus;
    }
    result
}

/// Inverse-CDF sample: the first basis index whose cumulative probability
/// exceeds `draw`.
fn sample_index(probabilities: &[R], draw: R) -> N {
    let mut acc = 0.0;
    for (idx, &p) in probabilities.iter().enumerate() {
        acc += p;
        if draw < acc {
            return idx;
        }
    }
    probabilities.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ThreadTransport;

    fn bell_pair() -> DistributedState {
        let mut state = DistributedState::single(2, 0, 1).unwrap();
        state.apply(Gate::H(0)).unwrap();
        state.apply(Gate::X(1).controlled(vec![0])).unwrap();
        state
    }

    #[test]
    fn bell_pair_amplitudes() {
        let state = bell_pair();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let expected = [C::new(s, 0.0), C_ZERO, C_ZERO, C::new(s, 0.0)];
        for (a, b) in amps.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn bell_pair_measurement_collapses_both_qubits() {
        let mut state = bell_pair();
        let outcome = state.measure(0).unwrap();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        let expected_index = if outcome == 0 { 0 } else { 3 };
        for (idx, amp) in amps.iter().enumerate() {
            if idx == expected_index {
                assert!((amp.norm() - 1.0).abs() < 1e-9);
            } else {
                assert!(amp.norm() < 1e-9);
            }
        }
    }

    #[test]
    fn ghz_inner_product_with_self_is_one() {
        let mut state = DistributedState::single(3, 0, 1).unwrap();
        state.apply(Gate::H(0)).unwrap();
        state.apply(Gate::X(1).controlled(vec![0])).unwrap();
        state.apply(Gate::X(2).controlled(vec![0])).unwrap();
        let fidelity = state.fidelity(&state).unwrap();
        assert!((fidelity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn phase_kickback_on_11() {
        let mut state = DistributedState::single(2, 0b11, 1).unwrap();
        state
            .apply(Gate::PhaseShift { qubit: 1, phase: std::f64::consts::PI }.controlled(vec![0]))
            .unwrap();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        assert!((amps[0b11] - C::new(-1.0, 0.0)).norm() < 1e-9);
        for (idx, amp) in amps.iter().enumerate() {
            if idx != 0b11 {
                assert!(amp.norm() < 1e-9);
            }
        }
    }

    #[test]
    fn clear_on_definite_zero_is_a_no_op() {
        let mut state = DistributedState::single(1, 0, 1).unwrap();
        state.clear(0).unwrap();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        assert!((amps[0] - C::new(1.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn set_on_definite_zero_fails_with_collapse_to_zero() {
        let mut state = DistributedState::single(1, 0, 1).unwrap();
        assert_eq!(state.set(0), Err(Error::CollapseToZero));
    }

    #[test]
    fn fusion_matches_unfused_sequence() {
        let mut fused = DistributedState::single(3, 0, 7).unwrap();
        let mut unfused = DistributedState::single(3, 0, 7).unwrap();
        let gates = [
            Gate::H(0),
            Gate::X(1).controlled(vec![0]),
            Gate::H(2),
            Gate::Swap(1, 2),
            Gate::Z(0),
        ];

        fused.begin_fusion();
        for gate in &gates {
            fused.apply(gate.clone()).unwrap();
        }
        fused.end_fusion().unwrap();

        for gate in &gates {
            unfused.apply(gate.clone()).unwrap();
        }

        let a = fused.dump_amplitudes(0).unwrap().unwrap();
        let b = unfused.dump_amplitudes(0).unwrap().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-9);
        }
    }

    #[test]
    fn expectation_value_of_z_on_plus_state_is_zero() {
        let mut state = DistributedState::single(1, 0, 1).unwrap();
        state.apply(Gate::H(0)).unwrap();
        let value = state.expectation_value(&[(0, Pauli::Z)]).unwrap();
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn expectation_value_of_x_on_plus_state_is_one() {
        let mut state = DistributedState::single(1, 0, 1).unwrap();
        state.apply(Gate::H(0)).unwrap();
        let value = state.expectation_value(&[(0, Pauli::X)]).unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn measurement_frequency_matches_uniform_distribution() {
        let mut state = DistributedState::single(3, 0, 99).unwrap();
        state.apply(Gate::H(0)).unwrap();
        state.apply(Gate::H(1)).unwrap();
        state.apply(Gate::H(2)).unwrap();

        let num_events = 10_000;
        let events = state.generate_events(num_events, 0).unwrap().unwrap();
        let mut counts = [0usize; 8];
        for e in events {
            counts[e] += 1;
        }
        let expected = num_events as f64 / 8.0;
        let sigma = (expected * (1.0 - 1.0 / 8.0)).sqrt();
        for count in counts {
            assert!((count as f64 - expected).abs() < 4.0 * sigma);
        }
    }

    #[test]
    fn shor_box_encodes_modular_exponentiation() {
        // a=2, d=5: period 4 (2^0..2^3 mod 5 = 1,2,4,3), exponent register 2
        // qubits (x in 0..4), mod-exp register 3 qubits (fits values up to 4).
        let mut state = DistributedState::single(5, 0, 11).unwrap();
        state.shor_box(5, 2, &[0, 1], &[2, 3, 4]).unwrap();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        let norm: f64 = amps.iter().map(C::norm_sqr).sum();
        assert!((norm - 1.0).abs() < 1e-9);

        let expect_nonzero = |x: usize, y: usize| {
            let idx = x | (y << 2);
            assert!(amps[idx].norm() > 0.4, "expected amplitude at x={x} y={y}");
        };
        expect_nonzero(0, 1);
        expect_nonzero(1, 2);
        expect_nonzero(2, 4);
        expect_nonzero(3, 3);
    }

    #[test]
    fn duplicate_qubit_in_one_operation_is_rejected() {
        let mut state = DistributedState::single(2, 0, 1).unwrap();
        let err = state.apply(Gate::X(0).controlled(vec![0])).unwrap_err();
        assert_eq!(err, Error::InvalidQubit { qubit: 0, num_qubits: 2 });
    }

    #[test]
    fn out_of_range_qubit_is_rejected() {
        let mut state = DistributedState::single(2, 0, 1).unwrap();
        let err = state.apply(Gate::X(5)).unwrap_err();
        assert_eq!(err, Error::InvalidQubit { qubit: 5, num_qubits: 2 });
    }

    #[test]
    fn paged_state_matches_unpaged_reference() {
        let gates = [
            Gate::H(0),
            Gate::H(1),
            Gate::X(2).controlled(vec![0]),
            Gate::Swap(1, 3),
            Gate::H(2),
        ];

        let mut paged =
            DistributedState::new(ClusterConfig::new(4).with_page_qubits(2), 0, Box::new(SingleRankTransport), Box::new(SeededRng::new(3)))
                .unwrap();
        let mut unpaged = DistributedState::single(4, 0, 3).unwrap();
        for gate in &gates {
            paged.apply(gate.clone()).unwrap();
            unpaged.apply(gate.clone()).unwrap();
        }

        let a = paged.dump_amplitudes(0).unwrap().unwrap();
        let b = unpaged.dump_amplitudes(0).unwrap().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-9);
        }
    }

    #[test]
    fn swap_between_two_page_qubits_uses_swap_pages_fast_path() {
        let mut state =
            DistributedState::new(ClusterConfig::new(4).with_page_qubits(2), 0b0100, Box::new(SingleRankTransport), Box::new(SeededRng::new(3)))
                .unwrap();
        state.apply(Gate::Swap(2, 3)).unwrap();
        let amps = state.dump_amplitudes(0).unwrap().unwrap();
        for (idx, amp) in amps.iter().enumerate() {
            if idx == 0b1000 {
                assert!((amp.norm() - 1.0).abs() < 1e-9);
            } else {
                assert!(amp.norm() < 1e-9);
            }
        }
    }

    /// Delegates to a [`ThreadTransport`] while counting `exchange` calls —
    /// lets a test assert exactly how many inter-process swaps a gate
    /// triggers.
    struct CountingTransport {
        inner: ThreadTransport,
        exchanges: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Transport for CountingTransport {
        fn rank(&self) -> usize {
            self.inner.rank()
        }
        fn size(&self) -> usize {
            self.inner.size()
        }
        fn exchange(&self, partner_rank: usize, send: &[C], recv: &mut [C]) -> Result<()> {
            self.exchanges.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.exchange(partner_rank, send, recv)
        }
        fn all_reduce_sum_real(&self, value: R) -> Result<R> {
            self.inner.all_reduce_sum_real(value)
        }
        fn all_reduce_sum_complex(&self, value: C) -> Result<C> {
            self.inner.all_reduce_sum_complex(value)
        }
        fn reduce_sum_real(&self, value: R, root: N) -> Result<Option<R>> {
            self.inner.reduce_sum_real(value, root)
        }
        fn broadcast_real(&self, value: R, root: N) -> Result<R> {
            self.inner.broadcast_real(value, root)
        }
        fn gather_complex(&self, local: &[C], root: N) -> Result<Option<Vec<C>>> {
            self.inner.gather_complex(local, root)
        }
        fn gather_usize(&self, local: usize, root: N) -> Result<Option<Vec<usize>>> {
            self.inner.gather_usize(local, root)
        }
        fn barrier(&self) -> Result<()> {
            self.inner.barrier()
        }
    }

    /// Four ranks, `N=6` with two page qubits and a `Simple` distribution:
    /// an X on the highest logical qubit is Global-class and must round-trip
    /// through exactly one pairwise exchange per rank, landing on the same
    /// result a single-rank simulation of the same gate produces.
    #[test]
    fn distributed_x_on_highest_qubit_matches_single_rank_reference() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let num_ranks = 4;
        let transports = ThreadTransport::cluster(num_ranks);
        let counters: Vec<Arc<AtomicUsize>> = (0..num_ranks).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        let handles: Vec<_> = transports
            .into_iter()
            .zip(counters.iter().cloned())
            .map(|(inner, exchanges)| {
                thread::spawn(move || {
                    let rank = inner.rank();
                    let transport = CountingTransport { inner, exchanges };
                    let config = ClusterConfig::new(6)
                        .with_page_qubits(2)
                        .with_distribution(Distribution::Simple { num_global_qubits: 2 });
                    let mut state =
                        DistributedState::new(config, 0, Box::new(transport), Box::new(SeededRng::new(1))).unwrap();
                    state.apply(Gate::X(5)).unwrap();
                    (rank, state.dump_amplitudes(0).unwrap())
                })
            })
            .collect();

        let results: Vec<(usize, Option<Vec<C>>)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for count in &counters {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }

        let distributed = results.into_iter().find(|(rank, _)| *rank == 0).unwrap().1.unwrap();

        let mut reference = DistributedState::single(6, 0, 1).unwrap();
        reference.apply(Gate::X(5)).unwrap();
        let expected = reference.dump_amplitudes(0).unwrap().unwrap();

        for (a, b) in distributed.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }
}
