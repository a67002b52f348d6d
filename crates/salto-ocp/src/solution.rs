use nalgebra::{DVector, Vector3};

use crate::discretization::{NodeKind, TimeDiscretization};
use salto_contact::ContactSequence;

/// Per-node primal trajectory plus the switching times.
///
/// Owned by the solver and exposed to callers as a read view; overwritten
/// in place by every accepted step. Node alignment follows the
/// discretization: `u` is empty at impulse and terminal nodes, and the `f`
/// slot of an impulse node holds the contact impulses.
#[derive(Clone, Debug, Default)]
pub struct Solution {
    q: Vec<DVector<f64>>,
    v: Vec<DVector<f64>>,
    u: Vec<DVector<f64>>,
    f: Vec<Vec<Vector3<f64>>>,
    ts: Vec<f64>,
}

impl Solution {
    /// Zero solution shaped for the given mesh and sequence.
    #[must_use]
    pub fn zeros(
        disc: &TimeDiscretization,
        sequence: &ContactSequence,
        dimq: usize,
        dimv: usize,
        dimu: usize,
    ) -> Self {
        let mut solution = Self::default();
        for node in disc.nodes() {
            let (dim_u, active) = match node.kind {
                NodeKind::Stage => (
                    dimu,
                    sequence
                        .contact_status(node.phase)
                        .map_or(0, salto_contact::ContactStatus::num_active),
                ),
                NodeKind::Impulse => (
                    0,
                    node.event.map_or(0, |e| {
                        sequence
                            .impulse_status(e)
                            .map_or(0, |imp| imp.as_contact_status().num_active())
                    }),
                ),
                NodeKind::Terminal => (0, 0),
            };
            solution.q.push(DVector::zeros(dimq));
            solution.v.push(DVector::zeros(dimv));
            solution.u.push(DVector::zeros(dim_u));
            solution.f.push(vec![Vector3::zeros(); active]);
        }
        solution.ts = sequence.event_times().to_vec();
        solution
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.q.len()
    }

    /// Configuration at node `k`.
    #[must_use]
    pub fn q(&self, k: usize) -> &DVector<f64> {
        &self.q[k]
    }

    /// Velocity at node `k`.
    #[must_use]
    pub fn v(&self, k: usize) -> &DVector<f64> {
        &self.v[k]
    }

    /// Control at node `k` (empty at impulse/terminal nodes).
    #[must_use]
    pub fn u(&self, k: usize) -> &DVector<f64> {
        &self.u[k]
    }

    /// Active contact forces (or impulses) at node `k`.
    #[must_use]
    pub fn f(&self, k: usize) -> &[Vector3<f64>] {
        &self.f[k]
    }

    /// All per-node configurations, in node order (bulk accessor for
    /// logging and plotting consumers).
    #[must_use]
    pub fn qs(&self) -> &[DVector<f64>] {
        &self.q
    }

    /// All per-node velocities, in node order.
    #[must_use]
    pub fn vs(&self) -> &[DVector<f64>] {
        &self.v
    }

    /// All per-node forces, in node order.
    #[must_use]
    pub fn fs(&self) -> &[Vec<Vector3<f64>>] {
        &self.f
    }

    /// Optimized switching times.
    #[must_use]
    pub fn switching_times(&self) -> &[f64] {
        &self.ts
    }

    pub(crate) fn q_mut(&mut self, k: usize) -> &mut DVector<f64> {
        &mut self.q[k]
    }

    pub(crate) fn v_mut(&mut self, k: usize) -> &mut DVector<f64> {
        &mut self.v[k]
    }

    pub(crate) fn u_mut(&mut self, k: usize) -> &mut DVector<f64> {
        &mut self.u[k]
    }

    pub(crate) fn f_mut(&mut self, k: usize) -> &mut Vec<Vector3<f64>> {
        &mut self.f[k]
    }

    pub(crate) fn set_switching_times(&mut self, ts: &[f64]) {
        self.ts = ts.to_vec();
    }

    /// Fill every node's configuration.
    pub fn set_q(&mut self, q: &DVector<f64>) {
        for node_q in &mut self.q {
            node_q.copy_from(q);
        }
    }

    /// Fill every node's velocity.
    pub fn set_v(&mut self, v: &DVector<f64>) {
        for node_v in &mut self.v {
            node_v.copy_from(v);
        }
    }

    /// Fill every active force and impulse slot with the same 3D force.
    ///
    /// A strictly cone-interior seed (positive normal component) keeps the
    /// interior-point initialization feasible at impulse nodes too.
    pub fn set_f(&mut self, f: &Vector3<f64>) {
        for node_f in &mut self.f {
            for slot in node_f.iter_mut() {
                *slot = *f;
            }
        }
    }

    /// Remap onto a new mesh by nearest-time lookup, preserving shapes for
    /// the new nodes' layouts.
    #[must_use]
    pub fn remapped(
        &self,
        old_times: &[f64],
        new_disc: &TimeDiscretization,
        sequence: &ContactSequence,
        dimq: usize,
        dimv: usize,
        dimu: usize,
    ) -> Self {
        let mut remapped = Self::zeros(new_disc, sequence, dimq, dimv, dimu);
        for (k, node) in new_disc.nodes().iter().enumerate() {
            let nearest = nearest_index(old_times, node.t);
            remapped.q[k].copy_from(&self.q[nearest]);
            remapped.v[k].copy_from(&self.v[nearest]);
            let n_u = remapped.u[k].len();
            if n_u > 0 && self.u[nearest].len() == n_u {
                remapped.u[k].copy_from(&self.u[nearest]);
            }
            let n_f = remapped.f[k].len();
            if n_f > 0 {
                let src = &self.f[nearest];
                for (slot, value) in remapped.f[k].iter_mut().enumerate() {
                    if let Some(v) = src.get(slot.min(src.len().saturating_sub(1))) {
                        *value = *v;
                    }
                }
            }
        }
        remapped.ts = sequence.event_times().to_vec();
        remapped
    }
}

fn nearest_index(times: &[f64], t: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &ti) in times.iter().enumerate() {
        let d = (ti - t).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use salto_contact::ContactStatus;

    fn jump_sequence() -> ContactSequence {
        let mut standing = ContactStatus::new(4);
        standing.activate_contacts(&[0, 1, 2, 3]);
        let mut seq = ContactSequence::new(2);
        seq.init(&standing);
        seq.push_back(&ContactStatus::new(4), 0.7, true).unwrap();
        seq.push_back(&standing, 0.95, true).unwrap();
        seq
    }

    #[test]
    fn shapes_follow_mesh() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let sol = Solution::zeros(&disc, &seq, 18, 18, 12);
        assert_eq!(sol.num_nodes(), disc.num_nodes());

        for (k, node) in disc.nodes().iter().enumerate() {
            match node.kind {
                NodeKind::Stage => {
                    assert_eq!(sol.u(k).len(), 12);
                    let expected = if node.phase == 1 { 0 } else { 4 };
                    assert_eq!(sol.f(k).len(), expected);
                }
                NodeKind::Impulse => {
                    assert_eq!(sol.u(k).len(), 0);
                    assert_eq!(sol.f(k).len(), 4);
                }
                NodeKind::Terminal => {
                    assert_eq!(sol.u(k).len(), 0);
                    assert_eq!(sol.f(k).len(), 0);
                }
            }
        }
        assert_eq!(sol.switching_times(), &[0.7, 0.95]);
    }

    #[test]
    fn bulk_setters_fill_all_nodes() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let mut sol = Solution::zeros(&disc, &seq, 18, 18, 12);

        let mut q = DVector::zeros(18);
        q[2] = 0.3181;
        sol.set_q(&q);
        sol.set_f(&Vector3::new(0.0, 0.0, 30.5));

        assert_relative_eq!(sol.q(10)[2], 0.3181, epsilon = 1e-12);
        let impulse_node = disc
            .nodes()
            .iter()
            .position(|n| n.kind == NodeKind::Impulse)
            .unwrap();
        assert_relative_eq!(sol.f(impulse_node)[0].z, 30.5, epsilon = 1e-12);
    }

    #[test]
    fn remap_preserves_nearby_values() {
        let mut seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let mut sol = Solution::zeros(&disc, &seq, 18, 18, 12);
        let mut q = DVector::zeros(18);
        q[0] = 0.25;
        sol.set_q(&q);

        let old_times: Vec<f64> = disc.nodes().iter().map(|n| n.t).collect();
        seq.set_event_times(&[0.6, 1.0]).unwrap();
        let mut new_disc = disc.clone();
        new_disc.refine(0.0, &seq);
        let remapped = sol.remapped(&old_times, &new_disc, &seq, 18, 18, 12);

        assert_eq!(remapped.num_nodes(), new_disc.num_nodes());
        assert_relative_eq!(remapped.q(0)[0], 0.25, epsilon = 1e-12);
        assert_eq!(remapped.switching_times(), &[0.6, 1.0]);
    }
}
