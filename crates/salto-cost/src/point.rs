use nalgebra::{DVector, Vector3};

use salto_contact::ContactStatus;

// ---------------------------------------------------------------------------
// NodeLayout
// ---------------------------------------------------------------------------

/// Variable-block layout of one discretization node.
///
/// The node decision vector is `z = (δq, δv, δu, δf)`: state tangent first,
/// then the control-like block `w = (u, f)`. Terminal nodes have an empty
/// `w`; impulse nodes carry the contact impulses in the `f` slot and no
/// torques.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    pub dimv: usize,
    pub dimu: usize,
    pub dimf: usize,
}

impl NodeLayout {
    /// Layout of a regular stage node.
    #[must_use]
    pub const fn stage(dimv: usize, dimu: usize, dimf: usize) -> Self {
        Self { dimv, dimu, dimf }
    }

    /// Layout of an impulse node: impulses only, no torques.
    #[must_use]
    pub const fn impulse(dimv: usize, dimi: usize) -> Self {
        Self {
            dimv,
            dimu: 0,
            dimf: dimi,
        }
    }

    /// Layout of the terminal node: state only.
    #[must_use]
    pub const fn terminal(dimv: usize) -> Self {
        Self {
            dimv,
            dimu: 0,
            dimf: 0,
        }
    }

    /// State-tangent dimension `2 * dimv`.
    #[must_use]
    pub const fn nx(&self) -> usize {
        2 * self.dimv
    }

    /// Control-block dimension `dimu + dimf`.
    #[must_use]
    pub const fn nw(&self) -> usize {
        self.dimu + self.dimf
    }

    /// Full node dimension `nx + nw`.
    #[must_use]
    pub const fn nz(&self) -> usize {
        self.nx() + self.nw()
    }

    /// Offset of the configuration-tangent block.
    #[must_use]
    pub const fn offset_q(&self) -> usize {
        0
    }

    /// Offset of the velocity block.
    #[must_use]
    pub const fn offset_v(&self) -> usize {
        self.dimv
    }

    /// Offset of the torque block.
    #[must_use]
    pub const fn offset_u(&self) -> usize {
        2 * self.dimv
    }

    /// Offset of the force/impulse block.
    #[must_use]
    pub const fn offset_f(&self) -> usize {
        2 * self.dimv + self.dimu
    }
}

// ---------------------------------------------------------------------------
// EvalPoint
// ---------------------------------------------------------------------------

/// A trajectory point handed to cost and constraint terms.
///
/// `dt` is the integration weight of the node: the phase interval for stage
/// nodes, zero for impulse and terminal nodes. `f` holds the forces (or
/// impulses) of the *active* contacts of `status`, in frame order.
#[derive(Clone, Copy, Debug)]
pub struct EvalPoint<'a> {
    pub t: f64,
    pub dt: f64,
    pub q: &'a DVector<f64>,
    pub v: &'a DVector<f64>,
    pub u: &'a DVector<f64>,
    pub f: &'a [Vector3<f64>],
    pub status: &'a ContactStatus,
    pub layout: NodeLayout,
}

impl EvalPoint<'_> {
    /// Index of `f[slot]`'s x component inside the node vector.
    #[must_use]
    pub const fn force_offset(&self, slot: usize) -> usize {
        self.layout.offset_f() + 3 * slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_layout_offsets() {
        let layout = NodeLayout::stage(18, 12, 12);
        assert_eq!(layout.nx(), 36);
        assert_eq!(layout.nw(), 24);
        assert_eq!(layout.nz(), 60);
        assert_eq!(layout.offset_q(), 0);
        assert_eq!(layout.offset_v(), 18);
        assert_eq!(layout.offset_u(), 36);
        assert_eq!(layout.offset_f(), 48);
    }

    #[test]
    fn impulse_layout_has_no_torques() {
        let layout = NodeLayout::impulse(18, 6);
        assert_eq!(layout.dimu, 0);
        assert_eq!(layout.nw(), 6);
        assert_eq!(layout.offset_f(), 36);
    }

    #[test]
    fn terminal_layout_is_state_only() {
        let layout = NodeLayout::terminal(18);
        assert_eq!(layout.nw(), 0);
        assert_eq!(layout.nz(), 36);
    }
}
