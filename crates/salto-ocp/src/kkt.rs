use nalgebra::{DMatrix, DVector};

use salto_cost::NodeLayout;

/// Linear-quadratic model of one node, produced by the parallel
/// linearization pass.
///
/// Dynamics: `δx⁺ = a δx + b δw + defect` with `δx = (δq, δv)` and
/// `w = (u, f)`; `hess`/`grad` hold the Gauss-Newton cost quadratic plus
/// the condensed constraint barrier over the full node vector
/// `z = (δx, δw)`. The terminal node has an empty `w` block and no
/// dynamics rows.
#[derive(Clone, Debug)]
pub struct StageData {
    pub layout: NodeLayout,
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub defect: DVector<f64>,
    pub hess: DMatrix<f64>,
    pub grad: DVector<f64>,
    /// Cost plus barrier value at the current iterate.
    pub cost: f64,
    /// Unscaled running-cost rate `ℓ` (stage nodes only).
    pub cost_rate: f64,
    /// State derivative `(v, v̇)` at the current iterate (stage nodes only).
    pub xdot: DVector<f64>,
    /// Squared inequality-constraint violation at the current iterate.
    pub violation: f64,
}

impl StageData {
    /// Zeroed container for a node with the given layout.
    #[must_use]
    pub fn zeros(layout: NodeLayout) -> Self {
        let nx = layout.nx();
        let nw = layout.nw();
        let nz = layout.nz();
        Self {
            layout,
            a: DMatrix::zeros(nx, nx),
            b: DMatrix::zeros(nx, nw),
            defect: DVector::zeros(nx),
            hess: DMatrix::zeros(nz, nz),
            grad: DVector::zeros(nz),
            cost: 0.0,
            cost_rate: 0.0,
            xdot: DVector::zeros(nx),
            violation: 0.0,
        }
    }
}

/// Squared KKT residual accumulators; [`total`](KktError::total) is the
/// scalar the convergence check compares against the tolerance.
#[derive(Clone, Copy, Debug, Default)]
pub struct KktError {
    /// Stationarity of the trajectory variables.
    pub stationarity: f64,
    /// Multiple-shooting dynamics defects.
    pub dynamics: f64,
    /// Inequality-constraint primal violation.
    pub constraints: f64,
    /// Switching-time stationarity (zero when STO is disabled).
    pub sto: f64,
}

impl KktError {
    /// Root of the summed squared residuals.
    #[must_use]
    pub fn total(&self) -> f64 {
        (self.stationarity + self.dynamics + self.constraints + self.sto).sqrt()
    }
}
