use salto_contact::ContactSequence;

// ---------------------------------------------------------------------------
// TimeNode
// ---------------------------------------------------------------------------

/// Role of a discretization node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular stage node with a positive interval.
    Stage,
    /// Zero-duration impact stage at a touchdown boundary.
    Impulse,
    /// Final node of the horizon.
    Terminal,
}

/// One node of the time mesh.
#[derive(Clone, Copy, Debug)]
pub struct TimeNode {
    /// Node time.
    pub t: f64,
    /// Interval to the next node (zero for impulse and terminal nodes).
    pub dt: f64,
    /// Contact-sequence phase the node belongs to (for impulse nodes: the
    /// phase *entered* by the event).
    pub phase: usize,
    /// Node role.
    pub kind: NodeKind,
    /// For impulse nodes, the sequence event index.
    pub event: Option<usize>,
}

// ---------------------------------------------------------------------------
// TimeDiscretization
// ---------------------------------------------------------------------------

/// Window segment: a contiguous span of one contact phase inside the
/// horizon, carrying its allocated stage-node count.
#[derive(Clone, Copy, Debug)]
struct Segment {
    start: f64,
    end: f64,
    phase: usize,
    /// Sequence event index at the segment entry, if the segment starts at
    /// a discrete event inside the window.
    entry_event: Option<usize>,
    nodes: usize,
}

/// Phase-based time mesh over the horizon `[t0, t0 + T]`.
///
/// Stage-node counts are allocated per phase segment when the mesh is
/// built or refined; as the switching times move, [`update_times`]
/// re-spaces the nodes inside the new boundaries *without* re-allocating,
/// so the per-phase counts only change on an explicit
/// [`refine`](TimeDiscretization::refine). Touchdown boundaries get a
/// zero-duration impulse node.
///
/// [`update_times`]: TimeDiscretization::update_times
#[derive(Clone, Debug)]
pub struct TimeDiscretization {
    t0: f64,
    horizon: f64,
    n_ideal: usize,
    max_dt_mesh: f64,
    segments: Vec<Segment>,
    nodes: Vec<TimeNode>,
    generation: u64,
}

impl TimeDiscretization {
    /// Build a fresh mesh for the window `[t0, t0 + horizon]`.
    #[must_use]
    pub fn new(
        t0: f64,
        horizon: f64,
        n_ideal: usize,
        max_dt_mesh: f64,
        sequence: &ContactSequence,
    ) -> Self {
        let mut disc = Self {
            t0,
            horizon,
            n_ideal,
            max_dt_mesh,
            segments: Vec::new(),
            nodes: Vec::new(),
            generation: 0,
        };
        disc.refine(t0, sequence);
        disc
    }

    /// Ideal node interval `T / N`.
    #[must_use]
    pub fn ideal_dt(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.n_ideal as f64;
        self.horizon / n
    }

    /// Spacing target: the ideal interval, tightened by `max_dt_mesh`.
    #[must_use]
    pub fn effective_max_dt(&self) -> f64 {
        let ideal = self.ideal_dt();
        if self.max_dt_mesh > 0.0 {
            ideal.min(self.max_dt_mesh)
        } else {
            ideal
        }
    }

    /// Re-allocate node counts from the current sequence timing.
    ///
    /// Deterministic in its inputs: refining twice with unchanged switch
    /// times yields an identical mesh.
    pub fn refine(&mut self, t0: f64, sequence: &ContactSequence) {
        self.t0 = t0;
        let tf = t0 + self.horizon;
        let eff_dt = self.effective_max_dt();

        // Phase boundaries strictly inside the window.
        let mut boundaries: Vec<(f64, usize)> = Vec::new();
        for e in 0..sequence.num_events() {
            let te = sequence.event_times()[e];
            if te > t0 && te < tf {
                boundaries.push((te, e));
            }
        }

        self.segments.clear();
        let mut start = t0;
        for &(te, _) in &boundaries {
            let phase = sequence.phase_at(0.5 * (start + te));
            self.segments.push(Segment {
                start,
                end: te,
                phase,
                entry_event: None,
                nodes: 0,
            });
            start = te;
        }
        let last_phase = sequence.phase_at(0.5 * (start + tf));
        self.segments.push(Segment {
            start,
            end: tf,
            phase: last_phase,
            entry_event: None,
            nodes: 0,
        });

        // Wire entry events and allocate node counts.
        for (i, &(_, event)) in boundaries.iter().enumerate() {
            self.segments[i + 1].entry_event = Some(event);
        }
        for seg in &mut self.segments {
            let dur = (seg.end - seg.start).max(0.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = ((dur / eff_dt) - 1e-9).ceil().max(1.0) as usize;
            seg.nodes = n;
        }

        self.generation += 1;
        self.rebuild_nodes(sequence);
    }

    /// Re-space nodes after switch times moved, keeping node counts.
    ///
    /// Falls back to a full [`refine`](Self::refine) when the set of events
    /// inside the window changed.
    pub fn update_times(&mut self, t0: f64, sequence: &ContactSequence) {
        let tf = t0 + self.horizon;
        let in_window: Vec<usize> = (0..sequence.num_events())
            .filter(|&e| {
                let te = sequence.event_times()[e];
                te > t0 && te < tf
            })
            .collect();
        let known: Vec<usize> = self
            .segments
            .iter()
            .filter_map(|s| s.entry_event)
            .collect();
        if in_window != known {
            self.refine(t0, sequence);
            return;
        }

        self.t0 = t0;
        self.segments[0].start = t0;
        // End of segment i is the entry boundary of segment i + 1.
        for i in 0..self.segments.len() {
            let end = if i + 1 < self.segments.len() {
                let event = self.segments[i + 1]
                    .entry_event
                    .expect("interior segment entry must be an event");
                sequence.event_times()[event]
            } else {
                tf
            };
            self.segments[i].end = end;
            if i + 1 < self.segments.len() {
                self.segments[i + 1].start = end;
            }
        }

        self.generation += 1;
        self.rebuild_nodes(sequence);
    }

    fn rebuild_nodes(&mut self, sequence: &ContactSequence) {
        self.nodes.clear();
        for seg in &self.segments {
            if let Some(event) = seg.entry_event
                && sequence
                    .event(event)
                    .is_ok_and(salto_contact::DiscreteEvent::is_impulse)
            {
                self.nodes.push(TimeNode {
                    t: seg.start,
                    dt: 0.0,
                    phase: seg.phase,
                    kind: NodeKind::Impulse,
                    event: Some(event),
                });
            }
            #[allow(clippy::cast_precision_loss)]
            let dt = (seg.end - seg.start) / seg.nodes as f64;
            for k in 0..seg.nodes {
                #[allow(clippy::cast_precision_loss)]
                let t = seg.start + k as f64 * dt;
                self.nodes.push(TimeNode {
                    t,
                    dt,
                    phase: seg.phase,
                    kind: NodeKind::Stage,
                    event: None,
                });
            }
        }
        let last_phase = self.segments.last().map_or(0, |s| s.phase);
        self.nodes.push(TimeNode {
            t: self.t0 + self.horizon,
            dt: 0.0,
            phase: last_phase,
            kind: NodeKind::Terminal,
            event: None,
        });
    }

    // -- Queries ----------------------------------------------------------

    /// Window start.
    #[must_use]
    pub const fn t0(&self) -> f64 {
        self.t0
    }

    /// Horizon length.
    #[must_use]
    pub const fn horizon(&self) -> f64 {
        self.horizon
    }

    /// All nodes in time order (impulse nodes precede the first stage node
    /// of their phase; the last node is terminal).
    #[must_use]
    pub fn nodes(&self) -> &[TimeNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Largest stage interval in the mesh.
    #[must_use]
    pub fn max_dt(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Stage)
            .map(|n| n.dt)
            .fold(0.0, f64::max)
    }

    /// Mesh generation, bumped by every rebuild.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Stage-node count of the sequence phase, restricted to the window.
    #[must_use]
    pub fn phase_node_count(&self, phase: usize) -> usize {
        self.segments
            .iter()
            .filter(|s| s.phase == phase)
            .map(|s| s.nodes)
            .sum()
    }

    /// Node times and intervals the mesh would have under trial switch
    /// times, keeping the current node allocation. Used by the line search
    /// to evaluate trial points without mutating the mesh.
    #[must_use]
    pub fn retimed(&self, sequence: &ContactSequence, trial_ts: &[f64]) -> Self {
        let mut trial = self.clone();
        let tf = trial.t0 + trial.horizon;
        let mut start = trial.t0;
        for i in 0..trial.segments.len() {
            let end = if i + 1 < trial.segments.len() {
                let event = trial.segments[i + 1]
                    .entry_event
                    .expect("interior segment entry must be an event");
                trial_ts[event]
            } else {
                tf
            };
            trial.segments[i].start = start;
            trial.segments[i].end = end;
            start = end;
        }
        trial.rebuild_nodes(sequence);
        trial
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use salto_contact::ContactStatus;

    fn jump_sequence() -> ContactSequence {
        let mut standing = ContactStatus::new(4);
        standing.activate_contacts(&[0, 1, 2, 3]);
        for i in 0..4 {
            standing.set_contact_point(i, Vector3::new(0.2, 0.1, 0.0));
        }
        let mut seq = ContactSequence::new(2);
        seq.init(&standing);
        seq.push_back(&ContactStatus::new(4), 0.7, true).unwrap();
        seq.push_back(&standing, 0.95, true).unwrap();
        seq
    }

    #[test]
    fn node_structure_for_jump() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);

        let nodes = disc.nodes();
        // One impulse node (touchdown), no node for the lift boundary.
        let impulses: Vec<&TimeNode> =
            nodes.iter().filter(|n| n.kind == NodeKind::Impulse).collect();
        assert_eq!(impulses.len(), 1);
        assert_relative_eq!(impulses[0].t, 0.95, epsilon = 1e-12);
        assert_eq!(impulses[0].event, Some(1));
        assert_eq!(impulses[0].phase, 2);

        // Terminal node closes the window.
        let last = nodes.last().unwrap();
        assert_eq!(last.kind, NodeKind::Terminal);
        assert_relative_eq!(last.t, 1.7, epsilon = 1e-12);

        // Node times are non-decreasing and spacing respects the ideal dt.
        for w in nodes.windows(2) {
            assert!(w[1].t >= w[0].t - 1e-12);
        }
        assert!(disc.max_dt() <= disc.ideal_dt() + 1e-9);
    }

    #[test]
    fn phase_node_counts_scale_with_duration() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        // Ground 0.7 s / flying 0.25 s / landing 0.75 s at dt = 0.02.
        assert_eq!(disc.phase_node_count(0), 35);
        assert_eq!(disc.phase_node_count(1), 13);
        assert_eq!(disc.phase_node_count(2), 38);
    }

    #[test]
    fn refinement_is_idempotent() {
        let seq = jump_sequence();
        let mut disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let times_before: Vec<(f64, f64)> = disc.nodes().iter().map(|n| (n.t, n.dt)).collect();
        let count_before = disc.num_nodes();

        disc.refine(0.0, &seq);
        disc.refine(0.0, &seq);

        assert_eq!(disc.num_nodes(), count_before);
        for (node, (t, dt)) in disc.nodes().iter().zip(&times_before) {
            assert_relative_eq!(node.t, *t, epsilon = 1e-12);
            assert_relative_eq!(node.dt, *dt, epsilon = 1e-12);
        }
    }

    #[test]
    fn update_times_keeps_counts_and_moves_boundaries() {
        let mut seq = jump_sequence();
        let mut disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let flying_nodes = disc.phase_node_count(1);

        // Stretch the flying phase: counts stay, spacing grows.
        seq.set_event_times(&[0.6, 1.05]).unwrap();
        disc.update_times(0.0, &seq);
        assert_eq!(disc.phase_node_count(1), flying_nodes);
        let expected_dt = (1.05 - 0.6) / flying_nodes as f64;
        let flying_dt = disc
            .nodes()
            .iter()
            .find(|n| n.phase == 1 && n.kind == NodeKind::Stage)
            .unwrap()
            .dt;
        assert_relative_eq!(flying_dt, expected_dt, epsilon = 1e-12);
        // Spacing now exceeds the ideal dt; a refine restores it.
        assert!(disc.max_dt() > disc.ideal_dt() + 1e-9);
        disc.refine(0.0, &seq);
        assert!(disc.max_dt() <= disc.ideal_dt() + 1e-9);
    }

    #[test]
    fn update_times_rebuilds_when_events_leave_window() {
        let mut seq = jump_sequence();
        let mut disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        assert_eq!(
            disc.nodes()
                .iter()
                .filter(|n| n.kind == NodeKind::Impulse)
                .count(),
            1
        );

        // Shift the window past both events: the mesh degenerates to a
        // single phase with no impulse node.
        seq.pop_front();
        seq.pop_front();
        disc.update_times(1.0, &seq);
        assert_eq!(
            disc.nodes()
                .iter()
                .filter(|n| n.kind == NodeKind::Impulse)
                .count(),
            0
        );
        assert_relative_eq!(disc.nodes()[0].t, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn max_dt_mesh_caps_spacing() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 17, 0.01, &seq);
        // Ideal dt would be 0.1; the cap forces 0.01.
        assert!(disc.max_dt() <= 0.01 + 1e-9);
    }

    #[test]
    fn retimed_mesh_leaves_original_untouched() {
        let seq = jump_sequence();
        let disc = TimeDiscretization::new(0.0, 1.7, 85, 0.0, &seq);
        let trial = disc.retimed(&seq, &[0.75, 1.0]);
        assert_eq!(trial.num_nodes(), disc.num_nodes());
        let impulse = trial
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Impulse)
            .unwrap();
        assert_relative_eq!(impulse.t, 1.0, epsilon = 1e-12);
        // Original boundary unchanged.
        let orig = disc
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Impulse)
            .unwrap();
        assert_relative_eq!(orig.t, 0.95, epsilon = 1e-12);
    }
}
