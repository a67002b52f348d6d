use std::fmt;

use nalgebra::Vector3;

use salto_core::SequenceError;

use crate::event::{DiscreteEvent, DiscreteEventKind};
use crate::status::{ContactStatus, ImpulseStatus};

/// Ordered timeline of contact phases and the discrete events between them.
///
/// Built once per planning problem and consumed read-only by the solver;
/// the MPC layer shifts it forward between re-solves with
/// [`pop_front`](ContactSequence::pop_front) /
/// [`push_back`](ContactSequence::push_back).
///
/// Invariants: switch times are strictly increasing and the number of
/// events never exceeds the configured capacity. Every structural mutation
/// bumps a generation counter so a discretization mesh cached downstream
/// knows to rebuild.
#[derive(Clone, Debug)]
pub struct ContactSequence {
    max_events: usize,
    statuses: Vec<ContactStatus>,
    events: Vec<DiscreteEvent>,
    event_times: Vec<f64>,
    sto: Vec<bool>,
    generation: u64,
}

impl ContactSequence {
    /// Empty sequence accepting at most `max_events` discrete events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            statuses: Vec::new(),
            events: Vec::new(),
            event_times: Vec::new(),
            sto: Vec::new(),
            generation: 0,
        }
    }

    /// Set the t = 0 phase, discarding any previously pushed events.
    pub fn init(&mut self, initial_status: &ContactStatus) {
        self.statuses.clear();
        self.events.clear();
        self.event_times.clear();
        self.sto.clear();
        self.statuses.push(initial_status.clone());
        self.generation += 1;
    }

    /// Append a phase starting at `switch_time`.
    ///
    /// The discrete event is derived from the last status. `sto` marks the
    /// switch time as a free decision variable for the switching-time
    /// optimization.
    pub fn push_back(
        &mut self,
        status: &ContactStatus,
        switch_time: f64,
        sto: bool,
    ) -> Result<(), SequenceError> {
        let last = self.statuses.last().ok_or(SequenceError::Uninitialized)?;
        if let Some(&prev) = self.event_times.last()
            && switch_time <= prev
        {
            return Err(SequenceError::NonIncreasingSwitchTime {
                prev,
                given: switch_time,
            });
        }
        if self.events.len() >= self.max_events {
            return Err(SequenceError::TooManyEvents {
                max: self.max_events,
            });
        }
        let event = DiscreteEvent::between(last, status);
        self.events.push(event);
        self.event_times.push(switch_time);
        self.sto.push(sto);
        self.statuses.push(status.clone());
        self.generation += 1;
        Ok(())
    }

    /// Remove the last event and the phase it introduced.
    pub fn pop_back(&mut self) {
        if self.events.pop().is_some() {
            self.event_times.pop();
            self.sto.pop();
            self.statuses.pop();
            self.generation += 1;
        }
    }

    /// Remove the first phase and the event that ended it.
    ///
    /// Used by the MPC layer once a phase has been consumed by the receding
    /// horizon.
    pub fn pop_front(&mut self) {
        if self.events.is_empty() {
            return;
        }
        self.statuses.remove(0);
        self.events.remove(0);
        self.event_times.remove(0);
        self.sto.remove(0);
        self.generation += 1;
    }

    /// Overwrite the time of one event, e.g. with an optimized switch time.
    ///
    /// Strict monotonicity against the neighbouring events is preserved.
    pub fn set_event_time(&mut self, event: usize, time: f64) -> Result<(), SequenceError> {
        if event >= self.events.len() {
            return Err(SequenceError::EventOutOfRange {
                event,
                num_events: self.events.len(),
            });
        }
        if event > 0 && time <= self.event_times[event - 1] {
            return Err(SequenceError::NonIncreasingSwitchTime {
                prev: self.event_times[event - 1],
                given: time,
            });
        }
        if event + 1 < self.event_times.len() && time >= self.event_times[event + 1] {
            return Err(SequenceError::NonIncreasingSwitchTime {
                prev: self.event_times[event + 1],
                given: time,
            });
        }
        self.event_times[event] = time;
        self.generation += 1;
        Ok(())
    }

    /// Overwrite all event times at once, e.g. after a switching-time step.
    ///
    /// Validates the whole vector before assigning, so a step that moves
    /// several switch times together cannot trip over a transiently
    /// reordered intermediate state.
    pub fn set_event_times(&mut self, times: &[f64]) -> Result<(), SequenceError> {
        if times.len() != self.event_times.len() {
            return Err(SequenceError::EventOutOfRange {
                event: times.len(),
                num_events: self.event_times.len(),
            });
        }
        for w in times.windows(2) {
            if w[1] <= w[0] {
                return Err(SequenceError::NonIncreasingSwitchTime {
                    prev: w[0],
                    given: w[1],
                });
            }
        }
        self.event_times.copy_from_slice(times);
        self.generation += 1;
        Ok(())
    }

    /// Set the contact points of one phase, and of the event entering it.
    pub fn set_contact_points(
        &mut self,
        phase: usize,
        points: &[Vector3<f64>],
    ) -> Result<(), SequenceError> {
        if phase >= self.statuses.len() {
            return Err(SequenceError::PhaseOutOfRange {
                phase,
                num_phases: self.statuses.len(),
            });
        }
        let expected = self.statuses[phase].num_contacts();
        if points.len() != expected {
            return Err(SequenceError::ContactPointCountMismatch {
                expected,
                got: points.len(),
            });
        }
        self.statuses[phase].set_contact_points(points);
        if phase > 0 {
            let post = self.statuses[phase].clone();
            self.events[phase - 1].set_post(&post);
        }
        self.generation += 1;
        Ok(())
    }

    // -- Queries ----------------------------------------------------------

    /// Number of contact phases (events + 1 once initialized).
    #[must_use]
    pub fn num_phases(&self) -> usize {
        self.statuses.len()
    }

    /// Number of discrete events.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Number of impulse (touchdown) events.
    #[must_use]
    pub fn num_impulse_events(&self) -> usize {
        self.events.iter().filter(|e| e.is_impulse()).count()
    }

    /// Number of lift events.
    #[must_use]
    pub fn num_lift_events(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind() == DiscreteEventKind::Lift)
            .count()
    }

    /// Maximum number of events this sequence accepts.
    #[must_use]
    pub const fn max_events(&self) -> usize {
        self.max_events
    }

    /// Index of the phase active at time `t`.
    ///
    /// Times before the first switch map to phase 0; times at or after the
    /// last switch map to the final phase.
    #[must_use]
    pub fn phase_at(&self, t: f64) -> usize {
        self.event_times.iter().filter(|&&ts| ts <= t).count()
    }

    /// Contact status of one phase.
    pub fn contact_status(&self, phase: usize) -> Result<&ContactStatus, SequenceError> {
        self.statuses
            .get(phase)
            .ok_or(SequenceError::PhaseOutOfRange {
                phase,
                num_phases: self.statuses.len(),
            })
    }

    /// The event between phase `event` and phase `event + 1`.
    pub fn event(&self, event: usize) -> Result<&DiscreteEvent, SequenceError> {
        self.events.get(event).ok_or(SequenceError::EventOutOfRange {
            event,
            num_events: self.events.len(),
        })
    }

    /// Impulse status of one event (empty for lift events).
    pub fn impulse_status(&self, event: usize) -> Result<&ImpulseStatus, SequenceError> {
        Ok(self.event(event)?.impulse_status())
    }

    /// Switch time of one event.
    pub fn event_time(&self, event: usize) -> Result<f64, SequenceError> {
        self.event_times
            .get(event)
            .copied()
            .ok_or(SequenceError::EventOutOfRange {
                event,
                num_events: self.event_times.len(),
            })
    }

    /// All switch times, in order.
    #[must_use]
    pub fn event_times(&self) -> &[f64] {
        &self.event_times
    }

    /// Whether switching-time optimization is enabled for one event.
    pub fn is_sto_enabled(&self, event: usize) -> Result<bool, SequenceError> {
        self.sto
            .get(event)
            .copied()
            .ok_or(SequenceError::EventOutOfRange {
                event,
                num_events: self.sto.len(),
            })
    }

    /// STO flags for all events, in order.
    #[must_use]
    pub fn sto_flags(&self) -> &[bool] {
        &self.sto
    }

    /// Whether the event times are strictly increasing.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.event_times.windows(2).all(|w| w[0] < w[1])
    }

    /// Generation counter, bumped by every structural mutation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ContactSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "contact sequence: {} phases", self.num_phases())?;
        for (i, status) in self.statuses.iter().enumerate() {
            if i == 0 {
                writeln!(f, "  phase 0 (t = 0): {status}")?;
            } else {
                let kind = match self.events[i - 1].kind() {
                    DiscreteEventKind::Impulse => "impulse",
                    DiscreteEventKind::Lift => "lift",
                    DiscreteEventKind::None => "none",
                };
                writeln!(
                    f,
                    "  phase {i} (t = {:.4}, {kind}, sto = {}): {status}",
                    self.event_times[i - 1],
                    self.sto[i - 1],
                )?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn standing(points: &[Vector3<f64>; 4]) -> ContactStatus {
        let mut s = ContactStatus::new(4);
        s.activate_contacts(&[0, 1, 2, 3]);
        s.set_contact_points(points);
        s
    }

    fn feet() -> [Vector3<f64>; 4] {
        [
            Vector3::new(0.18, 0.13, 0.0),
            Vector3::new(-0.18, 0.13, 0.0),
            Vector3::new(0.18, -0.13, 0.0),
            Vector3::new(-0.18, -0.13, 0.0),
        ]
    }

    fn jump_sequence() -> ContactSequence {
        let mut seq = ContactSequence::new(2);
        seq.init(&standing(&feet()));
        seq.push_back(&ContactStatus::new(4), 0.7, true).unwrap();
        let shifted: Vec<Vector3<f64>> =
            feet().iter().map(|p| p + Vector3::new(0.5, 0.0, 0.0)).collect();
        let mut landed = ContactStatus::new(4);
        landed.activate_contacts(&[0, 1, 2, 3]);
        landed.set_contact_points(&shifted);
        seq.push_back(&landed, 0.95, true).unwrap();
        seq
    }

    #[test]
    fn init_resets_events() {
        let mut seq = jump_sequence();
        assert_eq!(seq.num_events(), 2);
        seq.init(&standing(&feet()));
        assert_eq!(seq.num_phases(), 1);
        assert_eq!(seq.num_events(), 0);
    }

    #[test]
    fn push_back_before_init_fails() {
        let mut seq = ContactSequence::new(2);
        let err = seq.push_back(&ContactStatus::new(4), 0.5, false).unwrap_err();
        assert_eq!(err, SequenceError::Uninitialized);
    }

    #[test]
    fn switch_times_strictly_increasing() {
        let mut seq = ContactSequence::new(4);
        seq.init(&standing(&feet()));
        seq.push_back(&ContactStatus::new(4), 0.7, false).unwrap();

        // Equal time is rejected.
        let err = seq
            .push_back(&standing(&feet()), 0.7, false)
            .unwrap_err();
        assert!(matches!(
            err,
            SequenceError::NonIncreasingSwitchTime { prev, given }
                if (prev - 0.7).abs() < 1e-12 && (given - 0.7).abs() < 1e-12
        ));

        // Earlier time is rejected.
        let err = seq.push_back(&standing(&feet()), 0.3, false).unwrap_err();
        assert!(matches!(err, SequenceError::NonIncreasingSwitchTime { .. }));
        assert!(seq.is_consistent());
    }

    #[test]
    fn event_capacity_enforced() {
        let mut seq = ContactSequence::new(1);
        seq.init(&standing(&feet()));
        seq.push_back(&ContactStatus::new(4), 0.4, true).unwrap();
        let err = seq.push_back(&standing(&feet()), 0.9, true).unwrap_err();
        assert_eq!(err, SequenceError::TooManyEvents { max: 1 });
    }

    #[test]
    fn jump_sequence_classification() {
        let seq = jump_sequence();
        assert_eq!(seq.num_phases(), 3);
        assert_eq!(seq.num_events(), 2);
        assert_eq!(seq.num_lift_events(), 1);
        assert_eq!(seq.num_impulse_events(), 1);
        assert_eq!(seq.event(0).unwrap().kind(), DiscreteEventKind::Lift);
        assert_eq!(seq.event(1).unwrap().kind(), DiscreteEventKind::Impulse);
        assert!(seq.is_sto_enabled(0).unwrap());
        assert_eq!(seq.impulse_status(1).unwrap().dimi(), 12);
    }

    #[test]
    fn phase_lookup_by_time() {
        let seq = jump_sequence();
        assert_eq!(seq.phase_at(0.0), 0);
        assert_eq!(seq.phase_at(0.699), 0);
        assert_eq!(seq.phase_at(0.7), 1);
        assert_eq!(seq.phase_at(0.9), 1);
        assert_eq!(seq.phase_at(0.95), 2);
        assert_eq!(seq.phase_at(10.0), 2);
    }

    #[test]
    fn set_event_time_preserves_monotonicity() {
        let mut seq = jump_sequence();
        seq.set_event_time(0, 0.65).unwrap();
        assert!((seq.event_time(0).unwrap() - 0.65).abs() < 1e-12);

        let err = seq.set_event_time(0, 0.95).unwrap_err();
        assert!(matches!(err, SequenceError::NonIncreasingSwitchTime { .. }));
        let err = seq.set_event_time(1, 0.6).unwrap_err();
        assert!(matches!(err, SequenceError::NonIncreasingSwitchTime { .. }));
        let err = seq.set_event_time(5, 1.0).unwrap_err();
        assert!(matches!(err, SequenceError::EventOutOfRange { .. }));
        assert!(seq.is_consistent());
    }

    #[test]
    fn set_contact_points_updates_event_impulse() {
        let mut seq = jump_sequence();
        let new_points: Vec<Vector3<f64>> = feet()
            .iter()
            .map(|p| p + Vector3::new(0.8, 0.0, 0.0))
            .collect();
        seq.set_contact_points(2, &new_points).unwrap();
        let impulse = seq.impulse_status(1).unwrap();
        assert!(
            (impulse.as_contact_status().contact_point(0).x - (0.18 + 0.8)).abs() < 1e-12
        );

        let err = seq.set_contact_points(7, &new_points).unwrap_err();
        assert!(matches!(err, SequenceError::PhaseOutOfRange { .. }));
        let err = seq.set_contact_points(0, &new_points[..2]).unwrap_err();
        assert!(matches!(
            err,
            SequenceError::ContactPointCountMismatch { expected: 4, got: 2 }
        ));
    }

    #[test]
    fn set_event_times_validates_whole_vector() {
        let mut seq = jump_sequence();
        // Both events move right together; pairwise-sequential validation
        // would reject the first assignment.
        seq.set_event_times(&[0.9, 1.05]).unwrap();
        assert!((seq.event_time(0).unwrap() - 0.9).abs() < 1e-12);
        assert!((seq.event_time(1).unwrap() - 1.05).abs() < 1e-12);

        let err = seq.set_event_times(&[1.1, 1.05]).unwrap_err();
        assert!(matches!(err, SequenceError::NonIncreasingSwitchTime { .. }));
        let err = seq.set_event_times(&[0.5]).unwrap_err();
        assert!(matches!(err, SequenceError::EventOutOfRange { .. }));
    }

    #[test]
    fn pop_front_shifts_phases() {
        let mut seq = jump_sequence();
        seq.pop_front();
        assert_eq!(seq.num_phases(), 2);
        assert_eq!(seq.num_events(), 1);
        // The flying phase is now phase 0.
        assert!(!seq.contact_status(0).unwrap().has_active_contacts());
        assert!((seq.event_time(0).unwrap() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn pop_back_removes_last_phase() {
        let mut seq = jump_sequence();
        seq.pop_back();
        assert_eq!(seq.num_phases(), 2);
        assert_eq!(seq.num_events(), 1);
        assert!((seq.event_time(0).unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn generation_bumps_on_mutation() {
        let mut seq = jump_sequence();
        let g0 = seq.generation();
        seq.set_event_time(0, 0.68).unwrap();
        assert!(seq.generation() > g0);
        let g1 = seq.generation();
        seq.pop_front();
        assert!(seq.generation() > g1);
    }

    #[test]
    fn display_lists_phases() {
        let seq = jump_sequence();
        let text = format!("{seq}");
        assert!(text.contains("3 phases"));
        assert!(text.contains("lift"));
        assert!(text.contains("impulse"));
    }
}
