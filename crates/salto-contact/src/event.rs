use crate::status::{ContactStatus, ImpulseStatus};

/// Classification of the transition between two contact phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscreteEventKind {
    /// At least one contact becomes active (an impact occurs).
    Impulse,
    /// Contacts only deactivate.
    Lift,
    /// The active sets are identical (placements may still differ).
    None,
}

/// A discrete event between two contact phases.
#[derive(Clone, Debug)]
pub struct DiscreteEvent {
    pre: ContactStatus,
    post: ContactStatus,
    impulse: ImpulseStatus,
    kind: DiscreteEventKind,
}

impl DiscreteEvent {
    /// Derive the event between `pre` and `post` statuses.
    ///
    /// The event is an impulse if any contact activates, even if other
    /// contacts deactivate at the same instant; it is a lift if contacts
    /// only deactivate.
    #[must_use]
    pub fn between(pre: &ContactStatus, post: &ContactStatus) -> Self {
        let impulse = ImpulseStatus::from_transition(pre, post);
        let any_deactivation =
            (0..pre.num_contacts()).any(|i| pre.is_active(i) && !post.is_active(i));
        let kind = if impulse.has_impacts() {
            DiscreteEventKind::Impulse
        } else if any_deactivation {
            DiscreteEventKind::Lift
        } else {
            DiscreteEventKind::None
        };
        Self {
            pre: pre.clone(),
            post: post.clone(),
            impulse,
            kind,
        }
    }

    /// Event classification.
    #[must_use]
    pub const fn kind(&self) -> DiscreteEventKind {
        self.kind
    }

    /// Status before the event.
    #[must_use]
    pub const fn pre(&self) -> &ContactStatus {
        &self.pre
    }

    /// Status after the event.
    #[must_use]
    pub const fn post(&self) -> &ContactStatus {
        &self.post
    }

    /// The impacting contacts (empty for lift events).
    #[must_use]
    pub const fn impulse_status(&self) -> &ImpulseStatus {
        &self.impulse
    }

    /// Whether this event carries an impact.
    #[must_use]
    pub fn is_impulse(&self) -> bool {
        self.kind == DiscreteEventKind::Impulse
    }

    /// Refresh the post status (and the impulse points) after contact
    /// placements changed.
    pub(crate) fn set_post(&mut self, post: &ContactStatus) {
        self.impulse = ImpulseStatus::from_transition(&self.pre, post);
        self.post = post.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standing() -> ContactStatus {
        let mut s = ContactStatus::new(4);
        s.activate_contacts(&[0, 1, 2, 3]);
        s
    }

    #[test]
    fn liftoff_is_lift() {
        let event = DiscreteEvent::between(&standing(), &ContactStatus::new(4));
        assert_eq!(event.kind(), DiscreteEventKind::Lift);
        assert!(!event.is_impulse());
        assert_eq!(event.impulse_status().dimi(), 0);
    }

    #[test]
    fn touchdown_is_impulse() {
        let event = DiscreteEvent::between(&ContactStatus::new(4), &standing());
        assert_eq!(event.kind(), DiscreteEventKind::Impulse);
        assert!(event.is_impulse());
        assert_eq!(event.impulse_status().dimi(), 12);
    }

    #[test]
    fn mixed_transition_is_impulse() {
        // Trot-like switch: 0,3 -> 1,2. Activation wins the classification.
        let mut pre = ContactStatus::new(4);
        pre.activate_contacts(&[0, 3]);
        let mut post = ContactStatus::new(4);
        post.activate_contacts(&[1, 2]);
        let event = DiscreteEvent::between(&pre, &post);
        assert_eq!(event.kind(), DiscreteEventKind::Impulse);
        assert_eq!(event.impulse_status().dimi(), 6);
    }

    #[test]
    fn identical_sets_is_none() {
        let event = DiscreteEvent::between(&standing(), &standing());
        assert_eq!(event.kind(), DiscreteEventKind::None);
    }
}
