use std::fmt;

use nalgebra::Vector3;

// ---------------------------------------------------------------------------
// ContactStatus
// ---------------------------------------------------------------------------

/// Snapshot of which contacts are active and where.
///
/// One flag and one 3D contact point per contact frame of the robot model.
/// Mutable while being assembled (`activate`, `set_contact_point`); once
/// pushed into a [`crate::ContactSequence`] it is treated as immutable.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactStatus {
    active: Vec<bool>,
    points: Vec<Vector3<f64>>,
}

impl ContactStatus {
    /// All-inactive status for a robot with `num_contacts` contact frames.
    #[must_use]
    pub fn new(num_contacts: usize) -> Self {
        Self {
            active: vec![false; num_contacts],
            points: vec![Vector3::zeros(); num_contacts],
        }
    }

    /// Number of contact frames (active or not).
    #[must_use]
    pub fn num_contacts(&self) -> usize {
        self.active.len()
    }

    /// Activate a single contact.
    ///
    /// # Panics
    /// Panics if `contact` is out of range.
    pub fn activate(&mut self, contact: usize) {
        self.active[contact] = true;
    }

    /// Activate several contacts at once.
    pub fn activate_contacts(&mut self, contacts: &[usize]) {
        for &c in contacts {
            self.activate(c);
        }
    }

    /// Deactivate a single contact.
    pub fn deactivate(&mut self, contact: usize) {
        self.active[contact] = false;
    }

    /// Whether the given contact is active.
    #[must_use]
    pub fn is_active(&self, contact: usize) -> bool {
        self.active[contact]
    }

    /// Number of active contacts.
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Whether any contact is active.
    #[must_use]
    pub fn has_active_contacts(&self) -> bool {
        self.active.iter().any(|&a| a)
    }

    /// Total contact-force dimension: 3 per active point contact.
    #[must_use]
    pub fn dimf(&self) -> usize {
        3 * self.num_active()
    }

    /// Indices of the active contacts, in frame order.
    #[must_use]
    pub fn active_indices(&self) -> Vec<usize> {
        self.active
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| a.then_some(i))
            .collect()
    }

    /// Set the 3D target point of one contact.
    pub fn set_contact_point(&mut self, contact: usize, point: Vector3<f64>) {
        self.points[contact] = point;
    }

    /// Set the target points of all contacts at once.
    ///
    /// # Panics
    /// Panics if `points.len()` differs from the number of contacts.
    pub fn set_contact_points(&mut self, points: &[Vector3<f64>]) {
        assert_eq!(
            points.len(),
            self.points.len(),
            "contact point count mismatch"
        );
        self.points.copy_from_slice(points);
    }

    /// The 3D target point of one contact.
    #[must_use]
    pub fn contact_point(&self, contact: usize) -> &Vector3<f64> {
        &self.points[contact]
    }

    /// All contact points, in frame order.
    #[must_use]
    pub fn contact_points(&self) -> &[Vector3<f64>] {
        &self.points
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "active: [")?;
        for (i, a) in self.active.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", u8::from(*a))?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// ImpulseStatus
// ---------------------------------------------------------------------------

/// The contacts that become active at a switch (impact), with their points.
///
/// Structurally a [`ContactStatus`] restricted to the newly activating
/// contacts; the impulse variables of the zero-duration impact stage are
/// sized from [`ImpulseStatus::dimi`].
#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseStatus {
    inner: ContactStatus,
}

impl ImpulseStatus {
    /// Impulse status with no impacting contacts.
    #[must_use]
    pub fn new(num_contacts: usize) -> Self {
        Self {
            inner: ContactStatus::new(num_contacts),
        }
    }

    /// Build from the contacts active in `post` but not in `pre`.
    #[must_use]
    pub fn from_transition(pre: &ContactStatus, post: &ContactStatus) -> Self {
        let mut inner = ContactStatus::new(pre.num_contacts());
        for i in 0..pre.num_contacts() {
            if post.is_active(i) && !pre.is_active(i) {
                inner.activate(i);
                inner.set_contact_point(i, *post.contact_point(i));
            }
        }
        Self { inner }
    }

    /// Impulse-force dimension: 3 per impacting contact.
    #[must_use]
    pub fn dimi(&self) -> usize {
        self.inner.dimf()
    }

    /// Whether any contact impacts at this event.
    #[must_use]
    pub fn has_impacts(&self) -> bool {
        self.inner.has_active_contacts()
    }

    /// The underlying status over the impacting contacts.
    #[must_use]
    pub fn as_contact_status(&self) -> &ContactStatus {
        &self.inner
    }

    /// Update the impact point of one contact.
    pub fn set_contact_point(&mut self, contact: usize, point: Vector3<f64>) {
        self.inner.set_contact_point(contact, point);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
