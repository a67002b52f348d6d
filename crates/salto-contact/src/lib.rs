//! Contact statuses, discrete events, and phase sequences.
//!
//! A legged motion is a sequence of contact phases separated by discrete
//! events: an *impulse* when a foot touches down, a *lift* when feet only
//! leave the ground. [`ContactSequence`] is the timeline of
//! [`ContactStatus`] snapshots with their switch times; the solver consumes
//! it read-only and the MPC layer shifts it forward between re-solves.

pub mod event;
pub mod sequence;
pub mod status;

pub use event::{DiscreteEvent, DiscreteEventKind};
pub use sequence::ContactSequence;
pub use status::{ContactStatus, ImpulseStatus};
