//! The contract consumed from the host's body layer.
//!
//! Bodies are never owned or aliased by the history: they are named by an identity key,
//! described once by a [`Capability`], and their properties cross the boundary as plain
//! `bytemuck::Pod` copies bundled in a [`BodyState`].
use std::{fmt::Debug, hash::Hash};

use bytemuck::{Pod, Zeroable};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::history::{property::PropertyHistory, record::EntityHistoryRecord};

/// Identity key of a simulated body: hashable and stable across the body's lifetime.
pub trait BodyId: Copy + Eq + Hash + Debug + 'static {}

impl<T: Copy + Eq + Hash + Debug + 'static> BodyId for T {}

/// Simulation behaviour of a body, deciding which property histories it carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyKind {
    Static,
    Kinematic,
    Dynamic,
}

/// Whether a body's resimulated trajectory is compared against its recorded history.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReconciliationPolicy {
    #[default]
    Reconcile,
    /// "Resim as slave": driven by externally authoritative input and taken on faith.
    AlwaysTrust,
}

/// Capability descriptor, consulted once when a body's history record is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Capability {
    pub kind: BodyKind,
    pub policy: ReconciliationPolicy,
}

impl Capability {
    pub const fn new(kind: BodyKind) -> Self {
        Self {
            kind,
            policy: ReconciliationPolicy::Reconcile,
        }
    }

    pub const fn fixed() -> Self {
        Self::new(BodyKind::Static)
    }

    pub const fn kinematic() -> Self {
        Self::new(BodyKind::Kinematic)
    }

    pub const fn dynamic() -> Self {
        Self::new(BodyKind::Dynamic)
    }

    pub const fn always_trust(mut self) -> Self {
        self.policy = ReconciliationPolicy::AlwaysTrust;
        self
    }

    pub fn has_velocities(&self) -> bool {
        self.kind != BodyKind::Static
    }

    pub fn has_kinematic_target(&self) -> bool {
        self.kind != BodyKind::Static
    }

    pub fn has_dynamics(&self) -> bool {
        self.kind == BodyKind::Dynamic
    }
}

/// World-space position and orientation (quaternion, xyzw).
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct Pose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct Velocities {
    pub linear: [f32; 3],
    pub angular: [f32; 3],
}

impl Velocities {
    pub fn linear(linear: [f32; 3]) -> Self {
        Self {
            linear,
            angular: [0.0; 3],
        }
    }
}

/// Pose a kinematic body is driven towards; `mode` is a host-defined tag.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct KinematicTarget {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub mode: u32,
}

impl Default for KinematicTarget {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            mode: 0,
        }
    }
}

/// Accumulated forces and impulses, consumed by the solver each step.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct Dynamics {
    pub acceleration: [f32; 3],
    pub angular_acceleration: [f32; 3],
    pub linear_impulse: [f32; 3],
    pub angular_impulse: [f32; 3],
}

/// Dynamic motion state: object state code, host flag bits and damping.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct DynamicMisc {
    pub object_state: u32,
    pub flags: u32,
    pub linear_damping: f32,
    pub angular_damping: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct MassProps {
    pub mass: f32,
    pub inv_mass: f32,
    pub inertia: [f32; 3],
    pub center_of_mass: [f32; 3],
    pub rotation_of_mass: [f32; 4],
}

impl Default for MassProps {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inv_mass: 1.0,
            inertia: [1.0; 3],
            center_of_mass: [0.0; 3],
            rotation_of_mass: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

// All of the above are `repr(C)` over 4-byte fields only, so they have no padding.
unsafe impl Pod for Pose {}
unsafe impl Zeroable for Pose {}
unsafe impl Pod for Velocities {}
unsafe impl Zeroable for Velocities {}
unsafe impl Pod for KinematicTarget {}
unsafe impl Zeroable for KinematicTarget {}
unsafe impl Pod for Dynamics {}
unsafe impl Zeroable for Dynamics {}
unsafe impl Pod for DynamicMisc {}
unsafe impl Zeroable for DynamicMisc {}
unsafe impl Pod for MassProps {}
unsafe impl Zeroable for MassProps {}

/// One optional value per tracked property.
///
/// Used for dirty-property pushes (only changed fields set), for solver results, for
/// the live state read back from the host, and for past-state snapshots.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyState {
    pub pose: Option<Pose>,
    pub velocities: Option<Velocities>,
    pub kinematic_target: Option<KinematicTarget>,
    pub dynamics: Option<Dynamics>,
    pub dynamic_misc: Option<DynamicMisc>,
    pub mass_props: Option<MassProps>,
}

impl BodyState {
    pub fn with<P: Property>(mut self, value: P) -> Self {
        self.set(value);
        self
    }

    pub fn get<P: Property>(&self) -> Option<P> {
        P::get(self)
    }

    pub fn set<P: Property>(&mut self, value: P) {
        *P::slot(self) = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        *self == BodyState::default()
    }
}

/// Accessor pair tying a property value type to its slot in a [`BodyState`] and its
/// history in an [`EntityHistoryRecord`].
///
/// Every per-property algorithm (rewind, desync comparison, seeding) is written once,
/// generic over this trait.
pub trait Property: Pod + Debug {
    const NAME: &'static str;
    /// Whether the solver produces this value, as opposed to input only.
    const SOLVER_WRITABLE: bool;

    fn get(state: &BodyState) -> Option<Self>;
    fn slot(state: &mut BodyState) -> &mut Option<Self>;
    fn history<Id>(record: &EntityHistoryRecord<Id>) -> Option<&PropertyHistory<Self>>;
    fn history_mut<Id>(record: &mut EntityHistoryRecord<Id>) -> Option<&mut PropertyHistory<Self>>;
}

macro_rules! impl_property {
    ($ty:ty, $field:ident, $solver:expr) => {
        impl Property for $ty {
            const NAME: &'static str = stringify!($field);
            const SOLVER_WRITABLE: bool = $solver;

            fn get(state: &BodyState) -> Option<Self> {
                state.$field
            }

            fn slot(state: &mut BodyState) -> &mut Option<Self> {
                &mut state.$field
            }

            fn history<Id>(record: &EntityHistoryRecord<Id>) -> Option<&PropertyHistory<Self>> {
                record.$field.as_ref()
            }

            fn history_mut<Id>(
                record: &mut EntityHistoryRecord<Id>,
            ) -> Option<&mut PropertyHistory<Self>> {
                record.$field.as_mut()
            }
        }
    };
}

impl_property!(Pose, pose, true);
impl_property!(Velocities, velocities, true);
impl_property!(KinematicTarget, kinematic_target, false);
impl_property!(Dynamics, dynamics, true);
impl_property!(DynamicMisc, dynamic_misc, true);
impl_property!(MassProps, mass_props, false);

/// Live bodies owned by the host simulation.
///
/// Only values are exchanged. `read_state` is expected to fill every property the body's
/// capability carries; `write_state` applies only the fields that are set.
pub trait SimBodies {
    type Id: BodyId;

    /// `None` when the body no longer exists.
    fn capability(&self, id: Self::Id) -> Option<Capability>;
    fn read_state(&self, id: Self::Id) -> Option<BodyState>;
    fn write_state(&mut self, id: Self::Id, state: &BodyState);
    fn set_enabled(&mut self, id: Self::Id, enabled: bool);
}
