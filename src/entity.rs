//! Toggle entity contract expected by the host's device registry.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityState {
    On,
    Off,
}

impl From<bool> for EntityState {
    fn from(on: bool) -> Self {
        if on {
            EntityState::On
        } else {
            EntityState::Off
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::On => f.write_str("on"),
            EntityState::Off => f.write_str("off"),
        }
    }
}

/// A named on/off entity.
///
/// Commands are fire-and-forget: they return once handed to the session, or
/// dropped if it is offline. The new state only shows up in
/// [`ToggleEntity::is_on`] after the device reports it.
pub trait ToggleEntity: Send + Sync {
    fn name(&self) -> &str;

    fn is_on(&self) -> bool;

    fn state(&self) -> EntityState {
        EntityState::from(self.is_on())
    }

    /// Whether the entity currently has a working link to its device.
    fn available(&self) -> bool {
        true
    }

    fn turn_on(&self);

    fn turn_off(&self);

    /// Asks the device for a fresh full report.
    fn update(&self);
}
