//! Robot vacuum switch: status snapshot, command messages and the toggle
//! entity that ties them to a broker session.

pub mod command;
pub mod state;
pub mod switch;

pub use switch::{DeviceIdentity, RoombaSwitch};
