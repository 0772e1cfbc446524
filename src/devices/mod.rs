//! Emulated bus participants.

pub mod boiler;
pub mod bridge;
pub mod generic;
pub mod interface;
pub mod room_unit;

pub use boiler::BoilerDevice;
pub use bridge::BridgeDevice;
pub use generic::GenericDevice;
pub use interface::InterfaceDevice;
pub use room_unit::RoomUnitDevice;
