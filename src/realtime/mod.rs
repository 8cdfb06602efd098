pub mod events;
pub mod hub;
pub mod location;
pub mod session;
