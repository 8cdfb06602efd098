pub mod notify;
pub mod routing;
