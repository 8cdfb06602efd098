pub mod caller;
pub mod driver;
pub mod earning;
pub mod history;
pub mod order;
pub mod otp;
pub mod user;
