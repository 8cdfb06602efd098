pub mod acceptance;
pub mod checkpoint;
pub mod lifecycle;
pub mod locks;
pub mod presence;
