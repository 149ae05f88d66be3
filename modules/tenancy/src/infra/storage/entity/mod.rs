pub mod jamaah_assignment;
pub mod session;
pub mod tenant;
pub mod user;
