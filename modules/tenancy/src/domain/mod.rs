pub mod error;
pub mod model;
pub mod repos;
pub mod service;
pub mod validator;
