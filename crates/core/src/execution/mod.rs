pub mod domain;
pub mod execution_controller;
pub mod infrastructure;
