pub mod actor;
pub mod admission;
pub mod application;
pub mod ids;
pub mod money;
pub mod payment;
pub mod ports;
pub mod program;
