pub mod capture;
pub mod config;
pub mod coordinator;
pub mod encode;
pub mod frames;
pub mod process;
pub mod tools;
