//! Collaborator interfaces consumed by the capture and encode core.

pub mod process;
pub mod screen;
