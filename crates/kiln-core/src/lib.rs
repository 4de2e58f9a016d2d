//! Kiln Core - Foundational pieces shared by the Kiln engine crates
//!
//! - [`TaskManager`]: the worker pool all background work is scheduled on
//! - [`Vertex`]: the POD vertex layout used by meshes and the mesh cache

pub mod task;
pub mod vertex;

pub use glam::{Vec2, Vec3};
pub use task::{default_worker_count, panic_message, TaskError, TaskManager};
pub use vertex::Vertex;
