//! Lowers the shader stages of a ray tracing pipeline into kernels for hardware without native
//! shader calls.
//!
//! Every stage becomes a kernel that reads and writes the shared ray state through argument
//! registers. A uniform scheduler picks which kernel a wave runs next. The traversal kernel walks
//! the acceleration structure with all any hit and intersection shaders inlined. Alternatively
//! a whole pipeline compiles into a single raygen kernel.

mod abi;
mod any_hit;
mod bvh;
mod compile;
mod config;
mod dispatch;
mod error;
mod flags;
mod history;
mod lower;
mod pipeline;
mod ray_state;
mod sbt;
mod scheduler;
mod traversal;

pub use abi::*;
pub use any_hit::*;
pub use bvh::*;
use bytemuck::*;
pub use compile::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use flags::*;
pub use history::*;
pub use lower::*;
pub use pipeline::*;
pub use ray_state::*;
pub use rendiation_shader_rt_ir::*;
use rustc_hash::FxHashSet;
pub use sbt::*;
pub use scheduler::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
pub use traversal::*;

#[cfg(test)]
mod test;
