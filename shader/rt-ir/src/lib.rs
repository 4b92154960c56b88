//! A structured shader instruction representation for ray tracing stages, with the builder,
//! rewrite and inline utilities the stage compiler works with, and a reference wave executor.

mod builder;
mod control;
mod error;
mod executor;
mod function;
mod inline;
mod intrinsic;
mod node;
mod pass;
mod ty;

pub use builder::*;
use bytemuck::*;
pub use control::*;
pub use error::*;
pub use executor::*;
pub use function::*;
pub use inline::*;
pub use intrinsic::*;
pub use node::*;
pub use pass::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
pub use ty::*;
