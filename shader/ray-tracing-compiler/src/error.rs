use crate::*;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RtCompileError {
  #[error("intrinsic {intrinsic:?} is not valid in a {stage:?} kernel at this point")]
  UnexpectedIntrinsic {
    intrinsic: RtIntrinsic,
    stage: RtStage,
  },
  #[error("{0:?} stages are only ever inlined into the traversal kernel")]
  NotStandalone(RtStage),
  #[error("stage index {0} is out of range")]
  InvalidStageIndex(u32),
  #[error("procedural hit group {group} has no intersection shader")]
  MissingIntersectionShader { group: usize },
  #[error("inlined shader reads parameter {index} which the call site does not link")]
  UnlinkedParameter { index: u32 },
  #[error("malformed shader: {0}")]
  Malformed(IrError),
}

impl From<IrError> for RtCompileError {
  fn from(e: IrError) -> Self {
    match e {
      IrError::MissingParameter { index } => RtCompileError::UnlinkedParameter { index },
      e => RtCompileError::Malformed(e),
    }
  }
}
