use crate::*;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum IrError {
  #[error("inlined function reads parameter {index} but the call site provides none")]
  MissingParameter { index: u32 },
  #[error("node {0:?} is used before its definition")]
  UndefinedNode(NodeHandle),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ExecError {
  #[error("intrinsic {0:?} reached execution without being lowered")]
  UnloweredIntrinsic(RtIntrinsic),
  #[error("function parameter {0} has no bound value")]
  UnboundParameter(u32),
  #[error("frame relative scratch access, the stack pointer has not been folded in")]
  FrameRelativeScratch,
  #[error("operands of {op} do not match: {left:?}, {right:?}")]
  InvalidOperands {
    op: &'static str,
    left: ValueType,
    right: ValueType,
  },
  #[error("scratch or shared access at {0:#x} is outside the addressable range")]
  LocalMemoryOutOfRange(u64),
  #[error("no resume address registered for call site {0}")]
  MissingResumeAddress(u32),
  #[error("execution exceeded {0} steps")]
  StepLimitExceeded(u64),
}
