use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) u32);

impl NodeHandle {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarHandle(pub(crate) u32);

impl VarHandle {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeHandle(pub(crate) u32);

/// How a scratch offset is interpreted. Frame relative accesses are what shader stages
/// are authored with, they become absolute once the stack pointer is folded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScratchBase {
  Frame,
  Absolute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  And,
  Or,
  Xor,
  ShiftLeft,
  ShiftRight,
  Eq,
  NotEq,
  LessThan,
  LessEqualThan,
  GreaterThan,
  GreaterEqualThan,
  Min,
  Max,
  Dot,
  Cross,
}

impl BinaryOperator {
  pub fn is_comparison(self) -> bool {
    matches!(
      self,
      BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::LessThan
        | BinaryOperator::LessEqualThan
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqualThan
    )
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
  Not,
  Neg,
  Abs,
  U32ToU64,
  U64ToU32,
  U32ToF32,
  BitcastToU32,
  BitcastToF32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeExpr {
  Const(Value),
  /// any value is acceptable, the executor produces zero
  Undef(ValueType),
  Param(u32),
  /// the value of another node
  Alias(NodeHandle),
  LoadVar(VarHandle),
  Binary {
    op: BinaryOperator,
    left: NodeHandle,
    right: NodeHandle,
  },
  Unary {
    op: UnaryOperator,
    value: NodeHandle,
  },
  Select {
    condition: NodeHandle,
    accept: NodeHandle,
    reject: NodeHandle,
  },
  Compose([NodeHandle; 3]),
  Extract {
    vector: NodeHandle,
    index: u32,
  },
  LoadScratch {
    base: ScratchBase,
    offset: NodeHandle,
    ty: ValueType,
  },
  LoadGlobal {
    address: NodeHandle,
    ty: ValueType,
  },
  LoadShared {
    offset: NodeHandle,
    ty: ValueType,
  },
  /// returns the value before the add
  AtomicAddGlobal {
    address: NodeHandle,
    value: NodeHandle,
  },
  /// u64 mask of the live invocations for which the condition holds
  Ballot(NodeHandle),
  /// index of the lowest set bit, u32::MAX for zero
  FindLsb(NodeHandle),
  ReadInvocation {
    value: NodeHandle,
    invocation: NodeHandle,
  },
  LocalInvocationIndex,
  LoadArg {
    slot: u32,
    ty: ValueType,
  },
  /// code address of the continuation that follows the call site `call_idx`
  ResumeShaderAddress(u32),
  Intrinsic {
    intrinsic: RtIntrinsic,
    args: SmallVec<[NodeHandle; 4]>,
  },
}

impl NodeExpr {
  pub fn intrinsic(&self) -> Option<RtIntrinsic> {
    match self {
      NodeExpr::Intrinsic { intrinsic, .. } => Some(*intrinsic),
      _ => None,
    }
  }

  pub fn visit_operands(&self, mut f: impl FnMut(NodeHandle)) {
    match self {
      NodeExpr::Const(_)
      | NodeExpr::Undef(_)
      | NodeExpr::Param(_)
      | NodeExpr::LoadVar(_)
      | NodeExpr::LocalInvocationIndex
      | NodeExpr::LoadArg { .. }
      | NodeExpr::ResumeShaderAddress(_) => {}
      NodeExpr::Binary { left, right, .. } => {
        f(*left);
        f(*right);
      }
      NodeExpr::Unary { value, .. } => f(*value),
      NodeExpr::Select {
        condition,
        accept,
        reject,
      } => {
        f(*condition);
        f(*accept);
        f(*reject);
      }
      NodeExpr::Compose(c) => c.iter().copied().for_each(f),
      NodeExpr::Extract { vector, .. } => f(*vector),
      NodeExpr::LoadScratch { offset, .. } | NodeExpr::LoadShared { offset, .. } => f(*offset),
      NodeExpr::LoadGlobal { address, .. } => f(*address),
      NodeExpr::AtomicAddGlobal { address, value } => {
        f(*address);
        f(*value);
      }
      NodeExpr::Alias(v) | NodeExpr::Ballot(v) | NodeExpr::FindLsb(v) => f(*v),
      NodeExpr::ReadInvocation { value, invocation } => {
        f(*value);
        f(*invocation);
      }
      NodeExpr::Intrinsic { args, .. } => args.iter().copied().for_each(f),
    }
  }

  /// rebuild the expression with every node and var reference mapped, used when an
  /// expression is moved into another function
  pub fn try_map<E>(
    &self,
    mut node: impl FnMut(NodeHandle) -> Result<NodeHandle, E>,
    mut var: impl FnMut(VarHandle) -> VarHandle,
  ) -> Result<NodeExpr, E> {
    Ok(match self {
      NodeExpr::Const(v) => NodeExpr::Const(*v),
      NodeExpr::Undef(ty) => NodeExpr::Undef(*ty),
      NodeExpr::Param(i) => NodeExpr::Param(*i),
      NodeExpr::Alias(v) => NodeExpr::Alias(node(*v)?),
      NodeExpr::LoadVar(v) => NodeExpr::LoadVar(var(*v)),
      NodeExpr::Binary { op, left, right } => NodeExpr::Binary {
        op: *op,
        left: node(*left)?,
        right: node(*right)?,
      },
      NodeExpr::Unary { op, value } => NodeExpr::Unary {
        op: *op,
        value: node(*value)?,
      },
      NodeExpr::Select {
        condition,
        accept,
        reject,
      } => NodeExpr::Select {
        condition: node(*condition)?,
        accept: node(*accept)?,
        reject: node(*reject)?,
      },
      NodeExpr::Compose([x, y, z]) => NodeExpr::Compose([node(*x)?, node(*y)?, node(*z)?]),
      NodeExpr::Extract { vector, index } => NodeExpr::Extract {
        vector: node(*vector)?,
        index: *index,
      },
      NodeExpr::LoadScratch { base, offset, ty } => NodeExpr::LoadScratch {
        base: *base,
        offset: node(*offset)?,
        ty: *ty,
      },
      NodeExpr::LoadGlobal { address, ty } => NodeExpr::LoadGlobal {
        address: node(*address)?,
        ty: *ty,
      },
      NodeExpr::LoadShared { offset, ty } => NodeExpr::LoadShared {
        offset: node(*offset)?,
        ty: *ty,
      },
      NodeExpr::AtomicAddGlobal { address, value } => NodeExpr::AtomicAddGlobal {
        address: node(*address)?,
        value: node(*value)?,
      },
      NodeExpr::Ballot(v) => NodeExpr::Ballot(node(*v)?),
      NodeExpr::FindLsb(v) => NodeExpr::FindLsb(node(*v)?),
      NodeExpr::ReadInvocation { value, invocation } => NodeExpr::ReadInvocation {
        value: node(*value)?,
        invocation: node(*invocation)?,
      },
      NodeExpr::LocalInvocationIndex => NodeExpr::LocalInvocationIndex,
      NodeExpr::LoadArg { slot, ty } => NodeExpr::LoadArg {
        slot: *slot,
        ty: *ty,
      },
      NodeExpr::ResumeShaderAddress(i) => NodeExpr::ResumeShaderAddress(*i),
      NodeExpr::Intrinsic { intrinsic, args } => NodeExpr::Intrinsic {
        intrinsic: *intrinsic,
        args: args.iter().map(|a| node(*a)).collect::<Result<_, E>>()?,
      },
    })
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeEntry {
  pub expr: NodeExpr,
  pub ty: ValueType,
}
