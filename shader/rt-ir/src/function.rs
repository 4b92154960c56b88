use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RtStage {
  RayGen,
  AnyHit,
  ClosestHit,
  Miss,
  Intersection,
  Callable,
  /// the generated BVH walk kernel
  Traversal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
  pub name: &'static str,
  pub ty: ValueType,
}

/// One shader entry point in structured form.
///
/// Nodes live in an arena and are referenced by handle, each node is defined exactly once
/// by a [`Stmt::Node`] in the body. Mutable state goes through vars.
#[derive(Clone, Debug)]
pub struct ShaderFunction {
  pub name: String,
  pub stage: RtStage,
  pub nodes: Vec<NodeEntry>,
  pub vars: Vec<VarDecl>,
  pub params: Vec<ValueType>,
  pub body: Block,
  pub scope_count: u32,
  /// static size of the frame relative scratch region
  pub scratch_size: u32,
  pub shared_size: u32,
}

impl ShaderFunction {
  pub fn new(name: impl Into<String>, stage: RtStage) -> Self {
    Self {
      name: name.into(),
      stage,
      nodes: Vec::new(),
      vars: Vec::new(),
      params: Vec::new(),
      body: Vec::new(),
      scope_count: 0,
      scratch_size: 0,
      shared_size: 0,
    }
  }

  pub fn with_scratch_size(mut self, size: u32) -> Self {
    self.scratch_size = size;
    self
  }

  pub fn node(&self, node: NodeHandle) -> &NodeEntry {
    &self.nodes[node.index()]
  }

  pub fn node_type(&self, node: NodeHandle) -> ValueType {
    self.nodes[node.index()].ty
  }

  pub fn var(&self, var: VarHandle) -> &VarDecl {
    &self.vars[var.index()]
  }

  pub fn declare_var(&mut self, name: &'static str, ty: ValueType) -> VarHandle {
    self.vars.push(VarDecl { name, ty });
    VarHandle(self.vars.len() as u32 - 1)
  }

  pub fn new_scope(&mut self) -> ScopeHandle {
    self.scope_count += 1;
    ScopeHandle(self.scope_count - 1)
  }

  pub fn push_param(&mut self, ty: ValueType) -> u32 {
    self.params.push(ty);
    self.params.len() as u32 - 1
  }

  /// allocate a node without placing its definition, see [`FunctionBuilder`] for the
  /// placing variant
  pub(crate) fn alloc_node(&mut self, expr: NodeExpr) -> NodeHandle {
    let ty = self.infer_type(&expr);
    self.nodes.push(NodeEntry { expr, ty });
    NodeHandle(self.nodes.len() as u32 - 1)
  }

  pub fn infer_type(&self, expr: &NodeExpr) -> ValueType {
    match expr {
      NodeExpr::Const(v) => v.ty(),
      NodeExpr::Undef(ty) => *ty,
      NodeExpr::Param(i) => self.params.get(*i as usize).copied().unwrap_or(ValueType::Unit),
      NodeExpr::Alias(v) => self.node_type(*v),
      NodeExpr::LoadVar(v) => self.var(*v).ty,
      NodeExpr::Binary { op, left, .. } => match op {
        op if op.is_comparison() => ValueType::Bool,
        BinaryOperator::Dot => ValueType::F32,
        _ => self.node_type(*left),
      },
      NodeExpr::Unary { op, value } => match op {
        UnaryOperator::U32ToU64 => ValueType::U64,
        UnaryOperator::U64ToU32 | UnaryOperator::BitcastToU32 => ValueType::U32,
        UnaryOperator::U32ToF32 | UnaryOperator::BitcastToF32 => ValueType::F32,
        UnaryOperator::Not | UnaryOperator::Neg | UnaryOperator::Abs => self.node_type(*value),
      },
      NodeExpr::Select { accept, .. } => self.node_type(*accept),
      NodeExpr::Compose([x, ..]) => match self.node_type(*x) {
        ValueType::U32 => ValueType::UVec3,
        _ => ValueType::Vec3,
      },
      NodeExpr::Extract { vector, .. } => self
        .node_type(*vector)
        .component_type()
        .unwrap_or(ValueType::Unit),
      NodeExpr::LoadScratch { ty, .. }
      | NodeExpr::LoadGlobal { ty, .. }
      | NodeExpr::LoadShared { ty, .. }
      | NodeExpr::LoadArg { ty, .. } => *ty,
      NodeExpr::AtomicAddGlobal { value, .. } => self.node_type(*value),
      NodeExpr::ReadInvocation { value, .. } => self.node_type(*value),
      NodeExpr::Ballot(_) | NodeExpr::ResumeShaderAddress(_) => ValueType::U64,
      NodeExpr::FindLsb(_) | NodeExpr::LocalInvocationIndex => ValueType::U32,
      NodeExpr::Intrinsic { intrinsic, .. } => intrinsic.result_type(),
    }
  }

  pub fn for_each_stmt<'a>(&'a self, mut f: impl FnMut(&'a Stmt)) {
    visit_block(&self.body, &mut f);
  }

  /// every intrinsic whose definition is placed in the body, in program order
  pub fn placed_intrinsics(&self) -> Vec<(NodeHandle, RtIntrinsic)> {
    let mut result = Vec::new();
    self.for_each_stmt(|stmt| {
      if let Stmt::Node(node) = stmt {
        if let Some(intrinsic) = self.node(*node).expr.intrinsic() {
          result.push((*node, intrinsic));
        }
      }
    });
    result
  }

  pub fn uses_intrinsic(&self, predicate: impl Fn(RtIntrinsic) -> bool) -> bool {
    self
      .placed_intrinsics()
      .into_iter()
      .any(|(_, intrinsic)| predicate(intrinsic))
  }

  pub fn builder(&mut self) -> FunctionBuilder<'_> {
    FunctionBuilder::new(self)
  }
}
