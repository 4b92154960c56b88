use crate::*;

/// Appends statements to a [`ShaderFunction`] body.
///
/// Nested control flow is built with closures, the same way the device shader api does it:
/// `b.if_by(cond, |b| ..).else_by(|b| ..)`, `b.loop_by(|b| ..)`.
pub struct FunctionBuilder<'a> {
  function: &'a mut ShaderFunction,
  blocks: Vec<Block>,
}

impl<'a> Drop for FunctionBuilder<'a> {
  fn drop(&mut self) {
    if !self.blocks.is_empty() {
      self.function.body = self.blocks.swap_remove(0);
    }
  }
}

impl<'a> FunctionBuilder<'a> {
  /// continue building at the end of the existing body
  pub fn new(function: &'a mut ShaderFunction) -> Self {
    let root = std::mem::take(&mut function.body);
    Self {
      function,
      blocks: vec![root],
    }
  }

  pub fn function(&self) -> &ShaderFunction {
    self.function
  }

  pub fn function_mut(&mut self) -> &mut ShaderFunction {
    self.function
  }

  pub fn stage(&self) -> RtStage {
    self.function.stage
  }

  pub fn node_type(&self, node: NodeHandle) -> ValueType {
    self.function.node_type(node)
  }

  pub fn node_expr(&self, node: NodeHandle) -> &NodeExpr {
    &self.function.node(node).expr
  }

  /// change what an already placed node computes, the result type must stay the same
  pub fn replace_node(&mut self, node: NodeHandle, expr: NodeExpr) {
    debug_assert_eq!(self.function.infer_type(&expr), self.node_type(node));
    self.function.nodes[node.index()].expr = expr;
  }

  /// make an already placed node evaluate to `value`, which must be defined before it
  pub fn rebind(&mut self, node: NodeHandle, value: NodeHandle) {
    self.replace_node(node, NodeExpr::Alias(value));
  }

  pub fn push_block(&mut self) {
    self.blocks.push(Vec::new());
  }

  pub fn pop_block(&mut self) -> Block {
    // the root block is never popped through this path
    if self.blocks.len() > 1 {
      self.blocks.pop().unwrap_or_default()
    } else {
      Vec::new()
    }
  }

  fn current_block(&mut self) -> &mut Block {
    // blocks always contains the root
    let last = self.blocks.len() - 1;
    &mut self.blocks[last]
  }

  pub fn emit(&mut self, stmt: Stmt) {
    self.current_block().push(stmt);
  }

  /// allocate a node and place its definition at the current position
  pub fn make_expression(&mut self, expr: NodeExpr) -> NodeHandle {
    let node = self.function.alloc_node(expr);
    self.emit(Stmt::Node(node));
    node
  }

  pub fn make_local_var(&mut self, name: &'static str, ty: ValueType) -> VarHandle {
    self.function.declare_var(name, ty)
  }

  /// a var initialized with `value` at the current position
  pub fn make_local_var_init(&mut self, name: &'static str, value: NodeHandle) -> VarHandle {
    let var = self.make_local_var(name, self.node_type(value));
    self.store(var, value);
    var
  }

  pub fn load(&mut self, var: VarHandle) -> NodeHandle {
    self.make_expression(NodeExpr::LoadVar(var))
  }

  pub fn store(&mut self, var: VarHandle, value: NodeHandle) {
    self.emit(Stmt::StoreVar { var, value });
  }

  pub fn constant(&mut self, value: impl Into<Value>) -> NodeHandle {
    self.make_expression(NodeExpr::Const(value.into()))
  }

  pub fn imm_u32(&mut self, v: u32) -> NodeHandle {
    self.constant(v)
  }

  pub fn imm_u64(&mut self, v: u64) -> NodeHandle {
    self.constant(v)
  }

  pub fn imm_f32(&mut self, v: f32) -> NodeHandle {
    self.constant(v)
  }

  pub fn imm_bool(&mut self, v: bool) -> NodeHandle {
    self.constant(v)
  }

  pub fn undef(&mut self, ty: ValueType) -> NodeHandle {
    self.make_expression(NodeExpr::Undef(ty))
  }

  /// an integer constant with the same type as `like`
  pub fn imm_like(&mut self, like: NodeHandle, v: u64) -> NodeHandle {
    match self.node_type(like) {
      ValueType::U64 => self.imm_u64(v),
      _ => self.imm_u32(v as u32),
    }
  }

  pub fn binary(&mut self, op: BinaryOperator, left: NodeHandle, right: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::Binary { op, left, right })
  }

  pub fn unary(&mut self, op: UnaryOperator, value: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::Unary { op, value })
  }

  pub fn add(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Add, a, b)
  }
  pub fn sub(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Sub, a, b)
  }
  pub fn mul(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Mul, a, b)
  }
  pub fn div(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Div, a, b)
  }
  pub fn rem(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Rem, a, b)
  }
  pub fn and(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::And, a, b)
  }
  pub fn or(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Or, a, b)
  }
  pub fn xor(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Xor, a, b)
  }
  pub fn shl(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::ShiftLeft, a, b)
  }
  pub fn shr(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::ShiftRight, a, b)
  }
  pub fn equals(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Eq, a, b)
  }
  pub fn not_equals(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::NotEq, a, b)
  }
  pub fn less_than(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::LessThan, a, b)
  }
  pub fn less_equal_than(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::LessEqualThan, a, b)
  }
  pub fn greater_than(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::GreaterThan, a, b)
  }
  pub fn greater_equal_than(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::GreaterEqualThan, a, b)
  }
  pub fn min(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Min, a, b)
  }
  pub fn max(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Max, a, b)
  }
  pub fn dot(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Dot, a, b)
  }
  pub fn cross(&mut self, a: NodeHandle, b: NodeHandle) -> NodeHandle {
    self.binary(BinaryOperator::Cross, a, b)
  }

  pub fn add_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.add(a, v)
  }
  pub fn sub_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.sub(a, v)
  }
  pub fn mul_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.mul(a, v)
  }
  pub fn and_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.and(a, v)
  }
  pub fn or_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.or(a, v)
  }
  pub fn shl_imm(&mut self, a: NodeHandle, v: u32) -> NodeHandle {
    let v = self.imm_u32(v);
    self.shl(a, v)
  }
  pub fn shr_imm(&mut self, a: NodeHandle, v: u32) -> NodeHandle {
    let v = self.imm_u32(v);
    self.shr(a, v)
  }
  pub fn equals_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.equals(a, v)
  }
  pub fn not_equals_imm(&mut self, a: NodeHandle, v: u64) -> NodeHandle {
    let v = self.imm_like(a, v);
    self.not_equals(a, v)
  }
  /// `(a & mask) != 0`
  pub fn test_mask(&mut self, a: NodeHandle, mask: u64) -> NodeHandle {
    let masked = self.and_imm(a, mask);
    self.not_equals_imm(masked, 0)
  }

  pub fn not(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::Not, a)
  }
  pub fn neg(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::Neg, a)
  }
  pub fn abs(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::Abs, a)
  }
  pub fn u2u64(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::U32ToU64, a)
  }
  pub fn u2u32(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::U64ToU32, a)
  }
  pub fn u2f32(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::U32ToF32, a)
  }
  pub fn bitcast_u32(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::BitcastToU32, a)
  }
  pub fn bitcast_f32(&mut self, a: NodeHandle) -> NodeHandle {
    self.unary(UnaryOperator::BitcastToF32, a)
  }

  pub fn select(&mut self, condition: NodeHandle, accept: NodeHandle, reject: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::Select {
      condition,
      accept,
      reject,
    })
  }

  pub fn compose(&mut self, x: NodeHandle, y: NodeHandle, z: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::Compose([x, y, z]))
  }

  pub fn extract(&mut self, vector: NodeHandle, index: u32) -> NodeHandle {
    self.make_expression(NodeExpr::Extract { vector, index })
  }

  pub fn load_scratch(&mut self, base: ScratchBase, offset: NodeHandle, ty: ValueType) -> NodeHandle {
    self.make_expression(NodeExpr::LoadScratch { base, offset, ty })
  }

  pub fn store_scratch(&mut self, base: ScratchBase, offset: NodeHandle, value: NodeHandle) {
    self.emit(Stmt::StoreScratch {
      base,
      offset,
      value,
    });
  }

  pub fn load_global(&mut self, address: NodeHandle, ty: ValueType) -> NodeHandle {
    self.make_expression(NodeExpr::LoadGlobal { address, ty })
  }

  /// load from `address + offset`, address being u64
  pub fn load_global_at(&mut self, address: NodeHandle, offset: u64, ty: ValueType) -> NodeHandle {
    let address = self.add_imm(address, offset);
    self.load_global(address, ty)
  }

  pub fn store_global(&mut self, address: NodeHandle, value: NodeHandle) {
    self.emit(Stmt::StoreGlobal { address, value });
  }

  pub fn atomic_add_global(&mut self, address: NodeHandle, value: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::AtomicAddGlobal { address, value })
  }

  pub fn load_shared(&mut self, offset: NodeHandle, ty: ValueType) -> NodeHandle {
    self.make_expression(NodeExpr::LoadShared { offset, ty })
  }

  pub fn store_shared(&mut self, offset: NodeHandle, value: NodeHandle) {
    self.emit(Stmt::StoreShared { offset, value });
  }

  pub fn ballot(&mut self, condition: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::Ballot(condition))
  }

  pub fn find_lsb(&mut self, value: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::FindLsb(value))
  }

  pub fn read_invocation(&mut self, value: NodeHandle, invocation: NodeHandle) -> NodeHandle {
    self.make_expression(NodeExpr::ReadInvocation { value, invocation })
  }

  pub fn local_invocation_index(&mut self) -> NodeHandle {
    self.make_expression(NodeExpr::LocalInvocationIndex)
  }

  pub fn load_arg(&mut self, slot: u32, ty: ValueType) -> NodeHandle {
    self.make_expression(NodeExpr::LoadArg { slot, ty })
  }

  pub fn store_arg(&mut self, slot: u32, value: NodeHandle) {
    self.emit(Stmt::StoreArg { slot, value });
  }

  pub fn resume_shader_address(&mut self, call_idx: u32) -> NodeHandle {
    self.make_expression(NodeExpr::ResumeShaderAddress(call_idx))
  }

  pub fn param(&mut self, index: u32) -> NodeHandle {
    self.make_expression(NodeExpr::Param(index))
  }

  pub fn intrinsic(&mut self, intrinsic: RtIntrinsic, args: &[NodeHandle]) -> NodeHandle {
    debug_assert_eq!(intrinsic.operand_count(), args.len());
    self.make_expression(NodeExpr::Intrinsic {
      intrinsic,
      args: args.iter().copied().collect(),
    })
  }

  pub fn if_by(&mut self, condition: NodeHandle, logic: impl FnOnce(&mut Self)) -> ElseEmitter<'_, 'a> {
    self.push_block();
    logic(self);
    let accept = self.pop_block();
    self.emit(Stmt::If {
      condition,
      accept,
      reject: Vec::new(),
    });
    ElseEmitter { builder: self }
  }

  pub fn loop_by(&mut self, logic: impl FnOnce(&mut Self)) {
    self.push_block();
    logic(self);
    let body = self.pop_block();
    self.emit(Stmt::Loop { body });
  }

  /// build a region `logic` can leave early through [`Self::exit`]
  pub fn scope_by(&mut self, logic: impl FnOnce(&mut Self, ScopeHandle)) {
    let scope = self.function.new_scope();
    self.push_block();
    logic(self, scope);
    let body = self.pop_block();
    self.emit(Stmt::Scope { scope, body });
  }

  pub fn do_break(&mut self) {
    self.emit(Stmt::Break);
  }

  pub fn do_continue(&mut self) {
    self.emit(Stmt::Continue);
  }

  pub fn do_return(&mut self) {
    self.emit(Stmt::Return);
  }

  pub fn exit(&mut self, scope: ScopeHandle) {
    self.emit(Stmt::Exit(scope));
  }

  pub fn terminate(&mut self) {
    self.emit(Stmt::Terminate);
  }

  pub fn break_if(&mut self, condition: NodeHandle) {
    self.if_by(condition, |b| b.do_break());
  }
}

pub struct ElseEmitter<'b, 'a> {
  builder: &'b mut FunctionBuilder<'a>,
}

impl<'b, 'a> ElseEmitter<'b, 'a> {
  pub fn else_by(self, logic: impl FnOnce(&mut FunctionBuilder<'a>)) {
    self.builder.push_block();
    logic(self.builder);
    let block = self.builder.pop_block();
    if let Some(Stmt::If { reject, .. }) = self.builder.current_block().last_mut() {
      *reject = block;
    }
  }
}
