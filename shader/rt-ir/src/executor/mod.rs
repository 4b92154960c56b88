mod memory;
pub use memory::*;

use crate::*;

/// The observable state of one wave between kernel launches.
#[derive(Clone, Debug)]
pub struct WaveState {
  pub wave_size: u32,
  pub lanes: Vec<LaneState>,
  /// workgroup shared memory, one wave per workgroup
  pub shared: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct LaneState {
  pub alive: bool,
  /// kernel argument slots, unset slots read as zero
  pub args: Vec<Value>,
  pub scratch: Vec<u8>,
}

impl WaveState {
  pub fn new(wave_size: u32) -> Self {
    let lane = LaneState {
      alive: true,
      ..Default::default()
    };
    Self {
      wave_size,
      lanes: vec![lane; wave_size.min(64) as usize],
      shared: Vec::new(),
    }
  }

  pub fn set_arg(&mut self, lane: usize, slot: u32, value: impl Into<Value>) {
    let args = &mut self.lanes[lane].args;
    if args.len() <= slot as usize {
      args.resize(slot as usize + 1, Value::Unit);
    }
    args[slot as usize] = value.into();
  }

  pub fn arg(&self, lane: usize, slot: u32) -> Value {
    self.lanes[lane]
      .args
      .get(slot as usize)
      .copied()
      .unwrap_or(Value::Unit)
  }

  pub fn alive_mask(&self) -> u64 {
    self
      .lanes
      .iter()
      .enumerate()
      .filter(|(_, lane)| lane.alive)
      .fold(0, |mask, (i, _)| mask | (1 << i))
  }
}

/// What a single launch is linked against.
#[derive(Clone, Debug)]
pub struct ExecEnv {
  /// code address of each continuation, indexed by call site
  pub resume_addresses: Vec<u64>,
  /// values bound to function parameters
  pub params: Vec<Value>,
  /// upper bound of executed statements per launch
  pub step_limit: u64,
}

impl Default for ExecEnv {
  fn default() -> Self {
    Self {
      resume_addresses: Vec::new(),
      params: Vec::new(),
      step_limit: 1 << 22,
    }
  }
}

/// Run `function` once on every live lane of `wave` in lockstep.
///
/// Divergence is tracked per lane: a branch runs the lanes that took it, a loop runs until
/// every entering lane broke out, wave operations observe exactly the lanes executing them.
/// Global atomics are applied in lane order.
pub fn execute(
  function: &ShaderFunction,
  wave: &mut WaveState,
  memory: &mut GlobalMemory,
  env: &ExecEnv,
) -> Result<(), ExecError> {
  let lane_count = wave.lanes.len().min(wave.wave_size as usize).min(64);
  let mask = wave.alive_mask() & lane_mask(lane_count);

  let mut executor = Executor {
    function,
    wave,
    memory,
    env,
    values: (0..lane_count)
      .map(|_| function.nodes.iter().map(|n| n.ty.zeroed()).collect())
      .collect(),
    vars: (0..lane_count)
      .map(|_| function.vars.iter().map(|v| v.ty.zeroed()).collect())
      .collect(),
    flow: vec![Flow::Running; lane_count],
    steps: 0,
  };
  executor.exec_block(&function.body, mask)
}

fn lane_mask(count: usize) -> u64 {
  if count >= 64 {
    u64::MAX
  } else {
    (1 << count) - 1
  }
}

fn lanes(mask: u64) -> impl Iterator<Item = usize> {
  (0..64usize).filter(move |&i| mask & (1u64 << i) != 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
  Running,
  Break,
  Continue,
  Exit(ScopeHandle),
  Return,
  Terminated,
}

struct Executor<'a> {
  function: &'a ShaderFunction,
  wave: &'a mut WaveState,
  memory: &'a mut GlobalMemory,
  env: &'a ExecEnv,
  values: Vec<Vec<Value>>,
  vars: Vec<Vec<Value>>,
  flow: Vec<Flow>,
  steps: u64,
}

impl<'a> Executor<'a> {
  fn running(&self, mask: u64) -> u64 {
    lanes(mask)
      .filter(|&lane| self.flow[lane] == Flow::Running)
      .fold(0, |m, lane| m | (1 << lane))
  }

  fn resume(&mut self, mask: u64, from: Flow) {
    for lane in lanes(mask) {
      if self.flow[lane] == from {
        self.flow[lane] = Flow::Running;
      }
    }
  }

  fn set_flow(&mut self, mask: u64, flow: Flow) {
    for lane in lanes(mask) {
      self.flow[lane] = flow;
      if flow == Flow::Terminated {
        self.wave.lanes[lane].alive = false;
      }
    }
  }

  fn step(&mut self) -> Result<(), ExecError> {
    self.steps += 1;
    if self.steps > self.env.step_limit {
      return Err(ExecError::StepLimitExceeded(self.env.step_limit));
    }
    Ok(())
  }

  fn value(&self, lane: usize, node: NodeHandle) -> Value {
    self.values[lane][node.index()]
  }

  fn exec_block(&mut self, block: &'a [Stmt], mask: u64) -> Result<(), ExecError> {
    for stmt in block {
      let active = self.running(mask);
      if active == 0 {
        break;
      }
      self.step()?;

      match stmt {
        Stmt::Node(node) => self.eval_node(*node, active)?,
        Stmt::StoreVar { var, value } => {
          for lane in lanes(active) {
            self.vars[lane][var.index()] = self.value(lane, *value);
          }
        }
        Stmt::StoreScratch {
          base,
          offset,
          value,
        } => {
          if *base == ScratchBase::Frame {
            return Err(ExecError::FrameRelativeScratch);
          }
          for lane in lanes(active) {
            let offset = as_offset(self.value(lane, *offset))?;
            let value = self.value(lane, *value);
            write_local(&mut self.wave.lanes[lane].scratch, offset, value)?;
          }
        }
        Stmt::StoreGlobal { address, value } => {
          for lane in lanes(active) {
            let address = as_address(self.value(lane, *address))?;
            let value = self.value(lane, *value);
            self.memory.write_value(address, value);
          }
        }
        Stmt::StoreShared { offset, value } => {
          for lane in lanes(active) {
            let offset = as_offset(self.value(lane, *offset))?;
            let value = self.value(lane, *value);
            write_local(&mut self.wave.shared, offset, value)?;
          }
        }
        Stmt::StoreArg { slot, value } => {
          for lane in lanes(active) {
            let value = self.value(lane, *value);
            self.wave.set_arg(lane, *slot, value);
          }
        }
        Stmt::If {
          condition,
          accept,
          reject,
        } => {
          let mut accept_mask = 0;
          for lane in lanes(active) {
            if as_bool(self.value(lane, *condition))? {
              accept_mask |= 1 << lane;
            }
          }
          let reject_mask = active & !accept_mask;
          if accept_mask != 0 {
            self.exec_block(accept, accept_mask)?;
          }
          if reject_mask != 0 {
            self.exec_block(reject, reject_mask)?;
          }
        }
        Stmt::Loop { body } => {
          loop {
            let iteration = self.running(active);
            if iteration == 0 {
              break;
            }
            self.step()?;
            self.exec_block(body, iteration)?;
            self.resume(active, Flow::Continue);
          }
          self.resume(active, Flow::Break);
        }
        Stmt::Scope { scope, body } => {
          self.exec_block(body, active)?;
          self.resume(active, Flow::Exit(*scope));
        }
        Stmt::Break => self.set_flow(active, Flow::Break),
        Stmt::Continue => self.set_flow(active, Flow::Continue),
        Stmt::Exit(scope) => self.set_flow(active, Flow::Exit(*scope)),
        Stmt::Return => self.set_flow(active, Flow::Return),
        Stmt::Terminate => self.set_flow(active, Flow::Terminated),
      }
    }
    Ok(())
  }

  fn eval_node(&mut self, node: NodeHandle, active: u64) -> Result<(), ExecError> {
    let function = self.function;
    let expr = &function.node(node).expr;
    match expr {
      NodeExpr::Ballot(condition) => {
        let mut bits = 0u64;
        for lane in lanes(active) {
          if as_bool(self.value(lane, *condition))? {
            bits |= 1 << lane;
          }
        }
        for lane in lanes(active) {
          self.values[lane][node.index()] = Value::U64(bits);
        }
      }
      NodeExpr::ReadInvocation { value, invocation } => {
        for lane in lanes(active) {
          let source = as_u64(self.value(lane, *invocation))? as usize;
          let result = self
            .values
            .get(source)
            .map(|values| values[value.index()])
            .unwrap_or_else(|| self.function.node_type(*value).zeroed());
          self.values[lane][node.index()] = result;
        }
      }
      _ => {
        for lane in lanes(active) {
          let result = self.eval(lane, expr)?;
          self.values[lane][node.index()] = result;
        }
      }
    }
    Ok(())
  }

  fn eval(&mut self, lane: usize, expr: &NodeExpr) -> Result<Value, ExecError> {
    Ok(match expr {
      NodeExpr::Const(v) => *v,
      NodeExpr::Undef(ty) => ty.zeroed(),
      NodeExpr::Param(index) => *self
        .env
        .params
        .get(*index as usize)
        .ok_or(ExecError::UnboundParameter(*index))?,
      NodeExpr::Alias(value) => self.value(lane, *value),
      NodeExpr::LoadVar(var) => self.vars[lane][var.index()],
      NodeExpr::Binary { op, left, right } => {
        binary(*op, self.value(lane, *left), self.value(lane, *right))?
      }
      NodeExpr::Unary { op, value } => unary(*op, self.value(lane, *value))?,
      NodeExpr::Select {
        condition,
        accept,
        reject,
      } => {
        if as_bool(self.value(lane, *condition))? {
          self.value(lane, *accept)
        } else {
          self.value(lane, *reject)
        }
      }
      NodeExpr::Compose([x, y, z]) => {
        match (self.value(lane, *x), self.value(lane, *y), self.value(lane, *z)) {
          (Value::F32(x), Value::F32(y), Value::F32(z)) => Value::Vec3([x, y, z]),
          (Value::U32(x), Value::U32(y), Value::U32(z)) => Value::UVec3([x, y, z]),
          (x, y, _) => return Err(invalid("compose", x, y)),
        }
      }
      NodeExpr::Extract { vector, index } => {
        let i = *index as usize;
        match self.value(lane, *vector) {
          Value::Vec3(v) if i < 3 => Value::F32(v[i]),
          Value::UVec3(v) if i < 3 => Value::U32(v[i]),
          v => return Err(invalid("extract", v, Value::U32(*index))),
        }
      }
      NodeExpr::LoadScratch { base, offset, ty } => {
        if *base == ScratchBase::Frame {
          return Err(ExecError::FrameRelativeScratch);
        }
        let offset = as_offset(self.value(lane, *offset))?;
        read_local(&self.wave.lanes[lane].scratch, offset, *ty)?
      }
      NodeExpr::LoadGlobal { address, ty } => {
        let address = as_address(self.value(lane, *address))?;
        self.memory.read_value(address, *ty)
      }
      NodeExpr::LoadShared { offset, ty } => {
        let offset = as_offset(self.value(lane, *offset))?;
        read_local(&self.wave.shared, offset, *ty)?
      }
      NodeExpr::AtomicAddGlobal { address, value } => {
        let address = as_address(self.value(lane, *address))?;
        let value = self.value(lane, *value);
        let previous = self.memory.read_value(address, value.ty());
        self
          .memory
          .write_value(address, binary(BinaryOperator::Add, previous, value)?);
        previous
      }
      NodeExpr::FindLsb(value) => Value::U32(match self.value(lane, *value) {
        Value::U64(0) | Value::U32(0) => u32::MAX,
        Value::U64(v) => v.trailing_zeros(),
        Value::U32(v) => v.trailing_zeros(),
        v => return Err(invalid("find_lsb", v, Value::Unit)),
      }),
      NodeExpr::LocalInvocationIndex => Value::U32(lane as u32),
      NodeExpr::LoadArg { slot, ty } => match self.wave.arg(lane, *slot) {
        Value::Unit => ty.zeroed(),
        v if v.ty() == *ty => v,
        v if v.ty().byte_size() == ty.byte_size() => {
          let mut bytes = [0; 12];
          let bytes = &mut bytes[..ty.byte_size() as usize];
          v.write_bytes(bytes);
          Value::read_bytes(*ty, bytes)
        }
        v => return Err(invalid("load_arg", v, ty.zeroed())),
      },
      NodeExpr::ResumeShaderAddress(call_idx) => Value::U64(
        *self
          .env
          .resume_addresses
          .get(*call_idx as usize)
          .ok_or(ExecError::MissingResumeAddress(*call_idx))?,
      ),
      NodeExpr::Intrinsic { intrinsic, .. } => {
        return Err(ExecError::UnloweredIntrinsic(*intrinsic))
      }
      // wave operations are evaluated in eval_node
      NodeExpr::Ballot(_) | NodeExpr::ReadInvocation { .. } => self.function.infer_type(expr).zeroed(),
    })
  }
}

fn invalid(op: &'static str, left: Value, right: Value) -> ExecError {
  ExecError::InvalidOperands {
    op,
    left: left.ty(),
    right: right.ty(),
  }
}

fn as_bool(v: Value) -> Result<bool, ExecError> {
  v.as_bool().ok_or_else(|| invalid("condition", v, Value::Unit))
}

fn as_u64(v: Value) -> Result<u64, ExecError> {
  match v {
    Value::U32(v) => Ok(v as u64),
    Value::U64(v) => Ok(v),
    v => Err(invalid("index", v, Value::Unit)),
  }
}

fn as_offset(v: Value) -> Result<u64, ExecError> {
  as_u64(v)
}

fn as_address(v: Value) -> Result<u64, ExecError> {
  v.as_u64().ok_or_else(|| invalid("address", v, Value::Unit))
}

fn op_name(op: BinaryOperator) -> &'static str {
  match op {
    BinaryOperator::Add => "add",
    BinaryOperator::Sub => "sub",
    BinaryOperator::Mul => "mul",
    BinaryOperator::Div => "div",
    BinaryOperator::Rem => "rem",
    BinaryOperator::And => "and",
    BinaryOperator::Or => "or",
    BinaryOperator::Xor => "xor",
    BinaryOperator::ShiftLeft => "shl",
    BinaryOperator::ShiftRight => "shr",
    BinaryOperator::Eq => "eq",
    BinaryOperator::NotEq => "not_eq",
    BinaryOperator::LessThan => "less_than",
    BinaryOperator::LessEqualThan => "less_equal_than",
    BinaryOperator::GreaterThan => "greater_than",
    BinaryOperator::GreaterEqualThan => "greater_equal_than",
    BinaryOperator::Min => "min",
    BinaryOperator::Max => "max",
    BinaryOperator::Dot => "dot",
    BinaryOperator::Cross => "cross",
  }
}

macro_rules! int_binary {
  ($op: expr, $a: expr, $b: expr, $variant: path) => {{
    let (a, b) = ($a, $b);
    Some(match $op {
      BinaryOperator::Add => $variant(a.wrapping_add(b)),
      BinaryOperator::Sub => $variant(a.wrapping_sub(b)),
      BinaryOperator::Mul => $variant(a.wrapping_mul(b)),
      BinaryOperator::Div => $variant(a.checked_div(b).unwrap_or(0)),
      BinaryOperator::Rem => $variant(a.checked_rem(b).unwrap_or(0)),
      BinaryOperator::And => $variant(a & b),
      BinaryOperator::Or => $variant(a | b),
      BinaryOperator::Xor => $variant(a ^ b),
      BinaryOperator::ShiftLeft => $variant(a.wrapping_shl(b as u32)),
      BinaryOperator::ShiftRight => $variant(a.wrapping_shr(b as u32)),
      BinaryOperator::Eq => Value::Bool(a == b),
      BinaryOperator::NotEq => Value::Bool(a != b),
      BinaryOperator::LessThan => Value::Bool(a < b),
      BinaryOperator::LessEqualThan => Value::Bool(a <= b),
      BinaryOperator::GreaterThan => Value::Bool(a > b),
      BinaryOperator::GreaterEqualThan => Value::Bool(a >= b),
      BinaryOperator::Min => $variant(a.min(b)),
      BinaryOperator::Max => $variant(a.max(b)),
      BinaryOperator::Dot | BinaryOperator::Cross => return None,
    })
  }};
}

fn u32_binary(op: BinaryOperator, a: u32, b: u32) -> Option<Value> {
  int_binary!(op, a, b, Value::U32)
}

fn u64_binary(op: BinaryOperator, a: u64, b: u64) -> Option<Value> {
  int_binary!(op, a, b, Value::U64)
}

fn f32_binary(op: BinaryOperator, a: f32, b: f32) -> Option<Value> {
  Some(match op {
    BinaryOperator::Add => Value::F32(a + b),
    BinaryOperator::Sub => Value::F32(a - b),
    BinaryOperator::Mul => Value::F32(a * b),
    BinaryOperator::Div => Value::F32(a / b),
    BinaryOperator::Rem => Value::F32(a % b),
    BinaryOperator::Eq => Value::Bool(a == b),
    BinaryOperator::NotEq => Value::Bool(a != b),
    BinaryOperator::LessThan => Value::Bool(a < b),
    BinaryOperator::LessEqualThan => Value::Bool(a <= b),
    BinaryOperator::GreaterThan => Value::Bool(a > b),
    BinaryOperator::GreaterEqualThan => Value::Bool(a >= b),
    BinaryOperator::Min => Value::F32(a.min(b)),
    BinaryOperator::Max => Value::F32(a.max(b)),
    _ => return None,
  })
}

fn componentwise<T: Copy>(
  a: [T; 3],
  b: [T; 3],
  f: impl Fn(T, T) -> Option<Value>,
) -> Option<[Value; 3]> {
  Some([f(a[0], b[0])?, f(a[1], b[1])?, f(a[2], b[2])?])
}

fn vec3_binary(op: BinaryOperator, a: [f32; 3], b: [f32; 3]) -> Option<Value> {
  match op {
    BinaryOperator::Dot => Some(Value::F32(a[0] * b[0] + a[1] * b[1] + a[2] * b[2])),
    BinaryOperator::Cross => Some(Value::Vec3([
      a[1] * b[2] - a[2] * b[1],
      a[2] * b[0] - a[0] * b[2],
      a[0] * b[1] - a[1] * b[0],
    ])),
    op if op.is_comparison() => None,
    op => {
      let c = componentwise(a, b, |a, b| f32_binary(op, a, b))?;
      Some(Value::Vec3([c[0].as_f32()?, c[1].as_f32()?, c[2].as_f32()?]))
    }
  }
}

fn uvec3_binary(op: BinaryOperator, a: [u32; 3], b: [u32; 3]) -> Option<Value> {
  if op.is_comparison() {
    return None;
  }
  let c = componentwise(a, b, |a, b| u32_binary(op, a, b))?;
  Some(Value::UVec3([c[0].as_u32()?, c[1].as_u32()?, c[2].as_u32()?]))
}

fn binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, ExecError> {
  let shift = matches!(op, BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight);
  let result = match (left, right) {
    (Value::U32(a), Value::U32(b)) => u32_binary(op, a, b),
    (Value::U64(a), Value::U64(b)) => u64_binary(op, a, b),
    (Value::U64(a), Value::U32(b)) if shift => u64_binary(op, a, b as u64),
    (Value::F32(a), Value::F32(b)) => f32_binary(op, a, b),
    (Value::Bool(a), Value::Bool(b)) => match op {
      BinaryOperator::And => Some(Value::Bool(a && b)),
      BinaryOperator::Or => Some(Value::Bool(a || b)),
      BinaryOperator::Xor | BinaryOperator::NotEq => Some(Value::Bool(a != b)),
      BinaryOperator::Eq => Some(Value::Bool(a == b)),
      _ => None,
    },
    (Value::Vec3(a), Value::Vec3(b)) => vec3_binary(op, a, b),
    (Value::Vec3(a), Value::F32(b)) => match op {
      BinaryOperator::Add | BinaryOperator::Sub | BinaryOperator::Mul | BinaryOperator::Div => {
        vec3_binary(op, a, [b; 3])
      }
      _ => None,
    },
    (Value::UVec3(a), Value::UVec3(b)) => uvec3_binary(op, a, b),
    _ => None,
  };
  result.ok_or_else(|| ExecError::InvalidOperands {
    op: op_name(op),
    left: left.ty(),
    right: right.ty(),
  })
}

fn unary(op: UnaryOperator, value: Value) -> Result<Value, ExecError> {
  let result = match (op, value) {
    (UnaryOperator::Not, Value::Bool(v)) => Some(Value::Bool(!v)),
    (UnaryOperator::Not, Value::U32(v)) => Some(Value::U32(!v)),
    (UnaryOperator::Not, Value::U64(v)) => Some(Value::U64(!v)),
    (UnaryOperator::Neg, Value::F32(v)) => Some(Value::F32(-v)),
    (UnaryOperator::Neg, Value::Vec3(v)) => Some(Value::Vec3([-v[0], -v[1], -v[2]])),
    (UnaryOperator::Neg, Value::U32(v)) => Some(Value::U32(v.wrapping_neg())),
    (UnaryOperator::Abs, Value::F32(v)) => Some(Value::F32(v.abs())),
    (UnaryOperator::Abs, Value::Vec3(v)) => Some(Value::Vec3([v[0].abs(), v[1].abs(), v[2].abs()])),
    (UnaryOperator::U32ToU64, Value::U32(v)) => Some(Value::U64(v as u64)),
    (UnaryOperator::U64ToU32, Value::U64(v)) => Some(Value::U32(v as u32)),
    (UnaryOperator::U32ToF32, Value::U32(v)) => Some(Value::F32(v as f32)),
    (UnaryOperator::BitcastToU32, Value::F32(v)) => Some(Value::U32(v.to_bits())),
    (UnaryOperator::BitcastToU32, Value::U32(v)) => Some(Value::U32(v)),
    (UnaryOperator::BitcastToF32, Value::U32(v)) => Some(Value::F32(f32::from_bits(v))),
    (UnaryOperator::BitcastToF32, Value::F32(v)) => Some(Value::F32(v)),
    _ => None,
  };
  result.ok_or_else(|| invalid("unary", value, Value::Unit))
}
