use crate::*;

const PARAM_HIT_T: u32 = 1;
const PARAM_HIT_KIND: u32 = 2;
const PARAM_SCRATCH_BIAS: u32 = 3;

/// An any hit shader turned into a callee an intersection shader can inline.
pub struct IntersectionAnyHit {
  pub function: ShaderFunction,
  /// cleared when the candidate is ignored, bound to the caller's commit var when inlining
  pub commit: VarHandle,
}

/// Prepare `any_hit` to be inlined into an intersection shader.
///
/// The result takes `(commit, hit_t, hit_kind, scratch_bias)` params. The candidate t and
/// kind stand in for the ray tmax and hit kind, and the any hit frame is placed `scratch_bias`
/// bytes after the intersection frame.
pub fn lower_any_hit_for_intersection(any_hit: &ShaderFunction) -> Result<IntersectionAnyHit, RtCompileError> {
  let mut function = any_hit.clone();
  function.params.clear();
  function.push_param(ValueType::Bool);
  function.push_param(ValueType::F32);
  function.push_param(ValueType::U32);
  function.push_param(ValueType::U32);

  let commit = function.declare_var("ray_commit", ValueType::Bool);
  run_instruction_pass(&mut function, &mut AnyHitForIntersection { commit })?;
  Ok(IntersectionAnyHit { function, commit })
}

struct AnyHitForIntersection {
  commit: VarHandle,
}

impl AnyHitForIntersection {
  fn biased(&self, b: &mut FunctionBuilder, offset: NodeHandle) -> NodeHandle {
    let bias = b.param(PARAM_SCRATCH_BIAS);
    b.add(bias, offset)
  }
}

impl InstructionPass for AnyHitForIntersection {
  type Error = RtCompileError;

  fn visit_node(&mut self, b: &mut FunctionBuilder, node: NodeHandle) -> Result<NodeAction, Self::Error> {
    match *b.node_expr(node) {
      NodeExpr::Intrinsic { intrinsic, .. } => match intrinsic {
        RtIntrinsic::IgnoreIntersection => {
          let no = b.imm_bool(false);
          b.store(self.commit, no);
          b.do_return();
          Ok(NodeAction::Remove)
        }
        RtIntrinsic::RayTMax => {
          let t = b.param(PARAM_HIT_T);
          b.rebind(node, t);
          Ok(NodeAction::Keep)
        }
        RtIntrinsic::HitKind => {
          let kind = b.param(PARAM_HIT_KIND);
          b.rebind(node, kind);
          Ok(NodeAction::Keep)
        }
        RtIntrinsic::RtArgScratchOffset => {
          let arg = b.intrinsic(RtIntrinsic::RtArgScratchOffset, &[]);
          let bias = b.param(PARAM_SCRATCH_BIAS);
          let arg = b.sub(arg, bias);
          b.rebind(node, arg);
          Ok(NodeAction::Keep)
        }
        // the regular lowering of terminate ray works inside intersection shaders
        _ => Ok(NodeAction::Keep),
      },
      NodeExpr::LoadScratch {
        base: ScratchBase::Frame,
        offset,
        ty,
      } => {
        let offset = self.biased(b, offset);
        b.replace_node(
          node,
          NodeExpr::LoadScratch {
            base: ScratchBase::Frame,
            offset,
            ty,
          },
        );
        Ok(NodeAction::Keep)
      }
      _ => Ok(NodeAction::Keep),
    }
  }

  fn visit_stmt(&mut self, b: &mut FunctionBuilder, stmt: Stmt) -> Result<Option<Stmt>, Self::Error> {
    Ok(Some(match stmt {
      Stmt::StoreScratch {
        base: ScratchBase::Frame,
        offset,
        value,
      } => Stmt::StoreScratch {
        base: ScratchBase::Frame,
        offset: self.biased(b, offset),
        value,
      },
      Stmt::Terminate => Stmt::Return,
      stmt => stmt,
    }))
  }
}

/// Inline `any_hit` into every `ReportIntersection` of `intersection`.
///
/// A report is only forwarded when the candidate t lies in the ray interval and, unless the
/// candidate is opaque, the any hit shader did not ignore it. The report evaluates to whether
/// it was forwarded.
pub fn lower_intersection_shader(
  intersection: &ShaderFunction,
  any_hit: Option<&ShaderFunction>,
) -> Result<ShaderFunction, RtCompileError> {
  let any_hit = any_hit.map(lower_any_hit_for_intersection).transpose()?;
  let mut function = intersection.clone();
  if let Some(any_hit) = &any_hit {
    function.scratch_size = intersection.scratch_size + any_hit.function.scratch_size;
  }

  let mut pass = InlineAnyHit {
    any_hit: any_hit.as_ref(),
    intersection_scratch: intersection.scratch_size,
  };
  run_instruction_pass(&mut function, &mut pass)?;
  Ok(function)
}

struct InlineAnyHit<'a> {
  any_hit: Option<&'a IntersectionAnyHit>,
  intersection_scratch: u32,
}

impl<'a> InstructionPass for InlineAnyHit<'a> {
  type Error = RtCompileError;

  fn visit_node(&mut self, b: &mut FunctionBuilder, node: NodeHandle) -> Result<NodeAction, Self::Error> {
    let (t, kind) = match b.node_expr(node) {
      NodeExpr::Intrinsic {
        intrinsic: RtIntrinsic::ReportIntersection,
        args,
      } => (args[0], args[1]),
      _ => return Ok(NodeAction::Keep),
    };

    let no = b.imm_bool(false);
    let commit_tmp = b.make_local_var_init("commit_tmp", no);

    let tmin = b.intrinsic(RtIntrinsic::RayTMin, &[]);
    let tmax = b.intrinsic(RtIntrinsic::RayTMax, &[]);
    let above_min = b.greater_equal_than(t, tmin);
    let below_max = b.greater_equal_than(tmax, t);
    let in_range = b.and(above_min, below_max);

    let any_hit = self.any_hit;
    let bias = self.intersection_scratch;
    let mut result = Ok(());
    b.if_by(in_range, |b| {
      let yes = b.imm_bool(true);
      b.store(commit_tmp, yes);

      if let Some(any_hit) = any_hit {
        let opaque = b.intrinsic(RtIntrinsic::IntersectionOpaque, &[]);
        let non_opaque = b.not(opaque);
        b.if_by(non_opaque, |b| {
          let mut remap = VarRemap::new(&any_hit.function);
          remap.insert(any_hit.commit, commit_tmp);
          let commit = b.load(commit_tmp);
          let bias = b.imm_u32(bias);
          result = inline_function(b, &any_hit.function, &[commit, t, kind, bias], &remap)
            .map_err(RtCompileError::from);
        });
      }

      let commit = b.load(commit_tmp);
      b.if_by(commit, |b| {
        b.intrinsic(RtIntrinsic::ReportIntersection, &[t, kind]);
      });
    });
    result?;

    let accepted = b.load(commit_tmp);
    b.rebind(node, accepted);
    Ok(NodeAction::Keep)
  }
}
