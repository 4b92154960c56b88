use crate::*;

/// Which shaders of the pipeline a dispatch site selects among.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasePurpose {
  AnyHit,
  Intersection,
  ClosestHit,
  Miss,
}

/// One shader a dispatch site may inline, keyed by the selector value the binding table
/// stores for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InlinedShaderCase {
  pub handle_index: u32,
  pub stage_index: u32,
  /// inlined into the intersection shader of an intersection case
  pub any_hit: Option<u32>,
}

impl InlinedShaderCase {
  /// the function this case inlines
  pub fn function(&self, pipeline: &RayTracingPipeline) -> Result<ShaderFunction, RtCompileError> {
    let stage = &pipeline.stage(self.stage_index)?.function;
    if stage.stage != RtStage::Intersection {
      return Ok(stage.clone());
    }
    let any_hit = match self.any_hit {
      Some(any_hit) => Some(&pipeline.stage(any_hit)?.function),
      None => None,
    };
    lower_intersection_shader(stage, any_hit)
  }
}

/// The distinct cases of `purpose`, sorted by selector.
pub fn collect_inlined_cases(pipeline: &RayTracingPipeline, purpose: CasePurpose) -> Vec<InlinedShaderCase> {
  let mut seen = FxHashSet::default();
  let mut cases = Vec::new();

  for group in &pipeline.groups {
    let case = match purpose {
      CasePurpose::AnyHit => group.any_hit().map(|stage_index| InlinedShaderCase {
        handle_index: group.handle.any_hit_index,
        stage_index,
        any_hit: None,
      }),
      CasePurpose::Intersection => group.intersection().map(|stage_index| InlinedShaderCase {
        handle_index: group.handle.intersection_index,
        stage_index,
        any_hit: group.any_hit(),
      }),
      CasePurpose::ClosestHit => group.closest_hit().map(|stage_index| InlinedShaderCase {
        handle_index: group.handle.closest_hit_index,
        stage_index,
        any_hit: None,
      }),
      CasePurpose::Miss => group
        .general()
        .filter(|&stage| {
          pipeline
            .stages
            .get(stage as usize)
            .map(|s| s.stage == RtStage::Miss)
            .unwrap_or(false)
        })
        .map(|stage_index| InlinedShaderCase {
          handle_index: group.handle.general_index,
          stage_index,
          any_hit: None,
        }),
    };

    if let Some(case) = case {
      if seen.insert(case.handle_index) {
        cases.push(case);
      }
    }
  }

  cases.sort_by_key(|case| case.handle_index);
  cases
}

pub type EmitCase<'e> = dyn FnMut(&mut FunctionBuilder, &InlinedShaderCase) -> Result<(), RtCompileError> + 'e;

/// Emit code that runs the case whose handle matches `selector`, nothing when none matches.
///
/// Small case sets are a chain of equality tests, large ones a binary search over the sorted
/// selectors. Large sets whose selector may be null check for it once up front.
pub fn visit_inlined_shaders(
  b: &mut FunctionBuilder,
  selector: NodeHandle,
  can_have_null: bool,
  cases: &[InlinedShaderCase],
  options: &CompileOptions,
  emit_case: &mut EmitCase,
) -> Result<(), RtCompileError> {
  if cases.is_empty() {
    return Ok(());
  }
  log::trace!("dispatch among {} inlined cases", cases.len());

  if can_have_null && cases.len() >= options.switch_null_check_threshold {
    let non_null = b.not_equals_imm(selector, 0);
    let mut result = Ok(());
    b.if_by(non_null, |b| {
      result = insert_inlined_range(b, selector, cases, options, emit_case);
    });
    result
  } else {
    insert_inlined_range(b, selector, cases, options, emit_case)
  }
}

pub fn insert_inlined_range(
  b: &mut FunctionBuilder,
  selector: NodeHandle,
  cases: &[InlinedShaderCase],
  options: &CompileOptions,
  emit_case: &mut EmitCase,
) -> Result<(), RtCompileError> {
  if cases.len() < options.inlined_shader_bsearch_threshold {
    for case in cases {
      let matches = b.equals_imm(selector, case.handle_index as u64);
      let mut result = Ok(());
      b.if_by(matches, |b| result = emit_case(b, case));
      result?;
    }
    return Ok(());
  }

  let (lower, upper) = cases.split_at(cases.len() / 2);
  let pivot = b.imm_like(selector, upper[0].handle_index as u64);
  let in_upper = b.greater_equal_than(selector, pivot);

  let mut upper_result = Ok(());
  let mut lower_result = Ok(());
  b.if_by(in_upper, |b| {
    upper_result = insert_inlined_range(b, selector, upper, options, emit_case);
  })
  .else_by(|b| {
    lower_result = insert_inlined_range(b, selector, lower, options, emit_case);
  });
  upper_result?;
  lower_result
}

/// Inline `case_function` at the current position, running on the caller's `vars`.
///
/// The case is lowered against a ray state of its own first, which is then bound field by
/// field to `vars`. With `hit_attribs` the case accesses hit attributes through those
/// registers. Returns the frame scratch the inlined code needs on top of the caller's.
pub fn insert_rt_case(
  b: &mut FunctionBuilder,
  ctx: &RtCompileCtx,
  vars: &RayStateVars,
  case_function: &ShaderFunction,
  hit_attribs: Option<&[VarHandle]>,
) -> Result<u32, RtCompileError> {
  log::trace!(
    "inline {} into {}",
    case_function.name,
    b.function().name
  );
  let mut clone = case_function.clone();

  let mut case_vars = RayStateVars::new(&mut clone.builder(), vars.flags, vars.monolithic);
  if vars.ahit_isec_count.is_some() {
    case_vars.track_history(&mut clone.builder());
  }

  let mut info = RtShaderInfo::default();
  lower_rt_instructions(&mut clone, &mut case_vars, false, &mut info)?;

  let mut remap = VarRemap::new(&clone);
  if let Some(registers) = hit_attribs {
    let case_registers: Vec<_> = registers
      .iter()
      .map(|_| clone.declare_var("hit_attrib", ValueType::U32))
      .collect();
    lower_hit_attribs(&mut clone, Some(&case_registers), ctx.options.wave_size)?;
    for (from, to) in case_registers.iter().zip(registers) {
      remap.insert(*from, *to);
    }
  }
  case_vars.map_onto(vars, &mut remap);

  inline_function(b, &clone, &[], &remap)?;
  Ok(clone.scratch_size)
}
