use rand::{rngs::StdRng, Rng, SeedableRng};

use super::*;
use crate::*;

fn case(handle_index: u32) -> InlinedShaderCase {
  InlinedShaderCase {
    handle_index,
    stage_index: 0,
    any_hit: None,
  }
}

/// Every lane reads its selector from arg 0 and reports the case that ran in arg 1.
fn run_dispatch(
  cases: &[InlinedShaderCase],
  selectors: &[u32],
  can_have_null: bool,
  options: &CompileOptions,
) -> (Vec<u32>, usize) {
  let mut function = ShaderFunction::new("dispatch", RtStage::Traversal);
  let mut emitted = 0;
  {
    let mut b = function.builder();
    let none = b.imm_u32(u32::MAX);
    b.store_arg(1, none);
    let selector = b.load_arg(0, ValueType::U32);
    visit_inlined_shaders(
      &mut b,
      selector,
      can_have_null,
      cases,
      options,
      &mut |b: &mut FunctionBuilder, case: &InlinedShaderCase| {
        emitted += 1;
        let ran = b.imm_u32(case.handle_index);
        b.store_arg(1, ran);
        Ok(())
      },
    )
    .unwrap();
  }

  let mut wave = WaveState::new(selectors.len() as u32);
  for (lane, selector) in selectors.iter().enumerate() {
    wave.set_arg(lane, 0, *selector);
  }
  let mut memory = GlobalMemory::new();
  execute(&function, &mut wave, &mut memory, &ExecEnv::default()).unwrap();
  let ran = (0..selectors.len())
    .map(|lane| wave.arg(lane, 1).as_u32().unwrap())
    .collect();
  (ran, emitted)
}

fn linear_scan(cases: &[InlinedShaderCase], selector: u32) -> u32 {
  cases
    .iter()
    .find(|case| case.handle_index == selector)
    .map(|case| case.handle_index)
    .unwrap_or(u32::MAX)
}

#[test]
fn dispatcher_agrees_with_a_linear_scan_in_both_shapes() {
  let mut rng = StdRng::seed_from_u64(0x5EED_CA5E);

  for case_count in [1usize, 2, 3, 5, 8, 17, 33] {
    let mut handles: Vec<u32> = Vec::new();
    while handles.len() < case_count {
      let handle = rng.gen_range(1..200);
      if !handles.contains(&handle) {
        handles.push(handle);
      }
    }
    handles.sort_unstable();
    let cases: Vec<_> = handles.iter().copied().map(case).collect();

    // every case, its neighbours and null
    let mut selectors = vec![0];
    for handle in &handles {
      selectors.extend([*handle, handle - 1, handle + 1]);
    }
    selectors.truncate(64);

    let shapes = [
      options_for(64).with_bsearch_threshold(usize::MAX),
      options_for(64).with_bsearch_threshold(2),
      options_for(64).with_bsearch_threshold(4).with_null_check_threshold(1),
    ];
    for options in &shapes {
      for can_have_null in [false, true] {
        let (ran, emitted) = run_dispatch(&cases, &selectors, can_have_null, options);
        assert_eq!(emitted, cases.len(), "every case is emitted exactly once");
        for (lane, selector) in selectors.iter().enumerate() {
          assert_eq!(
            ran[lane],
            linear_scan(&cases, *selector),
            "selector {} with {} cases",
            selector,
            cases.len()
          );
        }
      }
    }
  }
}

#[test]
fn empty_case_set_emits_nothing() {
  let (ran, emitted) = run_dispatch(&[], &[0, 1, 2], true, &options_for(64));
  assert_eq!(emitted, 0);
  assert!(ran.iter().all(|r| *r == u32::MAX));
}

fn procedural_pipeline_sharing_any_hit(groups: u32) -> RayTracingPipeline {
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let any_hit = pipeline.add_stage(any_hit_shader(AnyHitBehavior::Accept));
  let closest_hit = pipeline.add_stage(closest_hit_shader(false));
  for i in 0..groups {
    let intersection = pipeline.add_stage(intersection_shader(&[(1. + i as f32, i)]));
    pipeline.add_group(ShaderGroupKind::ProceduralHit {
      intersection: Some(intersection),
      closest_hit: Some(closest_hit),
      any_hit: Some(any_hit),
    });
  }
  pipeline
}

#[test]
fn shared_any_hit_is_collected_once() {
  let pipeline = procedural_pipeline_sharing_any_hit(20);

  let any_hit_cases = collect_inlined_cases(&pipeline, CasePurpose::AnyHit);
  assert_eq!(any_hit_cases.len(), 1);
  assert_eq!(any_hit_cases[0].stage_index, 0);

  let intersection_cases = collect_inlined_cases(&pipeline, CasePurpose::Intersection);
  assert_eq!(intersection_cases.len(), 20);
  assert!(intersection_cases
    .windows(2)
    .all(|pair| pair[0].handle_index < pair[1].handle_index));
  assert!(intersection_cases.iter().all(|case| case.any_hit == Some(0)));

  let closest_hit_cases = collect_inlined_cases(&pipeline, CasePurpose::ClosestHit);
  assert_eq!(closest_hit_cases.len(), 1);
}

#[test]
fn miss_cases_only_come_from_miss_stages() {
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen_shader(TestRay::down_from([0.2, 0.2, 10.]), 8, 0., true));
  let miss = pipeline.add_stage(miss_shader(false));
  pipeline.add_group(ShaderGroupKind::General {
    general: Some(raygen),
  });
  pipeline.add_group(ShaderGroupKind::General { general: Some(miss) });
  pipeline.add_group(ShaderGroupKind::General { general: None });

  let cases = collect_inlined_cases(&pipeline, CasePurpose::Miss);
  assert_eq!(cases.len(), 1);
  assert_eq!(cases[0].stage_index, miss);
  assert_eq!(cases[0].handle_index, pipeline.groups[1].handle.general_index);
}

#[test]
fn intersection_handles_key_both_shaders() {
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let any_hit = pipeline.add_stage(any_hit_shader(AnyHitBehavior::Accept));
  let intersection = pipeline.add_stage(intersection_shader(&[(1., 0)]));
  let with_any_hit = pipeline.add_group(ShaderGroupKind::ProceduralHit {
    intersection: Some(intersection),
    closest_hit: None,
    any_hit: Some(any_hit),
  });
  let without_any_hit = pipeline.add_group(ShaderGroupKind::ProceduralHit {
    intersection: Some(intersection),
    closest_hit: None,
    any_hit: None,
  });

  let a = pipeline.groups[with_any_hit].handle.intersection_index;
  let b = pipeline.groups[without_any_hit].handle.intersection_index;
  assert_ne!(a, b);
  assert_eq!(collect_inlined_cases(&pipeline, CasePurpose::Intersection).len(), 2);
}

#[test]
fn procedural_group_without_intersection_is_rejected() {
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen_shader(TestRay::down_from([0.2, 0.2, 10.]), 8, 0., true));
  pipeline.add_group(ShaderGroupKind::General {
    general: Some(raygen),
  });
  pipeline.add_group(ShaderGroupKind::ProceduralHit {
    intersection: None,
    closest_hit: None,
    any_hit: None,
  });
  let error = compile_monolithic(&pipeline, raygen, &options_for(64)).unwrap_err();
  assert_eq!(error, RtCompileError::MissingIntersectionShader { group: 1 });
}
