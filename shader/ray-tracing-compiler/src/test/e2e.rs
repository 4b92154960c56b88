use super::*;
use crate::*;

const PAYLOAD_DWORDS: u32 = 16;
/// the raygen frame plus the return slot pushed by its trace ray
const CALLEE_STACK_BASE: u32 = PAYLOAD_DWORDS * 4 + 16;

struct SeparateScene {
  pipeline: RayTracingPipeline,
  raygen: u32,
  miss: u32,
  closest_hit: Option<u32>,
  sbt: SbtSetup,
}

fn separate_scene(ray: TestRay, lane_dx: f32, with_closest_hit: bool) -> SeparateScene {
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen_shader(ray, PAYLOAD_DWORDS, lane_dx, false));
  let miss = pipeline.add_stage(miss_shader(true));
  let closest_hit = with_closest_hit.then(|| pipeline.add_stage(closest_hit_shader(true)));
  let any_hit = pipeline.add_stage(any_hit_shader(AnyHitBehavior::Accept));

  let raygen_group = pipeline.add_group(ShaderGroupKind::General {
    general: Some(raygen),
  });
  let miss_group = pipeline.add_group(ShaderGroupKind::General { general: Some(miss) });
  let hit_group = pipeline.add_group(ShaderGroupKind::TrianglesHit {
    closest_hit,
    any_hit: Some(any_hit),
  });

  SeparateScene {
    pipeline,
    raygen,
    miss,
    closest_hit,
    sbt: SbtSetup {
      raygen: Some(raygen_group),
      miss: vec![Some(miss_group)],
      hit: vec![Some(hit_group)],
      callable: Vec::new(),
    },
  }
}

fn run_separate(scene: &SeparateScene, lanes: u32) -> (Vec<(u64, u32)>, GlobalMemory) {
  let options = options_for(64);
  let kernels = SeparateKernels::compile(
    &scene.pipeline,
    scene.raygen,
    vec![raygen_resume_shader(PAYLOAD_DWORDS)],
    &options,
  );
  let mut memory = GlobalMemory::new();
  // non opaque, so the inlined any hit shader runs
  write_accel_struct(&mut memory, &Bvh::Node(vec![Bvh::triangle_at(1., 5, 0)]));
  write_sbt(&mut memory, &scene.pipeline, &scene.sbt);
  let mut wave = new_wave(64, lanes);
  let trace = kernels.run(&mut wave, &mut memory);
  (trace, memory)
}

#[test]
fn divergent_wave_runs_hit_and_miss_kernels_in_turn() {
  // invocations 0 and 1 land on the triangle, 2 and 3 pass beside it
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let scene = separate_scene(ray, 0.5, true);
  let (trace, memory) = run_separate(&scene, 4);

  let closest_hit = scene.closest_hit.unwrap();
  assert_eq!(
    trace,
    vec![
      (TRAVERSAL_ADDRESS, CALLEE_STACK_BASE),
      (stage_address(closest_hit), CALLEE_STACK_BASE),
      (stage_address(scene.miss), CALLEE_STACK_BASE - 16),
      (resume_address(0), CALLEE_STACK_BASE - 16),
    ]
  );

  let vertices = [[0., 0., 1.], [1., 0., 1.], [0., 1., 1.]];
  for lane in 0..2 {
    let origin = [0.2 + lane as f32 * 0.5, 0.2, 10.];
    let (t, u, v, clockwise) = ray_triangle_intersect_cpu(vertices, origin, ray.direction, 0., 1000.).unwrap();
    let front = triangle_front_face_cpu(InstanceFlags::empty(), clockwise);

    assert_eq!(read_output(&memory, lane, 0), CLOSEST_HIT_MARK);
    assert_eq!(read_output(&memory, lane, 1), 5);
    assert_eq!(read_output_f32(&memory, lane, 2), t);
    assert_eq!(read_output(&memory, lane, 3), if front { 0xFE } else { 0xFF });
    // barycentrics travel from the traversal kernel through shared memory
    assert!((read_output_f32(&memory, lane, 4) - u).abs() < 1e-5);
    assert!((read_output_f32(&memory, lane, 5) - v).abs() < 1e-5);
    assert_eq!(read_output(&memory, lane, 6), 0);
    assert_eq!(read_output(&memory, lane, ANY_HIT_COUNT_SLOT), 1);
  }
  for lane in 2..4 {
    assert_eq!(read_output(&memory, lane, 0), MISS_MARK);
    assert_eq!(read_output_f32(&memory, lane, 2), 1000.);
    assert_eq!(read_output(&memory, lane, ANY_HIT_COUNT_SLOT), 0);
  }
}

#[test]
fn hit_group_without_closest_hit_returns_to_the_caller() {
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let scene = separate_scene(ray, 0., false);
  let (trace, memory) = run_separate(&scene, 2);

  assert_eq!(
    trace,
    vec![
      (TRAVERSAL_ADDRESS, CALLEE_STACK_BASE),
      (resume_address(0), CALLEE_STACK_BASE - 16),
    ]
  );
  for lane in 0..2 {
    assert_eq!(read_output(&memory, lane, 0), 0);
    assert_eq!(read_output(&memory, lane, ANY_HIT_COUNT_SLOT), 1);
  }
}

#[test]
fn skip_closest_hit_flag_returns_to_the_caller() {
  let ray = TestRay::down_from([0.2, 0.2, 10.]).with_flags(RayFlags::SKIP_CLOSEST_HIT_SHADER);
  let scene = separate_scene(ray, 0., true);
  let (trace, memory) = run_separate(&scene, 1);

  assert_eq!(trace.len(), 2);
  assert_eq!(trace[1].0, resume_address(0));
  assert_eq!(read_output(&memory, 0, 0), 0);
}

#[test]
fn stage_kernels_declare_their_shared_memory() {
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let scene = separate_scene(ray, 0., true);
  let options = options_for(32);

  let traversal = build_traversal_shader(&scene.pipeline, &options).unwrap();
  assert_eq!(traversal.stage, RtStage::Traversal);
  assert!(traversal.shared_size >= 32 * MAX_HIT_ATTRIB_DWORDS * 4);

  let closest_hit = compile_stage(&scene.pipeline, scene.closest_hit.unwrap(), &options).unwrap();
  assert_eq!(closest_hit.shared_size, 32 * MAX_HIT_ATTRIB_DWORDS * 4);

  let miss = compile_stage(&scene.pipeline, scene.miss, &options).unwrap();
  assert_eq!(miss.shared_size, 0);
}

#[test]
fn inlined_only_stages_are_not_compiled_alone() {
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let any_hit = pipeline.add_stage(any_hit_shader(AnyHitBehavior::Accept));
  let intersection = pipeline.add_stage(intersection_shader(&[(1., 0)]));
  let miss = pipeline.add_stage(miss_shader(false));
  let options = options_for(64);

  assert_eq!(
    compile_stage(&pipeline, any_hit, &options).unwrap_err(),
    RtCompileError::NotStandalone(RtStage::AnyHit)
  );
  assert_eq!(
    compile_stage(&pipeline, intersection, &options).unwrap_err(),
    RtCompileError::NotStandalone(RtStage::Intersection)
  );
  assert_eq!(
    compile_resume_shader(&pipeline, any_hit_shader(AnyHitBehavior::Ignore), &options).unwrap_err(),
    RtCompileError::NotStandalone(RtStage::AnyHit)
  );
  assert_eq!(
    compile_monolithic(&pipeline, miss, &options).unwrap_err(),
    RtCompileError::NotStandalone(RtStage::Miss)
  );
  assert_eq!(
    compile_stage(&pipeline, 7, &options).unwrap_err(),
    RtCompileError::InvalidStageIndex(7)
  );

  pipeline.add_stage(raygen_shader(ray, 4, 0., true));
  assert!(compile_monolithic(&pipeline, 3, &options).is_ok());
}

#[test]
fn monolithic_raygen_can_not_return_early() {
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let mut raygen = raygen_shader(ray, 4, 0., true);
  raygen.builder().intrinsic(RtIntrinsic::Return, &[]);

  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen);
  assert_eq!(
    compile_monolithic(&pipeline, raygen, &options_for(64)).unwrap_err(),
    RtCompileError::UnexpectedIntrinsic {
      intrinsic: RtIntrinsic::Return,
      stage: RtStage::RayGen,
    }
  );
}

#[test]
fn out_of_range_hit_attribute_is_rejected() {
  let mut closest_hit = ShaderFunction::new("closest_hit", RtStage::ClosestHit);
  {
    let mut b = closest_hit.builder();
    let attrib = b.intrinsic(
      RtIntrinsic::LoadHitAttrib {
        slot: MAX_HIT_ATTRIB_DWORDS,
      },
      &[],
    );
    store_payload(&mut b, 0, attrib);
  }
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let closest_hit = pipeline.add_stage(closest_hit);
  assert_eq!(
    compile_stage(&pipeline, closest_hit, &options_for(64)).unwrap_err(),
    RtCompileError::UnexpectedIntrinsic {
      intrinsic: RtIntrinsic::LoadHitAttrib {
        slot: MAX_HIT_ATTRIB_DWORDS
      },
      stage: RtStage::ClosestHit,
    }
  );
}

#[test]
fn unbound_inline_parameter_is_reported_as_unlinked() {
  assert_eq!(
    RtCompileError::from(IrError::MissingParameter { index: 2 }),
    RtCompileError::UnlinkedParameter { index: 2 }
  );
}
