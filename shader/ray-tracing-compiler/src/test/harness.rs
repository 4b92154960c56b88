use rustc_hash::FxHashMap;

use crate::*;

pub const SBT_DESCRIPTORS: u64 = 0x1000;
pub const RAYGEN_TABLE: u64 = 0x2000;
pub const MISS_TABLE: u64 = 0x3000;
pub const HIT_TABLE: u64 = 0x4000;
pub const CALLABLE_TABLE: u64 = 0x5000;
pub const SBT_RECORD_STRIDE: u64 = 64;

pub const ACCEL_STRUCT: u64 = 0x10_0000;
pub const BOTTOM_LEVEL_BASE: u64 = 0x20_0000;
pub const OUTPUT: u64 = 0x40_0000;
pub const OUTPUT_LANE_STRIDE: u64 = 256;

pub const TRAVERSAL_ADDRESS: u64 = 0x100;
pub const RESUME_ADDRESS_BASE: u64 = 0x1_0000;
pub const STAGE_ADDRESS_BASE: u64 = 0x2_0000;

/// closest hit and miss shaders write these into the first payload dword
pub const CLOSEST_HIT_MARK: u32 = 0xC4;
pub const MISS_MARK: u32 = 0x3155;
/// payload dword counting any hit invocations, the log of primitive ids follows it
pub const ANY_HIT_COUNT_SLOT: u64 = 8;

pub fn stage_address(stage_index: u32) -> u64 {
  STAGE_ADDRESS_BASE + stage_index as u64 * 0x100
}

pub fn resume_address(call_idx: u32) -> u64 {
  RESUME_ADDRESS_BASE + call_idx as u64 * 0x100
}

/// A bvh as the tests describe it. Box nodes are built from their children.
#[derive(Clone, Debug)]
pub enum Bvh {
  Node(Vec<Bvh>),
  Triangle {
    vertices: [[f32; 3]; 3],
    primitive_id: u32,
    geometry_id_and_flags: u32,
  },
  Aabb {
    min: [f32; 3],
    max: [f32; 3],
    primitive_id: u32,
    geometry_id_and_flags: u32,
  },
  Instance {
    bottom_bvh_base: u64,
    instance_id: u32,
    custom_index_and_mask: u32,
    sbt_offset_and_flags: u32,
    /// translation from object to world space
    translation: [f32; 3],
    world_min: [f32; 3],
    world_max: [f32; 3],
  },
}

impl Bvh {
  /// unit right triangle in the xy plane at height `z`
  pub fn triangle_at(z: f32, primitive_id: u32, geometry_id_and_flags: u32) -> Self {
    Bvh::Triangle {
      vertices: [[0., 0., z], [1., 0., z], [0., 1., z]],
      primitive_id,
      geometry_id_and_flags,
    }
  }

  pub fn leaves_in_order(&self) -> Vec<u32> {
    let mut out = Vec::new();
    self.collect_leaves(&mut out);
    out
  }

  fn collect_leaves(&self, out: &mut Vec<u32>) {
    match self {
      Bvh::Node(children) => children.iter().for_each(|c| c.collect_leaves(out)),
      Bvh::Triangle { primitive_id, .. } | Bvh::Aabb { primitive_id, .. } => out.push(*primitive_id),
      Bvh::Instance { instance_id, .. } => out.push(*instance_id),
    }
  }
}

fn translation_matrix(t: [f32; 3]) -> [[f32; 4]; 3] {
  [
    [1., 0., 0., t[0]],
    [0., 1., 0., t[1]],
    [0., 0., 1., t[2]],
  ]
}

#[derive(Default)]
pub struct BvhWriter {
  bytes: Vec<u8>,
}

impl BvhWriter {
  fn alloc(&mut self, slots: usize) -> u32 {
    let slot = self.bytes.len() as u64 / BVH_NODE_SLOT_SIZE;
    self
      .bytes
      .resize(self.bytes.len() + slots * BVH_NODE_SLOT_SIZE as usize, 0);
    slot as u32
  }

  fn put<T: Pod>(&mut self, slot: u32, node: &T) {
    let start = slot as usize * BVH_NODE_SLOT_SIZE as usize;
    let data = bytes_of(node);
    self.bytes[start..start + data.len()].copy_from_slice(data);
  }

  /// returns the node id and bounds
  fn write(&mut self, tree: &Bvh, parent: u32) -> (u32, [f32; 3], [f32; 3]) {
    match tree {
      Bvh::Node(children) => {
        assert!(!children.is_empty() && children.len() <= 2);
        let slot = self.alloc(1);
        let id = bvh_node_id(slot, BVH_NODE_BOX);
        let mut node = BvhBoxNode {
          parent,
          children: [BVH_INVALID_NODE; 2],
          padding: 0,
          bounds: [[0.; 3]; 4],
        };
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for (i, child) in children.iter().enumerate() {
          let (child_id, child_min, child_max) = self.write(child, id);
          node.children[i] = child_id;
          node.bounds[i * 2] = child_min;
          node.bounds[i * 2 + 1] = child_max;
          for k in 0..3 {
            min[k] = min[k].min(child_min[k]);
            max[k] = max[k].max(child_max[k]);
          }
        }
        self.put(slot, &node);
        (id, min, max)
      }
      Bvh::Triangle {
        vertices,
        primitive_id,
        geometry_id_and_flags,
      } => {
        let slot = self.alloc(1);
        self.put(
          slot,
          &BvhTriangleNode {
            parent,
            primitive_id: *primitive_id,
            geometry_id_and_flags: *geometry_id_and_flags,
            padding: 0,
            vertices: *vertices,
            padding2: [0; 3],
          },
        );
        let mut min = vertices[0];
        let mut max = vertices[0];
        for v in vertices {
          for k in 0..3 {
            min[k] = min[k].min(v[k]);
            max[k] = max[k].max(v[k]);
          }
        }
        (bvh_node_id(slot, BVH_NODE_TRIANGLE), min, max)
      }
      Bvh::Aabb {
        min,
        max,
        primitive_id,
        geometry_id_and_flags,
      } => {
        let slot = self.alloc(1);
        self.put(
          slot,
          &BvhAabbNode {
            parent,
            primitive_id: *primitive_id,
            geometry_id_and_flags: *geometry_id_and_flags,
            padding: 0,
            min: *min,
            max: *max,
            padding2: [0; 6],
          },
        );
        (bvh_node_id(slot, BVH_NODE_AABB), *min, *max)
      }
      Bvh::Instance {
        bottom_bvh_base,
        instance_id,
        custom_index_and_mask,
        sbt_offset_and_flags,
        translation,
        world_min,
        world_max,
      } => {
        let slot = self.alloc(2);
        let [x, y, z] = *translation;
        self.put(
          slot,
          &BvhInstanceNode {
            parent,
            instance_id: *instance_id,
            custom_index_and_mask: *custom_index_and_mask,
            sbt_offset_and_flags: *sbt_offset_and_flags,
            bottom_bvh_base: *bottom_bvh_base,
            world_to_object: translation_matrix([-x, -y, -z]),
            object_to_world: translation_matrix(*translation),
            padding: [0; 2],
          },
        );
        (bvh_node_id(slot, BVH_NODE_INSTANCE), *world_min, *world_max)
      }
    }
  }
}

/// Write the node array of `tree` to `base`. The root has to be a box node.
pub fn write_bvh(memory: &mut GlobalMemory, base: u64, tree: &Bvh) {
  assert!(matches!(tree, Bvh::Node(_)));
  let mut writer = BvhWriter::default();
  let (root, _, _) = writer.write(tree, BVH_INVALID_NODE);
  assert_eq!(root, BVH_ROOT_NODE);
  memory.write_bytes(base, &writer.bytes);
}

/// The acceleration structure at [`ACCEL_STRUCT`], nodes right after the header slot.
pub fn write_accel_struct(memory: &mut GlobalMemory, tree: &Bvh) {
  let header = AccelStructHeader {
    bvh_offset: BVH_NODE_SLOT_SIZE as u32,
    reserved: [0; 3],
  };
  memory.write(ACCEL_STRUCT, &header);
  write_bvh(memory, ACCEL_STRUCT + BVH_NODE_SLOT_SIZE, tree);
}

/// Which groups each binding table record refers to, `None` is a zeroed record.
#[derive(Default)]
pub struct SbtSetup {
  pub raygen: Option<usize>,
  pub miss: Vec<Option<usize>>,
  pub hit: Vec<Option<usize>>,
  pub callable: Vec<Option<usize>>,
}

/// the address the stage kernel of a general or closest hit stage is reached by
fn group_shader_address(pipeline: &RayTracingPipeline, group: &ShaderGroup) -> u64 {
  group
    .general()
    .or_else(|| group.closest_hit())
    .map(|stage| stage_address(stage) | priority(pipeline.stages[stage as usize].stage))
    .unwrap_or(0)
}

pub fn write_sbt(memory: &mut GlobalMemory, pipeline: &RayTracingPipeline, setup: &SbtSetup) {
  let table_size = |records: usize| records as u64 * SBT_RECORD_STRIDE;
  memory.write(
    SBT_DESCRIPTORS,
    &TraceRaysCommand {
      raygen_address: RAYGEN_TABLE,
      raygen_size: SBT_RECORD_STRIDE,
      miss_address: MISS_TABLE,
      miss_size: table_size(setup.miss.len()),
      miss_stride: SBT_RECORD_STRIDE,
      hit_address: HIT_TABLE,
      hit_size: table_size(setup.hit.len()),
      hit_stride: SBT_RECORD_STRIDE,
      callable_address: CALLABLE_TABLE,
      callable_size: table_size(setup.callable.len()),
      callable_stride: SBT_RECORD_STRIDE,
      ..Default::default()
    },
  );

  let mut write_table = |table: u64, records: &[Option<usize>]| {
    for (i, group) in records.iter().enumerate() {
      let record = match group {
        Some(group) => {
          let group = &pipeline.groups[*group];
          group.handle_record(group_shader_address(pipeline, group))
        }
        None => ShaderGroupHandleRecord::default(),
      };
      memory.write(table + i as u64 * SBT_RECORD_STRIDE, &record);
    }
  };
  write_table(RAYGEN_TABLE, &setup.raygen.into_iter().map(Some).collect::<Vec<_>>());
  write_table(MISS_TABLE, &setup.miss);
  write_table(HIT_TABLE, &setup.hit);
  write_table(CALLABLE_TABLE, &setup.callable);
}

/// A wave with `lanes` live invocations, launched as a `lanes x 1 x 1` grid.
pub fn new_wave(wave_size: u32, lanes: u32) -> WaveState {
  let mut wave = WaveState::new(wave_size);
  for lane in 0..wave_size as usize {
    wave.set_arg(lane, RtArg::LaunchId(0).slot(), lane as u32);
    wave.set_arg(lane, RtArg::LaunchId(1).slot(), 0u32);
    wave.set_arg(lane, RtArg::LaunchId(2).slot(), 0u32);
    wave.set_arg(lane, RtArg::LaunchSize(0).slot(), lanes);
    wave.set_arg(lane, RtArg::LaunchSize(1).slot(), 1u32);
    wave.set_arg(lane, RtArg::LaunchSize(2).slot(), 1u32);
    wave.set_arg(lane, RtArg::SbtDescriptors.slot(), SBT_DESCRIPTORS);
    wave.set_arg(
      lane,
      RtArg::TraversalShaderAddr.slot(),
      TRAVERSAL_ADDRESS | RT_PRIORITY_TRAVERSAL,
    );
    wave.lanes[lane].alive = (lane as u32) < lanes;
  }
  wave
}

pub fn read_output(memory: &GlobalMemory, lane: usize, slot: u64) -> u32 {
  memory.read::<u32>(OUTPUT + lane as u64 * OUTPUT_LANE_STRIDE + slot * 4)
}

pub fn read_output_f32(memory: &GlobalMemory, lane: usize, slot: u64) -> f32 {
  f32::from_bits(read_output(memory, lane, slot))
}

pub fn run_monolithic(kernel: &CompiledKernel, wave: &mut WaveState, memory: &mut GlobalMemory) {
  assert_eq!(kernel.stage, RtStage::RayGen);
  execute(&kernel.function, wave, memory, &ExecEnv::default()).unwrap();
  assert_eq!(wave.alive_mask(), 0, "every invocation ends in the monolithic kernel");
}

/// The stage kernels of a pipeline compiled for the scheduler, keyed by entry address.
pub struct SeparateKernels {
  pub raygen: CompiledKernel,
  pub kernels: FxHashMap<u64, CompiledKernel>,
  pub env: ExecEnv,
}

impl SeparateKernels {
  /// `resumes[i]` is the continuation of call site `i`
  pub fn compile(
    pipeline: &RayTracingPipeline,
    raygen_index: u32,
    resumes: Vec<ShaderFunction>,
    options: &CompileOptions,
  ) -> Self {
    let raygen = compile_stage(pipeline, raygen_index, options).unwrap();
    let mut kernels = FxHashMap::default();
    kernels.insert(
      TRAVERSAL_ADDRESS,
      build_traversal_shader(pipeline, options).unwrap(),
    );
    for (index, stage) in pipeline.stages.iter().enumerate() {
      if matches!(
        stage.stage,
        RtStage::ClosestHit | RtStage::Miss | RtStage::Callable
      ) {
        let kernel = compile_stage(pipeline, index as u32, options).unwrap();
        kernels.insert(stage_address(index as u32), kernel);
      }
    }
    let mut resume_addresses = Vec::new();
    for (call_idx, function) in resumes.into_iter().enumerate() {
      let kernel = compile_resume_shader(pipeline, function, options).unwrap();
      kernels.insert(resume_address(call_idx as u32), kernel);
      resume_addresses.push(resume_address(call_idx as u32));
    }
    Self {
      raygen,
      kernels,
      env: ExecEnv {
        resume_addresses,
        ..Default::default()
      },
    }
  }

  /// Run the raygen kernel and then whatever the scheduler picks until every invocation has
  /// ended. Returns the picked kernel addresses with the stack pointer of the first live
  /// invocation at the start of each.
  pub fn run(&self, wave: &mut WaveState, memory: &mut GlobalMemory) -> Vec<(u64, u32)> {
    execute(&self.raygen.function, wave, memory, &self.env).unwrap();

    let mut trace = Vec::new();
    for _ in 0..256 {
      let alive = wave.alive_mask();
      if alive == 0 {
        return trace;
      }
      let lane = alive.trailing_zeros() as usize;
      let next = wave.arg(lane, RtArg::UniformShaderAddr.slot()).as_u64().unwrap();
      let stack_ptr = wave
        .arg(lane, RtArg::DynamicCallableStackBase.slot())
        .as_u32()
        .unwrap_or(0);
      let kernel = self
        .kernels
        .get(&next)
        .unwrap_or_else(|| panic!("no kernel at {:#x}", next));
      trace.push((next, stack_ptr));
      execute(&kernel.function, wave, memory, &self.env).unwrap();
    }
    panic!("the wave did not finish: {:x?}", trace);
  }
}

pub fn vec3(b: &mut FunctionBuilder, v: [f32; 3]) -> NodeHandle {
  let x = b.imm_f32(v[0]);
  let y = b.imm_f32(v[1]);
  let z = b.imm_f32(v[2]);
  b.compose(x, y, z)
}

fn payload_address(b: &mut FunctionBuilder, offset: NodeHandle) -> NodeHandle {
  let arg = b.intrinsic(RtIntrinsic::RtArgScratchOffset, &[]);
  b.add(arg, offset)
}

/// dword `slot` of the payload of the call being served
pub fn load_payload(b: &mut FunctionBuilder, slot: u64) -> NodeHandle {
  let offset = b.imm_u32(slot as u32 * 4);
  let address = payload_address(b, offset);
  b.load_scratch(ScratchBase::Frame, address, ValueType::U32)
}

pub fn store_payload(b: &mut FunctionBuilder, slot: u64, value: NodeHandle) {
  let offset = b.imm_u32(slot as u32 * 4);
  let address = payload_address(b, offset);
  b.store_scratch(ScratchBase::Frame, address, value);
}

pub fn store_output(b: &mut FunctionBuilder, slot: u64, value: NodeHandle) {
  let launch_id = b.intrinsic(RtIntrinsic::LaunchId, &[]);
  let x = b.extract(launch_id, 0);
  let x = b.u2u64(x);
  let offset = b.mul_imm(x, OUTPUT_LANE_STRIDE);
  let base = b.imm_u64(OUTPUT + slot * 4);
  let address = b.add(base, offset);
  b.store_global(address, value);
}

#[derive(Clone, Copy, Debug)]
pub struct TestRay {
  pub origin: [f32; 3],
  pub direction: [f32; 3],
  pub tmin: f32,
  pub tmax: f32,
  pub flags: RayFlags,
  pub cull_mask: u32,
  pub sbt_offset: u32,
  pub sbt_stride: u32,
  pub miss_index: u32,
}

impl TestRay {
  /// straight down the z axis from above the unit triangles
  pub fn down_from(origin: [f32; 3]) -> Self {
    Self {
      origin,
      direction: [0., 0., -1.],
      tmin: 0.,
      tmax: 1000.,
      flags: RayFlags::empty(),
      cull_mask: 0xFF,
      sbt_offset: 0,
      sbt_stride: 1,
      miss_index: 0,
    }
  }

  pub fn with_flags(mut self, flags: RayFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn with_cull_mask(mut self, cull_mask: u32) -> Self {
    self.cull_mask = cull_mask;
    self
  }
}

/// A raygen shader tracing `ray` with a zeroed payload of `payload_dwords`, shifted along x by
/// `lane_dx` per invocation. The monolithic variant copies the payload to the output, the
/// separate one leaves that to [`raygen_resume_shader`].
pub fn raygen_shader(ray: TestRay, payload_dwords: u32, lane_dx: f32, monolithic: bool) -> ShaderFunction {
  let frame = align16(payload_dwords * 4);
  let mut function = ShaderFunction::new("raygen", RtStage::RayGen).with_scratch_size(frame);
  {
    let mut b = function.builder();
    let zero = b.imm_u32(0);
    for slot in 0..payload_dwords {
      let offset = b.imm_u32(slot * 4);
      b.store_scratch(ScratchBase::Frame, offset, zero);
    }

    let lane = b.local_invocation_index();
    let lane = b.u2f32(lane);
    let dx = b.imm_f32(lane_dx);
    let shift = b.mul(lane, dx);
    let zero_f = b.imm_f32(0.);
    let shift = b.compose(shift, zero_f, zero_f);
    let origin = vec3(&mut b, ray.origin);
    let origin = b.add(origin, shift);

    let args = [
      b.imm_u64(ACCEL_STRUCT),
      b.imm_u32(ray.flags.bits()),
      b.imm_u32(ray.cull_mask),
      b.imm_u32(ray.sbt_offset),
      b.imm_u32(ray.sbt_stride),
      b.imm_u32(ray.miss_index),
      origin,
      b.imm_f32(ray.tmin),
      vec3(&mut b, ray.direction),
      b.imm_f32(ray.tmax),
      b.imm_u32(0),
    ];
    b.intrinsic(
      RtIntrinsic::TraceRay {
        call_idx: 0,
        stack_size: frame,
      },
      &args,
    );

    if monolithic {
      copy_payload_to_output(&mut b, payload_dwords);
    }
  }
  function
}

fn copy_payload_to_output(b: &mut FunctionBuilder, payload_dwords: u32) {
  for slot in 0..payload_dwords {
    let offset = b.imm_u32(slot * 4);
    let value = b.load_scratch(ScratchBase::Frame, offset, ValueType::U32);
    store_output(b, slot as u64, value);
  }
}

/// the continuation of [`raygen_shader`] after its trace ray returns
pub fn raygen_resume_shader(payload_dwords: u32) -> ShaderFunction {
  let frame = align16(payload_dwords * 4);
  let mut function = ShaderFunction::new("raygen_resume", RtStage::RayGen).with_scratch_size(frame);
  {
    let mut b = function.builder();
    b.intrinsic(RtIntrinsic::Resume { stack_size: frame }, &[]);
    copy_payload_to_output(&mut b, payload_dwords);
    b.intrinsic(RtIntrinsic::Return, &[]);
  }
  function
}

/// Writes [`CLOSEST_HIT_MARK`], the primitive id, tmax, hit kind, the first two hit
/// attributes, the instance id and the instance custom index to payload dwords 0 to 7.
pub fn closest_hit_shader(separate: bool) -> ShaderFunction {
  let mut function = ShaderFunction::new("closest_hit", RtStage::ClosestHit);
  {
    let mut b = function.builder();
    let mark = b.imm_u32(CLOSEST_HIT_MARK);
    store_payload(&mut b, 0, mark);
    let primitive_id = b.intrinsic(RtIntrinsic::PrimitiveId, &[]);
    store_payload(&mut b, 1, primitive_id);
    let tmax = b.intrinsic(RtIntrinsic::RayTMax, &[]);
    let tmax = b.bitcast_u32(tmax);
    store_payload(&mut b, 2, tmax);
    let hit_kind = b.intrinsic(RtIntrinsic::HitKind, &[]);
    store_payload(&mut b, 3, hit_kind);
    for slot in 0..2 {
      let attrib = b.intrinsic(RtIntrinsic::LoadHitAttrib { slot }, &[]);
      store_payload(&mut b, 4 + slot as u64, attrib);
    }
    let instance_id = b.intrinsic(RtIntrinsic::InstanceId, &[]);
    store_payload(&mut b, 6, instance_id);
    let custom_index = b.intrinsic(RtIntrinsic::InstanceCustomIndex, &[]);
    store_payload(&mut b, 7, custom_index);
    if separate {
      b.intrinsic(RtIntrinsic::Return, &[]);
    }
  }
  function
}

/// Writes [`MISS_MARK`] and the ray tmax to payload dwords 0 and 2.
pub fn miss_shader(separate: bool) -> ShaderFunction {
  let mut function = ShaderFunction::new("miss", RtStage::Miss);
  {
    let mut b = function.builder();
    let mark = b.imm_u32(MISS_MARK);
    store_payload(&mut b, 0, mark);
    let tmax = b.intrinsic(RtIntrinsic::RayTMax, &[]);
    let tmax = b.bitcast_u32(tmax);
    store_payload(&mut b, 2, tmax);
    if separate {
      b.intrinsic(RtIntrinsic::Return, &[]);
    }
  }
  function
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnyHitBehavior {
  Accept,
  Ignore,
  Terminate,
  IgnoreHitKind(u32),
}

/// Counts its invocations in payload dword [`ANY_HIT_COUNT_SLOT`] and logs the primitive id
/// of each candidate after it, then acts as `behavior` says.
pub fn any_hit_shader(behavior: AnyHitBehavior) -> ShaderFunction {
  let mut function = ShaderFunction::new("any_hit", RtStage::AnyHit);
  {
    let mut b = function.builder();
    let count = load_payload(&mut b, ANY_HIT_COUNT_SLOT);
    let log_offset = b.mul_imm(count, 4);
    let log_offset = b.add_imm(log_offset, (ANY_HIT_COUNT_SLOT + 1) * 4);
    let log_address = payload_address(&mut b, log_offset);
    let primitive_id = b.intrinsic(RtIntrinsic::PrimitiveId, &[]);
    b.store_scratch(ScratchBase::Frame, log_address, primitive_id);
    let count = b.add_imm(count, 1);
    store_payload(&mut b, ANY_HIT_COUNT_SLOT, count);

    match behavior {
      AnyHitBehavior::Accept => {}
      AnyHitBehavior::Ignore => {
        b.intrinsic(RtIntrinsic::IgnoreIntersection, &[]);
      }
      AnyHitBehavior::Terminate => {
        b.intrinsic(RtIntrinsic::TerminateRay, &[]);
      }
      AnyHitBehavior::IgnoreHitKind(kind) => {
        let hit_kind = b.intrinsic(RtIntrinsic::HitKind, &[]);
        let ignored = b.equals_imm(hit_kind, kind as u64);
        b.if_by(ignored, |b| {
          b.intrinsic(RtIntrinsic::IgnoreIntersection, &[]);
        });
      }
    }
  }
  function
}

/// Reports every `(t, hit_kind)` in order.
pub fn intersection_shader(reports: &[(f32, u32)]) -> ShaderFunction {
  let mut function = ShaderFunction::new("intersection", RtStage::Intersection);
  {
    let mut b = function.builder();
    for (t, kind) in reports {
      let t = b.imm_f32(*t);
      let kind = b.imm_u32(*kind);
      b.intrinsic(RtIntrinsic::ReportIntersection, &[t, kind]);
    }
  }
  function
}

pub fn options_for(wave_size: u32) -> CompileOptions {
  CompileOptions::default().with_wave_size(wave_size)
}
