use crate::*;

pub struct RayTracingStage {
  pub stage: RtStage,
  pub function: ShaderFunction,
}

/// Which stages a shader group references, as indices into the pipeline stage list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderGroupKind {
  General {
    general: Option<u32>,
  },
  TrianglesHit {
    closest_hit: Option<u32>,
    any_hit: Option<u32>,
  },
  ProceduralHit {
    intersection: Option<u32>,
    closest_hit: Option<u32>,
    any_hit: Option<u32>,
  },
}

/// The selector values written into binding table records, 0 means no shader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderGroupHandle {
  pub general_index: u32,
  pub closest_hit_index: u32,
  pub any_hit_index: u32,
  pub intersection_index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderGroup {
  pub kind: ShaderGroupKind,
  pub handle: ShaderGroupHandle,
}

/// groups referencing the same stage share the selector value, which is what lets the
/// dispatcher inline a shared stage once
fn stage_selector(stage: Option<u32>) -> u32 {
  stage.map(|s| s + 1).unwrap_or(0)
}

/// The any hit shader is inlined into the intersection shader, so the intersection case is
/// keyed by both: intersection selector in the low 16 bits, any hit selector in the high 16.
fn intersection_selector(intersection: Option<u32>, any_hit: Option<u32>) -> u32 {
  match intersection {
    Some(_) => stage_selector(intersection) | stage_selector(any_hit) << 16,
    None => 0,
  }
}

impl ShaderGroup {
  pub fn new(kind: ShaderGroupKind) -> Self {
    let mut handle = ShaderGroupHandle::default();
    match kind {
      ShaderGroupKind::General { general } => handle.general_index = stage_selector(general),
      ShaderGroupKind::TrianglesHit {
        closest_hit,
        any_hit,
      } => {
        handle.closest_hit_index = stage_selector(closest_hit);
        handle.any_hit_index = stage_selector(any_hit);
      }
      ShaderGroupKind::ProceduralHit {
        intersection,
        closest_hit,
        any_hit,
      } => {
        handle.intersection_index = intersection_selector(intersection, any_hit);
        handle.closest_hit_index = stage_selector(closest_hit);
        handle.any_hit_index = stage_selector(any_hit);
      }
    }
    Self { kind, handle }
  }

  pub fn general(&self) -> Option<u32> {
    match self.kind {
      ShaderGroupKind::General { general } => general,
      _ => None,
    }
  }

  pub fn closest_hit(&self) -> Option<u32> {
    match self.kind {
      ShaderGroupKind::General { .. } => None,
      ShaderGroupKind::TrianglesHit { closest_hit, .. }
      | ShaderGroupKind::ProceduralHit { closest_hit, .. } => closest_hit,
    }
  }

  pub fn any_hit(&self) -> Option<u32> {
    match self.kind {
      ShaderGroupKind::General { .. } => None,
      ShaderGroupKind::TrianglesHit { any_hit, .. } | ShaderGroupKind::ProceduralHit { any_hit, .. } => {
        any_hit
      }
    }
  }

  pub fn intersection(&self) -> Option<u32> {
    match self.kind {
      ShaderGroupKind::ProceduralHit { intersection, .. } => intersection,
      _ => None,
    }
  }

  /// the handle bytes an application copies into its binding table
  pub fn handle_record(&self, recursive_shader_ptr: u64) -> ShaderGroupHandleRecord {
    let general_or_closest_hit_index = if self.handle.general_index != 0 {
      self.handle.general_index
    } else {
      self.handle.closest_hit_index
    };
    ShaderGroupHandleRecord {
      recursive_shader_ptr,
      general_or_closest_hit_index,
      any_hit_index: self.handle.any_hit_index,
      intersection_index: self.handle.intersection_index,
      reserved: [0; 3],
    }
  }
}

#[derive(Default)]
pub struct RayTracingPipeline {
  pub stages: Vec<RayTracingStage>,
  pub groups: Vec<ShaderGroup>,
  pub flags: PipelineCreateFlags,
}

impl RayTracingPipeline {
  pub fn new(flags: PipelineCreateFlags) -> Self {
    Self {
      flags,
      ..Default::default()
    }
  }

  pub fn add_stage(&mut self, function: ShaderFunction) -> u32 {
    self.stages.push(RayTracingStage {
      stage: function.stage,
      function,
    });
    self.stages.len() as u32 - 1
  }

  pub fn add_group(&mut self, kind: ShaderGroupKind) -> usize {
    self.groups.push(ShaderGroup::new(kind));
    self.groups.len() - 1
  }

  pub fn stage(&self, index: u32) -> Result<&RayTracingStage, RtCompileError> {
    self
      .stages
      .get(index as usize)
      .ok_or(RtCompileError::InvalidStageIndex(index))
  }

  /// any procedural group without an intersection shader makes the pipeline unusable
  pub fn validate(&self) -> Result<(), RtCompileError> {
    for (group, g) in self.groups.iter().enumerate() {
      if let ShaderGroupKind::ProceduralHit { intersection, .. } = g.kind {
        if intersection.is_none() {
          return Err(RtCompileError::MissingIntersectionShader { group });
        }
      }
      let referenced = [g.general(), g.closest_hit(), g.any_hit(), g.intersection()];
      for stage in referenced.into_iter().flatten() {
        self.stage(stage)?;
      }
    }
    Ok(())
  }
}
