use crate::*;

/// Knobs of the stage compiler. Defaults match the hardware the kernels are tuned for.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)] // any missing field will be set to the struct's default
pub struct CompileOptions {
  /// lanes per wave, 32 or 64
  pub wave_size: u32,
  /// case count from which the dispatcher emits a binary search instead of a linear chain
  pub inlined_shader_bsearch_threshold: usize,
  /// case count from which a zero selector is skipped by a guard
  pub switch_null_check_threshold: usize,
  /// ring size of the per lane traversal stack in shared memory
  pub traversal_stack_entries: u32,
  pub ray_history: Option<RayHistoryConfig>,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      wave_size: 64,
      inlined_shader_bsearch_threshold: 16,
      switch_null_check_threshold: 3,
      traversal_stack_entries: MAX_STACK_ENTRY_COUNT,
      ray_history: None,
    }
  }
}

impl CompileOptions {
  pub fn with_wave_size(mut self, wave_size: u32) -> Self {
    self.wave_size = wave_size;
    self
  }

  pub fn with_bsearch_threshold(mut self, threshold: usize) -> Self {
    self.inlined_shader_bsearch_threshold = threshold;
    self
  }

  pub fn with_null_check_threshold(mut self, threshold: usize) -> Self {
    self.switch_null_check_threshold = threshold;
    self
  }

  pub fn with_traversal_stack_entries(mut self, entries: u32) -> Self {
    self.traversal_stack_entries = entries.max(2);
    self
  }

  pub fn with_ray_history(mut self, config: RayHistoryConfig) -> Self {
    self.ray_history = Some(config);
    self
  }

  /// shared memory bytes the traversal stack of one wave occupies
  pub fn traversal_stack_bytes(&self) -> u32 {
    self.wave_size * self.traversal_stack_entries * 4
  }
}

/// Where the ray history recorder writes its tokens.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct RayHistoryConfig {
  /// device address of the buffer, starting with a [`RayHistoryHeader`]
  pub buffer_address: u64,
  pub buffer_size: u32,
  /// only launches whose every id component is a multiple of the scale are recorded
  pub resolution_scale: u32,
}

impl Default for RayHistoryConfig {
  fn default() -> Self {
    Self {
      buffer_address: 0,
      buffer_size: 0,
      resolution_scale: 1,
    }
  }
}
