use crate::*;

const PAGE_SIZE: u64 = 4096;

/// Sparse byte addressable device memory. Unmapped reads return zero.
#[derive(Default)]
pub struct GlobalMemory {
  pages: FxHashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl GlobalMemory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
    let mut address = address;
    let mut bytes = bytes;
    while !bytes.is_empty() {
      let page = address / PAGE_SIZE;
      let in_page = (address % PAGE_SIZE) as usize;
      let count = bytes.len().min(PAGE_SIZE as usize - in_page);
      let target = self
        .pages
        .entry(page)
        .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
      target[in_page..in_page + count].copy_from_slice(&bytes[..count]);
      bytes = &bytes[count..];
      address += count as u64;
    }
  }

  pub fn read_bytes(&self, address: u64, out: &mut [u8]) {
    let mut address = address;
    let mut done = 0;
    while done < out.len() {
      let page = address / PAGE_SIZE;
      let in_page = (address % PAGE_SIZE) as usize;
      let count = (out.len() - done).min(PAGE_SIZE as usize - in_page);
      let target = &mut out[done..done + count];
      match self.pages.get(&page) {
        Some(data) => target.copy_from_slice(&data[in_page..in_page + count]),
        None => target.fill(0),
      }
      done += count;
      address += count as u64;
    }
  }

  pub fn write<T: Pod>(&mut self, address: u64, value: &T) {
    self.write_bytes(address, bytes_of(value));
  }

  pub fn write_slice<T: Pod>(&mut self, address: u64, values: &[T]) {
    self.write_bytes(address, cast_slice(values));
  }

  pub fn read<T: Pod>(&self, address: u64) -> T {
    let mut value = T::zeroed();
    self.read_bytes(address, bytes_of_mut(&mut value));
    value
  }

  pub fn read_value(&self, address: u64, ty: ValueType) -> Value {
    let mut buffer = [0; 12];
    let bytes = &mut buffer[..ty.byte_size() as usize];
    self.read_bytes(address, bytes);
    Value::read_bytes(ty, bytes)
  }

  pub fn write_value(&mut self, address: u64, value: Value) {
    let mut buffer = [0; 12];
    let bytes = &mut buffer[..value.ty().byte_size() as usize];
    value.write_bytes(bytes);
    self.write_bytes(address, bytes);
  }
}

/// largest scratch or shared footprint a single lane or wave may grow to
pub(crate) const MAX_LOCAL_MEMORY: u64 = 1 << 24;

pub(crate) fn read_local(memory: &[u8], offset: u64, ty: ValueType) -> Result<Value, ExecError> {
  let size = ty.byte_size() as u64;
  if offset + size > MAX_LOCAL_MEMORY {
    return Err(ExecError::LocalMemoryOutOfRange(offset));
  }
  let mut buffer = [0; 12];
  let bytes = &mut buffer[..size as usize];
  for (i, byte) in bytes.iter_mut().enumerate() {
    *byte = memory.get(offset as usize + i).copied().unwrap_or(0);
  }
  Ok(Value::read_bytes(ty, bytes))
}

pub(crate) fn write_local(memory: &mut Vec<u8>, offset: u64, value: Value) -> Result<(), ExecError> {
  let size = value.ty().byte_size() as u64;
  if offset + size > MAX_LOCAL_MEMORY {
    return Err(ExecError::LocalMemoryOutOfRange(offset));
  }
  let end = (offset + size) as usize;
  if memory.len() < end {
    memory.resize(end, 0);
  }
  value.write_bytes(&mut memory[offset as usize..end]);
  Ok(())
}
