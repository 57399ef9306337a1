// Synthetic GGUF buffers for unit tests.

use super::GGUF_MAGIC;

/// Builds a GGUF file in memory.
///
/// Tensor data offsets are assigned automatically: each tensor starts on the
/// next alignment boundary after the previous one. The buffer ends exactly at
/// the end of the last tensor's data.
pub(crate) struct GgufBuilder {
    magic: u32,
    version: u32,
    alignment: usize,
    n_kv: u64,
    kv: Vec<u8>,
    tensors: Vec<(String, Vec<u64>, u32, Vec<u8>)>,
}

impl GgufBuilder {
    pub(crate) fn new() -> Self {
        Self {
            magic: GGUF_MAGIC,
            version: 3,
            alignment: 32,
            n_kv: 0,
            kv: Vec::new(),
            tensors: Vec::new(),
        }
    }

    pub(crate) fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub(crate) fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Padding boundary used when laying out the file. Does not write a
    /// `general.alignment` key.
    pub(crate) fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Append a key with a pre-serialised value (type tag + payload).
    pub(crate) fn kv_raw(mut self, key: &str, type_and_value: &[u8]) -> Self {
        put_string(&mut self.kv, key);
        self.kv.extend_from_slice(type_and_value);
        self.n_kv += 1;
        self
    }

    pub(crate) fn kv_string(self, key: &str, val: &str) -> Self {
        let mut v = 8u32.to_le_bytes().to_vec();
        put_string(&mut v, val);
        self.kv_raw(key, &v)
    }

    pub(crate) fn kv_u32(self, key: &str, val: u32) -> Self {
        let mut v = 4u32.to_le_bytes().to_vec();
        v.extend_from_slice(&val.to_le_bytes());
        self.kv_raw(key, &v)
    }

    pub(crate) fn kv_f32(self, key: &str, val: f32) -> Self {
        let mut v = 6u32.to_le_bytes().to_vec();
        v.extend_from_slice(&val.to_le_bytes());
        self.kv_raw(key, &v)
    }

    pub(crate) fn kv_bool(self, key: &str, val: bool) -> Self {
        let mut v = 7u32.to_le_bytes().to_vec();
        v.push(val as u8);
        self.kv_raw(key, &v)
    }

    pub(crate) fn kv_str_array(self, key: &str, vals: &[&str]) -> Self {
        let mut v = 9u32.to_le_bytes().to_vec();
        v.extend_from_slice(&8u32.to_le_bytes());
        v.extend_from_slice(&(vals.len() as u64).to_le_bytes());
        for s in vals {
            put_string(&mut v, s);
        }
        self.kv_raw(key, &v)
    }

    pub(crate) fn kv_f32_array(self, key: &str, vals: &[f32]) -> Self {
        let mut v = 9u32.to_le_bytes().to_vec();
        v.extend_from_slice(&6u32.to_le_bytes());
        v.extend_from_slice(&(vals.len() as u64).to_le_bytes());
        for x in vals {
            v.extend_from_slice(&x.to_le_bytes());
        }
        self.kv_raw(key, &v)
    }

    pub(crate) fn tensor(mut self, name: &str, dims: &[u64], dtype: u32, data: &[u8]) -> Self {
        self.tensors
            .push((name.to_string(), dims.to_vec(), dtype, data.to_vec()));
        self
    }

    /// Convenience for F32 tensors.
    pub(crate) fn tensor_f32(self, name: &str, dims: &[u64], values: &[f32]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.tensor(name, dims, 0, &data)
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.n_kv.to_le_bytes());
        buf.extend_from_slice(&self.kv);

        let mut offset = 0usize;
        for (name, dims, dtype, data) in &self.tensors {
            put_string(&mut buf, name);
            buf.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for d in dims {
                buf.extend_from_slice(&d.to_le_bytes());
            }
            buf.extend_from_slice(&dtype.to_le_bytes());
            buf.extend_from_slice(&(offset as u64).to_le_bytes());
            offset = (offset + data.len()).next_multiple_of(self.alignment);
        }

        buf.resize(buf.len().next_multiple_of(self.alignment), 0);
        for (_, _, _, data) in &self.tensors {
            buf.resize(buf.len().next_multiple_of(self.alignment), 0);
            buf.extend_from_slice(data);
        }
        buf
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}
