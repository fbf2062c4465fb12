//! Host routines for the kernel entry points shipped in `kernels/`.
//!
//! Each routine reads its positional arguments the way the device kernel
//! declares them and produces the same results. Routines run a whole launch
//! at once; the launch geometry only matters for `__htm_noop__`, which writes
//! one element per work item.

use std::collections::HashMap;

use half::f16;
use htm_tensor::{DType, Element};

use super::{Defines, INVALID_HANDLE, INVALID_VALUE, LAUNCH_FAILED};
use crate::driver::{DriverError, WorkSize};

pub(crate) type Routine = fn(&mut Invocation<'_>) -> Result<(), DriverError>;

#[derive(Debug, Clone, Copy)]
pub(crate) enum HostArg {
    Buffer(u64),
    Int(i32),
    Float(f32),
}

/// Arguments and memory of one launch.
pub(crate) struct Invocation<'a> {
    defines: &'a Defines,
    args: Vec<HostArg>,
    work: WorkSize,
    memory: &'a mut HashMap<u64, Vec<u8>>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        defines: &'a Defines,
        args: Vec<HostArg>,
        work: WorkSize,
        memory: &'a mut HashMap<u64, Vec<u8>>,
    ) -> Self {
        Invocation {
            defines,
            args,
            work,
            memory,
        }
    }

    fn define(&self, name: &str) -> Result<&str, DriverError> {
        self.defines
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| launch_failed(format!("{} is not defined", name)))
    }

    fn define_usize(&self, name: &str) -> Result<usize, DriverError> {
        let value = self.define(name)?;
        value
            .parse()
            .map_err(|_| launch_failed(format!("{}={} is not a size", name, value)))
    }

    fn define_flag(&self, name: &str) -> Result<bool, DriverError> {
        match self.define(name)? {
            "0" | "false" => Ok(false),
            _ => Ok(true),
        }
    }

    fn define_dtype(&self, name: &str) -> Result<DType, DriverError> {
        let value = self.define(name)?;
        DType::from_device_type_name(value)
            .ok_or_else(|| launch_failed(format!("{}={} is not a device type", name, value)))
    }

    fn arg(&self, index: usize) -> Result<HostArg, DriverError> {
        self.args.get(index).copied().ok_or_else(|| {
            DriverError::new(INVALID_VALUE, format!("kernel argument {} is not set", index))
        })
    }

    fn int(&self, index: usize) -> Result<i32, DriverError> {
        match self.arg(index)? {
            HostArg::Int(v) => Ok(v),
            other => Err(bad_arg(index, "int", other)),
        }
    }

    fn float(&self, index: usize) -> Result<f32, DriverError> {
        match self.arg(index)? {
            HostArg::Float(v) => Ok(v),
            other => Err(bad_arg(index, "float", other)),
        }
    }

    fn bytes(&self, index: usize) -> Result<&[u8], DriverError> {
        let id = self.buffer_id(index)?;
        self.memory
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| DriverError::new(INVALID_HANDLE, "kernel argument was freed"))
    }

    fn bytes_mut(&mut self, index: usize) -> Result<&mut Vec<u8>, DriverError> {
        let id = self.buffer_id(index)?;
        self.memory
            .get_mut(&id)
            .ok_or_else(|| DriverError::new(INVALID_HANDLE, "kernel argument was freed"))
    }

    fn buffer_id(&self, index: usize) -> Result<u64, DriverError> {
        match self.arg(index)? {
            HostArg::Buffer(id) => Ok(id),
            other => Err(bad_arg(index, "buffer", other)),
        }
    }

    /// First `len` elements of buffer argument `index`.
    fn read<T: Element>(&self, index: usize, len: usize) -> Result<Vec<T>, DriverError> {
        let bytes = self.bytes(index)?;
        let needed = len * T::DTYPE.size_in_bytes();
        if bytes.len() < needed {
            return Err(out_of_bounds(index, needed, bytes.len()));
        }
        Ok(T::from_bytes(&bytes[..needed]))
    }

    /// Overwrite the start of buffer argument `index` with `values`.
    fn write<T: Element>(&mut self, index: usize, values: &[T]) -> Result<(), DriverError> {
        let encoded = T::to_bytes(values);
        let bytes = self.bytes_mut(index)?;
        if bytes.len() < encoded.len() {
            return Err(out_of_bounds(index, encoded.len(), bytes.len()));
        }
        bytes[..encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }
}

fn launch_failed(message: String) -> DriverError {
    DriverError::new(LAUNCH_FAILED, message)
}

fn bad_arg(index: usize, expected: &str, got: HostArg) -> DriverError {
    DriverError::new(
        INVALID_VALUE,
        format!("kernel argument {} should be {}, got {:?}", index, expected, got),
    )
}

fn out_of_bounds(index: usize, needed: usize, len: usize) -> DriverError {
    launch_failed(format!(
        "argument {} accessed {} bytes of a {} byte buffer",
        index, needed, len
    ))
}

fn count(value: i32) -> usize {
    value.max(0) as usize
}

/// Host routine registered for `name`, if any.
pub(crate) fn lookup(name: &str) -> Option<Routine> {
    match name {
        "__htm_noop__" => Some(noop),
        "overlapScore" => Some(overlap_score),
        "fastTopK" => Some(fast_top_k),
        "threshold" => Some(threshold),
        "cast" => Some(cast),
        "learnCorrelation" => Some(learn_correlation),
        "sortSynapse" => Some(sort_synapse),
        _ => None,
    }
}

// (int* p)
fn noop(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let zeros = vec![0i32; inv.work.global];
    inv.write(0, &zeros)
}

/// Resolve slot `slot` of a cell to an input index, `None` for an unused slot
/// that ends the cell's synapse list.
fn presynaptic(
    target: i32,
    input_size: usize,
    no_unused_synapse: bool,
) -> Result<Option<usize>, DriverError> {
    if target < 0 && !no_unused_synapse {
        return Ok(None);
    }
    let idx = target as usize;
    if target < 0 || idx >= input_size {
        return Err(launch_failed(format!(
            "synapse targets input {} outside of {} inputs",
            target, input_size
        )));
    }
    Ok(Some(idx))
}

// (const bool* x, const int* connections, const float* permeances, int* y,
//  float connected_permeance, int active_threshold, int count)
fn overlap_score(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let input_size = inv.define_usize("INPUT_SIZE")?;
    let per_cell = inv.define_usize("MAX_SYNAPSE_PER_CELL")?;
    let no_unused = inv.define_flag("NO_UNUSED_SYNAPSE")?;
    let connected_permeance = inv.float(4)?;
    let active_threshold = inv.int(5)?;
    let cells = count(inv.int(6)?);

    let x: Vec<bool> = inv.read(0, input_size)?;
    let connections: Vec<i32> = inv.read(1, cells * per_cell)?;
    let permeances: Vec<f32> = inv.read(2, cells * per_cell)?;

    let mut y = vec![0i32; cells];
    for (cell, score_out) in y.iter_mut().enumerate() {
        let mut score = 0i32;
        for slot in cell * per_cell..(cell + 1) * per_cell {
            let Some(idx) = presynaptic(connections[slot], input_size, no_unused)? else {
                break;
            };
            if permeances[slot] < connected_permeance {
                continue;
            }
            score += x[idx] as i32;
        }
        *score_out = if score >= active_threshold { score } else { 0 };
    }
    inv.write(3, &y)
}

// (const int* x, int* threshold, int k)
fn fast_top_k(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let input_size = inv.define_usize("INPUT_SIZE")?;
    let max_value = inv.define_usize("MAX_INPUT_VALUE")?;
    let k = count(inv.int(2)?);
    let x: Vec<i32> = inv.read(0, input_size)?;

    let mut histogram = vec![0usize; max_value + 1];
    for &v in &x {
        histogram[(v.max(0) as usize).min(max_value)] += 1;
    }

    let threshold = if k == 0 {
        max_value as i32 + 1
    } else {
        let mut seen = 0;
        let mut found = 0i32;
        for v in (0..=max_value).rev() {
            seen += histogram[v];
            if seen >= k {
                found = v as i32;
                break;
            }
        }
        found
    };
    inv.write(1, &[threshold])
}

// (const int* x, bool* y, const int* threshold)
fn threshold(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let input_size = inv.define_usize("INPUT_SIZE")?;
    let x: Vec<i32> = inv.read(0, input_size)?;
    let t = inv.read::<i32>(2, 1)?[0];
    let y: Vec<bool> = x.iter().map(|&v| v >= t && v > 0).collect();
    inv.write(1, &y)
}

fn load(dtype: DType, bytes: &[u8]) -> Vec<f64> {
    match dtype {
        DType::Bool => bool::from_bytes(bytes).into_iter().map(|v| v as u8 as f64).collect(),
        DType::Int32 => i32::from_bytes(bytes).into_iter().map(f64::from).collect(),
        DType::Float => f32::from_bytes(bytes).into_iter().map(f64::from).collect(),
        DType::Half => f16::from_bytes(bytes).into_iter().map(f64::from).collect(),
        DType::Unknown => Vec::new(),
    }
}

fn store(dtype: DType, values: &[f64]) -> Vec<u8> {
    match dtype {
        DType::Bool => bool::to_bytes(&values.iter().map(|&v| v != 0.0).collect::<Vec<_>>()),
        DType::Int32 => i32::to_bytes(&values.iter().map(|&v| v as i32).collect::<Vec<_>>()),
        DType::Float => f32::to_bytes(&values.iter().map(|&v| v as f32).collect::<Vec<_>>()),
        DType::Half => f16::to_bytes(&values.iter().map(|&v| f16::from_f64(v)).collect::<Vec<_>>()),
        DType::Unknown => Vec::new(),
    }
}

// (const InType* x, OutType* y, int count)
fn cast(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let in_type = inv.define_dtype("InType")?;
    let out_type = inv.define_dtype("OutType")?;
    let n = count(inv.int(2)?);

    let in_bytes = n * in_type.size_in_bytes();
    let src = inv.bytes(0)?;
    if src.len() < in_bytes {
        return Err(out_of_bounds(0, in_bytes, src.len()));
    }
    let values = load(in_type, &src[..in_bytes]);
    let encoded = store(out_type, &values);

    let dst = inv.bytes_mut(1)?;
    if dst.len() < encoded.len() {
        return Err(out_of_bounds(1, encoded.len(), dst.len()));
    }
    dst[..encoded.len()].copy_from_slice(&encoded);
    Ok(())
}

// (const bool* x, const bool* learn, const int* connections, float* permeances,
//  float perm_inc, float perm_dec, int cells)
fn learn_correlation(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let input_size = inv.define_usize("INPUT_SIZE")?;
    let per_cell = inv.define_usize("MAX_SYNAPSE_PER_CELL")?;
    let perm_inc = inv.float(4)?;
    let perm_dec = inv.float(5)?;
    let cells = count(inv.int(6)?);

    let x: Vec<bool> = inv.read(0, input_size)?;
    let learn: Vec<bool> = inv.read(1, cells)?;
    let connections: Vec<i32> = inv.read(2, cells * per_cell)?;
    let mut permeances: Vec<f32> = inv.read(3, cells * per_cell)?;

    for cell in (0..cells).filter(|&c| learn[c]) {
        for slot in cell * per_cell..(cell + 1) * per_cell {
            // -1 always ends the list here; there is no NO_UNUSED_SYNAPSE define.
            let Some(idx) = presynaptic(connections[slot], input_size, false)? else {
                break;
            };
            let p = if x[idx] {
                permeances[slot] + perm_inc
            } else {
                permeances[slot] - perm_dec
            };
            permeances[slot] = p.clamp(0.0, 1.0);
        }
    }
    inv.write(3, &permeances)
}

// (int* connections, float* permeances, int cells, int* aux_connections,
//  float* aux_permeances)
fn sort_synapse(inv: &mut Invocation<'_>) -> Result<(), DriverError> {
    let per_cell = inv.define_usize("MAX_SYNAPSE_PER_CELL")?;
    let cells = count(inv.int(2)?);

    let mut connections: Vec<i32> = inv.read(0, cells * per_cell)?;
    let mut permeances: Vec<f32> = inv.read(1, cells * per_cell)?;

    let mut synapses = Vec::with_capacity(per_cell);
    for cell in 0..cells {
        let range = cell * per_cell..(cell + 1) * per_cell;
        synapses.clear();
        synapses.extend(
            connections[range.clone()]
                .iter()
                .copied()
                .zip(permeances[range.clone()].iter().copied()),
        );
        synapses.sort_by_key(|&(target, _)| if target < 0 { i64::MAX } else { target as i64 });
        for (slot, (target, perm)) in range.zip(synapses.iter().copied()) {
            connections[slot] = target;
            permeances[slot] = perm;
        }
    }

    // The device kernel stages cells through the scratch buffers.
    inv.write(3, &connections)?;
    inv.write(4, &permeances)?;
    inv.write(0, &connections)?;
    inv.write(1, &permeances)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> Defines {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn memory(buffers: Vec<Vec<u8>>) -> HashMap<u64, Vec<u8>> {
        buffers
            .into_iter()
            .enumerate()
            .map(|(i, b)| (i as u64, b))
            .collect()
    }

    #[test]
    fn test_overlap_score_routine() {
        let defs = defines(&[
            ("INPUT_SIZE", "4"),
            ("MAX_SYNAPSE_PER_CELL", "3"),
            ("NO_UNUSED_SYNAPSE", "0"),
        ]);
        let mut mem = memory(vec![
            bool::to_bytes(&[true, false, true, true]),
            i32::to_bytes(&[0, 2, 3, 1, -1, 0]),
            f32::to_bytes(&[0.5, 0.5, 0.1, 0.9, 0.9, 0.9]),
            vec![0u8; 8],
        ]);
        let args = vec![
            HostArg::Buffer(0),
            HostArg::Buffer(1),
            HostArg::Buffer(2),
            HostArg::Buffer(3),
            HostArg::Float(0.2),
            HostArg::Int(2),
            HostArg::Int(2),
        ];
        let mut inv = Invocation::new(&defs, args, WorkSize::new(64, 64), &mut mem);
        overlap_score(&mut inv).unwrap();
        // Cell 0: inputs 0 and 2 connected and on, input 3 below permeance.
        // Cell 1: input 1 is off, then the list ends; below threshold.
        assert_eq!(i32::from_bytes(&mem[&3]), vec![2, 0]);
    }

    #[test]
    fn test_fast_top_k_threshold() {
        let defs = defines(&[("INPUT_SIZE", "6"), ("MAX_INPUT_VALUE", "10")]);
        let mut mem = memory(vec![
            i32::to_bytes(&[0, 3, 12, 7, 7, 1]),
            vec![0u8; 4],
            vec![0u8; 6],
        ]);
        let args = vec![HostArg::Buffer(0), HostArg::Buffer(1), HostArg::Int(3)];
        let mut inv = Invocation::new(&defs, args, WorkSize::new(256, 256), &mut mem);
        fast_top_k(&mut inv).unwrap();
        assert_eq!(i32::from_bytes(&mem[&1]), vec![7]);

        let args = vec![HostArg::Buffer(0), HostArg::Buffer(2), HostArg::Buffer(1)];
        let mut inv = Invocation::new(&defs, args, WorkSize::new(1024, 32), &mut mem);
        threshold(&mut inv).unwrap();
        assert_eq!(
            bool::from_bytes(&mem[&2]),
            vec![false, false, true, true, true, false]
        );
    }

    #[test]
    fn test_missing_define_fails_launch() {
        let defs = Defines::new();
        let mut mem = memory(vec![vec![0u8; 4], vec![0u8; 4]]);
        let args = vec![HostArg::Buffer(0), HostArg::Buffer(1), HostArg::Int(1)];
        let mut inv = Invocation::new(&defs, args, WorkSize::new(32, 32), &mut mem);
        let err = cast(&mut inv).unwrap_err();
        assert_eq!(err.code, LAUNCH_FAILED);
        assert!(err.message.contains("InType"));
    }

    #[test]
    fn test_wrong_argument_kind() {
        let defs = defines(&[("INPUT_SIZE", "1"), ("MAX_INPUT_VALUE", "10")]);
        let mut mem = memory(vec![vec![0u8; 4]]);
        let args = vec![HostArg::Buffer(0), HostArg::Int(0), HostArg::Int(1)];
        let mut inv = Invocation::new(&defs, args, WorkSize::new(256, 256), &mut mem);
        assert_eq!(fast_top_k(&mut inv).unwrap_err().code, INVALID_VALUE);
    }
}
