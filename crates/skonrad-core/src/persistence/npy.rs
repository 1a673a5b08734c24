//! Minimal NumPy `.npy` v1.0 codec for little-endian f32 arrays.
//!
//! Only the shapes the embedding records use are supported: 1-D vectors and
//! 2-D row-major matrices. The header is the standard python dict literal
//! padded with spaces to a 64-byte boundary.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// A deserialized f32 array: either a vector or a row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyArray {
    Vector(Vec<f32>),
    Matrix { rows: usize, dim: usize, data: Vec<f32> },
}

/// Write a 1-D f32 array.
pub fn write_vector<W: Write>(writer: &mut W, data: &[f32]) -> Result<()> {
    write_array(writer, &format!("({},)", data.len()), data)
}

/// Write a 2-D row-major f32 array.
pub fn write_matrix<W: Write>(writer: &mut W, rows: usize, dim: usize, data: &[f32]) -> Result<()> {
    if data.len() != rows * dim {
        bail!("matrix data length {} does not match {rows}x{dim}", data.len());
    }
    write_array(writer, &format!("({rows}, {dim})"), data)
}

fn write_array<W: Write>(writer: &mut W, shape: &str, data: &[f32]) -> Result<()> {
    let header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape}, }}");
    // magic(6) + version(2) + header_len(2) + header, padded so the data
    // starts on a 64-byte boundary, newline-terminated
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = header.len() + padding + 1;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header_len as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(&b" ".repeat(padding))?;
    writer.write_all(b"\n")?;
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Read one `.npy` array from the stream.
pub fn read_array<R: Read>(reader: &mut R) -> Result<NpyArray> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic).context("truncated npy magic")?;
    if &magic != MAGIC {
        bail!("bad npy magic");
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    if version[0] != 1 {
        bail!("unsupported npy version {}.{}", version[0], version[1]);
    }
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    let header_len = u16::from_le_bytes(len_bytes) as usize;
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).context("truncated npy header")?;
    let header = String::from_utf8(header).context("npy header is not utf-8")?;

    if !header.contains("'<f4'") {
        bail!("unsupported npy dtype in header: {header}");
    }
    if header.contains("'fortran_order': True") {
        bail!("fortran-order npy arrays are not supported");
    }
    let shape = parse_shape(&header)?;

    let count: usize = shape.iter().product();
    let mut payload = vec![0u8; count * 4];
    reader.read_exact(&mut payload).context("truncated npy data")?;
    let data: Vec<f32> = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    match shape.as_slice() {
        [_] => Ok(NpyArray::Vector(data)),
        [rows, dim] => Ok(NpyArray::Matrix { rows: *rows, dim: *dim, data }),
        _ => bail!("unsupported npy rank {}", shape.len()),
    }
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let start = header.find("'shape':").context("npy header missing shape")? + "'shape':".len();
    let open = header[start..].find('(').context("npy shape missing (")? + start;
    let close = header[open..].find(')').context("npy shape missing )")? + open;
    let dims: Vec<usize> = header[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().context("bad npy shape component"))
        .collect::<Result<_>>()?;
    if dims.is_empty() || dims.len() > 2 {
        bail!("unsupported npy shape: {:?}", dims);
    }
    Ok(dims)
}
