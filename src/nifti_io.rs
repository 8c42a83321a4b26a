//! NIfTI file I/O for reconstructions
//!
//! Encodes estimates as single-file NIfTI-1 (float64) with their geometry,
//! optionally gzipped. Decoding goes through `nifti` so files written by
//! other tools load as well.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{SolverError, SolverResult};
use crate::geometry::Geometry;

/// NIfTI datatype code for float64
const DT_FLOAT64: i16 = 64;

fn decode_error(context: &str, err: impl std::fmt::Display) -> SolverError {
    SolverError::Serialization { message: format!("{context}: {err}") }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Decode a NIfTI image (gzip is auto-detected) into Fortran-ordered data
/// and its geometry.
pub fn decode_nifti(bytes: &[u8]) -> SolverResult<(Vec<f64>, Geometry)> {
    let raw;
    let plain: &[u8] = if is_gzip(bytes) {
        let mut decompressed = Vec::new();
        GzDecoder::new(Cursor::new(bytes))
            .read_to_end(&mut decompressed)
            .map_err(|e| decode_error("Failed to decompress NIfTI", e))?;
        raw = decompressed;
        &raw
    } else {
        bytes
    };

    let obj = InMemNiftiObject::from_reader(Cursor::new(plain))
        .map_err(|e| decode_error(&format!("Failed to read NIfTI ({})", get_header_info(plain)), e))?;

    let header = obj.header().clone();
    let ndim = header.dim[0] as usize;
    if !(1..=7).contains(&ndim) {
        return Err(SolverError::Serialization { message: format!("invalid NIfTI dim[0] = {ndim}") });
    }
    let extra: usize = header.dim[4..=ndim.max(3)].iter().map(|&d| d.max(1) as usize).product();
    if ndim > 3 && extra > 1 {
        return Err(SolverError::config("dim", ndim, "only 1- to 3-dimensional images are supported"));
    }
    let spatial = ndim.min(3);

    let shape: Vec<usize> = header.dim[1..=spatial].iter().map(|&d| d as usize).collect();
    let spacing: Vec<f64> = header.pixdim[1..=spatial].iter().map(|&p| (p as f64).abs()).collect();
    let affine = get_affine(&header, &spacing);

    let array: Array<f64, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| decode_error("Failed to convert to ndarray", e))?;

    // Reversed axes iterate with x fastest, i.e. Fortran order
    let data: Vec<f64> = array.t().iter().copied().collect();

    let geometry = Geometry::new(&shape)?
        .with_voxel_size(&spacing)?
        .with_affine(affine);
    geometry.check_len(data.len(), "NIfTI volume")?;
    Ok((data, geometry))
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader, spacing: &[f64]) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let h = |axis: usize| spacing.get(axis).copied().unwrap_or(1.0);
        crate::geometry::identity_affine((h(0), h(1), h(2)))
    }
}

/// NIfTI-1 stores axis lengths as i16.
pub fn check_nifti_geometry(geometry: &Geometry) -> SolverResult<()> {
    for &n in geometry.shape().iter() {
        if i16::try_from(n).is_err() {
            return Err(SolverError::config("shape", n, "axis too long for NIfTI-1"));
        }
    }
    Ok(())
}

/// Encode data as NIfTI-1 bytes (float64, uncompressed)
pub fn encode_nifti(data: &[f64], geometry: &Geometry) -> SolverResult<Vec<u8>> {
    geometry.check_len(data.len(), "NIfTI data")?;
    check_nifti_geometry(geometry)?;
    let shape = geometry.shape();
    let spacing = geometry.spacing();
    let affine = &geometry.affine;

    // Create NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7], unused axes are 1
    let mut dim: [i16; 8] = [geometry.ndim as i16, 1, 1, 1, 1, 1, 1, 1];
    for (axis, &n) in shape.iter().enumerate() {
        dim[axis + 1] = n as i16;
    }
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 64 (FLOAT64), bitpix = 64
    header[70..72].copy_from_slice(&DT_FLOAT64.to_le_bytes());
    header[72..74].copy_from_slice(&64i16.to_le_bytes());

    // pixdim[0..7]
    let mut pixdim: [f32; 8] = [1.0; 8];
    for (axis, &h) in spacing.iter().enumerate() {
        pixdim[axis + 1] = h as f32;
    }
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for i in 0..4 {
            let offset = 280 + row * 16 + i * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + i] as f32).to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len() * 8);
    buffer.extend_from_slice(&header);
    // Extension flag (all zeros = no extension)
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in data {
        buffer.extend_from_slice(&val.to_le_bytes());
    }

    Ok(buffer)
}

/// Encode data as gzipped NIfTI bytes (.nii.gz)
pub fn encode_nifti_gz(data: &[f64], geometry: &Geometry) -> SolverResult<Vec<u8>> {
    let uncompressed = encode_nifti(data, geometry)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| decode_error("Gzip compression failed", e))?;
    encoder.finish().map_err(|e| decode_error("Gzip finish failed", e))
}

/// Write a new .nii.gz file; fails if `path` already exists.
pub fn save_nifti_gz(path: &Path, data: &[f64], geometry: &Geometry) -> SolverResult<()> {
    let bytes = encode_nifti_gz(data, geometry)?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| SolverError::from_io(path, e))?;
    file.write_all(&bytes).map_err(|e| SolverError::from_io(path, e))
}

/// Read a .nii or .nii.gz file; a missing file is `MissingData`.
pub fn load_nifti(path: &Path) -> SolverResult<(Vec<f64>, Geometry)> {
    let bytes = std::fs::read(path).map_err(|e| SolverError::from_io(path, e))?;
    decode_nifti(&bytes)
}
