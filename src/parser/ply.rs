use std::collections::HashMap;
use std::ops::Range;

use thiserror::Error;

use crate::splat::{RawVertexRecord, MAX_REST_COEFFS};

const REQUIRED_PROPERTIES: [&str; 10] = [
    "x", "y", "z", "opacity", "scale_0", "scale_1", "scale_2", "f_dc_0", "f_dc_1", "f_dc_2",
];

#[derive(Debug, Error)]
pub enum PlyError {
    #[error("PLY parse error: first line is not 'ply'")]
    MissingMagic,
    #[error("PLY parse error: missing end_header")]
    MissingEndHeader,
    #[error("PLY parse error: header is not valid UTF-8")]
    HeaderNotUtf8(#[from] std::str::Utf8Error),
    #[error("PLY parse error: only binary_little_endian format is supported (got '{0}')")]
    UnsupportedFormat(String),
    #[error("PLY parse error: unsupported property type '{0}'")]
    UnsupportedType(String),
    #[error("PLY parse error: list properties in vertex element are unsupported")]
    ListProperty,
    #[error("PLY parse error: vertex must be the first element (found '{0}' first)")]
    VertexNotFirst(String),
    #[error("PLY parse error: missing vertex element or properties")]
    MissingVertexElement,
    #[error("PLY parse error: invalid vertex count")]
    InvalidCount(#[from] std::num::ParseIntError),
    #[error("PLY parse error: required property '{0}' not declared")]
    MissingProperty(&'static str),
    #[error("PLY parse error: {0} f_rest properties exceed the supported maximum of 45")]
    TooManyRestCoefficients(usize),
    #[error("PLY parse error: file truncated (need {need} bytes, have {have})")]
    Truncated { need: usize, have: usize },
    #[error("PLY parse error: size overflow computing {0}")]
    SizeOverflow(&'static str),
    #[error("PLY parse error: destination holds {have} bytes, {need} needed")]
    DestinationTooSmall { need: usize, have: usize },
    #[error("PLY parse error: vertex read at offset {0} is out of bounds")]
    OutOfBounds(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl PlyType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::Char),
            "uchar" | "uint8" => Some(Self::UChar),
            "short" | "int16" => Some(Self::Short),
            "ushort" | "uint16" => Some(Self::UShort),
            "int" | "int32" => Some(Self::Int),
            "uint" | "uint32" => Some(Self::UInt),
            "float" | "float32" => Some(Self::Float),
            "double" | "float64" => Some(Self::Double),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn read_as_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Char => i8::from_le_bytes([bytes[0]]) as f32,
            Self::UChar => u8::from_le_bytes([bytes[0]]) as f32,
            Self::Short => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            Self::UShort => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            Self::Int => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Self::UInt => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Self::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Self::Double => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes[0..8]);
                f64::from_le_bytes(arr) as f32
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyProperty {
    pub name: String,
    pub ty: PlyType,
    /// Byte offset inside one vertex.
    pub offset: usize,
}

/// Where each field of a [`RawVertexRecord`] lives inside one vertex.
#[derive(Debug, Clone)]
struct FieldSlots {
    position: [usize; 3],
    opacity: usize,
    scale: [usize; 3],
    sh_dc: [usize; 3],
    rotation: Option<[usize; 4]>,
    sh_rest: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PlyHeader<'a> {
    vertex_count: usize,
    properties: Vec<PlyProperty>,
    stride: usize,
    slots: FieldSlots,
    vertex_data: &'a [u8],
}

/// Byte offset just past the first line that reads exactly `end_header`.
fn find_ply_header_end(data: &[u8]) -> Option<usize> {
    let mut start = 0;
    while start < data.len() {
        let end = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(data.len(), |i| start + i + 1);
        if data[start..end].trim_ascii() == b"end_header" {
            return Some(end);
        }
        start = end;
    }
    None
}

/// Parses the header and returns a decoder over the vertex block that follows it.
pub fn decode_header(data: &[u8]) -> Result<PlyHeader<'_>, PlyError> {
    let magic = data.split(|&b| b == b'\n').next().unwrap_or_default();
    if magic.trim_ascii() != b"ply" {
        return Err(PlyError::MissingMagic);
    }
    let header_end = find_ply_header_end(data).ok_or(PlyError::MissingEndHeader)?;
    let header_text = std::str::from_utf8(&data[..header_end])?;

    let mut format: Option<String> = None;
    let mut vertex_count: Option<usize> = None;
    let mut in_vertex_element = false;
    let mut first_element: Option<String> = None;
    let mut properties: Vec<PlyProperty> = Vec::new();
    let mut stride = 0usize;

    for line in header_text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("comment") || line.starts_with("obj_info") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts[0] {
            "format" if parts.len() >= 2 => format = Some(parts[1].to_string()),
            "element" if parts.len() >= 3 => {
                if first_element.is_none() {
                    first_element = Some(parts[1].to_string());
                }
                in_vertex_element = parts[1] == "vertex";
                if in_vertex_element {
                    vertex_count = Some(parts[2].parse::<usize>()?);
                }
            }
            "property" if in_vertex_element && parts.len() >= 3 => {
                if parts[1] == "list" {
                    return Err(PlyError::ListProperty);
                }
                let ty = PlyType::parse(parts[1])
                    .ok_or_else(|| PlyError::UnsupportedType(parts[1].to_string()))?;
                properties.push(PlyProperty {
                    name: parts[2].to_string(),
                    ty,
                    offset: stride,
                });
                stride = stride
                    .checked_add(ty.size())
                    .ok_or(PlyError::SizeOverflow("vertex stride"))?;
            }
            _ => {}
        }
    }

    match format.as_deref() {
        Some("binary_little_endian") => {}
        other => return Err(PlyError::UnsupportedFormat(other.unwrap_or("none").to_string())),
    }
    if let Some(first) = first_element.filter(|name| name != "vertex") {
        return Err(PlyError::VertexNotFirst(first));
    }
    let vertex_count = vertex_count.ok_or(PlyError::MissingVertexElement)?;
    if properties.is_empty() {
        return Err(PlyError::MissingVertexElement);
    }

    let slots = FieldSlots::resolve(&properties)?;

    let vertex_bytes = vertex_count
        .checked_mul(stride)
        .ok_or(PlyError::SizeOverflow("vertex block size"))?;
    let needed = header_end
        .checked_add(vertex_bytes)
        .ok_or(PlyError::SizeOverflow("vertex block size"))?;
    if data.len() < needed {
        return Err(PlyError::Truncated {
            need: needed,
            have: data.len(),
        });
    }

    Ok(PlyHeader {
        vertex_count,
        properties,
        stride,
        slots,
        vertex_data: &data[header_end..needed],
    })
}

impl FieldSlots {
    fn resolve(properties: &[PlyProperty]) -> Result<Self, PlyError> {
        let by_name: HashMap<&str, usize> = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let require = |name: &'static str| {
            by_name
                .get(name)
                .copied()
                .ok_or(PlyError::MissingProperty(name))
        };
        for name in REQUIRED_PROPERTIES {
            require(name)?;
        }

        let rotation = match (
            by_name.get("rot_0"),
            by_name.get("rot_1"),
            by_name.get("rot_2"),
            by_name.get("rot_3"),
        ) {
            (Some(&w), Some(&x), Some(&y), Some(&z)) => Some([w, x, y, z]),
            _ => None,
        };

        // f_rest_N is addressed by N, not by declaration order.
        let n_rest = properties
            .iter()
            .filter(|p| p.name.starts_with("f_rest_"))
            .count();
        if n_rest > MAX_REST_COEFFS {
            return Err(PlyError::TooManyRestCoefficients(n_rest));
        }
        let sh_rest = (0..n_rest)
            .map(|i| {
                by_name
                    .get(format!("f_rest_{i}").as_str())
                    .copied()
                    .ok_or(PlyError::MissingProperty("f_rest_*"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            position: [require("x")?, require("y")?, require("z")?],
            opacity: require("opacity")?,
            scale: [require("scale_0")?, require("scale_1")?, require("scale_2")?],
            sh_dc: [require("f_dc_0")?, require("f_dc_1")?, require("f_dc_2")?],
            rotation,
            sh_rest,
        })
    }
}

impl PlyHeader<'_> {
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn property(&self, name: &str) -> Option<&PlyProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn rest_coefficient_count(&self) -> usize {
        self.slots.sh_rest.len()
    }

    fn field(&self, vertex: &[u8], index: usize) -> f32 {
        let prop = &self.properties[index];
        let range: Range<usize> = prop.offset..prop.offset + prop.ty.size();
        prop.ty.read_as_f32(&vertex[range])
    }

    /// Decodes the vertex starting at `offset` inside the vertex block and
    /// returns the offset of the next one.
    pub fn read_vertex(&self, offset: usize) -> Result<(usize, RawVertexRecord), PlyError> {
        let end = offset
            .checked_add(self.stride)
            .ok_or(PlyError::SizeOverflow("vertex offset"))?;
        let vertex = self
            .vertex_data
            .get(offset..end)
            .ok_or(PlyError::OutOfBounds(offset))?;

        let slots = &self.slots;
        let mut record = RawVertexRecord {
            position: slots.position.map(|i| self.field(vertex, i)),
            opacity: self.field(vertex, slots.opacity),
            scale: slots.scale.map(|i| self.field(vertex, i)),
            sh_dc: slots.sh_dc.map(|i| self.field(vertex, i)),
            ..Default::default()
        };
        if let Some(rotation) = slots.rotation {
            record.rotation = rotation.map(|i| self.field(vertex, i));
        }
        for (dst, &index) in record.sh_rest.iter_mut().zip(&slots.sh_rest) {
            *dst = self.field(vertex, index);
        }

        Ok((end, record))
    }
}

/// Writes records as a binary little-endian PLY carrying `n_rest` rest coefficients.
pub fn encode_binary_ply(records: &[RawVertexRecord], n_rest: usize) -> Vec<u8> {
    let n_rest = n_rest.min(MAX_REST_COEFFS);
    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {}\n", records.len()));
    for name in ["x", "y", "z", "opacity", "scale_0", "scale_1", "scale_2"] {
        header.push_str(&format!("property float {name}\n"));
    }
    for name in ["rot_0", "rot_1", "rot_2", "rot_3", "f_dc_0", "f_dc_1", "f_dc_2"] {
        header.push_str(&format!("property float {name}\n"));
    }
    for i in 0..n_rest {
        header.push_str(&format!("property float f_rest_{i}\n"));
    }
    header.push_str("end_header\n");

    let floats_per_vertex = 14 + n_rest;
    let mut out = Vec::with_capacity(header.len() + records.len() * floats_per_vertex * 4);
    out.extend_from_slice(header.as_bytes());
    for r in records {
        let fixed = r
            .position
            .iter()
            .chain(std::iter::once(&r.opacity))
            .chain(&r.scale)
            .chain(&r.rotation)
            .chain(&r.sh_dc)
            .chain(&r.sh_rest[..n_rest]);
        for value in fixed {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}
