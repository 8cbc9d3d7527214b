//! PLY decoding
//!
//! Splatting pipelines publish their result as PLY: usually a bare vertex
//! element with dozens of per-splat float properties, sometimes a mesh with a
//! face element. Only positions, normals and polygon faces are kept.

use crate::types::{ImportResult, ModelFormat};
use drape_core::{ContentHash, DrapeError, Mesh, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Encoding {
    Ascii,
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            other => return Err(ply_error(format!("unknown property type '{}'", other))),
        })
    }

    fn size(&self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
    body_offset: usize,
}

fn ply_error(message: impl Into<String>) -> DrapeError {
    DrapeError::Import(format!("Invalid PLY: {}", message.into()))
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    const END: &[u8] = b"end_header";
    let end = bytes
        .windows(END.len())
        .position(|w| w == END)
        .ok_or_else(|| ply_error("missing end_header"))?;
    let mut body_offset = end + END.len();
    // header line ends with \n or \r\n
    if bytes.get(body_offset) == Some(&b'\r') {
        body_offset += 1;
    }
    if bytes.get(body_offset) == Some(&b'\n') {
        body_offset += 1;
    }

    let text = std::str::from_utf8(&bytes[..end]).map_err(|_| ply_error("header is not UTF-8"))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("ply") {
        return Err(ply_error("missing magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["format", fmt, _version] => {
                encoding = Some(match *fmt {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::LittleEndian,
                    "binary_big_endian" => Encoding::BigEndian,
                    other => return Err(ply_error(format!("unknown format '{}'", other))),
                });
            }
            ["comment", ..] | ["obj_info", ..] => {}
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| ply_error(format!("bad element count '{}'", count)))?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| ply_error("property before element"))?;
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count: Scalar::parse(count)?,
                    item: Scalar::parse(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| ply_error("property before element"))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: Scalar::parse(ty)?,
                });
            }
            _ => return Err(ply_error(format!("unexpected header line '{}'", line))),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| ply_error("missing format line"))?,
        elements,
        body_offset,
    })
}

/// Sequential value reader over the PLY body
struct BodyReader<'a> {
    encoding: Encoding,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(encoding: Encoding, body: &'a [u8]) -> Result<Self> {
        if encoding == Encoding::Ascii && std::str::from_utf8(body).is_err() {
            return Err(ply_error("ascii body is not UTF-8"));
        }
        Ok(Self {
            encoding,
            bytes: body,
            pos: 0,
        })
    }

    /// Unread body bytes. Every value takes at least one, ascii or binary.
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Reject an element whose declared count cannot fit in what is left
    fn check_fits(&self, element: &Element) -> Result<()> {
        let min_record = element
            .properties
            .iter()
            .map(|p| match (self.encoding, p) {
                (Encoding::Ascii, _) => 1,
                (_, Property::Scalar { ty, .. }) => ty.size(),
                (_, Property::List { count, .. }) => count.size(),
            })
            .sum::<usize>()
            .max(1);
        match element.count.checked_mul(min_record) {
            Some(needed) if needed <= self.remaining() => Ok(()),
            _ => Err(ply_error(format!(
                "element '{}' declares {} records but only {} body bytes remain",
                element.name,
                element.count,
                self.remaining()
            ))),
        }
    }

    /// Read a list length, bounded by the unread input
    fn read_count(&mut self, ty: Scalar) -> Result<usize> {
        let value = self.read(ty)?;
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
            return Err(ply_error(format!("bad list length {}", value)));
        }
        if value > self.remaining() as f64 {
            return Err(ply_error(format!(
                "list length {} exceeds the {} body bytes left",
                value,
                self.remaining()
            )));
        }
        Ok(value as usize)
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let bytes = self.bytes;
        let start = self.pos + bytes[self.pos..].iter().position(|b| !b.is_ascii_whitespace())?;
        let len = bytes[start..]
            .iter()
            .position(u8::is_ascii_whitespace)
            .unwrap_or(bytes.len() - start);
        self.pos = start + len;
        // body was checked as UTF-8 and splits only on ASCII bytes
        std::str::from_utf8(&bytes[start..start + len]).ok()
    }

    fn read(&mut self, ty: Scalar) -> Result<f64> {
        if self.encoding == Encoding::Ascii {
            let token = self
                .next_token()
                .ok_or_else(|| ply_error("unexpected end of ascii body"))?;
            return token
                .parse::<f64>()
                .map_err(|_| ply_error(format!("bad ascii value '{}'", token)));
        }

        let size = ty.size();
        let raw = self
            .bytes
            .get(self.pos..self.pos + size)
            .ok_or_else(|| ply_error("unexpected end of binary body"))?;
        self.pos += size;

        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(raw);
        if self.encoding == Encoding::BigEndian {
            buf[..size].reverse();
        }
        Ok(match ty {
            Scalar::I8 => buf[0] as i8 as f64,
            Scalar::U8 => buf[0] as f64,
            Scalar::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            Scalar::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            Scalar::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Scalar::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Scalar::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Scalar::F64 => f64::from_le_bytes(buf),
        })
    }

    fn skip_list(&mut self, count: Scalar, item: Scalar) -> Result<()> {
        let n = self.read_count(count)?;
        for _ in 0..n {
            self.read(item)?;
        }
        Ok(())
    }
}

/// Decode a PLY payload (ascii or binary) into canonical geometry.
///
/// Polygons are fan-triangulated. A file without a face element yields a
/// point cloud (empty `faces`).
pub fn import_ply(bytes: &[u8]) -> Result<ImportResult> {
    let header = parse_header(bytes)?;
    let mut reader = BodyReader::new(header.encoding, &bytes[header.body_offset..])?;

    let mut mesh = Mesh::default();
    let mut normals_complete = true;

    for element in &header.elements {
        reader.check_fits(element)?;
        match element.name.as_str() {
            "vertex" => {
                let slot = |axis: &str| {
                    element.properties.iter().position(
                        |p| matches!(p, Property::Scalar { name, .. } if name == axis),
                    )
                };
                let xyz = [slot("x"), slot("y"), slot("z")];
                let nxyz = [slot("nx"), slot("ny"), slot("nz")];
                if xyz.iter().any(Option::is_none) {
                    return Err(ply_error("vertex element lacks x/y/z"));
                }
                normals_complete = nxyz.iter().all(Option::is_some);

                // bounded by check_fits
                mesh.vertices.reserve(element.count.saturating_mul(3));
                let mut values = vec![0.0f64; element.properties.len()];
                for _ in 0..element.count {
                    for (i, property) in element.properties.iter().enumerate() {
                        values[i] = match property {
                            Property::Scalar { ty, .. } => reader.read(*ty)?,
                            Property::List { count, item, .. } => {
                                reader.skip_list(*count, *item)?;
                                0.0
                            }
                        };
                    }
                    for idx in xyz.iter().flatten() {
                        mesh.vertices.push(values[*idx] as f32);
                    }
                    if normals_complete {
                        for idx in nxyz.iter().flatten() {
                            mesh.normals.push(values[*idx] as f32);
                        }
                    }
                }
            }
            "face" => {
                for _ in 0..element.count {
                    for property in &element.properties {
                        match property {
                            Property::List { name, count, item }
                                if name == "vertex_indices" || name == "vertex_index" =>
                            {
                                let n = reader.read_count(*count)?;
                                let mut polygon = Vec::new();
                                for _ in 0..n {
                                    polygon.push(reader.read(*item)? as u32);
                                }
                                if let Some((&hub, rest)) = polygon.split_first() {
                                    for pair in rest.windows(2) {
                                        mesh.faces.extend_from_slice(&[hub, pair[0], pair[1]]);
                                    }
                                }
                            }
                            Property::List { count, item, .. } => {
                                reader.skip_list(*count, *item)?;
                            }
                            Property::Scalar { ty, .. } => {
                                reader.read(*ty)?;
                            }
                        }
                    }
                }
            }
            _ => {
                // Unknown elements still have to be consumed to keep the
                // reader aligned for the ones after it.
                for _ in 0..element.count {
                    for property in &element.properties {
                        match property {
                            Property::Scalar { ty, .. } => {
                                reader.read(*ty)?;
                            }
                            Property::List { count, item, .. } => {
                                reader.skip_list(*count, *item)?;
                            }
                        }
                    }
                }
            }
        }
    }

    if !normals_complete {
        mesh.normals.clear();
    }
    mesh.validate()?;

    Ok(ImportResult {
        format: ModelFormat::Ply,
        mesh,
        materials: Vec::new(),
        skeleton: None,
        primitive_count: 1,
        content_hash: ContentHash::from_bytes(bytes),
    })
}
