//! STL reading and writing

use thiserror::Error;

/// Triangle soup with indexed vertices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    fn push_facet(&mut self, corners: [[f64; 3]; 3]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.triangles.push([base, base + 1, base + 2]);
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StlError {
    #[error("File is too short to be an STL mesh")]
    Truncated,

    #[error("Malformed ASCII STL at line {line}: {message}")]
    Malformed { line: u32, message: String },

    #[error("STL contains no facets")]
    Empty,
}

/// Parse binary or ASCII STL
pub fn parse_stl(bytes: &[u8]) -> Result<Mesh, StlError> {
    if is_binary_stl(bytes) {
        parse_binary(bytes)
    } else {
        let text = std::str::from_utf8(bytes).map_err(|_| StlError::Truncated)?;
        parse_ascii(text)
    }
}

/// Binary STL: 80-byte header, u32 facet count, 50 bytes per facet
pub fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    bytes.len() == 84 + count * 50
}

/// Cheap check used by capability probing
pub fn looks_like_stl(bytes: &[u8]) -> bool {
    is_binary_stl(bytes) || bytes.trim_ascii_start().starts_with(b"solid")
}

fn parse_binary(bytes: &[u8]) -> Result<Mesh, StlError> {
    let mut mesh = Mesh::default();
    for facet in bytes[84..].chunks_exact(50) {
        // Skip the stored normal; it is recomputed on export
        let corner = |i: usize| {
            let at = 12 + i * 12;
            [
                read_f32(&facet[at..]) as f64,
                read_f32(&facet[at + 4..]) as f64,
                read_f32(&facet[at + 8..]) as f64,
            ]
        };
        mesh.push_facet([corner(0), corner(1), corner(2)]);
    }
    if mesh.triangles.is_empty() {
        return Err(StlError::Empty);
    }
    Ok(mesh)
}

fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_ascii(text: &str) -> Result<Mesh, StlError> {
    let mut mesh = Mesh::default();
    let mut corners: Vec<[f64; 3]> = Vec::with_capacity(3);

    for (index, raw) in text.lines().enumerate() {
        let line = (index + 1) as u32;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("vertex") => {
                let mut point = [0.0; 3];
                for slot in &mut point {
                    *slot = tokens
                        .next()
                        .and_then(|t| t.parse::<f64>().ok())
                        .ok_or_else(|| StlError::Malformed {
                            line,
                            message: "expected three coordinates".to_string(),
                        })?;
                }
                corners.push(point);
            }
            Some("endloop") => {
                if corners.len() != 3 {
                    return Err(StlError::Malformed {
                        line,
                        message: format!("facet has {} vertices", corners.len()),
                    });
                }
                mesh.push_facet([corners[0], corners[1], corners[2]]);
                corners.clear();
            }
            _ => {}
        }
    }

    if mesh.triangles.is_empty() {
        return Err(StlError::Empty);
    }
    Ok(mesh)
}

#[inline]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len <= f64::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

fn facet_normal(mesh: &Mesh, tri: [u32; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
    let a = mesh.vertices[tri[0] as usize];
    let b = mesh.vertices[tri[1] as usize];
    let c = mesh.vertices[tri[2] as usize];
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    (normalize(cross(ab, ac)), [a, b, c])
}

pub fn to_binary_stl(mesh: &Mesh, name: &str) -> Vec<u8> {
    let mut bytes = Vec::<u8>::with_capacity(84 + mesh.triangles.len() * 50);

    let mut header = [0u8; 80];
    let header_len = name.len().min(80);
    header[..header_len].copy_from_slice(&name.as_bytes()[..header_len]);
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&(mesh.triangles.len() as u32).to_le_bytes());

    for tri in &mesh.triangles {
        let (n, [a, b, c]) = facet_normal(mesh, *tri);
        for v in [n, a, b, c] {
            for coord in v {
                bytes.extend_from_slice(&(coord as f32).to_le_bytes());
            }
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }

    bytes
}

pub fn to_ascii_stl(mesh: &Mesh, name: &str) -> String {
    let mut out = format!("solid {name}\n");

    for tri in &mesh.triangles {
        let (n, corners) = facet_normal(mesh, *tri);
        out.push_str(&format!("  facet normal {} {} {}\n", n[0], n[1], n[2]));
        out.push_str("    outer loop\n");
        for v in corners {
            out.push_str(&format!("      vertex {} {} {}\n", v[0], v[1], v[2]));
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }

    out.push_str(&format!("endsolid {name}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn test_binary_layout() {
        let bytes = to_binary_stl(&triangle(), "tri");
        assert_eq!(bytes.len(), 84 + 50);
        assert!(is_binary_stl(&bytes));

        // Normal of a CCW triangle in the XY plane points at +Z
        let nz = f32::from_le_bytes([bytes[92], bytes[93], bytes[94], bytes[95]]);
        assert_eq!(nz, 1.0);
    }

    #[test]
    fn test_parse_binary_output() {
        let parsed = parse_stl(&to_binary_stl(&triangle(), "tri")).unwrap();
        assert_eq!(parsed, triangle());
    }

    #[test]
    fn test_parse_ascii() {
        let text = to_ascii_stl(&triangle(), "tri");
        assert!(text.starts_with("solid tri"));
        assert!(looks_like_stl(text.as_bytes()));

        let parsed = parse_stl(text.as_bytes()).unwrap();
        assert_eq!(parsed.triangles.len(), 1);
        assert_eq!(parsed.vertices[1], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_stl(b"solid empty\nendsolid empty\n"), Err(StlError::Empty));

        let bad = "solid x\nfacet normal 0 0 1\nouter loop\nvertex 0 0\n";
        assert!(matches!(parse_stl(bad.as_bytes()), Err(StlError::Malformed { line: 4, .. })));

        let short = "solid x\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nendloop\n";
        assert!(matches!(parse_stl(short.as_bytes()), Err(StlError::Malformed { line: 5, .. })));
    }

    #[test]
    fn test_not_stl() {
        assert!(!looks_like_stl(b"cube(10);"));
    }
}
