use std::path::Path;

use anyhow::Context;

use crate::mesh::MeshData;
use crate::vertex::Vertex;

/// 加载 STL，二进制与 ASCII 两种格式由 `stl_io` 自动识别
///
/// STL 的法线是逐三角形的，每个三角形的 3 个顶点独立，不做合并
pub fn load_stl(path: &Path) -> anyhow::Result<MeshData> {
    let _span = tracy_client::span!("load_stl");
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    // 解析错误不是 io 错误，转换为普通的解码错误
    let triangles =
        stl_io::create_stl_reader(&mut reader).map_err(|e| anyhow::anyhow!("invalid stl {}: {e}", path.display()))?;

    let mut mesh = MeshData::default();
    for triangle in triangles {
        let triangle = triangle.map_err(|e| anyhow::anyhow!("invalid stl triangle in {}: {e}", path.display()))?;
        for vertex in triangle.vertices {
            push_corner(&mut mesh, vertex.0, triangle.normal.0);
        }
    }
    mesh.name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    anyhow::ensure!(mesh.is_valid(), "no triangles found in {}", path.display());
    Ok(mesh)
}

#[inline]
fn push_corner(mesh: &mut MeshData, position: [f32; 3], normal: [f32; 3]) {
    mesh.indices.push(mesh.vertices.len() as u32);
    mesh.vertices.push(Vertex {
        position,
        normal,
        ..Default::default()
    });
}
