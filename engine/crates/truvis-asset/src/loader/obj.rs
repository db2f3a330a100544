use std::path::Path;

use anyhow::Context;
use itertools::Itertools;

use crate::mesh::MeshData;
use crate::vertex::Vertex;

/// 通过 tobj 加载 OBJ，每个 model 对应一个子网格
///
/// 三角化并统一索引。缺失的法线取 +Y，缺失的 UV 取 0，缺失的顶点色取白色，材质被忽略
pub fn load_obj(path: &Path) -> anyhow::Result<Vec<MeshData>> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let (models, _materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_lines: true,
            ignore_points: true,
            ..Default::default()
        },
        |_material_path| Err(tobj::LoadError::MaterialParseError),
    )
    .context("failed loading obj")?;

    let meshes = models
        .into_iter()
        .filter(|model| !model.mesh.positions.is_empty())
        .map(|model| {
            let mesh = &model.mesh;
            let vertices = mesh
                .positions
                .chunks_exact(3)
                .enumerate()
                .map(|(i, p)| Vertex {
                    color: attribute(&mesh.vertex_color, i).map_or([1.0; 4], |[r, g, b]| [r, g, b, 1.0]),
                    position: [p[0], p[1], p[2]],
                    normal: attribute(&mesh.normals, i).unwrap_or([0.0, 1.0, 0.0]),
                    texcoord: attribute(&mesh.texcoords, i).unwrap_or([0.0, 0.0]),
                })
                .collect_vec();
            MeshData {
                name: model.name,
                vertices,
                indices: mesh.indices.clone(),
            }
        })
        .collect_vec();

    anyhow::ensure!(!meshes.is_empty(), "no geometry found in {}", path.display());
    Ok(meshes)
}

/// 取第 `i` 个长度为 `N` 的属性，属性缺失时返回 None
#[inline]
fn attribute<const N: usize>(data: &[f32], i: usize) -> Option<[f32; N]> {
    data.get(i * N..(i + 1) * N).and_then(|s| s.try_into().ok())
}
