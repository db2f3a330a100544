use crate::vertex::Vertex;

/// CPU 端的网格数据，不持有任何 GPU 资源
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

// getters
impl MeshData {
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty()
    }

    #[inline]
    pub fn vertex_data_size(&self) -> usize {
        size_of_val(self.vertices.as_slice())
    }

    #[inline]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

// 程序化几何体
impl MeshData {
    /// 坐标系：RightHandle, X-Right, Y-Up
    ///
    /// 每个面 4 个顶点，共 24 个顶点、36 个索引，三角形绕序 CCW
    pub fn cube(size: f32, color: glam::Vec4) -> Self {
        let h = size * 0.5;
        // (法线, 4 个角)，角的顺序与 UV (0,0) (1,0) (1,1) (0,1) 对应
        let faces: [(glam::Vec3, [glam::Vec3; 4]); 6] = [
            // +Z
            (
                glam::Vec3::Z,
                [glam::vec3(-h, -h, h), glam::vec3(h, -h, h), glam::vec3(h, h, h), glam::vec3(-h, h, h)],
            ),
            // -Z
            (
                glam::Vec3::NEG_Z,
                [glam::vec3(h, -h, -h), glam::vec3(-h, -h, -h), glam::vec3(-h, h, -h), glam::vec3(h, h, -h)],
            ),
            // +X
            (
                glam::Vec3::X,
                [glam::vec3(h, -h, h), glam::vec3(h, -h, -h), glam::vec3(h, h, -h), glam::vec3(h, h, h)],
            ),
            // -X
            (
                glam::Vec3::NEG_X,
                [glam::vec3(-h, -h, -h), glam::vec3(-h, -h, h), glam::vec3(-h, h, h), glam::vec3(-h, h, -h)],
            ),
            // +Y
            (
                glam::Vec3::Y,
                [glam::vec3(-h, h, h), glam::vec3(h, h, h), glam::vec3(h, h, -h), glam::vec3(-h, h, -h)],
            ),
            // -Y
            (
                glam::Vec3::NEG_Y,
                [glam::vec3(-h, -h, -h), glam::vec3(h, -h, -h), glam::vec3(h, -h, h), glam::vec3(-h, -h, h)],
            ),
        ];
        const UVS: [glam::Vec2; 4] = [
            glam::vec2(0.0, 0.0),
            glam::vec2(1.0, 0.0),
            glam::vec2(1.0, 1.0),
            glam::vec2(0.0, 1.0),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, corners) in faces {
            let base = vertices.len() as u32;
            vertices.extend(corners.iter().zip(UVS).map(|(&p, uv)| Vertex::new(p, normal, uv, color)));
            indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
        }

        Self {
            name: "Cube".to_string(),
            vertices,
            indices,
        }
    }

    /// UV 球，`segments` 至少为 3，`rings` 至少为 2
    ///
    /// 顶点数 `(rings + 1) * (segments + 1)`，接缝处的顶点重复以保证 UV 连续
    pub fn sphere(radius: f32, segments: u32, rings: u32, color: glam::Vec4) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);

        let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
        for ring in 0..=rings {
            // 纬度角 [0, PI]
            let theta = ring as f32 * std::f32::consts::PI / rings as f32;
            for seg in 0..=segments {
                // 经度角 [0, 2PI]
                let phi = seg as f32 * std::f32::consts::TAU / segments as f32;
                let dir = glam::vec3(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                let uv = glam::vec2(seg as f32 / segments as f32, ring as f32 / rings as f32);
                vertices.push(Vertex::new(dir * radius, dir, uv, color));
            }
        }

        let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;
                indices.extend([current, next, current + 1, current + 1, next, next + 1]);
            }
        }

        Self {
            name: "Sphere".to_string(),
            vertices,
            indices,
        }
    }
}
