//! 参数化网格生成
//!
//! 产出顶点/索引列表以及对应的字节视图，交给渲染侧的
//! `set_vertex_data` / `set_index_data` 上传。

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// position + normal + uv 的交错顶点
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    #[inline]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

pub struct MeshBuilder;

impl MeshBuilder {
    /// UV 球
    ///
    /// `phi` 是经度（绕 y 轴，0..2π），`theta` 是纬度（0..π）。
    /// 顶点按 (height_segments+1) x (width_segments+1) 网格排布。
    #[allow(clippy::too_many_arguments)]
    pub fn sphere(
        radius: f32,
        width_segments: u32,
        height_segments: u32,
        phi_start: f32,
        phi_length: f32,
        theta_start: f32,
        theta_length: f32,
    ) -> Mesh {
        let width_segments = width_segments.max(3);
        let height_segments = height_segments.max(2);

        let mut mesh = Mesh::default();

        for iy in 0..=height_segments {
            let v = iy as f32 / height_segments as f32;
            let theta = theta_start + v * theta_length;
            let (sin_theta, cos_theta) = theta.sin_cos();

            for ix in 0..=width_segments {
                let u = ix as f32 / width_segments as f32;
                let phi = phi_start + u * phi_length;
                let (sin_phi, cos_phi) = phi.sin_cos();

                let normal = Vec3::new(-cos_phi * sin_theta, cos_theta, sin_phi * sin_theta);
                mesh.vertices.push(MeshVertex {
                    position: (normal * radius).to_array(),
                    normal: normal.to_array(),
                    uv: Vec2::new(u, 1.0 - v).to_array(),
                });
            }
        }

        let row = width_segments + 1;
        for iy in 0..height_segments {
            for ix in 0..width_segments {
                let a = iy * row + ix + 1;
                let b = iy * row + ix;
                let c = (iy + 1) * row + ix;
                let d = (iy + 1) * row + ix + 1;

                // 极点处跳过退化三角形
                if iy != 0 || theta_start > 0.0 {
                    mesh.indices.extend_from_slice(&[a, b, d]);
                }
                if iy != height_segments - 1 || theta_start + theta_length < std::f32::consts::PI {
                    mesh.indices.extend_from_slice(&[b, c, d]);
                }
            }
        }

        mesh
    }

    /// 整球的便捷构造
    pub fn sphere_full(radius: f32, width_segments: u32, height_segments: u32) -> Mesh {
        Self::sphere(radius, width_segments, height_segments, 0.0, std::f32::consts::TAU, 0.0, std::f32::consts::PI)
    }

    /// xz 平面上的矩形网格，法线朝 +y，中心在原点
    pub fn plane(width: f32, height: f32, width_segments: u32, height_segments: u32) -> Mesh {
        let width_segments = width_segments.max(1);
        let height_segments = height_segments.max(1);

        let mut mesh = Mesh::default();

        for iy in 0..=height_segments {
            let v = iy as f32 / height_segments as f32;
            for ix in 0..=width_segments {
                let u = ix as f32 / width_segments as f32;
                mesh.vertices.push(MeshVertex {
                    position: [(u - 0.5) * width, 0.0, (v - 0.5) * height],
                    normal: [0.0, 1.0, 0.0],
                    uv: [u, 1.0 - v],
                });
            }
        }

        let row = width_segments + 1;
        for iy in 0..height_segments {
            for ix in 0..width_segments {
                let a = iy * row + ix;
                let b = a + 1;
                let c = a + row;
                let d = c + 1;
                mesh.indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }

        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_vertex_and_index_counts() {
        let mesh = MeshBuilder::plane(2.0, 2.0, 4, 3);
        assert_eq!(mesh.vertices.len(), 5 * 4);
        assert_eq!(mesh.indices.len(), (4 * 3 * 6) as usize);
    }

    #[test]
    fn test_plane_spans_requested_extent(){
        let mesh = MeshBuilder::plane(4.0, 2.0, 2, 2);
        let xs: Vec<f32> = mesh.vertices.iter().map(|v| v.position[0]).collect();
        let zs: Vec<f32> = mesh.vertices.iter().map(|v| v.position[2]).collect();

        assert!((xs.iter().cloned().fold(f32::MAX, f32::min) + 2.0).abs() < 1e-6);
        assert!((xs.iter().cloned().fold(f32::MIN, f32::max) - 2.0).abs() < 1e-6);
        assert!((zs.iter().cloned().fold(f32::MAX, f32::min) + 1.0).abs() < 1e-6);
        assert!((zs.iter().cloned().fold(f32::MIN, f32::max) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sphere_vertices_lie_on_radius() {
        let mesh = MeshBuilder::sphere_full(2.5, 8, 6);
        for vertex in &mesh.vertices {
            let p = Vec3::from_array(vertex.position);
            assert!((p.length() - 2.5).abs() < 1e-4);

            let n = Vec3::from_array(vertex.normal);
            assert!((n.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_sphere_indices_are_in_range() {
        let mesh = MeshBuilder::sphere_full(1.0, 12, 8);
        let vertex_count = mesh.vertices.len() as u32;
        assert!(mesh.indices.iter().all(|&i| i < vertex_count));
        assert_eq!(mesh.indices.len() % 3, 0);
    }

    #[test]
    fn test_vertex_bytes_are_tightly_packed() {
        let mesh = MeshBuilder::plane(1.0, 1.0, 1, 1);
        assert_eq!(mesh.vertex_bytes().len(), mesh.vertices.len() * 32);
        assert_eq!(mesh.index_bytes().len(), mesh.indices.len() * 4);
    }
}
