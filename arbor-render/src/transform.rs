//! 3×3 affine matrices for the two render paths.
//!
//! Everything is column-major, matching WGSL `mat3x3<f32>` and the
//! per-instance attribute layout.  Final clip position is
//! `projection × pan_zoom × instance × point` (instanced path) or
//! `projection × pan_zoom × point` (bulk path).

use arbor_core::{BoundingBox, NodeSnapshot, Point, Viewport};
use glam::{Mat3, Vec2, Vec3};

use crate::render_type::NodeRenderType;

/// Floats in one matrix slot.
pub const MATRIX_SIZE: usize = 9;

/// Object-space unit quad → model space.
///
/// Rotated: translate to `pivot`, rotate, translate by `offset`, scale.
/// Unrotated: translate to the box origin, scale.  The order matters.
pub fn instance_matrix(bb: &BoundingBox, rotation: f32, pivot: Point, offset: Point) -> Mat3 {
    let mut matrix = Mat3::IDENTITY;

    let origin = if rotation != 0.0 {
        matrix *= Mat3::from_translation(Vec2::new(pivot.x, pivot.y));
        matrix *= Mat3::from_angle(rotation);
        Vec2::new(offset.x, offset.y)
    } else {
        Vec2::new(bb.x1, bb.y1)
    };

    matrix *= Mat3::from_translation(origin);
    matrix *= Mat3::from_scale(Vec2::new(bb.w, bb.h));
    matrix
}

/// Instance matrix for `node` using the accessors of its render type.
pub fn compute_instance_matrix(render_type: &dyn NodeRenderType, node: &NodeSnapshot) -> Mat3 {
    instance_matrix(
        &render_type.bounding_box(node),
        render_type.rotation(node),
        render_type.rotation_point(node),
        render_type.rotation_offset(node),
    )
}

/// Camera matrix: scale by zoom, translate by pan, both corrected for
/// the device pixel ratio.
pub fn pan_zoom(viewport: &Viewport) -> Mat3 {
    let zoom = viewport.zoom * viewport.pixel_ratio;
    let x = viewport.pan.x * viewport.pixel_ratio;
    let y = viewport.pan.y * viewport.pixel_ratio;
    Mat3::from_cols(
        Vec3::new(zoom, 0.0, 0.0),
        Vec3::new(0.0, zoom, 0.0),
        Vec3::new(x, y, 1.0),
    )
}

/// Canvas pixels `[0,w] × [0,h]` (y down) → clip space `[-1,1]²` (y up).
pub fn projection(width: f32, height: f32) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(2.0 / width, 0.0, 0.0),
        Vec3::new(0.0, -2.0 / height, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
    )
}

/// `projection × pan_zoom` for a viewport.
pub fn view_projection(viewport: &Viewport) -> Mat3 {
    projection(viewport.width, viewport.height) * pan_zoom(viewport)
}

/// Write `matrix` column-major into an existing slot.
#[inline]
pub fn write_mat3(matrix: &Mat3, slot: &mut [f32; MATRIX_SIZE]) {
    matrix.write_cols_to_slice(slot);
}

/// Uniform-buffer layout of a `mat3x3<f32>`: each column padded to 16 bytes.
pub fn mat3_to_std140(matrix: &Mat3) -> [[f32; 4]; 3] {
    let c = matrix.to_cols_array_2d();
    [
        [c[0][0], c[0][1], c[0][2], 0.0],
        [c[1][0], c[1][1], c[1][2], 0.0],
        [c[2][0], c[2][1], c[2][2], 0.0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn apply(m: &Mat3, x: f32, y: f32) -> Vec2 {
        m.transform_point2(Vec2::new(x, y))
    }

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_unrotated_translate_then_scale() {
        let bb = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
        let m = instance_matrix(&bb, 0.0, Point::default(), Point::default());
        assert!(close(apply(&m, 1.0, 1.0), Vec2::new(10.0, 20.0)));
        assert!(close(apply(&m, 0.0, 0.0), Vec2::ZERO));
    }

    #[test]
    fn test_unrotated_uses_box_origin() {
        let bb = BoundingBox::new(30.0, 40.0, 10.0, 20.0);
        let m = instance_matrix(&bb, 0.0, Point::new(99.0, 99.0), Point::new(7.0, 7.0));
        assert!(close(apply(&m, 0.0, 0.0), Vec2::new(30.0, 40.0)));
        assert!(close(apply(&m, 1.0, 1.0), Vec2::new(40.0, 60.0)));
    }

    #[test]
    fn test_rotated_branch_orders_rotation_before_scale() {
        let bb = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
        let rotated = instance_matrix(&bb, FRAC_PI_2, Point::new(5.0, 5.0), Point::new(2.0, 3.0));
        let plain = instance_matrix(&bb, 0.0, Point::new(5.0, 5.0), Point::new(2.0, 3.0));
        assert_ne!(rotated, plain);

        // Origin: pivot + R(90°)·offset = (5,5) + (-3,2).
        assert!(close(apply(&rotated, 0.0, 0.0), Vec2::new(2.0, 7.0)));
        // Unit x is scaled by w first and then rotated onto +y.
        assert!(close(apply(&rotated, 1.0, 0.0), Vec2::new(2.0, 17.0)));
        // Unit y is scaled by h first and then rotated onto -x.
        assert!(close(apply(&rotated, 0.0, 1.0), Vec2::new(-18.0, 7.0)));
    }

    #[test]
    fn test_projection_maps_canvas_corners() {
        let p = projection(800.0, 600.0);
        assert!(close(apply(&p, 0.0, 0.0), Vec2::new(-1.0, 1.0)));
        assert!(close(apply(&p, 800.0, 600.0), Vec2::new(1.0, -1.0)));
        assert!(close(apply(&p, 400.0, 300.0), Vec2::ZERO));
    }

    #[test]
    fn test_pan_zoom_applies_pixel_ratio() {
        let vp = Viewport::new(800.0, 600.0)
            .with_pan_zoom(Point::new(10.0, 20.0), 3.0)
            .with_pixel_ratio(2.0);
        let m = pan_zoom(&vp);
        assert!(close(apply(&m, 1.0, 1.0), Vec2::new(26.0, 46.0)));
    }

    #[test]
    fn test_view_projection_composition() {
        let vp = Viewport::new(200.0, 100.0).with_pan_zoom(Point::new(100.0, 50.0), 1.0);
        let m = view_projection(&vp);
        // Model origin lands at the canvas centre.
        assert!(close(apply(&m, 0.0, 0.0), Vec2::ZERO));
    }

    #[test]
    fn test_write_mat3_is_column_major() {
        let m = Mat3::from_translation(Vec2::new(3.0, 4.0));
        let mut slot = [0.0; MATRIX_SIZE];
        write_mat3(&m, &mut slot);
        assert_eq!(slot, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 3.0, 4.0, 1.0]);
    }

    #[test]
    fn test_std140_padding() {
        let padded = mat3_to_std140(&Mat3::IDENTITY);
        assert_eq!(padded[2], [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(std::mem::size_of_val(&padded), 48);
    }
}
