use super::{
    normalize_z_angle, CameraMode, CameraState, MAX_CYLINDER_FOV, MAX_DISTANCE,
    MIN_CYLINDER_IMAGES, MIN_DISTANCE, Z_FAR, Z_NEAR,
};
use crate::{gl::Viewport, grid::HeightGrid};
use bevy::prelude::*;

/// Size of the model in the unit box, and the elevation the tilted cameras orbit around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelExtent {
    pub width: f32,
    pub height: f32,
    pub center_elevation: f32,
}

impl Default for ModelExtent {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            center_elevation: 0.0,
        }
    }
}

impl ModelExtent {
    pub fn of(grid: &HeightGrid) -> Self {
        Self {
            width: grid.normalized_width(),
            height: grid.normalized_height(),
            center_elevation: grid.center_elevation(),
        }
    }
}

/// Skews x and y proportionally to z, for plan oblique relief.
pub fn shear_matrix(shear: Vec2) -> Mat4 {
    Mat4::from_cols(
        Vec4::X,
        Vec4::Y,
        Vec4::new(shear.x, -shear.y, 1.0, 0.0),
        Vec4::W,
    )
}

/// Projection of the camera mode.
///
/// The y axis is flipped, so that the first grid row ends up at the top of the screen.
pub fn projection_matrix(
    camera: &CameraState,
    aspect_ratio: f32,
    cylinder: Option<&CylindricalLayout>,
) -> Mat4 {
    let projection = match camera.mode() {
        CameraMode::Perspective => {
            Mat4::perspective_rh_gl(camera.fov().to_radians(), aspect_ratio, Z_NEAR, Z_FAR)
        }
        CameraMode::Cylindrical => Mat4::perspective_rh_gl(
            camera.fov().min(MAX_CYLINDER_FOV).to_radians(),
            cylinder.map_or(aspect_ratio, |layout| layout.projection_aspect),
            Z_NEAR,
            Z_FAR,
        ),
        _ => {
            let height = camera.view_distance();
            let width = aspect_ratio * height;
            Mat4::orthographic_rh_gl(
                -width / 2.0,
                width / 2.0,
                -height / 2.0,
                height / 2.0,
                0.0,
                Z_FAR,
            )
        }
    };

    projection * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
}

/// The matrices of one rendered image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTransforms {
    pub projection: Mat4,
    pub view: Mat4,
    /// Places the unit box of the terrain in front of the camera.
    pub model: Mat4,
    /// The model transform without shift and shear, used to orient the light.
    pub light: Mat4,
}

impl FrameTransforms {
    /// `z_angle` replaces the rotation of the camera, as cylindrical slices each look
    /// into a different direction.
    /// With `shear_on_cpu` the plan oblique shear is part of the model transform, for
    /// geometry that does not shear in its vertex shader.
    pub fn new(
        camera: &CameraState,
        extent: ModelExtent,
        projection: Mat4,
        z_angle: f32,
        shear_on_cpu: bool,
    ) -> Self {
        let mode = camera.mode();

        let view = if mode == CameraMode::Cylindrical {
            Mat4::look_at_rh(Vec3::ZERO, Vec3::Y, Vec3::NEG_Z)
        } else {
            Mat4::look_at_rh(Vec3::Z * camera.view_distance(), Vec3::ZERO, Vec3::Y)
        };

        let mut orientation = Mat4::IDENTITY;
        if mode.tilts() {
            orientation *= Mat4::from_rotation_x(camera.x_angle().to_radians());
        }
        orientation *= Mat4::from_rotation_z(z_angle.to_radians());

        let dz = if mode.centers_elevation() {
            -extent.center_elevation
        } else {
            0.0
        };
        let center = Mat4::from_translation(Vec3::new(-extent.width / 2.0, -extent.height / 2.0, dz));

        let mut model = Mat4::IDENTITY;
        if mode != CameraMode::Cylindrical {
            model *= Mat4::from_translation(camera.shift().extend(0.0));
        }
        model *= orientation;
        if mode == CameraMode::Cylindrical {
            model *= Mat4::from_translation((-camera.shift() / 2.0).extend(-camera.cylindrical_height()));
        }
        model *= center;
        if mode == CameraMode::PlanOblique && shear_on_cpu {
            model *= shear_matrix(camera.shear());
        }

        Self {
            projection,
            view,
            model,
            light: orientation * center,
        }
    }

    pub fn modelview(&self) -> Mat4 {
        self.view * self.model
    }

    pub fn light_modelview(&self) -> Mat4 {
        self.view * self.light
    }
}

/// Height of a cylindrical slice of the given width, such that the slice covers its
/// share of the full circle horizontally and the field of view vertically.
pub fn section_height(section_width: i32, images: u32, fov: f32) -> i32 {
    let horizontal = (360.0 / images.max(MIN_CYLINDER_IMAGES) as f32).to_radians();
    let vertical = fov.min(MAX_CYLINDER_FOV).to_radians();
    (section_width as f32 * (vertical / 2.0).tan() / (horizontal / 2.0).tan()) as i32
}

/// Placement of the perspective slices that approximate a cylindrical panorama.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CylindricalLayout {
    pub images: u32,
    pub origin: IVec2,
    pub slice_width: i32,
    pub slice_height: i32,
    /// Horizontal angle covered by each slice, in degrees.
    pub rotation_step: f32,
    /// Aspect ratio of the perspective projection shared by all slices.
    pub projection_aspect: f32,
}

impl CylindricalLayout {
    /// Slices shrink as the camera approaches the minimum distance.
    /// At least [`MIN_CYLINDER_IMAGES`] slices are rendered.
    pub fn new(viewport: Viewport, images: u32, fov: f32, view_distance: f32) -> Self {
        let images = images.max(MIN_CYLINDER_IMAGES);
        let zoom = ((view_distance - MIN_DISTANCE) / (MAX_DISTANCE - MIN_DISTANCE)).max(1e-3);

        let section_width = viewport.width / images as i32;
        let slice_width = ((section_width as f32 / zoom) as i32).max(1);
        let slice_height = ((section_height(slice_width, images, fov) as f32 / zoom) as i32).max(1);

        let projection_aspect =
            section_width.max(1) as f32 / section_height(section_width, images, fov).max(1) as f32;

        Self {
            images,
            origin: IVec2::new(viewport.x, viewport.y + (viewport.height - slice_height) / 2),
            slice_width,
            slice_height,
            rotation_step: 360.0 / images as f32,
            projection_aspect,
        }
    }

    /// The viewport of every slice, next to each other from the left, and the z angle
    /// it is rendered with.
    pub fn slices(&self, z_angle: f32) -> impl Iterator<Item = (Viewport, f32)> + '_ {
        (0..self.images).map(move |index| {
            let viewport = Viewport::new(
                self.origin.x + index as i32 * self.slice_width,
                self.origin.y,
                self.slice_width,
                self.slice_height,
            );
            (
                viewport,
                normalize_z_angle(z_angle - index as f32 * self.rotation_step),
            )
        })
    }
}

/// Maps a pixel position to the unit box of the model.
///
/// This only accounts for shift and view distance, rotations of the camera are ignored.
/// The result is an approximation whenever the camera is rotated.
pub fn screen_to_model(pixel: Vec2, screen_size: Vec2, camera: &CameraState) -> Vec2 {
    let size = screen_size.max(Vec2::ONE);
    let normalized = pixel / size - 0.5;
    let aspect_ratio = size.x / size.y;

    Vec2::new(
        normalized.x * camera.view_distance() * aspect_ratio,
        normalized.y * camera.view_distance(),
    ) + 0.5
        - camera.shift()
}

/// The part of the unit box visible on screen, with the limitations of [`screen_to_model`].
pub fn view_bounds(screen_size: Vec2, camera: &CameraState) -> Rect {
    Rect::from_corners(
        screen_to_model(Vec2::ZERO, screen_size, camera),
        screen_to_model(screen_size, screen_size, camera),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(mode: CameraMode) -> CameraState {
        let mut camera = CameraState::default();
        camera.set_mode(mode);
        camera
    }

    fn assert_near(a: Vec3, b: Vec3) {
        assert!(a.abs_diff_eq(b, 1e-4), "{a} != {b}");
    }

    #[test]
    fn perspective_projection_flips_y() {
        let camera = camera(CameraMode::Perspective);
        let projection = projection_matrix(&camera, 1.5, None);

        let top = (camera.fov().to_radians() / 2.0).tan() * Z_NEAR;
        let point = projection.project_point3(Vec3::new(0.0, top, -Z_NEAR));
        assert!((point.y + 1.0).abs() < 1e-3);
    }

    #[test]
    fn orthographic_projection_spans_the_view_distance() {
        let camera = camera(CameraMode::PlanOblique);
        let projection = projection_matrix(&camera, 2.0, None);

        let edge = projection.project_point3(Vec3::new(camera.view_distance(), 0.0, -1.0));
        assert!((edge.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn orthogonal_view_centers_the_model() {
        let camera = camera(CameraMode::Orthogonal);
        let transforms = FrameTransforms::new(
            &camera,
            ModelExtent::default(),
            Mat4::IDENTITY,
            camera.z_angle(),
            true,
        );

        assert_near(
            transforms.model.transform_point3(Vec3::new(0.5, 0.5, 0.0)),
            Vec3::ZERO,
        );
        assert_near(
            transforms.modelview().transform_point3(Vec3::new(0.5, 0.5, 0.0)),
            Vec3::new(0.0, 0.0, -camera.view_distance()),
        );
    }

    #[test]
    fn plan_oblique_shear_moves_high_points() {
        assert_near(
            shear_matrix(Vec2::new(0.5, 0.25)).transform_point3(Vec3::new(0.0, 0.0, 2.0)),
            Vec3::new(1.0, -0.5, 2.0),
        );

        let mut camera = camera(CameraMode::PlanOblique);
        camera.set_shear(Vec2::new(1.0, 0.0));
        let extent = ModelExtent::default();

        let on_cpu = FrameTransforms::new(&camera, extent, Mat4::IDENTITY, 0.0, true);
        let in_shader = FrameTransforms::new(&camera, extent, Mat4::IDENTITY, 0.0, false);
        let peak = Vec3::new(0.5, 0.5, 0.1);

        assert_near(on_cpu.model.transform_point3(peak), Vec3::new(0.1, 0.0, 0.1));
        assert_near(in_shader.model.transform_point3(peak), Vec3::new(0.0, 0.0, 0.1));
        assert_eq!(on_cpu.light, in_shader.light);
    }

    #[test]
    fn cylindrical_slices_cover_the_full_circle() {
        let camera = camera(CameraMode::Cylindrical);
        let layout = CylindricalLayout::new(Viewport::new(0, 0, 800, 600), 8, 45.0, MAX_DISTANCE);

        assert_eq!(layout.slice_width, 100);
        assert_eq!(layout.slice_height, 100);
        assert_eq!(layout.origin, IVec2::new(0, 250));
        assert_eq!(layout.projection_aspect, 1.0);

        let slices: Vec<_> = layout.slices(camera.z_angle()).collect();
        assert_eq!(slices.len(), 8);
        assert_eq!(slices[7].0, Viewport::new(700, 250, 100, 100));
        assert_eq!(slices[1].1, -45.0);
        assert_eq!(slices[4].1, 180.0);
    }

    #[test]
    fn section_height_is_limited_by_the_maximum_fov() {
        assert_eq!(section_height(100, 8, 45.0), 100);
        assert_eq!(section_height(100, 8, 179.0), section_height(100, 8, 165.0));
        assert!(section_height(100, 8, 165.0) > 0);
    }

    #[test]
    fn too_few_cylindrical_images_are_widened() {
        assert_eq!(section_height(100, 1, 45.0), section_height(100, 3, 45.0));
        assert_eq!(section_height(100, 2, 45.0), section_height(100, 3, 45.0));
        assert!(section_height(100, 1, 45.0) < 100);

        let layout = CylindricalLayout::new(Viewport::new(0, 0, 1, 600), 1, 45.0, MAX_DISTANCE);
        assert_eq!(layout.images, 3);
        assert_eq!(layout.rotation_step, 120.0);
        assert_eq!(layout.slice_width, 1);
        assert!(layout.slice_height <= 600);
    }

    #[test]
    fn screen_to_model_accounts_for_shift_and_distance() {
        let mut camera = CameraState::default();
        camera.set_view_distance(2.0);
        let size = Vec2::new(400.0, 200.0);

        assert_eq!(screen_to_model(size / 2.0, size, &camera), Vec2::splat(0.5));

        camera.set_shift(Vec2::new(0.1, 0.2));
        let center = screen_to_model(size / 2.0, size, &camera);
        assert!(center.abs_diff_eq(Vec2::new(0.4, 0.3), 1e-6));

        let bounds = view_bounds(size, &camera);
        assert!((bounds.width() - 4.0).abs() < 1e-5);
        assert!((bounds.height() - 2.0).abs() < 1e-5);
    }
}
