//! Camera state of the relief viewer.
//!
//! All orientation and distance values are mutated through setters, which clamp them to
//! their valid range and mark the frame dirty.
//! The matrices of each camera mode are derived in [`projection`].

use bevy::prelude::*;
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub mod projection;

pub use projection::{
    projection_matrix, screen_to_model, section_height, shear_matrix, view_bounds,
    CylindricalLayout, FrameTransforms, ModelExtent,
};

/// Bounds of the tilt around the x axis, in degrees.
pub const MIN_X_ANGLE: f32 = 1.0;
pub const MAX_X_ANGLE: f32 = 90.0;
/// Bounds of the distance between the camera and the center of the unit box.
pub const MIN_DISTANCE: f32 = 0.2;
pub const MAX_DISTANCE: f32 = 3.0;
/// Bounds of the shear angles, in degrees.
pub const MIN_SHEAR_ANGLE: f32 = 0.0;
pub const MAX_SHEAR_ANGLE: f32 = 180.0;
/// The vertical field of view of cylindrical slices is limited to stay clear of tan(90°).
pub const MAX_CYLINDER_FOV: f32 = 165.0;
pub const Z_NEAR: f32 = 0.001;
pub const Z_FAR: f32 = 100.0;
pub const DEFAULT_CYLINDER_IMAGES: u32 = 8;
/// Slices cover less than 180°, so that the tangent of half their angle stays finite.
pub const MIN_CYLINDER_IMAGES: u32 = 3;

/// How the terrain is projected onto the screen.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraMode {
    /// Central projection from the field of view.
    #[display("Perspective View")]
    Perspective,
    /// Orthographic projection of the tilted and rotated terrain.
    #[display("Parallel Oblique")]
    ParallelOblique,
    /// Orthographic view from above, relief is shown by shearing with elevation.
    #[default]
    #[display("Plan Oblique")]
    PlanOblique,
    /// Orthographic map view from above.
    #[display("2D Orthogonal")]
    Orthogonal,
    /// Panorama stitched from narrow perspective slices around the camera.
    #[display("Cylindrical")]
    Cylindrical,
}

impl CameraMode {
    pub const ALL: [CameraMode; 5] = [
        CameraMode::Perspective,
        CameraMode::ParallelOblique,
        CameraMode::PlanOblique,
        CameraMode::Orthogonal,
        CameraMode::Cylindrical,
    ];

    /// Whether the terrain is tilted around the x axis.
    pub fn tilts(self) -> bool {
        matches!(self, Self::Perspective | Self::ParallelOblique)
    }

    /// Whether the model is lowered by its center elevation, so that the camera orbits
    /// around the middle of the relief.
    pub fn centers_elevation(self) -> bool {
        matches!(
            self,
            Self::Perspective | Self::ParallelOblique | Self::Cylindrical
        )
    }

    pub fn is_orthographic(self) -> bool {
        !matches!(self, Self::Perspective | Self::Cylindrical)
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("unknown camera mode `{0}`")]
pub struct UnknownCameraMode(pub String);

impl FromStr for CameraMode {
    type Err = UnknownCameraMode;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| UnknownCameraMode(name.into()))
    }
}

/// Maps an angle in degrees into `(-180, 180]`.
///
/// Angles already in range are returned unchanged, so normalizing twice is a no-op.
pub fn normalize_z_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    if angle > -180.0 && angle <= 180.0 {
        return angle;
    }

    let angle = angle.rem_euclid(360.0);
    if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}

/// The camera restored by [`CameraState::reset_to_default`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    pub x_angle: f32,
    pub z_angle: f32,
    pub view_distance: f32,
    pub fov: f32,
    pub shift: Vec2,
    pub cylindrical_height: f32,
    pub mode: CameraMode,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            x_angle: 55.0,
            z_angle: 0.0,
            view_distance: 2.4,
            fov: 25.0,
            shift: Vec2::ZERO,
            cylindrical_height: 0.2,
            mode: CameraMode::PlanOblique,
        }
    }
}

/// Orientation, distance, shift and shear of the camera.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraState {
    x_angle: f32,
    z_angle: f32,
    view_distance: f32,
    fov: f32,
    shift: Vec2,
    shear: Vec2,
    cylindrical_height: f32,
    mode: CameraMode,
    defaults: CameraDefaults,
    dirty: bool,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::new(CameraDefaults::default())
    }
}

impl CameraState {
    pub fn new(defaults: CameraDefaults) -> Self {
        let mut camera = Self {
            x_angle: MIN_X_ANGLE,
            z_angle: 0.0,
            view_distance: MIN_DISTANCE,
            fov: 0.0,
            shift: Vec2::ZERO,
            shear: Vec2::ZERO,
            cylindrical_height: 0.0,
            mode: defaults.mode,
            defaults,
            dirty: true,
        };
        camera.reset_to_default();
        camera
    }

    pub fn x_angle(&self) -> f32 {
        self.x_angle
    }

    pub fn z_angle(&self) -> f32 {
        self.z_angle
    }

    pub fn view_distance(&self) -> f32 {
        self.view_distance
    }

    /// The vertical field of view in degrees.
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn shift(&self) -> Vec2 {
        self.shift
    }

    pub fn shear(&self) -> Vec2 {
        self.shear
    }

    pub fn cylindrical_height(&self) -> f32 {
        self.cylindrical_height
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn is_2d(&self) -> bool {
        self.mode == CameraMode::Orthogonal
    }

    pub fn defaults(&self) -> &CameraDefaults {
        &self.defaults
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn update<T: PartialEq>(dirty: &mut bool, field: &mut T, value: T) {
        if *field != value {
            *field = value;
            *dirty = true;
        }
    }

    pub fn set_x_angle(&mut self, x_angle: f32) {
        let x_angle = x_angle.clamp(MIN_X_ANGLE, MAX_X_ANGLE);
        Self::update(&mut self.dirty, &mut self.x_angle, x_angle);
    }

    pub fn set_z_angle(&mut self, z_angle: f32) {
        Self::update(&mut self.dirty, &mut self.z_angle, normalize_z_angle(z_angle));
    }

    pub fn set_view_distance(&mut self, view_distance: f32) {
        let view_distance = view_distance.clamp(MIN_DISTANCE, MAX_DISTANCE);
        Self::update(&mut self.dirty, &mut self.view_distance, view_distance);
    }

    pub fn set_fov(&mut self, fov: f32) {
        if fov.is_finite() && fov > 0.0 {
            Self::update(&mut self.dirty, &mut self.fov, fov.min(179.0));
        }
    }

    pub fn set_shift(&mut self, shift: Vec2) {
        Self::update(&mut self.dirty, &mut self.shift, shift);
    }

    pub fn set_shift_x(&mut self, x: f32) {
        self.set_shift(self.shift.with_x(x));
    }

    pub fn set_shift_y(&mut self, y: f32) {
        self.set_shift(self.shift.with_y(y));
    }

    pub fn set_shear(&mut self, shear: Vec2) {
        Self::update(&mut self.dirty, &mut self.shear, shear);
    }

    pub fn set_shear_x(&mut self, x: f32) {
        self.set_shear(self.shear.with_x(x));
    }

    pub fn set_shear_y(&mut self, y: f32) {
        self.set_shear(self.shear.with_y(y));
    }

    /// The shear as the angle between the sheared vertical and the ground, in degrees.
    pub fn shear_x_angle(&self) -> f32 {
        Self::shear_to_angle(self.shear.x)
    }

    pub fn shear_y_angle(&self) -> f32 {
        Self::shear_to_angle(self.shear.y)
    }

    pub fn set_shear_x_angle(&mut self, angle: f32) {
        self.set_shear_x(Self::angle_to_shear(angle));
    }

    pub fn set_shear_y_angle(&mut self, angle: f32) {
        self.set_shear_y(Self::angle_to_shear(angle));
    }

    fn shear_to_angle(shear: f32) -> f32 {
        let angle = 1.0f32.atan2(shear).to_degrees();
        if angle.abs() < 1e-6 {
            0.0
        } else {
            angle
        }
    }

    fn angle_to_shear(angle: f32) -> f32 {
        let angle = angle.clamp(MIN_SHEAR_ANGLE, MAX_SHEAR_ANGLE).to_radians();
        angle.tan().recip()
    }

    /// Direction of the shear in degrees, counter-clockwise from the x axis.
    pub fn shear_direction(&self) -> f32 {
        self.shear.y.atan2(self.shear.x).to_degrees()
    }

    pub fn shear_radius(&self) -> f32 {
        self.shear.length()
    }

    pub fn set_mode(&mut self, mode: CameraMode) {
        Self::update(&mut self.dirty, &mut self.mode, mode);
    }

    pub fn set_cylindrical_height(&mut self, height: f32) {
        Self::update(&mut self.dirty, &mut self.cylindrical_height, height);
    }

    pub fn set_defaults(&mut self, defaults: CameraDefaults) {
        self.defaults = defaults;
    }

    /// Restores the default orientation, distance, shift and height and removes any shear.
    /// The camera mode is kept.
    pub fn reset_to_default(&mut self) {
        let defaults = self.defaults;
        self.set_x_angle(defaults.x_angle);
        self.set_z_angle(defaults.z_angle);
        self.set_view_distance(defaults.view_distance);
        self.set_fov(defaults.fov);
        self.set_shear(Vec2::ZERO);
        self.set_shift(defaults.shift);
        self.set_cylindrical_height(defaults.cylindrical_height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn z_angle_normalization_is_idempotent_and_in_range() {
        let mut rng = rand::rng();

        let samples = (0..10_000)
            .map(|_| rng.random_range(-1e6f32..1e6))
            .chain([
                -180.0, 180.0, 540.0, -540.0, 720.0, -720.0, 360.0 * 1000.0, 0.0, -0.0,
            ]);

        for angle in samples {
            let normalized = normalize_z_angle(angle);
            assert!(
                normalized > -180.0 && normalized <= 180.0,
                "{angle} normalized to {normalized}"
            );
            assert_eq!(normalize_z_angle(normalized), normalized);
        }

        assert_eq!(normalize_z_angle(-180.0), 180.0);
        assert_eq!(normalize_z_angle(190.0), -170.0);
        assert_eq!(normalize_z_angle(720.0), 0.0);
        assert_eq!(normalize_z_angle(45.0), 45.0);
    }

    #[test]
    fn view_distance_and_tilt_are_clamped() {
        let mut camera = CameraState::default();

        camera.set_view_distance(0.01);
        assert_eq!(camera.view_distance(), MIN_DISTANCE);
        camera.set_view_distance(10.0);
        assert_eq!(camera.view_distance(), MAX_DISTANCE);

        camera.set_x_angle(-30.0);
        assert_eq!(camera.x_angle(), MIN_X_ANGLE);
        camera.set_x_angle(120.0);
        assert_eq!(camera.x_angle(), MAX_X_ANGLE);
    }

    #[test]
    fn setters_only_mark_real_changes() {
        let mut camera = CameraState::default();
        assert!(camera.take_dirty());
        assert!(!camera.is_dirty());

        camera.set_view_distance(camera.view_distance());
        camera.set_z_angle(360.0 + camera.z_angle());
        assert!(!camera.take_dirty());

        camera.set_shift_x(0.25);
        assert!(camera.take_dirty());
        assert_eq!(camera.shift(), Vec2::new(0.25, 0.0));
    }

    #[test]
    fn shear_angles() {
        let mut camera = CameraState::default();

        camera.set_shear_x_angle(45.0);
        assert!((camera.shear().x - 1.0).abs() < 1e-5);
        assert!((camera.shear_x_angle() - 45.0).abs() < 1e-3);

        camera.set_shear_y_angle(90.0);
        assert!(camera.shear().y.abs() < 1e-5);
        assert!((camera.shear_y_angle() - 90.0).abs() < 1e-3);

        camera.set_shear(Vec2::new(0.0, 2.0));
        assert!((camera.shear_direction() - 90.0).abs() < 1e-4);
        assert_eq!(camera.shear_radius(), 2.0);
    }

    #[test]
    fn reset_restores_defaults_and_keeps_the_mode() {
        let mut camera = CameraState::default();
        camera.set_mode(CameraMode::Cylindrical);
        camera.set_x_angle(20.0);
        camera.set_shear(Vec2::ONE);
        camera.set_shift(Vec2::new(0.3, -0.1));

        camera.reset_to_default();

        let defaults = CameraDefaults::default();
        assert_eq!(camera.x_angle(), defaults.x_angle);
        assert_eq!(camera.view_distance(), defaults.view_distance);
        assert_eq!(camera.shear(), Vec2::ZERO);
        assert_eq!(camera.shift(), Vec2::ZERO);
        assert_eq!(camera.mode(), CameraMode::Cylindrical);
    }

    #[test]
    fn camera_names_round_trip() {
        for mode in CameraMode::ALL {
            assert_eq!(mode.to_string().parse::<CameraMode>(), Ok(mode));
        }
        assert_eq!(
            "2d orthogonal".parse::<CameraMode>(),
            Ok(CameraMode::Orthogonal)
        );
        assert_eq!(
            "Fisheye".parse::<CameraMode>(),
            Err(UnknownCameraMode("Fisheye".into()))
        );
    }
}
