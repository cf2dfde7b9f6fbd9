use crate::{
    camera::CameraMode,
    gl::{FogParams, LightParams},
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// A directional light, placed with azimuth and zenith angles in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lighting {
    pub ambient: f32,
    pub diffuse: f32,
    /// Clockwise from north.
    pub azimuth: f32,
    /// Angle between the light and the vertical.
    pub zenith: f32,
    /// Keeps the light fixed relative to the screen while the terrain rotates.
    pub bind_to_view: bool,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            ambient: 0.4,
            diffuse: 0.6,
            azimuth: 315.0,
            zenith: 45.0,
            bind_to_view: false,
        }
    }
}

impl Lighting {
    /// The unit vector pointing towards the light, in model coordinates.
    pub fn direction(&self, azimuth: f32) -> Vec3 {
        let a = -FRAC_PI_2 - azimuth.to_radians();
        let z = self.zenith.to_radians();
        Vec3::new(-a.cos() * z.sin(), a.sin() * z.sin(), z.cos())
    }

    /// The light in eye coordinates, `light_modelview` orients the model without shift or shear.
    pub fn params(&self, z_angle: f32, light_modelview: Mat4) -> LightParams {
        let azimuth = if self.bind_to_view {
            self.azimuth - z_angle
        } else {
            self.azimuth
        };

        LightParams {
            ambient: self.ambient,
            diffuse: self.diffuse,
            position: light_modelview * self.direction(azimuth).extend(0.0),
        }
    }
}

/// Linear depth fog.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fog {
    pub enabled: bool,
    pub start: f32,
    pub end: f32,
    pub color: Vec3,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            enabled: false,
            start: 0.0,
            end: 1.0,
            color: Vec3::ONE,
        }
    }
}

impl Fog {
    /// Start and end are relative to the front of the unit box, except for cylindrical
    /// views where the camera stands inside the terrain.
    pub fn params(&self, mode: CameraMode, view_distance: f32) -> Option<FogParams> {
        if !self.enabled {
            return None;
        }

        let offset = match mode {
            CameraMode::Cylindrical => 0.0,
            _ => view_distance - 0.5,
        };

        Some(FogParams {
            color: self.color,
            start: self.start + offset,
            end: self.end + offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_light_comes_from_the_north_west() {
        let lighting = Lighting::default();
        let direction = lighting.direction(lighting.azimuth);

        assert!((direction.length() - 1.0).abs() < 1e-5);
        assert!(direction.x < 0.0);
        assert!(direction.z > 0.0);
        assert!((direction.z - 45f32.to_radians().cos()).abs() < 1e-5);
    }

    #[test]
    fn zenith_light_is_vertical() {
        let lighting = Lighting {
            zenith: 0.0,
            ..default()
        };

        for azimuth in [0.0, 90.0, 200.0] {
            assert!(lighting.direction(azimuth).abs_diff_eq(Vec3::Z, 1e-6));
        }
    }

    #[test]
    fn bound_light_follows_the_view() {
        let free = Lighting::default();
        let bound = Lighting {
            bind_to_view: true,
            ..default()
        };

        let rotation = Mat4::from_rotation_z(30f32.to_radians());
        assert_eq!(free.params(0.0, Mat4::IDENTITY), bound.params(0.0, Mat4::IDENTITY));

        let bound = bound.params(30.0, rotation).position;
        assert!(bound.abs_diff_eq(free.params(0.0, Mat4::IDENTITY).position, 1e-5));
        assert_eq!(free.params(30.0, rotation).position.w, 0.0);
    }

    #[test]
    fn fog_is_offset_by_the_view_distance() {
        let fog = Fog {
            enabled: true,
            start: 0.1,
            end: 0.9,
            ..default()
        };

        assert_eq!(Fog::default().params(CameraMode::Perspective, 2.0), None);

        let params = fog.params(CameraMode::Perspective, 2.0).unwrap();
        assert!((params.start - 1.6).abs() < 1e-6);
        assert!((params.end - 2.4).abs() < 1e-6);

        let params = fog.params(CameraMode::Cylindrical, 2.0).unwrap();
        assert_eq!((params.start, params.end), (0.1, 0.9));
    }
}
