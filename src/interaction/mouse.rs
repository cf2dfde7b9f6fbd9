use super::{InteractionSettings, Modifiers};
use crate::{
    camera::{screen_to_model, view_bounds, CameraMode, CameraState, MAX_DISTANCE, MIN_DISTANCE},
    grid::HeightGrid,
};
use bevy::prelude::*;
use itertools::iproduct;

/// Velocities below this are considered at rest.
const SPRING_EPSILON: f32 = 1e-4;

/// Where the current drag started and where the pointer was last seen.
///
/// Kept after the button is released, so the spring can settle.
#[derive(Clone, Copy, Debug)]
struct Drag {
    start: Vec2,
    last: Vec2,
    start_shift: Vec2,
    /// Elevation of the grabbed point in the unit box.
    start_z: f32,
}

#[derive(Clone, Copy, Debug)]
struct Spring {
    velocity: Vec2,
    shift: Vec2,
}

/// Turns pointer drags and wheel ticks into camera changes.
///
/// | drag with             | effect                                       |
/// |-----------------------|----------------------------------------------|
/// | shift                 | rotate around z, and tilt unless in 2D       |
/// | alt                   | pan                                          |
/// | meta or right button  | shear, in plan oblique mode                  |
/// | nothing               | pan, or pull on the shear spring if enabled  |
pub struct MouseController {
    settings: InteractionSettings,
    drag: Option<Drag>,
    dragging: bool,
    shear_reversed: bool,
    spring: Option<Spring>,
    zoom_target: Option<f32>,
}

impl MouseController {
    pub fn new(settings: InteractionSettings) -> Self {
        Self {
            settings,
            drag: None,
            dragging: false,
            shear_reversed: false,
            spring: None,
            zoom_target: None,
        }
    }

    pub fn settings(&self) -> &InteractionSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: InteractionSettings) {
        if !settings.zoom_animation {
            self.zoom_target = None;
        }
        if !settings.shear_animation {
            self.spring = None;
        }
        self.settings = settings;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn is_shear_reversed(&self) -> bool {
        self.shear_reversed
    }

    /// Whether the spring or the zoom are still moving.
    pub fn is_animating(&self) -> bool {
        self.spring.is_some() || self.zoom_target.is_some()
    }

    pub fn pointer_pressed(
        &mut self,
        camera: &mut CameraState,
        grid: Option<&HeightGrid>,
        screen_size: Vec2,
        position: Vec2,
        modifiers: Modifiers,
    ) {
        let plan_oblique = camera.mode() == CameraMode::PlanOblique;
        let start_shift = camera.shift();

        self.dragging = true;
        self.spring = (self.settings.shear_animation
            && plan_oblique
            && !modifiers.intersects(Modifiers::META | Modifiers::ALT | Modifiers::SHIFT))
        .then_some(Spring {
            velocity: Vec2::ZERO,
            shift: start_shift,
        });

        let mut start_z = 0.0;
        if let Some(grid) = grid.filter(|_| plan_oblique) {
            let start = screen_to_model(position, screen_size, camera);
            start_z = grid.z_at(start.x, start.y);

            self.shear_reversed = self.settings.shear_reversal
                && local_relative_height(
                    grid,
                    view_bounds(screen_size, camera),
                    start,
                    self.settings.relative_height_resolution,
                    self.settings.relative_height_radius,
                )
                .is_some_and(|height| height <= 0.0);
            debug!(
                "Grabbed the terrain at {start} with elevation {start_z}, reversed shear: {}.",
                self.shear_reversed
            );
        }

        self.drag = Some(Drag {
            start: position,
            last: position,
            start_shift,
            start_z,
        });
    }

    pub fn pointer_moved(
        &mut self,
        camera: &mut CameraState,
        screen_size: Vec2,
        position: Vec2,
        modifiers: Modifiers,
    ) {
        let Some(drag) = self.drag.filter(|_| self.dragging) else {
            return;
        };

        if modifiers.contains(Modifiers::SHIFT) {
            if camera.is_2d() {
                Self::rotate_2d(camera, screen_size, drag.last, position);
            } else {
                self.rotate_3d(camera, drag.last, position);
            }
        } else if modifiers.contains(Modifiers::ALT) {
            Self::pan(camera, screen_size, drag.last, position);
        } else if modifiers.contains(Modifiers::META) && camera.mode() == CameraMode::PlanOblique {
            self.shear(camera, screen_size, &drag, position);
        } else if self.spring.is_none() {
            Self::pan(camera, screen_size, drag.last, position);
        }

        if let Some(drag) = self.drag.as_mut() {
            drag.last = position;
        }
    }

    /// Removes a manual shear, and requests a redraw with antialiasing.
    pub fn pointer_released(&mut self, camera: &mut CameraState, modifiers: Modifiers) {
        self.dragging = false;

        if modifiers.contains(Modifiers::META) {
            camera.set_shear(Vec2::ZERO);
            if let Some(drag) = self.drag {
                camera.set_shift(drag.start_shift);
            }
        }
        camera.mark_dirty();
    }

    pub fn wheel(&mut self, camera: &mut CameraState, ticks: f32) {
        let change = ticks / self.settings.wheel_scale;

        if self.settings.zoom_animation {
            let target = self.zoom_target.unwrap_or(camera.view_distance()) + change;
            self.zoom_target = Some(target.clamp(MIN_DISTANCE, MAX_DISTANCE));
        } else {
            camera.set_view_distance(camera.view_distance() + change);
        }
    }

    /// Advances the spring and zoom animations by one tick.
    /// Returns whether an animation is still running.
    pub fn tick(&mut self, camera: &mut CameraState, screen_size: Vec2) -> bool {
        if let Some(target) = self.zoom_target {
            let step = self.settings.zoom_speed / self.settings.tick_rate.max(1) as f32;
            let distance = camera.view_distance();

            if (target - distance).abs() <= step {
                camera.set_view_distance(target);
                self.zoom_target = None;
            } else {
                camera.set_view_distance(distance + step.copysign(target - distance));
            }
        }

        self.animate_spring(camera, screen_size);
        self.is_animating()
    }

    fn animate_spring(&mut self, camera: &mut CameraState, screen_size: Vec2) {
        let (Some(drag), Some(spring)) = (self.drag, self.spring.as_mut()) else {
            return;
        };

        let start = screen_to_model(drag.start, screen_size, camera);
        let current = screen_to_model(drag.last, screen_size, camera);
        let extension = current - (start + spring.shift - drag.start_shift);

        spring.velocity = spring.velocity * self.settings.friction + extension * self.settings.spring;
        spring.velocity = Vec2::select(
            spring.velocity.abs().cmplt(Vec2::splat(SPRING_EPSILON)),
            Vec2::ZERO,
            spring.velocity,
        );
        spring.shift += spring.velocity;

        let extension = current - (start + spring.shift - drag.start_shift);
        if drag.start_z > 0.0 && drag.start_z < 1.0 {
            if self.shear_reversed {
                camera.set_shear(-extension / drag.start_z);
                camera.set_shift(spring.shift + 2.0 * extension);
            } else {
                camera.set_shear(extension / drag.start_z);
                camera.set_shift(spring.shift);
            }
        } else {
            camera.set_shift(spring.shift);
        }

        if !self.dragging && spring.velocity == Vec2::ZERO {
            self.spring = None;
        }
    }

    fn pan(camera: &mut CameraState, screen_size: Vec2, last: Vec2, position: Vec2) {
        let delta = (last - position) / screen_size.y.max(1.0) * camera.view_distance();
        camera.set_shift(camera.shift() - delta);
    }

    fn rotate_2d(camera: &mut CameraState, screen_size: Vec2, last: Vec2, position: Vec2) {
        let center = screen_size / 2.0;
        let last = (last - center).to_angle();
        let current = (position - center).to_angle();
        camera.set_z_angle(camera.z_angle() + (current - last).to_degrees());
    }

    fn rotate_3d(&self, camera: &mut CameraState, last: Vec2, position: Vec2) {
        let delta = last - position;
        camera.set_z_angle(camera.z_angle() + delta.x / self.settings.z_rotation_scale);
        camera.set_x_angle(camera.x_angle() + delta.y / self.settings.x_rotation_scale);
    }

    /// Shears so that the grabbed point stays under the pointer.
    fn shear(&self, camera: &mut CameraState, screen_size: Vec2, drag: &Drag, position: Vec2) {
        if drag.start_z <= 0.0 || drag.start_z >= 1.0 {
            return;
        }

        let start = screen_to_model(drag.start, screen_size, camera);
        let distance = screen_to_model(position, screen_size, camera) - start;
        let shear = self.settings.shear_coefficient * distance / drag.start_z;

        if self.shear_reversed {
            camera.set_shear(-shear);
            camera.set_shift(drag.start_shift + 2.0 * distance);
        } else {
            camera.set_shear(shear);
        }
    }
}

/// Mean elevation difference between a point and a disc of samples around it.
///
/// The disc spans `radius` samples, with `resolution` samples across the view.
/// Samples outside the grid or on void cells are skipped, `None` if none are left.
/// This is a naive estimate of whether a point is a peak or a pit.
pub fn local_relative_height(
    grid: &HeightGrid,
    view: Rect,
    position: Vec2,
    resolution: u32,
    radius: i32,
) -> Option<f32> {
    let step = view.size() / resolution.max(1) as f32;
    let z = grid.z_at(position.x, position.y);

    let (sum, count) = iproduct!(-radius..=radius, -radius..=radius)
        .filter(|(i, j)| i * i + j * j <= radius * radius)
        .map(|(i, j)| grid.z_at(position.x + step.x * i as f32, position.y + step.y * j as f32))
        .filter(|sample| *sample != 0.0 && !sample.is_nan())
        .fold((0.0, 0), |(sum, count), sample| (sum + z - sample, count + 1));

    (count > 0).then(|| sum / count as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraDefaults;
    use ndarray::Array2;

    const SCREEN: Vec2 = Vec2::new(200.0, 200.0);

    fn camera(mode: CameraMode) -> CameraState {
        let mut camera = CameraState::default();
        camera.set_mode(mode);
        camera
    }

    /// Elevations falling away from the center cell with the given slope.
    fn cone(center: f32, slope: f32) -> HeightGrid {
        HeightGrid::new(
            Array2::from_shape_fn((11, 11), |(row, col)| {
                let distance = Vec2::new(row as f32 - 5.0, col as f32 - 5.0).length();
                center + slope * distance
            }),
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn plain_drag_pans() {
        let mut camera = camera(CameraMode::Orthogonal);
        let mut mouse = MouseController::new(InteractionSettings::default());

        mouse.pointer_pressed(&mut camera, None, SCREEN, Vec2::new(100.0, 100.0), Modifiers::empty());
        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(120.0, 100.0), Modifiers::empty());

        assert!(camera.shift().abs_diff_eq(Vec2::new(0.24, 0.0), 1e-6));
        assert!(mouse.is_dragging());

        mouse.pointer_released(&mut camera, Modifiers::empty());
        assert!(!mouse.is_dragging());
        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(180.0, 100.0), Modifiers::empty());
        assert!(camera.shift().abs_diff_eq(Vec2::new(0.24, 0.0), 1e-6));
    }

    #[test]
    fn shift_drag_orbits_in_3d_and_spins_in_2d() {
        let mut camera = camera(CameraMode::Perspective);
        let (x, z) = (camera.x_angle(), camera.z_angle());
        let mut mouse = MouseController::new(InteractionSettings::default());

        mouse.pointer_pressed(&mut camera, None, SCREEN, Vec2::new(100.0, 100.0), Modifiers::SHIFT);
        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(80.0, 90.0), Modifiers::SHIFT);
        assert!((camera.z_angle() - (z + 1.0)).abs() < 1e-5);
        assert!((camera.x_angle() - (x + 1.0)).abs() < 1e-5);

        let mut camera = self::camera(CameraMode::Orthogonal);
        mouse.pointer_pressed(&mut camera, None, SCREEN, Vec2::new(200.0, 100.0), Modifiers::SHIFT);
        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(100.0, 200.0), Modifiers::SHIFT);
        assert!((camera.z_angle() - 90.0).abs() < 1e-4);
        assert_eq!(camera.x_angle(), CameraDefaults::default().x_angle);
    }

    #[test]
    fn wheel_zoom_is_animated_towards_the_target() {
        let mut camera = CameraState::default();
        let start = camera.view_distance();
        let mut mouse = MouseController::new(InteractionSettings::default());

        mouse.wheel(&mut camera, 4.0);
        assert_eq!(camera.view_distance(), start);

        let ticks = (0..20).take_while(|_| mouse.tick(&mut camera, SCREEN)).count();
        assert!(ticks < 5);
        assert!((camera.view_distance() - (start + 0.2)).abs() < 1e-5);

        mouse.wheel(&mut camera, 1000.0);
        while mouse.tick(&mut camera, SCREEN) {}
        assert_eq!(camera.view_distance(), MAX_DISTANCE);
    }

    #[test]
    fn wheel_zoom_without_animation_is_immediate() {
        let mut camera = CameraState::default();
        let start = camera.view_distance();
        let mut mouse = MouseController::new(InteractionSettings {
            zoom_animation: false,
            ..default()
        });

        mouse.wheel(&mut camera, -2.0);
        assert!((camera.view_distance() - (start - 0.1)).abs() < 1e-6);
        assert!(!mouse.is_animating());
    }

    #[test]
    fn meta_drag_shears_peaks_forward() {
        let grid = cone(5.0, -1.0);
        let mut camera = camera(CameraMode::PlanOblique);
        let mut mouse = MouseController::new(InteractionSettings::default());

        mouse.pointer_pressed(&mut camera, Some(&grid), SCREEN, SCREEN / 2.0, Modifiers::META);
        assert!(!mouse.is_shear_reversed());

        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(120.0, 100.0), Modifiers::META);
        assert!(camera.shear().abs_diff_eq(Vec2::new(0.48, 0.0), 1e-4));
        assert_eq!(camera.shift(), Vec2::ZERO);

        mouse.pointer_released(&mut camera, Modifiers::META);
        assert_eq!(camera.shear(), Vec2::ZERO);
    }

    #[test]
    fn meta_drag_reverses_the_shear_in_pits() {
        let grid = cone(1.0, 1.0);
        let mut camera = camera(CameraMode::PlanOblique);
        let mut mouse = MouseController::new(InteractionSettings::default());

        mouse.pointer_pressed(&mut camera, Some(&grid), SCREEN, SCREEN / 2.0, Modifiers::META);
        assert!(mouse.is_shear_reversed());

        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(120.0, 100.0), Modifiers::META);
        assert!(camera.shear().abs_diff_eq(Vec2::new(-2.4, 0.0), 1e-3));
        assert!(camera.shift().abs_diff_eq(Vec2::new(0.48, 0.0), 1e-4));

        let mut mouse = MouseController::new(InteractionSettings {
            shear_reversal: false,
            ..default()
        });
        mouse.pointer_pressed(&mut camera, Some(&grid), SCREEN, SCREEN / 2.0, Modifiers::META);
        assert!(!mouse.is_shear_reversed());
    }

    #[test]
    fn spring_pan_settles_under_the_pointer() {
        let grid = HeightGrid::flat(11, 11, 0.0, 1.0).unwrap();
        let mut camera = camera(CameraMode::PlanOblique);
        let mut mouse = MouseController::new(InteractionSettings {
            shear_animation: true,
            ..default()
        });

        mouse.pointer_pressed(&mut camera, Some(&grid), SCREEN, SCREEN / 2.0, Modifiers::empty());
        mouse.pointer_moved(&mut camera, SCREEN, Vec2::new(120.0, 100.0), Modifiers::empty());
        assert_eq!(camera.shift(), Vec2::ZERO);
        mouse.pointer_released(&mut camera, Modifiers::empty());

        let ticks = (0..1000).take_while(|_| mouse.tick(&mut camera, SCREEN)).count();
        assert!(ticks < 1000);
        assert!((camera.shift().x - 0.24).abs() < 0.01);
        assert_eq!(camera.shift().y, 0.0);
    }

    #[test]
    fn relative_height_of_peaks_and_pits() {
        let view = Rect::new(0.0, 0.0, 1.0, 1.0);
        let center = Vec2::splat(0.5);

        let peak = local_relative_height(&cone(5.0, -1.0), view, center, 100, 10).unwrap();
        let pit = local_relative_height(&cone(1.0, 1.0), view, center, 100, 10).unwrap();
        assert!(peak > 0.0);
        assert!(pit < 0.0);

        let empty = HeightGrid::flat(5, 5, 0.0, 1.0).unwrap();
        assert_eq!(local_relative_height(&empty, view, center, 100, 10), None);
    }
}
