use super::{Key, Modifiers};
use crate::camera::{
    normalize_z_angle, CameraState, MAX_DISTANCE, MAX_X_ANGLE, MIN_DISTANCE, MIN_X_ANGLE,
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Frames per second the animation increments are tuned for.
pub const ANIMATION_FPS: f32 = 50.0;

const ROTATION_DURATION: f32 = 4.0;
const ELEVATION_DURATION: f32 = 2.0;
const DISTANCE_DURATION: f32 = 2.0;
const ROTATION_STEPS: i32 = 16;
const ELEVATION_STEPS: i32 = 8;
const DISTANCE_STEPS: i32 = 8;

/// A continuous camera animation, advanced once per rendered frame and steered by keys.
pub trait Animation: Send {
    fn start(&mut self);

    /// Stops and forgets the accumulated speeds.
    fn stop(&mut self);

    fn is_animating(&self) -> bool;

    /// Advances the camera by one frame.
    fn update(&mut self, camera: &mut CameraState);

    /// Returns whether the key was used.
    fn key_pressed(&mut self, key: Key, modifiers: Modifiers) -> bool;
}

/// A speed level in `[-steps, steps]`, which becomes a per frame increment of
/// `level² · unit`.
///
/// Stepping against the current direction stops first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Level {
    level: i32,
    delta: f32,
}

impl Level {
    fn change(&mut self, direction: i32, steps: i32, unit: f32) {
        if direction.signum() * self.level.signum() < 0 {
            self.level = 0;
        } else {
            self.level = (self.level + direction).clamp(-steps, steps);
        }
        self.delta = (self.level * self.level) as f32 * unit * self.level.signum() as f32;
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rotates, tilts and zooms the camera continuously.
///
/// The arrow keys accelerate rotation and elevation, shift with up and down or plus
/// and minus zoom, space starts and stops the animation.
#[derive(Clone, Debug, Default)]
pub struct RotationAnimation {
    animating: bool,
    elevation: Level,
    rotation: Level,
    distance: Level,
}

impl RotationAnimation {
    const ROTATION_UNIT: f32 =
        360.0 / (ROTATION_DURATION * ANIMATION_FPS * (ROTATION_STEPS * ROTATION_STEPS) as f32);
    const ELEVATION_UNIT: f32 =
        90.0 / (ELEVATION_DURATION * ANIMATION_FPS * (ELEVATION_STEPS * ELEVATION_STEPS) as f32);
    const DISTANCE_UNIT: f32 = (MAX_DISTANCE - MIN_DISTANCE)
        / (DISTANCE_DURATION * ANIMATION_FPS * (DISTANCE_STEPS * DISTANCE_STEPS) as f32);

    pub fn new() -> Self {
        Self::default()
    }

    /// Degrees per frame around the z axis.
    pub fn rotation_speed(&self) -> f32 {
        self.rotation.delta
    }

    pub fn elevation_speed(&self) -> f32 {
        self.elevation.delta
    }

    pub fn zoom_speed(&self) -> f32 {
        self.distance.delta
    }

    pub fn change_rotation(&mut self, direction: i32) {
        self.rotation
            .change(direction, ROTATION_STEPS, Self::ROTATION_UNIT);
    }

    pub fn change_elevation(&mut self, direction: i32) {
        self.elevation
            .change(direction, ELEVATION_STEPS, Self::ELEVATION_UNIT);
    }

    pub fn change_zoom(&mut self, direction: i32) {
        self.distance
            .change(direction, DISTANCE_STEPS, Self::DISTANCE_UNIT);
    }

    pub fn toggle(&mut self) {
        if self.animating {
            self.stop();
        } else {
            self.start();
        }
    }
}

impl Animation for RotationAnimation {
    fn start(&mut self) {
        self.animating = true;
    }

    fn stop(&mut self) {
        self.animating = false;
        self.elevation.reset();
        self.rotation.reset();
        self.distance.reset();
    }

    fn is_animating(&self) -> bool {
        self.animating
    }

    fn update(&mut self, camera: &mut CameraState) {
        if !self.animating {
            return;
        }

        let x_angle = camera.x_angle() + self.elevation.delta;
        if !(MIN_X_ANGLE..=MAX_X_ANGLE).contains(&x_angle) {
            self.elevation.delta = -self.elevation.delta;
        }
        camera.set_x_angle(camera.x_angle() + self.elevation.delta);

        camera.set_z_angle(normalize_z_angle(camera.z_angle() - self.rotation.delta));

        let distance = camera.view_distance() + self.distance.delta;
        if !(MIN_DISTANCE..=MAX_DISTANCE).contains(&distance) {
            self.distance.reset();
        }
        camera.set_view_distance(distance);
        camera.mark_dirty();
    }

    fn key_pressed(&mut self, key: Key, modifiers: Modifiers) -> bool {
        let shift = modifiers.contains(Modifiers::SHIFT);
        match key {
            Key::Space => {
                self.toggle();
                return true;
            }
            Key::Up if shift => self.change_zoom(-1),
            Key::Down if shift => self.change_zoom(1),
            Key::Up => self.change_elevation(1),
            Key::Down => self.change_elevation(-1),
            Key::Right => self.change_rotation(1),
            Key::Left => self.change_rotation(-1),
            Key::Plus => self.change_zoom(-1),
            Key::Minus => self.change_zoom(1),
        }
        self.start();
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShearPattern {
    /// Shears back and forth along y.
    #[default]
    UpDown,
    /// Shears back and forth along x.
    LeftRight,
    /// Turns a constant shear around the circle.
    Circular,
    /// Traces a rose curve with the shear vector.
    Rose,
}

/// Sways the plan oblique shear, on top of the rotation animation.
#[derive(Clone, Debug)]
pub struct ShearAnimation {
    rotation: RotationAnimation,
    pattern: ShearPattern,
    /// Duration of one cycle of the pattern, in seconds. Zero disables shearing.
    cycle_duration: f32,
    amplitude: f32,
    petals: u32,
    inverse: bool,
    rose_angle: f32,
}

impl Default for ShearAnimation {
    fn default() -> Self {
        Self {
            rotation: RotationAnimation::default(),
            pattern: ShearPattern::default(),
            cycle_duration: 2.0,
            amplitude: 1.0,
            petals: 3,
            inverse: false,
            rose_angle: 0.0,
        }
    }
}

impl ShearAnimation {
    pub fn new(pattern: ShearPattern) -> Self {
        Self {
            pattern,
            ..default()
        }
    }

    pub fn pattern(&self) -> ShearPattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: ShearPattern) {
        self.pattern = pattern;
    }

    pub fn cycle_duration(&self) -> f32 {
        self.cycle_duration
    }

    /// Negative durations are treated as zero.
    pub fn set_cycle_duration(&mut self, seconds: f32) {
        self.cycle_duration = seconds.max(0.0);
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn set_amplitude(&mut self, amplitude: f32) {
        self.amplitude = amplitude;
    }

    pub fn petals(&self) -> u32 {
        self.petals
    }

    pub fn set_petals(&mut self, petals: u32) {
        self.petals = petals.max(1);
    }

    pub fn rotation(&mut self) -> &mut RotationAnimation {
        &mut self.rotation
    }

    fn frames_per_cycle(&self) -> f32 {
        self.cycle_duration * ANIMATION_FPS
    }

    fn up_down(&mut self, camera: &mut CameraState) {
        let amplitude = self.amplitude;
        let mut delta = 2.0 * amplitude / self.frames_per_cycle();
        if self.inverse {
            delta = -delta;
        }

        let mut shear = camera.shear().y;
        let next = shear + delta;
        if next > amplitude || next < -amplitude {
            delta = -delta;
            shear = shear.clamp(-amplitude, amplitude).signum() * amplitude;
            self.inverse = !self.inverse;
        }
        camera.set_shear(Vec2::new(0.0, shear + delta));
    }

    fn left_right(&mut self, camera: &mut CameraState) {
        let mut delta = 2.0 * self.amplitude / self.frames_per_cycle();
        if self.inverse {
            delta = -delta;
        }

        let next = camera.shear().x + delta;
        if next > self.amplitude || next < -self.amplitude {
            delta = -delta;
            self.inverse = !self.inverse;
        }
        camera.set_shear(Vec2::new(camera.shear().x + delta, 0.0));
    }

    fn circular(&mut self, camera: &mut CameraState) {
        let step = TAU / self.frames_per_cycle();
        let direction = camera.shear().to_angle() + step;
        camera.set_shear(Vec2::from_angle(direction) * self.amplitude);
    }

    fn rose(&mut self, camera: &mut CameraState) {
        let petals = if self.petals % 2 == 1 {
            self.petals
        } else {
            self.petals / 2
        } as f32;

        self.rose_angle += TAU / self.frames_per_cycle() / petals;
        let radius = (petals * self.rose_angle).cos() * self.amplitude;
        camera.set_shear(Vec2::from_angle(self.rose_angle) * radius);
    }
}

impl Animation for ShearAnimation {
    fn start(&mut self) {
        self.rotation.start();
    }

    fn stop(&mut self) {
        self.rotation.stop();
    }

    fn is_animating(&self) -> bool {
        self.rotation.is_animating()
    }

    fn update(&mut self, camera: &mut CameraState) {
        self.rotation.update(camera);

        if self.cycle_duration <= 0.0 || !self.is_animating() {
            return;
        }

        match self.pattern {
            ShearPattern::UpDown => self.up_down(camera),
            ShearPattern::LeftRight => self.left_right(camera),
            ShearPattern::Circular => self.circular(camera),
            ShearPattern::Rose => self.rose(camera),
        }
    }

    fn key_pressed(&mut self, key: Key, modifiers: Modifiers) -> bool {
        self.rotation.key_pressed(key, modifiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraMode;

    #[test]
    fn levels_accelerate_quadratically_and_stop_on_reversal() {
        let mut animation = RotationAnimation::new();

        animation.change_rotation(1);
        let one = animation.rotation_speed();
        animation.change_rotation(1);
        assert!((animation.rotation_speed() - 4.0 * one).abs() < 1e-6);

        animation.change_rotation(-1);
        assert_eq!(animation.rotation_speed(), 0.0);
        animation.change_rotation(-1);
        assert!((animation.rotation_speed() + one).abs() < 1e-6);

        for _ in 0..100 {
            animation.change_elevation(1);
        }
        let full = (ELEVATION_STEPS * ELEVATION_STEPS) as f32 * RotationAnimation::ELEVATION_UNIT;
        assert!((animation.elevation_speed() - full).abs() < 1e-6);
    }

    #[test]
    fn keys_start_and_space_toggles() {
        let mut animation = RotationAnimation::new();
        let mut camera = CameraState::default();
        let z = camera.z_angle();

        animation.update(&mut camera);
        assert_eq!(camera.z_angle(), z);

        assert!(animation.key_pressed(Key::Right, Modifiers::empty()));
        assert!(animation.is_animating());
        animation.update(&mut camera);
        assert!(camera.z_angle() < z);

        animation.key_pressed(Key::Space, Modifiers::empty());
        assert!(!animation.is_animating());
        assert_eq!(animation.rotation_speed(), 0.0);

        animation.key_pressed(Key::Up, Modifiers::SHIFT);
        assert!(animation.zoom_speed() < 0.0);
        assert_eq!(animation.elevation_speed(), 0.0);
    }

    #[test]
    fn elevation_bounces_and_zoom_stops_at_the_limits() {
        let mut animation = RotationAnimation::new();
        let mut camera = CameraState::default();
        camera.set_x_angle(MAX_X_ANGLE);
        camera.set_view_distance(MIN_DISTANCE);

        animation.key_pressed(Key::Up, Modifiers::empty());
        animation.key_pressed(Key::Plus, Modifiers::empty());
        animation.update(&mut camera);

        assert!(camera.x_angle() < MAX_X_ANGLE);
        assert!(animation.elevation_speed() < 0.0);
        assert_eq!(camera.view_distance(), MIN_DISTANCE);
        assert_eq!(animation.zoom_speed(), 0.0);
    }

    #[test]
    fn up_down_shear_stays_within_the_amplitude() {
        let mut animation = ShearAnimation::new(ShearPattern::UpDown);
        let mut camera = CameraState::default();
        camera.set_mode(CameraMode::PlanOblique);
        animation.start();

        let mut reached = (false, false);
        for _ in 0..400 {
            animation.update(&mut camera);
            let shear = camera.shear();
            assert_eq!(shear.x, 0.0);
            assert!(shear.y.abs() <= animation.amplitude() + 1e-4);
            reached.0 |= shear.y > 0.9;
            reached.1 |= shear.y < -0.9;
        }
        assert!(reached.0 && reached.1);
    }

    #[test]
    fn circular_shear_keeps_its_radius() {
        let mut animation = ShearAnimation::new(ShearPattern::Circular);
        animation.set_amplitude(0.5);
        let mut camera = CameraState::default();
        animation.start();

        for _ in 0..25 {
            animation.update(&mut camera);
            assert!((camera.shear_radius() - 0.5).abs() < 1e-5);
        }
        assert!(camera.shear_direction().abs() > 80.0);
    }

    #[test]
    fn rose_shear_passes_through_the_center() {
        let mut animation = ShearAnimation::new(ShearPattern::Rose);
        let mut camera = CameraState::default();
        animation.start();

        let radii: Vec<f32> = (0..200)
            .map(|_| {
                animation.update(&mut camera);
                camera.shear_radius()
            })
            .collect();
        assert!(radii.iter().any(|radius| *radius < 0.05));
        assert!(radii.iter().any(|radius| *radius > 0.95));
    }

    #[test]
    fn stopped_animations_leave_the_shear_alone() {
        let mut animation = ShearAnimation::default();
        let mut camera = CameraState::default();
        camera.set_shear(Vec2::new(0.2, 0.1));

        animation.update(&mut camera);
        assert_eq!(camera.shear(), Vec2::new(0.2, 0.1));

        animation.start();
        animation.set_cycle_duration(-1.0);
        animation.update(&mut camera);
        assert_eq!(camera.shear(), Vec2::new(0.2, 0.1));
    }
}
