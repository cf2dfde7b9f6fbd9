//! Mouse, wheel and keyboard navigation.
//!
//! Input arrives as toolkit independent [`InputEvent`]s, the `plugin` module translates
//! bevy input into them.

use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub mod animation;
pub mod mouse;
pub mod ticker;

pub use animation::{Animation, RotationAnimation, ShearAnimation, ShearPattern};
pub use mouse::{local_relative_height, MouseController};
pub use ticker::FrameTicker;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const ALT = 1 << 1;
        /// Command on macOS. The secondary mouse button acts as if this was held.
        const META = 1 << 2;
        const CTRL = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Space,
    Plus,
    Minus,
}

/// Pointer positions are in pixels from the top left corner of the view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    PointerPressed {
        position: Vec2,
        button: PointerButton,
        modifiers: Modifiers,
    },
    PointerMoved {
        position: Vec2,
        modifiers: Modifiers,
    },
    PointerReleased {
        position: Vec2,
        button: PointerButton,
        modifiers: Modifiers,
    },
    /// Positive ticks move the camera away from the terrain.
    Wheel { ticks: f32 },
    KeyPressed { key: Key, modifiers: Modifiers },
}

impl InputEvent {
    /// The modifiers in effect, with the secondary button counting as meta.
    pub fn effective_modifiers(button: PointerButton, modifiers: Modifiers) -> Modifiers {
        match button {
            PointerButton::Secondary => modifiers | Modifiers::META,
            _ => modifiers,
        }
    }
}

/// Tuning of the mouse navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// Plain drags in plan oblique mode pull the terrain on a spring and shear it.
    pub shear_animation: bool,
    /// Wheel zooming moves towards the target distance at `zoom_speed`.
    pub zoom_animation: bool,
    /// Reverses interactive shearing when the grabbed point lies lower than its surroundings.
    pub shear_reversal: bool,
    /// Fraction of the spring velocity kept per tick.
    pub friction: f32,
    /// Fraction of the spring extension added to the velocity per tick.
    pub spring: f32,
    /// Zoom animation speed, in view distance per second.
    pub zoom_speed: f32,
    /// Ticks per second of the spring and zoom animations.
    pub tick_rate: u32,
    /// Wheel ticks per unit of view distance.
    pub wheel_scale: f32,
    /// Pixels per degree of rotation around the z axis.
    pub z_rotation_scale: f32,
    /// Pixels per degree of tilt around the x axis.
    pub x_rotation_scale: f32,
    pub shear_coefficient: f32,
    /// Samples across the view used to estimate the relative height of a grabbed point.
    pub relative_height_resolution: u32,
    /// Radius of the sampled disc, in samples.
    pub relative_height_radius: i32,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            shear_animation: false,
            zoom_animation: true,
            shear_reversal: true,
            friction: 0.75,
            spring: 0.05,
            zoom_speed: 2.0,
            tick_rate: 30,
            wheel_scale: 20.0,
            z_rotation_scale: 20.0,
            x_rotation_scale: 10.0,
            shear_coefficient: 1.0,
            relative_height_resolution: 100,
            relative_height_radius: 10,
        }
    }
}
