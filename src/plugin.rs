//! Forwards bevy input to a [`TerrainViewer`](crate::viewer::TerrainViewer) running on its
//! own render thread.

use crate::{
    interaction::{InputEvent, Key, Modifiers, PointerButton},
    viewer::{ViewerCommand, ViewerHandle},
};
use bevy::{
    input::mouse::{MouseScrollUnit, MouseWheel},
    prelude::*,
    window::CursorMoved,
};

/// Wheel events in pixels are converted to ticks with this many pixels per tick.
const PIXELS_PER_WHEEL_TICK: f32 = 16.0;

/// The viewer the input of this app is sent to.
#[derive(Clone, Debug, Resource)]
pub struct ViewerLink(pub ViewerHandle);

#[derive(Default, Resource)]
struct PointerPosition(Vec2);

/// Sends mouse, wheel and keyboard input as [`InputEvent`]s and drives the frame ticker
/// of the linked viewer from [`Time`].
pub struct ReliefViewerPlugin {
    pub handle: ViewerHandle,
}

impl ReliefViewerPlugin {
    pub fn new(handle: ViewerHandle) -> Self {
        Self { handle }
    }
}

impl Plugin for ReliefViewerPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ViewerLink(self.handle.clone()))
            .init_resource::<PointerPosition>()
            .add_systems(
                Update,
                (forward_pointer, forward_wheel, forward_keys, tick_viewer),
            );
    }
}

fn current_modifiers(keys: &ButtonInput<KeyCode>) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    modifiers.set(
        Modifiers::SHIFT,
        keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]),
    );
    modifiers.set(
        Modifiers::ALT,
        keys.any_pressed([KeyCode::AltLeft, KeyCode::AltRight]),
    );
    modifiers.set(
        Modifiers::META,
        keys.any_pressed([KeyCode::SuperLeft, KeyCode::SuperRight]),
    );
    modifiers.set(
        Modifiers::CTRL,
        keys.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]),
    );
    modifiers
}

fn pointer_button(button: MouseButton) -> Option<PointerButton> {
    match button {
        MouseButton::Left => Some(PointerButton::Primary),
        MouseButton::Right => Some(PointerButton::Secondary),
        MouseButton::Middle => Some(PointerButton::Middle),
        _ => None,
    }
}

fn navigation_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::ArrowUp => Some(Key::Up),
        KeyCode::ArrowDown => Some(Key::Down),
        KeyCode::ArrowLeft => Some(Key::Left),
        KeyCode::ArrowRight => Some(Key::Right),
        KeyCode::Space => Some(Key::Space),
        KeyCode::Equal | KeyCode::NumpadAdd => Some(Key::Plus),
        KeyCode::Minus | KeyCode::NumpadSubtract => Some(Key::Minus),
        _ => None,
    }
}

fn forward_pointer(
    link: Res<ViewerLink>,
    buttons: Res<ButtonInput<MouseButton>>,
    keys: Res<ButtonInput<KeyCode>>,
    mut cursor: EventReader<CursorMoved>,
    mut pointer: ResMut<PointerPosition>,
) {
    let modifiers = current_modifiers(&keys);

    for event in cursor.read() {
        pointer.0 = event.position;
        link.0.input(InputEvent::PointerMoved {
            position: event.position,
            modifiers,
        });
    }

    for &button in buttons.get_just_pressed() {
        if let Some(button) = pointer_button(button) {
            link.0.input(InputEvent::PointerPressed {
                position: pointer.0,
                button,
                modifiers,
            });
        }
    }

    for &button in buttons.get_just_released() {
        if let Some(button) = pointer_button(button) {
            link.0.input(InputEvent::PointerReleased {
                position: pointer.0,
                button,
                modifiers,
            });
        }
    }
}

fn forward_wheel(link: Res<ViewerLink>, mut wheel: EventReader<MouseWheel>) {
    for event in wheel.read() {
        let ticks = match event.unit {
            MouseScrollUnit::Line => -event.y,
            MouseScrollUnit::Pixel => -event.y / PIXELS_PER_WHEEL_TICK,
        };
        link.0.input(InputEvent::Wheel { ticks });
    }
}

fn forward_keys(link: Res<ViewerLink>, keys: Res<ButtonInput<KeyCode>>) {
    let modifiers = current_modifiers(&keys);

    for key in keys.get_just_pressed().copied().filter_map(navigation_key) {
        link.0.input(InputEvent::KeyPressed { key, modifiers });
    }
}

fn tick_viewer(link: Res<ViewerLink>, time: Res<Time>) {
    link.0.send(ViewerCommand::Tick(time.delta()));
}
