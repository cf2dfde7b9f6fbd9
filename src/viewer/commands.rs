//! Changes requested from other threads, applied by the render thread at the start of a frame.

use crate::{
    camera::{CameraMode, CameraState},
    grid::HeightGrid,
    interaction::{InputEvent, InteractionSettings},
    texture::HeightMapper,
    viewer::lighting::{Fog, Lighting},
};
use async_channel::{Receiver, Sender, TryRecvError};
use bevy::prelude::*;
use image::RgbaImage;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CameraCommand {
    SetMode(CameraMode),
    SetXAngle(f32),
    SetZAngle(f32),
    SetViewDistance(f32),
    SetFov(f32),
    SetShift(Vec2),
    SetShear(Vec2),
    SetCylindricalHeight(f32),
    ResetToDefault,
}

impl CameraCommand {
    pub fn apply(self, camera: &mut CameraState) {
        match self {
            CameraCommand::SetMode(mode) => camera.set_mode(mode),
            CameraCommand::SetXAngle(angle) => camera.set_x_angle(angle),
            CameraCommand::SetZAngle(angle) => camera.set_z_angle(angle),
            CameraCommand::SetViewDistance(distance) => camera.set_view_distance(distance),
            CameraCommand::SetFov(fov) => camera.set_fov(fov),
            CameraCommand::SetShift(shift) => camera.set_shift(shift),
            CameraCommand::SetShear(shear) => camera.set_shear(shear),
            CameraCommand::SetCylindricalHeight(height) => camera.set_cylindrical_height(height),
            CameraCommand::ResetToDefault => camera.reset_to_default(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ViewerCommand {
    SetModel {
        grid: HeightGrid,
        mapper: HeightMapper,
    },
    SetTexture(RgbaImage),
    ClearTexture,
    Camera(CameraCommand),
    Input(InputEvent),
    SetLighting(Lighting),
    SetFog(Fog),
    SetBackground(Vec3),
    SetShading(bool),
    SetAntialiasing(bool),
    SetCylindricalImages(u32),
    SetHighResolution(bool),
    SetInteraction(InteractionSettings),
    /// Time passed, advancing the spring and zoom animations.
    Tick(Duration),
}

/// Creates the queue between a [`ViewerHandle`] and the viewer owning the receiver.
pub fn command_channel() -> (ViewerHandle, Receiver<ViewerCommand>) {
    let (sender, receiver) = async_channel::unbounded();
    (ViewerHandle { sender }, receiver)
}

/// Drains the commands queued so far without waiting for new ones.
pub fn drain(receiver: &Receiver<ViewerCommand>) -> Vec<ViewerCommand> {
    let mut commands = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(command) => commands.push(command),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    commands
}

/// A cloneable sender of [`ViewerCommand`]s, usable from any thread.
#[derive(Clone, Debug)]
pub struct ViewerHandle {
    sender: Sender<ViewerCommand>,
}

impl ViewerHandle {
    /// Queues the command, returns `false` if the viewer is gone.
    pub fn send(&self, command: ViewerCommand) -> bool {
        match self.sender.try_send(command) {
            Ok(()) => true,
            Err(error) => {
                warn!("Dropped viewer command, the viewer is no longer running: {error}");
                false
            }
        }
    }

    pub fn set_model(&self, grid: HeightGrid, mapper: HeightMapper) -> bool {
        self.send(ViewerCommand::SetModel { grid, mapper })
    }

    pub fn set_texture_image(&self, image: RgbaImage) -> bool {
        self.send(ViewerCommand::SetTexture(image))
    }

    pub fn clear_texture_image(&self) -> bool {
        self.send(ViewerCommand::ClearTexture)
    }

    pub fn camera(&self, command: CameraCommand) -> bool {
        self.send(ViewerCommand::Camera(command))
    }

    pub fn input(&self, event: InputEvent) -> bool {
        self.send(ViewerCommand::Input(event))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
