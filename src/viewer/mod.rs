//! The viewer ties a geometry strategy, the texture and the camera together and renders frames.
//!
//! A frame applies the queued [`ViewerCommand`]s, clears the background, sets up projection,
//! fog, light and shear, loads the geometry if it changed, draws it and flushes.
//! When a strategy fails mid-frame, the viewer releases it and continues with the next
//! weaker strategy of [`ModelKind::FALLBACK_CHAIN`] on the following frame.

use crate::{
    camera::{
        projection_matrix, screen_to_model, view_bounds, CameraMode, CameraState,
        CylindricalLayout, FrameTransforms, ModelExtent, MIN_CYLINDER_IMAGES,
    },
    capabilities::GlCapabilities,
    config::ViewerConfig,
    error::{ReliefError, ReliefResult, RenderDiagnostic},
    gl::{check_error, Capability, Gl, Viewport},
    grid::HeightGrid,
    interaction::{
        Animation, FrameTicker, InputEvent, InteractionSettings, MouseController, PointerButton,
    },
    terrain::{ModelKind, TerrainModel},
    texture::{check_image_size, HeightMapper, Texture},
};
use async_channel::Receiver;
use bevy::prelude::*;
use image::{Rgba, RgbaImage};
use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

pub mod commands;
pub mod lighting;

pub use commands::{command_channel, CameraCommand, ViewerCommand, ViewerHandle};
pub use lighting::{Fog, Lighting};

/// Restores the viewport of the wrapped context when dropped.
pub struct ViewportGuard<'a> {
    gl: &'a mut dyn Gl,
    viewport: Viewport,
}

impl<'a> ViewportGuard<'a> {
    pub fn new(gl: &'a mut dyn Gl) -> Self {
        let viewport = gl.viewport();
        Self { gl, viewport }
    }
}

impl<'a> Deref for ViewportGuard<'a> {
    type Target = dyn Gl + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.gl
    }
}

impl DerefMut for ViewportGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.gl
    }
}

impl Drop for ViewportGuard<'_> {
    fn drop(&mut self) {
        self.gl.set_viewport(self.viewport);
    }
}

/// Renders a height grid with one geometry strategy, one texture and one camera.
///
/// The viewer is owned by the render thread. Other threads talk to it through
/// [`ViewerHandle`]s, whose commands are applied at the start of the next frame.
pub struct TerrainViewer {
    capabilities: GlCapabilities,
    model: Box<dyn TerrainModel>,
    texture: Texture,
    camera: CameraState,

    lighting: Lighting,
    fog: Fog,
    background: Vec3,
    shading: bool,
    antialiasing: bool,
    cylinder_images: u32,
    high_resolution: bool,

    mouse: MouseController,
    pressed_button: Option<PointerButton>,
    ticker: FrameTicker,
    animation: Option<Box<dyn Animation>>,
    screen_size: Vec2,

    handle: ViewerHandle,
    commands: Receiver<ViewerCommand>,
    /// Strategies replaced outside of a frame, released by the next frame.
    retired: Vec<Box<dyn TerrainModel>>,
    /// Set when the last strategy of the chain failed, nothing is drawn until a new model is set.
    halted: Option<RenderDiagnostic>,
}

impl TerrainViewer {
    pub fn new(capabilities: GlCapabilities, config: ViewerConfig) -> ReliefResult<Self> {
        if !capabilities.has_opengl() {
            return Err(ReliefError::NoOpenGl);
        }
        debug!("OpenGL capabilities: {}", capabilities.summary());

        let kind = ModelKind::best(&capabilities, config.preferred_model);
        info!("Rendering terrain with the {kind}.");

        let (handle, commands) = command_channel();

        Ok(Self {
            model: kind.create(&capabilities),
            capabilities,
            texture: Texture::new(),
            camera: CameraState::new(config.camera),
            lighting: config.lighting,
            fog: config.fog,
            background: config.background,
            shading: config.shading,
            antialiasing: config.antialiasing,
            cylinder_images: config.cylinder_images.max(MIN_CYLINDER_IMAGES),
            high_resolution: config.high_resolution,
            ticker: FrameTicker::new(config.interaction.tick_rate),
            mouse: MouseController::new(config.interaction),
            pressed_button: None,
            animation: None,
            screen_size: Vec2::ONE,
            handle,
            commands,
            retired: Vec::new(),
            halted: None,
        })
    }

    pub fn capabilities(&self) -> &GlCapabilities {
        &self.capabilities
    }

    /// A sender for changes from other threads.
    pub fn handle(&self) -> ViewerHandle {
        self.handle.clone()
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn grid(&self) -> Option<&HeightGrid> {
        self.model.grid()
    }

    /// The diagnostic of the failure that stopped rendering, if the last strategy failed.
    pub fn halted(&self) -> Option<&RenderDiagnostic> {
        self.halted.as_ref()
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraState {
        &mut self.camera
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Replaces the grid, the geometry is rebuilt by the next frame.
    ///
    /// If the current strategy cannot display the grid, the first weaker strategy that can
    /// takes over.
    pub fn set_model(&mut self, grid: HeightGrid, mapper: HeightMapper) -> ReliefResult<()> {
        match self.model.can_display(&grid) {
            Ok(()) => self.model.set_model(grid, mapper)?,
            Err(error) => {
                let current = self.model.kind();
                let Some(mut model) = current
                    .weaker()
                    .filter(|kind| kind.can_run(&self.capabilities))
                    .map(|kind| kind.create(&self.capabilities))
                    .find(|model| model.can_display(&grid).is_ok())
                else {
                    return Err(error);
                };

                model.set_model(grid, mapper)?;
                info!(
                    "The {current} cannot display the grid ({error}), switching to the {}.",
                    model.kind()
                );
                let replaced = std::mem::replace(&mut self.model, model);
                self.retired.push(replaced);
            }
        }
        self.halted = None;
        self.camera.mark_dirty();
        Ok(())
    }

    /// Queues the image for upload, images larger than the texture limit are rejected here.
    pub fn set_texture_image(&mut self, image: RgbaImage) -> ReliefResult<()> {
        check_image_size(image.width(), image.height(), &self.capabilities)?;
        self.texture.set_image(image);
        self.camera.mark_dirty();
        Ok(())
    }

    /// The texture is deleted by the next frame, as it may still be bound.
    pub fn clear_texture_image(&mut self) {
        self.texture.clear();
        self.camera.mark_dirty();
    }

    pub fn lighting(&self) -> &Lighting {
        &self.lighting
    }

    pub fn set_lighting(&mut self, lighting: Lighting) {
        self.lighting = lighting;
        self.camera.mark_dirty();
    }

    pub fn fog(&self) -> &Fog {
        &self.fog
    }

    pub fn set_fog(&mut self, fog: Fog) {
        self.fog = fog;
        self.camera.mark_dirty();
    }

    pub fn background(&self) -> Vec3 {
        self.background
    }

    pub fn set_background(&mut self, background: Vec3) {
        self.background = background;
        self.camera.mark_dirty();
    }

    pub fn shading(&self) -> bool {
        self.shading
    }

    pub fn set_shading(&mut self, shading: bool) {
        self.shading = shading;
        self.camera.mark_dirty();
    }

    pub fn antialiasing(&self) -> bool {
        self.antialiasing
    }

    pub fn set_antialiasing(&mut self, antialiasing: bool) {
        self.antialiasing = antialiasing;
        self.camera.mark_dirty();
    }

    pub fn cylinder_images(&self) -> u32 {
        self.cylinder_images
    }

    pub fn set_cylinder_images(&mut self, images: u32) {
        self.cylinder_images = images.max(MIN_CYLINDER_IMAGES);
        self.camera.mark_dirty();
    }

    pub fn high_resolution(&self) -> bool {
        self.high_resolution
    }

    /// Renders one cylindrical slice per pixel column.
    pub fn set_high_resolution(&mut self, high_resolution: bool) {
        self.high_resolution = high_resolution;
        self.camera.mark_dirty();
    }

    pub fn set_interaction(&mut self, settings: InteractionSettings) {
        self.ticker = FrameTicker::new(settings.tick_rate);
        self.mouse.set_settings(settings);
    }

    pub fn mouse(&self) -> &MouseController {
        &self.mouse
    }

    pub fn set_animation(&mut self, animation: Option<Box<dyn Animation>>) {
        self.animation = animation;
    }

    pub fn animation_mut(&mut self) -> Option<&mut (dyn Animation + 'static)> {
        self.animation.as_deref_mut()
    }

    /// The size of the view in pixels, updated by every frame.
    pub fn set_screen_size(&mut self, size: Vec2) {
        self.screen_size = size.max(Vec2::ONE);
    }

    /// Maps a pixel to the unit box of the model, ignoring camera rotations.
    pub fn screen_to_model(&self, pixel: Vec2) -> Vec2 {
        screen_to_model(pixel, self.screen_size, &self.camera)
    }

    pub fn view_bounds(&self) -> Rect {
        view_bounds(self.screen_size, &self.camera)
    }

    /// Whether the next frame would differ from the last one.
    pub fn needs_redraw(&self) -> bool {
        self.camera.is_dirty()
            || self.mouse.is_animating()
            || self
                .animation
                .as_ref()
                .is_some_and(|animation| animation.is_animating())
    }

    /// Advances the spring and zoom animations by the ticks due after `delta`.
    /// Returns whether a redraw is needed.
    pub fn tick(&mut self, delta: Duration) -> bool {
        for _ in 0..self.ticker.advance(delta) {
            self.mouse.tick(&mut self.camera, self.screen_size);
        }
        self.needs_redraw()
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerPressed {
                position,
                button,
                modifiers,
            } => {
                self.pressed_button = Some(button);
                self.mouse.pointer_pressed(
                    &mut self.camera,
                    self.model.grid(),
                    self.screen_size,
                    position,
                    InputEvent::effective_modifiers(button, modifiers),
                );
            }
            InputEvent::PointerMoved {
                position,
                modifiers,
            } => {
                let button = self.pressed_button.unwrap_or(PointerButton::Primary);
                self.mouse.pointer_moved(
                    &mut self.camera,
                    self.screen_size,
                    position,
                    InputEvent::effective_modifiers(button, modifiers),
                );
            }
            InputEvent::PointerReleased {
                button, modifiers, ..
            } => {
                self.pressed_button = None;
                self.mouse.pointer_released(
                    &mut self.camera,
                    InputEvent::effective_modifiers(button, modifiers),
                );
            }
            InputEvent::Wheel { ticks } => self.mouse.wheel(&mut self.camera, ticks),
            InputEvent::KeyPressed { key, modifiers } => {
                if let Some(animation) = self.animation.as_mut() {
                    if animation.key_pressed(key, modifiers) {
                        self.camera.mark_dirty();
                    }
                }
            }
        }
    }

    /// Applies the changes queued by [`ViewerHandle`]s.
    pub fn apply_commands(&mut self) {
        for command in commands::drain(&self.commands) {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::SetModel { grid, mapper } => {
                if let Err(error) = self.set_model(grid, mapper) {
                    warn!("Rejected the terrain model: {error}");
                }
            }
            ViewerCommand::SetTexture(image) => {
                if let Err(error) = self.set_texture_image(image) {
                    warn!("Rejected the texture image: {error}");
                }
            }
            ViewerCommand::ClearTexture => self.clear_texture_image(),
            ViewerCommand::Camera(command) => command.apply(&mut self.camera),
            ViewerCommand::Input(event) => self.handle_input(event),
            ViewerCommand::SetLighting(lighting) => self.set_lighting(lighting),
            ViewerCommand::SetFog(fog) => self.set_fog(fog),
            ViewerCommand::SetBackground(background) => self.set_background(background),
            ViewerCommand::SetShading(shading) => self.set_shading(shading),
            ViewerCommand::SetAntialiasing(antialiasing) => self.set_antialiasing(antialiasing),
            ViewerCommand::SetCylindricalImages(images) => self.set_cylinder_images(images),
            ViewerCommand::SetHighResolution(high_resolution) => {
                self.set_high_resolution(high_resolution)
            }
            ViewerCommand::SetInteraction(settings) => self.set_interaction(settings),
            ViewerCommand::Tick(delta) => {
                self.tick(delta);
            }
        }
    }

    /// Renders a frame into the current viewport of `gl`.
    ///
    /// A failing strategy is replaced by the next weaker one before this returns, the
    /// diagnostic describes the failure. The following frame renders with the replacement.
    pub fn display(&mut self, gl: &mut dyn Gl) -> Result<(), RenderDiagnostic> {
        let viewport = gl.viewport();
        self.set_screen_size(Vec2::new(viewport.width as f32, viewport.height as f32));
        self.apply_commands();
        self.camera.take_dirty();

        for mut model in self.retired.drain(..) {
            model.release_model(gl);
        }

        gl.clear_color(self.background.extend(1.0));
        gl.clear();

        if self.halted.is_some() {
            return Ok(());
        }

        match self.render(gl) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.fall_back(gl, error)),
        }
    }

    /// Renders a frame and reads it back, with the first row at the top.
    pub fn render_to_image(&mut self, gl: &mut dyn Gl) -> Result<RgbaImage, RenderDiagnostic> {
        self.display(gl)?;

        let viewport = gl.viewport();
        let (width, height) = (viewport.width.max(0) as u32, viewport.height.max(0) as u32);
        let pixels = gl.read_pixels(viewport);

        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let start = (((height - 1 - y) * width + x) * 4) as usize;
            Rgba(
                pixels
                    .get(start..start + 4)
                    .and_then(|texel| texel.try_into().ok())
                    .unwrap_or([0; 4]),
            )
        }))
    }

    /// Deletes all GPU resources of the viewer.
    pub fn release(&mut self, gl: &mut dyn Gl) {
        for mut model in self.retired.drain(..) {
            model.release_model(gl);
        }
        self.model.release_model(gl);
        self.texture.release(gl);
    }

    fn render(&mut self, gl: &mut dyn Gl) -> ReliefResult<()> {
        gl.enable(Capability::DepthTest);
        if self.antialiasing && !self.mouse.is_dragging() {
            gl.enable(Capability::Multisample);
        } else {
            gl.disable(Capability::Multisample);
        }

        let viewport = gl.viewport();
        if self.camera.mode() == CameraMode::Cylindrical {
            let images = if self.high_resolution {
                viewport.width.max(1) as u32
            } else {
                self.cylinder_images
            };
            let layout = CylindricalLayout::new(
                viewport,
                images,
                self.camera.fov(),
                self.camera.view_distance(),
            );

            let mut gl = ViewportGuard::new(gl);
            for (slice, z_angle) in layout.slices(self.camera.z_angle()) {
                gl.set_viewport(slice);
                self.render_image(&mut *gl, slice.aspect_ratio(), Some(&layout), z_angle)?;
                check_error(&mut *gl)?;
            }
        } else {
            let z_angle = self.camera.z_angle();
            self.render_image(gl, viewport.aspect_ratio(), None, z_angle)?;
            check_error(gl)?;
        }

        if let Some(animation) = self.animation.as_mut() {
            animation.update(&mut self.camera);
        }
        Ok(())
    }

    fn render_image(
        &mut self,
        gl: &mut dyn Gl,
        aspect_ratio: f32,
        layout: Option<&CylindricalLayout>,
        z_angle: f32,
    ) -> ReliefResult<()> {
        let mode = self.camera.mode();

        let projection = projection_matrix(&self.camera, aspect_ratio, layout);
        gl.load_projection(projection);
        gl.set_fog(self.fog.params(mode, self.camera.view_distance()));

        if self.texture.construct(gl) {
            self.model.texture_changed();
        }

        let shear = match mode {
            CameraMode::PlanOblique => self.camera.shear(),
            _ => Vec2::ZERO,
        };
        self.model.set_shearing(shear);
        self.model.load_model(gl, &self.texture)?;

        let extent = self.model.grid().map(ModelExtent::of).unwrap_or_default();
        let transforms = FrameTransforms::new(
            &self.camera,
            extent,
            projection,
            z_angle,
            !self.model.shears_in_shader(),
        );

        gl.set_light(
            self.shading
                .then(|| self.lighting.params(z_angle, transforms.light_modelview())),
        );
        gl.load_modelview(transforms.modelview());

        self.model
            .draw(gl, &self.texture, self.shading, self.fog.enabled)?;
        gl.flush();
        Ok(())
    }

    /// Replaces the failed strategy with the next weaker one that accepts the grid.
    fn fall_back(&mut self, gl: &mut dyn Gl, error: ReliefError) -> RenderDiagnostic {
        let failed = self.model.kind();
        let diagnostic = RenderDiagnostic::new(failed, &error);
        warn!("{diagnostic}");

        self.model.release_model(gl);
        if let Err(error) = check_error(gl) {
            debug!("Discarded {error} left after releasing the {failed}.");
        }

        let grid = self.model.grid().cloned();
        let mapper = self.model.core().mapper().clone();

        let replacement = failed
            .weaker()
            .filter(|kind| kind.can_run(&self.capabilities))
            .find_map(|kind| {
                let mut model = kind.create(&self.capabilities);
                match grid.clone() {
                    Some(grid) => model.set_model(grid, mapper.clone()).ok().map(|_| model),
                    None => Some(model),
                }
            });

        match replacement {
            Some(model) => {
                info!("Falling back from the {failed} to the {}.", model.kind());
                self.model = model;
                self.camera.mark_dirty();
            }
            None => {
                error!("The {failed} was the last strategy available, rendering stopped.");
                self.halted = Some(diagnostic.clone());
            }
        }

        diagnostic
    }
}
