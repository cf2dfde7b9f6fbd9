use crate::{
    error::{ReliefError, ReliefResult},
    gl::{Gl, ProgramId, ShaderId, ShaderStage, UniformValue},
};
use bevy::prelude::*;

/// A linked pair of vertex and fragment shaders.
#[derive(Debug)]
pub struct ShaderProgram {
    program: ProgramId,
}

impl ShaderProgram {
    /// Compiles and links the program, binding the given attribute locations before linking.
    /// Nothing stays allocated if compiling or linking fails.
    pub fn new(
        gl: &mut dyn Gl,
        vertex_source: &str,
        fragment_source: &str,
        attributes: &[(u32, &str)],
    ) -> ReliefResult<Self> {
        let vertex = Self::compile(gl, ShaderStage::Vertex, vertex_source)?;
        let fragment = match Self::compile(gl, ShaderStage::Fragment, fragment_source) {
            Ok(fragment) => fragment,
            Err(error) => {
                gl.delete_shader(vertex);
                return Err(error);
            }
        };

        let program = gl.create_program();
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        for (index, name) in attributes {
            gl.bind_attrib_location(program, *index, name);
        }

        let linked = gl.link_program(program);

        // the program keeps the attached shaders alive
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);

        if let Err(log) = linked {
            gl.delete_program(program);
            return Err(ReliefError::ShaderLink(log));
        }

        debug!("Linked shader program {program}.");
        Ok(Self { program })
    }

    fn compile(gl: &mut dyn Gl, stage: ShaderStage, source: &str) -> ReliefResult<ShaderId> {
        let shader = gl.create_shader(stage);

        if let Err(log) = gl.compile_shader(shader, source) {
            gl.delete_shader(shader);
            return Err(ReliefError::ShaderCompile(format!("{stage:?} shader: {log}")));
        }

        Ok(shader)
    }

    pub fn id(&self) -> ProgramId {
        self.program
    }

    pub fn bind(&self, gl: &mut dyn Gl) {
        gl.use_program(Some(self.program));
    }

    pub fn unbind(&self, gl: &mut dyn Gl) {
        gl.use_program(None);
    }

    /// Sets a uniform of the bound program.
    /// Fails if the program has no such uniform, e.g. because the compiler removed it.
    pub fn set_uniform(
        &self,
        gl: &mut dyn Gl,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> ReliefResult<()> {
        let location = gl
            .uniform_location(self.program, name)
            .ok_or_else(|| ReliefError::InvalidUniform(name.into()))?;

        gl.uniform(location, value.into());
        Ok(())
    }

    pub fn release(self, gl: &mut dyn Gl) {
        gl.delete_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::HeadlessGl;

    const VERTEX: &str = "uniform float rowOffset;\nvoid main() {}";
    const FRAGMENT: &str = "uniform int textureType;\nvoid main() {}";

    #[test]
    fn sets_declared_uniforms() {
        let mut gl = HeadlessGl::default();
        let program = ShaderProgram::new(&mut gl, VERTEX, FRAGMENT, &[(0, "position")]).unwrap();
        assert_eq!(gl.live_programs(), 1);

        program.bind(&mut gl);
        program.set_uniform(&mut gl, "rowOffset", 4.0f32).unwrap();
        program.set_uniform(&mut gl, "textureType", -1).unwrap();

        assert_eq!(
            gl.uniform_value(program.id(), "rowOffset"),
            Some(UniformValue::Float(4.0))
        );
        assert_eq!(
            program.set_uniform(&mut gl, "shearXY", Vec2::ZERO),
            Err(ReliefError::InvalidUniform("shearXY".into()))
        );

        program.release(&mut gl);
        assert_eq!(gl.live_handles(), 0);
    }

    #[test]
    fn compile_errors_leave_nothing_behind() {
        let mut gl = HeadlessGl::default();
        let result = ShaderProgram::new(&mut gl, VERTEX, "uniform int broken;", &[]);

        assert!(matches!(result, Err(ReliefError::ShaderCompile(_))));
        assert_eq!(gl.live_handles(), 0);
    }

    #[test]
    fn link_errors_leave_nothing_behind() {
        let mut gl = HeadlessGl::default();
        gl.fail_link("too many varyings");
        let result = ShaderProgram::new(&mut gl, VERTEX, FRAGMENT, &[]);

        assert_eq!(
            result.map(|program| program.id()),
            Err(ReliefError::ShaderLink("too many varyings".into()))
        );
        assert_eq!(gl.live_handles(), 0);
    }
}
