use super::{BackendError, BooleanEngine};
use crate::config::ExternalTool;
use log::{debug, info};
use printmesh::{stl, Solid};
use std::{
    env,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

/// How often a running tool is checked for completion.
const POLL: Duration = Duration::from_millis(20);

/// Blender script computing `target - tool` with the exact boolean
/// solver. Paths follow the `--` argument.
const BLENDER_SCRIPT: &str = "\
import bpy, sys
a = sys.argv[sys.argv.index('--') + 1:]
bpy.ops.wm.read_factory_settings(use_empty=True)
bpy.ops.wm.stl_import(filepath=a[0])
t = bpy.context.selected_objects[0]
bpy.ops.wm.stl_import(filepath=a[1])
g = bpy.context.selected_objects[0]
m = t.modifiers.new('cut', 'BOOLEAN')
m.operation = 'DIFFERENCE'
m.solver = 'EXACT'
m.object = g
bpy.context.view_layer.objects.active = t
bpy.ops.object.modifier_apply(modifier='cut')
bpy.data.objects.remove(g)
bpy.ops.object.select_all(action='DESELECT')
t.select_set(True)
bpy.ops.wm.stl_export(filepath=a[2], export_selected_objects=True)
";

impl ExternalTool {
    /// Headless Blender as the boolean engine.
    pub fn blender(program: impl Into<PathBuf>) -> Self {
        let args = [
            "--background",
            "--factory-startup",
            "--python-expr",
            BLENDER_SCRIPT,
            "--",
            "{target}",
            "{tool}",
            "{output}",
        ];
        Self {
            program: program.into(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout_s: 120.0,
        }
    }
}

/// Runs an [`ExternalTool`] on STL files in a scratch directory.
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    tool: ExternalTool,
}

impl ExternalEngine {
    pub fn new(tool: ExternalTool) -> Self {
        Self { tool }
    }

    /// Resolves the tool's program, searching `PATH` for bare names.
    pub fn locate(&self) -> Option<PathBuf> {
        let program = &self.tool.program;
        if program.components().count() > 1 {
            return program.is_file().then(|| program.clone());
        }
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.tool.timeout_s).unwrap_or(Duration::from_secs(120))
    }

    fn args(&self, target: &Path, tool: &Path, output: &Path) -> Vec<String> {
        self.tool
            .args
            .iter()
            .map(|arg| {
                arg.replace("{target}", &target.to_string_lossy())
                    .replace("{tool}", &tool.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect()
    }
}

impl BooleanEngine for ExternalEngine {
    fn name(&self) -> &'static str {
        "external"
    }

    fn probe(&self) -> Result<(), BackendError> {
        let program = self
            .locate()
            .ok_or_else(|| BackendError::Unavailable(self.tool.program.clone()))?;
        info!("using geometry tool {program:?}");
        Ok(())
    }

    fn subtract(&self, target: &Solid, tool: &Solid) -> Result<Solid, BackendError> {
        let now = Instant::now();
        let program = self
            .locate()
            .ok_or_else(|| BackendError::Unavailable(self.tool.program.clone()))?;

        let scratch = tempfile::tempdir()?;
        let target_path = scratch.path().join("target.stl");
        let tool_path = scratch.path().join("tool.stl");
        let output_path = scratch.path().join("output.stl");
        stl::save_stl(target, &target_path)?;
        stl::save_stl(tool, &tool_path)?;

        let mut child = Command::new(&program)
            .args(self.args(&target_path, &tool_path, &output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BackendError::Unavailable(program.clone()),
                _ => BackendError::Io(e),
            })?;

        // Drained on its own thread so a chatty tool cannot fill the
        // pipe and stall.
        let stderr = child.stderr.take();
        let stderr = thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                // A truncated message is still worth reporting.
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let timeout = self.timeout();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if now.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BackendError::Timeout(timeout));
            }
            thread::sleep(POLL);
        };
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(BackendError::Failed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let mut result = stl::load_stl(&output_path)?;
        result.name = target.name.clone();
        result.color = target.color;
        debug!(
            "external subtract; program: {program:?}, faces: {}, exec: {:?}",
            result.faces.len(),
            now.elapsed()
        );
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::{BackendError, BooleanEngine, ExternalEngine};
    use crate::{config::ExternalTool, lattice::HeightLattice, terrain::mesh_slab};
    use printmesh::inspect;

    fn tool(program: &str, args: &[&str], timeout_s: f64) -> ExternalTool {
        ExternalTool {
            program: program.into(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout_s,
        }
    }

    fn slab() -> printmesh::Solid {
        mesh_slab(&HeightLattice::from_fn(4.0, 4, |x, _| x * 0.25), 1.0)
    }

    #[test]
    fn test_missing_program() {
        let engine = ExternalEngine::new(tool("no-such-mesh-tool-xyz", &[], 1.0));
        assert!(engine.locate().is_none());
        assert!(matches!(engine.probe(), Err(BackendError::Unavailable(_))));
        assert!(matches!(
            engine.subtract(&slab(), &slab()),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn test_output_is_read_back() {
        // `cp` stands in for a tool whose cut removed nothing.
        let engine = ExternalEngine::new(tool("cp", &["{target}", "{output}"], 10.0));
        engine.probe().unwrap();
        let base = slab();
        let result = engine.subtract(&base, &base).unwrap();
        assert_eq!(result.name, "base");
        assert_eq!(result.color, base.color);
        assert_eq!(result.faces.len(), base.faces.len());
        assert!(inspect(&result).is_printable());
    }

    #[test]
    fn test_timeout_and_failure() {
        let engine = ExternalEngine::new(tool("sleep", &["5"], 0.2));
        assert!(matches!(
            engine.subtract(&slab(), &slab()),
            Err(BackendError::Timeout(_))
        ));
        let engine = ExternalEngine::new(tool("false", &[], 5.0));
        assert!(matches!(
            engine.subtract(&slab(), &slab()),
            Err(BackendError::Failed { .. })
        ));
    }

    #[test]
    fn test_blender_arguments() {
        let blender = ExternalTool::blender("blender");
        assert_eq!(blender.args.len(), 8);
        assert!(blender.args[3].contains("DIFFERENCE"));
        assert_eq!(&blender.args[5..], ["{target}", "{tool}", "{output}"]);
    }
}
