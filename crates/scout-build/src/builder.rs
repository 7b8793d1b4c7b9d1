//! Build backends: single-source compile, Make, CMake.
//!
//! Each trial builds in its own directory under the workdir root. Make and
//! CMake trees are cleaned (make clean / fresh build dir) before every
//! build so stale objects can't leak between configurations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use scout_space::BuildPlan;
use scout_types::BuildError;

use crate::process::{run_command, CommandSpec};

const STDERR_TAIL: usize = 2000;

/// A successful build: where the artifact is and what it cost.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact: PathBuf,
    pub wall: Duration,
}

/// Executes build plans in per-trial working directories.
#[derive(Debug)]
pub struct Builder {
    workdir_root: PathBuf,
    timeout: Duration,
}

impl Builder {
    pub fn new(workdir_root: impl Into<PathBuf>, timeout_s: u64) -> Self {
        Self {
            workdir_root: workdir_root.into(),
            timeout: Duration::from_secs(timeout_s),
        }
    }

    /// Working directory for one trial, created on demand.
    pub fn trial_dir(&self, trial_id: u32) -> Result<PathBuf, BuildError> {
        let dir = self.workdir_root.join(format!("trial_{trial_id:05}"));
        std::fs::create_dir_all(&dir).map_err(|e| BuildError::Workdir(e.to_string()))?;
        Ok(dir)
    }

    /// Execute a build plan. Success requires exit code 0 and an existing
    /// artifact.
    pub fn build(&self, trial_id: u32, plan: &BuildPlan) -> Result<BuildOutcome, BuildError> {
        let dir = self.trial_dir(trial_id)?;
        match plan {
            BuildPlan::SingleSource {
                compiler,
                flags,
                source,
                artifact_name,
            } => self.build_single_source(&dir, compiler, flags, source, artifact_name),
            BuildPlan::Make {
                dir: project_dir,
                compiler,
                flag_string,
                make_vars,
                target,
            } => self.build_make(project_dir, compiler, flag_string, make_vars, target.as_deref()),
            BuildPlan::Cmake {
                dir: project_dir,
                compiler,
                flag_string,
                defs,
                target,
            } => self.build_cmake(&dir, project_dir, compiler, flag_string, defs, target.as_deref()),
        }
    }

    fn build_single_source(
        &self,
        dir: &Path,
        compiler: &str,
        flags: &[String],
        source: &Path,
        artifact_name: &str,
    ) -> Result<BuildOutcome, BuildError> {
        let artifact = dir.join(artifact_name);
        let spec = CommandSpec::new(compiler)
            .args(flags.iter().cloned())
            .arg(source.display().to_string())
            .arg("-o")
            .arg(artifact.display().to_string());
        let out = self.checked_run(&spec)?;
        self.expect_artifact(artifact, out.wall)
    }

    fn build_make(
        &self,
        project_dir: &Path,
        compiler: &str,
        flag_string: &str,
        make_vars: &[(String, String)],
        target: Option<&str>,
    ) -> Result<BuildOutcome, BuildError> {
        // Best effort; a tree without a clean target is not an error.
        let clean = CommandSpec::new("make").arg("clean").cwd(project_dir);
        match run_command(&clean, self.timeout) {
            Ok(out) if !out.success() => {
                debug!(code = ?out.code, "make clean failed, continuing");
            }
            Ok(_) => {}
            Err(e) => {
                return Err(BuildError::Spawn {
                    program: "make".to_string(),
                    message: e.to_string(),
                })
            }
        }

        let mut spec = CommandSpec::new("make")
            .arg("-j")
            .arg(format!("CXX={compiler}"))
            .cwd(project_dir)
            .env_var("EXTRA_CFLAGS", flag_string);
        for (key, value) in make_vars {
            spec = spec.arg(format!("{key}={value}"));
        }
        if let Some(target) = target {
            spec = spec.arg(target);
        }
        let out = self.checked_run(&spec)?;

        let artifact = match target {
            Some(t) => project_dir.join(t),
            None => newest_executable(project_dir)
                .ok_or_else(|| BuildError::NoExecutable(project_dir.display().to_string()))?,
        };
        self.expect_artifact(artifact, out.wall)
    }

    fn build_cmake(
        &self,
        trial_dir: &Path,
        project_dir: &Path,
        compiler: &str,
        flag_string: &str,
        defs: &[String],
        target: Option<&str>,
    ) -> Result<BuildOutcome, BuildError> {
        // A fresh build directory per trial stands in for `make clean`.
        let build_dir = trial_dir.join("build");
        std::fs::create_dir_all(&build_dir).map_err(|e| BuildError::Workdir(e.to_string()))?;

        let mut configure = CommandSpec::new("cmake")
            .arg("-S")
            .arg(project_dir.display().to_string())
            .arg("-B")
            .arg(build_dir.display().to_string())
            .arg(format!("-DCMAKE_CXX_COMPILER={compiler}"))
            .arg(format!("-DCMAKE_CXX_FLAGS={flag_string}"))
            .arg("-DCMAKE_BUILD_TYPE=Release");
        for def in defs {
            configure = configure.arg(format!("-D{def}"));
        }
        let configure_out = self.checked_run(&configure)?;

        let mut build = CommandSpec::new("cmake")
            .arg("--build")
            .arg(build_dir.display().to_string())
            .arg("--parallel");
        if let Some(target) = target {
            build = build.arg("--target").arg(target);
        }
        let build_out = self.checked_run(&build)?;

        let artifact = match target {
            Some(t) => build_dir.join(t),
            None => newest_executable(&build_dir)
                .ok_or_else(|| BuildError::NoExecutable(build_dir.display().to_string()))?,
        };
        self.expect_artifact(artifact, configure_out.wall + build_out.wall)
    }

    fn checked_run(&self, spec: &CommandSpec) -> Result<crate::process::CommandOutput, BuildError> {
        let out = run_command(spec, self.timeout).map_err(|e| BuildError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;
        if out.timed_out {
            warn!(cmd = %spec.pretty(), "build timed out");
            return Err(BuildError::Timeout {
                timeout_s: self.timeout.as_secs(),
            });
        }
        if !out.success() {
            return Err(BuildError::Failed {
                code: out.code,
                stderr_tail: out.stderr_tail(STDERR_TAIL),
            });
        }
        Ok(out)
    }

    fn expect_artifact(
        &self,
        artifact: PathBuf,
        wall: Duration,
    ) -> Result<BuildOutcome, BuildError> {
        if !artifact.exists() {
            return Err(BuildError::MissingArtifact(artifact.display().to_string()));
        }
        info!(artifact = %artifact.display(), wall_s = wall.as_secs_f64(), "build ok");
        Ok(BuildOutcome { artifact, wall })
    }
}

/// The most recently modified executable file under `root`, recursively.
/// Used when project mode declares no explicit target.
fn newest_executable(root: &Path) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                stack.push(path);
            } else if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                if newest.as_ref().map_or(true, |(t, _)| mtime > *t) {
                    newest = Some((mtime, path));
                }
            }
        }
    }
    newest.map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in compiler: copies the source to the `-o` target.
    fn fake_compiler(dir: &Path) -> PathBuf {
        let path = dir.join("fake-cc");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "#!/bin/sh\nout=\"\"\nsrc=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) out=\"$2\"; shift 2 ;;\n    -*) shift ;;\n    *) src=\"$1\"; shift ;;\n  esac\ndone\ncp \"$src\" \"$out\""
        )
        .unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn single_source_plan(compiler: &Path, source: &Path) -> BuildPlan {
        BuildPlan::SingleSource {
            compiler: compiler.display().to_string(),
            flags: vec!["-O2".to_string()],
            source: source.to_path_buf(),
            artifact_name: "a.out".to_string(),
        }
    }

    #[test]
    fn single_source_build_produces_artifact() {
        let tmp = TempDir::new().unwrap();
        let compiler = fake_compiler(tmp.path());
        let source = tmp.path().join("x.c");
        std::fs::write(&source, "int main(){return 0;}").unwrap();

        let builder = Builder::new(tmp.path().join("work"), 30);
        let outcome = builder
            .build(1, &single_source_plan(&compiler, &source))
            .unwrap();
        assert!(outcome.artifact.ends_with("trial_00001/a.out"));
        assert!(outcome.artifact.exists());
    }

    #[test]
    fn failing_compiler_reports_build_failed() {
        let tmp = TempDir::new().unwrap();
        let compiler = tmp.path().join("bad-cc");
        std::fs::write(&compiler, "#!/bin/sh\necho 'syntax error' >&2\nexit 1").unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let source = tmp.path().join("x.c");
        std::fs::write(&source, "").unwrap();

        let builder = Builder::new(tmp.path().join("work"), 30);
        let err = builder
            .build(1, &single_source_plan(&compiler, &source))
            .unwrap_err();
        match err {
            BuildError::Failed { code, stderr_tail } => {
                assert_eq!(code, Some(1));
                assert!(stderr_tail.contains("syntax error"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn slow_build_times_out() {
        let tmp = TempDir::new().unwrap();
        let compiler = tmp.path().join("slow-cc");
        std::fs::write(&compiler, "#!/bin/sh\nsleep 30").unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let source = tmp.path().join("x.c");
        std::fs::write(&source, "").unwrap();

        let builder = Builder::new(tmp.path().join("work"), 1);
        let err = builder
            .build(1, &single_source_plan(&compiler, &source))
            .unwrap_err();
        assert!(matches!(err, BuildError::Timeout { timeout_s: 1 }));
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let tmp = TempDir::new().unwrap();
        // "Compiler" that exits 0 without writing anything.
        let compiler = tmp.path().join("noop-cc");
        std::fs::write(&compiler, "#!/bin/sh\nexit 0").unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let source = tmp.path().join("x.c");
        std::fs::write(&source, "").unwrap();

        let builder = Builder::new(tmp.path().join("work"), 30);
        let err = builder
            .build(1, &single_source_plan(&compiler, &source))
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingArtifact(_)));
    }

    #[test]
    fn newest_executable_prefers_latest_mtime() {
        let tmp = TempDir::new().unwrap();
        let older = tmp.path().join("older");
        let newer = tmp.path().join("sub").join("newer");
        std::fs::create_dir_all(newer.parent().unwrap()).unwrap();
        std::fs::write(&older, "x").unwrap();
        std::fs::set_permissions(&older, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&newer, "y").unwrap();
        std::fs::set_permissions(&newer, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(newest_executable(tmp.path()), Some(newer));
    }
}
