//! The end-to-end build pipeline.
//!
//! [`plan`] is pure: it resolves the target, the ABI policy, the sandbox
//! decision and (for sandboxed runs) the image and script. [`execute`] then
//! runs exactly one of the two orchestrators for that plan.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::args::{ArgsError, BuildArgs};
use crate::container::{ContainerImage, ContainerRequest, ContainerSelector, SelectRequest};
use crate::env::{EnvironmentFilter, EnvironmentSet};
use crate::host::{HostOrchestrator, HostRun};
use crate::permissions::{PermissionFixer, current_owner};
use crate::platform::Platform;
use crate::platform::paths::{cache_dir, temp_dir, workspace_dir};
use crate::policy::{AbiPolicy, CommandKind, PolicyRequest, resolve_policy};
use crate::process::{ProcessError, ProcessRunner};
use crate::sandbox::{SandboxError, SandboxOrchestrator, SandboxRun, credential_mounts};
use crate::script::{BuildScript, ScriptRequest, compose};
use crate::tables::Tables;
use crate::target::TargetResolver;
use crate::target::TargetTriple;
use crate::tool::{ToolError, ToolInstaller, ToolVersion};

#[derive(Debug, Error)]
pub enum PipelineError {
  /// Nothing could be run at all, as opposed to a build that ran and failed.
  #[error("nothing to run: {0}")]
  NothingToRun(String),

  #[error(transparent)]
  Args(#[from] ArgsError),

  #[error(transparent)]
  Sandbox(#[from] SandboxError),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error(transparent)]
  Tool(#[from] ToolError),

  #[error("failed to write build script: {0}")]
  Script(#[source] std::io::Error),

  #[error("unsupported host platform: {os}/{arch}")]
  UnsupportedHost { os: String, arch: String },

  #[error("cannot determine the current directory: {0}")]
  CurrentDir(#[source] std::io::Error),
}

/// User inputs for one run. Empty strings mean "not set".
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
  pub command: String,
  pub args: String,
  pub target: String,
  pub manylinux: String,
  pub container: String,
  pub docker_options: String,
  pub toolchain: String,
  pub components: String,
  pub before_script: String,
  pub sccache: bool,
  pub tool_version: String,
  pub working_directory: Option<PathBuf>,
  pub host_mount_prefix: Option<String>,
}

/// Ambient state captured once at startup.
#[derive(Debug, Clone)]
pub struct Context {
  pub host: Platform,
  pub env: EnvironmentSet,
  pub cwd: PathBuf,
  pub tables: Tables,
}

impl Context {
  /// Capture the host platform, the process environment and the current directory.
  pub fn capture(tables: Tables) -> Result<Self, PipelineError> {
    let host = Platform::current().ok_or_else(|| PipelineError::UnsupportedHost {
      os: std::env::consts::OS.to_string(),
      arch: std::env::consts::ARCH.to_string(),
    })?;
    let cwd = std::env::current_dir().map_err(PipelineError::CurrentDir)?;
    Ok(Self {
      host,
      env: EnvironmentSet::from_process(),
      cwd: dunce::simplified(&cwd).to_path_buf(),
      tables,
    })
  }
}

/// Where the build will run.
#[derive(Debug, Clone)]
pub enum Mode {
  Sandbox {
    image: ContainerImage,
    script: BuildScript,
    forward: EnvironmentSet,
    engine_options: Vec<String>,
  },
  Host,
}

/// A fully resolved run. Nothing in it is re-derived during execution.
#[derive(Debug, Clone)]
pub struct Plan {
  pub command: CommandKind,
  pub target: Option<TargetTriple>,
  pub policy: AbiPolicy,
  pub args: BuildArgs,
  pub mode: Mode,
  /// Workspace root; the sandbox mounts all of it.
  pub workspace: PathBuf,
  pub workdir: PathBuf,
  pub target_dir: PathBuf,
  pub out_dir: Option<PathBuf>,
  pub tool_version: ToolVersion,
  pub toolchain: String,
  pub components: String,
  pub sccache: bool,
  pub host_mount_prefix: Option<String>,
}

impl Plan {
  pub fn is_sandboxed(&self) -> bool {
    matches!(self.mode, Mode::Sandbox { .. })
  }

  pub fn summary(&self) -> PlanSummary {
    let (image, script, forwarded) = match &self.mode {
      Mode::Sandbox {
        image, script, forward, ..
      } => (
        Some(image.reference.clone()),
        Some(script.render()),
        forward.names().map(str::to_string).collect(),
      ),
      Mode::Host => (None, None, Vec::new()),
    };
    PlanSummary {
      command: self.command.to_string(),
      target: self.target.as_ref().map(ToString::to_string),
      policy: self.policy.to_string(),
      sandboxed: self.is_sandboxed(),
      image,
      args: self.args.tokens().to_vec(),
      workdir: self.workdir.clone(),
      target_dir: self.target_dir.clone(),
      forwarded_env: forwarded,
      script,
    }
  }
}

/// Serializable view of a [`Plan`].
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
  pub command: String,
  pub target: Option<String>,
  pub policy: String,
  pub sandboxed: bool,
  pub image: Option<String>,
  pub args: Vec<String>,
  pub workdir: PathBuf,
  pub target_dir: PathBuf,
  pub forwarded_env: Vec<String>,
  pub script: Option<String>,
}

/// Result of a run that got as far as invoking the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
  pub exit_code: i32,
  pub sandboxed: bool,
}

impl Outcome {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Resolve everything about a run without executing anything.
pub fn plan(request: &BuildRequest, ctx: &Context) -> Result<Plan, PipelineError> {
  let command_name = request.command.trim();
  if command_name.is_empty() {
    return Err(PipelineError::NothingToRun("no build command given".to_string()));
  }
  let command = CommandKind::parse(command_name);
  let mut args = BuildArgs::parse(command_name, &request.args)?;

  let workspace = workspace_dir(&ctx.env, &ctx.cwd);
  let workdir = match &request.working_directory {
    Some(dir) => workspace.join(dir),
    None => workspace.clone(),
  };

  let explicit_policy = AbiPolicy::parse(&request.manylinux);
  let (target, requested_target) = if command.produces_artifacts() {
    let requested = match request.target.trim() {
      "" => args.value_of("--target").unwrap_or_default().to_string(),
      t => t.to_string(),
    };
    let resolver = TargetResolver::new(&ctx.tables.aliases);
    let target = resolver.resolve_lenient(&requested, ctx.host, explicit_policy.family());
    (target, !requested.is_empty())
  } else {
    (None, false)
  };

  let policy = resolve_policy(&PolicyRequest {
    command: &command,
    explicit: &request.manylinux,
    host: ctx.host,
    target: target.as_ref(),
    toolchain: &request.toolchain,
  });

  if command.produces_artifacts() {
    if ctx.host.is_linux()
      && !args.contains("--manylinux")
      && let Some(value) = policy.cli_value()
    {
      args = args.with_flag_value("--manylinux", value);
    }
    if requested_target
      && !args.contains("--target")
      && let Some(target) = &target
    {
      args = args.with_flag_value("--target", target.as_str());
    }
  }
  let args = args.normalize_zig(target.as_ref());

  let tool_version = ToolVersion::parse(&request.tool_version);
  let container = ContainerRequest::parse(&request.container);
  let mode = choose_mode(request, ctx, &command, target.as_ref(), &policy, &container, &args, &tool_version)?;

  let target_dir = args.target_dir(&ctx.env, &workdir);
  let out_dir = args.out_dir(&workdir);
  info!(
    command = %command,
    target = ?target.as_ref().map(TargetTriple::as_str),
    policy = %policy,
    sandboxed = matches!(mode, Mode::Sandbox { .. }),
    "planned build"
  );

  Ok(Plan {
    command,
    target,
    policy,
    args,
    mode,
    workspace,
    workdir,
    target_dir,
    out_dir,
    tool_version,
    toolchain: request.toolchain.clone(),
    components: request.components.clone(),
    sccache: request.sccache,
    host_mount_prefix: request.host_mount_prefix.clone().filter(|p| !p.is_empty()),
  })
}

#[allow(clippy::too_many_arguments)]
fn choose_mode(
  request: &BuildRequest,
  ctx: &Context,
  command: &CommandKind,
  target: Option<&TargetTriple>,
  policy: &AbiPolicy,
  container: &ContainerRequest,
  args: &BuildArgs,
  tool_version: &ToolVersion,
) -> Result<Mode, PipelineError> {
  if !ctx.host.is_linux() || !command.produces_artifacts() || !policy.wants_sandbox() {
    return Ok(Mode::Host);
  }
  if *container == ContainerRequest::Disabled {
    info!("container disabled, building on the host");
    return Ok(Mode::Host);
  }
  let Some(target) = target else {
    return Ok(Mode::Host);
  };

  let selector = ContainerSelector::new(&ctx.tables.containers);
  let Some(image) = selector.select(&SelectRequest {
    host_arch: ctx.host.arch,
    target,
    policy,
    explicit: container,
    tool_tag: tool_version.as_str(),
  }) else {
    warn!(
      target = %target,
      policy = %policy,
      container = %request.container,
      "no container image matches, building on the host"
    );
    return Ok(Mode::Host);
  };

  let script = compose(&ScriptRequest {
    container_arch: ctx.host.arch,
    target: Some(target),
    toolchain: &request.toolchain,
    components: &request.components,
    before_script: &request.before_script,
    sccache: request.sccache,
    tool_version,
    args,
  })?;
  let engine_options = shlex::split(&request.docker_options)
    .ok_or_else(|| ArgsError::Unbalanced(request.docker_options.clone()))?;

  Ok(Mode::Sandbox {
    image,
    script,
    forward: EnvironmentFilter::default().filter(&ctx.env),
    engine_options,
  })
}

/// Run a plan with `runner`. Exactly one orchestrator runs.
pub async fn execute<R: ProcessRunner>(plan: &Plan, ctx: &Context, runner: &R) -> Result<Outcome, PipelineError> {
  match &plan.mode {
    Mode::Sandbox {
      image,
      script,
      forward,
      engine_options,
    } => {
      let script_path = script
        .write_temp(&temp_dir(&ctx.env))
        .map_err(PipelineError::Script)?;
      let (mounts, extra_env) = credential_mounts(&ctx.env);
      let run = SandboxRun {
        image,
        script: &script_path,
        workspace: &plan.workspace,
        workdir: &plan.workdir,
        forward,
        extra_env: &extra_env,
        mounts: &mounts,
        engine_options,
        host_mount_prefix: plan.host_mount_prefix.as_deref(),
        target_dir: &plan.target_dir,
        out_dir: plan.out_dir.as_deref(),
      };
      let orchestrator = SandboxOrchestrator::new(runner, PermissionFixer::from_env(&ctx.env), current_owner());
      let exit_code = orchestrator.run(&run).await?;
      Ok(Outcome {
        exit_code,
        sandboxed: true,
      })
    }
    Mode::Host => {
      let installer = ToolInstaller::new(ctx.host, cache_dir(&ctx.env));
      let tool = installer.ensure(&plan.tool_version, &ctx.env, &plan.workdir).await?;
      let exit_code = execute_on_host(plan, ctx, runner, &tool).await?;
      Ok(Outcome {
        exit_code,
        sandboxed: false,
      })
    }
  }
}

/// Run a host-mode plan with an already located build tool.
pub async fn execute_on_host<R: ProcessRunner>(
  plan: &Plan,
  ctx: &Context,
  runner: &R,
  tool: &Path,
) -> Result<i32, PipelineError> {
  let run = HostRun {
    platform: ctx.host,
    command: &plan.command,
    target: plan.target.as_ref(),
    toolchain: &plan.toolchain,
    components: &plan.components,
    args: &plan.args,
    tool,
    workdir: &plan.workdir,
    env: &ctx.env,
    sccache: plan.sccache,
  };
  Ok(HostOrchestrator::new(runner).run(&run).await?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::arch::Arch;
  use crate::platform::os::Os;
  use crate::script::Step;
  use crate::util::testutil::RecordingRunner;
  use serial_test::serial;
  use tracing_test::traced_test;

  fn ctx(host: Platform, env: &[(&str, &str)]) -> Context {
    Context {
      host,
      env: env.iter().copied().collect(),
      cwd: PathBuf::from("/work"),
      tables: Tables::embedded().unwrap(),
    }
  }

  fn linux_x64() -> Platform {
    Platform::new(Arch::X86_64, Os::Linux)
  }

  fn build(args: &str) -> BuildRequest {
    BuildRequest {
      command: "build".to_string(),
      args: args.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn native_linux_build_is_sandboxed_in_matrix_image() {
    let plan = plan(&build("--release"), &ctx(linux_x64(), &[])).unwrap();
    assert_eq!(plan.target.as_ref().map(TargetTriple::as_str), Some("x86_64-unknown-linux-gnu"));
    assert_eq!(plan.policy, AbiPolicy::Auto);
    match &plan.mode {
      Mode::Sandbox { image, .. } => assert_eq!(image.reference, "quay.io/pypa/manylinux2014_x86_64:latest"),
      Mode::Host => panic!("expected a sandboxed build"),
    }
    assert!(!plan.args.contains("--target"));
    assert!(!plan.args.contains("--manylinux"));
  }

  #[test]
  fn container_off_builds_on_host_regardless_of_policy() {
    for manylinux in ["", "auto", "2_28", "manylinux2014"] {
      let request = BuildRequest {
        manylinux: manylinux.to_string(),
        container: "off".to_string(),
        ..build("")
      };
      let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
      assert!(!plan.is_sandboxed(), "manylinux={manylinux}");
    }
  }

  #[test]
  fn container_short_token_resolves_through_matrix() {
    let request = BuildRequest {
      target: "x86_64-unknown-linux-gnu".to_string(),
      container: "2_28".to_string(),
      ..build("")
    };
    let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
    match &plan.mode {
      Mode::Sandbox { image, .. } => assert_eq!(image.reference, "quay.io/pypa/manylinux_2_28_x86_64:latest"),
      Mode::Host => panic!("expected a sandboxed build"),
    }
    assert!(plan.args.contains("--target"));
  }

  #[test]
  #[traced_test]
  fn zig_dropped_for_s390x_without_touching_sandbox() {
    let request = BuildRequest {
      target: "s390x".to_string(),
      ..build("--release --zig")
    };
    let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
    assert!(!plan.args.contains("--zig"));
    match &plan.mode {
      Mode::Sandbox { image, script, .. } => {
        assert!(image.reference.contains("s390x"));
        assert!(!script.has(Step::Zig));
      }
      Mode::Host => panic!("expected a sandboxed build"),
    }
    assert!(logs_contain("ignoring --zig"));
  }

  #[test]
  fn explicit_policy_is_passed_to_build_tool() {
    let request = BuildRequest {
      manylinux: "manylinux_2_28".to_string(),
      ..build("")
    };
    let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
    assert_eq!(plan.args.value_of("--manylinux"), Some("2_28"));
  }

  #[test]
  fn target_from_args_is_honoured() {
    let plan = plan(&build("--target aarch64-unknown-linux-gnu"), &ctx(linux_x64(), &[])).unwrap();
    assert_eq!(plan.target.as_ref().map(TargetTriple::as_str), Some("aarch64-unknown-linux-gnu"));
    assert_eq!(plan.args.tokens().iter().filter(|t| *t == "--target").count(), 1);
    match &plan.mode {
      Mode::Sandbox { image, .. } => assert!(image.reference.contains("aarch64")),
      Mode::Host => panic!("expected a sandboxed build"),
    }
  }

  #[test]
  fn macos_host_never_sandboxes() {
    let host = Platform::new(Arch::Aarch64, Os::MacOs);
    let plan = plan(&build("--universal2"), &ctx(host, &[])).unwrap();
    assert!(!plan.is_sandboxed());
    assert_eq!(plan.target, None);
  }

  #[test]
  fn non_artifact_command_has_inert_policy() {
    let request = BuildRequest {
      command: "sdist".to_string(),
      ..Default::default()
    };
    let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
    assert!(plan.policy.is_inert());
    assert!(!plan.is_sandboxed());
    assert_eq!(plan.args.tokens(), ["sdist"]);
  }

  #[test]
  #[traced_test]
  fn unmatched_token_degrades_to_host() {
    let request = BuildRequest {
      container: "9_99".to_string(),
      ..build("")
    };
    let plan = plan(&request, &ctx(linux_x64(), &[])).unwrap();
    assert!(!plan.is_sandboxed());
    assert!(logs_contain("no container image matches"));
  }

  #[test]
  fn empty_command_is_nothing_to_run() {
    let err = plan(&BuildRequest::default(), &ctx(linux_x64(), &[])).unwrap_err();
    assert!(matches!(err, PipelineError::NothingToRun(_)));
  }

  #[test]
  fn workspace_and_working_directory() {
    let request = BuildRequest {
      working_directory: Some(PathBuf::from("py")),
      ..build("")
    };
    let plan = plan(&request, &ctx(linux_x64(), &[("GITHUB_WORKSPACE", "/gh/ws")])).unwrap();
    assert_eq!(plan.workspace, PathBuf::from("/gh/ws"));
    assert_eq!(plan.workdir, PathBuf::from("/gh/ws/py"));
    assert_eq!(plan.target_dir, PathBuf::from("/gh/ws/py/target"));
  }

  #[test]
  fn forwarded_env_is_filtered() {
    let context = ctx(
      linux_x64(),
      &[("CARGO_HOME", "/home/me/.cargo"), ("CARGO_INCREMENTAL", "0"), ("AWS_SECRET", "x")],
    );
    let plan = plan(&build(""), &context).unwrap();
    match &plan.mode {
      Mode::Sandbox { forward, .. } => {
        assert_eq!(forward.names().collect::<Vec<_>>(), ["CARGO_INCREMENTAL"]);
      }
      Mode::Host => panic!("expected a sandboxed build"),
    }
  }

  #[test]
  fn summary_serializes() {
    let plan = plan(&build(""), &ctx(linux_x64(), &[])).unwrap();
    let json = serde_json::to_value(plan.summary()).unwrap();
    assert_eq!(json["sandboxed"], true);
    assert_eq!(json["policy"], "auto");
    assert!(json["script"].as_str().unwrap().starts_with("#!/bin/bash\nset -e\n"));
  }

  #[tokio::test]
  async fn sandboxed_execute_runs_only_the_container() {
    let temp = tempfile::tempdir().unwrap();
    let context = ctx(
      linux_x64(),
      &[
        ("RUNNER_TEMP", temp.path().to_str().unwrap()),
        ("GITHUB_WORKSPACE", temp.path().to_str().unwrap()),
        ("WHEELHOUSE_ALLOW_ROOT", "1"),
      ],
    );
    let plan = plan(&build(""), &context).unwrap();
    let runner = RecordingRunner::new();
    let outcome = execute(&plan, &context, &runner).await.unwrap();
    assert_eq!(
      outcome,
      Outcome {
        exit_code: 0,
        sandboxed: true
      }
    );
    assert!(runner.position("docker run").is_some());
    assert!(runner.position("rustup").is_none());
    assert!(runner.position("sudo").is_none());
  }

  #[tokio::test]
  async fn sandbox_mounts_workspace_root_for_nested_working_directory() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap();
    let context = ctx(
      linux_x64(),
      &[("RUNNER_TEMP", root), ("GITHUB_WORKSPACE", root), ("WHEELHOUSE_ALLOW_ROOT", "1")],
    );
    let request = BuildRequest {
      working_directory: Some(PathBuf::from("py")),
      ..build("")
    };
    let plan = plan(&request, &context).unwrap();
    let runner = RecordingRunner::new();
    execute(&plan, &context, &runner).await.unwrap();

    let calls = runner.calls();
    let run = calls
      .iter()
      .find(|c| c.program == "docker" && c.args.first().map(String::as_str) == Some("run"))
      .unwrap();
    let workdir = temp.path().join("py").display().to_string();
    let root_mount = format!("{root}:{root}");
    assert!(run.args.windows(2).any(|w| w[0] == "--workdir" && w[1] == workdir));
    assert!(run.args.windows(2).any(|w| w[0] == "-v" && w[1] == root_mount));
  }

  #[tokio::test]
  async fn host_execute_uses_given_tool() {
    let work = tempfile::tempdir().unwrap();
    let context = ctx(
      Platform::new(Arch::Aarch64, Os::MacOs),
      &[("GITHUB_WORKSPACE", work.path().to_str().unwrap()), ("pythonLocation", "/py")],
    );
    let plan = plan(&build("--release"), &context).unwrap();
    let runner = RecordingRunner::new();
    let code = execute_on_host(&plan, &context, &runner, Path::new("/bin/maturin"))
      .await
      .unwrap();
    assert_eq!(code, 0);
    assert_eq!(runner.lines().last().unwrap(), "/bin/maturin build --release");
    assert!(runner.position("docker").is_none());
  }

  #[test]
  #[serial]
  fn capture_reads_process_state_once() {
    temp_env::with_vars(
      [("GITHUB_WORKSPACE", Some("/gh/captured")), ("WHEELHOUSE_ALLOW_ROOT", None::<&str>)],
      || {
        let context = Context::capture(Tables::embedded().unwrap()).unwrap();
        assert_eq!(context.env.get("GITHUB_WORKSPACE"), Some("/gh/captured"));
        assert!(!context.env.contains("WHEELHOUSE_ALLOW_ROOT"));
      },
    );
  }

  #[test]
  #[serial]
  fn captured_env_is_not_affected_by_later_changes() {
    let context = temp_env::with_var("RUSTFLAGS", Some("-Ctarget-cpu=native"), || {
      Context::capture(Tables::embedded().unwrap()).unwrap()
    });
    temp_env::with_var("RUSTFLAGS", Some("-Copt-level=0"), || {
      assert_eq!(context.env.get("RUSTFLAGS"), Some("-Ctarget-cpu=native"));
    });
  }
}
