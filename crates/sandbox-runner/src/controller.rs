//! Launch orchestration

use log::info;
use sandbox_cgroup::{CgroupPathResolver, ResolvedCgroup};
use sandbox_core::{Result, SandboxError};
use sandbox_fs::BindMount;
use sandbox_namespace::build_id_mappings;

use crate::config::SandboxSpec;
use crate::fds::prepare_fds;
use crate::monitoring::ResourceMonitor;
use crate::report::ExecutionResult;
use crate::runtime::{ContainerRuntime, ContainerSpec};

/// Builds the sandbox for one configuration and supervises it
pub struct ContainerLauncher<R: ContainerRuntime> {
    runtime: R,
    resolver: CgroupPathResolver,
    rootless: bool,
}

impl<R: ContainerRuntime> ContainerLauncher<R> {
    pub fn new(runtime: R, resolver: CgroupPathResolver) -> Self {
        Self {
            runtime,
            resolver,
            rootless: false,
        }
    }

    /// Place the sandbox cgroup under a delegated scope instead of the hierarchy root
    pub fn rootless(mut self, rootless: bool) -> Self {
        self.rootless = rootless;
        self
    }

    fn build_spec(&self, spec: &SandboxSpec) -> Result<(ContainerSpec, ResolvedCgroup)> {
        let cgroup = self.resolver.resolve(&spec.cgroup_path, self.rootless)?;
        if let Some(parent) = &cgroup.scheduler_parent {
            info!("Sandbox scheduled under {}", parent);
        }

        let user_namespace = spec.remapping().cloned();
        let id_mappings = user_namespace.as_ref().map(build_id_mappings);
        let overlay = sandbox_fs::prepare(user_namespace.as_ref(), &spec.overlayfs)?;
        let mounts = spec
            .mounts
            .iter()
            .map(BindMount::parse)
            .collect::<Result<Vec<_>>>()?;
        let fds = prepare_fds(spec.fd.as_ref())?;

        let container = ContainerSpec {
            command: spec.command.clone(),
            paths: spec.paths.clone(),
            cwd: spec.cwd.clone(),
            overlay,
            mounts,
            user_namespace,
            identity: spec.identity(),
            id_mappings,
            cgroup_path: cgroup.path.clone(),
            cgroup: spec.limits.cgroup.clone(),
            rlimit: spec.limits.rlimit.clone(),
            no_new_keyring: spec.no_new_keyring,
            fds,
        };
        Ok((container, cgroup))
    }

    /// Run the command to completion.
    ///
    /// Errors mean no command ever ran; anything that happens once it started
    /// is described by the returned [`ExecutionResult`].
    pub fn launch(&self, spec: &SandboxSpec) -> Result<ExecutionResult> {
        spec.validate()?;
        let (container, cgroup) = self.build_spec(spec)?;

        let handle = self.runtime.create(container)?;
        handle.start().map_err(|e| match e {
            SandboxError::Runtime(_) => e,
            other => SandboxError::Runtime(other.to_string()),
        })?;

        ResourceMonitor::new(&spec.limits, &cgroup.path).supervise(handle)
    }
}
