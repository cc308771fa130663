use std::collections::BTreeMap;
use std::fmt;

use futures::future::{FutureExt, try_join_all};

use super::{StageKind, StageLoader, StageSources};
use crate::backend::{
    Backend, ParamBinding, ParamLocation, ParamValue, ProgramId, ProgramSource, ResourceScope,
};
use crate::error::{BackendError, SimError, SimResult};

/// A contract parameter the program does not consume.
///
/// Not an error: the feature is unused by that program and binding the
/// parameter is a no-op.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShaderParamUnresolved {
    pub stage: StageKind,
    pub name: &'static str,
}

impl fmt::Display for ShaderParamUnresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage does not consume `{}`", self.stage, self.name)
    }
}

/// A compiled program and its resolved contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    kind: StageKind,
    program: ProgramId,
    params: BTreeMap<&'static str, Option<ParamLocation>>,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Resolved location of a contract parameter. `None` for unresolved
    /// parameters and for names outside the contract.
    pub fn location(&self, name: &str) -> Option<ParamLocation> {
        self.params.get(name).copied().flatten()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.location(name).is_some()
    }

    /// Contract parameters the program does not consume, in contract order.
    pub fn unresolved(&self) -> Vec<ShaderParamUnresolved> {
        self.kind
            .params()
            .iter()
            .filter(|name| !self.is_resolved(name))
            .map(|&name| ShaderParamUnresolved {
                stage: self.kind,
                name,
            })
            .collect()
    }

    /// Pairs each value with its location, dropping unresolved names.
    pub fn bind(&self, values: &[(&str, ParamValue)]) -> Vec<ParamBinding> {
        values
            .iter()
            .filter_map(|&(name, value)| {
                self.location(name)
                    .map(|location| ParamBinding { location, value })
            })
            .collect()
    }
}

/// Resolves every parameter of `kind`'s contract against `program`.
pub fn bind_params<B: Backend + ?Sized>(
    backend: &B,
    program: ProgramId,
    kind: StageKind,
) -> Result<Stage, BackendError> {
    let interface = backend
        .program_interface(program)
        .ok_or(program.unknown())?;

    let params: BTreeMap<_, _> = kind
        .params()
        .iter()
        .map(|&name| (name, interface.location(name)))
        .collect();

    let stage = Stage {
        kind,
        program,
        params,
    };
    for missing in stage.unresolved() {
        log::debug!("{missing}; binding it is a no-op");
    }
    Ok(stage)
}

fn compile<B: Backend + ?Sized>(
    scope: &mut ResourceScope<'_, B>,
    kind: StageKind,
    sources: &StageSources,
) -> SimResult<Stage> {
    let program = scope
        .create_program(&ProgramSource {
            kind,
            vertex: &sources.vertex,
            fragment: &sources.fragment,
        })
        .map_err(|e| SimError::StageLoad {
            stage: kind,
            source: e.into(),
        })?;
    Ok(bind_params(&**scope, program, kind)?)
}

/// Loads, compiles and resolves a single stage.
pub async fn load_stage<B, L>(backend: &mut B, loader: &L, kind: StageKind) -> SimResult<Stage>
where
    B: Backend + ?Sized,
    L: StageLoader + ?Sized,
{
    let sources = loader
        .load(kind)
        .await
        .map_err(|source| SimError::StageLoad { stage: kind, source })?;
    let mut scope = ResourceScope::new(backend);
    let stage = compile(&mut scope, kind, &sources)?;
    scope.commit();
    Ok(stage)
}

/// All six stages. A value of this type only exists once every stage has
/// loaded and compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRegistry {
    force: Stage,
    euler: Stage,
    rk2: Stage,
    particle: Stage,
    debug: Stage,
    ambient: Stage,
}

impl StageRegistry {
    /// Requests every stage's sources concurrently, waits for all of them,
    /// then compiles. Any failure releases the programs compiled so far.
    pub async fn load_all<B, L>(backend: &mut B, loader: &L) -> SimResult<Self>
    where
        B: Backend + ?Sized,
        L: StageLoader + ?Sized,
    {
        let pending = StageKind::ALL.map(|kind| {
            loader.load(kind).map(move |result| {
                result
                    .map(|sources| (kind, sources))
                    .map_err(|source| SimError::StageLoad { stage: kind, source })
            })
        });
        let loaded = try_join_all(pending).await?;
        log::debug!("all {} stage sources ready", loaded.len());

        let mut scope = ResourceScope::new(backend);
        let mut stages = BTreeMap::new();
        for (kind, sources) in &loaded {
            stages.insert(*kind, compile(&mut scope, *kind, sources)?);
        }

        let mut take = |kind: StageKind| {
            stages
                .remove(&kind)
                .ok_or_else(|| SimError::StageLoad {
                    stage: kind,
                    source: anyhow::anyhow!("stage missing from load set"),
                })
        };
        let registry = Self {
            force: take(StageKind::Force)?,
            euler: take(StageKind::Euler)?,
            rk2: take(StageKind::Rk2)?,
            particle: take(StageKind::Particle)?,
            debug: take(StageKind::Debug)?,
            ambient: take(StageKind::Ambient)?,
        };
        scope.commit();

        let unresolved: usize = registry.iter().map(|s| s.unresolved().len()).sum();
        log::info!("stage registry ready: 6 programs, {unresolved} unused parameters");
        Ok(registry)
    }

    pub fn get(&self, kind: StageKind) -> &Stage {
        match kind {
            StageKind::Force => &self.force,
            StageKind::Euler => &self.euler,
            StageKind::Rk2 => &self.rk2,
            StageKind::Particle => &self.particle,
            StageKind::Debug => &self.debug,
            StageKind::Ambient => &self.ambient,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        StageKind::ALL.into_iter().map(|kind| self.get(kind))
    }

    /// Deletes every program.
    pub fn release<B: Backend + ?Sized>(self, backend: &mut B) {
        self.delete_all(backend);
    }

    pub(crate) fn delete_all<B: Backend + ?Sized>(&self, backend: &mut B) {
        for stage in self.iter() {
            backend.delete_program(stage.program);
        }
    }
}
