use std::{collections::HashSet, fmt};

use clap::{crate_authors, crate_description, crate_name, crate_version, Command};

use crate::{
    config::ResolvedConfig,
    errors::{LaunchError, Result},
    param::ParameterSpec,
    resolve::base_args,
};

/// Implementation of a pipeline stage
pub trait Stage {
    fn run(&self, cfg: &ResolvedConfig) -> anyhow::Result<()>;
}

impl<F> Stage for F
where
    F: Fn(&ResolvedConfig) -> anyhow::Result<()>,
{
    fn run(&self, cfg: &ResolvedConfig) -> anyhow::Result<()> {
        self(cfg)
    }
}

pub enum StageKind {
    /// Directly invocable stage
    Single {
        schema: Vec<ParameterSpec>,
        /// Pairs of parameters that may not both be given
        exclusive: Vec<(&'static str, &'static str)>,
        handle: Box<dyn Stage>,
    },
    /// Group of sub-stages selected by a second name (`tools`)
    Namespace { stages: Vec<StageDescriptor> },
}

pub struct StageDescriptor {
    name: &'static str,
    about: &'static str,
    kind: StageKind,
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("StageDescriptor");
        d.field("name", &self.name);
        match &self.kind {
            StageKind::Single {
                schema, exclusive, ..
            } => d.field("schema", schema).field("exclusive", exclusive),
            StageKind::Namespace { stages } => d.field("stages", stages),
        };
        d.finish()
    }
}

impl StageDescriptor {
    pub fn single<S: Stage + 'static>(
        name: &'static str,
        about: &'static str,
        schema: Vec<ParameterSpec>,
        handle: S,
    ) -> Self {
        Self {
            name,
            about,
            kind: StageKind::Single {
                schema,
                exclusive: Vec::new(),
                handle: Box::new(handle),
            },
        }
    }

    pub fn namespace(name: &'static str, about: &'static str, stages: Vec<StageDescriptor>) -> Self {
        Self {
            name,
            about,
            kind: StageKind::Namespace { stages },
        }
    }

    /// Declare that `a` and `b` may not both be set.  No-op for namespaces.
    pub fn exclusive(mut self, a: &'static str, b: &'static str) -> Self {
        if let StageKind::Single { exclusive, .. } = &mut self.kind {
            exclusive.push((a, b))
        }
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn about(&self) -> &'static str {
        self.about
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn is_namespace(&self) -> bool {
        matches!(self.kind, StageKind::Namespace { .. })
    }

    /// Sub-stage of a namespace
    pub fn sub_stage(&self, name: &str) -> Result<&StageDescriptor> {
        match &self.kind {
            StageKind::Namespace { stages } => stages.iter().find(|s| s.name == name),
            StageKind::Single { .. } => None,
        }
        .ok_or_else(|| LaunchError::UnknownStage(format!("{} {}", self.name, name)))
    }

    /// clap model for this stage, including the shared options
    pub fn command(&self) -> Command {
        base_args().into_iter().fold(self.schema_command(), |c, a| c.arg(a))
    }

    fn schema_command(&self) -> Command {
        let c = Command::new(self.name).about(self.about);
        match &self.kind {
            StageKind::Single { schema, .. } => schema.iter().fold(c, |c, p| c.arg(p.to_arg())),
            StageKind::Namespace { stages } => stages
                .iter()
                .fold(c, |c, s| c.subcommand(s.schema_command())),
        }
    }

    // Parameter names must be unique within a stage, sub-stage names within a namespace
    fn check(&self) -> Result<()> {
        match &self.kind {
            StageKind::Single {
                schema, exclusive, ..
            } => {
                let mut seen = HashSet::new();
                for p in schema.iter() {
                    if !seen.insert(p.name()) {
                        return Err(LaunchError::DuplicateParameter {
                            stage: self.name.to_owned(),
                            parameter: p.name().to_owned(),
                        });
                    }
                }
                if let Some(x) = exclusive
                    .iter()
                    .flat_map(|&(a, b)| [a, b])
                    .find(|x| !seen.contains(x))
                {
                    return Err(LaunchError::UnknownParameter {
                        stage: self.name.to_owned(),
                        parameter: x.to_owned(),
                    });
                }
            }
            StageKind::Namespace { stages } => {
                let mut seen = HashSet::new();
                for s in stages.iter() {
                    if !seen.insert(s.name) {
                        return Err(LaunchError::DuplicateStage(format!(
                            "{} {}",
                            self.name, s.name
                        )));
                    }
                    s.check()?
                }
            }
        }
        Ok(())
    }
}

/// Registry
///
/// Fixed set of stages known to the launcher.
/// Populated once through RegistryBuilder at startup; read only afterwards.
///
#[derive(Debug)]
pub struct Registry {
    stages: Vec<StageDescriptor>,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    stages: Vec<StageDescriptor>,
}

impl RegistryBuilder {
    pub fn register(mut self, desc: StageDescriptor) -> Result<Self> {
        if self.stages.iter().any(|s| s.name == desc.name) {
            return Err(LaunchError::DuplicateStage(desc.name.to_owned()));
        }
        desc.check()?;
        trace!("Registered stage {}", desc.name);
        self.stages.push(desc);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            stages: self.stages,
        }
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Result<&StageDescriptor> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| LaunchError::UnknownStage(name.to_owned()))
    }

    /// Stage names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Set up definition of command options for clap
    pub fn cli_model(&self) -> Command {
        self.stages.iter().fold(
            Command::new(crate_name!())
                .about(crate_description!())
                .version(crate_version!())
                .author(crate_authors!())
                .subcommand_required(true)
                .arg_required_else_help(true),
            |c, s| c.subcommand(s.command()),
        )
    }

    /// Rendered help for one stage as reached from the top level command
    pub fn help(&self, name: &str) -> Result<String> {
        self.lookup(name)?;
        let mut cmd = self.cli_model();
        cmd.build();
        cmd.find_subcommand_mut(name)
            .map(|c| c.render_help().to_string())
            .ok_or_else(|| LaunchError::UnknownStage(name.to_owned()))
    }
}
