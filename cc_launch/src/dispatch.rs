use std::{
    ffi::OsString,
    fmt,
    io::Write,
    time::{Duration, Instant},
};

use crate::{
    config::ResolvedConfig,
    errors::{LaunchError, Result},
    registry::{Registry, Stage, StageKind},
    resolve::{resolve_cli, ResolveContext},
};

/// Successful outcome of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Completed,
    /// A namespace was selected without a sub-stage; its help was printed
    HelpRequested,
}

/// Progress of one launcher run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Parsing,
    Validated,
    Dispatching,
    Completed,
    Failed,
    HelpDisplayed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Parsing => "parsing",
            Self::Validated => "validated",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::HelpDisplayed => "help displayed",
        };
        write!(f, "{}", s)
    }
}

/// Invoke the stage named by `cfg`, or print the help of a bare namespace to `out`
pub fn dispatch<W: Write>(
    registry: &Registry,
    cfg: &ResolvedConfig,
    out: &mut W,
) -> Result<StageResult> {
    timed_dispatch(registry, cfg, out).0
}

// The runtime is logged for every outcome, help and failures included
fn timed_dispatch<W: Write>(
    registry: &Registry,
    cfg: &ResolvedConfig,
    out: &mut W,
) -> (Result<StageResult>, Duration) {
    let start_time = Instant::now();
    let res = run_stage(registry, cfg, out);
    let elapsed = start_time.elapsed();
    info!("Total runtime: {:.2} s", elapsed.as_secs_f64());
    (res, elapsed)
}

fn run_stage<W: Write>(
    registry: &Registry,
    cfg: &ResolvedConfig,
    out: &mut W,
) -> Result<StageResult> {
    let desc = registry.lookup(cfg.stage())?;
    let handle: &dyn Stage = match (desc.kind(), cfg.sub_stage()) {
        (StageKind::Single { handle, .. }, None) => &**handle,
        (StageKind::Namespace { .. }, None) => {
            write!(out, "{}", registry.help(desc.name())?)?;
            return Ok(StageResult::HelpRequested);
        }
        (StageKind::Namespace { .. }, Some(s)) => match desc.sub_stage(s)?.kind() {
            StageKind::Single { handle, .. } => &**handle,
            StageKind::Namespace { .. } => {
                return Err(LaunchError::UnknownStage(format!("{} {}", cfg.stage(), s)))
            }
        },
        (StageKind::Single { .. }, Some(s)) => {
            return Err(LaunchError::UnknownStage(format!("{} {}", cfg.stage(), s)))
        }
    };

    debug!("Resolved configuration: {}", cfg);
    handle
        .run(cfg)
        .map(|_| StageResult::Completed)
        .map_err(|source| LaunchError::StageExecution {
            stage: match cfg.sub_stage() {
                Some(s) => format!("{} {}", cfg.stage(), s),
                None => cfg.stage().to_owned(),
            },
            source,
        })
}

/// Launcher
///
/// Drives one run through parsing, validation and dispatch, recording the
/// states passed through.  Each step is taken once and in order: `resolve`
/// only from `Idle`, `dispatch` only from `Validated`.  A failure at any step
/// is terminal.
///
pub struct Launcher<'a> {
    registry: &'a Registry,
    ctx: ResolveContext,
    state: RunState,
    trail: Vec<RunState>,
    runtime: Option<Duration>,
}

impl<'a> Launcher<'a> {
    pub fn new(registry: &'a Registry, ctx: ResolveContext) -> Self {
        Self {
            registry,
            ctx,
            state: RunState::Idle,
            trail: vec![RunState::Idle],
            runtime: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States passed through so far, starting with `Idle`
    pub fn trail(&self) -> &[RunState] {
        &self.trail
    }

    /// Wall-clock time spent dispatching, once dispatch has finished
    pub fn runtime(&self) -> Option<Duration> {
        self.runtime
    }

    fn advance(&mut self, s: RunState) {
        debug!("Run state {} -> {}", self.state, s);
        self.state = s;
        self.trail.push(s)
    }

    fn require(&self, s: RunState, action: &'static str) -> Result<()> {
        if self.state == s {
            Ok(())
        } else {
            Err(LaunchError::InvalidRunState {
                state: self.state.to_string(),
                action,
            })
        }
    }

    /// Parse and validate a full command line (program name first)
    pub fn resolve<I, T>(&mut self, argv: I) -> Result<ResolvedConfig>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.require(RunState::Idle, "resolve arguments for")?;
        self.advance(RunState::Parsing);
        match resolve_cli(self.registry, argv, &self.ctx) {
            Ok(cfg) => {
                self.advance(RunState::Validated);
                Ok(cfg)
            }
            Err(e) => {
                self.advance(RunState::Failed);
                Err(e)
            }
        }
    }

    pub fn dispatch<W: Write>(&mut self, cfg: &ResolvedConfig, out: &mut W) -> Result<StageResult> {
        self.require(RunState::Validated, "dispatch")?;
        self.advance(RunState::Dispatching);
        let (res, elapsed) = timed_dispatch(self.registry, cfg, out);
        self.runtime = Some(elapsed);
        self.advance(match res {
            Ok(StageResult::Completed) => RunState::Completed,
            Ok(StageResult::HelpRequested) => RunState::HelpDisplayed,
            Err(_) => RunState::Failed,
        });
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        param::{ParamKind, ParameterSpec},
        registry::StageDescriptor,
    };
    use std::{cell::Cell, rc::Rc};

    fn counting(name: &'static str, count: Rc<Cell<usize>>) -> StageDescriptor {
        StageDescriptor::single(
            name,
            "counting stage",
            vec![ParameterSpec::option("threads", ParamKind::Int, "threads").default_value("1")],
            move |_: &ResolvedConfig| -> anyhow::Result<()> {
                count.set(count.get() + 1);
                Ok(())
            },
        )
    }

    fn registry(count: &Rc<Cell<usize>>) -> Registry {
        Registry::builder()
            .register(counting("train", count.clone()))
            .unwrap()
            .register(StageDescriptor::namespace(
                "tools",
                "Auxiliary tools",
                vec![counting("list_models", count.clone())],
            ))
            .unwrap()
            .register(StageDescriptor::single(
                "broken",
                "always fails",
                Vec::new(),
                |_: &ResolvedConfig| -> anyhow::Result<()> { Err(anyhow!("model file is truncated")) },
            ))
            .unwrap()
            .build()
    }

    fn launcher(reg: &Registry) -> Launcher<'_> {
        let mut ctx = ResolveContext::new("/tmp");
        ctx.set_available_cores(2);
        Launcher::new(reg, ctx)
    }

    #[test]
    fn stage_invoked_once() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        assert_eq!(l.state(), RunState::Idle);
        let cfg = l.resolve(["cc_launch", "train"]).unwrap();
        assert_eq!(l.state(), RunState::Validated);
        let mut out = Vec::new();
        assert_eq!(l.dispatch(&cfg, &mut out).unwrap(), StageResult::Completed);
        assert_eq!(l.state(), RunState::Completed);
        assert_eq!(count.get(), 1);
        assert!(out.is_empty());
        assert_eq!(
            l.trail(),
            &[
                RunState::Idle,
                RunState::Parsing,
                RunState::Validated,
                RunState::Dispatching,
                RunState::Completed
            ]
        );

        // A completed run can not be dispatched again
        let r = l.dispatch(&cfg, &mut out);
        assert!(matches!(r, Err(LaunchError::InvalidRunState { .. })));
        assert_eq!(l.state(), RunState::Completed);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn bare_namespace_prints_help() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        let cfg = l.resolve(["cc_launch", "tools"]).unwrap();
        let mut out = Vec::new();
        assert_eq!(
            l.dispatch(&cfg, &mut out).unwrap(),
            StageResult::HelpRequested
        );
        assert_eq!(l.state(), RunState::HelpDisplayed);
        assert!(l.runtime().is_some());
        assert_eq!(count.get(), 0);
        assert!(String::from_utf8(out).unwrap().contains("list_models"));
    }

    #[test]
    fn sub_stage_invoked() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        let cfg = l.resolve(["cc_launch", "tools", "list_models"]).unwrap();
        assert_eq!(cfg.sub_stage(), Some("list_models"));
        assert_eq!(
            l.dispatch(&cfg, &mut Vec::new()).unwrap(),
            StageResult::Completed
        );
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn stage_failure_is_terminal() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        let cfg = l.resolve(["cc_launch", "broken"]).unwrap();
        let r = l.dispatch(&cfg, &mut Vec::new());
        assert!(matches!(r, Err(LaunchError::StageExecution { stage, .. }) if stage == "broken"));
        assert_eq!(l.state(), RunState::Failed);
        assert!(l.runtime().is_some());
        assert!(l.dispatch(&cfg, &mut Vec::new()).is_err());
        assert_eq!(l.trail().last(), Some(&RunState::Failed));
    }

    #[test]
    fn parse_failure_is_terminal() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        assert!(l.resolve(["cc_launch", "train", "--threads", "3"]).is_err());
        assert_eq!(l.state(), RunState::Failed);
        assert!(l.runtime().is_none());

        // A valid command line does not revive a failed run
        let r = l.resolve(["cc_launch", "train"]);
        assert!(matches!(r, Err(LaunchError::InvalidRunState { .. })));
        assert_eq!(l.state(), RunState::Failed);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn resolve_only_once() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let mut l = launcher(&reg);
        l.resolve(["cc_launch", "train"]).unwrap();
        let r = l.resolve(["cc_launch", "tools", "list_models"]);
        assert!(matches!(r, Err(LaunchError::InvalidRunState { .. })));
        assert_eq!(l.state(), RunState::Validated);
    }

    #[test]
    fn dispatch_needs_validated_run() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let cfg = launcher(&reg).resolve(["cc_launch", "train"]).unwrap();
        let mut l = launcher(&reg);
        let r = l.dispatch(&cfg, &mut Vec::new());
        assert!(
            matches!(r, Err(LaunchError::InvalidRunState { ref state, .. }) if state == "idle")
        );
        assert_eq!(l.state(), RunState::Idle);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn unknown_stage_in_config() {
        let count = Rc::new(Cell::new(0));
        let reg = registry(&count);
        let other = Registry::builder()
            .register(counting("features", count.clone()))
            .unwrap()
            .build();
        let cfg = launcher(&other).resolve(["cc_launch", "features"]).unwrap();
        let r = dispatch(&reg, &cfg, &mut Vec::new());
        assert!(matches!(r, Err(LaunchError::UnknownStage(s)) if s == "features"));
    }
}
