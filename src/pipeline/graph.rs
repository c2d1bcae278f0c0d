use super::stage::{Stage, StageContext, StageInputs, Value};
use super::{keys, ReductionContext};
use crate::binner::Binner;
use crate::config::PipelineConfig;
use crate::diagnostics::{CacheActivity, RunTrace, TimingBreakdown};
use crate::error::{ReductionError, Result};
use crate::image::{ImageF32, Mask};
use crate::reduction::ReducedCurve;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Named values supplied to [`PipelineGraph::run`].
#[derive(Clone, Debug, Default)]
pub struct PipelineInputs {
    values: HashMap<String, Value>,
}

impl PipelineInputs {
    /// The usual request: one image plus its configuration.
    pub fn new(image: ImageF32, config: PipelineConfig) -> Self {
        Self::default()
            .with(keys::IMAGE, image)
            .with(keys::CONFIG, config)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Everything the stages of one run produced, keyed by output name.
#[derive(Debug)]
pub struct PipelineOutputs {
    pub values: HashMap<String, Value>,
    pub trace: RunTrace,
}

impl PipelineOutputs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn reduced_curve(&self) -> Option<Arc<ReducedCurve>> {
        match self.values.get(keys::REDUCED_CURVE)? {
            Value::Curve(c) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    pub fn mask(&self) -> Option<Arc<Mask>> {
        match self.values.get(keys::MASK)? {
            Value::Mask(m) => Some(Arc::clone(m)),
            _ => None,
        }
    }

    pub fn image(&self, key: &str) -> Option<Arc<ImageF32>> {
        match self.values.get(key)? {
            Value::Image(i) => Some(Arc::clone(i)),
            _ => None,
        }
    }

    pub fn binner(&self) -> Option<Arc<Binner>> {
        match self.values.get(keys::BINNER)? {
            Value::Binner(b) => Some(Arc::clone(b)),
            _ => None,
        }
    }
}

struct RegisteredPipeline {
    /// Stages in execution (topological) order.
    stages: Vec<Box<dyn Stage>>,
}

/// Registry of named stage DAGs sharing one [`ReductionContext`].
pub struct PipelineGraph {
    context: ReductionContext,
    pipelines: HashMap<String, RegisteredPipeline>,
}

impl PipelineGraph {
    pub fn new(context: ReductionContext) -> Self {
        Self {
            context,
            pipelines: HashMap::new(),
        }
    }

    pub fn context(&self) -> &ReductionContext {
        &self.context
    }

    /// Names of the registered pipelines, sorted.
    pub fn pipelines(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Stage names of `pipeline` in execution order.
    pub fn execution_order(&self, pipeline: &str) -> Option<Vec<&str>> {
        self.pipelines
            .get(pipeline)
            .map(|p| p.stages.iter().map(|s| s.name()).collect())
    }

    /// Build and store the DAG for `name`, replacing any previous one.
    ///
    /// A stage depends on the stage producing each key it consumes; keys no
    /// stage produces are external run inputs. Stages are ordered
    /// topologically, ties broken by their position in `stages`.
    pub fn register(&mut self, name: impl Into<String>, stages: Vec<Box<dyn Stage>>) -> Result<()> {
        let name = name.into();
        let stages = topological_order(&name, stages)?;
        info!(
            "Registered pipeline `{name}`: {}",
            stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
        );
        self.pipelines.insert(name, RegisteredPipeline { stages });
        Ok(())
    }

    /// Execute `pipeline` on `inputs`.
    ///
    /// A `config` input is validated before any stage runs. A failing stage
    /// aborts the run with [`ReductionError::Stage`]; no partial outputs are
    /// returned.
    pub fn run(&self, pipeline: &str, inputs: PipelineInputs) -> Result<PipelineOutputs> {
        let registered = self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| ReductionError::config(format!("unknown pipeline `{pipeline}`")))?;

        match inputs.values.get(keys::CONFIG) {
            Some(Value::Config(cfg)) => cfg.validate()?,
            Some(other) => {
                return Err(ReductionError::config(format!(
                    "input `{}` is a {}, expected config",
                    keys::CONFIG,
                    other.kind()
                )))
            }
            None => {}
        }
        for stage in &registered.stages {
            if inputs.values.contains_key(stage.output()) {
                return Err(ReductionError::config(format!(
                    "input `{}` is produced by stage `{}`",
                    stage.output(),
                    stage.name()
                )));
            }
        }

        let total_start = Instant::now();
        let hits_before = self.context.binners.hits();
        let misses_before = self.context.binners.misses();
        let ctx = StageContext::new(pipeline, &self.context);
        let mut values = inputs.values;
        let mut produced = Vec::with_capacity(registered.stages.len());
        let mut timings = TimingBreakdown::default();

        for stage in &registered.stages {
            let mut stage_inputs = StageInputs::default();
            for input in stage.inputs() {
                match values.get(input.key) {
                    Some(v) => stage_inputs.insert(input.key, v.clone()),
                    None if input.required => {
                        return Err(ReductionError::config(format!(
                            "missing required input `{}`",
                            input.key
                        ))
                        .in_stage(stage.name()))
                    }
                    None => {}
                }
            }
            let start = Instant::now();
            let value = stage
                .run(&ctx, &stage_inputs)
                .map_err(|e| e.in_stage(stage.name()))?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug!(
                "[{pipeline}] stage `{}` -> `{}` ({}) in {:.3} ms",
                stage.name(),
                stage.output(),
                value.kind(),
                elapsed_ms
            );
            timings.push(stage.name(), elapsed_ms);
            values.insert(stage.output().to_string(), value);
            produced.push(stage.output().to_string());
        }
        timings.total_ms = total_start.elapsed().as_secs_f64() * 1000.0;

        let trace = RunTrace {
            pipeline: pipeline.to_string(),
            executed: registered.stages.iter().map(|s| s.name().to_string()).collect(),
            timings,
            binner_cache: CacheActivity {
                hits: self.context.binners.hits().saturating_sub(hits_before),
                misses: self.context.binners.misses().saturating_sub(misses_before),
            },
            masking: ctx.take_masking(),
        };
        let values = produced
            .into_iter()
            .filter_map(|key| values.remove(&key).map(|v| (key, v)))
            .collect();
        Ok(PipelineOutputs { values, trace })
    }
}

fn topological_order(pipeline: &str, stages: Vec<Box<dyn Stage>>) -> Result<Vec<Box<dyn Stage>>> {
    if stages.is_empty() {
        return Err(ReductionError::config(format!(
            "pipeline `{pipeline}` has no stages"
        )));
    }

    let mut names = HashSet::new();
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (i, stage) in stages.iter().enumerate() {
        if !names.insert(stage.name()) {
            return Err(ReductionError::config(format!(
                "pipeline `{pipeline}` has two stages named `{}`",
                stage.name()
            )));
        }
        if let Some(&prev) = producers.get(stage.output()) {
            return Err(ReductionError::config(format!(
                "stages `{}` and `{}` both produce `{}`",
                stages[prev].name(),
                stage.name(),
                stage.output()
            )));
        }
        producers.insert(stage.output(), i);
    }

    let n = stages.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, stage) in stages.iter().enumerate() {
        let mut seen = HashSet::new();
        for input in stage.inputs() {
            if let Some(&producer) = producers.get(input.key) {
                if seen.insert(producer) {
                    in_degree[i] += 1;
                    dependents[producer].push(i);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut done = vec![false; n];
    while order.len() < n {
        let Some(next) = (0..n).find(|&i| !done[i] && in_degree[i] == 0) else {
            let stuck: Vec<&str> = (0..n).filter(|&i| !done[i]).map(|i| stages[i].name()).collect();
            return Err(ReductionError::config(format!(
                "pipeline `{pipeline}` has a dependency cycle among {stuck:?}"
            )));
        };
        done[next] = true;
        order.push(next);
        for &d in &dependents[next] {
            in_degree[d] -= 1;
        }
    }

    let mut slots: Vec<Option<Box<dyn Stage>>> = stages.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageInput;

    /// Copies its first input image to its output, or fails on demand.
    struct Relay {
        name: &'static str,
        inputs: Vec<StageInput>,
        output: &'static str,
        fail: bool,
    }

    impl Relay {
        fn boxed(name: &'static str, inputs: &[&'static str], output: &'static str) -> Box<dyn Stage> {
            Box::new(Relay {
                name,
                inputs: inputs.iter().map(|&k| StageInput::required(k)).collect(),
                output,
                fail: false,
            })
        }
    }

    impl Stage for Relay {
        fn name(&self) -> &str {
            self.name
        }
        fn inputs(&self) -> &[StageInput] {
            &self.inputs
        }
        fn output(&self) -> &str {
            self.output
        }
        fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
            if self.fail {
                return Err(ReductionError::EmptyMask { total: 1 });
            }
            let first = self.inputs[0].key;
            Ok(Value::Image(inputs.image(first)?))
        }
    }

    fn graph() -> PipelineGraph {
        PipelineGraph::new(ReductionContext::new())
    }

    #[test]
    fn stages_run_in_dependency_order() {
        let mut g = graph();
        g.register(
            "p",
            vec![
                Relay::boxed("c", &["b_out"], "c_out"),
                Relay::boxed("a", &["image"], "a_out"),
                Relay::boxed("b", &["a_out"], "b_out"),
            ],
        )
        .unwrap();
        assert_eq!(g.execution_order("p").unwrap(), ["a", "b", "c"]);

        let out = g
            .run("p", PipelineInputs::default().with("image", ImageF32::filled(2, 2, 1.0)))
            .unwrap();
        assert_eq!(out.trace.executed, ["a", "b", "c"]);
        assert_eq!(out.values.len(), 3);
        assert!(out.image("c_out").is_some());
        assert!(out.get("image").is_none());
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        let mut g = graph();
        assert!(g.register("empty", Vec::new()).is_err());
        assert!(g
            .register(
                "dup_name",
                vec![Relay::boxed("a", &["image"], "x"), Relay::boxed("a", &["image"], "y")]
            )
            .is_err());
        assert!(g
            .register(
                "dup_output",
                vec![Relay::boxed("a", &["image"], "x"), Relay::boxed("b", &["image"], "x")]
            )
            .is_err());
        let err = g
            .register(
                "cycle",
                vec![Relay::boxed("a", &["y"], "x"), Relay::boxed("b", &["x"], "y")],
            )
            .unwrap_err();
        assert!(matches!(err, ReductionError::Config(_)));
        assert!(g.pipelines().is_empty());
    }

    #[test]
    fn failing_stage_is_named_and_aborts_run() {
        let mut g = graph();
        g.register(
            "p",
            vec![
                Relay::boxed("first", &["image"], "a"),
                Box::new(Relay {
                    name: "broken",
                    inputs: vec![StageInput::required("a")],
                    output: "b",
                    fail: true,
                }),
                Relay::boxed("last", &["b"], "c"),
            ],
        )
        .unwrap();
        let err = g
            .run("p", PipelineInputs::default().with("image", ImageF32::filled(1, 1, 0.0)))
            .unwrap_err();
        match &err {
            ReductionError::Stage { stage, .. } => assert_eq!(stage, "broken"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(err.root_cause(), ReductionError::EmptyMask { .. }));
    }

    #[test]
    fn missing_required_input_names_the_stage() {
        let mut g = graph();
        g.register("p", vec![Relay::boxed("needs_image", &["image"], "out")])
            .unwrap();
        let err = g.run("p", PipelineInputs::default()).unwrap_err();
        assert!(matches!(
            &err,
            ReductionError::Stage { stage, source }
                if stage == "needs_image" && matches!(**source, ReductionError::Config(_))
        ));
    }

    #[test]
    fn bad_config_fails_before_any_stage() {
        let mut g = graph();
        g.register("p", vec![Relay::boxed("a", &["image"], "out")])
            .unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.corrections.polarization_factor = Some(3.0);
        let err = g
            .run("p", PipelineInputs::new(ImageF32::filled(1, 1, 0.0), cfg))
            .unwrap_err();
        assert!(matches!(err, ReductionError::Config(_)));
    }

    #[test]
    fn unknown_pipeline_and_shadowed_outputs_are_config_errors() {
        let mut g = graph();
        assert!(matches!(
            g.run("nope", PipelineInputs::default()),
            Err(ReductionError::Config(_))
        ));
        g.register("p", vec![Relay::boxed("a", &["image"], "out")])
            .unwrap();
        let inputs = PipelineInputs::default()
            .with("image", ImageF32::filled(1, 1, 0.0))
            .with("out", ImageF32::filled(1, 1, 0.0));
        assert!(matches!(g.run("p", inputs), Err(ReductionError::Config(_))));
    }
}
