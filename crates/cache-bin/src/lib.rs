//! Pipeline orchestration shared between the CLI binary and integration
//! tests: load configuration and graph input, run both solver phases, then
//! emit.

use std::collections::HashMap;

use cache_config::OptimizerConfig;
use cache_emit::ImpCache;
use cache_graph::{Graph, InputDylib};
use cache_model::{ClassId, ClassLocator, Diagnostics, OptimizerError};
use cache_solver::HoleMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct PipelineOutput {
    pub graph: Graph,
    pub order: Vec<ClassId>,
    pub holes: HoleMap,
    pub caches: HashMap<ClassLocator, ImpCache>,
    pub diagnostics: Diagnostics,
}

/// Run the full graph-build / place / pack / emit pipeline in one call.
pub fn run_pipeline(
    dylibs: &[InputDylib],
    config: &OptimizerConfig,
    pack_seed: u64,
) -> Result<PipelineOutput, OptimizerError> {
    let mut diagnostics = Diagnostics::new();

    let (mut graph, mut order) = cache_graph::build_graph(dylibs, config, &mut diagnostics)?;

    cache_solver::solve_placement(&mut graph, &order, &mut diagnostics);

    let mut pack_rng = StdRng::seed_from_u64(pack_seed);
    cache_solver::pack_address_space(&mut graph, &mut order, &mut pack_rng, &mut diagnostics);

    let holes = cache_solver::extract_holes(&mut graph, &order);
    let caches = cache_emit::emit_all(&graph, &order, &mut diagnostics);

    Ok(PipelineOutput {
        graph,
        order,
        holes,
        caches,
        diagnostics,
    })
}
