//! CLI entry point: wires the five `cache-*` crates into the full
//! build-then-place-then-pack-then-emit pipeline and writes the result as
//! JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cache_graph::InputDylib;

/// Default packing seed; overridable for reproducing a specific run.
const DEFAULT_PACK_SEED: u64 = 0x0B5E_57ED;

#[derive(Debug, Parser)]
#[command(name = "imp-cache-optimizer", about = "Builds per-class IMP caches from a pre-linked class graph")]
struct Args {
    /// Path to the input dylib/class/category graph (JSON array of dylibs).
    #[arg(long)]
    input: PathBuf,

    /// Path to the optimizer configuration document.
    #[arg(long)]
    config: PathBuf,

    /// Path to write the emitted cache document to.
    #[arg(long)]
    output: PathBuf,

    /// Optional log file; logs go to stderr when omitted.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seed for Phase 2's randomized relocation search.
    #[arg(long, default_value_t = DEFAULT_PACK_SEED)]
    pack_seed: u64,
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(target: "runtime.panic", "{info}");
        default_hook(info);
    }));
}

/// Configure logging the way a long-lived CLI tool does: either a rolling
/// file appender (never-rotate, since each run is one process) or stderr,
/// gated by `RUST_LOG`.
fn configure_logging(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_default();
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .ok();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .try_init()
                .ok();
            None
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = cache_config::load_from_path(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let input_text = fs::read_to_string(&args.input)
        .with_context(|| format!("reading input graph from {}", args.input.display()))?;
    let dylibs: Vec<InputDylib> = serde_json::from_str(&input_text)
        .with_context(|| format!("parsing input graph {}", args.input.display()))?;

    let output = cache_bin::run_pipeline(&dylibs, &config, args.pack_seed)
        .context("running optimizer pipeline")?;

    tracing::info!(
        target: "runtime",
        classes_emitted = output.caches.len(),
        warnings = output.diagnostics.warning_count(),
        selector_space_end = output.holes.end_address,
        "pipeline_complete"
    );

    let mut selectors: Vec<_> = output
        .graph
        .selectors
        .iter()
        .filter(|(_, s)| s.is_live())
        .filter_map(|(_, s)| {
            s.offset.map(|offset| {
                serde_json::json!({ "name": &*s.name, "offset": offset, "size": s.size })
            })
        })
        .collect();
    selectors.sort_by_key(|v| v["offset"].as_u64().unwrap_or(0));

    let holes: Vec<_> = output
        .holes
        .holes()
        .iter()
        .map(|h| serde_json::json!({ "start": h.start, "end": h.end }))
        .collect();

    let output_doc = serde_json::json!({
        "caches": output.caches.into_iter().map(|(locator, cache)| {
            serde_json::json!({
                "installName": locator.install_name,
                "className": locator.class_name,
                "isMetaclass": locator.is_metaclass,
                "cache": cache,
            })
        }).collect::<Vec<_>>(),
        "selectors": selectors,
        "holes": holes,
        "selectorSpaceEnd": output.holes.end_address,
        "warnings": output.diagnostics.warnings.iter().map(|w| serde_json::json!({
            "target": w.target,
            "message": w.message,
        })).collect::<Vec<_>>(),
    });

    fs::write(
        &args.output,
        serde_json::to_string_pretty(&output_doc).context("serializing output document")?,
    )
    .with_context(|| format!("writing output to {}", args.output.display()))?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = configure_logging(args.log_file.as_ref());
    install_panic_hook();

    if let Err(err) = run(&args) {
        tracing::error!(target: "runtime", "{err:#}");
        return Err(err);
    }
    Ok(())
}
