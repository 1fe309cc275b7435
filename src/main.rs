//! segment-shipper: convert finished segments and ship them to storage.
//!
//! ```text
//! segment-shipper <base-dir> <segment-file>...
//! ```
//!
//! Configuration is read from the TOML file named by `SHIPPER_CONFIG`, or
//! defaults when unset. One JSON line is printed per shipped segment.

use segment_shipper::observability::init_tracing;
use segment_shipper::{
    exit_cleanup, CleanupOnExit, ConversionPipeline, LogFilePath, Registry, ScopedCompletionHandle,
    ShipperConfig, UploadReceipt,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

const USAGE: &str = "usage: segment-shipper <base-dir> <segment-file>...";

fn load_config() -> Result<ShipperConfig, Box<dyn Error + Send + Sync>> {
    match std::env::var_os("SHIPPER_CONFIG") {
        Some(path) => Ok(ShipperConfig::from_file(Path::new(&path))?),
        None => Ok(ShipperConfig::default()),
    }
}

fn main() -> Result<ExitCode, Box<dyn Error + Send + Sync>> {
    let mut args = std::env::args_os().skip(1);
    let base_dir = match args.next() {
        Some(dir) => PathBuf::from(dir),
        None => {
            eprintln!("{}", USAGE);
            return Ok(ExitCode::from(2));
        }
    };
    let files: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if files.is_empty() {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    }

    let config = load_config()?;
    init_tracing(&config.logging)?;

    // Converted files still on disk when main returns are removed
    let _cleanup = CleanupOnExit;

    // Uploads run on this runtime; waiting happens on the main thread,
    // which is never inside the runtime context.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shipper-upload")
        .build()?;

    runtime.spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, removing converted files");
            exit_cleanup().run();
            std::process::exit(130);
        }
    });

    let pipeline = ConversionPipeline::from_config(&config, &Registry::with_builtins(), runtime.handle())?;
    info!(?pipeline, segments = files.len(), "shipping segments");

    let mut failures = 0usize;
    let mut pending: Vec<(LogFilePath, ScopedCompletionHandle<UploadReceipt>)> = Vec::new();

    for file in &files {
        let source = match LogFilePath::parse(&base_dir, file) {
            Ok(source) => source,
            Err(e) => {
                error!(file = %file.display(), error = %e, "not a segment path");
                failures += 1;
                continue;
            }
        };
        match pipeline.convert_and_upload(&source) {
            Ok(handle) => pending.push((source, handle)),
            Err(e) => {
                error!(source = %source, error = %e, "conversion failed");
                failures += 1;
            }
        }
    }

    for (source, handle) in pending {
        let converted = handle.converted_path().clone();
        let records_copied = handle.records_copied();
        match handle.wait() {
            Ok(receipt) => {
                let line = serde_json::json!({
                    "source": source.data_path(),
                    "converted": converted.data_path(),
                    "records_copied": records_copied,
                    "receipt": receipt,
                });
                println!("{}", line);
            }
            Err(e) => {
                error!(source = %source, retained = %converted, error = %e, "upload failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        warn!(failures, "some segments were not shipped");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
