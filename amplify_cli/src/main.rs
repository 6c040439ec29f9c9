mod codec;

use std::path::PathBuf;
use std::process::ExitCode;

use amplify::{amplify, AmplifyConfig, DictionarySet, UpsampleFactor};
use anyhow::{bail, Context, Result};
use tracing::{error, info};

const USAGE: &str =
    "Usage: terrain_amplify <heightmap> <selection hint> <output> <factor: 2|4|8> <dictionary>...";

#[derive(Debug)]
struct Args {
    heightmap: PathBuf,
    hint: PathBuf,
    output: PathBuf,
    factor: UpsampleFactor,
    dictionaries: Vec<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    if args.len() < 5 {
        bail!("Expected at least 5 arguments, got {}", args.len());
    }
    let factor: u32 = args[3]
        .parse()
        .with_context(|| format!("Invalid upsample factor '{}'", args[3]))?;

    Ok(Args {
        heightmap: PathBuf::from(&args[0]),
        hint: PathBuf::from(&args[1]),
        output: PathBuf::from(&args[2]),
        factor: UpsampleFactor::try_from(factor)?,
        dictionaries: args[4..].iter().map(PathBuf::from).collect(),
    })
}

fn run(args: &Args) -> Result<()> {
    let dictionaries =
        DictionarySet::load(&args.dictionaries, args.factor).context("Failed to load dictionaries")?;
    let terrain = codec::load_heightmap(&args.heightmap)?;
    let hint = codec::load_hint(&args.hint)?;
    info!(
        rows = terrain.rows(),
        columns = terrain.columns(),
        factor = %args.factor,
        "Amplifying {}",
        args.heightmap.display()
    );

    let amplified = amplify(&terrain, &hint, &dictionaries, &AmplifyConfig::default())
        .context("Amplification failed")?;
    codec::save_heightmap(&amplified.to_u16(), &args.output)?;
    info!("Wrote {}", args.output.display());
    Ok(())
}

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e:#}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = common::log_setup::setup_logging("info") {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
