//! # CRD Generator
//!
//! Prints the DynaKube CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/dynakube.yaml
//! cargo run --bin crdgen -- --output config/crd/dynakube.yaml
//! ```

use clap::Parser;
use dynakube_operator::crd::DynaKube;
use kube::CustomResourceExt;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Generate the DynaKube CRD YAML")]
struct Args {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let yaml = serde_yaml::to_string(&DynaKube::crd())?;
    match args.output {
        Some(path) => std::fs::write(&path, yaml)?,
        None => print!("{yaml}"),
    }
    Ok(())
}
