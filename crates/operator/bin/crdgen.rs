//! Prints the CodeRun and DocsRun CRD manifests to stdout.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds.yaml`

use anyhow::Result;
use kube::CustomResourceExt;

use agentrun_operator::crd::{CodeRun, DocsRun};

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&CodeRun::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&DocsRun::crd())?);
    Ok(())
}
