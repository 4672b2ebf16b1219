//! Print the Postgres CustomResourceDefinition as YAML
//!
//! `cargo run --bin crdgen > deploy/crd.yaml`

use kube::CustomResourceExt;
use postgres_controller::crd::Postgres;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Postgres::crd())?);
    Ok(())
}
