//! `procura check-query` — Run a query through the validator without a database.

use std::path::Path;

use procura_engine::query::{Verdict, normalize, validate};

pub fn run(config_path: Option<&Path>, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let normalized = normalize(query, config.query.default_limit);

    println!("{normalized}");
    println!();
    match validate(&normalized) {
        Verdict::Safe => {
            println!("  ✅ Safe");
            Ok(())
        }
        verdict => {
            println!("  ❌ {verdict}");
            Err(format!("Query rejected: {}", verdict.reason().unwrap_or("unknown")).into())
        }
    }
}
