use std::env;

use client::{OrchestratorConfig, human_size};

pub fn run() {
    let defaults = OrchestratorConfig::default();
    let rows = [
        ("Name", clap::crate_name!().to_string()),
        ("Version", clap::crate_version!().to_string()),
        ("OS", env::consts::OS.to_string()),
        ("Architecture", env::consts::ARCH.to_string()),
        ("Chunk size", human_size(defaults.chunk_size)),
        ("Chunked above", human_size(defaults.chunked_threshold)),
        ("Upload limit", human_size(defaults.max_file_size)),
    ];
    for (name, value) in rows {
        println!("{name:<15}: {value}");
    }
}
