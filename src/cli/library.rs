//! `plume hash`, `files` and `data-dir`.

use anyhow::Result;
use console::style;

use crate::config::HostConfig;
use crate::extensions::hash::hash_library_key_with;
use crate::extensions::{fs, ListOptions};

pub fn run_hash(config: &HostConfig, root: &str) {
    println!("{}", hash_library_key_with(config.library.key_hasher, root));
}

pub fn run_files(config: &HostConfig, root: &str, options: ListOptions) -> Result<()> {
    let files = fs::list_library_files(
        root,
        &options,
        &config.library.default_extensions,
        config.library.max_depth,
    )?;
    for file in &files {
        println!("{}", file.relative);
    }
    eprintln!("{} {} files", style("→").cyan(), files.len());
    Ok(())
}

pub fn run_data_dir(config: &HostConfig, id: &str, root: &str) -> Result<()> {
    let dir = fs::plugin_data_dir(
        &config.plugin_data_root(),
        id,
        root,
        config.library.key_hasher,
    )?;
    println!("{}", dir.display());
    Ok(())
}
