//! `KEY=VALUE` environment files.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use phala_crypto::EnvVar;

/// Parse an env file without touching the process environment.
pub fn read_env_file(path: &Path) -> Result<Vec<EnvVar>> {
    let iter = dotenvy::from_path_iter(path).with_context(|| format!("cannot open env file {}", path.display()))?;
    collect(iter).with_context(|| format!("invalid env file {}", path.display()))
}

pub fn parse_env<R: Read>(reader: R) -> Result<Vec<EnvVar>> {
    collect(dotenvy::from_read_iter(reader))
}

fn collect<I>(iter: I) -> Result<Vec<EnvVar>>
where
    I: Iterator<Item = dotenvy::Result<(String, String)>>,
{
    let mut envs: Vec<EnvVar> = Vec::new();
    for item in iter {
        let (key, value) = item?;
        // Later assignments win, as in a shell.
        match envs.iter_mut().find(|e| e.key == key) {
            Some(existing) => existing.value = value,
            None => envs.push(EnvVar::new(key, value)),
        }
    }
    Ok(envs)
}
