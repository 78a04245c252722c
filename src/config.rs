// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Cluster settings, read from a TOML file and `OBLIV_` environment variables.

use crate::{bounds::SizeBounds, Result, TableError};
use config::{Config, Environment, File, FileFormat};
use log::LevelFilter;
use serde::Deserialize;
use std::{path::Path, path::PathBuf, str::FromStr};

fn default_num_partitions() -> usize {
    4
}

fn default_sigma() -> f64 {
    crate::bounds::DEFAULT_SIGMA
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_num_partitions")]
    pub num_partitions: usize,
    /// Statistical security parameter; bucket overflow probability is about `2^-sigma`.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Whether partitions run in worker processes.
    #[serde(default)]
    pub distributed: bool,
    /// `host:port` of each worker, indexed by partition.
    #[serde(default)]
    pub workers: Vec<String>,
    /// Spill directory for slots. Slots stay in memory when unset.
    #[serde(default)]
    pub slot_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_partitions: default_num_partitions(),
            sigma: default_sigma(),
            distributed: false,
            workers: Vec::new(),
            slot_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl ClusterConfig {
    /// Merges the optional TOML file at `path` with the environment, e.g.
    /// `OBLIV_NUM_PARTITIONS=8` or `OBLIV_WORKERS=host1:7000,host2:7000`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix("OBLIV")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("workers"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text; no environment overrides.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(TableError::InvalidConfig("num_partitions must be positive".into()));
        }
        if !(self.sigma > 0.0) {
            return Err(TableError::InvalidConfig(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if self.distributed && self.workers.len() != self.num_partitions {
            return Err(TableError::InvalidConfig(format!(
                "{} workers listed for {} partitions",
                self.workers.len(),
                self.num_partitions
            )));
        }
        self.log_level_filter()?;
        Ok(())
    }

    pub fn bounds(&self) -> SizeBounds {
        SizeBounds::from_sigma(self.sigma)
    }

    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level).map_err(|_| {
            TableError::InvalidConfig(format!("unknown log level {:?}", self.log_level))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = ClusterConfig::from_toml("sigma = 20.0").unwrap();
        assert_eq!(config.num_partitions, 4);
        assert_eq!(config.sigma, 20.0);
        assert!(!config.distributed);
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Info);
        assert_eq!(
            ClusterConfig::from_toml("").unwrap(),
            ClusterConfig::default()
        );
    }

    #[test]
    fn reads_toml_files() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
num_partitions = 2
distributed = true
workers = ["127.0.0.1:7000", "127.0.0.1:7001"]
slot_dir = "/tmp/slots"
log_level = "debug"
"#
        )
        .unwrap();
        let config = ClusterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.num_partitions, 2);
        assert_eq!(config.workers[1], "127.0.0.1:7001");
        assert_eq!(config.slot_dir, Some(PathBuf::from("/tmp/slots")));
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn rejects_inconsistent_settings() {
        assert!(ClusterConfig::from_toml("num_partitions = 0").is_err());
        assert!(ClusterConfig::from_toml("sigma = -1.0").is_err());
        assert!(ClusterConfig::from_toml("log_level = \"loud\"").is_err());
        assert!(ClusterConfig::from_toml(
            "num_partitions = 3\ndistributed = true\nworkers = [\"a:1\"]"
        )
        .is_err());
    }

    #[test]
    fn sigma_sets_the_bounds() {
        let loose = ClusterConfig::from_toml("sigma = 10.0").unwrap().bounds();
        let tight = ClusterConfig::default().bounds();
        assert!(loose.get_size_bound(1000, 4) < tight.get_size_bound(1000, 4));
    }
}
