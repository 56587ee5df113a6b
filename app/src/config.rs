use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use serde::{Deserialize, Serialize};

use infra::persistence::DocumentConnectionManager;

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct Config {
    pub db: StoreConfig,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    pub(crate) fn build(&self) -> Result<Pool<DocumentConnectionManager>> {
        debug!("Build pool from {:?}", self);

        let db = sled::open(&self.path)
            .with_context(|| format!("open store at {:?}", self.path))?;

        let builder = r2d2::Pool::builder();
        debug!("Pool builder: {:?}", builder);
        let pool = builder
            .build(DocumentConnectionManager::new(db))
            .context("build pool")?;

        Ok(pool)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct EnvLogger {
    level: Option<LogLevel>,
    #[serde(default)]
    modules: HashMap<String, LogLevel>,
    #[serde(default)]
    timestamp_nanos: bool,
}

impl EnvLogger {
    pub fn builder(&self) -> env_logger::Builder {
        let mut b = env_logger::Builder::from_default_env();
        if let Some(level) = self.level.as_ref() {
            b.filter_level(level.to_filter());
        }

        for (module, level) in self.modules.iter() {
            b.filter_module(module, level.to_filter());
        }

        if self.timestamp_nanos {
            b.format_timestamp_nanos();
        }

        b
    }
}
