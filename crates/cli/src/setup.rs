//! Settings, contexts and database locations shared by the commands.

use std::fs;
use std::path::{Path, PathBuf};

use sheetsync_config::Settings;
use sheetsync_recon::{Engine, EngineSettings, SyncConfig};
use sheetsync_store::{JobStore, RecordLookup, SqliteRecordRepository};

use crate::{CliError, GlobalOpts};

pub struct Setup {
    pub settings: Settings,
    pub contexts: PathBuf,
    pub database: PathBuf,
}

impl Setup {
    /// Resolve settings, then let command-line paths override them.
    pub fn load(opts: &GlobalOpts) -> Result<Self, CliError> {
        let settings = match &opts.settings {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load(),
        };
        let contexts = opts.contexts.clone().unwrap_or_else(|| settings.contexts_path());
        let database = opts.database.clone().unwrap_or_else(|| settings.database_path());
        log::debug!("contexts {}, database {}", contexts.display(), database.display());
        Ok(Self { settings, contexts, database })
    }

    pub fn sync_config(&self) -> Result<SyncConfig, CliError> {
        SyncConfig::from_file(&self.contexts).map_err(|e| {
            CliError::contexts(e).with_hint(format!(
                "contexts are read from {}; pass --contexts to use another file",
                self.contexts.display()
            ))
        })
    }

    /// Engine over the configured contexts. Reference arguments resolve
    /// against stored records, by id or by the target's first identifier field.
    pub fn engine(&self, config: &SyncConfig) -> Result<Engine, CliError> {
        let registry = config.mapping_registry().map_err(CliError::contexts)?;
        let mut lookup = RecordLookup::open(&self.prepare_database()?)?;
        for (target, target_config) in &config.targets {
            if let Some((field, _)) = target_config.fields.iter().find(|(_, f)| f.identifier) {
                lookup = lookup.with_key(target.as_str(), field.as_str());
            }
        }
        Ok(Engine::new(config.context_registry(), registry)
            .with_resolver(lookup)
            .with_settings(EngineSettings {
                records_per_flush: self.settings.records_per_flush,
            }))
    }

    pub fn jobs(&self) -> Result<JobStore, CliError> {
        Ok(JobStore::open(&self.prepare_database()?)?)
    }

    pub fn repository(&self, target: &str) -> Result<SqliteRecordRepository, CliError> {
        Ok(SqliteRecordRepository::open(&self.prepare_database()?, target)?)
    }

    fn prepare_database(&self) -> Result<&Path, CliError> {
        if let Some(parent) = self.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CliError::io(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        Ok(&self.database)
    }
}
