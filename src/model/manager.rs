use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::Serialize;
use strum_macros::Display;

use super::DataModel;
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    Waiting,
    InProgress,
    Done,
    PartialSuccess,
    Broken,
}

impl ModelState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModelState::Done | ModelState::PartialSuccess | ModelState::Broken
        )
    }
}

/// One import snapshot. All entities of the snapshot live in its `DataModel`.
#[derive(Debug)]
pub struct Model {
    handle: String,
    name: String,
    state: ModelState,
    message: String,
    warnings: Vec<String>,
    created_at: SystemTime,
    watchdog_timer: SystemTime,
    data: DataModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub handle: String,
    pub name: String,
    pub state: ModelState,
    pub message: String,
    pub warnings: Vec<String>,
    pub created_at: u64,
    pub watchdog_timer: u64,
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Model {
    fn new(handle: String, name: &str) -> Self {
        let now = SystemTime::now();
        Self {
            handle,
            name: name.to_owned(),
            state: ModelState::Waiting,
            message: String::new(),
            warnings: vec![],
            created_at: now,
            watchdog_timer: now,
            data: DataModel::default(),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn watchdog_timer(&self) -> SystemTime {
        self.watchdog_timer
    }

    pub fn data(&self) -> &DataModel {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataModel {
        &mut self.data
    }

    fn transition(&mut self, to: ModelState) -> Result<(), ModelError> {
        log::debug!("Model {}: {} -> {}", self.handle, self.state, to);
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: ModelState) -> Result<(), ModelError> {
        Err(ModelError::InvalidStateTransition {
            from: self.state,
            to,
        })
    }

    pub fn set_in_progress(&mut self) -> Result<(), ModelError> {
        if self.state != ModelState::Waiting {
            return self.invalid(ModelState::InProgress);
        }
        self.kick_watchdog();
        self.transition(ModelState::InProgress)
    }

    /// Finishes the import; recorded warnings make it a partial success.
    pub fn set_done(&mut self, message: &str) -> Result<(), ModelError> {
        let to = if self.warnings.is_empty() {
            ModelState::Done
        } else {
            ModelState::PartialSuccess
        };
        if self.state != ModelState::InProgress {
            return self.invalid(to);
        }
        self.message = message.to_owned();
        self.transition(to)
    }

    pub fn set_error(&mut self, message: &str) -> Result<(), ModelError> {
        if self.state.is_terminal() {
            return self.invalid(ModelState::Broken);
        }
        log::error!("Model {} broken: {}", self.handle, message);
        self.message = message.to_owned();
        self.transition(ModelState::Broken)
    }

    pub fn kick_watchdog(&mut self) {
        self.watchdog_timer = SystemTime::now();
    }

    pub fn add_warning(&mut self, warning: &str) {
        log::warn!("Model {}: {}", self.handle, warning);
        self.warnings.push(warning.to_owned());
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            handle: self.handle.clone(),
            name: self.name.clone(),
            state: self.state,
            message: self.message.clone(),
            warnings: self.warnings.clone(),
            created_at: epoch_secs(self.created_at),
            watchdog_timer: epoch_secs(self.watchdog_timer),
        }
    }
}

/// Registry of models keyed by handle.
#[derive(Debug, Default)]
pub struct ModelManager {
    models: IndexMap<String, Model>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty model in the WAITING state and returns its handle.
    pub fn create(&mut self, name: &str) -> String {
        let handle = uuid::Uuid::new_v4().simple().to_string();
        log::info!("Created model `{}` with handle {}", name, handle);
        self.models
            .insert(handle.clone(), Model::new(handle.clone(), name));
        handle
    }

    pub fn get(&self, handle: &str) -> Result<&Model, ModelError> {
        self.models
            .get(handle)
            .ok_or_else(|| ModelError::UnknownModel(handle.to_owned()))
    }

    pub fn get_mut(&mut self, handle: &str) -> Result<&mut Model, ModelError> {
        self.models
            .get_mut(handle)
            .ok_or_else(|| ModelError::UnknownModel(handle.to_owned()))
    }

    pub fn delete(&mut self, handle: &str) -> Result<Model, ModelError> {
        self.models
            .shift_remove(handle)
            .ok_or_else(|| ModelError::UnknownModel(handle.to_owned()))
    }

    pub fn models(&self) -> Vec<ModelSummary> {
        self.models.values().map(Model::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut manager = ModelManager::new();
        let handle = manager.create("snapshot");
        assert_eq!(handle.len(), 32);

        let model = manager.get_mut(&handle).unwrap();
        assert_eq!(model.state(), ModelState::Waiting);
        assert!(model.set_done("too early").is_err());
        model.set_in_progress().unwrap();
        model.add_warning("role without permissions");
        model.set_done("imported").unwrap();
        assert_eq!(model.state(), ModelState::PartialSuccess);
        assert_eq!(
            model.set_error("late"),
            Err(ModelError::InvalidStateTransition {
                from: ModelState::PartialSuccess,
                to: ModelState::Broken
            })
        );

        assert_eq!(manager.models().len(), 1);
        manager.delete(&handle).unwrap();
        assert!(matches!(
            manager.get(&handle),
            Err(ModelError::UnknownModel(_))
        ));
    }

    #[test]
    fn error_from_waiting() {
        let mut manager = ModelManager::new();
        let handle = manager.create("broken");
        let model = manager.get_mut(&handle).unwrap();
        model.set_error("crawl failed").unwrap();
        assert_eq!(model.state(), ModelState::Broken);
        assert_eq!(model.message(), "crawl failed");
    }
}
