//! Name-keyed registry of loaded LoRA adapters.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use candle_core::{Device, Tensor};

use super::adapter::{Adapter, SlotBinding};
use super::config::AdapterListConfig;
use super::error::{LoraError, Result};

/// Adapters keyed by name. Ordered so slot bindings come out in a stable order.
pub type AdapterMap = BTreeMap<String, Adapter>;

/// Manages the adapters attached to one loaded base model.
///
/// Provides:
/// - Bulk loading from a declarative adapter list
/// - Single adapter load/unload by name
/// - Activation and caller-supplied parameters
/// - Slot binding for the model's device
///
/// Every mutator either fully succeeds or leaves the registry as it was.
/// The registry is not internally synchronized; mutation requires `&mut self`.
#[derive(Debug)]
pub struct AdapterRegistry {
    /// Loaded adapters by name.
    adapters: AdapterMap,
    /// Device the base model runs on.
    device: Device,
}

impl AdapterRegistry {
    /// Create an empty registry for a model running on `device`.
    pub fn new(device: Device) -> Self {
        Self {
            adapters: AdapterMap::new(),
            device,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Load every adapter declared in `config`, resolving files against
    /// `base_path`, and add them to the registry.
    ///
    /// Names are checked against each other and against the registry before
    /// any file is read. Nothing is added unless every adapter loads.
    pub fn load_from_config(
        &mut self,
        base_path: impl AsRef<Path>,
        config: &AdapterListConfig,
    ) -> Result<()> {
        let batch = self.build_batch(base_path.as_ref(), config, true)?;
        let added = batch.len();
        self.adapters.extend(batch);

        tracing::info!(added, total = self.adapters.len(), "loaded lora adapters from config");
        Ok(())
    }

    /// Load the adapters declared in `config` and make them the entire
    /// registry contents in one step, returning the previous set.
    pub fn replace_from_config(
        &mut self,
        base_path: impl AsRef<Path>,
        config: &AdapterListConfig,
    ) -> Result<AdapterMap> {
        let batch = self.build_batch(base_path.as_ref(), config, false)?;
        Ok(self.swap(batch))
    }

    /// Replace the whole adapter set, returning the previous one.
    pub fn swap(&mut self, adapters: AdapterMap) -> AdapterMap {
        let previous = std::mem::replace(&mut self.adapters, adapters);
        tracing::info!(
            loaded = self.adapters.len(),
            released = previous.len(),
            "swapped lora adapter set"
        );
        previous
    }

    fn build_batch(
        &self,
        base_path: &Path,
        config: &AdapterListConfig,
        check_registered: bool,
    ) -> Result<AdapterMap> {
        let mut names = HashSet::with_capacity(config.len());
        for entry in config.entries() {
            let registered = check_registered && self.adapters.contains_key(&entry.name);
            if registered || !names.insert(entry.name.as_str()) {
                return Err(LoraError::DuplicateAdapterName(entry.name.clone()));
            }
        }

        let mut batch = AdapterMap::new();
        for entry in config.entries() {
            let mut adapter = Adapter::default();
            adapter.set_name(entry.name.as_str());
            adapter.load_parameters_from_file(base_path.join(&entry.file))?;
            batch.insert(entry.name.clone(), adapter);
        }
        Ok(batch)
    }

    /// Load a single adapter from `path` under `name`.
    pub fn load(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let name = name.into();
        if self.adapters.contains_key(&name) {
            return Err(LoraError::DuplicateAdapterName(name));
        }

        let mut adapter = Adapter::new(name.as_str());
        adapter.load_parameters_from_file(path)?;
        self.adapters.insert(name, adapter);
        Ok(())
    }

    /// Remove an adapter and release its tensors.
    pub fn unload(&mut self, name: &str) -> Result<()> {
        let adapter = self
            .adapters
            .remove(name)
            .ok_or_else(|| LoraError::UnknownAdapter(name.to_string()))?;

        tracing::info!(
            adapter = name,
            parameters = adapter.len(),
            "unloaded lora adapter"
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Adapter> {
        self.adapters
            .get(name)
            .ok_or_else(|| LoraError::UnknownAdapter(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Adapter> {
        self.adapters
            .get_mut(name)
            .ok_or_else(|| LoraError::UnknownAdapter(name.to_string()))
    }

    /// Check if an adapter is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Loaded adapter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Adapter> {
        self.adapters.values()
    }

    /// Number of loaded adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn activate(&mut self, name: &str) -> Result<()> {
        self.get_mut(name)?.activate();
        tracing::debug!(adapter = name, "activated lora adapter");
        Ok(())
    }

    pub fn deactivate(&mut self, name: &str) -> Result<()> {
        self.get_mut(name)?.deactivate();
        tracing::debug!(adapter = name, "deactivated lora adapter");
        Ok(())
    }

    /// Hand a caller-owned tensor to one parameter of a registered adapter.
    pub fn supply_parameter(
        &mut self,
        adapter: &str,
        parameter: &str,
        tensor: Tensor,
    ) -> Result<()> {
        self.get_mut(adapter)?.supply_parameter(parameter, tensor)
    }

    /// Bind every slot of every adapter, in adapter-name order, for the
    /// registry's device.
    pub fn bind_slots(&self) -> Result<Vec<SlotBinding>> {
        let mut bindings = Vec::new();
        for adapter in self.adapters.values() {
            bindings.extend(adapter.bind(&self.device)?);
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::format::{AdapterFileWriter, ElementType};
    use candle_core::DType;
    use std::path::PathBuf;

    fn write_adapter(dir: &Path, file: &str, params: &[&str]) -> PathBuf {
        write_adapter_with_shape(dir, file, params, (4, 8))
    }

    fn write_adapter_with_shape(
        dir: &Path,
        file: &str,
        params: &[&str],
        shape: (usize, usize),
    ) -> PathBuf {
        let mut writer = AdapterFileWriter::new();
        for name in params {
            let tensor = Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap();
            writer.push_tensor(*name, &tensor).unwrap();
        }
        let path = dir.join(file);
        writer.write_to(&path).unwrap();
        path
    }

    fn test_registry() -> AdapterRegistry {
        AdapterRegistry::new(Device::Cpu)
    }

    #[test]
    fn registry_creation() {
        let registry = test_registry();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
        assert!(!registry.contains("anything"));
        assert!(registry.device().is_cpu());
    }

    #[test]
    fn load_from_config_loads_every_adapter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_adapter(dir.path(), "sql.gail", &["q.A", "q.B"]);
        write_adapter(dir.path(), "nested/code.gail", &["v.A"]);

        let config =
            AdapterListConfig::from_entries([("sql", "sql.gail"), ("code", "nested/code.gail")]);
        let mut registry = test_registry();
        registry.load_from_config(dir.path(), &config).unwrap();

        assert_eq!(registry.names(), vec!["code", "sql"]);
        let sql = registry.get("sql").unwrap();
        assert_eq!(sql.name(), "sql");
        assert_eq!(sql.len(), 2);
        assert_eq!(registry.get("code").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_in_batch_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        // Neither file exists: the name check must fire first.
        let config = AdapterListConfig::from_entries([("a", "one.gail"), ("a", "two.gail")]);
        let mut registry = test_registry();

        match registry.load_from_config(dir.path(), &config).unwrap_err() {
            LoraError::DuplicateAdapterName(name) => assert_eq!(name, "a"),
            other => panic!("expected DuplicateAdapterName, got: {other}"),
        }
        assert!(matches!(
            registry.get("a"),
            Err(LoraError::UnknownAdapter(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn collision_with_registered_name_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_adapter(dir.path(), "a.gail", &["x"]);
        write_adapter(dir.path(), "b.gail", &["y"]);

        let mut registry = test_registry();
        registry.load("a", &original).unwrap();

        let config = AdapterListConfig::from_entries([("b", "b.gail"), ("a", "missing.gail")]);
        assert!(matches!(
            registry.load_from_config(dir.path(), &config),
            Err(LoraError::DuplicateAdapterName(_))
        ));
        assert_eq!(registry.names(), vec!["a"]);
        assert_eq!(registry.get("a").unwrap().source(), Some(original.as_path()));
    }

    #[test]
    fn failed_file_in_batch_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_adapter(dir.path(), "good.gail", &["x"]);
        let mut writer = AdapterFileWriter::new();
        writer.push_raw("bias", ElementType::F32, &[2], vec![0; 8]).unwrap();
        writer.write_to(dir.path().join("bad.gail")).unwrap();

        let config = AdapterListConfig::from_entries([("good", "good.gail"), ("bad", "bad.gail")]);
        let mut registry = test_registry();
        assert!(matches!(
            registry.load_from_config(dir.path(), &config),
            Err(LoraError::InvalidShape { .. })
        ));
        assert!(registry.is_empty());

        // Still usable afterwards.
        let config = AdapterListConfig::from_entries([("good", "good.gail")]);
        registry.load_from_config(dir.path(), &config).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replace_from_config_swaps_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        write_adapter(dir.path(), "a.gail", &["x"]);
        write_adapter(dir.path(), "b.gail", &["y"]);

        let mut registry = test_registry();
        registry
            .load_from_config(dir.path(), &AdapterListConfig::from_entries([("a", "a.gail")]))
            .unwrap();

        // Reusing a registered name is fine when the whole set is replaced.
        let config = AdapterListConfig::from_entries([("a", "b.gail"), ("b", "b.gail")]);
        let previous = registry.replace_from_config(dir.path(), &config).unwrap();

        assert_eq!(previous.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(
            registry.get("a").unwrap().parameters().next().unwrap().0,
            "y"
        );
    }

    #[test]
    fn replace_from_config_failure_keeps_current_set() {
        let dir = tempfile::tempdir().unwrap();
        write_adapter(dir.path(), "a.gail", &["x"]);
        let mut registry = test_registry();
        registry.load("a", dir.path().join("a.gail")).unwrap();

        let config = AdapterListConfig::from_entries([("b", "missing.gail")]);
        assert!(matches!(
            registry.replace_from_config(dir.path(), &config),
            Err(LoraError::Io { .. })
        ));
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[test]
    fn swap_returns_previous_set() {
        let mut registry = test_registry();
        let mut incoming = AdapterMap::new();
        incoming.insert("x".to_string(), Adapter::new("x"));

        let previous = registry.swap(incoming);
        assert!(previous.is_empty());
        assert!(registry.contains("x"));

        let previous = registry.swap(AdapterMap::new());
        assert_eq!(previous.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn load_duplicate_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_adapter(dir.path(), "a.gail", &["x"]);
        let mut registry = test_registry();
        registry.load("a", &path).unwrap();

        match registry.load("a", dir.path().join("missing.gail")).unwrap_err() {
            LoraError::DuplicateAdapterName(name) => assert_eq!(name, "a"),
            other => panic!("expected DuplicateAdapterName, got: {other}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_load_does_not_register() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = test_registry();
        assert!(matches!(
            registry.load("a", dir.path().join("missing.gail")),
            Err(LoraError::Io { .. })
        ));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn unload_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_adapter(dir.path(), "a.gail", &["x"]);
        let mut registry = test_registry();

        assert!(matches!(
            registry.unload("never"),
            Err(LoraError::UnknownAdapter(_))
        ));

        registry.load("a", &path).unwrap();
        registry.unload("a").unwrap();
        assert!(matches!(registry.get("a"), Err(LoraError::UnknownAdapter(_))));
        assert!(matches!(registry.unload("a"), Err(LoraError::UnknownAdapter(_))));

        // The name is free again.
        registry.load("a", &path).unwrap();
        assert!(registry.contains("a"));
    }

    #[test]
    fn activation_and_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_adapter_with_shape(dir.path(), "a.gail", &["a.A", "a.B"], (4, 8));
        let b = write_adapter_with_shape(dir.path(), "b.gail", &["b.A"], (4, 8));
        let c = write_adapter_with_shape(dir.path(), "c.gail", &["c.B"], (8, 4));
        let mut registry = test_registry();
        registry.load("c", &c).unwrap();
        registry.load("b", &b).unwrap();
        registry.load("a", &a).unwrap();

        registry.activate("b").unwrap();
        let bindings = registry.bind_slots().unwrap();
        let summary: Vec<_> = bindings
            .iter()
            .map(|s| (s.adapter.as_str(), s.parameter.as_str(), s.active))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", "a.A", false),
                ("a", "a.B", false),
                ("b", "b.A", true),
                ("c", "c.B", false)
            ]
        );
        // The smaller of the last two dimensions is zeroed.
        assert_eq!(bindings[0].tensor.dims(), &[0, 8]);
        assert_eq!(bindings[1].tensor.dims(), &[0, 8]);
        assert_eq!(bindings[2].tensor.dims(), &[4, 8]);
        assert_eq!(bindings[3].tensor.dims(), &[8, 0]);

        registry.deactivate("b").unwrap();
        assert!(registry.bind_slots().unwrap().iter().all(|s| !s.active));

        assert!(matches!(
            registry.activate("missing"),
            Err(LoraError::UnknownAdapter(_))
        ));
    }

    #[test]
    fn supply_parameter_through_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_adapter(dir.path(), "a.gail", &["x"]);
        let mut registry = test_registry();
        registry.load("a", &path).unwrap();

        let mine = Tensor::zeros((4, 8), DType::F32, &Device::Cpu).unwrap();
        registry.supply_parameter("a", "x", mine.clone()).unwrap();
        assert_eq!(
            registry.get("a").unwrap().parameter("x").unwrap().tensor().id(),
            mine.id()
        );

        assert!(matches!(
            registry.supply_parameter("a", "y", mine.clone()),
            Err(LoraError::UnknownParameter { .. })
        ));
        assert!(matches!(
            registry.supply_parameter("b", "x", mine),
            Err(LoraError::UnknownAdapter(_))
        ));
    }
}
