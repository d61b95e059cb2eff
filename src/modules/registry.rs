//! Реестр пространств имён.
//!
//! Каждое пространство имён хранит зарегистрированные модули (по имени
//! бандла, `name[@version]`) и записи о модулях в процессе загрузки.
//! Модули без пространства имён живут в отдельном глобальном.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::spec::ModuleSpec;

/// Экспорты модуля. Клон разделяет один и тот же объект.
#[derive(Clone)]
pub struct ModuleExports(Arc<dyn Any + Send + Sync>);

impl ModuleExports {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Пустой объект экспортов (`{}`).
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Тот же самый объект, а не равный ему.
    pub fn ptr_eq(&self, other: &ModuleExports) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.downcast_ref::<serde_json::Value>() {
            Some(value) => write!(f, "ModuleExports({})", value),
            None => f.write_str("ModuleExports(..)"),
        }
    }
}

/// Ожидающий регистрации модуля импорт.
#[derive(Debug)]
pub struct Waiter {
    sender: oneshot::Sender<ModuleExports>,
}

impl Waiter {
    pub fn new(sender: oneshot::Sender<ModuleExports>) -> Self {
        Self { sender }
    }

    /// `false`, если ожидающий уже сдался (таймаут).
    fn fulfill(self, exports: ModuleExports) -> bool {
        self.sender.send(exports).is_ok()
    }
}

/// Запись о модуле в процессе загрузки.
#[derive(Debug)]
pub struct LoadingModule {
    /// Спецификация последнего импорта, с уже разрешённым провайдером.
    pub spec: ModuleSpec,
    pub loaded: bool,
    pub waiters: Vec<Waiter>,
    /// Бандл, который инициировал загрузку.
    pub loaded_by: Option<ModuleSpec>,
    /// Скрипт уже внедрён этим загрузчиком.
    pub injected: bool,
}

impl LoadingModule {
    pub fn new(spec: ModuleSpec) -> Self {
        Self {
            spec,
            loaded: false,
            waiters: Vec::new(),
            loaded_by: None,
            injected: false,
        }
    }

    /// Отметить модуль загруженным и раздать экспорты всем ожидающим,
    /// в порядке их прихода. Возвращает число реально дождавшихся.
    pub fn fulfill_all(&mut self, exports: &ModuleExports) -> usize {
        self.loaded = true;
        self.waiters
            .drain(..)
            .map(|waiter| waiter.fulfill(exports.clone()))
            .filter(|delivered| *delivered)
            .count()
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Одно пространство имён.
#[derive(Debug, Default)]
pub struct Namespace {
    pub global: bool,
    modules: HashMap<String, ModuleExports>,
    loading: HashMap<String, LoadingModule>,
}

impl Namespace {
    fn new(global: bool) -> Self {
        Self {
            global,
            ..Default::default()
        }
    }

    pub fn module(&self, bundle_name: &str) -> Option<&ModuleExports> {
        self.modules.get(bundle_name)
    }

    /// Имена зарегистрированных бандлов, отсортированные.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Реестр всех пространств имён.
#[derive(Debug)]
pub struct NamespaceRegistry {
    globals: Namespace,
    namespaces: HashMap<String, Namespace>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self {
            globals: Namespace::new(true),
            namespaces: HashMap::new(),
        }
    }

    pub fn namespace(&self, spec: &ModuleSpec) -> Option<&Namespace> {
        match &spec.namespace {
            Some(name) => self.namespaces.get(name),
            None => Some(&self.globals),
        }
    }

    /// Пространство имён спецификации; создаётся при первом обращении.
    pub fn namespace_mut(&mut self, spec: &ModuleSpec) -> &mut Namespace {
        match &spec.namespace {
            Some(name) => self
                .namespaces
                .entry(name.clone())
                .or_insert_with(|| Namespace::new(false)),
            None => &mut self.globals,
        }
    }

    /// Найти зарегистрированный модуль.
    ///
    /// Без версии ищется по имени; со списком версий - первая
    /// зарегистрированная из `name@<raw>` в порядке списка.
    pub fn get_module(&self, spec: &ModuleSpec) -> Option<&ModuleExports> {
        let namespace = self.namespace(spec)?;
        spec.registry_candidates()
            .iter()
            .find_map(|candidate| namespace.module(candidate))
    }

    /// Зарегистрировать модуль под именем бандла. Повторная регистрация
    /// ничего не меняет и возвращает `false`.
    pub fn register(&mut self, spec: &ModuleSpec, exports: ModuleExports) -> bool {
        let bundle_name = spec.load_bundle_name();
        let namespace = self.namespace_mut(spec);
        if namespace.modules.contains_key(&bundle_name) {
            return false;
        }
        namespace.modules.insert(bundle_name, exports);
        true
    }

    pub fn loading_record(&self, spec: &ModuleSpec) -> Option<&LoadingModule> {
        self.namespace(spec)?.loading.get(&spec.load_bundle_name())
    }

    pub fn loading_record_mut(&mut self, spec: &ModuleSpec) -> Option<&mut LoadingModule> {
        let bundle_name = spec.load_bundle_name();
        self.namespace_mut(spec).loading.get_mut(&bundle_name)
    }

    /// Запись о загрузке для (пространство имён, имя бандла), одна на пару.
    pub fn loading_record_or_insert(&mut self, spec: &ModuleSpec) -> &mut LoadingModule {
        let bundle_name = spec.load_bundle_name();
        self.namespace_mut(spec)
            .loading
            .entry(bundle_name)
            .or_insert_with(|| LoadingModule::new(spec.clone()))
    }

    pub fn namespace_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    pub fn get_namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    /// Количество зарегистрированных модулей во всех пространствах.
    pub fn count(&self) -> usize {
        self.globals.modules.len()
            + self
                .namespaces
                .values()
                .map(|ns| ns.modules.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = NamespaceRegistry::new();
        let spec = ModuleSpec::parse("pluginA:mathUtils");
        let first = ModuleExports::new(1u32);

        assert!(registry.register(&spec, first.clone()));
        assert!(!registry.register(&spec, ModuleExports::new(2u32)));

        let found = registry.get_module(&spec).unwrap();
        assert!(found.ptr_eq(&first));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_global_and_namespaced_are_separate() {
        let mut registry = NamespaceRegistry::new();
        registry.register(&ModuleSpec::parse("mathUtils"), ModuleExports::empty());

        assert!(registry.get_module(&ModuleSpec::parse("mathUtils")).is_some());
        assert!(registry.get_module(&ModuleSpec::parse("a:mathUtils")).is_none());
        assert!(registry.globals().global);
    }

    #[test]
    fn test_get_module_checks_every_candidate_version() {
        let mut registry = NamespaceRegistry::new();
        registry.register(&ModuleSpec::parse("mathUtils@any"), ModuleExports::new("any"));

        let spec = ModuleSpec::parse("mathUtils@1.2.3|any");
        let found = registry.get_module(&spec).unwrap();
        assert_eq!(found.downcast_ref::<&str>(), Some(&"any"));
        assert!(registry.get_module(&ModuleSpec::parse("mathUtils@1.2.3")).is_none());
    }

    #[test]
    fn test_one_loading_record_per_bundle_name() {
        let mut registry = NamespaceRegistry::new();
        registry.loading_record_or_insert(&ModuleSpec::parse("a:b@any|1.2.3")).injected = true;

        let same = registry.loading_record(&ModuleSpec::parse("a:b@1.2.3")).unwrap();
        assert!(same.injected);
        assert!(registry.loading_record(&ModuleSpec::parse("a:b@any")).is_none());
    }

    #[test]
    fn test_fulfill_all_skips_abandoned_waiters() {
        let mut record = LoadingModule::new(ModuleSpec::parse("a:b"));
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        record.waiters.push(Waiter::new(tx1));
        record.waiters.push(Waiter::new(tx2));
        drop(rx2);

        let exports = ModuleExports::empty();
        assert_eq!(record.fulfill_all(&exports), 1);
        assert!(record.loaded);
        assert_eq!(record.pending(), 0);
        assert!(rx1.try_recv().unwrap().ptr_eq(&exports));
    }
}
