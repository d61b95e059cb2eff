//! Разрешение мест расположения ресурсов модулей.
//!
//! По умолчанию путь к бандлу строится по шаблону провайдера:
//!
//! - `plugin`      → `<root>/plugin/<namespace>/jsmodules/<file>`
//! - `core-assets` → `<root>/assets/<namespace>/jsmodules/<file>`
//! - `adjuncts`    → `<adjunct>/<modules-dir>[/<namespace>]/<file>`
//!
//! Перед шаблонами опрашиваются зарегистрированные резолверы, в порядке
//! регистрации; первый подходящий выигрывает.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::NamespaceRegistry;
use super::spec::ModuleSpec;

/// Вид ресурса модуля.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Js,
    Css,
}

impl ResourceKind {
    /// Путь файла относительно каталога модулей.
    pub fn source_path(&self, file_name_prefix: &str) -> String {
        match self {
            ResourceKind::Js => format!("{}.js", file_name_prefix),
            ResourceKind::Css => format!("{}/style.css", file_name_prefix),
        }
    }

    pub fn id_suffix(&self) -> &'static str {
        match self {
            ResourceKind::Js => "js",
            ResourceKind::Css => "css",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_suffix())
    }
}

/// Резолвер, способный переопределить, откуда грузится ресурс модуля.
pub trait ResourceLocationResolver: Send + Sync {
    fn can_resolve(&self, spec: &ModuleSpec) -> bool;

    /// URL ресурса; `None` - использовать шаблон по умолчанию.
    fn resolve(&self, spec: &ModuleSpec, src_path: &str) -> Option<String>;
}

/// Все модули одного пространства имён - с фиксированного базового URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticResolver {
    pub namespace: String,
    pub base_url: String,
}

impl StaticResolver {
    pub fn new(namespace: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            base_url: base_url.into(),
        }
    }
}

impl ResourceLocationResolver for StaticResolver {
    fn can_resolve(&self, spec: &ModuleSpec) -> bool {
        spec.namespace.as_deref() == Some(self.namespace.as_str())
    }

    fn resolve(&self, _spec: &ModuleSpec, src_path: &str) -> Option<String> {
        Some(format!("{}/{}", self.base_url.trim_end_matches('/'), src_path))
    }
}

/// Резолвер из пары замыканий.
pub struct FnResolver<C, R> {
    can_resolve: C,
    resolve: R,
}

impl<C, R> FnResolver<C, R>
where
    C: Fn(&ModuleSpec) -> bool + Send + Sync,
    R: Fn(&ModuleSpec, &str) -> Option<String> + Send + Sync,
{
    pub fn new(can_resolve: C, resolve: R) -> Self {
        Self {
            can_resolve,
            resolve,
        }
    }
}

impl<C, R> ResourceLocationResolver for FnResolver<C, R>
where
    C: Fn(&ModuleSpec) -> bool + Send + Sync,
    R: Fn(&ModuleSpec, &str) -> Option<String> + Send + Sync,
{
    fn can_resolve(&self, spec: &ModuleSpec) -> bool {
        (self.can_resolve)(spec)
    }

    fn resolve(&self, spec: &ModuleSpec, src_path: &str) -> Option<String> {
        (self.resolve)(spec, src_path)
    }
}

/// Упорядоченный набор резолверов. Только добавление.
#[derive(Default, Clone)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ResourceLocationResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resolver: Arc<dyn ResourceLocationResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Первый резолвер, готовый обслужить спецификацию.
    pub fn find(&self, spec: &ModuleSpec) -> Option<Arc<dyn ResourceLocationResolver>> {
        self.resolvers
            .iter()
            .find(|r| r.can_resolve(spec))
            .cloned()
    }

    /// Как [`ResolverChain::find`], но если прямого совпадения нет, берётся
    /// резолвер бандла, инициировавшего загрузку (и так вверх по цепочке):
    /// зависимости грузятся оттуда же, откуда их загрузчик.
    pub fn find_with_fallback(
        &self,
        spec: &ModuleSpec,
        registry: &NamespaceRegistry,
    ) -> Option<Arc<dyn ResourceLocationResolver>> {
        if self.is_empty() {
            return None;
        }

        let mut visited = HashSet::new();
        let mut current = spec.clone();
        loop {
            if let Some(resolver) = self.find(&current) {
                return Some(resolver);
            }
            let key = (current.namespace.clone(), current.load_bundle_name());
            if !visited.insert(key) {
                return None;
            }
            current = registry.loading_record(&current)?.loaded_by.clone()?;
        }
    }
}

/// `<root>/plugin/<plugin-id>`
pub fn plugin_path(root_url: &str, plugin_id: &str) -> String {
    format!("{}/plugin/{}", root_url, plugin_id)
}

pub fn plugin_modules_path(root_url: &str, namespace: &str) -> String {
    format!("{}/jsmodules", plugin_path(root_url, namespace))
}

pub fn core_assets_modules_path(root_url: &str, namespace: &str) -> String {
    format!("{}/assets/{}/jsmodules", root_url, namespace)
}

pub fn adjunct_modules_path(adjunct_url: &str, modules_dir: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}/{}/{}", adjunct_url, modules_dir, ns),
        None => format!("{}/{}", adjunct_url, modules_dir),
    }
}
