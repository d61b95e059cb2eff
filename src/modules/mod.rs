//! Система модулей: разбор имён, реестр и координация загрузки.
//!
//! Модули разложены по пространствам имён (обычно одно на плагин) и
//! запрашиваются по квалифицированному имени:
//!
//! ```text
//! pluginA:mathUtils            ; из плагина pluginA
//! core-assets/a:@orgx/b@1.1.1  ; NPM-пакет из core-assets
//! jquery@any|2.1.4             ; глобальный модуль, версия 2.1.4 или "any"
//! ```
//!
//! ```rust,ignore
//! let loader = ModuleLoader::new(LoaderConfig::default(), page);
//! let math = loader.import("pluginA:mathUtils@1.2.3").await?;
//! // ... бандл pluginA выполняется и регистрирует себя:
//! loader.export(Some("pluginA"), "mathUtils@1.2.3", Some(exports));
//! ```

mod loader;
mod registry;
mod resolver;
mod spec;
mod version;

pub use loader::{ImportAllFuture, ImportFuture, ModuleLoader, ScriptOptions, SrcBase, SrcMapping};
pub use registry::{LoadingModule, ModuleExports, Namespace, NamespaceRegistry};
pub use resolver::{
    adjunct_modules_path, core_assets_modules_path, plugin_modules_path, plugin_path,
    FnResolver, ResolverChain, ResourceKind, ResourceLocationResolver, StaticResolver,
};
pub use spec::{normalize_package_name, ModuleSpec, NamespaceProvider};
pub use version::VersionToken;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};

/// Префикс id элементов, которые внедряет загрузчик.
pub const MODULE_ID_PREFIX: &str = "js-module";

/// Время ожидания регистрации по умолчанию.
pub const DEFAULT_REGISTER_TIMEOUT_MS: u64 = 10_000;

/// Конфигурация загрузчика.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Корневой URL приложения; иначе берётся из `<head data-rooturl>`
    pub root_url: Option<String>,
    /// URL ресурсов платформы; иначе из `<head data-adjuncturl>`
    pub adjunct_url: Option<String>,
    /// Сколько ждать регистрации модуля
    pub register_timeout_ms: u64,
    /// Провайдер, если его не удалось унаследовать
    pub default_provider: NamespaceProvider,
    /// Каталог бандлов под URL ресурсов платформы
    pub adjunct_modules_dir: String,
    /// Статические резолверы, регистрируемые при старте
    pub resolvers: Vec<StaticResolver>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root_url: None,
            adjunct_url: None,
            register_timeout_ms: DEFAULT_REGISTER_TIMEOUT_MS,
            default_provider: NamespaceProvider::Adjuncts,
            adjunct_modules_dir: "org/jenkins/ui/jsmodules".to_string(),
            resolvers: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_json_file(path: &Path) -> LoaderResult<Self> {
        let source = fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&source)
            .map_err(|e| LoaderError::Config(format!("{} in {}", e, path.display())))
    }

    pub fn from_json(source: &str) -> LoaderResult<Self> {
        serde_json::from_str(source).map_err(|e| LoaderError::Config(e.to_string()))
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }
}

/// Id модуля: `js-module:[<namespace>:]<name>`.
pub fn module_id(namespace: Option<&str>, module_name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}:{}:{}", MODULE_ID_PREFIX, ns, module_name),
        None => format!("{}:{}", MODULE_ID_PREFIX, module_name),
    }
}

/// Id элемента `<link>` для произвольного CSS.
pub fn css_id(css_path: &str, namespace: Option<&str>) -> String {
    format!(
        "{}:{}:css:{}",
        MODULE_ID_PREFIX,
        namespace.unwrap_or("global"),
        css_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_module_ids() {
        assert_eq!(module_id(Some("pluginA"), "mathUtils"), "js-module:pluginA:mathUtils");
        assert_eq!(module_id(None, "mathUtils@1.2.3"), "js-module:mathUtils@1.2.3");
        assert_eq!(css_id("a/b.css", None), "js-module:global:css:a/b.css");
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config = LoaderConfig::from_json(r#"{"root_url": "/jenkins"}"#).unwrap();
        assert_eq!(config.root_url.as_deref(), Some("/jenkins"));
        assert_eq!(config.register_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_provider, NamespaceProvider::Adjuncts);
        assert_eq!(config.adjunct_modules_dir, "org/jenkins/ui/jsmodules");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "register_timeout_ms": 2000,
                "default_provider": "core-assets",
                "resolvers": [{{"namespace": "a", "base_url": "http://cdn/a"}}]
            }}"#
        )
        .unwrap();

        let config = LoaderConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.register_timeout_ms, 2000);
        assert_eq!(config.default_provider, NamespaceProvider::CoreAssets);
        assert_eq!(config.resolvers, vec![StaticResolver::new("a", "http://cdn/a")]);
    }

    #[test]
    fn test_config_errors_are_reported() {
        let err = LoaderConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.reason(), "config");

        let missing = LoaderConfig::from_json_file(Path::new("/nonexistent/loader.json"));
        assert!(matches!(missing, Err(LoaderError::Config(_))));
    }
}
