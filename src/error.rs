//! Определения ошибок загрузчика модулей.

use thiserror::Error;

/// Основной тип `Result` для библиотеки.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Перечисление всех возможных ошибок.
///
/// Разбор квалифицированных имён ошибок не порождает: неизвестный провайдер
/// или «кривая» версия деградируют в `None` с предупреждением в лог.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Unable to perform synchronous 'require' for module '{0}'. This module is not pre-loaded. The module needs to have been asynchronously pre-loaded via an outer call to 'import'.")]
    NotPreloaded(String),

    #[error("{0} require failure. Async load mode disabled.")]
    AsyncDisabled(String),

    #[error("{detail}")]
    Timeout {
        namespace: Option<String>,
        module: String,
        detail: String,
    },

    #[error("Attribute '{0}' not defined on the document <head> element.")]
    ConfigurationMissing(String),

    #[error("No module names specified.")]
    NoModuleNames,

    #[error("Module '{0}' has no specific version to load from")]
    NotLoadable(String),

    #[error("Module loader was reset while waiting on module '{0}'")]
    LoaderReset(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Машинно-читаемая причина отказа (`reason`).
    pub fn reason(&self) -> &'static str {
        match self {
            LoaderError::NotPreloaded(_) => "not-preloaded",
            LoaderError::AsyncDisabled(_) => "async-disabled",
            LoaderError::Timeout { .. } => "timeout",
            LoaderError::ConfigurationMissing(_) => "configuration-missing",
            LoaderError::NoModuleNames => "no-module-names",
            LoaderError::NotLoadable(_) => "not-loadable",
            LoaderError::LoaderReset(_) => "reset",
            LoaderError::Config(_) => "config",
        }
    }

    /// Человеко-читаемое описание (`detail`).
    pub fn detail(&self) -> String {
        match self {
            LoaderError::Timeout { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LoaderError::Timeout { .. })
    }
}
