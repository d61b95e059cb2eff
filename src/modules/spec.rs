//! Разбор квалифицированных имён модулей.
//!
//! ## Грамматика
//!
//! ```text
//! [[<provider>/]<namespace>:]<name>[@<version>[,|<version>...]]
//!
//! mathUtils                    ; глобальное пространство имён
//! pluginA:mathUtils            ; пространство имён pluginA
//! plugin/pluginA:mathUtils     ; с явным провайдером
//! core-assets/a:@orgx/b@1.1.1  ; NPM-scope сохраняется в имени
//! mathUtils@any|1.2.3          ; список совместимых версий
//! ```
//!
//! Разбор тотален: любая строка даёт [`ModuleSpec`].

use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use super::version::VersionToken;

/// Откуда берутся ресурсы пространства имён.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceProvider {
    /// `/plugin/<namespace>/jsmodules/...`
    Plugin,
    /// `/assets/<namespace>/jsmodules/...`
    CoreAssets,
    /// Корень ресурсов платформы.
    #[default]
    Adjuncts,
}

impl NamespaceProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceProvider::Plugin => "plugin",
            NamespaceProvider::CoreAssets => "core-assets",
            NamespaceProvider::Adjuncts => "adjuncts",
        }
    }

    /// Провайдеры, которые можно указать прямо в квалифицированном имени.
    pub fn from_qualifier(s: &str) -> Option<Self> {
        match s {
            "plugin" => Some(NamespaceProvider::Plugin),
            "core-assets" => Some(NamespaceProvider::CoreAssets),
            _ => None,
        }
    }
}

impl FromStr for NamespaceProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjuncts" => Ok(NamespaceProvider::Adjuncts),
            other => NamespaceProvider::from_qualifier(other)
                .ok_or_else(|| format!("Unsupported namespace provider: {}", other)),
        }
    }
}

impl fmt::Display for NamespaceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Разобранное квалифицированное имя модуля.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSpec {
    /// `None` - наследовать от загружающего бандла.
    pub ns_provider: Option<NamespaceProvider>,
    /// `None` - глобальное пространство имён.
    pub namespace: Option<String>,
    pub module_name: String,
    /// Исходный список версий, как он был записан.
    pub module_version: Option<String>,
    /// Кандидаты версий в порядке записи.
    pub module_compat_versions: Vec<VersionToken>,
}

impl ModuleSpec {
    /// Разобрать квалифицированное имя.
    pub fn parse(qualified_name: &str) -> Self {
        let tokens: Vec<&str> = qualified_name.split(':').collect();

        let (ns_provider, namespace, name_segment) = if tokens.len() == 2 {
            let (provider, namespace) = split_provider(tokens[0].trim());
            (provider, Some(namespace), tokens[1].trim())
        } else {
            (None, None, qualified_name.trim())
        };

        let (module_name, module_version) = split_npm_name(name_segment);
        let module_compat_versions = module_version
            .as_deref()
            .map(split_version_list)
            .unwrap_or_default();

        Self {
            ns_provider,
            namespace,
            module_name,
            module_version,
            module_compat_versions,
        }
    }

    /// Спецификация модуля, объявляемого через `export(namespace, name)`.
    pub fn for_export(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self::parse(&format!("{}:{}", ns, name)),
            _ => Self::parse(name),
        }
    }

    /// Версия, которую следует грузить.
    ///
    /// Первая конкретная версия из списка; если конкретных нет - первая
    /// по порядку; если список пуст - `None`.
    pub fn load_bundle_version(&self) -> Option<&VersionToken> {
        self.module_compat_versions
            .iter()
            .find(|v| v.is_specific())
            .or_else(|| self.module_compat_versions.first())
    }

    /// Имя бандла, под которым модуль регистрируется: `name[@version]`.
    pub fn load_bundle_name(&self) -> String {
        match self.load_bundle_version() {
            Some(version) => format!("{}@{}", self.module_name, version.raw),
            None => self.module_name.clone(),
        }
    }

    /// Префикс имени файла бандла.
    ///
    /// `None`, если версия указана, но не конкретна: такой импорт
    /// удовлетворяется только чужой регистрацией и скрипт не грузит.
    pub fn load_bundle_file_name_prefix(&self) -> Option<String> {
        let normalized = normalize_package_name(&self.module_name);
        match self.load_bundle_version() {
            Some(version) if version.is_specific() => {
                Some(format!("{}-{}", normalized, version.raw.replace('.', "-")))
            }
            Some(_) => None,
            None => Some(normalized),
        }
    }

    /// Нужно ли для этого импорта инициировать загрузку скрипта.
    pub fn triggers_load(&self) -> bool {
        self.load_bundle_version().map_or(true, |v| v.is_specific())
    }

    /// Ключи реестра, под которыми может быть зарегистрирован модуль,
    /// в порядке проверки.
    pub fn registry_candidates(&self) -> Vec<String> {
        if self.module_compat_versions.is_empty() {
            vec![self.module_name.clone()]
        } else {
            self.module_compat_versions
                .iter()
                .map(|v| format!("{}@{}", self.module_name, v.raw))
                .collect()
        }
    }

    /// `namespace:module` без версии, для сообщений.
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, self.module_name),
            None => self.module_name.clone(),
        }
    }
}

impl fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            if let Some(provider) = &self.ns_provider {
                write!(f, "{}/", provider)?;
            }
            write!(f, "{}:", ns)?;
        }
        f.write_str(&self.module_name)?;
        if let Some(version) = &self.module_version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}

/// Нормализовать имя NPM-пакета: всё, кроме `[A-Za-z0-9_.]`, заменяется
/// на `-`, один ведущий `-` отбрасывается.
pub fn normalize_package_name(package_name: &str) -> String {
    let normalized: String = package_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    match normalized.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None => normalized,
    }
}

fn split_provider(ns_segment: &str) -> (Option<NamespaceProvider>, String) {
    let parts: Vec<&str> = ns_segment.split('/').collect();
    if parts.len() != 2 {
        return (None, ns_segment.to_string());
    }

    let candidate = parts[0].trim();
    let provider = NamespaceProvider::from_qualifier(candidate);
    if provider.is_none() {
        warn!(
            "Unsupported module namespace provider \"{}\". Setting to undefined.",
            candidate
        );
    }
    (provider, parts[1].trim().to_string())
}

/// `@org/pkg@1.2.3` → (`@org/pkg`, `1.2.3`). `@` на нулевой позиции
/// разделителем версии не считается.
fn split_npm_name(resource: &str) -> (String, Option<String>) {
    if resource.chars().count() <= 1 {
        return (resource.to_string(), None);
    }

    let (mut name, rest) = match resource.find('/') {
        Some(slash) if resource.starts_with('@') && slash > 0 => {
            (resource[..=slash].to_string(), &resource[slash + 1..])
        }
        _ => (String::new(), resource),
    };

    match rest.find('@') {
        Some(at) if at > 0 => {
            name.push_str(&rest[..at]);
            let version = &rest[at + 1..];
            (name, (!version.is_empty()).then(|| version.to_string()))
        }
        _ => {
            name.push_str(rest);
            (name, None)
        }
    }
}

/// Делит список по `,` и `|`; серия разделителей считается одним.
fn split_version_list(list: &str) -> Vec<VersionToken> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut after_separator = false;

    for c in list.chars() {
        if c == ',' || c == '|' {
            if !after_separator {
                fragments.push(std::mem::take(&mut current));
            }
            after_separator = true;
        } else {
            current.push(c);
            after_separator = false;
        }
    }
    fragments.push(current);

    fragments
        .iter()
        .map(|fragment| VersionToken::parse(fragment.trim()))
        .collect()
}
