//! # ns-modules
//!
//! Ленивый загрузчик модулей с пространствами имён для веб-страниц хоста.
//!
//! ## Основные модули
//!
//! - [`modules`] - Разбор квалифицированных имён, реестр и загрузчик
//! - [`page`] - Страница хоста: атрибуты `<head>`, внедрение `<script>`/`<link>`
//! - [`error`] - Ошибки загрузчика
//!
//! ## Пример
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ns_modules::{HeadDocument, LoaderConfig, ModuleExports, ModuleLoader};
//!
//! let page = Arc::new(HeadDocument::new().with_attribute("data-rooturl", "/jenkins"));
//! let loader = ModuleLoader::new(LoaderConfig::default(), page);
//!
//! let pending = loader.import("plugin/pluginA:mathUtils");
//! loader.export(Some("pluginA"), "mathUtils", Some(ModuleExports::new(42)));
//! let math = pending.await?;
//! ```

pub mod error;
pub mod modules;
pub mod page;

// === Re-exports для удобства ===
pub use error::{LoaderError, LoaderResult};
pub use modules::{
    LoaderConfig, ModuleExports, ModuleLoader, ModuleSpec, NamespaceProvider, ResourceKind,
    VersionToken,
};
pub use page::{HeadDocument, Page};
