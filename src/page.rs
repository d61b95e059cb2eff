//! Страница хоста: атрибуты `<head>` и внедрение элементов.
//!
//! Загрузчик ничего не знает о реальном DOM. Ему нужны три вещи:
//! прочитать конфигурационный атрибут `<head>`, добавить `<script>`/`<link>`
//! (идемпотентно по id) и найти уже добавленные скрипты. Это и есть трейт
//! [`Page`]. [`HeadDocument`] - реализация в памяти, которой пользуются
//! тесты, CLI и хосты без браузера.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

/// Колбэк успешной загрузки скрипта.
pub type ScriptCallback = Arc<dyn Fn(&Element) + Send + Sync>;

/// Колбэк ошибки: второй аргумент - была ли загрузка прервана.
pub type ScriptErrorCallback = Arc<dyn Fn(&Element, bool) + Send + Sync>;

/// Элемент `<head>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    /// Имена атрибутов хранятся в нижнем регистре.
    attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Атрибут по имени, без учёта регистра.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }
}

/// Итог загрузки скрипта, о котором сообщает хост.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Loaded,
    /// Файл получен, но выполнение завершилось ошибкой.
    Failed,
    Aborted,
}

/// Готовый к вставке `<script>`.
#[derive(Clone, Default)]
pub struct ScriptElement {
    pub id: String,
    pub src: String,
    /// Исходный src до подмены через `src_map`.
    pub referrer: Option<String>,
    pub async_load: bool,
    /// Дополнительные атрибуты элемента.
    pub attributes: Vec<(String, String)>,
    pub on_success: Option<ScriptCallback>,
    pub on_error: Option<ScriptErrorCallback>,
    pub remove_on_load: bool,
}

impl ScriptElement {
    fn to_element(&self) -> Element {
        let mut el = Element::new("script");
        el.set_attribute("id", self.id.clone());
        el.set_attribute("type", "text/javascript");
        el.set_attribute("src", self.src.clone());
        if let Some(referrer) = &self.referrer {
            el.set_attribute("data-referrer", referrer.clone());
        }
        if self.async_load {
            el.set_attribute("async", "true");
        }
        for (name, value) in &self.attributes {
            el.set_attribute(name, value.clone());
        }
        el
    }
}

/// Страница, в которую загрузчик внедряет ресурсы.
pub trait Page: Send + Sync {
    /// Атрибут элемента `<head>`, без учёта регистра.
    fn head_attribute(&self, name: &str) -> Option<String>;

    /// Добавить `<script>`. `None`, если элемент с таким id уже есть
    /// и он не помечен `data-replaceable="true"`.
    fn add_script(&self, script: ScriptElement) -> Option<Element>;

    /// Добавить `<link rel="stylesheet">`. `None`, если id уже занят.
    fn add_stylesheet(&self, id: &str, href: &str) -> Option<Element>;

    /// Все `<script>` в `<head>`, в порядке добавления.
    fn scripts(&self) -> Vec<Element>;
}

struct PendingScript {
    on_success: Option<ScriptCallback>,
    on_error: Option<ScriptErrorCallback>,
    remove_on_load: bool,
}

#[derive(Default)]
struct HeadState {
    attributes: BTreeMap<String, String>,
    elements: Vec<Element>,
    pending: HashMap<String, PendingScript>,
}

impl HeadState {
    fn position(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|el| el.id() == Some(id))
    }
}

/// `<head>` документа, живущий в памяти.
#[derive(Default)]
pub struct HeadDocument {
    state: Mutex<HeadState>,
}

impl HeadDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-вариант [`HeadDocument::set_head_attribute`].
    pub fn with_attribute(self, name: &str, value: &str) -> Self {
        self.set_head_attribute(name, value);
        self
    }

    pub fn set_head_attribute(&self, name: &str, value: &str) {
        self.state
            .lock()
            .attributes
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn element(&self, id: &str) -> Option<Element> {
        let state = self.state.lock();
        state.position(id).map(|idx| state.elements[idx].clone())
    }

    pub fn elements_by_tag(&self, tag: &str) -> Vec<Element> {
        self.state
            .lock()
            .elements
            .iter()
            .filter(|el| el.tag == tag)
            .cloned()
            .collect()
    }

    /// Сообщить, чем закончилась загрузка скрипта.
    ///
    /// Помечает элемент `data-onload-complete`, вызывает колбэки и, если
    /// просили, удаляет элемент. `false`, если скрипта с таким id нет.
    pub fn complete_script(&self, id: &str, outcome: ScriptOutcome) -> bool {
        let (element, pending) = {
            let mut state = self.state.lock();
            let Some(idx) = state.position(id) else {
                return false;
            };
            state.elements[idx].set_attribute("data-onload-complete", "true");
            let element = state.elements[idx].clone();
            let pending = state.pending.remove(id);
            if pending.as_ref().is_some_and(|p| p.remove_on_load) {
                state.elements.remove(idx);
            }
            (element, pending)
        };

        // Колбэки вызываются без блокировки: они могут снова звать страницу.
        let Some(pending) = pending else {
            return true;
        };
        match outcome {
            ScriptOutcome::Loaded => {
                if let Some(on_success) = &pending.on_success {
                    on_success(&element);
                }
            }
            ScriptOutcome::Failed | ScriptOutcome::Aborted => {
                let aborted = outcome == ScriptOutcome::Aborted;
                if aborted {
                    warn!("Script load aborted: {}", element.attribute("src").unwrap_or(""));
                }
                if let Some(on_error) = &pending.on_error {
                    on_error(&element, aborted);
                }
            }
        }
        true
    }
}

impl Page for HeadDocument {
    fn head_attribute(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .attributes
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    fn add_script(&self, script: ScriptElement) -> Option<Element> {
        let mut state = self.state.lock();

        if let Some(idx) = state.position(&script.id) {
            if state.elements[idx].attribute("data-replaceable") != Some("true") {
                return None;
            }
            debug!("Replacing <script> element '{}'", script.id);
            state.elements.remove(idx);
        }

        let element = script.to_element();
        state.pending.insert(
            script.id.clone(),
            PendingScript {
                on_success: script.on_success,
                on_error: script.on_error,
                remove_on_load: script.remove_on_load,
            },
        );
        state.elements.push(element.clone());
        Some(element)
    }

    fn add_stylesheet(&self, id: &str, href: &str) -> Option<Element> {
        let mut state = self.state.lock();
        if state.position(id).is_some() {
            return None;
        }

        let mut el = Element::new("link");
        el.set_attribute("id", id);
        el.set_attribute("type", "text/css");
        el.set_attribute("rel", "stylesheet");
        el.set_attribute("href", href);
        state.elements.push(el.clone());
        Some(el)
    }

    fn scripts(&self) -> Vec<Element> {
        self.elements_by_tag("script")
    }
}
