//! Загрузчик модулей.
//!
//! Координирует асинхронную загрузку: на каждое (пространство имён, имя
//! бандла) заводится одна запись о загрузке, все параллельные импорты
//! ждут на ней, скрипт внедряется не более одного раза. Когда бандл
//! регистрирует себя через [`ModuleLoader::export`], все ожидающие
//! получают экспорты в порядке прихода. Каждый ожидающий имеет свой
//! таймаут и при его истечении отваливается один, не трогая остальных.
//!
//! Состояние: UNREQUESTED → LOADING → LOADED. LOADED конечно: дальнейшие
//! импорты обслуживаются прямо из реестра.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, try_join_all};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::error::{LoaderError, LoaderResult};
use crate::page::{Element, Page, ScriptCallback, ScriptElement, ScriptErrorCallback};

use super::registry::{ModuleExports, NamespaceRegistry, Waiter};
use super::resolver::{
    adjunct_modules_path, core_assets_modules_path, plugin_modules_path, plugin_path,
    ResolverChain, ResourceKind, ResourceLocationResolver,
};
use super::spec::{ModuleSpec, NamespaceProvider};
use super::{css_id, module_id, LoaderConfig};

/// Результат [`ModuleLoader::import`].
pub type ImportFuture = Pin<Box<dyn Future<Output = LoaderResult<ModuleExports>> + Send + 'static>>;

/// Результат [`ModuleLoader::import_all`].
pub type ImportAllFuture =
    Pin<Box<dyn Future<Output = LoaderResult<Vec<ModuleExports>>> + Send + 'static>>;

/// Атрибуты, которыми помечается `<script>` загружаемого бандла.
const ATTR_NS_PROVIDER: &str = "data-module-ns-provider";
const ATTR_NAMESPACE: &str = "data-module-namespace";
const ATTR_MODULE_NAME: &str = "data-module-name";

/// Год ожидания вместо переполнения `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// База, к которой приклеивается `src` в [`ModuleLoader::add_script`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SrcBase {
    /// `<root>/`
    #[default]
    Root,
    /// `<adjunct>/`
    Adjunct,
    /// Как есть (пустая строка - `src` уже полный).
    Literal(String),
}

/// Подмена суффикса `src`, например `.js` → `.min.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcMapping {
    pub from: String,
    pub to: String,
}

/// Параметры [`ModuleLoader::add_script`].
#[derive(Clone, Default)]
pub struct ScriptOptions {
    /// По умолчанию `js-script:<src>`.
    pub script_id: Option<String>,
    pub src_base: SrcBase,
    /// По умолчанию `true`.
    pub async_load: Option<bool>,
    pub src_map_fn: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
    /// Первое совпавшее по суффиксу правило применяется.
    pub src_map: Vec<SrcMapping>,
    pub attributes: Vec<(String, String)>,
    pub on_success: Option<ScriptCallback>,
    /// Вызывается, если файл получен, но выполнился с ошибкой (не на 404).
    pub on_error: Option<ScriptErrorCallback>,
    pub remove_on_load: bool,
}

struct LoaderState {
    registry: NamespaceRegistry,
    resolvers: ResolverChain,
    /// Бандл, объявивший себя текущим через `whoami`.
    whoami: Option<ModuleSpec>,
    root_url: Option<String>,
    adjunct_url: Option<String>,
    register_timeout: Option<Duration>,
}

impl LoaderState {
    fn new(config: &LoaderConfig) -> Self {
        let mut resolvers = ResolverChain::new();
        for resolver in &config.resolvers {
            resolvers.add(Arc::new(resolver.clone()));
        }
        Self {
            registry: NamespaceRegistry::new(),
            resolvers,
            whoami: None,
            root_url: config.root_url.clone(),
            adjunct_url: config.adjunct_url.clone(),
            register_timeout: None,
        }
    }
}

/// Загрузчик модулей. Клоны разделяют одно состояние.
#[derive(Clone)]
pub struct ModuleLoader {
    config: Arc<LoaderConfig>,
    page: Arc<dyn Page>,
    state: Arc<Mutex<LoaderState>>,
}

impl ModuleLoader {
    /// Создать загрузчик для страницы.
    pub fn new(config: LoaderConfig, page: Arc<dyn Page>) -> Self {
        let state = LoaderState::new(&config);
        Self {
            config: Arc::new(config),
            page,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    /// Сбросить всё состояние: реестр, записи о загрузке, `whoami`,
    /// резолверы и закэшированные URL. Ждущие импорты получают
    /// [`LoaderError::LoaderReset`].
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = LoaderState::new(&self.config);
        info!("Module loader state reset");
    }

    /// Объявить (или узнать) текущий бандл.
    ///
    /// Провайдер берётся из атрибутов `<script>`, которым этот бандл был
    /// загружен: зависимости бандла грузятся оттуда же, откуда он сам.
    pub fn whoami(&self, qualified_name: Option<&str>) -> Option<ModuleSpec> {
        let Some(qname) = qualified_name else {
            return self.state.lock().whoami.clone();
        };

        // страницу читаем до блокировки
        let mut spec = ModuleSpec::parse(qname);
        if let Some(provider) = self.provider_from_script_element(&spec) {
            spec.ns_provider = Some(provider);
        }
        self.state.lock().whoami = Some(spec.clone());
        Some(spec)
    }

    pub fn set_root_url(&self, url: &str) {
        self.state.lock().root_url = Some(url.to_string());
    }

    pub fn root_url(&self) -> LoaderResult<String> {
        let mut state = self.state.lock();
        self.root_url_locked(&mut state)
    }

    pub fn adjunct_url(&self) -> LoaderResult<String> {
        let mut state = self.state.lock();
        self.adjunct_url_locked(&mut state)
    }

    /// Время ожидания для [`ModuleLoader::import`]. `None` - из конфигурации,
    /// ноль отключает асинхронную загрузку.
    pub fn set_register_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().register_timeout = timeout;
    }

    pub fn add_resource_location_resolver(&self, resolver: Arc<dyn ResourceLocationResolver>) {
        self.state.lock().resolvers.add(resolver);
    }

    /// Импортировать модуль с таймаутом по умолчанию.
    pub fn import(&self, qualified_name: &str) -> ImportFuture {
        self.import_spec(ModuleSpec::parse(qualified_name), None)
    }

    pub fn import_with_timeout(&self, qualified_name: &str, timeout: Duration) -> ImportFuture {
        self.import_spec(ModuleSpec::parse(qualified_name), Some(timeout))
    }

    /// Импортировать несколько модулей. Успех - когда зарегистрированы все;
    /// первый же отказ проваливает весь импорт.
    pub fn import_all<S: AsRef<str>>(&self, qualified_names: &[S]) -> ImportAllFuture {
        self.import_all_inner(qualified_names, None)
    }

    pub fn import_all_with_timeout<S: AsRef<str>>(
        &self,
        qualified_names: &[S],
        timeout: Duration,
    ) -> ImportAllFuture {
        self.import_all_inner(qualified_names, Some(timeout))
    }

    /// Синхронно получить уже зарегистрированный модуль.
    pub fn require(&self, qualified_name: &str) -> LoaderResult<ModuleExports> {
        let spec = ModuleSpec::parse(qualified_name);
        let state = self.state.lock();
        state
            .registry
            .get_module(&spec)
            .cloned()
            .ok_or_else(|| LoaderError::NotPreloaded(qualified_name.to_string()))
    }

    /// Зарегистрировать модуль и разбудить всех, кто его ждёт.
    ///
    /// `None` в `exports` регистрирует пустой объект. Повторная регистрация
    /// того же имени ничего не делает и возвращает `false`.
    pub fn export(
        &self,
        namespace: Option<&str>,
        module_name: &str,
        exports: Option<ModuleExports>,
    ) -> bool {
        let spec = ModuleSpec::for_export(namespace, module_name);
        let exports = exports.unwrap_or_else(ModuleExports::empty);
        let mut state = self.state.lock();

        if !state.registry.register(&spec, exports.clone()) {
            match namespace {
                Some(ns) => debug!("Plugin module '{}:{}' already registered.", ns, module_name),
                None => debug!("Global module '{}' already registered.", module_name),
            }
            return false;
        }

        if let Some(record) = state.registry.loading_record_mut(&spec) {
            let delivered = record.fulfill_all(&exports);
            debug!("Module '{}' registered, {} waiter(s) notified", spec, delivered);
        }
        true
    }

    /// Спецификация с уже разрешённым провайдером, если модуль грузится.
    pub fn get_module_spec(&self, qualified_name: &str) -> ModuleSpec {
        let spec = ModuleSpec::parse(qualified_name);
        let state = self.state.lock();
        match state.registry.loading_record(&spec) {
            Some(record) => record.spec.clone(),
            None => spec,
        }
    }

    /// URL ресурса модуля. Разрешённый провайдер сохраняется в `spec`.
    pub fn module_source(&self, spec: &mut ModuleSpec, kind: ResourceKind) -> LoaderResult<String> {
        let mut state = self.state.lock();
        self.module_source_locked(&mut state, spec, kind)
    }

    pub fn is_loaded(&self, qualified_name: &str) -> bool {
        self.require(qualified_name).is_ok()
    }

    /// Число импортов, всё ещё числящихся в записи о загрузке.
    pub fn pending_waiters(&self, qualified_name: &str) -> usize {
        let spec = ModuleSpec::parse(qualified_name);
        let state = self.state.lock();
        state
            .registry
            .loading_record(&spec)
            .map_or(0, |record| record.pending())
    }

    /// Все зарегистрированные модули как `[<namespace>:]<bundle>`.
    pub fn loaded_modules(&self) -> Vec<String> {
        let state = self.state.lock();
        let registry = &state.registry;
        let mut names: Vec<String> = registry
            .globals()
            .module_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for ns in registry.namespace_names() {
            if let Some(namespace) = registry.get_namespace(ns) {
                names.extend(
                    namespace
                        .module_names()
                        .into_iter()
                        .map(|name| format!("{}:{}", ns, name)),
                );
            }
        }
        names
    }

    /// Добавить `<script>` на страницу.
    ///
    /// `Ok(None)` - элемент с таким id уже есть и не заменяем, либо
    /// `src` пуст.
    pub fn add_script(&self, src: &str, options: ScriptOptions) -> LoaderResult<Option<Element>> {
        if src.is_empty() {
            warn!("Call to add_script with empty \"src\" arg.");
            return Ok(None);
        }

        let mut src = src.to_string();
        let mut referrer = None;
        if let Some(map) = &options.src_map_fn {
            src = map(&src);
        } else if let Some(mapping) = options
            .src_map
            .iter()
            .find(|m| !m.from.is_empty() && src.ends_with(&m.from))
        {
            let stem = &src[..src.len() - mapping.from.len()];
            let mapped = format!("{}{}", stem, mapping.to);
            referrer = Some(std::mem::replace(&mut src, mapped));
        }

        let id = options
            .script_id
            .clone()
            .unwrap_or_else(|| format!("js-script:{}", src));
        let base = match &options.src_base {
            SrcBase::Root => format!("{}/", self.root_url()?),
            SrcBase::Adjunct => format!("{}/", self.adjunct_url()?),
            SrcBase::Literal(base) => base.clone(),
        };

        Ok(self.page.add_script(ScriptElement {
            id,
            src: format!("{}{}", base, src),
            referrer,
            async_load: options.async_load.unwrap_or(true),
            attributes: options.attributes,
            on_success: options.on_success,
            on_error: options.on_error,
            remove_on_load: options.remove_on_load,
        }))
    }

    /// Добавить CSS модуля (`<prefix>/style.css`).
    pub fn add_module_css(&self, namespace: &str, module_name: &str) -> LoaderResult<Option<Element>> {
        let mut spec = self.get_module_spec(&format!("{}:{}", namespace, module_name));
        let element_id = format!("{}:css", module_id(Some(namespace), module_name));
        let href = self.module_source(&mut spec, ResourceKind::Css)?;
        Ok(self.page.add_stylesheet(&element_id, &href))
    }

    /// Добавить CSS-файл плагина: `<root>/plugin/<namespace>/<css_path>`.
    pub fn add_plugin_css(&self, namespace: &str, css_path: &str) -> LoaderResult<Option<Element>> {
        let href = format!("{}/{}", plugin_path(&self.root_url()?, namespace), css_path);
        Ok(self.page.add_stylesheet(&css_id(&href, Some(namespace)), &href))
    }

    /// Добавить CSS-файл. Пути под URL ресурсов платформы берутся как есть,
    /// остальные считаются относительными к корню.
    pub fn add_css(&self, css_path: &str) -> LoaderResult<Option<Element>> {
        let href = if css_path.starts_with(&self.adjunct_url()?) {
            css_path.to_string()
        } else {
            format!("{}/{}", self.root_url()?, css_path)
        };
        Ok(self.page.add_stylesheet(&css_id(&href, None), &href))
    }

    fn import_all_inner<S: AsRef<str>>(
        &self,
        qualified_names: &[S],
        timeout: Option<Duration>,
    ) -> ImportAllFuture {
        if qualified_names.is_empty() {
            return Box::pin(future::ready(Err(LoaderError::NoModuleNames)));
        }
        let imports: Vec<ImportFuture> = qualified_names
            .iter()
            .map(|qname| self.import_spec(ModuleSpec::parse(qname.as_ref()), timeout))
            .collect();
        Box::pin(try_join_all(imports))
    }

    fn import_spec(&self, spec: ModuleSpec, timeout: Option<Duration>) -> ImportFuture {
        let mut state = self.state.lock();

        if let Some(exports) = state.registry.get_module(&spec) {
            return Box::pin(future::ready(Ok(exports.clone())));
        }

        let timeout = timeout
            .or(state.register_timeout)
            .unwrap_or_else(|| self.config.register_timeout());
        if timeout.is_zero() {
            let what = match &spec.namespace {
                Some(_) => format!("Module {}", spec.display_name()),
                None => format!("Global module {}", spec.module_name),
            };
            return Box::pin(future::ready(Err(LoaderError::AsyncDisabled(what))));
        }

        let (script, waiting) = match self.load_module(&mut state, &spec, timeout) {
            Ok(loading) => loading,
            Err(e) => return Box::pin(future::ready(Err(e))),
        };
        drop(state);

        // Блокировка уже снята: хост может выполнить бандл прямо в
        // add_script, и тот позовёт export или whoami.
        if let Some(script) = script {
            self.inject_loader_script(&spec, script);
        }
        waiting
    }

    /// Встать в очередь записи о загрузке. Если скрипт ещё не внедрён,
    /// запись резервирует внедрение и возвращает готовый `<script>`.
    fn load_module(
        &self,
        state: &mut LoaderState,
        spec: &ModuleSpec,
        timeout: Duration,
    ) -> LoaderResult<(Option<ScriptElement>, ImportFuture)> {
        let mut spec = spec.clone();
        let needs_injection = spec.triggers_load()
            && !state
                .registry
                .loading_record(&spec)
                .is_some_and(|record| record.injected);

        let mut script = None;
        if needs_injection {
            // loaded_by нужен уже при разрешении пути (резолвер родителя)
            let whoami = state.whoami.clone();
            state.registry.loading_record_or_insert(&spec).loaded_by = whoami;

            let src = match self.module_source_locked(state, &mut spec, ResourceKind::Js) {
                Ok(src) => src,
                Err(e) => {
                    if let Some(record) = state.registry.loading_record_mut(&spec) {
                        record.loaded_by = None;
                    }
                    return Err(e);
                }
            };
            script = Some(self.loader_script(&spec, src));
        }

        let (sender, receiver) = oneshot::channel();

        let record = state.registry.loading_record_or_insert(&spec);
        // провайдер, разрешённый при внедрении, не теряется при повторных импортах
        if spec.ns_provider.is_none() {
            spec.ns_provider = record.spec.ns_provider;
        }
        record.spec = spec.clone();
        record.waiters.push(Waiter::new(sender));
        if script.is_some() {
            record.injected = true;
        }

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let namespace = spec.namespace.clone();
        let module = spec.module_name.clone();

        let waiting: ImportFuture = Box::pin(async move {
            match time::timeout_at(deadline, receiver).await {
                Ok(Ok(exports)) => Ok(exports),
                Ok(Err(_)) => Err(LoaderError::LoaderReset(match &namespace {
                    Some(ns) => format!("{}:{}", ns, module),
                    None => module,
                })),
                Err(_) => {
                    let detail = timeout_detail(namespace.as_deref(), &module);
                    error!("Module load failure: {}", detail);
                    Err(LoaderError::Timeout {
                        namespace,
                        module,
                        detail,
                    })
                }
            }
        });
        Ok((script, waiting))
    }

    /// Добавить `<script>` бандла на страницу. Вызывается без блокировки.
    fn inject_loader_script(&self, spec: &ModuleSpec, script: ScriptElement) {
        let script_id = script.id.clone();
        if self.page.add_script(script).is_some() {
            debug!("Injected loader script '{}' for module '{}'", script_id, spec);
            return;
        }
        // Кто-то другой уже добавил этот скрипт; ждём его регистрации.
        if let Some(record) = self.state.lock().registry.loading_record_mut(spec) {
            record.injected = false;
            record.loaded_by = None;
        }
        debug!("Loader script '{}' already on page", script_id);
    }

    fn loader_script(&self, spec: &ModuleSpec, src: String) -> ScriptElement {
        let bundle_name = spec.load_bundle_name();
        let mut attributes = Vec::new();
        if let Some(provider) = spec.ns_provider {
            attributes.push((ATTR_NS_PROVIDER.to_string(), provider.to_string()));
        }
        if let Some(ns) = &spec.namespace {
            attributes.push((ATTR_NAMESPACE.to_string(), ns.clone()));
        }
        attributes.push((ATTR_MODULE_NAME.to_string(), bundle_name.clone()));

        ScriptElement {
            id: format!(
                "{}:{}",
                module_id(spec.namespace.as_deref(), &bundle_name),
                ResourceKind::Js
            ),
            src,
            async_load: true,
            attributes,
            ..Default::default()
        }
    }

    fn provider_from_script_element(&self, spec: &ModuleSpec) -> Option<NamespaceProvider> {
        let bundle_name = spec.load_bundle_name();
        self.page
            .scripts()
            .iter()
            .find(|script| {
                script.attribute(ATTR_NAMESPACE) == spec.namespace.as_deref()
                    && script.attribute(ATTR_MODULE_NAME) == Some(bundle_name.as_str())
            })
            .and_then(|script| script.attribute(ATTR_NS_PROVIDER))
            .and_then(|provider| provider.parse().ok())
    }

    fn module_source_locked(
        &self,
        state: &mut LoaderState,
        spec: &mut ModuleSpec,
        kind: ResourceKind,
    ) -> LoaderResult<String> {
        let provider = match spec.ns_provider {
            Some(provider) => provider,
            None => {
                let provider = state
                    .whoami
                    .as_ref()
                    .and_then(|current| current.ns_provider)
                    .unwrap_or(self.config.default_provider);
                spec.ns_provider = Some(provider);
                provider
            }
        };

        let prefix = spec
            .load_bundle_file_name_prefix()
            .ok_or_else(|| LoaderError::NotLoadable(spec.to_string()))?;
        let src_path = kind.source_path(&prefix);

        if let Some(resolver) = state.resolvers.find_with_fallback(spec, &state.registry) {
            if let Some(url) = resolver.resolve(spec, &src_path) {
                return Ok(url);
            }
        }

        let base = match (provider, spec.namespace.as_deref()) {
            (NamespaceProvider::Plugin, Some(ns)) => {
                plugin_modules_path(&self.root_url_locked(state)?, ns)
            }
            (NamespaceProvider::CoreAssets, Some(ns)) => {
                core_assets_modules_path(&self.root_url_locked(state)?, ns)
            }
            // глобальные модули всегда лежат в ресурсах платформы
            (_, namespace) => adjunct_modules_path(
                &self.adjunct_url_locked(state)?,
                &self.config.adjunct_modules_dir,
                namespace,
            ),
        };
        Ok(format!("{}/{}", base, src_path))
    }

    fn root_url_locked(&self, state: &mut LoaderState) -> LoaderResult<String> {
        if let Some(url) = &state.root_url {
            return Ok(url.clone());
        }
        let url = self
            .page
            .head_attribute("data-rooturl")
            .or_else(|| self.page.head_attribute("resurl"))
            .ok_or_else(|| LoaderError::ConfigurationMissing("data-rooturl".to_string()))?;
        state.root_url = Some(url.clone());
        Ok(url)
    }

    fn adjunct_url_locked(&self, state: &mut LoaderState) -> LoaderResult<String> {
        if let Some(url) = &state.adjunct_url {
            return Ok(url.clone());
        }
        let url = match self.page.head_attribute("data-adjuncturl") {
            Some(url) => url,
            // старые страницы: только resurl, где static/ → adjuncts/
            None => self
                .page
                .head_attribute("resurl")
                .map(|res_url| res_url.replacen("static/", "adjuncts/", 1))
                .ok_or_else(|| LoaderError::ConfigurationMissing("data-adjuncturl".to_string()))?,
        };
        state.adjunct_url = Some(url.clone());
        Ok(url)
    }
}

fn timeout_detail(namespace: Option<&str>, module: &str) -> String {
    match namespace {
        Some(ns) => format!(
            "Timed out waiting on module '{}:{}' to load. Please verify that the plugin '{}' is installed, and that it registers a module named '{}'",
            ns, module, ns, module
        ),
        None => format!("Timed out waiting on module '{}' to load.", module),
    }
}
