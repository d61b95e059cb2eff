//! End-to-end scenarios for the module loader.

use std::sync::Arc;
use std::time::Duration;

use ns_modules::modules::{module_id, FnResolver, ModuleSpec, ResourceKind, VersionToken};
use ns_modules::page::ScriptOutcome;
use ns_modules::{HeadDocument, LoaderConfig, LoaderError, ModuleExports, ModuleLoader, Page};

struct MathUtils {
    add: fn(i64, i64) -> i64,
}

fn jenkins() -> (Arc<HeadDocument>, ModuleLoader) {
    let page = Arc::new(
        HeadDocument::new()
            .with_attribute("data-rooturl", "/jenkins")
            .with_attribute("data-adjuncturl", "/jenkins/adjuncts/xxx"),
    );
    let loader = ModuleLoader::new(LoaderConfig::default(), page.clone());
    (page, loader)
}

#[test]
fn test_parse_never_fails() {
    for name in ["", ":", "a:b:c", "@", "x/y:z@", "unknown/ns:mod@1..2", "  spaced : name  "] {
        let spec = ModuleSpec::parse(name);
        assert!(spec.ns_provider.is_none());
    }
}

#[test]
fn test_npm_scope_preserved() {
    let spec = ModuleSpec::parse("core-assets/a:@orgx/b@1.1.1");
    assert_eq!(spec.namespace.as_deref(), Some("a"));
    assert_eq!(spec.module_name, "@orgx/b");
    assert_eq!(spec.module_version.as_deref(), Some("1.1.1"));
    assert_eq!(spec.load_bundle_file_name_prefix().as_deref(), Some("orgx-b-1-1-1"));
}

#[test]
fn test_version_specificity() {
    assert!(VersionToken::parse("1.2.3").is_specific());
    assert!(!VersionToken::parse("1.2.x").is_specific());
    let alias = VersionToken::parse("blah");
    assert!(!alias.is_specific());
    assert_eq!((alias.major, alias.minor, alias.patch), (None, None, None));
}

#[test]
fn test_bundle_selection_and_gating() {
    let spec = ModuleSpec::parse("b@any|1.2.3|3.2.1");
    assert_eq!(spec.load_bundle_version().map(|v| v.raw.as_str()), Some("1.2.3"));
    assert_eq!(spec.load_bundle_file_name_prefix().as_deref(), Some("b-1-2-3"));

    let spec = ModuleSpec::parse("b@any|1.2.x");
    assert_eq!(spec.load_bundle_version().map(|v| v.raw.as_str()), Some("any"));
    assert_eq!(spec.load_bundle_file_name_prefix(), None);
}

#[tokio::test]
async fn test_math_utils_scenario() {
    let (page, loader) = jenkins();

    let pending = loader.import_with_timeout("pluginA:mathUtils@1.2.3", Duration::from_millis(2000));
    let script = page
        .element(&format!("{}:js", module_id(Some("pluginA"), "mathUtils@1.2.3")))
        .unwrap();
    assert!(script
        .attribute("src")
        .unwrap()
        .ends_with("pluginA/mathUtils-1-2-3.js"));

    // хост сообщает, что бандл выполнился, и бандл регистрирует себя
    assert!(page.complete_script(script.id().unwrap(), ScriptOutcome::Loaded));
    loader.export(
        Some("pluginA"),
        "mathUtils@1.2.3",
        Some(ModuleExports::new(MathUtils { add: |a, b| a + b })),
    );

    let exports = pending.await.unwrap();
    let math = exports.downcast_ref::<MathUtils>().unwrap();
    assert_eq!((math.add)(2, 2), 4);

    let again = loader.require("pluginA:mathUtils@1.2.3").unwrap();
    assert!(again.ptr_eq(&exports));
}

#[tokio::test]
async fn test_concurrent_imports_inject_once_and_share_exports() {
    let (page, loader) = jenkins();

    let first = loader.import("pluginA:widgets");
    let second = loader.import("pluginA:widgets");
    assert_eq!(page.scripts().len(), 1);

    let exports = ModuleExports::new(7u32);
    loader.export(Some("pluginA"), "widgets", Some(exports.clone()));

    let (a, b) = tokio::join!(first, second);
    assert!(a.unwrap().ptr_eq(&exports));
    assert!(b.unwrap().ptr_eq(&exports));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_isolation() {
    let (_page, loader) = jenkins();

    let impatient = loader.import_with_timeout("pluginA:slow", Duration::from_millis(100));
    let patient = loader.import_with_timeout("pluginA:slow", Duration::from_secs(60));

    let err = impatient.await.unwrap_err();
    assert_eq!(err.reason(), "timeout");
    assert_eq!(
        err.detail(),
        "Timed out waiting on module 'pluginA:slow' to load. Please verify that the plugin 'pluginA' is installed, and that it registers a module named 'slow'"
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    loader.export(Some("pluginA"), "slow", None);
    assert!(patient.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_global_timeout_detail() {
    let (_page, loader) = jenkins();
    let err = loader
        .import_with_timeout("jquery", Duration::from_millis(10))
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Timed out waiting on module 'jquery' to load.");
}

#[tokio::test]
async fn test_late_import_is_served_from_registry() {
    let (page, loader) = jenkins();
    let pending = loader.import("a:b");
    loader.export(Some("a"), "b", None);
    pending.await.unwrap();

    let scripts_before = page.scripts().len();
    assert!(loader.import("a:b").await.is_ok());
    assert_eq!(page.scripts().len(), scripts_before);
}

#[test]
fn test_idempotent_export() {
    let (_page, loader) = jenkins();
    let first = ModuleExports::new("first");
    assert!(loader.export(None, "jquery", Some(first.clone())));
    assert!(!loader.export(None, "jquery", Some(ModuleExports::new("second"))));
    assert!(loader.require("jquery").unwrap().ptr_eq(&first));
}

#[test]
fn test_require_before_export() {
    let (_page, loader) = jenkins();
    let err = loader.require("pluginA:mathUtils").unwrap_err();
    assert!(matches!(err, LoaderError::NotPreloaded(_)));
    assert_eq!(err.reason(), "not-preloaded");
}

#[tokio::test]
async fn test_any_version_never_loads_a_script() {
    let (page, loader) = jenkins();

    let pending = loader.import("jquery@any");
    assert!(page.scripts().is_empty());

    loader.export(None, "jquery@any", Some(ModuleExports::new("$")));
    let exports = pending.await.unwrap();
    assert_eq!(exports.downcast_ref::<&str>(), Some(&"$"));
}

#[tokio::test]
async fn test_async_disabled() {
    let (page, loader) = jenkins();
    loader.set_register_timeout(Some(Duration::ZERO));

    let err = loader.import("pluginA:mathUtils").await.unwrap_err();
    assert_eq!(err.reason(), "async-disabled");
    assert!(page.scripts().is_empty());
}

#[tokio::test]
async fn test_nested_bundles_load_from_their_parent_location() {
    let (page, loader) = jenkins();
    loader.add_resource_location_resolver(Arc::new(FnResolver::new(
        |spec: &ModuleSpec| spec.namespace.as_deref() == Some("ext"),
        |_: &ModuleSpec, path: &str| Some(format!("https://cdn.example.com/ext/{}", path)),
    )));

    let _parent = loader.import("ext:main@2.0.0");
    loader.whoami(Some("ext:main@2.0.0"));
    let _child = loader.import("vendor:lodash@4.17.21");

    let child = page
        .element(&format!("{}:js", module_id(Some("vendor"), "lodash@4.17.21")))
        .unwrap();
    assert_eq!(
        child.attribute("src"),
        Some("https://cdn.example.com/ext/lodash-4-17-21.js")
    );
}

#[test]
fn test_css_path_for_module() {
    let (_page, loader) = jenkins();
    let mut spec = ModuleSpec::parse("plugin/pluginA:mathUtils@1.2.3");
    assert_eq!(
        loader.module_source(&mut spec, ResourceKind::Css).unwrap(),
        "/jenkins/plugin/pluginA/jsmodules/mathUtils-1-2-3/style.css"
    );
}
