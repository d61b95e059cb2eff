//! nsmod - разбор квалифицированных имён и интерактивная оболочка загрузчика.
//!
//! Использование:
//!   nsmod                    - запустить REPL
//!   nsmod parse <qname>...   - разобрать имена
//!   nsmod src <qname>        - показать URL бандла
//!   nsmod --help             - справка

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::json;
use tokio::runtime::Runtime;

use ns_modules::{
    HeadDocument, LoaderConfig, LoaderResult, ModuleExports, ModuleLoader, ModuleSpec, Page,
    ResourceKind,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = r#"
nsmod - namespaced module loader tool

USAGE:
    nsmod [OPTIONS]                      Start REPL (interactive mode)
    nsmod [OPTIONS] parse <qname>...     Print parsed module specs as JSON
    nsmod [OPTIONS] src <qname> [--css]  Print the resolved bundle URL
    nsmod --help, -h                     Show this help
    nsmod --version, -v                  Show version

OPTIONS:
    --config <file.json>     Loader configuration
    --root-url <url>         Page root URL (data-rooturl)
    --adjunct-url <url>      Platform resources URL (data-adjuncturl)

REPL COMMANDS:
    :help, :h                     Show help
    :quit, :q, :exit              Exit REPL
    :parse <qname>                Show parsed spec
    :src <qname> [--css]          Show resolved bundle URL
    :import <qname> [timeout_ms]  Start an import, outcome is reported later
    :export <qname> [json]        Register a module (exports default to {})
    :require <qname>              Synchronously fetch a registered module
    :whoami [qname]               Set or show the current bundle
    :scripts                      Show injected <script> elements
    :loaded                       Show registered modules
    :reset, :r                    Reset loader state

QUALIFIED NAMES:
    mathUtils                     Global module
    pluginA:mathUtils@1.2.3       Module of namespace pluginA, version 1.2.3
    core-assets/a:@orgx/b@1.1.1   NPM-scoped module from core assets
    jquery@any|2.1.4              Either version
"#;

struct Options {
    config: Option<PathBuf>,
    root_url: Option<String>,
    adjunct_url: Option<String>,
    css: bool,
    rest: Vec<String>,
}

fn main() {
    env_logger::init();

    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{}", msg);
            eprintln!("Use --help for usage information.");
            process::exit(1);
        }
    };

    let loader = match build_loader(&options) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match options.rest.first().map(String::as_str) {
        None => run_repl(loader),
        Some("parse") if options.rest.len() > 1 => {
            for qname in &options.rest[1..] {
                println!("{}", describe_spec(qname));
            }
        }
        Some("src") if options.rest.len() == 2 => {
            match resolve_source(&loader, &options.rest[1], options.css) {
                Ok(url) => println!("{}", url),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        Some(command) => {
            eprintln!("Unknown or incomplete command: {}", command);
            eprintln!("Use --help for usage information.");
            process::exit(1);
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        config: None,
        root_url: None,
        adjunct_url: None,
        css: false,
        rest: Vec::new(),
    };

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{}", HELP);
                process::exit(0);
            }
            "--version" | "-v" => {
                println!("nsmod {}", VERSION);
                process::exit(0);
            }
            "--config" | "--root-url" | "--adjunct-url" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("Missing value for {}", arg))?;
                match arg.as_str() {
                    "--config" => options.config = Some(PathBuf::from(value)),
                    "--root-url" => options.root_url = Some(value),
                    _ => options.adjunct_url = Some(value),
                }
            }
            "--css" => options.css = true,
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {}", flag)),
            _ => options.rest.push(arg),
        }
    }
    Ok(options)
}

fn build_loader(options: &Options) -> LoaderResult<ModuleLoader> {
    let config = match &options.config {
        Some(path) => LoaderConfig::from_json_file(path)?,
        None => LoaderConfig::default(),
    };

    let page = HeadDocument::new();
    if let Some(url) = &options.root_url {
        page.set_head_attribute("data-rooturl", url);
    }
    if let Some(url) = &options.adjunct_url {
        page.set_head_attribute("data-adjuncturl", url);
    }
    Ok(ModuleLoader::new(config, Arc::new(page)))
}

fn describe_spec(qname: &str) -> String {
    let spec = ModuleSpec::parse(qname);
    let report = json!({
        "qualified_name": qname,
        "spec": spec,
        "load_bundle_name": spec.load_bundle_name(),
        "load_bundle_version": spec.load_bundle_version().map(|v| v.raw.clone()),
        "load_bundle_file_name_prefix": spec.load_bundle_file_name_prefix(),
        "triggers_load": spec.triggers_load(),
    });
    serde_json::to_string_pretty(&report).unwrap_or_else(|e| format!("<{}>", e))
}

fn resolve_source(loader: &ModuleLoader, qname: &str, css: bool) -> LoaderResult<String> {
    let mut spec = loader.get_module_spec(qname);
    let kind = if css { ResourceKind::Css } else { ResourceKind::Js };
    loader.module_source(&mut spec, kind)
}

/// Запустить REPL.
fn run_repl(loader: ModuleLoader) {
    println!("nsmod {} - namespaced module loader", VERSION);
    println!("Type :help for commands, :quit to exit.\n");

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            process::exit(1);
        }
    };
    // импорты создаются из REPL, но таймеры им нужны от рантайма
    let _guard = runtime.enter();

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Failed to initialize readline: {}", e);
            process::exit(1);
        }
    };

    let history_path = dirs_next::data_dir()
        .map(|p| p.join("nsmod").join("history.txt"))
        .unwrap_or_else(|| PathBuf::from(".nsmod_history"));
    let _ = rl.load_history(&history_path);

    loop {
        match rl.readline("nsmod> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match handle_command(line, &loader, &runtime) {
                    CommandResult::Continue => continue,
                    CommandResult::Exit => break,
                    CommandResult::Reset => {
                        loader.reset();
                        println!("Loader state reset.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    save_history(&mut rl, &history_path);
}

fn save_history(rl: &mut DefaultEditor, path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = rl.save_history(path);
}

enum CommandResult {
    Continue,
    Exit,
    Reset,
}

fn handle_command(line: &str, loader: &ModuleLoader, runtime: &Runtime) -> CommandResult {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match (command, arg) {
        (":help" | ":h", _) => println!("{}", HELP),
        (":quit" | ":q" | ":exit", _) => return CommandResult::Exit,
        (":reset" | ":r", _) => return CommandResult::Reset,
        (":parse", Some(qname)) => println!("{}", describe_spec(qname)),
        (":src", Some(arg)) => {
            let (qname, css) = match arg.strip_suffix("--css") {
                Some(qname) => (qname.trim(), true),
                None => (arg, false),
            };
            match resolve_source(loader, qname, css) {
                Ok(url) => println!("{}", url),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        (":import", Some(arg)) => start_import(loader, runtime, arg),
        (":export", Some(arg)) => export_module(loader, arg),
        (":require", Some(qname)) => match loader.require(qname) {
            Ok(exports) => println!("{:?}", exports),
            Err(e) => eprintln!("Error [{}]: {}", e.reason(), e.detail()),
        },
        (":whoami", qname) => match loader.whoami(qname) {
            Some(spec) => println!("{}", spec),
            None => println!("No current bundle."),
        },
        (":scripts", _) => {
            let scripts = loader.page().scripts();
            if scripts.is_empty() {
                println!("No scripts injected.");
            }
            for script in scripts {
                println!(
                    "  {} -> {}",
                    script.id().unwrap_or("<no id>"),
                    script.attribute("src").unwrap_or("")
                );
            }
        }
        (":loaded", _) => {
            let loaded = loader.loaded_modules();
            if loaded.is_empty() {
                println!("No modules registered.");
            } else {
                println!("Modules ({}):", loaded.len());
                for name in loaded {
                    println!("  {}", name);
                }
            }
        }
        (":parse" | ":src" | ":import" | ":export" | ":require", None) => {
            println!("Usage: {} <qualified-name>", command);
        }
        _ => {
            println!("Unknown command: {}", command);
            println!("Type :help for available commands.");
        }
    }
    CommandResult::Continue
}

fn start_import(loader: &ModuleLoader, runtime: &Runtime, arg: &str) {
    let mut parts = arg.split_whitespace();
    let Some(qname) = parts.next().map(str::to_string) else {
        return;
    };
    let pending = match parts.next().map(str::parse::<u64>) {
        Some(Ok(ms)) => loader.import_with_timeout(&qname, Duration::from_millis(ms)),
        Some(Err(_)) => {
            println!("Usage: :import <qualified-name> [timeout_ms]");
            return;
        }
        None => loader.import(&qname),
    };

    println!("Importing {}...", qname);
    runtime.spawn(async move {
        match pending.await {
            Ok(exports) => println!("\n[import] {} -> {:?}", qname, exports),
            Err(e) => println!("\n[import] {} failed [{}]: {}", qname, e.reason(), e.detail()),
        }
    });
}

fn export_module(loader: &ModuleLoader, arg: &str) {
    let (qname, body) = match arg.split_once(char::is_whitespace) {
        Some((qname, body)) => (qname, Some(body.trim())),
        None => (arg, None),
    };

    let exports = match body.map(serde_json::from_str::<serde_json::Value>) {
        Some(Ok(value)) => Some(ModuleExports::new(value)),
        Some(Err(e)) => {
            eprintln!("Invalid JSON exports: {}", e);
            return;
        }
        None => None,
    };

    let spec = ModuleSpec::parse(qname);
    if loader.export(spec.namespace.as_deref(), &spec.load_bundle_name(), exports) {
        println!("Registered {}.", spec);
    } else {
        println!("{} is already registered.", spec);
    }
}
