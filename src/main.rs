//! Thin CLI layer: parse args, styled output, and call into pkgmirror-core.
//! Crash-proof: panic caught and reported; all errors return Result.

mod utils;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use pkgmirror_core::crawler::DEFAULT_DELAY;
use pkgmirror_core::logging::{self, Level};
use pkgmirror_core::serve::{DEFAULT_HOST, DEFAULT_PORT};
use pkgmirror_core::tools::{DEFAULT_INDEX_URL, DEFAULT_TOOL};
use pkgmirror_core::{
    effective_registry_url, load_config, mirror_tool, roots_from_package_json, with_npm_extras, Config,
    ContentStore, CrawlOptions, CrawlReport, Crawler, HttpClient, HttpRegistry, MirrorServer, MirrorWriter,
    ResolutionState, ServeOptions, ToolMirrorReport,
};

use utils::{error, info, print_report, report_json, use_color, warning};

fn build_cli() -> Command {
    Command::new("pkgmirror")
        .version(clap::crate_version!())
        .about("Mirror an npm registry's dependency closure for offline use")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("mirror")
                .about("Download packages and their full dependency closure into a directory")
                .arg(Arg::new("output_dir").required(true).help("Mirror root directory"))
                .arg(
                    Arg::new("specs")
                        .num_args(0..)
                        .help("Package specifiers, e.g. express, express@^4.18, @types/node@20"),
                )
                .arg(
                    Arg::new("package-json")
                        .short('p')
                        .long("package-json")
                        .value_name("PATH")
                        .help("Take root specifiers from a package.json's dependency sections"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Re-download tarballs even if already present"),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Debug logging"),
                )
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("verbose")
                        .help("Only warnings and errors"),
                )
                .arg(
                    Arg::new("no-node")
                        .long("no-node")
                        .action(ArgAction::SetTrue)
                        .help("Skip npm packages (useful with --tools)"),
                )
                .arg(
                    Arg::new("tools")
                        .long("tools")
                        .action(ArgAction::SetTrue)
                        .help("Also mirror the auxiliary tool bucket (chromedriver by default)"),
                )
                .arg(
                    Arg::new("with-npm-extras")
                        .long("with-npm-extras")
                        .action(ArgAction::SetTrue)
                        .help("Add the packages the npm client itself needs at install time"),
                )
                .arg(
                    Arg::new("registry")
                        .long("registry")
                        .value_name("URL")
                        .help("Upstream registry (default: env, .pkgmirrorrc, .npmrc, then registry.npmjs.org)"),
                )
                .arg(
                    Arg::new("delay-ms")
                        .long("delay-ms")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u64))
                        .help("Pause between fetched package versions"),
                )
                .arg(
                    Arg::new("max-duration")
                        .long("max-duration")
                        .value_name("SECS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Stop taking new work after this many seconds; re-run to continue"),
                )
                .arg(
                    Arg::new("verify-cached")
                        .long("verify-cached")
                        .action(ArgAction::SetTrue)
                        .help("Re-hash tarballs already on disk and re-fetch on mismatch"),
                )
                .arg(
                    Arg::new("log-file")
                        .long("log-file")
                        .value_name("PATH")
                        .help("Append log lines to this file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the final report as JSON"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve a mirror directory as an npm registry")
                .arg(Arg::new("root").required(true).help("Mirror root directory"))
                .arg(
                    Arg::new("host")
                        .long("host")
                        .default_value(DEFAULT_HOST)
                        .help("Address to bind"),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_parser(clap::value_parser!(u16))
                        .help("Port to bind, default 16000 (0 picks a free port)"),
                )
                .arg(
                    Arg::new("public-url")
                        .long("public-url")
                        .value_name("URL")
                        .help("Origin clients use to reach this server; tarball URLs are rewritten to it"),
                )
                .arg(
                    Arg::new("registry")
                        .long("registry")
                        .value_name("URL")
                        .help("Registry the mirror was built from, if not registry.npmjs.org"),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Log every request"),
                ),
        )
}

fn log_level(m: &ArgMatches) -> Level {
    let quiet = m.try_get_one::<bool>("quiet").ok().flatten().copied().unwrap_or(false);
    if m.get_flag("verbose") {
        Level::Debug
    } else if quiet {
        Level::Warn
    } else {
        Level::Info
    }
}

fn tool_progress(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:30.cyan/dim} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn mirror_tools(m: &ArgMatches, config: &Config, root: &Path) -> Result<ToolMirrorReport, String> {
    let client = HttpClient::new(config.http_settings());
    let index_url = config.tool_index_url.as_deref().unwrap_or(DEFAULT_INDEX_URL);
    let bar = tool_progress(use_color() && !m.get_flag("json") && !logging::enabled(Level::Debug));
    let mut on_key = |i: usize, total: usize, key: &str| {
        bar.set_length(total as u64);
        bar.set_position(i as u64);
        bar.set_message(key.to_string());
    };
    let result = mirror_tool(&client, index_url, DEFAULT_TOOL, root, &mut on_key);
    bar.finish_and_clear();
    match result {
        Ok(report) => Ok(report),
        Err(e) if e.is_fatal() => Err(e.to_string()),
        Err(e) => {
            warning(&format!("Could not mirror {}: {}", DEFAULT_TOOL, e));
            Ok(ToolMirrorReport {
                tool: DEFAULT_TOOL.to_string(),
                failures: vec![e],
                ..Default::default()
            })
        }
    }
}

fn root_specs(m: &ArgMatches) -> Result<Vec<String>, String> {
    let mut roots: Vec<String> = m
        .get_many::<String>("specs")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    if let Some(path) = m.get_one::<String>("package-json") {
        let from_manifest = roots_from_package_json(Path::new(path)).map_err(|e| e.to_string())?;
        roots.extend(from_manifest);
    }
    if m.get_flag("with-npm-extras") {
        roots = with_npm_extras(roots);
    }
    Ok(roots)
}

fn mirror_packages(m: &ArgMatches, config: &Config, cwd: &Path, root: &Path) -> Result<CrawlReport, String> {
    let roots = root_specs(m)?;
    if roots.is_empty() {
        return Err("No package specifiers given. Pass specs, -p <package.json>, or --no-node.".to_string());
    }

    let registry_url = effective_registry_url(cwd, m.get_one::<String>("registry").map(String::as_str), config);
    logging::debug(&format!("Using registry {}", registry_url));
    let registry = HttpRegistry::new(&registry_url, config.http_settings());

    let verify_cached = m.get_flag("verify-cached") || config.verify_cached.unwrap_or(false);
    let writer = MirrorWriter::new(root, ContentStore::new(m.get_flag("force"), verify_cached));

    let delay = m
        .get_one::<u64>("delay-ms")
        .copied()
        .or(config.delay_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_DELAY);
    let deadline = m
        .get_one::<u64>("max-duration")
        .map(|secs| Instant::now() + Duration::from_secs(*secs));

    let crawler = Crawler::new(&registry, &writer, CrawlOptions { delay, deadline });
    let mut state = ResolutionState::new();
    crawler.crawl(&roots, &mut state).map_err(|e| e.to_string())
}

fn run_mirror(m: &ArgMatches) -> Result<(), String> {
    let cwd = env::current_dir().map_err(|e| format!("Cannot read current directory: {}", e))?;
    let config = load_config(&cwd);
    let log_file = m
        .get_one::<String>("log-file")
        .map(PathBuf::from)
        .or_else(|| config.log_file.clone());
    logging::init(log_level(m), log_file);
    logging::console_to_stderr(m.get_flag("json"));

    let root = PathBuf::from(m.get_one::<String>("output_dir").map(String::as_str).unwrap_or("."));
    fs::create_dir_all(&root).map_err(|e| format!("Cannot create {}: {}", root.display(), e))?;

    let tools = if m.get_flag("tools") {
        Some(mirror_tools(m, &config, &root)?)
    } else {
        None
    };
    let packages = if m.get_flag("no-node") {
        None
    } else {
        Some(mirror_packages(m, &config, &cwd, &root)?)
    };

    if m.get_flag("json") {
        println!("{}", report_json(packages.as_ref(), tools.as_ref()));
    } else {
        print_report(packages.as_ref(), tools.as_ref());
    }
    Ok(())
}

fn run_serve(m: &ArgMatches) -> Result<(), String> {
    logging::init(log_level(m), None);
    let root = PathBuf::from(m.get_one::<String>("root").map(String::as_str).unwrap_or("."));
    if !root.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }

    let cwd = env::current_dir().map_err(|e| format!("Cannot read current directory: {}", e))?;
    let config = load_config(&cwd);
    let mut options = ServeOptions::new(&root);
    if let Some(host) = m.get_one::<String>("host") {
        options.host = host.clone();
    }
    options.port = m.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT);
    options.public_url = m.get_one::<String>("public-url").cloned();
    options
        .upstreams
        .push(effective_registry_url(&cwd, m.get_one::<String>("registry").map(String::as_str), &config));

    let server = MirrorServer::bind(options).map_err(|e| e.to_string())?;
    info(&format!("Listening on {}", server.public_url()));
    server.run().map_err(|e| e.to_string())
}

fn run() -> Result<(), String> {
    let matches = build_cli().get_matches();
    match matches.subcommand() {
        Some(("mirror", sub_m)) => run_mirror(sub_m),
        Some(("serve", sub_m)) => run_serve(sub_m),
        _ => Ok(()),
    }
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&e);
            1
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}
