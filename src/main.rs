//! rwtra - runtime module loading and compilation on Boa and OXC
//!
//! Command line front end:
//! - `run`: bootstrap an application directory and print the result
//! - `import-map`: print the import map for a directory's `config.json`
//! - `transpile`: print the CommonJS body produced for a module
//! - `scss`: compile a stylesheet to CSS

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use url::Url;

use rwtra::compiler::{SassEngine, ScssCompiler};
use rwtra::document::HeadDocument;
use rwtra::logging::{LogCrateClient, init_logger};
use rwtra::transpiler::{Transpile, Transpiler, TranspilerConfig};
use rwtra::{Bootstrap, BootstrapConfig, RuntimeOptions};

#[derive(Parser)]
#[command(name = "rwtra")]
#[command(author, version, about = "Runtime module loader for TSX, SCSS and CDN packages")]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap an application directory: import map, tools, modules, entry
    Run {
        /// Directory containing config.json and the application sources
        root: PathBuf,
        /// Entry file, overriding config.json
        #[arg(short, long)]
        entry: Option<String>,
        /// Origin the application is served from
        #[arg(long, default_value = "http://localhost/")]
        origin: String,
    },
    /// Print the import map for a directory's config.json
    ImportMap {
        /// Directory containing config.json
        root: PathBuf,
        /// Origin the application is served from
        #[arg(long, default_value = "http://localhost/")]
        origin: String,
    },
    /// Transpile a module and print the CommonJS body the loader executes
    Transpile {
        /// Input TypeScript/JavaScript file
        input: PathBuf,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the ES module output instead of CommonJS
        #[arg(long)]
        esm: bool,
        /// Minify the output
        #[arg(long)]
        minify: bool,
    },
    /// Compile an SCSS file and print the CSS
    Scss {
        /// Input stylesheet
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    init_logger(level, !cli.no_color).into_diagnostic()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    match cli.command {
        Commands::Run {
            root,
            entry,
            origin,
        } => runtime.block_on(run_app(&root, entry, &origin)),
        Commands::ImportMap { root, origin } => runtime.block_on(print_import_map(&root, &origin)),
        Commands::Transpile {
            input,
            output,
            esm,
            minify,
        } => transpile_file(&input, output.as_deref(), esm, minify),
        Commands::Scss { input } => runtime.block_on(compile_scss(&input)),
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", "Error".red(), e);
    std::process::exit(1);
}

fn parse_origin(origin: &str) -> Url {
    Url::parse(origin).unwrap_or_else(|e| fail(format!("invalid origin {}: {}", origin, e)))
}

/// Bootstrap `root` and print the document head and the entry export
async fn run_app(root: &Path, entry: Option<String>, origin: &str) -> Result<()> {
    let document = Rc::new(HeadDocument::new());
    let options = RuntimeOptions::for_directory(root, parse_origin(origin))
        .with_document(document.clone())
        .with_log(Rc::new(LogCrateClient::new(true)));
    let bootstrap = Bootstrap::new(options).into_diagnostic()?;

    let mut config = bootstrap
        .load_config()
        .await
        .unwrap_or_else(|e| fail(e));
    if entry.is_some() {
        config.entry = entry;
    }

    match bootstrap.run(config).await {
        Ok(output) => {
            println!("{}", document.render_head());
            println!(
                "{}: {}",
                "Entry".green(),
                bootstrap.engine().describe(&output.exports)
            );
            println!(
                "{}: {} module(s), {} registry entries",
                "Loaded".green(),
                output.modules.len(),
                bootstrap.registry().len()
            );
            Ok(())
        }
        Err(e) => fail(e),
    }
}

/// Print the import map JSON for `root/config.json`
async fn print_import_map(root: &Path, origin: &str) -> Result<()> {
    let options = RuntimeOptions::for_directory(root, parse_origin(origin));
    let bootstrap = Bootstrap::new(options).into_diagnostic()?;

    let mut config: BootstrapConfig = bootstrap
        .load_config()
        .await
        .unwrap_or_else(|e| fail(e));
    match bootstrap.import_maps().build_import_map(&mut config).await {
        Ok(map) => {
            println!("{}", map.to_json_pretty().into_diagnostic()?);
            Ok(())
        }
        Err(e) => fail(e),
    }
}

/// Transpile a file to CommonJS (or ESM)
fn transpile_file(input: &Path, output: Option<&Path>, esm: bool, minify: bool) -> Result<()> {
    let source = std::fs::read_to_string(input).into_diagnostic()?;
    let filename = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input.ts");

    let transpiler = Transpiler::with_config(TranspilerConfig {
        minify,
        ..Default::default()
    });
    let result = if esm {
        transpiler.transpile(&source, filename)
    } else {
        transpiler.transform(&source, filename)
    };

    match result {
        Ok(js) => {
            if let Some(output_path) = output {
                std::fs::write(output_path, &js).into_diagnostic()?;
                println!(
                    "{}: Transpiled {} -> {}",
                    "Success".green(),
                    input.display(),
                    output_path.display()
                );
            } else {
                println!("{}", js);
            }
            Ok(())
        }
        Err(e) => fail(e),
    }
}

/// Compile a stylesheet and print the CSS
async fn compile_scss(input: &Path) -> Result<()> {
    let source = std::fs::read_to_string(input).into_diagnostic()?;
    let compiler = ScssCompiler::new(
        None,
        None,
        Some(SassEngine::grass()),
        Rc::new(LogCrateClient::new(false)),
    );

    match compiler
        .compile_source(&input.to_string_lossy(), source)
        .await
    {
        Ok(css) => {
            println!("{}", css);
            Ok(())
        }
        Err(e) => fail(e),
    }
}
