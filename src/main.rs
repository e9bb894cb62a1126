//! Basalt IDL compiler CLI

use std::{
    io::{IsTerminal, stderr},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use basalt::{
    compiler::Compiler,
    config::{FileNaming, GeneratorOptions, Language, ProjectConfig},
    diagnostic::render_all,
    error::CompileError,
    generators::create_generator,
    model::InterfaceModel,
    printer::print_model,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "basalt")]
#[command(author, version, about = "Basalt IDL compiler", long_about = None)]
struct Cli {
    /// Root IDL document; defaults to the project file's `input`
    input: Option<PathBuf>,

    /// Generate bindings as LANG=DIR, e.g. `python=gen/py`; repeatable
    #[arg(short, long = "target", value_name = "LANG=DIR", value_parser = parse_target)]
    targets: Vec<(Language, PathBuf)>,

    /// Package name for generated code; defaults to the root namespace
    #[arg(short, long)]
    package: Option<String>,

    /// How generated module files are named: snake, lower or pascal
    #[arg(long, default_value_t = FileNaming::Snake)]
    file_naming: FileNaming,

    /// Do not generate server skeletons
    #[arg(long)]
    no_server: bool,

    /// Project file declaring the input and targets
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the interface model as JSON
    #[arg(long)]
    dump_model: bool,

    /// Print the model back as normalised IDL, one document per namespace
    #[arg(long)]
    print_idl: bool,

    /// Stop after validation; generate nothing
    #[arg(long)]
    check: bool,

    /// Disable coloured diagnostics
    #[arg(long)]
    no_color: bool,
}

fn parse_target(s: &str) -> Result<(Language, PathBuf), String> {
    let (language, dir) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LANG=DIR, found '{s}'"))?;
    let language = language.parse::<Language>().map_err(|e| e.to_string())?;
    Ok((language, PathBuf::from(dir)))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns `Ok(false)` when the documents had errors, which have been
/// printed already.
fn run(cli: &Cli) -> Result<bool> {
    let color = !cli.no_color && stderr().is_terminal();

    let project = match &cli.config {
        Some(path) => Some(
            ProjectConfig::load(path)
                .with_context(|| format!("Failed to load project file: {}", path.display()))?,
        ),
        None => None,
    };
    let input = cli
        .input
        .clone()
        .or_else(|| project.as_ref().and_then(|p| p.input.clone()))
        .context("no input document given")?;

    let mut compiler = Compiler::default();
    for generator in project.iter().flat_map(ProjectConfig::generators) {
        compiler.add_generator(generator);
    }
    for (language, dir) in &cli.targets {
        let mut options = GeneratorOptions::new(dir)
            .with_file_naming(cli.file_naming)
            .with_emit_server(!cli.no_server);
        if let Some(package) = &cli.package {
            options = options.with_package(package);
        }
        compiler.add_generator(create_generator(*language, options));
    }

    if cli.check {
        let model = match compiler.check(&input) {
            Ok(model) => model,
            Err(err) => return report(&compiler, err, color),
        };
        dump(cli, &model)?;
        info!("{} is valid", input.display());
        return Ok(true);
    }

    if project.is_none() && cli.targets.is_empty() {
        warn!("No targets given; nothing will be generated");
    }
    let compilation = match compiler.compile(&input) {
        Ok(compilation) => compilation,
        Err(err) => return report(&compiler, err, color),
    };
    dump(cli, &compilation.model)?;
    let written = compilation.write_outputs()?;
    for output in &compilation.outputs {
        info!(
            "{}: {} file(s) in {}",
            output.language,
            output.files.len(),
            output.output_dir.display()
        );
    }
    eprintln!("Generated {} file(s)", written.len());
    Ok(true)
}

fn dump(cli: &Cli, model: &InterfaceModel) -> Result<()> {
    if cli.dump_model {
        println!("{}", model.to_json()?);
    }
    if cli.print_idl {
        for (name, text) in print_model(model) {
            println!("// {name}\n{text}");
        }
    }
    Ok(())
}

/// Prints IDL diagnostics; anything else is passed on as an error.
fn report(compiler: &Compiler, err: CompileError, color: bool) -> Result<bool> {
    if err.diagnostics().is_empty() {
        return Err(err.into());
    }
    eprint!("{}", render_all(err.diagnostics(), compiler.sources(), color));
    eprintln!("{err}");
    Ok(false)
}
