use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deckloop_contracts::content::content_units;
use deckloop_contracts::templates::{ParamRole, TemplateRegistry};
use deckloop_engine::archive::{export_from_manifest, write_archive, ArchiveEntry};
use deckloop_engine::config::parse_seconds;
use deckloop_engine::documents::load_document;
use deckloop_engine::{
    ChromeRenderer, DeckConfig, DeckEngine, DeckOutput, DryrunRenderer, InferenceServices,
    RunError, SlideRenderer,
};
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "deckloop", version, about = "Turn a document into a refined slide deck")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
    Templates(TemplatesArgs),
    Preview(PreviewArgs),
    Export(ExportArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RendererKind {
    Chrome,
    Dryrun,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Also package the committed slides into this zip file.
    #[arg(long)]
    archive: Option<PathBuf>,
    #[arg(long)]
    call_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long, value_enum, default_value = "chrome")]
    renderer: RendererKind,
    #[arg(long)]
    preserve_content: bool,
    #[arg(long)]
    model_timeout_s: Option<String>,
    #[arg(long)]
    render_timeout_s: Option<String>,
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Parser)]
struct TemplatesArgs {
    /// Print the tools schema handed to the call model.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct PreviewArgs {
    #[arg(long)]
    template: String,
    /// JSON object of template arguments.
    #[arg(long)]
    args: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    png: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "chrome")]
    renderer: RendererKind,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    run: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("deckloop error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_deck(args),
        Command::Templates(args) => run_templates(args),
        Command::Preview(args) => run_preview(args),
        Command::Export(args) => run_export(args),
    }
}

fn run_deck(args: RunArgs) -> Result<i32> {
    let mut config = DeckConfig::from_env()?;
    if let Some(value) = args.max_attempts {
        config.set_max_attempts(value);
    }
    if let Some(raw) = &args.model_timeout_s {
        config.model_timeout = parse_seconds("--model-timeout-s", raw)?;
    }
    if let Some(raw) = &args.render_timeout_s {
        config.render_timeout = parse_seconds("--render-timeout-s", raw)?;
    }
    if args.call_model.is_some() {
        config.call_model = args.call_model.clone();
    }
    if args.vision_model.is_some() {
        config.vision_model = args.vision_model.clone();
    }
    config.preserve_content |= args.preserve_content;
    config.echo_events |= args.verbose;
    config.events_path = args.events.clone();

    let text = load_document(&args.input)?;
    let units = content_units(&text, &config.chunking);
    if units.is_empty() {
        bail!("no text content found in {}", args.input.display());
    }

    let services = InferenceServices::from_config(&config)?;
    let renderer = launch_renderer(args.renderer, &config)?;
    let mut engine = DeckEngine::new(&args.out, config, services, renderer)?;
    engine.set_source(args.input.to_string_lossy());
    let output = archive_run(engine.run(units), &args.out, args.archive.as_deref())?;

    println!(
        "Deck {}: {} slides ({} accepted, {} exhausted, {} attempts) in {}",
        output.deck_id,
        output.summary.total_slides,
        output.summary.accepted,
        output.summary.exhausted,
        output.summary.total_attempts,
        output.run_dir.display()
    );
    Ok(0)
}

/// Writes the optional archive for a finished run. A run that stopped with
/// a [`RunError`] has still committed every slide, so its archive is rebuilt
/// from the manifest before the error is returned.
fn archive_run(
    result: Result<DeckOutput>,
    run_dir: &Path,
    archive: Option<&Path>,
) -> Result<DeckOutput> {
    let Some(archive) = archive else {
        return result;
    };
    match result {
        Ok(output) => {
            let entries: Vec<ArchiveEntry> = output.slides.iter().map(ArchiveEntry::from).collect();
            let files = write_archive(&entries, archive)?;
            println!("Archived {files} files to {}", archive.display());
            Ok(output)
        }
        Err(err) => {
            if err.downcast_ref::<RunError>().is_some() {
                match export_from_manifest(run_dir, archive) {
                    Ok(files) => println!("Archived {files} files to {}", archive.display()),
                    Err(export_err) => {
                        eprintln!("deckloop warning: archive not written: {export_err:#}")
                    }
                }
            }
            Err(err)
        }
    }
}

fn run_templates(args: TemplatesArgs) -> Result<i32> {
    let registry = TemplateRegistry::builtin()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&registry.schema())?);
        return Ok(0);
    }
    for spec in registry.iter() {
        println!("{}  {}", spec.name, spec.description);
        for param in spec.parameters.values() {
            let role = match param.role {
                ParamRole::Content => "content",
                ParamRole::Presentation => "style",
            };
            println!(
                "    {:<18} {:<8} {:<8} default {}",
                param.name,
                param.kind.json_type(),
                role,
                param.default
            );
        }
    }
    Ok(0)
}

fn run_preview(args: PreviewArgs) -> Result<i32> {
    let registry = TemplateRegistry::builtin()?;
    let arguments = parse_arguments(args.args.as_deref())?;
    let html = registry.render(&args.template, &arguments)?;
    write_output(&args.out, html.as_bytes())?;
    println!("Wrote {}", args.out.display());

    if let Some(png) = &args.png {
        let config = DeckConfig::from_env()?;
        let mut renderer = launch_renderer(args.renderer, &config)?;
        let captured = renderer.capture(&html);
        renderer.close()?;
        let bitmap = captured?;
        write_output(png, &bitmap.png)?;
        println!("Wrote {} ({}x{})", png.display(), bitmap.width, bitmap.height);
    }
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let files = export_from_manifest(&args.run, &args.out)?;
    println!("Exported {files} files to {}", args.out.display());
    Ok(0)
}

fn launch_renderer(kind: RendererKind, config: &DeckConfig) -> Result<Box<dyn SlideRenderer>> {
    let renderer: Box<dyn SlideRenderer> = match kind {
        RendererKind::Chrome => Box::new(ChromeRenderer::launch(config)?),
        RendererKind::Dryrun => Box::new(DryrunRenderer::new(
            config.capture_width,
            config.capture_height,
        )),
    };
    Ok(renderer)
}

fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use clap::Parser;
    use deckloop_contracts::slides::SlideContentUnit;
    use deckloop_engine::{DeckConfig, DeckEngine, DryrunRenderer, InferenceServices};

    use super::{archive_run, parse_arguments, Cli, Command, RendererKind};

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "deckloop",
            "run",
            "--input",
            "talk.docx",
            "--out",
            "runs/a",
            "--renderer",
            "dryrun",
            "--max-attempts",
            "3",
            "--preserve-content",
        ]);
        let Ok(Cli {
            command: Command::Run(args),
        }) = cli
        else {
            panic!("run arguments did not parse");
        };
        assert_eq!(args.renderer, RendererKind::Dryrun);
        assert_eq!(args.max_attempts, Some(3));
        assert!(args.preserve_content);
        assert!(args.archive.is_none());
    }

    #[test]
    fn preview_arguments_must_be_an_object() {
        assert!(parse_arguments(None).map(|map| map.is_empty()).unwrap_or(false));
        assert!(parse_arguments(Some(r#"{"title": "Hi"}"#)).is_ok());
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{oops")).is_err());
    }

    #[test]
    fn stopped_run_is_still_archived() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let run_dir = temp.path().join("run");
        let engine = DeckEngine::new(
            &run_dir,
            DeckConfig::default(),
            InferenceServices::dryrun(Duration::from_secs(5)),
            Box::new(DryrunRenderer::new(900, 500)),
        )?;
        engine.cancel_token().cancel();
        let units = vec![
            SlideContentUnit::new(0, "One"),
            SlideContentUnit::new(1, "Two"),
        ];
        let archive = temp.path().join("deck.zip");
        let result = archive_run(engine.run(units), &run_dir, Some(archive.as_path()));

        assert!(result.is_err());
        let mut reader = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        assert!(reader.by_name("html/slide_002.html").is_ok());
        assert!(reader.by_name("png/slide_001.png").is_ok());
        Ok(())
    }
}
