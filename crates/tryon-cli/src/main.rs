use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tryon_contracts::commands::{parse_command, SessionCommand, SESSION_HELP_COMMANDS};
use tryon_contracts::credentials::{Credential, CredentialStore, FileCredentialStore};
use tryon_contracts::events::EventWriter;
use tryon_contracts::garments::{GarmentSlot, InputSlot};
use tryon_contracts::images::ImageData;
use tryon_engine::config::EngineConfig;
use tryon_engine::gemini::{GenerationError, ImageEditor};
use tryon_engine::input::{image_dimensions, ImageSource, InputError};
use tryon_engine::output::save_output;
use tryon_engine::session::{GenerationOutcome, Session, SessionState};
use tryon_engine::{new_session_id, TryOnEngine};

#[derive(Debug, Parser)]
#[command(
    name = "tryon",
    version,
    about = "Dress a person photo in garment photos with the Gemini image-edit API"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands.
    Session(SessionArgs),
    /// One-shot try-on.
    Run(RunArgs),
    /// Fetch a remote image through the proxies and save it.
    Fetch(FetchArgs),
    /// Manage the stored API key.
    Key(KeyArgs),
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    credentials: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    person: String,
    #[arg(long)]
    top: Option<String>,
    #[arg(long)]
    trousers: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    credentials: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct FetchArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct KeyArgs {
    #[command(subcommand)]
    action: KeyAction,
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { value: String },
    Clear,
    Status,
}

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_REJECTED: i32 = 2;
const EXIT_CREDENTIAL: i32 = 3;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Session(args) => {
            run_session(args)?;
            Ok(EXIT_OK)
        }
        Command::Run(args) => run_once(args),
        Command::Fetch(args) => run_fetch(args),
        Command::Key(args) => run_key(args),
    }
}

fn credential_store(path: Option<PathBuf>, config: &EngineConfig) -> Result<FileCredentialStore> {
    let path = path
        .or_else(|| config.home.as_ref().map(|home| home.join("credentials.json")))
        .or_else(FileCredentialStore::default_path)
        .ok_or_else(|| {
            anyhow!("cannot locate credentials file; pass --credentials or set TRYON_HOME")
        })?;
    Ok(FileCredentialStore::new(path))
}

fn event_writer(path: Option<PathBuf>) -> EventWriter {
    match path {
        Some(path) => EventWriter::new(path, new_session_id()),
        None => EventWriter::disabled(new_session_id()),
    }
}

fn build_engine(config: EngineConfig, model: Option<&str>) -> Result<TryOnEngine> {
    let requested = model.map(str::to_string).unwrap_or_else(|| config.model.clone());
    let mut engine = TryOnEngine::new(config);
    let selection = engine
        .select_model(Some(&requested))
        .map_err(|reason| anyhow!(reason))?;
    if let Some(reason) = selection.fallback_reason {
        eprintln!("warning: {reason}");
    }
    Ok(engine)
}

fn run_session(args: SessionArgs) -> Result<()> {
    let config = EngineConfig::from_env()?;
    let store = credential_store(args.credentials, &config)?;
    let store_path = store.path().to_path_buf();
    let engine = build_engine(config, args.model.as_deref())?;
    let mut session = Session::new(Box::new(store), event_writer(args.events));
    session.start()?;

    let mut shell = SessionShell { engine, session };
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(stdout, "Try-on session started. Type /help for commands.")?;
    if matches!(shell.session.state(), SessionState::AwaitingCredential { .. }) {
        writeln!(
            stdout,
            "Enter your Gemini API key (stored in {}).",
            store_path.display()
        )?;
    }
    shell.run(stdin.lock(), &mut stdout)
}

struct SessionShell {
    engine: TryOnEngine,
    session: Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

impl SessionShell {
    fn run(&mut self, mut input: impl BufRead, out: &mut impl Write) -> Result<()> {
        let mut line = String::new();
        loop {
            write!(out, "> ")?;
            out.flush()?;

            line.clear();
            let read = match input.read_line(&mut line) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }

            let command = parse_command(line.trim_end_matches(['\n', '\r']));
            if self.handle(&command, out)? == Flow::Quit {
                break;
            }
        }
        Ok(())
    }

    fn handle(&mut self, command: &SessionCommand, out: &mut impl Write) -> Result<Flow> {
        match command.action.as_str() {
            "noop" => {}
            "help" => {
                writeln!(out, "Commands: {}", SESSION_HELP_COMMANDS.join(" "))?;
            }
            "quit" => return Ok(Flow::Quit),
            "text" => {
                if matches!(self.session.state(), SessionState::AwaitingCredential { .. }) {
                    self.save_key(command.arg("text"), out)?;
                } else {
                    writeln!(out, "Unknown input. Type /help for commands.")?;
                }
            }
            "save_key" => self.save_key(command.arg("value"), out)?,
            "clear_key" => {
                self.session.clear_credential()?;
                writeln!(out, "API key cleared.")?;
            }
            "set_person" | "set_top" | "set_trousers" => {
                let slot = command.arg("slot").and_then(InputSlot::parse);
                match (slot, command.arg("source")) {
                    (Some(slot), Some(source)) => self.load_input(slot, source, out)?,
                    (Some(slot), None) => writeln!(out, "/{slot} requires a path or URL")?,
                    (None, _) => writeln!(out, "Unknown slot.")?,
                }
            }
            "remove_input" => {
                let Some(slot) = command.arg("slot").and_then(InputSlot::parse) else {
                    writeln!(out, "/remove expects person, top or trousers")?;
                    return Ok(Flow::Continue);
                };
                match self.session.remove_input(slot) {
                    Ok(true) => writeln!(out, "Removed {slot}.")?,
                    Ok(false) => writeln!(out, "No {slot} image to remove.")?,
                    Err(busy) => writeln!(out, "{busy}")?,
                }
            }
            "generate" => {
                writeln!(out, "Generating with {}...", self.engine.editor().model_name())?;
                let outcome = self.session.generate(self.engine.editor());
                self.report_outcome(&outcome, out)?;
            }
            "save_output" => {
                let target = command.arg("path").unwrap_or(".");
                match self.session.save_output(Path::new(target)) {
                    Ok(path) => writeln!(out, "Saved {}", path.display())?,
                    Err(err) => writeln!(out, "Save failed: {err:#}")?,
                }
            }
            "print_data_uri" => match self.session.output() {
                Some(image) => writeln!(out, "{}", image.to_data_uri())?,
                None => writeln!(out, "No generated image yet.")?,
            },
            "status" => self.print_status(out)?,
            "set_model" => {
                let requested = command.arg("value");
                match self.engine.select_model(requested) {
                    Ok(selection) => {
                        if let Some(reason) = selection.fallback_reason {
                            writeln!(out, "{reason}")?;
                        }
                        writeln!(out, "Image model set to {}", selection.model.name)?;
                    }
                    Err(reason) => writeln!(out, "{reason}")?,
                }
            }
            "unknown" => {
                let name = command.arg("command").unwrap_or_default();
                writeln!(out, "Unknown command: /{name}. Type /help for commands.")?;
            }
            other => writeln!(out, "Unhandled command: {other}")?,
        }
        Ok(Flow::Continue)
    }

    fn save_key(&mut self, value: Option<&str>, out: &mut impl Write) -> Result<()> {
        if self.session.save_credential(value.unwrap_or_default())? {
            writeln!(out, "API key saved.")?;
        } else {
            writeln!(out, "API key cannot be empty.")?;
        }
        Ok(())
    }

    fn load_input(&mut self, slot: InputSlot, source: &str, out: &mut impl Write) -> Result<()> {
        let source = ImageSource::parse(source);
        let image = match self.engine.adapter().load(&source) {
            Ok(image) => image,
            Err(err) => {
                if let InputError::Fetch(fetch) = &err {
                    fetch.record_attempts(self.session.events(), &source.describe());
                }
                writeln!(out, "{}", err.user_message())?;
                return Ok(());
            }
        };
        let summary = describe_image(&image);
        match self.session.set_input(slot, image) {
            Ok(()) => writeln!(out, "{slot} set: {summary}")?,
            Err(busy) => writeln!(out, "{busy}")?,
        }
        Ok(())
    }

    fn report_outcome(&self, outcome: &GenerationOutcome, out: &mut impl Write) -> Result<()> {
        match outcome {
            GenerationOutcome::Output => {
                let summary = self
                    .session
                    .output()
                    .map(describe_image)
                    .unwrap_or_default();
                writeln!(out, "Try-on ready: {summary}. Use /save or /data_uri.")?;
            }
            GenerationOutcome::Failed(GenerationError::CredentialInvalid(_)) => {
                writeln!(out, "{}", outcome.user_message().unwrap_or_default())?;
                writeln!(out, "Enter a new API key to continue.")?;
            }
            _ => writeln!(out, "{}", outcome.user_message().unwrap_or_default())?,
        }
        Ok(())
    }

    fn print_status(&self, out: &mut impl Write) -> Result<()> {
        writeln!(out, "State: {}", self.session.state().label())?;
        let key = self
            .session
            .credential()
            .map(Credential::masked)
            .unwrap_or_else(|| "not set".to_string());
        writeln!(out, "API key: {key}")?;
        writeln!(out, "Model: {}", self.engine.editor().model_name())?;
        for slot in InputSlot::ALL {
            let summary = self
                .session
                .input(slot)
                .map(describe_image)
                .unwrap_or_else(|| "empty".to_string());
            writeln!(out, "{slot}: {summary}")?;
        }
        if let Some(image) = self.session.output() {
            writeln!(out, "Output: {}", describe_image(image))?;
        }
        if let Some(message) = self.session.error_message() {
            writeln!(out, "Last error: {message}")?;
        }
        Ok(())
    }
}

fn describe_image(image: &ImageData) -> String {
    match image_dimensions(image) {
        Some((width, height)) => format!(
            "{}, {} bytes, {width}x{height}",
            image.media_type(),
            image.len()
        ),
        None => format!("{}, {} bytes", image.media_type(), image.len()),
    }
}

fn exit_code(outcome: &GenerationOutcome) -> i32 {
    match outcome {
        GenerationOutcome::Output => EXIT_OK,
        GenerationOutcome::NoImage | GenerationOutcome::Rejected(_) => EXIT_REJECTED,
        GenerationOutcome::Failed(GenerationError::CredentialInvalid(_)) => EXIT_CREDENTIAL,
        GenerationOutcome::Failed(_) => EXIT_FAILED,
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let config = EngineConfig::from_env()?;
    let store = credential_store(args.credentials, &config)?;
    let engine = build_engine(config, args.model.as_deref())?;
    let mut session = Session::new(
        Box::new(store),
        event_writer(args.events),
    );
    session.start()?;

    let inputs = [
        (InputSlot::Person, Some(args.person.as_str())),
        (InputSlot::Garment(GarmentSlot::Top), args.top.as_deref()),
        (
            InputSlot::Garment(GarmentSlot::Trousers),
            args.trousers.as_deref(),
        ),
    ];
    for (slot, raw) in inputs {
        let Some(raw) = raw else {
            continue;
        };
        let source = ImageSource::parse(raw);
        let image = match engine.adapter().load(&source) {
            Ok(image) => image,
            Err(err) => {
                if let InputError::Fetch(fetch) = &err {
                    fetch.record_attempts(session.events(), &source.describe());
                }
                bail!("{slot} ({}): {}", source.describe(), err.user_message());
            }
        };
        eprintln!("{slot}: {}", describe_image(&image));
        session.set_input(slot, image)?;
    }

    let outcome = session.generate(engine.editor());
    if let GenerationOutcome::Output = outcome {
        let written = session.save_output(&args.out)?;
        println!("{}", written.display());
    } else {
        eprintln!("{}", outcome.user_message().unwrap_or_default());
        if let GenerationOutcome::Failed(err) = &outcome {
            eprintln!("{}", err.detail());
        }
    }
    Ok(exit_code(&outcome))
}

fn run_fetch(args: FetchArgs) -> Result<i32> {
    let engine = build_engine(EngineConfig::from_env()?, None)?;
    let events = event_writer(args.events);
    let image = match engine.adapter().from_url(&args.url) {
        Ok(image) => image,
        Err(err) => {
            if let InputError::Fetch(fetch) = &err {
                fetch.record_attempts(&events, args.url.trim());
            }
            bail!("{}", err.user_message());
        }
    };
    let written = save_output(&image, &args.out)
        .with_context(|| format!("failed to save fetched image from {}", args.url.trim()))?;
    println!("{} ({})", written.display(), describe_image(&image));
    Ok(EXIT_OK)
}

fn run_key(args: KeyArgs) -> Result<i32> {
    let mut store = credential_store(args.credentials, &EngineConfig::from_env()?)?;
    match args.action {
        KeyAction::Set { value } => {
            let Some(credential) = Credential::parse(&value) else {
                bail!("API key cannot be empty");
            };
            store.save(&credential)?;
            println!("API key saved to {}", store.path().display());
        }
        KeyAction::Clear => {
            store.clear()?;
            println!("API key cleared from {}", store.path().display());
        }
        KeyAction::Status => match store.load()? {
            Some(credential) => println!("API key: {}", credential.masked()),
            None => println!("API key: not set"),
        },
    }
    Ok(EXIT_OK)
}
