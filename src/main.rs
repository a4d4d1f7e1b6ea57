use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use llm_llama_cpp::completion::{CompletionAdapter, CompletionOptions, LlamaEngine};
use llm_llama_cpp::config::{Config, PluginPaths};
use llm_llama_cpp::models::{HttpFetcher, ModelEntry, ModelManager, ModelSpec};
use llm_llama_cpp::LlamaCppError;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llm-llama-cpp")]
#[command(about = "Register llama.cpp GGUF models and run prompts against them", long_about = None)]
struct Cli {
    /// Configuration root (defaults to $LLM_USER_PATH, then the config file, then the platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and register a model from a URL
    DownloadModel {
        url: String,
        #[command(flatten)]
        register: RegisterArgs,
    },
    /// Register a GGUF model you have already downloaded
    AddModel {
        path: PathBuf,
        #[command(flatten)]
        register: RegisterArgs,
    },
    /// List registered models
    Models {
        /// Print the raw registry document
        #[arg(long)]
        json: bool,
    },
    /// Display the path to the models.json file
    ModelsFile,
    /// Display the path to the directory holding downloaded models
    ModelsDir,
    /// Unregister a model (the file stays on disk)
    RemoveModel {
        /// Model id or alias
        model: String,
    },
    /// Manage model aliases
    Aliases {
        #[command(subcommand)]
        command: AliasCommands,
    },
    /// Run a prompt against a registered model
    Prompt(PromptArgs),
}

#[derive(Args)]
struct RegisterArgs {
    /// Alias(es) to register the model under
    #[arg(short = 'a', long = "alias", value_name = "NAME")]
    aliases: Vec<String>,
    /// Model id (defaults to the file name without extension)
    #[arg(long)]
    id: Option<String>,
    /// Mark as using the Llama 2 chat prompt format
    #[arg(long, alias = "llama2-chat")]
    chat_mode: bool,
}

impl RegisterArgs {
    fn into_spec(self) -> ModelSpec {
        ModelSpec {
            id: self.id,
            aliases: self.aliases,
            chat_mode: self.chat_mode,
        }
    }
}

#[derive(Subcommand)]
enum AliasCommands {
    /// Point an alias at a model
    Set {
        alias: String,
        /// Model id or existing alias
        model: String,
    },
    /// Remove an alias
    Remove { alias: String },
    /// List all aliases
    List,
}

#[derive(Args)]
struct PromptArgs {
    /// Model id or alias
    #[arg(short, long)]
    model: String,
    /// Prompt text (read from stdin when omitted)
    prompt: Option<String>,
    /// System prompt for chat-mode models
    #[arg(short, long)]
    system: Option<String>,
    /// Show llama.cpp diagnostic output
    #[arg(short, long)]
    verbose: bool,
    #[arg(long)]
    max_tokens: Option<usize>,
    /// Run entirely on the CPU
    #[arg(long)]
    no_gpu: bool,
    #[arg(long)]
    n_gpu_layers: Option<u32>,
    #[arg(long)]
    n_ctx: Option<u32>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<LlamaCppError>()
            .map_or(1, LlamaCppError::exit_code);
        std::process::exit(code);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let paths = PluginPaths::resolve(cli.root, &config)?;
    tracing::debug!("Configuration root: {}", paths.root().display());
    let manager = ModelManager::new(paths);

    match cli.command {
        Commands::DownloadModel { url, register } => {
            let fetcher = HttpFetcher::new(&config.download)?;
            let entry = manager
                .download_model(&fetcher, &url, &register.into_spec())
                .await?;
            eprintln!("Downloaded model to {}", entry.path.display());
            print_entry(&entry);
        }
        Commands::AddModel { path, register } => {
            if !path.is_file() {
                return Err(LlamaCppError::InvalidInput(format!(
                    "File does not exist: {}",
                    path.display()
                ))
                .into());
            }
            let path = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            let entry = manager.add_model(&path, &register.into_spec())?;
            print_entry(&entry);
        }
        Commands::Models { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&manager.registry()?)?);
            } else {
                let models = manager.list_models()?;
                if models.is_empty() {
                    println!("No models registered. Add one with: llm-llama-cpp add-model <path>");
                }
                for entry in &models {
                    print_entry(entry);
                }
            }
        }
        Commands::ModelsFile => println!("{}", manager.models_file().display()),
        Commands::ModelsDir => println!("{}", manager.models_directory()?.display()),
        Commands::RemoveModel { model } => {
            let removed = manager.remove_model(&model)?;
            println!("Removed '{}' (file kept at {})", removed.id, removed.path.display());
        }
        Commands::Aliases { command } => match command {
            AliasCommands::Set { alias, model } => {
                let entry = manager.set_alias(&alias, &model)?;
                println!("{alias} -> {}", entry.id);
            }
            AliasCommands::Remove { alias } => {
                let entry = manager.remove_alias(&alias)?;
                println!("Removed alias '{alias}' from '{}'", entry.id);
            }
            AliasCommands::List => {
                for entry in manager.list_models()? {
                    for alias in &entry.aliases {
                        println!("{alias}: {}", entry.id);
                    }
                }
            }
        },
        Commands::Prompt(args) => run_prompt(&manager, &config, args)?,
    }

    Ok(())
}

fn run_prompt(manager: &ModelManager, config: &Config, args: PromptArgs) -> anyhow::Result<()> {
    let entry = manager.resolve(&args.model)?;

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None if !std::io::stdin().is_terminal() => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read prompt from stdin")?;
            buf
        }
        None => {
            return Err(LlamaCppError::InvalidInput(
                "No prompt given. Pass it as an argument or on stdin".to_string(),
            )
            .into())
        }
    };

    let defaults = CompletionOptions::from(&config.prompt);
    let options = CompletionOptions {
        verbose: args.verbose,
        max_tokens: args.max_tokens.unwrap_or(defaults.max_tokens),
        no_gpu: args.no_gpu,
        n_gpu_layers: args.n_gpu_layers.unwrap_or(defaults.n_gpu_layers),
        n_ctx: args.n_ctx.unwrap_or(defaults.n_ctx),
        system: args.system,
    };

    let adapter = CompletionAdapter::new(LlamaEngine::new());
    let completion = adapter.run(&entry, &prompt, &options)?;

    let mut stdout = std::io::stdout().lock();
    for fragment in completion {
        let fragment = fragment?;
        if let Err(e) = stdout
            .write_all(fragment.as_bytes())
            .and_then(|()| stdout.flush())
        {
            // Reader went away; dropping the completion stops generation
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e.into());
        }
    }
    writeln!(stdout)?;

    Ok(())
}

fn print_entry(entry: &ModelEntry) {
    println!("{}", entry.id);
    println!("  path: {}", entry.path.display());
    if !entry.aliases.is_empty() {
        println!("  aliases: {}", entry.aliases.join(", "));
    }
    if entry.chat_mode {
        println!("  chat mode: llama2");
    }
}
