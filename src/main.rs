use aegis::config::Config;
use aegis::installers::{is_elevated, privileges_notice};
use aegis::mapping_store::MappingStore;
use aegis::resolver::CommandResolver;
use aegis::ui::{OutputSink, Prompt, Reply, TerminalSink, stdin_prompt};
use clap::{Arg, Command};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "aegis> ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("aegis")
        .about("Command resolver that finds, installs and learns missing CLI tools")
        .long_about(
            "aegis checks whether a command exists, installs it through a known package \
             manager when it does not, and asks an assistant about commands it has never seen",
        )
        .arg(
            Arg::new("command")
                .help("Resolve this command once and exit")
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("set-api-key")
                .long("set-api-key")
                .help("Store the assistant API key in the config file")
                .value_name("API_KEY")
                .num_args(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Show configuration and mapping file information")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Handle configuration commands
    if let Some(api_key) = matches.get_one::<String>("set-api-key") {
        // Only the file's own settings are written back, never env overrides.
        let mut config = Config::load_from(&Config::get_config_path()?);
        config.set_api_key(api_key.clone())?;
        println!("✅ API key saved successfully");
        return Ok(());
    }

    let config = Config::load()?;

    if matches.get_flag("config") {
        let mappings_path = MappingStore::locate(&config)?;
        config.show_config_info(&mappings_path)?;
        return Ok(());
    }

    let sink: Arc<dyn OutputSink> = Arc::new(TerminalSink::new());
    if let Some(diagnostic) = config.diagnostic() {
        sink.emit(diagnostic);
    }
    if let Some(notice) = privileges_notice(is_elevated()) {
        sink.emit(notice);
    }

    let mut resolver = CommandResolver::from_config(config, Arc::clone(&sink))?;
    if let Some(diagnostic) = resolver.store().diagnostic() {
        sink.emit(diagnostic);
    }

    // Ctrl-C stops the running child, never the shell. The line editor
    // reports it while typing.
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
        }
    });
    let mut prompt = stdin_prompt();

    let command: Vec<String> = matches
        .get_many::<String>("command")
        .unwrap_or_default()
        .map(|s| s.to_string())
        .collect();

    if !command.is_empty() {
        let input = command.join(" ");
        let outcome = resolver.resolve(&input, prompt.as_mut()).await;
        info!("Resolved '{}': {:?}", input, outcome);
        return Ok(());
    }

    run_shell(&mut resolver, prompt.as_mut(), sink.as_ref()).await;
    Ok(())
}

async fn run_shell(resolver: &mut CommandResolver, prompt: &mut dyn Prompt, sink: &dyn OutputSink) {
    sink.emit("🛡️  Aegis shell. Type a command to run or install it, or 'exit' to quit.");

    loop {
        let line = match prompt.read(PROMPT) {
            Reply::Line(line) => line,
            Reply::Interrupted => continue,
            Reply::Closed => break,
        };
        if line.eq_ignore_ascii_case("exit") {
            sink.emit("👋 Goodbye");
            break;
        }
        let outcome = resolver.resolve(&line, prompt).await;
        info!("Resolved '{}': {:?}", line, outcome);
    }
}
