//! Tale: a narrated adventure played in the terminal.
//!
//! A line-oriented front end for the engine. Narration streams to stdout,
//! logs go to stderr.
//!
//! ```bash
//! cargo run -p tale -- --name "Mira Vale" --race half-elf --class rogue
//! cargo run -p tale -- --list
//! cargo run -p tale -- --load <save-id>
//! ```

mod headless;

use headless::{run_headless, ConsoleUi};
use tale_core::persist::SaveInfo;
use tale_core::{
    CharacterInfo, GameProvider, JsonFileStore, RuleBook, SaveStore, Session, SessionConfig,
    TurnMachine,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// What the command line asked for.
#[derive(Debug, Default)]
struct Args {
    name: Option<String>,
    race: Option<String>,
    class: Option<String>,
    gender: Option<String>,
    background: Option<String>,
    description: Option<String>,
    hook: Option<usize>,
    load: Option<String>,
    list: bool,
    help: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tale=info,tale_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let raw: Vec<String> = std::env::args().collect();
    let args = parse_args(&raw);
    if args.help {
        print_help();
        return Ok(());
    }

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Set TALE_API_KEY in a .env file, or run a local server with TALE_PROVIDER=local.");
            std::process::exit(1);
        }
    };
    let store = JsonFileStore::new(config.save_dir.clone());

    if args.list {
        print_saves(&store.list().await?);
        return Ok(());
    }

    let mut provider = GameProvider::from_config(&config.provider);
    let ui = ConsoleUi::new();

    if let Some(id) = &args.load {
        let id: Uuid = id.parse()?;
        let saved = store.load(id).await?;
        let session = Session::from_saved(saved);
        println!("[LOADED] {} at {}", session.character.name, session.player.location);

        let machine = TurnMachine::new(provider, session, config)
            .with_ui(ui)
            .with_store(store)
            .resumed();
        run_headless(machine, None).await;
        return Ok(());
    }

    let character = character_from_args(&args);
    println!("Creating {}...", character.name);
    let session = Session::create(&mut provider, character, &config, &RuleBook::standard()).await?;

    let hook = pick_hook(&session.story_hooks, args.hook);
    let machine = TurnMachine::new(provider, session, config)
        .with_ui(ui)
        .with_store(store);
    run_headless(machine, Some(hook)).await;
    Ok(())
}

fn parse_args(args: &[String]) -> Args {
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        let slot = match args[i].as_str() {
            "--name" => &mut parsed.name,
            "--race" => &mut parsed.race,
            "--class" => &mut parsed.class,
            "--gender" => &mut parsed.gender,
            "--background" => &mut parsed.background,
            "--description" => &mut parsed.description,
            "--load" => &mut parsed.load,
            "--hook" => {
                parsed.hook = value.and_then(|v| v.parse::<usize>().ok());
                i += 2;
                continue;
            }
            "--list" => {
                parsed.list = true;
                i += 1;
                continue;
            }
            "--help" | "-h" => {
                parsed.help = true;
                i += 1;
                continue;
            }
            other => {
                eprintln!("Ignoring unknown argument: {other}");
                i += 1;
                continue;
            }
        };
        *slot = value;
        i += 2;
    }

    parsed
}

fn character_from_args(args: &Args) -> CharacterInfo {
    let mut character = CharacterInfo::new(
        args.name.as_deref().unwrap_or("Adventurer"),
        args.race.as_deref().unwrap_or("Human"),
        args.class.as_deref().unwrap_or("Fighter"),
    );
    if let Some(gender) = &args.gender {
        character = character.with_gender(gender);
    }
    if let Some(background) = &args.background {
        character = character.with_background(background);
    }
    if let Some(description) = &args.description {
        character = character.with_description(description);
    }
    character
}

/// The hook numbered `choice` (1-based), or the first one.
fn pick_hook(hooks: &[String], choice: Option<usize>) -> String {
    if !hooks.is_empty() {
        println!("Story hooks:");
        for (i, hook) in hooks.iter().enumerate() {
            println!("  {}. {hook}", i + 1);
        }
    }
    let index = choice.unwrap_or(1).saturating_sub(1);
    hooks
        .get(index)
        .or_else(|| hooks.first())
        .cloned()
        .unwrap_or_else(|| "The adventure begins.".to_string())
}

fn print_saves(saves: &[SaveInfo]) {
    if saves.is_empty() {
        println!("No saved games.");
        return;
    }
    for save in saves {
        println!(
            "{}  {} (level {}) at {}, saved {}",
            save.id, save.character_name, save.level, save.location, save.saved_at
        );
    }
}

fn print_help() {
    println!("Tale - a narrated adventure in the terminal");
    println!();
    println!("Usage: tale [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --name <name>          Character name (default: Adventurer)");
    println!("  --race <race>          Character race (default: Human)");
    println!("  --class <class>        Character class (default: Fighter)");
    println!("  --gender <gender>      Character gender");
    println!("  --background <bg>      Character background");
    println!("  --description <text>   Free-form description for sheet generation");
    println!("  --hook <n>             Start with story hook number n");
    println!("  --load <id>            Resume a saved game");
    println!("  --list                 List saved games");
    println!("  -h, --help             Show this help message");
    println!();
    println!("Environment:");
    println!("  TALE_PROVIDER          hosted (default) or local");
    println!("  TALE_API_KEY           API key for the hosted provider");
    println!("  TALE_MODELS            Comma-separated model ids, in fallback order");
    println!("  TALE_LOCAL_URL         Chat-completions URL of a local server");
    println!("  TALE_MATURE            Enable mature content (1 or true)");
    println!("  TALE_SAVE_DIR          Where saves are written (default: saves)");
    println!("  RUST_LOG               Log filter (default: tale=info,tale_core=info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("tale")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_character_args() {
        let parsed = parse_args(&args(&["--name", "Mira Vale", "--class", "Rogue", "--hook", "2"]));
        assert_eq!(parsed.name.as_deref(), Some("Mira Vale"));
        assert_eq!(parsed.class.as_deref(), Some("Rogue"));
        assert_eq!(parsed.hook, Some(2));
        assert!(!parsed.list);
    }

    #[test]
    fn test_parse_flags() {
        let parsed = parse_args(&args(&["--list", "--load", "abc"]));
        assert!(parsed.list);
        assert_eq!(parsed.load.as_deref(), Some("abc"));
    }

    #[test]
    fn test_pick_hook_falls_back_to_first() {
        let hooks = vec!["one".to_string(), "two".to_string()];
        assert_eq!(pick_hook(&hooks, Some(2)), "two");
        assert_eq!(pick_hook(&hooks, Some(9)), "one");
        assert_eq!(pick_hook(&[], None), "The adventure begins.");
    }
}
