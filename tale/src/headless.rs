//! Line-oriented play loop and console rendering.
//!
//! The protocol:
//! - Plain lines are player messages
//! - Lines starting with `#` are commands (choose, reroll, regen, status, quit)
//! - Output lines tagged `[ROLL]`, `[CHOICE]`, `[ERROR]` carry game mechanics;
//!   everything else is narration

use std::io::{self, BufRead, Write};
use std::sync::Mutex;
use tale_core::collab::{RenderTarget, ResponseStatus, UiSink};
use tale_core::tags::stable_prefix;
use tale_core::{ActionChoice, Provider, RollOutcome, TurnError, TurnMachine, TurnState};

#[derive(Default)]
struct Printed {
    /// Latest full display text of the current response.
    latest: String,
    /// How much of it has been written to stdout.
    printed: String,
}

/// Streams narration to stdout as it stabilizes.
///
/// Only text before an unclosed `[` is printed, so a half-typed tag never
/// reaches the terminal.
#[derive(Default)]
pub struct ConsoleUi {
    current: Mutex<Printed>,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_printed(&self, f: impl FnOnce(&mut Printed)) {
        let mut printed = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut printed);
        io::stdout().flush().ok();
    }
}

/// Write whatever part of `visible` has not been printed yet.
fn print_growth(state: &mut Printed, visible: &str) {
    if !visible.starts_with(state.printed.as_str()) {
        // A fallback attempt restarted the response.
        println!();
        state.printed.clear();
    }
    print!("{}", &visible[state.printed.len()..]);
    state.printed = visible.to_string();
}

impl UiSink for ConsoleUi {
    fn state_changed(&self, state: &TurnState) {
        tracing::debug!(%state, "state");
    }

    fn begin_response(&self, _target: RenderTarget) {
        self.with_printed(|p| {
            *p = Printed::default();
            println!();
        });
    }

    fn update_response(&self, _target: RenderTarget, display_text: &str) {
        self.with_printed(|p| {
            p.latest = display_text.to_string();
            print_growth(p, stable_prefix(display_text));
        });
    }

    fn finish_response(&self, _target: RenderTarget, status: ResponseStatus) {
        self.with_printed(|p| {
            match status {
                ResponseStatus::Complete => {
                    let latest = std::mem::take(&mut p.latest);
                    print_growth(p, &latest);
                    println!();
                }
                ResponseStatus::Errored => println!(" [interrupted]"),
            }
            println!();
        });
    }

    fn show_roll(&self, outcome: &RollOutcome) {
        println!("[ROLL] {outcome}");
    }

    fn show_choices(&self, choices: &[ActionChoice]) {
        for (i, choice) in choices.iter().enumerate() {
            println!("[CHOICE] {}. {choice}", i + 1);
        }
        println!("Type #choose <n> to act.");
    }

    fn show_controls(&self) {
        print!("> ");
        io::stdout().flush().ok();
    }

    fn show_error(&self, message: &str) {
        println!("[ERROR] {message}");
    }
}

/// Play until stdin closes or the player quits.
///
/// With `opening`, the adventure is started from that story hook first.
pub async fn run_headless<P: Provider>(mut machine: TurnMachine<P>, opening: Option<String>) {
    let session = machine.session();
    println!("=== {} ===", session.character.name);
    println!(
        "{} {}, level {}",
        session.character.race, session.character.class, session.player.level
    );
    println!("Type #help for commands.");

    match opening {
        Some(hook) => report(machine.start_adventure(&hook).await),
        None => {
            if let Some(last) = machine.session().transcript.last() {
                println!();
                println!("{}", tale_core::sanitize_for_display(&last.text));
            }
            print!("> ");
            io::stdout().flush().ok();
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(command) = line.strip_prefix('#') else {
            report(machine.submit_message(line).await);
            continue;
        };

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.first().copied() {
            Some("quit") | Some("exit") => {
                println!("Goodbye!");
                break;
            }
            Some("choose") => match parts.get(1).and_then(|n| n.parse::<usize>().ok()) {
                Some(n) if n >= 1 => report(machine.select_choice(n - 1).await),
                _ => println!("[ERROR] Usage: #choose <n>"),
            },
            Some("reroll") => report(machine.reroll_last_check().await),
            Some("regen") => report(machine.regenerate_last_response().await),
            Some("status") => print_status(&machine),
            Some("help") => print_commands(),
            _ => println!("[ERROR] Unknown command. Type #help for help."),
        }
    }
}

/// Provider failures were already shown by the sink; report the rest.
fn report(result: Result<(), TurnError>) {
    match result {
        Ok(()) | Err(TurnError::Provider(_)) => {}
        Err(e) => {
            println!("[ERROR] {e}");
            print!("> ");
            io::stdout().flush().ok();
        }
    }
}

fn print_status<P: Provider>(machine: &TurnMachine<P>) {
    let session = machine.session();
    let player = &session.player;
    println!("[STATUS]");
    println!(
        "  Character: {} ({} {})",
        session.character.name, session.character.race, session.character.class
    );
    println!("  Location: {}", player.location);
    println!("  HP: {}/{}  AC: {}", player.health.current, player.health.max, player.armor_class);
    println!("  Level: {}  XP: {}", player.level, player.experience);
    if !player.inventory.is_empty() {
        println!("  Inventory: {}", player.inventory.join(", "));
    }
    println!("  Turns: {}", player.turn_count);
    println!("  Provider: {}", machine.provider().name());
    println!("  State: {}", machine.state());
    if let Some(outcome) = machine.last_outcome() {
        println!("  Last roll: {outcome}");
    }
    print!("> ");
    io::stdout().flush().ok();
}

fn print_commands() {
    println!("[HELP]");
    println!("  #choose <n>  - Take the numbered action on offer");
    println!("  #reroll      - Roll the last check again");
    println!("  #regen       - Ask for a different last response");
    println!("  #status      - Show your character");
    println!("  #quit        - Exit the game");
    println!("  #help        - Show this help");
    println!("  (anything else is sent as your action)");
    print!("> ");
    io::stdout().flush().ok();
}
