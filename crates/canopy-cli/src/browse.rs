//! Line-oriented browser over the navigation controller.

use anyhow::Result;
use canopy_client::{ExplorerClient, HttpExplorerClient, NavigationController, Session};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- profiles - Reload and list the configured profiles.
- use [NAME|NUMBER] - Select a profile and open its root compartment.
- cd [NUMBER] - Open a child compartment of the current one.
- back (..) - Go up one level.
- up [DEPTH] - Jump to a breadcrumb (0 is the root).
- ls - Show the current compartment again.
- refresh - Reload the current compartment.
- close - Deselect the profile.
- help (h) - Show this help.
- quit (q) - Exit.
"#;
    text.trim().to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Profiles,
    Use(String),
    Cd(usize),
    Back,
    Up(usize),
    List,
    Refresh,
    Close,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    let arg = parts.next();

    let index = |arg: Option<&str>| arg.and_then(|value| value.parse::<usize>().ok());
    let command = match (verb, arg) {
        ("profiles", _) => Command::Profiles,
        ("use", Some(name)) => Command::Use(name.to_string()),
        ("cd", _) => match index(arg) {
            Some(n) => Command::Cd(n),
            None => Command::Unknown(line.to_string()),
        },
        ("back", _) | ("..", _) => Command::Back,
        ("up", None) => Command::Up(0),
        ("up", Some(_)) => match index(arg) {
            Some(depth) => Command::Up(depth),
            None => Command::Unknown(line.to_string()),
        },
        ("ls", _) => Command::List,
        ("refresh", _) => Command::Refresh,
        ("close", _) => Command::Close,
        ("help", _) | ("h", _) => Command::Help,
        ("quit", _) | ("q", _) | ("exit", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

fn render(session: &Session) {
    if let Some(error) = &session.error {
        println!("! {}", error);
    }

    let Some(profile) = &session.selected_profile else {
        println!("No profile selected. Profiles:");
        for (i, name) in session.profiles.iter().enumerate() {
            println!("  ({}) {}", i + 1, name);
        }
        return;
    };

    println!("[{}] {}", profile, session.breadcrumbs().join(" / "));
    println!("Compartments:");
    if session.compartments.is_empty() {
        println!("  (none)");
    }
    for (i, compartment) in session.compartments.iter().enumerate() {
        println!("  ({}) {}  {}", i + 1, compartment.name, compartment.id);
    }

    println!("Policies:");
    if session.policies.is_empty() {
        println!("  (none)");
    }
    for policy in &session.policies {
        println!("  - {}: {}", policy.name, policy.description);
        for statement in &policy.statements {
            println!("      {}", statement);
        }
    }
}

pub async fn run(server_url: &str) -> Result<()> {
    let client = Arc::new(HttpExplorerClient::new(server_url));
    if let Err(e) = client.health_check().await {
        println!("Server at {} is not reachable: {}", server_url, e);
    }

    let mut nav = NavigationController::new(client);
    nav.load_profiles().await;
    render(nav.session());
    println!("Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Profiles => nav.load_profiles().await,
            Command::Use(name) => {
                let profiles = &nav.session().profiles;
                let name = name
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| profiles.get(n.wrapping_sub(1)).cloned())
                    .unwrap_or(name);
                nav.select_profile(&name).await;
            }
            Command::Cd(n) => {
                let node = nav.session().compartments.get(n.wrapping_sub(1)).cloned();
                match node {
                    Some(node) => nav.drill_down(&node).await,
                    None => {
                        println!("No compartment numbered {}", n);
                        continue;
                    }
                }
            }
            Command::Back => nav.back().await,
            Command::Up(depth) => nav.back_to(depth).await,
            Command::List => {}
            Command::Refresh => nav.refresh().await,
            Command::Close => nav.deselect_profile(),
            Command::Help => {
                println!("{}", help_text());
                continue;
            }
            Command::Quit => break,
            Command::Unknown(input) => {
                println!("Unknown command: {}", input);
                continue;
            }
        }

        render(nav.session());
    }

    Ok(())
}
