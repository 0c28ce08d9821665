pub mod client;
pub mod process;
pub mod stats;

use std::path::PathBuf;

use ansi_term::Colour;
use anyhow::Result;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        start_daemon,
        storage::entities::{Settings, SettingsPatch, Timer, TimerId, TimerType},
    },
    protocol::Request,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
        time::format_clock,
    },
    widget::run_surface,
};

use client::DaemonClient;
use process::{kill_previous_daemons, restart_daemon};
use stats::{process_export_command, process_stats_command, StatsCommand};

const DEFAULT_COLOR: &str = "#3498db";

#[derive(Parser, Debug)]
#[command(name = "Flowdeck", version, long_about = None)]
#[command(about = "Countdown timers with floating widgets and a session log", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {},
    #[command(
        about = "Run a daemon directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(
            long,
            help = "Control socket path. Defaults to flowdeck.sock in $XDG_RUNTIME_DIR"
        )]
        socket: Option<PathBuf>,
    },
    #[command(about = "Stop currently running daemon")]
    Shutdown {},
    #[command(about = "Create a new timer")]
    Add {
        label: String,
        #[arg(short, long, help = "Countdown length in minutes")]
        duration: u32,
        #[arg(
            long = "type",
            help = "Category of the timer. Defaults to the first configured type"
        )]
        kind: Option<String>,
        #[arg(long, help = "Widget color as #rrggbb. Defaults to the type's color")]
        color: Option<String>,
    },
    #[command(about = "Start a timer's countdown")]
    Start {
        #[arg(help = "Timer id or label")]
        timer: String,
    },
    #[command(about = "Stop a running timer without recording a session")]
    Stop {
        #[arg(help = "Timer id or label")]
        timer: String,
    },
    #[command(about = "Remove a timer")]
    Remove {
        #[arg(help = "Timer id or label")]
        timer: String,
    },
    #[command(about = "Pin a timer's floating widget to a position")]
    Move {
        #[arg(help = "Timer id or label")]
        timer: String,
        x: i32,
        y: i32,
    },
    #[command(about = "List all timers")]
    List {},
    #[command(about = "Mirror the floating widgets of running timers into this terminal")]
    Watch {},
    #[command(about = "Show or change settings")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    #[command(about = "Display a bar chart of completed sessions")]
    Stats {
        #[command(flatten)]
        command: StatsCommand,
    },
    #[command(about = "Export the session log as CSV")]
    Export {
        #[arg(short, long, help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommands {
    #[command(about = "Print current settings")]
    Show {},
    #[command(about = "Change one or more settings")]
    Set {
        #[arg(long, help = "Show floating widgets on the active surface")]
        show_floating: Option<bool>,
        #[arg(long, help = "Desktop notification when a timer finishes")]
        notifications: Option<bool>,
        #[arg(long, help = "Bell on the active surface when a timer finishes")]
        sound: Option<bool>,
        #[arg(long, help = "Bell volume, 0 to 1")]
        volume: Option<f64>,
    },
    #[command(about = "Add a timer type")]
    AddType { name: String, color: String },
    #[command(about = "Remove a timer type")]
    RemoveType { name: String },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(
        CLI_PREFIX,
        &create_application_default_path()?,
        logging_level,
        args.log,
    )?;

    match args.commands {
        Commands::Init {} => {
            restart_daemon()?;
            Ok(())
        }
        Commands::Shutdown {} => {
            let process_name = std::env::current_exe().expect("Can't operate without an executable");
            kill_previous_daemons(&process_name);
            Ok(())
        }
        Commands::Serve { dir, socket } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            start_daemon(dir, socket).await
        }
        Commands::Add {
            label,
            duration,
            kind,
            color,
        } => add_timer(label, duration, kind, color).await,
        Commands::Start { timer } => timer_op(timer, |id| Request::StartTimer { id }).await,
        Commands::Stop { timer } => timer_op(timer, |id| Request::StopTimer { id }).await,
        Commands::Remove { timer } => timer_op(timer, |id| Request::RemoveTimer { id }).await,
        Commands::Move { timer, x, y } => {
            timer_op(timer, move |id| Request::MoveTimer { id, x, y }).await
        }
        Commands::List {} => {
            let mut client = DaemonClient::connect().await?;
            print_timers(&client.timers(&Request::GetTimers).await);
            Ok(())
        }
        Commands::Watch {} => run_surface().await,
        Commands::Settings { command } => process_settings_command(command).await,
        Commands::Stats { command } => process_stats_command(command).await,
        Commands::Export { output } => process_export_command(output).await,
    }
}

async fn add_timer(
    label: String,
    duration: u32,
    kind: Option<String>,
    color: Option<String>,
) -> Result<()> {
    if duration == 0 {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "Duration must be at least 1 minute",
            )
            .into());
    }

    let mut client = DaemonClient::connect().await?;
    // The store takes whatever it's given; uniqueness is checked here, at
    // creation.
    let timers = client.timers(&Request::GetTimers).await;
    if timers.iter().any(|t| t.label == label) {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("A timer labeled {label:?} already exists"),
            )
            .into());
    }

    let settings = client
        .settings(&Request::GetSettings)
        .await
        .unwrap_or_default();
    let kind = kind
        .or_else(|| settings.timer_types.first().map(|t| t.name.clone()))
        .unwrap_or_default();
    let color = color
        .or_else(|| {
            settings
                .timer_types
                .iter()
                .find(|t| t.name == kind)
                .map(|t| t.color.clone())
        })
        .unwrap_or_else(|| DEFAULT_COLOR.into());

    let timer = Timer {
        id: Utc::now().timestamp_millis() as TimerId,
        label,
        kind,
        duration,
        running: false,
        color,
        end_time: None,
        x: None,
        y: None,
    };
    print_timers(&client.timers(&Request::AddTimer { timer }).await);
    Ok(())
}

async fn timer_op(timer: String, request: impl FnOnce(TimerId) -> Request) -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    let timers = client.timers(&Request::GetTimers).await;
    let Some(id) = resolve(&timers, &timer) else {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("No timer matches {timer:?}"),
            )
            .into());
    };
    print_timers(&client.timers(&request(id)).await);
    Ok(())
}

/// Timers can be referred to by id or by label; ids win on the off chance a
/// label is numeric.
fn resolve(timers: &[Timer], reference: &str) -> Option<TimerId> {
    if let Ok(id) = reference.parse::<TimerId>() {
        if timers.iter().any(|t| t.id == id) {
            return Some(id);
        }
    }
    timers.iter().find(|t| t.label == reference).map(|t| t.id)
}

fn print_timers(timers: &[Timer]) {
    if timers.is_empty() {
        println!("No timers.");
        return;
    }
    let now = Utc::now();
    for timer in timers {
        let (state, time) = if timer.running {
            (
                Colour::Green.paint("running").to_string(),
                format_clock(timer.remaining(now)),
            )
        } else {
            ("stopped".to_string(), format!("{}m", timer.duration))
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            timer.id, state, time, timer.label, timer.kind
        );
    }
}

async fn process_settings_command(command: SettingsCommands) -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    match command {
        SettingsCommands::Show {} => {
            let settings = client
                .settings(&Request::GetSettings)
                .await
                .unwrap_or_default();
            print_settings(&settings);
        }
        SettingsCommands::Set {
            show_floating,
            notifications,
            sound,
            volume,
        } => {
            let updates = SettingsPatch {
                timer_types: None,
                show_floating,
                enable_notifications: notifications,
                enable_sound: sound,
                volume,
            };
            let settings = client
                .settings(&Request::UpdateSettings { updates })
                .await
                .unwrap_or_default();
            print_settings(&settings);
        }
        SettingsCommands::AddType { name, color } => {
            let mut settings = client
                .settings(&Request::GetSettings)
                .await
                .unwrap_or_default();
            if settings.timer_types.iter().any(|t| t.name == name) {
                return Err(Args::command()
                    .error(
                        clap::error::ErrorKind::ValueValidation,
                        format!("A type named {name:?} already exists"),
                    )
                    .into());
            }
            settings.timer_types.push(TimerType { name, color });
            update_types(&mut client, settings.timer_types).await;
        }
        SettingsCommands::RemoveType { name } => {
            let mut settings = client
                .settings(&Request::GetSettings)
                .await
                .unwrap_or_default();
            settings.timer_types.retain(|t| t.name != name);
            update_types(&mut client, settings.timer_types).await;
        }
    }
    Ok(())
}

async fn update_types(client: &mut DaemonClient, timer_types: Vec<TimerType>) {
    let updates = SettingsPatch {
        timer_types: Some(timer_types),
        ..Default::default()
    };
    let settings = client
        .settings(&Request::UpdateSettings { updates })
        .await
        .unwrap_or_default();
    print_settings(&settings);
}

fn print_settings(settings: &Settings) {
    println!("show floating\t{}", settings.show_floating);
    println!("notifications\t{}", settings.enable_notifications);
    println!("sound\t{}", settings.enable_sound);
    println!("volume\t{}", settings.volume);
    println!("types:");
    for timer_type in &settings.timer_types {
        println!("  {}\t{}", timer_type.name, timer_type.color);
    }
}
