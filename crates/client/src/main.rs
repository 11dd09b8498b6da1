//! Headless command-line front end to the sync core.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use f15_client::clock::ClockFrame;
use f15_client::{
    format_elapsed, identity, ClientConfig, ConnectivityState, ListsProvider, LocalCache,
    Outcome, RemoteApi, RemoteClient, RemoteError, SessionContext, ShiftEngine,
    TaskTimerRegistry, TimerClock, TimerError,
};
use f15_core::{Session, TimerId, TimerSpec};

#[derive(Parser)]
#[command(name = "f15-client", version, about = "Frame 15 shift clock and task timers")]
struct Cli {
    /// Signed-in user
    #[arg(long, global = true, env = "F15_EMAIL")]
    email: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current shift
    Status,
    /// Clock in
    ClockIn,
    /// Clock out
    ClockOut,
    /// List running task timers
    Timers,
    /// Start a task timer
    StartTimer {
        label: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        non_billable: bool,
    },
    /// Stop a running task timer
    StopTimer { id: String },
    /// Show recent time log entries
    Log,
    /// Show reference lists (falls back to the cached copy)
    Lists,
    /// Check the signed-in email against the server policy
    Whoami,
    /// Probe the backend
    Ping,
    /// Print the backend version
    Version,
    /// Poll and show live clocks until interrupted
    Watch,
}

struct App {
    config: ClientConfig,
    session: SessionContext,
    remote: Arc<dyn RemoteApi>,
    cache: LocalCache,
    shift: Arc<ShiftEngine>,
    timers: Arc<TaskTimerRegistry>,
}

impl App {
    fn new(config: ClientConfig, email: Option<String>) -> Result<Self> {
        let session = SessionContext::new();
        if let Some(email) = email {
            session.sign_in(Session::new(email).context("invalid --email / F15_EMAIL")?);
        }

        let remote: Arc<dyn RemoteApi> = Arc::new(RemoteClient::new(&config, session.clone())?);
        let cache = LocalCache::new(config.cache.clone());
        let shift = Arc::new(ShiftEngine::new(remote.clone(), cache.clone(), session.clone()));
        let timers = Arc::new(TaskTimerRegistry::new(
            remote.clone(),
            cache.clone(),
            session.clone(),
        ));

        Ok(Self {
            config,
            session,
            remote,
            cache,
            shift,
            timers,
        })
    }

    fn require_session(&self) -> Result<Session> {
        self.session
            .current()
            .context("nobody is signed in: pass --email or set F15_EMAIL")
    }

    /// Load the shift from the server, falling back to the cache.
    async fn load_shift(&self) -> Result<()> {
        self.shift.restore_from_cache().await;
        match self.shift.refresh().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "showing last known shift state");
                Ok(())
            }
        }
    }

    async fn load_timers(&self) -> Result<()> {
        self.timers.restore_from_cache().await;
        match self.timers.refresh().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                tracing::warn!(error = %err, "showing last known timers");
                Ok(())
            }
        }
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => {
                self.require_session()?;
                self.load_shift().await?;
                print_shift(&self.shift);
            }
            Command::ClockIn => {
                self.require_session()?;
                self.load_shift().await?;
                if self.shift.start().await? == Outcome::Ignored {
                    println!("already clocked in");
                }
                print_shift(&self.shift);
            }
            Command::ClockOut => {
                self.require_session()?;
                self.load_shift().await?;
                if self.shift.stop().await? == Outcome::Ignored {
                    println!("not clocked in");
                }
                print_shift(&self.shift);
            }
            Command::Timers => {
                self.require_session()?;
                self.load_timers().await?;
                print_timers(&self.timers);
            }
            Command::StartTimer {
                label,
                project,
                non_billable,
            } => {
                self.require_session()?;
                let spec = TimerSpec::new(label, project)?.billable(!non_billable);
                let id = self.timers.start_timer(spec).await?;
                println!("started timer {id}");
            }
            Command::StopTimer { id } => {
                self.require_session()?;
                let id: TimerId = id.parse()?;
                self.load_timers().await?;
                match self.timers.stop_timer(&id).await? {
                    Outcome::Applied => println!("stopped timer {id}"),
                    Outcome::Ignored => println!("timer {id} is not running"),
                }
            }
            Command::Log => {
                self.require_session()?;
                self.timers.restore_from_cache().await;
                if let Err(err) = self.timers.refresh_time_log().await {
                    if err.is_fatal() {
                        return Err(err.into());
                    }
                    tracing::warn!(error = %err, "showing cached time log");
                }
                for entry in &self.timers.snapshot().recent {
                    println!(
                        "{}  {:<24} {:<10} {:>5} min",
                        entry.started_at.format("%Y-%m-%d %H:%M"),
                        entry.task,
                        entry.project_ref.as_deref().unwrap_or("-"),
                        entry.minutes
                    );
                }
            }
            Command::Lists => {
                let lists = ListsProvider::new(self.remote.clone(), self.cache.clone())
                    .load()
                    .await?;
                println!(
                    "{} projects, {} tasks, {} users",
                    lists.projects.len(),
                    lists.tasks.len(),
                    lists.users.len()
                );
            }
            Command::Whoami => {
                let session = self.require_session()?;
                let me = identity::whoami(self.remote.as_ref(), session.email()).await?;
                let verdict = if me.allowed { "allowed" } else { "not allowed" };
                println!("{} ({verdict})", me.email);
            }
            Command::Ping => match identity::ping(self.remote.as_ref()).await {
                ConnectivityState::Online => println!("online"),
                ConnectivityState::Offline => println!("offline"),
            },
            Command::Version => {
                println!("{}", identity::version(self.remote.as_ref()).await?);
            }
            Command::Watch => {
                self.require_session()?;
                self.watch().await?;
            }
        }
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        self.shift.restore_from_cache().await;
        self.timers.restore_from_cache().await;

        let shift_poll = self.shift.spawn_polling(self.config.poll_interval);
        let timer_poll = self.timers.spawn_polling(self.config.poll_interval);
        let clock = TimerClock::start(
            self.shift.subscribe(),
            self.timers.subscribe(),
            self.config.tick_interval,
        );
        let mut frames = clock.subscribe();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    print_frame(&frame, self.shift.snapshot().connectivity);
                }
            }
        }

        clock.stop().await;
        shift_poll.stop().await;
        timer_poll.stop().await;
        Ok(())
    }
}

fn print_shift(shift: &ShiftEngine) {
    let snap = shift.snapshot();
    match snap.state.active {
        Some(span) => println!(
            "clocked in since {}",
            span.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("clocked out"),
    }
    println!(
        "today {}  week {}",
        minutes(snap.state.today_minutes),
        minutes(snap.state.week_minutes)
    );
    if snap.connectivity == ConnectivityState::Offline {
        println!("offline: showing last known state");
    }
}

fn print_timers(timers: &TaskTimerRegistry) {
    let board = timers.snapshot();
    if board.timers.is_empty() {
        println!("no running timers");
    }
    for timer in &board.timers {
        let status = if timer.failed { " (failed to start)" } else { "" };
        println!(
            "{:<14} {:<24} {:<10} since {}{status}",
            timer.id.as_str(),
            timer.label,
            timer.project_ref.as_deref().unwrap_or("-"),
            timer.started_at.format("%H:%M")
        );
    }
}

fn print_frame(frame: &ClockFrame, connectivity: ConnectivityState) {
    let mut line = match frame.shift {
        Some(elapsed) => format!("shift {}", format_elapsed(elapsed)),
        None => "clocked out".to_string(),
    };
    for timer in &frame.timers {
        line.push_str(&format!("  | {} {}", timer.label, format_elapsed(timer.elapsed)));
    }
    if connectivity == ConnectivityState::Offline {
        line.push_str("  [offline]");
    }
    println!("{line}");
}

fn minutes(total: f64) -> String {
    format_elapsed(Duration::from_secs_f64(total.max(0.0) * 60.0))
}

/// Configuration errors get a persistent banner and a distinct exit code.
fn fatal_remote_error(err: &anyhow::Error) -> Option<&RemoteError> {
    let remote = err
        .downcast_ref::<RemoteError>()
        .or_else(|| err.downcast_ref::<TimerError>().map(TimerError::remote))?;
    remote.is_fatal().then_some(remote)
}

#[tokio::main]
async fn main() -> ExitCode {
    f15_observability::init();
    let cli = Cli::parse();

    let result = match App::new(ClientConfig::from_env(), cli.email) {
        Ok(app) => app.run(cli.command).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(fatal) = fatal_remote_error(&err) {
                eprintln!("*** {fatal} ***");
                eprintln!("set F15_API_URL and F15_API_KEY and try again");
                return ExitCode::from(2);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
