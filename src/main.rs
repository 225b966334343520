mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use helpline::cache::{KvStore, MemoryStore, SqliteStore};
use helpline::config::Config;
use helpline::support::{
  EntityId, HttpTransport, MessageDraft, Priority, SupportService, TicketDraft, TicketFilter, TicketStatus,
};

#[derive(Parser, Debug)]
#[command(name = "helpline")]
#[command(about = "Support tickets that keep working when the server does not")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/helpline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the local database (overrides the config file)
  #[arg(long)]
  store: Option<PathBuf>,

  /// Keep everything in memory; nothing survives the process
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List tickets
  Tickets {
    /// Only tickets in this status (open, in_progress, resolved, closed)
    #[arg(short, long)]
    status: Option<TicketStatus>,
    /// Only tickets with this priority (administrators)
    #[arg(short, long)]
    priority: Option<Priority>,
    /// Only tickets of this employee (administrators)
    #[arg(short, long)]
    employee: Option<u64>,
    /// Match title or description (administrators)
    #[arg(long)]
    search: Option<String>,
  },
  /// Show a ticket and its messages
  Show { id: EntityId },
  /// Open a new ticket
  New {
    title: String,
    description: String,
    #[arg(short, long, default_value = "medium")]
    priority: Priority,
    #[arg(short, long)]
    category: Option<String>,
  },
  /// Send a message on a ticket
  Send { ticket: EntityId, content: String },
  /// List writes waiting to be delivered
  Pending,
  /// Retry waiting writes now
  Retry {
    /// Retry only this entry
    local_id: Option<String>,
  },
  /// Keep a ticket open and report deliveries until interrupted
  Watch { id: EntityId },
  /// Change a ticket's status (administrators)
  Status { id: EntityId, status: TicketStatus },
  /// Assign a ticket to an administrator (administrators)
  Assign { id: EntityId, admin_id: u64 },
  /// Ticket counts (administrators)
  Stats,
}

impl Command {
  /// Commands that queue writes and should try to deliver them before exit.
  fn writes(&self) -> bool {
    matches!(self, Command::New { .. } | Command::Send { .. })
  }
}

fn open_store(args: &Args, config: &Config) -> Result<Arc<dyn KvStore>> {
  if args.ephemeral {
    return Ok(Arc::new(MemoryStore::new()));
  }
  let store = match args.store.as_ref().or(config.store.path.as_ref()) {
    Some(path) => SqliteStore::open(path),
    None => SqliteStore::open_default(),
  }
  .map_err(|e| eyre!("Failed to open local store: {}", e))?;
  Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = logging::init()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let token = Config::get_api_token()?;

  let transport = HttpTransport::new(&config.server.url, config.server.timeout())?;
  let store = open_store(&args, &config)?;
  let service = SupportService::init(config.sync, config.session(token), Arc::new(transport), store)?;

  let result = run(&service, &args.command).await;
  if args.command.writes() {
    let report = service.flush().await;
    println!("{}", output::format_report(&report));
  }
  service.dispose().await;
  result
}

async fn run(service: &SupportService, command: &Command) -> Result<()> {
  match command {
    Command::Tickets {
      status,
      priority,
      employee,
      search,
    } => {
      let filter = TicketFilter {
        status: *status,
        priority: *priority,
        employee: *employee,
        search: search.clone(),
      };
      let list = service.read_ticket_list(&filter).await;
      print!("{}", output::format_ticket_list(&list));
    }
    Command::Show { id } => {
      let (detail, messages) = futures::join!(service.read_ticket_detail(id), service.read_messages(id));
      print!("{}", output::format_ticket(&detail?));
      println!();
      print!("{}", output::format_messages(&messages?));
      let pending = service.pending(Some(id));
      if !pending.is_empty() {
        println!();
        print!("{}", output::format_pending(&pending, service.attempt_cap()));
      }
    }
    Command::New {
      title,
      description,
      priority,
      category,
    } => {
      let draft = TicketDraft::new(title.clone(), description.clone())
        .with_priority(*priority)
        .with_category(category.clone());
      let ticket = service.create_ticket(draft)?;
      println!("Ticket queued as {}", ticket.id);
    }
    Command::Send { ticket, content } => {
      let message = service.send_message(MessageDraft::new(ticket.clone(), content.clone()))?;
      println!("Message queued as {}", message.id);
    }
    Command::Pending => {
      print!(
        "{}",
        output::format_pending(&service.pending(None), service.attempt_cap())
      );
    }
    Command::Retry { local_id } => {
      let report = match local_id {
        Some(id) => service.retry_entry(id).await?,
        None => service.retry_pending().await?,
      };
      println!("{}", output::format_report(&report));
    }
    Command::Watch { id } => watch(service, id).await?,
    Command::Status { id, status } => {
      let ticket = service.change_status(id, *status).await?;
      println!("#{} is now {}", ticket.id, ticket.status);
    }
    Command::Assign { id, admin_id } => {
      let ticket = service.assign_ticket(id, *admin_id).await?;
      println!("#{} assigned to {} ({})", ticket.id, admin_id, ticket.status);
    }
    Command::Stats => {
      let stats = service.ticket_stats().await?;
      print!("{}", output::format_stats(&stats));
    }
  }
  Ok(())
}

async fn watch(service: &SupportService, id: &EntityId) -> Result<()> {
  let mut events = service.subscribe();
  let detail = service.read_ticket_detail(id).await?;
  print!("{}", output::format_ticket(&detail));

  service.open_ticket_view(id.clone());
  println!("Watching {} (Ctrl-C to stop)", id);

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.recv() => match event {
        Ok(event) => {
          if let Some(line) = output::format_event(&event) {
            println!("{}", line);
          }
        }
        Err(RecvError::Lagged(missed)) => {
          tracing::warn!(missed, "event stream lagged");
        }
        Err(RecvError::Closed) => break,
      },
    }
  }

  service.close_ticket_view();
  Ok(())
}
