mod api;
mod cache;
mod config;
mod entity;
mod error;
mod fetch;
mod host;
mod lifecycle;
mod routes;
mod store;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cache::{Request, ResponseSource, TierManager};
use config::Config;
use entity::Post;
use fetch::FetchHandler;
use host::{EventOutcome, HostEvent, LogClientSurface, Runtime, StdoutNotificationSurface};
use lifecycle::LifecycleManager;
use routes::{RouteTable, STATIC_TIER};
use store::DurableStore;
use sync::{DrainOutcome, SyncCoordinator, SYNC_POSTS_TAG};

#[derive(Parser, Debug)]
#[command(name = "feedmirror")]
#[command(about = "Offline-first cache and sync runtime for the feed app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/feedmirror/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the app shell into the static tier
  Install,
  /// Evict stale static tiers and take over open clients
  Activate,
  /// Fetch a URL through the offline-aware interceptor
  Fetch { url: String },
  /// Show the feed, from the network or the local mirror
  Feed,
  /// Create a post: queued durably, delivered when connectivity allows
  Post {
    #[arg(long)]
    title: String,
    #[arg(long)]
    location: String,
  },
  /// Host-driven sync opportunity: drain pending writes
  Sync {
    #[arg(default_value = SYNC_POSTS_TAG)]
    tag: String,
  },
  /// Deliver a push payload as a notification
  Push { payload: String },
  /// Simulate a notification interaction
  NotificationClick {
    /// Action identifier from the notification
    #[arg(long, default_value = "")]
    action: String,
    /// URL carried by the notification
    #[arg(long, default_value = "/")]
    open_url: String,
  },
  /// Pending writes and live cache tiers
  Status,
  /// Drop local state: the mirror and the pending queue
  Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _log_guard = init_tracing(&data_dir)?;

  // Components are built once here and passed around by handle
  let store = DurableStore::open(&data_dir)?;
  let tiers = TierManager::open(&data_dir)?;
  let routes = RouteTable::with_defaults(&config.collection_url());
  let fetch = FetchHandler::new(tiers.clone(), store.clone(), routes, &config.offline_url());
  let feed_api = api::FeedApi::new(&config.collection_url());
  let sync = SyncCoordinator::new(store.clone(), feed_api);
  let lifecycle = LifecycleManager::new(tiers.clone(), STATIC_TIER, config.precache_urls());
  let mut runtime = Runtime::new(
    store,
    tiers,
    fetch,
    sync,
    lifecycle,
    Arc::new(LogClientSurface),
    Arc::new(StdoutNotificationSurface),
  );

  match args.command {
    Command::Install => {
      runtime.dispatch(HostEvent::Install).await?;
      println!("Installed: app shell pre-cached into {}", STATIC_TIER);
    }
    Command::Activate => {
      if let EventOutcome::Activated { evicted } = runtime.dispatch(HostEvent::Activate).await? {
        if evicted.is_empty() {
          println!("Activated: no stale tiers to evict");
        } else {
          println!("Activated: evicted {}", evicted.join(", "));
        }
      }
    }
    Command::Fetch { url } => {
      if let EventOutcome::Fetched(fetched) = runtime.dispatch(HostEvent::Fetch(Request::get(&url))).await? {
        match &fetched.source {
          ResponseSource::Cache { tier } => println!("[cache:{}] {}", tier, fetched.response.status),
          ResponseSource::Network => println!("[network] {}", fetched.response.status),
          ResponseSource::OfflineFallback => println!("[offline fallback]"),
        }
        println!("{}", fetched.response.body_text());
      }
    }
    Command::Feed => {
      let request = Request::get(&config.collection_url());
      match runtime.dispatch(HostEvent::Fetch(request)).await {
        Ok(EventOutcome::Fetched(fetched))
          if matches!(fetched.source, ResponseSource::Network) =>
        {
          let body: api::CollectionBody = fetched.response.json()?;
          print_posts(&body.posts);
        }
        Ok(_) => {
          println!("(offline: showing the local mirror)");
          print_posts(&runtime.mirrored_posts()?);
        }
        Err(e) if e.is_transport() => {
          println!("(offline: showing the local mirror)");
          print_posts(&runtime.mirrored_posts()?);
        }
        Err(e) => return Err(e.into()),
      }
    }
    Command::Post { title, location } => {
      let post = Post::create(&title, &location)?;
      runtime.queue_post(&post)?;
      println!("Post {} queued", post.id);

      // Already online? The host grants the sync opportunity right away
      let event = HostEvent::Sync {
        tag: SYNC_POSTS_TAG.to_string(),
      };
      if let EventOutcome::Synced(outcome) = runtime.dispatch(event).await? {
        print_drain_outcome(&outcome);
      }
    }
    Command::Sync { tag } => {
      if let EventOutcome::Synced(outcome) = runtime.dispatch(HostEvent::Sync { tag }).await? {
        print_drain_outcome(&outcome);
      }
    }
    Command::Push { payload } => {
      if let EventOutcome::Notified(notification) = runtime.dispatch(HostEvent::Push { payload }).await? {
        tracing::info!(
          title = %notification.title,
          open_url = %notification.open_url,
          "push notification displayed"
        );
      }
    }
    Command::NotificationClick { action, open_url } => {
      runtime
        .dispatch(HostEvent::NotificationClick { action, open_url })
        .await?;
    }
    Command::Status => {
      println!("pending writes: {}", runtime.pending_count()?);
      let tiers = runtime.tier_summary()?;
      if tiers.is_empty() {
        println!("cache tiers: none");
      } else {
        println!("cache tiers:");
        for (name, count) in tiers {
          println!("  {:<16} {} entries", name, count);
        }
      }
    }
    Command::Reset => {
      runtime.clear_local_state()?;
      println!("Local mirror and pending queue cleared");
    }
  }

  Ok(())
}

fn print_posts(posts: &[Post]) {
  if posts.is_empty() {
    println!("No posts yet");
    return;
  }
  for post in posts {
    println!("  {}  [{}]", post.title, post.location);
  }
}

fn print_drain_outcome(outcome: &DrainOutcome) {
  match outcome {
    DrainOutcome::Empty => println!("Nothing to sync"),
    DrainOutcome::Delivered { count } => println!("Delivered {} pending post(s)", count),
    DrainOutcome::Retained { count, reason } => {
      println!("Kept {} pending post(s): {}", count, reason)
    }
    DrainOutcome::IgnoredTag => println!("Unknown sync tag"),
  }
}

/// Log to a daily file under the data directory, keeping stdout for command
/// output.
fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "feedmirror.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedmirror=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
