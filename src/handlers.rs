//! The CLI commands and the table that registers them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::commands::{logged_in, Command, CommandResult, Commands, State};
use crate::db::{Database, User, UserPost};
use crate::error::{CommandError, StoreError};
use crate::fetcher::Fetcher;
use crate::ingest::Ingestor;
use crate::scheduler::Scheduler;

const DEFAULT_BROWSE_LIMIT: u32 = 2;

/// The full command table used by the binary.
pub fn default_commands() -> Commands {
    let mut commands = Commands::new();
    commands.register("login", |s, c| Box::pin(login(s, c)));
    commands.register("register", |s, c| Box::pin(register(s, c)));
    commands.register("reset", |s, c| Box::pin(reset(s, c)));
    commands.register("users", |s, c| Box::pin(users(s, c)));
    commands.register("agg", |s, c| Box::pin(agg(s, c)));
    commands.register("addfeed", logged_in(|s, c, u| Box::pin(add_feed(s, c, u))));
    commands.register("feeds", |s, c| Box::pin(feeds(s, c)));
    commands.register("follow", logged_in(|s, c, u| Box::pin(follow(s, c, u))));
    commands.register("following", logged_in(|s, c, u| Box::pin(following(s, c, u))));
    commands.register("unfollow", logged_in(|s, c, u| Box::pin(unfollow(s, c, u))));
    commands.register("browse", logged_in(|s, c, u| Box::pin(browse(s, c, u))));
    commands
}

fn exact_args<'c, const N: usize>(
    cmd: &'c Command,
    usage: &'static str,
) -> Result<[&'c str; N], CommandError> {
    if cmd.args.len() != N {
        return Err(CommandError::Usage(usage));
    }
    Ok(std::array::from_fn(|i| cmd.args[i].as_str()))
}

/// Turn a unique violation into a domain error, pass anything else through.
fn on_conflict(err: StoreError, conflict: impl FnOnce() -> CommandError) -> CommandError {
    if err.is_unique_violation() {
        conflict()
    } else {
        err.into()
    }
}

pub async fn login(state: &mut State, cmd: Command) -> CommandResult {
    let [name] = exact_args(&cmd, "login <username>")?;

    if state.db.get_user_by_name(name).await?.is_none() {
        return Err(CommandError::UserNotFound(name.to_string()));
    }

    state.config.set_current_user(name)?;
    println!("User '{}' has been set", name);
    Ok(())
}

pub async fn register(state: &mut State, cmd: Command) -> CommandResult {
    let [name] = exact_args(&cmd, "register <username>")?;

    if state.db.get_user_by_name(name).await?.is_some() {
        return Err(CommandError::UserExists(name.to_string()));
    }

    let user = state
        .db
        .create_user(name)
        .await
        .map_err(|e| on_conflict(e, || CommandError::UserExists(name.to_string())))?;
    debug!("Created user {:?}", user);

    state.config.set_current_user(&user.name)?;
    println!("User '{}' has been created", user.name);
    Ok(())
}

pub async fn reset(state: &mut State, cmd: Command) -> CommandResult {
    let [] = exact_args(&cmd, "reset")?;

    let deleted = state.db.delete_users().await?;
    info!("Reset removed {} users", deleted);
    println!("Reset complete, {} users deleted", deleted);
    Ok(())
}

pub async fn users(state: &mut State, cmd: Command) -> CommandResult {
    let [] = exact_args(&cmd, "users")?;

    let current = state.config.current_user_name.as_deref();
    for user in state.db.list_users().await? {
        if current == Some(user.name.as_str()) {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

/// Parse a duration such as `500ms`, `30s`, `1m30s` or `1.5h`. Must be positive.
pub fn parse_interval(raw: &str) -> Result<Duration, CommandError> {
    let invalid = |reason: String| CommandError::InvalidArgument {
        what: "interval",
        value: raw.to_string(),
        reason,
    };

    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(invalid("empty duration".to_string()));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut seconds = 0f64;
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid(format!("expected a number at '{}'", rest)));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid(format!("malformed number '{}'", &rest[..number_end])))?;
        rest = &rest[number_end..];

        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(invalid("missing unit".to_string())),
            unit => return Err(invalid(format!("unknown unit '{}'", unit))),
        };
        seconds += value * scale;
        rest = &rest[unit_end..];
    }

    if seconds <= 0.0 {
        return Err(invalid("must be positive".to_string()));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| invalid(e.to_string()))
}

pub fn build_scheduler(db: Arc<Database>, interval: Duration) -> Result<Scheduler, CommandError> {
    let fetcher = Fetcher::new()?;
    Ok(Scheduler::new(Ingestor::new(db, fetcher), interval))
}

/// Echoes the interval as the user wrote it.
fn collecting_banner(raw: &str) -> String {
    format!("Collecting feeds every {}", raw)
}

pub async fn agg(state: &mut State, cmd: Command) -> CommandResult {
    let [raw] = exact_args(&cmd, "agg <interval>")?;
    let interval = parse_interval(raw)?;

    let scheduler = build_scheduler(Arc::clone(&state.db), interval)?;
    println!("{}", collecting_banner(raw));
    scheduler.run_forever().await;
    Ok(())
}

pub async fn add_feed(state: &mut State, cmd: Command, user: User) -> CommandResult {
    let [name, url] = exact_args(&cmd, "addfeed <name> <url>")?;

    let feed = state
        .db
        .create_feed(name, url, user.id)
        .await
        .map_err(|e| on_conflict(e, || CommandError::FeedExists(url.to_string())))?;
    state.db.create_feed_follow(user.id, feed.id).await?;

    println!("Feed '{}' added", feed.name);
    println!("  URL:  {}", feed.url);
    println!("  ID:   {}", feed.id);
    println!("  User: {}", user.name);
    Ok(())
}

pub async fn feeds(state: &mut State, cmd: Command) -> CommandResult {
    let [] = exact_args(&cmd, "feeds")?;

    for feed in state.db.list_feeds().await? {
        println!("* {}", feed.name);
        println!("  URL:  {}", feed.url);
        println!("  User: {}", feed.user_name);
    }
    Ok(())
}

pub async fn follow(state: &mut State, cmd: Command, user: User) -> CommandResult {
    let [url] = exact_args(&cmd, "follow <url>")?;

    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| CommandError::FeedNotFound(url.to_string()))?;

    let follow = state
        .db
        .create_feed_follow(user.id, feed.id)
        .await
        .map_err(|e| on_conflict(e, || CommandError::AlreadyFollowing(url.to_string())))?;

    println!("{} now follows '{}'", follow.user_name, follow.feed_name);
    Ok(())
}

pub async fn following(state: &mut State, cmd: Command, user: User) -> CommandResult {
    let [] = exact_args(&cmd, "following")?;

    for follow in state.db.get_feed_follows_for_user(user.id).await? {
        println!("* {}", follow.feed_name);
    }
    Ok(())
}

pub async fn unfollow(state: &mut State, cmd: Command, user: User) -> CommandResult {
    let [url] = exact_args(&cmd, "unfollow <url>")?;

    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| CommandError::FeedNotFound(url.to_string()))?;

    if !state.db.delete_feed_follow(user.id, feed.id).await? {
        return Err(CommandError::NotFollowing(url.to_string()));
    }

    println!("{} unfollowed '{}'", user.name, feed.name);
    Ok(())
}

/// The posts `browse` shows, newest first. The limit defaults to two.
pub async fn select_posts(
    state: &State,
    cmd: &Command,
    user: &User,
) -> Result<Vec<UserPost>, CommandError> {
    let limit = match cmd.args.as_slice() {
        [] => DEFAULT_BROWSE_LIMIT,
        [raw] => raw
            .parse::<u32>()
            .map_err(|e| CommandError::InvalidArgument {
                what: "limit",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        _ => return Err(CommandError::Usage("browse [limit]")),
    };

    Ok(state
        .db
        .get_posts_for_user(user.id, i64::from(limit))
        .await?)
}

pub async fn browse(state: &mut State, cmd: Command, user: User) -> CommandResult {
    let posts = select_posts(state, &cmd, &user).await?;

    println!("Found {} posts for user {}:", posts.len(), user.name);
    for post in posts {
        let date = post
            .published_at
            .map(|d| d.format("%a %b %-d").to_string())
            .unwrap_or_else(|| "Undated".to_string());
        println!("{} from {}", date, post.feed_name);
        println!("--- {} ---", post.title.as_deref().unwrap_or("Untitled"));
        if let Some(description) = post.description.as_deref() {
            println!("    {}", description);
        }
        println!("Link: {}", post.url);
        println!("=====================================");
    }
    Ok(())
}
