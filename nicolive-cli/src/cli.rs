use std::time::Duration;

use clap::{Parser, ValueEnum};
use nicolive::{CommentColor, CommentPosition, CommentSize};

#[derive(Parser, Debug)]
#[command(
    name = "nicolive",
    version,
    about = "Watch and post to niconico live comment threads",
    long_about = None
)]
pub struct Args {
    /// Live id (lv123...) or watch page URL; resolved through the player status API
    #[arg(value_name = "LIVE", required_unless_present = "host")]
    pub live: Option<String>,

    /// Comment server host, bypassing the player status lookup
    #[arg(long, requires_all = ["port", "thread"], conflicts_with = "live")]
    pub host: Option<String>,

    /// Comment server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Comment thread id
    #[arg(long, allow_hyphen_values = true)]
    pub thread: Option<i64>,

    /// Value of the `user_session` cookie, needed to look up and post to broadcasts
    #[arg(long, env = "NICOLIVE_USER_SESSION", hide_env_values = true)]
    pub user_session: Option<String>,

    /// Where to start in the thread's history (negative: that many past comments)
    #[arg(long, default_value_t = -100, allow_hyphen_values = true)]
    pub res_from: i64,

    /// Post each line read from stdin as a comment
    #[arg(long)]
    pub post: bool,

    /// Post anonymously
    #[arg(long)]
    pub anonymous: bool,

    #[arg(long, value_enum)]
    pub color: Option<CommentColor>,

    #[arg(long, value_enum)]
    pub size: Option<CommentSize>,

    #[arg(long, value_enum)]
    pub position: Option<CommentPosition>,

    /// Output format for events
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Seconds without data before the connection is considered dead
    #[arg(long, value_parser = parse_seconds)]
    pub read_timeout: Option<Duration>,

    /// Base URL of the live site API
    #[arg(long, default_value = nicolive::api::DEFAULT_LIVE_BASE_URL)]
    pub api_base_url: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid number of seconds: {e}"))
}
