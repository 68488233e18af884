use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use serde_json::{Map, Value};

const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing session token; run `afk-cli login` and set AFK_SESSION_TOKEN")]
    MissingSessionToken,
    #[error("server did not return a session cookie")]
    MissingCookie,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned {status}: {message}")]
    ServerError { status: String, message: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid macro sequence: {0}")]
    Sequence(#[from] sequence::SequenceError),
}

#[derive(Parser, Debug)]
#[command(name = "afk-cli", about = "AFK Deck API CLI")]
struct Cli {
    #[arg(long, env = "AFK_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "AFK_SESSION_TOKEN")]
    session_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    session_token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// Exchange the passkey for a session token.
    Login {
        #[arg(long, env = "AFK_PASSKEY")]
        passkey: String,
    },
    Logout,
    /// Show or switch the active view.
    View {
        #[arg(value_parser = ["DASHBOARD", "CHAT", "ANALYZER", "MACROS", "SETTINGS"])]
        view: Option<String>,
    },
    Logs,
    Macro(MacroCommand),
    Dashboard(DashboardCommand),
    Chat(ChatCommand),
    Analyzer(AnalyzerCommand),
    Modules(ModulesCommand),
    Settings(SettingsCommand),
    /// Render a saved sequence file as AppleScript without a server.
    Export {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MacroCommand {
    #[command(subcommand)]
    command: MacroSubcommand,
}

#[derive(Subcommand, Debug)]
enum MacroSubcommand {
    Show,
    Start {
        #[arg(long)]
        width: Option<f64>,
        #[arg(long)]
        height: Option<f64>,
    },
    Stop,
    /// Feed one pointer signal to the running capture.
    Event {
        #[arg(value_enum)]
        kind: PointerKind,
        x: f64,
        y: f64,
    },
    Key {
        key: String,
    },
    Reset,
    Play,
    Save,
    Load,
    Export,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PointerKind {
    Move,
    Click,
}

#[derive(Args, Debug)]
struct DashboardCommand {
    #[command(subcommand)]
    command: DashboardSubcommand,
}

#[derive(Subcommand, Debug)]
enum DashboardSubcommand {
    Status,
    Toggle,
    UseMacro {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    CaptureEnded,
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[command(subcommand)]
    command: ChatSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChatSubcommand {
    List,
    Send {
        text: String,
        #[arg(long, default_value_t = false)]
        live_frame: bool,
    },
}

#[derive(Args, Debug)]
struct AnalyzerCommand {
    #[command(subcommand)]
    command: AnalyzerSubcommand,
}

#[derive(Subcommand, Debug)]
enum AnalyzerSubcommand {
    Status,
    Upload {
        file: PathBuf,
        #[arg(long, help = "Override the guessed MIME type")]
        mime_type: Option<String>,
    },
    Live,
    Analyze,
}

#[derive(Args, Debug)]
struct ModulesCommand {
    #[command(subcommand)]
    command: ModulesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ModulesSubcommand {
    List,
    Toggle { id: String },
}

#[derive(Args, Debug)]
struct SettingsCommand {
    #[command(subcommand)]
    command: SettingsSubcommand,
}

#[derive(Subcommand, Debug)]
enum SettingsSubcommand {
    Get,
    Set {
        #[arg(long)]
        weapon_target: Option<String>,
        #[arg(long, help = "Jump interval in milliseconds")]
        jump_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, session_token: cli.session_token };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Login { passkey } => run_login(&ctx, &passkey).await,
        Command::Logout => request_and_print(&ctx, reqwest::Method::POST, "/api/logout", None).await,
        Command::View { view } => match view {
            Some(view) => {
                let body = serde_json::json!({ "view": view });
                request_and_print(&ctx, reqwest::Method::PUT, "/api/view", Some(body)).await
            }
            None => request_and_print(&ctx, reqwest::Method::GET, "/api/view", None).await,
        },
        Command::Logs => request_and_print(&ctx, reqwest::Method::GET, "/api/logs", None).await,
        Command::Macro(command) => run_macro(&ctx, command).await,
        Command::Dashboard(command) => run_dashboard(&ctx, command).await,
        Command::Chat(command) => run_chat(&ctx, command).await,
        Command::Analyzer(command) => run_analyzer(&ctx, command).await,
        Command::Modules(command) => run_modules(&ctx, command).await,
        Command::Settings(command) => run_settings(&ctx, command).await,
        Command::Export { file } => run_export(&file),
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let response = client.get(url(cli, "/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            status: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_login(cli: &CliContext, passkey: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let response = client
        .post(url(cli, "/api/login"))
        .json(&serde_json::json!({ "passkey": passkey }))
        .send()
        .await?;
    let status = response.status();
    let token = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session_from_set_cookie);
    let body = response.json::<Value>().await.unwrap_or(Value::Null);

    if let Some(steps) = body.get("steps").and_then(Value::as_array) {
        for step in steps.iter().filter_map(Value::as_str) {
            eprintln!("{step}");
        }
    }
    if !status.is_success() {
        return Err(CliError::ServerError {
            status: format!("HTTP {}", status.as_u16()),
            message: body.get("message").and_then(Value::as_str).unwrap_or("login failed").to_owned(),
        });
    }

    let token = token.ok_or(CliError::MissingCookie)?;
    println!("{token}");
    Ok(())
}

async fn run_macro(cli: &CliContext, command: MacroCommand) -> Result<(), CliError> {
    use reqwest::Method;
    match command.command {
        MacroSubcommand::Show => request_and_print(cli, Method::GET, "/api/macro", None).await,
        MacroSubcommand::Start { width, height } => {
            let body = match (width, height) {
                (Some(width), Some(height)) => Some(serde_json::json!({ "width": width, "height": height })),
                _ => None,
            };
            request_and_print(cli, Method::POST, "/api/macro/start", body).await
        }
        MacroSubcommand::Stop => request_and_print(cli, Method::POST, "/api/macro/stop", None).await,
        MacroSubcommand::Event { kind, x, y } => {
            let body = pointer_signal(kind, x, y)?;
            request_and_print(cli, Method::POST, "/api/macro/event", Some(body)).await
        }
        MacroSubcommand::Key { key } => {
            let body = serde_json::json!({ "key": key });
            request_and_print(cli, Method::POST, "/api/macro/key", Some(body)).await
        }
        MacroSubcommand::Reset => request_and_print(cli, Method::POST, "/api/macro/reset", None).await,
        MacroSubcommand::Play => request_and_print(cli, Method::POST, "/api/macro/play", None).await,
        MacroSubcommand::Save => request_and_print(cli, Method::POST, "/api/macro/save", None).await,
        MacroSubcommand::Load => request_and_print(cli, Method::POST, "/api/macro/load", None).await,
        MacroSubcommand::Export => {
            let response = authed_client(cli)?.get(url(cli, "/api/macro/export")).send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(CliError::ServerError { status: format!("HTTP {}", status.as_u16()), message: text });
            }
            print!("{text}");
            Ok(())
        }
    }
}

async fn run_dashboard(cli: &CliContext, command: DashboardCommand) -> Result<(), CliError> {
    use reqwest::Method;
    match command.command {
        DashboardSubcommand::Status => request_and_print(cli, Method::GET, "/api/dashboard", None).await,
        DashboardSubcommand::Toggle => request_and_print(cli, Method::POST, "/api/dashboard/toggle", None).await,
        DashboardSubcommand::UseMacro { enabled } => {
            let body = serde_json::json!({ "enabled": enabled });
            request_and_print(cli, Method::POST, "/api/dashboard/use-macro", Some(body)).await
        }
        DashboardSubcommand::CaptureEnded => {
            request_and_print(cli, Method::POST, "/api/dashboard/capture-ended", None).await
        }
    }
}

async fn run_chat(cli: &CliContext, command: ChatCommand) -> Result<(), CliError> {
    match command.command {
        ChatSubcommand::List => request_and_print(cli, reqwest::Method::GET, "/api/chat", None).await,
        ChatSubcommand::Send { text, live_frame } => {
            let body = serde_json::json!({ "text": text, "attachLiveFrame": live_frame });
            let json = api_request(cli, reqwest::Method::POST, "/api/chat", Some(body)).await?;
            for message in json.as_array().into_iter().flatten() {
                let role = message.get("role").and_then(Value::as_str).unwrap_or("?");
                let text = message.get("text").and_then(Value::as_str).unwrap_or_default();
                println!("[{role}] {text}");
            }
            Ok(())
        }
    }
}

async fn run_analyzer(cli: &CliContext, command: AnalyzerCommand) -> Result<(), CliError> {
    use reqwest::Method;
    match command.command {
        AnalyzerSubcommand::Status => request_and_print(cli, Method::GET, "/api/analyzer", None).await,
        AnalyzerSubcommand::Upload { file, mime_type } => {
            let bytes = tokio::fs::read(&file).await?;
            let mime_type = mime_type.unwrap_or_else(|| guess_mime(&file).to_owned());
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_owned();
            let response = authed_client(cli)?
                .post(url(cli, "/api/analyzer/upload"))
                .query(&[("name", name)])
                .header(reqwest::header::CONTENT_TYPE, mime_type)
                .body(bytes)
                .send()
                .await?;
            print_json(&read_json(response).await?)
        }
        AnalyzerSubcommand::Live => request_and_print(cli, Method::POST, "/api/analyzer/live", None).await,
        AnalyzerSubcommand::Analyze => {
            let json = api_request(cli, Method::POST, "/api/analyzer/analyze", None).await?;
            println!("{}", json.get("text").and_then(Value::as_str).unwrap_or_default());
            Ok(())
        }
    }
}

async fn run_modules(cli: &CliContext, command: ModulesCommand) -> Result<(), CliError> {
    match command.command {
        ModulesSubcommand::List => request_and_print(cli, reqwest::Method::GET, "/api/modules", None).await,
        ModulesSubcommand::Toggle { id } => {
            let path = format!("/api/modules/{id}/toggle");
            request_and_print(cli, reqwest::Method::POST, &path, None).await
        }
    }
}

async fn run_settings(cli: &CliContext, command: SettingsCommand) -> Result<(), CliError> {
    match command.command {
        SettingsSubcommand::Get => request_and_print(cli, reqwest::Method::GET, "/api/settings", None).await,
        SettingsSubcommand::Set { weapon_target, jump_interval } => {
            // PUT replaces the whole record, so merge over the current values.
            let mut body = match api_request(cli, reqwest::Method::GET, "/api/settings", None).await? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            if let Some(weapon_target) = weapon_target {
                body.insert("weaponTarget".to_owned(), Value::String(weapon_target));
            }
            if let Some(jump_interval) = jump_interval {
                body.insert("jumpInterval".to_owned(), Value::from(jump_interval));
            }
            request_and_print(cli, reqwest::Method::PUT, "/api/settings", Some(Value::Object(body))).await
        }
    }
}

fn run_export(file: &std::path::Path) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(file)?;
    let actions = sequence::decode_sequence(&raw)?;
    print!("{}", sequence::to_applescript(&actions));
    Ok(())
}

fn url(cli: &CliContext, path: &str) -> String {
    format!("{}{}", cli.base_url.trim_end_matches('/'), path)
}

fn authed_client(cli: &CliContext) -> Result<reqwest::Client, CliError> {
    let session_token = cli.session_token.as_deref().ok_or(CliError::MissingSessionToken)?;

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&format!("{SESSION_COOKIE}={session_token}"))?);

    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}

async fn api_request(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<Value, CliError> {
    let client = authed_client(cli)?;
    let request = client.request(method, url(cli, path));
    let request = if let Some(json) = body { request.json(&json) } else { request };
    read_json(request.send().await?).await
}

async fn read_json(response: reqwest::Response) -> Result<Value, CliError> {
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned);
        return Err(CliError::ServerError { status: format!("HTTP {}", status.as_u16()), message });
    }

    Ok(value)
}

async fn request_and_print(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<(), CliError> {
    let json = api_request(cli, method, path, body).await?;
    print_json(&json)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    if value.is_null() {
        return Ok(());
    }
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn pointer_signal(kind: PointerKind, x: f64, y: f64) -> Result<Value, CliError> {
    let signal = match kind {
        PointerKind::Move => sequence::CaptureSignal::Move { x, y },
        PointerKind::Click => sequence::CaptureSignal::Click { x, y },
    };
    Ok(serde_json::to_value(signal)?)
}

fn session_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_owned())
}

fn guess_mime(file: &std::path::Path) -> &'static str {
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_read_from_set_cookie() {
        let header = "session_token=abc123; HttpOnly; SameSite=Lax; Path=/";
        assert_eq!(session_from_set_cookie(header).as_deref(), Some("abc123"));
        assert_eq!(session_from_set_cookie("session_token=; Max-Age=0"), None);
        assert_eq!(session_from_set_cookie("other=1"), None);
    }

    #[test]
    fn pointer_signal_matches_event_payload() {
        let body = pointer_signal(PointerKind::Click, 4.0, 8.0).unwrap();
        assert_eq!(body, serde_json::json!({ "type": "CLICK", "x": 4.0, "y": 8.0 }));
        let body = pointer_signal(PointerKind::Move, 1.5, 2.0).unwrap();
        assert_eq!(body["type"], "MOVE");
    }

    #[test]
    fn event_subcommand_parses_kind_and_position() {
        let cli = Cli::try_parse_from(["afk-cli", "macro", "event", "click", "10", "20"]).unwrap();
        let Command::Macro(MacroCommand { command: MacroSubcommand::Event { kind, x, y } }) = cli.command else {
            panic!("expected macro event");
        };
        assert_eq!(kind, PointerKind::Click);
        assert_eq!((x, y), (10.0, 20.0));
    }

    #[test]
    fn mime_guess_follows_extension() {
        assert_eq!(guess_mime(std::path::Path::new("shot.PNG")), "image/png");
        assert_eq!(guess_mime(std::path::Path::new("clip.mp4")), "video/mp4");
        assert_eq!(guess_mime(std::path::Path::new("notes")), "application/octet-stream");
    }
}
