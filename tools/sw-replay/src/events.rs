//! Replay script format: one JSON host event per line.

use anyhow::{Context, Result};
use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use serde_json::Value;
use trackside_net::{Request, RequestMode};
use trackside_sw::notification::NotificationInput;
use url::Url;

/// A scripted host event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    Install,
    Activate,
    Fetch {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        navigate: bool,
    },
    Sync {
        tag: String,
    },
    /// A string payload is sent as raw text, anything else as JSON.
    Push {
        #[serde(default)]
        payload: Option<Value>,
    },
    Click {
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        notification: NotificationInput,
    },
    Message {
        message: Value,
    },
    /// Seed an open window before routing clicks.
    OpenWindow {
        id: String,
        url: String,
    },
    /// Let timers (such as reminders) run.
    Wait {
        ms: u64,
    },
}

impl ReplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch { .. } => "fetch",
            Self::Sync { .. } => "sync",
            Self::Push { .. } => "push",
            Self::Click { .. } => "click",
            Self::Message { .. } => "message",
            Self::OpenWindow { .. } => "open_window",
            Self::Wait { .. } => "wait",
        }
    }
}

/// Parse a script. Blank lines and lines starting with `#` are skipped.
/// Returns each event with its 1-based line number.
pub fn parse_events(input: &str) -> Result<Vec<(usize, ReplayEvent)>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            let event = serde_json::from_str(line)
                .with_context(|| format!("line {}: invalid event", index + 1))?;
            Ok((index + 1, event))
        })
        .collect()
}

pub fn push_bytes(payload: Option<&Value>) -> Result<Option<Bytes>> {
    Ok(match payload {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(Bytes::from(text.clone())),
        Some(other) => Some(Bytes::from(serde_json::to_vec(other)?)),
    })
}

/// Build a request; relative URLs resolve against `origin`.
pub fn build_request(
    origin: &Url,
    url: &str,
    method: Option<&str>,
    navigate: bool,
) -> Result<Request> {
    let url = origin
        .join(url)
        .with_context(|| format!("invalid url {url}"))?;
    let mut request = Request::get(url);
    if let Some(method) = method {
        request.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid method {method}"))?;
    }
    if navigate {
        request = request.mode(RequestMode::Navigate);
    }
    Ok(request)
}
