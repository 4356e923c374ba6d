//! Line-oriented front end: stdin commands in, now-playing, commentary and
//! connection notices out.

use std::io::Write;

use chrono::Local;
use radio_proto::protocol::{
    HistoryEntry, NextUpEntry, NowPlayingSnapshot, SharedSnapshot, StationId,
};
use radio_sync::{CommentaryPhase, CommentaryState, ConnectionEvent, LiveHandle};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

pub const HELP: &str = "\
commands:
  station <id>   switch the active station
  stations       list known stations
  next           upcoming tracks on the active station
  history        recent plays on the active station
  status         connection and now-playing summary
  connect        reconnect now (also after the connection was lost)
  disconnect     close the push channel
  quit           exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Station(StationId),
    Stations,
    NextUp,
    History,
    Status,
    Connect,
    Disconnect,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_line(line: &str) -> Input {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Input::Empty;
    };
    match (command.to_ascii_lowercase().as_str(), words.next()) {
        ("station" | "s", Some(id)) => Input::Station(StationId::from(id)),
        ("stations" | "ls", _) => Input::Stations,
        ("next" | "n", _) => Input::NextUp,
        ("history" | "h", _) => Input::History,
        ("status", _) => Input::Status,
        ("connect" | "c", _) => Input::Connect,
        ("disconnect", _) => Input::Disconnect,
        ("help" | "?", _) => Input::Help,
        ("quit" | "exit" | "q", _) => Input::Quit,
        _ => Input::Unknown(line.trim().to_string()),
    }
}

pub fn format_now_playing(station: &StationId, snapshot: Option<&NowPlayingSnapshot>) -> String {
    let Some(snapshot) = snapshot else {
        return format!("[{}] nothing cached yet", station);
    };
    let track = snapshot
        .track
        .as_ref()
        .map(|t| t.display())
        .unwrap_or_else(|| "unknown track".to_string());
    let state = if snapshot.is_playing { "▶" } else { "⏸" };
    match snapshot.progress {
        Some(p) => format!(
            "[{}] {} {}  {:.0}%",
            station,
            state,
            track,
            p.fraction() * 100.0
        ),
        None => format!("[{}] {} {}", station, state, track),
    }
}

pub fn format_next_up(entries: &[NextUpEntry]) -> String {
    if entries.is_empty() {
        return "  (queue empty)".to_string();
    }
    entries
        .iter()
        .map(|e| format!("  {:>2}. {}", e.position, e.track.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "  (no plays yet)".to_string();
    }
    entries
        .iter()
        .map(|e| {
            let at = e
                .play
                .started_at
                .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            let marker = if e.commentary.is_some() { " 🎙" } else { "" };
            format!("  {}  {}{}", at, e.track.display(), marker)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `None` for events that are not worth telling the listener about.
pub fn format_connection_event(event: &ConnectionEvent) -> Option<String> {
    match event {
        ConnectionEvent::Connected { reconnected: true } => {
            Some("* live updates restored".into())
        }
        ConnectionEvent::Connected { reconnected: false } => {
            Some("* live updates connected".into())
        }
        ConnectionEvent::ReconnectScheduled { attempt, delay } => Some(format!(
            "* connection dropped, retry {} in {:.1}s",
            attempt,
            delay.as_secs_f64()
        )),
        ConnectionEvent::ConnectionLost => {
            Some("* connection lost. Type `connect` to retry.".into())
        }
        ConnectionEvent::StateChanged { .. } => None,
    }
}

/// How much of the current transcript is already on screen.
#[derive(Debug, Default)]
struct CommentaryPrinter {
    printed: usize,
    cycle: u64,
}

impl CommentaryPrinter {
    /// Text to write for a commentary update.  Updates can be coalesced, so a
    /// stream from a new cycle is printed whole rather than from the old
    /// offset.
    fn render(&mut self, state: &CommentaryState) -> Option<String> {
        let text = &state.buffer.text;
        let same_cycle = self.printed > 0 && state.cycle == self.cycle;
        // an unfinished line from an abandoned stream needs terminating
        let prefix = if self.printed > 0 && !same_cycle { "\n" } else { "" };
        self.cycle = state.cycle;

        match state.phase {
            CommentaryPhase::Idle => {
                let out = (self.printed > 0).then(|| "\n".to_string());
                self.printed = 0;
                out
            }
            CommentaryPhase::Streaming => {
                let out = match text.get(self.printed..) {
                    Some(tail) if same_cycle => tail.to_string(),
                    _ => format!("{}🎙 {}", prefix, text),
                };
                self.printed = text.len();
                Some(out)
            }
            CommentaryPhase::Ready => {
                let out = if same_cycle {
                    "\n".to_string()
                } else {
                    format!("{}🎙 {}\n", prefix, text)
                };
                self.printed = 0;
                Some(out)
            }
        }
    }
}

/// Receivers the presenter follows, detached from the handle so the handle
/// can still be shut down by value.
pub struct Feeds {
    active: watch::Receiver<StationId>,
    current: watch::Receiver<Option<SharedSnapshot>>,
    commentary: watch::Receiver<CommentaryState>,
    events: broadcast::Receiver<ConnectionEvent>,
}

impl Feeds {
    pub fn from_handle(handle: &LiveHandle) -> Self {
        Self {
            active: handle.watch_active_station(),
            current: handle.watch_current(),
            commentary: handle.watch_commentary(),
            events: handle.subscribe_events(),
        }
    }
}

/// Print every change of the live projections until cancelled.
pub async fn present(mut feeds: Feeds, cancel: CancellationToken) {
    let mut printer = CommentaryPrinter::default();
    let snapshot = feeds.current.borrow_and_update().clone();
    let active = feeds.active.borrow().clone();
    println!("{}", format_now_playing(&active, snapshot.as_deref()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = feeds.current.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = feeds.current.borrow_and_update().clone();
                let active = feeds.active.borrow().clone();
                println!("{}", format_now_playing(&active, snapshot.as_deref()));
            }
            changed = feeds.commentary.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = feeds.commentary.borrow_and_update().clone();
                if let Some(out) = printer.render(&state) {
                    print!("{}", out);
                    let _ = std::io::stdout().flush();
                }
            }
            event = feeds.events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = format_connection_event(&event) {
                        println!("{} {}", Local::now().format("%H:%M:%S"), line);
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_proto::protocol::{PlayRef, Progress, TrackRef};
    use std::time::Duration;

    fn track(title: &str) -> TrackRef {
        TrackRef {
            id: None,
            title: title.to_string(),
            artist: "Miles Davis".to_string(),
            album: None,
            duration_seconds: None,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("station jazz"), Input::Station(StationId::from("jazz")));
        assert_eq!(parse_line("  S   rock "), Input::Station(StationId::from("rock")));
        assert_eq!(parse_line("next"), Input::NextUp);
        assert_eq!(parse_line("Quit"), Input::Quit);
        assert_eq!(parse_line("   "), Input::Empty);
        assert_eq!(parse_line("station"), Input::Unknown("station".into()));
        assert_eq!(parse_line("dance"), Input::Unknown("dance".into()));
    }

    #[test]
    fn test_now_playing_line() {
        let station = StationId::from("jazz");
        assert_eq!(format_now_playing(&station, None), "[jazz] nothing cached yet");

        let snapshot = NowPlayingSnapshot {
            is_playing: true,
            track: Some(track("So What")),
            play: None,
            progress: Some(Progress {
                elapsed_seconds: 30.0,
                total_seconds: 120.0,
            }),
        };
        assert_eq!(
            format_now_playing(&station, Some(&snapshot)),
            "[jazz] ▶ Miles Davis - So What  25%"
        );
    }

    #[test]
    fn test_lists() {
        assert_eq!(format_next_up(&[]), "  (queue empty)");
        let next = [NextUpEntry {
            position: 1,
            track: track("Freddie Freeloader"),
        }];
        assert_eq!(format_next_up(&next), "   1. Miles Davis - Freddie Freeloader");

        let history = [HistoryEntry {
            play: PlayRef {
                id: 1,
                started_at: None,
                has_commentary: true,
            },
            track: track("Blue in Green"),
            commentary: Some("...".into()),
        }];
        assert_eq!(format_history(&history), "  --:--  Miles Davis - Blue in Green 🎙");
    }

    fn commentary(phase: CommentaryPhase, text: &str, cycle: u64) -> CommentaryState {
        CommentaryState {
            phase,
            buffer: radio_sync::CommentaryBuffer {
                text: text.to_string(),
                is_streaming: phase == CommentaryPhase::Streaming,
            },
            cycle,
        }
    }

    #[test]
    fn test_streamed_commentary_prints_only_the_new_tail() {
        let mut printer = CommentaryPrinter::default();
        let out = printer.render(&commentary(CommentaryPhase::Streaming, "Up next", 1));
        assert_eq!(out.as_deref(), Some("🎙 Up next"));
        let out = printer.render(&commentary(CommentaryPhase::Streaming, "Up next, Miles", 1));
        assert_eq!(out.as_deref(), Some(", Miles"));
        let out = printer.render(&commentary(CommentaryPhase::Ready, "Up next, Miles", 1));
        assert_eq!(out.as_deref(), Some("\n"));
    }

    #[test]
    fn test_new_stream_after_missed_ready_prints_whole() {
        let mut printer = CommentaryPrinter::default();
        printer.render(&commentary(CommentaryPhase::Streaming, "abc", 1));

        // ready for "abc" and the first tokens of the next stream arrive as one update
        let out = printer.render(&commentary(CommentaryPhase::Streaming, "Hello world", 2));
        assert_eq!(out.as_deref(), Some("\n🎙 Hello world"));
        let out = printer.render(&commentary(CommentaryPhase::Streaming, "Hello world!", 2));
        assert_eq!(out.as_deref(), Some("!"));
    }

    #[test]
    fn test_ready_without_tokens_prints_transcript() {
        let mut printer = CommentaryPrinter::default();
        let out = printer.render(&commentary(CommentaryPhase::Ready, "A quiet one.", 0));
        assert_eq!(out.as_deref(), Some("🎙 A quiet one.\n"));
        assert_eq!(printer.render(&commentary(CommentaryPhase::Idle, "", 0)), None);
    }

    #[test]
    fn test_connection_notices() {
        let opened = ConnectionEvent::StateChanged {
            from: radio_sync::ConnectionState::Connecting,
            to: radio_sync::ConnectionState::Open,
        };
        assert_eq!(format_connection_event(&opened), None);
        assert_eq!(
            format_connection_event(&ConnectionEvent::ReconnectScheduled {
                attempt: 2,
                delay: Duration::from_millis(2000),
            })
            .as_deref(),
            Some("* connection dropped, retry 2 in 2.0s")
        );
        assert!(format_connection_event(&ConnectionEvent::ConnectionLost)
            .unwrap()
            .contains("connect"));
    }
}
