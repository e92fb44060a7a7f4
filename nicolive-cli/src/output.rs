use anyhow::Result;
use nicolive::CommentEvent;
use nicolive::vpos::vpos_to_offset;
use serde_json::json;

use crate::cli::OutputFormat;

/// Render one event in the selected format.
pub fn format_event(event: &CommentEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Pretty => Ok(format_pretty(event)),
        OutputFormat::Json => format_json(event),
    }
}

fn format_pretty(event: &CommentEvent) -> String {
    match event {
        CommentEvent::HandshakeAck(ack) if ack.is_success() => format!(
            "joined thread {} (last comment #{})",
            ack.thread, ack.last_res
        ),
        CommentEvent::HandshakeAck(ack) => format!(
            "thread {} refused the join (resultcode {})",
            ack.thread, ack.resultcode
        ),
        CommentEvent::Chat(chat) => {
            let offset = vpos_to_offset(chat.vpos);
            let secs = offset.num_seconds();
            let mut line = format!(
                "[{:02}:{:02}:{:02}] #{} {}: {}",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60,
                chat.no,
                chat.user_id,
                chat.content
            );
            if !chat.mail.is_empty() {
                line.push_str(&format!(" ({})", chat.mail));
            }
            line
        }
        CommentEvent::PostAck(ack) if ack.is_success() => format!("posted comment #{}", ack.no),
        CommentEvent::PostAck(ack) => format!("post rejected (status {})", ack.status),
        CommentEvent::DecodeError(e) => format!("error: {e}"),
    }
}

fn format_json(event: &CommentEvent) -> Result<String> {
    let value = match event {
        CommentEvent::HandshakeAck(ack) => json!({ "type": "handshake_ack", "data": ack }),
        CommentEvent::Chat(chat) => json!({
            "type": "chat",
            "timestamp": chat.timestamp(),
            "data": chat,
        }),
        CommentEvent::PostAck(ack) => json!({ "type": "post_ack", "data": ack }),
        CommentEvent::DecodeError(e) => json!({
            "type": "error",
            "message": e.to_string(),
            "terminal": e.is_terminal(),
        }),
    };
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nicolive::{Chat, DecodeError};

    fn chat() -> CommentEvent {
        CommentEvent::Chat(Chat {
            no: 7,
            vpos: 366_150,
            mail: "184".to_owned(),
            user_id: "abc".to_owned(),
            content: "hello".to_owned(),
            ..Chat::default()
        })
    }

    #[test]
    fn test_pretty_chat() {
        assert_eq!(
            format_event(&chat(), OutputFormat::Pretty).unwrap(),
            "[01:01:01] #7 abc: hello (184)"
        );
    }

    #[test]
    fn test_json_chat() {
        let line = format_event(&chat(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["data"]["no"], 7);
        assert_eq!(value["data"]["content"], "hello");
    }

    #[test]
    fn test_json_error() {
        let event = CommentEvent::DecodeError(DecodeError::PartialFrame { len: 3 });
        let line = format_event(&event, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["terminal"], true);
    }
}
