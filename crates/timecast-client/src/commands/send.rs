//! Commands that talk to a running daemon.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use timecast_core::to_unix_seconds;
use timecast_protocol::{Delivery, FireAt, Payload, Request, Response, ServerInfo};

use crate::error::{ClientError, ClientResult};
use crate::socket::{ServerClient, into_success};

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Short human-readable lines.
    Text,
    /// One JSON document per message.
    Json,
}

/// Print server identity and statistics.
pub async fn info(client: &ServerClient, output: OutputMode) -> ClientResult<()> {
    let response = into_success(client.send(&Request::Info).await?)?;
    match response {
        Response::Info { ref info } => {
            print_message(output, &response, || render_info(info));
            Ok(())
        }
        other => Err(unexpected("info", &other)),
    }
}

/// Check that the server answers.
pub async fn ping(client: &ServerClient, output: OutputMode) -> ClientResult<()> {
    let response = into_success(client.send(&Request::Ping).await?)?;
    print_message(output, &response, || format!("pong from {}", client.address()));
    Ok(())
}

/// Publish a payload to every current subscriber of `channel`.
pub async fn publish(
    client: &ServerClient,
    channel: &str,
    payload: &str,
    output: OutputMode,
) -> ClientResult<()> {
    let request = Request::publish(channel, parse_payload(payload)?);
    let response = into_success(client.send(&request).await?)?;
    match response {
        Response::Publish {
            ref channel,
            delivered,
        } => {
            print_message(output, &response, || {
                format!("published to {channel} ({delivered} subscriber(s))")
            });
            Ok(())
        }
        other => Err(unexpected("publish", &other)),
    }
}

/// Schedule a payload for delivery on `channel` at `fire_at`.
pub async fn schedule(
    client: &ServerClient,
    fire_at: FireAt,
    channel: &str,
    payload: &str,
    output: OutputMode,
) -> ClientResult<()> {
    let request = Request::add_time_event(fire_at, channel, parse_payload(payload)?);
    let response = into_success(client.send(&request).await?)?;
    match response {
        Response::AddTimeEvent {
            ref event_id,
            fire_at,
        } => {
            print_message(output, &response, || {
                format!("scheduled {event_id} on {channel} at {}", fire_at.to_rfc3339())
            });
            Ok(())
        }
        other => Err(unexpected("add_time_event", &other)),
    }
}

/// Subscribe to `channels` and print deliveries as they arrive.
///
/// Stops after `count` deliveries, when the server closes the connection,
/// or on Ctrl-C.
pub async fn listen(
    client: &ServerClient,
    channels: &[String],
    count: Option<usize>,
    output: OutputMode,
) -> ClientResult<()> {
    let mut connection = client.connect().await?;
    for channel in channels {
        into_success(connection.request(&Request::subscribe(channel.as_str())).await?)?;
    }
    let response = into_success(connection.request(&Request::Listen).await?)?;
    debug!(?response, "listening");
    if output == OutputMode::Text
        && let Response::Listen { channels } = &response
    {
        eprintln!("listening on {}", channels.join(", "));
    }

    let mut received = 0usize;
    while count.is_none_or(|limit| received < limit) {
        let delivery = tokio::select! {
            delivery = connection.next_delivery() => delivery?,
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        };
        let Some(delivery) = delivery else {
            eprintln!("server closed the connection");
            break;
        };
        print_message(output, &delivery, || render_delivery(&delivery));
        received += 1;
    }

    Ok(())
}

/// Parses a JSON object given on the command line.
pub fn parse_payload(text: &str) -> ClientResult<Payload> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ClientError::invalid_input(format!(
            "payload must be a JSON object, got {other}"
        ))),
        Err(e) => Err(ClientError::invalid_input(format!(
            "payload is not valid JSON: {e}"
        ))),
    }
}

/// Builds a fire time from `--at` or `--in`.
///
/// `--at` takes UNIX seconds, RFC 3339, or a naive datetime read in the
/// server's timezone. `--in` is a delay in seconds from now.
pub fn parse_fire_at(at: Option<&str>, delay: Option<f64>) -> ClientResult<FireAt> {
    match (at, delay) {
        (Some(_), Some(_)) => Err(ClientError::invalid_input(
            "use either --at or --in, not both",
        )),
        (None, Some(secs)) if !secs.is_finite() || secs < 0.0 => Err(
            ClientError::invalid_input(format!("delay must be a non-negative number, got {secs}")),
        ),
        (None, Some(secs)) => Ok(FireAt::Timestamp(to_unix_seconds(&Utc::now()) + secs)),
        (Some(text), None) => Ok(match text.trim().parse::<f64>() {
            Ok(secs) => FireAt::Timestamp(secs),
            Err(_) => FireAt::Text(text.to_string()),
        }),
        (None, None) => Err(ClientError::invalid_input("a fire time is required")),
    }
}

/// One line describing a delivery.
pub fn render_delivery(delivery: &Delivery) -> String {
    let payload = Value::Object(delivery.payload().clone());
    match delivery {
        Delivery::PublishedEvent { channel, .. } => format!("[{channel}] {payload}"),
        Delivery::TimeEvent {
            channel,
            event_id,
            fire_at,
            ..
        } => format!(
            "[{channel}] {payload} (event {event_id}, due {})",
            fire_at.to_rfc3339()
        ),
    }
}

/// Multi-line summary of server info.
pub fn render_info(info: &ServerInfo) -> String {
    let channels = if info.channels.is_empty() {
        "-".to_string()
    } else {
        info.channels.join(", ")
    };
    [
        format!("{} {}", info.name, info.version),
        format!("address:        {}", info.address),
        format!("started:        {}", info.started_at.to_rfc3339()),
        format!("uptime:         {}s", info.uptime_seconds),
        format!("clients:        {}/{}", info.clients, info.max_clients),
        format!("channels ({}):   {}", info.channel_count, channels),
        format!("pending events: {}", info.pending_events),
        format!("codec:          {}", info.codec),
        format!("timezone:       {}", info.timezone),
    ]
    .join("\n")
}

fn print_message<T: serde::Serialize>(
    output: OutputMode,
    message: &T,
    text: impl FnOnce() -> String,
) {
    match output {
        OutputMode::Json => match serde_json::to_string(message) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: failed to serialize output: {e}"),
        },
        OutputMode::Text => println!("{}", text()),
    }
}

fn unexpected(expected: &str, response: &Response) -> ClientError {
    ClientError::UnexpectedResponse(format!("expected {expected}, got {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use serde_json::json;

    fn ts(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    #[test]
    fn payload_must_be_an_object() {
        let payload = parse_payload(r#"{"status": "ok", "n": 1}"#).unwrap();
        assert_eq!(payload["status"], json!("ok"));
        assert_eq!(payload["n"], json!(1));

        assert!(matches!(
            parse_payload("[1, 2]"),
            Err(ClientError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_payload("{not json"),
            Err(ClientError::InvalidInput(_))
        ));
        assert!(parse_payload("{}").unwrap().is_empty());
    }

    #[test]
    fn fire_at_from_flags() {
        assert_eq!(
            parse_fire_at(Some("1700000000"), None).unwrap(),
            FireAt::Timestamp(1_700_000_000.0)
        );
        assert_eq!(
            parse_fire_at(Some("2030-01-01T09:00:00"), None).unwrap(),
            FireAt::Text("2030-01-01T09:00:00".into())
        );

        let before = to_unix_seconds(&Utc::now());
        match parse_fire_at(None, Some(2.0)).unwrap() {
            FireAt::Timestamp(secs) => assert!(secs >= before + 2.0 && secs < before + 10.0),
            other => panic!("unexpected fire time: {other:?}"),
        }

        assert!(parse_fire_at(None, None).is_err());
        assert!(parse_fire_at(None, Some(-1.0)).is_err());
        assert!(parse_fire_at(Some("1"), Some(1.0)).is_err());
    }

    #[test]
    fn render_published_delivery() {
        let delivery = Delivery::published("c2", json!({"status": "ok"}).as_object().unwrap().clone());
        assert_eq!(render_delivery(&delivery), r#"[c2] {"status":"ok"}"#);
    }

    #[test]
    fn render_time_event_delivery() {
        let delivery = Delivery::TimeEvent {
            event_id: "abc".into(),
            channel: "alarms".into(),
            fire_at: ts("2030-01-01T09:00:00+01:00"),
            scheduled_at: ts("2029-12-31T09:00:00+01:00"),
            payload: json!({"wake": true}).as_object().unwrap().clone(),
        };
        assert_eq!(
            render_delivery(&delivery),
            r#"[alarms] {"wake":true} (event abc, due 2030-01-01T09:00:00+01:00)"#
        );
    }

    #[test]
    fn render_info_lists_channels() {
        let info = ServerInfo {
            name: "timecast".into(),
            version: "0.1.0".into(),
            address: "127.0.0.1:9090".into(),
            started_at: ts("2030-01-01T00:00:00+00:00"),
            uptime_seconds: 42,
            clients: 2,
            max_clients: 512,
            channels: vec!["a".into(), "b".into()],
            channel_count: 2,
            pending_events: 3,
            codec: "json".into(),
            timezone: "UTC".into(),
        };
        let text = render_info(&info);
        assert!(text.starts_with("timecast 0.1.0\n"));
        assert!(text.contains("clients:        2/512"));
        assert!(text.contains("a, b"));
        assert!(text.contains("pending events: 3"));
    }
}
