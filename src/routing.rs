//! Conversation with the routing service: which data center serves which time window.

use std::fmt::Write;

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    outside::Transport,
    result::{Error, Result},
    types::EndpointGroup,
};

/// One requested channel and time window, as given by the user:
/// `[start, end, net, sta, cha, loc]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeWindow(
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    #[serde(default)] pub String,
);

impl TimeWindow {
    /// `NET STA LOC CHA START END`, with `--` standing for an empty location
    fn routing_line(&self) -> String {
        let Self(start, end, net, sta, cha, loc) = self;
        let loc = if loc.is_empty() { "--" } else { loc };
        format!("{net} {sta} {loc} {cha} {start} {end}")
    }
}

/// Parse the JSON array of time windows
pub fn parse_timewindows(json: &str) -> Result<Vec<TimeWindow>> {
    let windows: Vec<TimeWindow> = serde_json::from_str(json)
        .map_err(|err| Error::routing(format!("invalid time windows: {err}")))?;
    if windows.is_empty() {
        return Err(Error::routing("no time windows given"));
    }
    Ok(windows)
}

/// Display filename of a request
pub fn filename_for(description: &str) -> String {
    format!("{}.mseed", description.trim().replace(' ', "_"))
}

/// Body of the routing POST request
pub fn routing_body(windows: &[TimeWindow]) -> String {
    let mut body = String::from("format=json\n");
    for window in windows {
        // Writing to a String cannot fail
        let _ = writeln!(body, "{}", window.routing_line());
    }
    body
}

/// Validate the routing response into endpoint groups.
///
/// An empty body, `null` or an empty array all mean that no data center has the data.
pub fn parse_routes(text: &str) -> Result<Vec<EndpointGroup>> {
    if text.trim().is_empty() {
        return Err(Error::routing("no routes received"));
    }

    let groups: Option<Vec<EndpointGroup>> = serde_json::from_str(text)
        .map_err(|err| Error::routing(format!("invalid routing response: {err}")))?;

    let mut groups = groups.unwrap_or_default();
    for group in &groups {
        match Url::parse(&group.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(Error::routing(format!("invalid endpoint URL '{}'", group.url))),
        }
    }

    groups.retain(|group| {
        if group.params.is_empty() {
            debug!("{}: routed without time windows, ignoring it", group.url);
        }
        !group.params.is_empty()
    });
    if groups.is_empty() {
        return Err(Error::routing("no routes received"));
    }
    Ok(groups)
}

/// Ask the routing service which data centers serve the time windows
pub async fn route(
    transport: &dyn Transport,
    router_url: &str,
    windows: &[TimeWindow],
) -> Result<Vec<EndpointGroup>> {
    let body = routing_body(windows);
    debug!("Routing {} time windows via {router_url}", windows.len());

    let text = transport
        .post_text(router_url, body, "application/json")
        .await
        .map_err(|err| match err {
            Error::RoutingFailed(_) => err,
            err => Error::routing(err.to_string()),
        })?;

    let groups = parse_routes(&text)?;
    info!(
        "{} time windows routed to {} data centers",
        windows.len(),
        groups.len()
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::outside::fake::FakeTransport;

    const WINDOWS: &str = r#"[
        ["2010-02-27T06:30:00", "2010-02-27T07:30:00", "GE", "APE", "BHZ", ""],
        ["2010-02-27T06:30:00", "2010-02-27T07:30:00", "GE", "KBS", "BHZ", "00"]
    ]"#;

    #[test]
    fn builds_the_routing_body() {
        let windows = parse_timewindows(WINDOWS).unwrap();

        assert_eq!(
            routing_body(&windows),
            indoc! {"
                format=json
                GE APE -- BHZ 2010-02-27T06:30:00 2010-02-27T07:30:00
                GE KBS 00 BHZ 2010-02-27T06:30:00 2010-02-27T07:30:00
            "}
        );
    }

    #[test]
    fn rejects_bad_time_windows() {
        assert!(matches!(parse_timewindows("[]"), Err(Error::RoutingFailed(_))));
        assert!(matches!(parse_timewindows("{}"), Err(Error::RoutingFailed(_))));
        assert!(parse_timewindows(r#"[["a", "b", "GE"]]"#).is_err());
    }

    #[test]
    fn filenames_have_no_spaces() {
        assert_eq!(filename_for("Maule event 2010"), "Maule_event_2010.mseed");
    }

    #[test]
    fn parses_routes() {
        let groups = parse_routes(indoc! {r#"
            [
                {
                    "url": "http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query",
                    "name": "dataselect",
                    "params": [
                        {"net": "GE", "sta": "APE", "loc": "", "cha": "BHZ",
                         "start": "2010-02-27T06:30:00", "end": "2010-02-27T07:30:00", "priority": 1}
                    ]
                },
                {
                    "url": "https://eida.ethz.ch/fdsnws/dataselect/1/query",
                    "params": []
                }
            ]
        "#})
        .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].params[0].sta, "APE");
        assert_eq!(groups[0].params[0].id, None);
    }

    #[test]
    fn empty_routing_answers_are_failures() {
        for text in ["", " \n", "null", "[]", r#"[{"url": "http://a.b/query", "params": []}]"#] {
            assert!(matches!(parse_routes(text), Err(Error::RoutingFailed(_))), "{text:?}");
        }
    }

    #[test]
    fn invalid_routing_answers_are_failures() {
        for text in ["<html>", r#"[{"url": "ftp://a.b/query", "params": []}]"#, r#"{"url": "x"}"#] {
            assert!(matches!(parse_routes(text), Err(Error::RoutingFailed(_))), "{text:?}");
        }
    }

    #[tokio::test]
    async fn transport_failures_are_routing_failures() {
        let transport = FakeTransport::new();
        transport.routing_reply(Err(Error::HttpStatus {
            status: 500,
            url: "http://router/query".to_owned(),
        }));
        let windows = parse_timewindows(WINDOWS).unwrap();

        let res = route(&transport, "http://router/query", &windows).await;

        assert!(matches!(res, Err(Error::RoutingFailed(_))));
        let calls = transport.routing_calls.lock().unwrap();
        assert_eq!(calls[0].0, "http://router/query");
        assert!(calls[0].1.starts_with("format=json\n"));
    }
}
