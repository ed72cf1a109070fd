//! OAI-PMH feed client.
//!
//! Harvests `ListRecords` pages from an OAI-PMH endpoint (arXiv by default)
//! and yields one [`RawRecord`] per non-deleted record. Pages are chained
//! through `resumptionToken` and fetched lazily, so a consumer that stops
//! early never downloads the rest.
//!
//! # Record mapping
//!
//! | RawRecord field | Source |
//! |-----------------|--------|
//! | `identifier` | `metadata/<format>/id`, else the header identifier after its last `:` |
//! | `datestamp` | `header/datestamp` |
//! | `categories` | `header/setSpec` (string when single, list when repeated) |
//! | `metadata` | the whole `<record>` element as JSON |
//!
//! XML is converted to JSON the usual way: attributes become `@name`
//! keys, repeated child elements become arrays, and an element with only
//! text becomes a string.
//!
//! # Retry Strategy
//!
//! - HTTP 503 with `Retry-After` → wait as told (OAI-PMH flow control)
//! - HTTP 429 and other 5xx, network errors → exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - Other 4xx → fail immediately

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, Stream, TryStreamExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use arxiv_sync_core::models::{format_date, RawRecord};

use crate::config::FeedConfig;

/// Longest server-requested wait that is honoured as-is.
const MAX_RETRY_AFTER_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OAI-PMH error {code}: {message}")]
    Oai { code: String, message: String },

    #[error("malformed feed XML: {0}")]
    Xml(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: not a record: {source}")]
    Replay {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

fn xml_err(err: impl std::fmt::Display) -> FeedError {
    FeedError::Xml(err.to_string())
}

/// Which page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Initial {
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    },
    Resume(String),
}

/// One parsed `ListRecords` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub records: Vec<RawRecord>,
    /// Records with `status="deleted"` headers, which are not yielded.
    pub deleted: usize,
    /// `None` on the last page.
    pub resumption_token: Option<String>,
    pub complete_list_size: Option<u64>,
}

pub struct OaiPmhClient {
    http: reqwest::Client,
    config: FeedConfig,
}

impl OaiPmhClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn query_params(&self, request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![("verb", "ListRecords".to_string())];
        match request {
            PageRequest::Initial { from, until } => {
                params.push(("metadataPrefix", self.config.metadata_prefix.clone()));
                if !self.config.set.is_empty() {
                    params.push(("set", self.config.set.clone()));
                }
                if let Some(from) = from {
                    params.push(("from", format_date(*from)));
                }
                if let Some(until) = until {
                    params.push(("until", format_date(*until)));
                }
            }
            PageRequest::Resume(token) => params.push(("resumptionToken", token.clone())),
        }
        params
    }

    /// Fetch and parse one page, retrying transient failures.
    pub async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage, FeedError> {
        let params = self.query_params(request);
        let mut last_err = None;
        let mut wait = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = wait
                    .take()
                    .unwrap_or_else(|| Duration::from_secs(1 << (attempt - 1).min(5)));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .get(&self.config.base_url)
                .query(&params)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response.text().await?;
                        return parse_list_records(&body);
                    }

                    if status.as_u16() == 503 {
                        wait = retry_after(&response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        warn!(status = status.as_u16(), attempt, "feed request failed, retrying");
                        last_err = Some(FeedError::Status {
                            status: status.as_u16(),
                            body,
                        });
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(FeedError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    warn!(error = %e, attempt, "feed request failed, retrying");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FeedError::Xml("no response".to_string())))
    }

    async fn next_page(
        &self,
        next: Option<PageRequest>,
    ) -> Result<Option<(FeedPage, Option<PageRequest>)>, FeedError> {
        let Some(request) = next else {
            return Ok(None);
        };
        let page = self.fetch_page(&request).await?;
        info!(
            records = page.records.len(),
            deleted = page.deleted,
            complete_list_size = page.complete_list_size,
            more = page.resumption_token.is_some(),
            "fetched feed page"
        );
        let next = page.resumption_token.clone().map(PageRequest::Resume);
        Ok(Some((page, next)))
    }

    /// Every record modified in `[from, until]`, page by page.
    ///
    /// The stream ends after the first error.
    pub fn records(
        &self,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> impl Stream<Item = Result<RawRecord, FeedError>> + Send + '_ {
        stream::try_unfold(Some(PageRequest::Initial { from, until }), move |next| {
            self.next_page(next)
        })
        .map_ok(|page| stream::iter(page.records.into_iter().map(Ok::<RawRecord, FeedError>)))
        .try_flatten()
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

// ============ XML parsing ============

/// Parse a `ListRecords` response body.
///
/// An OAI `noRecordsMatch` error is an empty page; any other OAI error is
/// returned as [`FeedError::Oai`].
pub fn parse_list_records(xml: &str) -> Result<FeedPage, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut page = FeedPage::default();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"record" => {
                    let attrs = attributes(&e)?;
                    let record = read_element(&mut reader, attrs)?;
                    match record_from_value(record) {
                        Some(raw) => page.records.push(raw),
                        None => page.deleted += 1,
                    }
                }
                b"resumptionToken" => {
                    let attrs = attributes(&e)?;
                    let token = read_element(&mut reader, attrs)?;
                    page.complete_list_size = token
                        .get("@completeListSize")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok());
                    page.resumption_token = text_of(&token).map(String::from);
                }
                b"error" => {
                    let attrs = attributes(&e)?;
                    let error = read_element(&mut reader, attrs)?;
                    let code = error
                        .get("@code")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    if code == "noRecordsMatch" {
                        debug!("feed has no matching records");
                        return Ok(FeedPage::default());
                    }
                    return Err(FeedError::Oai {
                        code,
                        message: text_of(&error).unwrap_or_default().to_string(),
                    });
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"resumptionToken" => {
                let attrs = attributes(&e)?;
                page.complete_list_size = attrs
                    .get("@completeListSize")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok());
                page.resumption_token = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes as `@name` keys. Namespace declarations are dropped.
fn attributes(e: &BytesStart<'_>) -> Result<Map<String, Value>, FeedError> {
    let mut map = Map::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = format!("@{}", String::from_utf8_lossy(attr.key.local_name().as_ref()));
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        map.insert(key, Value::String(value));
    }
    Ok(map)
}

/// Read the rest of an element whose start tag was just consumed.
fn read_element(reader: &mut Reader<&[u8]>, mut map: Map<String, Value>) -> Result<Value, FeedError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let name = local_name(&e);
                let attrs = attributes(&e)?;
                let child = read_element(reader, attrs)?;
                insert_child(&mut map, name, child);
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                let attrs = attributes(&e)?;
                let child = if attrs.is_empty() {
                    Value::Null
                } else {
                    Value::Object(attrs)
                };
                insert_child(&mut map, name, child);
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => break,
            Event::Eof => return Err(FeedError::Xml("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(match (map.is_empty(), text.is_empty()) {
        (true, true) => Value::Null,
        (true, false) => Value::String(text),
        (false, true) => Value::Object(map),
        (false, false) => {
            map.insert("#text".to_string(), Value::String(text));
            Value::Object(map)
        }
    })
}

fn insert_child(map: &mut Map<String, Value>, name: String, child: Value) {
    match map.get_mut(&name) {
        None => {
            map.insert(name, child);
        }
        Some(Value::Array(items)) => items.push(child),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, child]);
        }
    }
}

fn text_of(value: &Value) -> Option<&str> {
    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("#text")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// `None` for deleted records.
fn record_from_value(record: Value) -> Option<RawRecord> {
    let header = record.get("header");
    if header.and_then(|h| h.get("@status")).and_then(Value::as_str) == Some("deleted") {
        return None;
    }

    let metadata_id = record
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|formats| formats.values().next())
        .and_then(|format| format.get("id"))
        .and_then(text_of);
    let header_id = header
        .and_then(|h| h.get("identifier"))
        .and_then(text_of)
        .map(|id| id.rsplit_once(':').map_or(id, |(_, tail)| tail));
    let identifier = metadata_id.or(header_id).map(String::from);

    let datestamp = header
        .and_then(|h| h.get("datestamp"))
        .and_then(text_of)
        .map(String::from);
    let categories = header
        .and_then(|h| h.get("setSpec"))
        .cloned()
        .unwrap_or(Value::Null);

    Some(RawRecord {
        identifier,
        datestamp,
        categories,
        metadata: record,
    })
}

// ============ File replay ============

/// Records from a JSON-lines file, one [`RawRecord`] object per line.
///
/// Blank lines are skipped. A line that is not JSON at all is an error at its
/// position in the stream. A JSON line whose fields have the wrong shape is
/// still yielded, with the unusable fields left empty, so the reconciler
/// reports it as a failed record and the rest of the file goes on.
pub fn read_jsonl(path: &Path) -> Result<Vec<Result<RawRecord, FeedError>>, FeedError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| FeedError::Io {
        path: display.clone(),
        source,
    })?;
    Ok(parse_jsonl(&content, &display))
}

fn parse_jsonl(content: &str, path: &str) -> Vec<Result<RawRecord, FeedError>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value = serde_json::from_str::<Value>(line).map_err(|source| FeedError::Replay {
                path: path.to_string(),
                line: i + 1,
                source,
            })?;
            Ok(replay_record(value, i + 1))
        })
        .collect()
}

fn replay_record(value: Value, line: usize) -> RawRecord {
    match serde_json::from_value::<RawRecord>(value.clone()) {
        Ok(record) => record,
        Err(err) => {
            warn!(line, error = %err, "malformed replay record");
            let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
            RawRecord {
                identifier: field("identifier"),
                datestamp: field("datestamp"),
                categories: value.get("categories").cloned().unwrap_or(Value::Null),
                metadata: value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <responseDate>2024-01-04T10:00:00Z</responseDate>
  <request verb="ListRecords" metadataPrefix="arXivRaw" set="cs:cs">http://export.arxiv.org/oai2</request>
  <ListRecords>
    <record>
      <header>
        <identifier>oai:arXiv.org:2401.00001</identifier>
        <datestamp>2024-01-03</datestamp>
        <setSpec>cs:cs:AI</setSpec>
        <setSpec>cs:cs:LG</setSpec>
      </header>
      <metadata>
        <arXivRaw xmlns="http://arxiv.org/OAI/arXivRaw/">
          <id>2401.00001</id>
          <title>Attention &amp; Memory</title>
          <version version="v1"><date>Mon, 1 Jan 2024 00:00:00 GMT</date></version>
          <version version="v2"><date>Wed, 3 Jan 2024 00:00:00 GMT</date></version>
          <abstract>  We study things.  </abstract>
        </arXivRaw>
      </metadata>
    </record>
    <record>
      <header status="deleted">
        <identifier>oai:arXiv.org:2401.00002</identifier>
        <datestamp>2024-01-03</datestamp>
        <setSpec>cs:cs:CL</setSpec>
      </header>
    </record>
    <record>
      <header>
        <identifier>oai:arXiv.org:cs/0112017</identifier>
        <datestamp>2024-01-02</datestamp>
        <setSpec>cs:cs:CL</setSpec>
      </header>
      <metadata>
        <arXivRaw xmlns="http://arxiv.org/OAI/arXivRaw/">
          <title>No id here</title>
        </arXivRaw>
      </metadata>
    </record>
    <resumptionToken cursor="0" completeListSize="3">6045991|1001</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    #[test]
    fn parses_records_and_token() {
        let page = parse_list_records(PAGE).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.deleted, 1);
        assert_eq!(page.resumption_token.as_deref(), Some("6045991|1001"));
        assert_eq!(page.complete_list_size, Some(3));

        let first = &page.records[0];
        assert_eq!(first.identifier.as_deref(), Some("2401.00001"));
        assert_eq!(first.datestamp.as_deref(), Some("2024-01-03"));
        assert_eq!(first.categories, json!(["cs:cs:AI", "cs:cs:LG"]));
        let raw = &first.metadata["metadata"]["arXivRaw"];
        assert_eq!(raw["title"], json!("Attention & Memory"));
        assert_eq!(raw["abstract"], json!("We study things."));
        assert_eq!(raw["version"][1]["@version"], json!("v2"));
        assert!(raw.get("@xmlns").is_none());

        let second = &page.records[1];
        assert_eq!(second.identifier.as_deref(), Some("cs/0112017"));
        assert_eq!(second.categories, json!("cs:cs:CL"));
    }

    #[test]
    fn last_page_has_no_token() {
        let xml = r#"<OAI-PMH><ListRecords>
            <record><header><identifier>oai:arXiv.org:1</identifier><datestamp>2024-01-01</datestamp><setSpec>cs:cs</setSpec></header></record>
            <resumptionToken completeListSize="1001" cursor="1000"/>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.resumption_token, None);
        assert_eq!(page.complete_list_size, Some(1001));

        let xml = r#"<OAI-PMH><ListRecords><resumptionToken cursor="5"></resumptionToken></ListRecords></OAI-PMH>"#;
        assert_eq!(parse_list_records(xml).unwrap().resumption_token, None);
    }

    #[test]
    fn no_records_match_is_empty() {
        let xml = r#"<OAI-PMH><error code="noRecordsMatch">No records</error></OAI-PMH>"#;
        assert_eq!(parse_list_records(xml).unwrap(), FeedPage::default());
    }

    #[test]
    fn other_oai_errors_fail() {
        let xml = r#"<OAI-PMH><error code="badResumptionToken">expired</error></OAI-PMH>"#;
        match parse_list_records(xml) {
            Err(FeedError::Oai { code, message }) => {
                assert_eq!(code, "badResumptionToken");
                assert_eq!(message, "expired");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_xml_fails() {
        let xml = r#"<OAI-PMH><ListRecords><record><header><datestamp>2024"#;
        assert!(parse_list_records(xml).is_err());
    }

    #[test]
    fn query_params_for_initial_and_resume() {
        let client = OaiPmhClient::new(&FeedConfig::default()).unwrap();
        let initial = client.query_params(&PageRequest::Initial {
            from: NaiveDate::from_ymd_opt(2024, 1, 2),
            until: None,
        });
        assert_eq!(
            initial,
            vec![
                ("verb", "ListRecords".to_string()),
                ("metadataPrefix", "arXivRaw".to_string()),
                ("set", "cs:cs".to_string()),
                ("from", "2024-01-02".to_string()),
            ]
        );
        let resume = client.query_params(&PageRequest::Resume("abc".into()));
        assert_eq!(
            resume,
            vec![
                ("verb", "ListRecords".to_string()),
                ("resumptionToken", "abc".to_string()),
            ]
        );
    }

    #[test]
    fn jsonl_lines_map_to_records() {
        let content = concat!(
            "{\"identifier\":\"p1\",\"datestamp\":\"2024-01-01\",\"categories\":\"a\",\"metadata\":{}}\n",
            "\n",
            "not json\n",
            "{\"identifier\":\"p2\"}\n",
        );
        let items = parse_jsonl(content, "replay.jsonl");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().identifier.as_deref(), Some("p1"));
        assert!(matches!(items[1], Err(FeedError::Replay { line: 3, .. })));
        let partial = items[2].as_ref().unwrap();
        assert_eq!(partial.datestamp, None);
        assert_eq!(partial.categories, Value::Null);
    }

    #[test]
    fn wrong_field_types_become_records() {
        let content = concat!(
            "{\"identifier\":12345,\"datestamp\":\"2024-01-01\",\"categories\":\"a\",\"metadata\":{}}\n",
            "{\"identifier\":\"p2\",\"datestamp\":[2024],\"categories\":[\"a\",\"b\"]}\n",
            "[1, 2]\n",
        );
        let items = parse_jsonl(content, "replay.jsonl");
        assert_eq!(items.len(), 3);

        let numeric_id = items[0].as_ref().unwrap();
        assert_eq!(numeric_id.identifier, None);
        assert_eq!(numeric_id.datestamp.as_deref(), Some("2024-01-01"));
        assert_eq!(numeric_id.metadata["identifier"], json!(12345));

        let bad_date = items[1].as_ref().unwrap();
        assert_eq!(bad_date.identifier.as_deref(), Some("p2"));
        assert_eq!(bad_date.datestamp, None);
        assert_eq!(bad_date.categories, json!(["a", "b"]));

        let not_object = items[2].as_ref().unwrap();
        assert_eq!(not_object.identifier, None);
        assert_eq!(not_object.metadata, json!([1, 2]));
    }
}
