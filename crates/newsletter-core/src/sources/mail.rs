use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};
use tracing::{debug, info, warn};

use super::{RawRecord, RecordBody, SourceFetcher};
use crate::config::EmailSourceConfig;
use crate::error::SourceError;
use crate::models::SourceType;

/// Reads newsletters from an IMAP mailbox folder.
pub struct MailFetcher {
    config: EmailSourceConfig,
    name: String,
}

impl MailFetcher {
    pub fn new(config: EmailSourceConfig) -> Self {
        let name = format!("Email: {}", config.host);
        Self { config, name }
    }
}

#[async_trait]
impl SourceFetcher for MailFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Mail
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let config = self.config.clone();
        let name = self.name.clone();

        // the imap client is blocking
        tokio::task::spawn_blocking(move || fetch_mailbox(&config, &name, since))
            .await
            .map_err(|e| SourceError::connectivity(self.name.clone(), e))?
    }
}

fn fetch_mailbox(
    config: &EmailSourceConfig,
    name: &str,
    since: DateTime<Utc>,
) -> Result<Vec<RawRecord>, SourceError> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| SourceError::connectivity(name, e))?;

    let addr = (config.host.as_str(), config.port);
    let client = if config.use_ssl {
        imap::connect(addr, &config.host, &tls)
    } else {
        imap::connect_starttls(addr, &config.host, &tls)
    }
    .map_err(|e| SourceError::connectivity(name, e))?;

    let mut session = client
        .login(&config.username, &config.password)
        .map_err(|(e, _client)| SourceError::auth(name, e))?;

    // EXAMINE keeps the folder read-only so messages stay unread
    session
        .examine(&config.folder)
        .map_err(|e| SourceError::connectivity(name, format!("folder '{}': {}", config.folder, e)))?;

    let query = format!("SINCE {}", since.format("%d-%b-%Y"));
    let mut ids: Vec<u32> = session
        .search(&query)
        .map_err(|e| SourceError::parse(name, e))?
        .into_iter()
        .collect();
    ids.sort_unstable();
    debug!(source = name, count = ids.len(), "messages matched search");

    let mut records = Vec::new();
    if !ids.is_empty() {
        let sequence_set = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let messages = session
            .fetch(&sequence_set, "RFC822")
            .map_err(|e| SourceError::connectivity(name, e))?;
        let fetched_at = Utc::now();

        for message in messages.iter() {
            let Some(body) = message.body() else {
                continue;
            };
            match parse_message(body, name, fetched_at) {
                Some(record) => records.push(record),
                None => warn!(source = name, seq = message.message, "skipping unparsable message"),
            }
        }
    }

    if let Err(e) = session.logout() {
        debug!(source = name, error = %e, "logout failed");
    }

    info!(source = name, count = records.len(), "fetched mail messages");
    Ok(records)
}

/// Converts an RFC 822 message into a record. HTML bodies win over text.
pub(crate) fn parse_message(
    raw: &[u8],
    source_name: &str,
    fetched_at: DateTime<Utc>,
) -> Option<RawRecord> {
    let message = MessageParser::default().parse(raw)?;

    let has_html = message
        .html_part(0)
        .is_some_and(|part| matches!(part.body, PartType::Html(_)));
    let body = if has_html {
        message.body_html(0).map(|h| RecordBody::Markup(h.into_owned()))
    } else {
        message.body_text(0).map(|t| RecordBody::Plain(t.into_owned()))
    }
    .unwrap_or_else(|| RecordBody::Plain(String::new()));

    let author = message.from().and_then(|addrs| addrs.first()).and_then(|addr| {
        addr.name
            .as_deref()
            .or(addr.address.as_deref())
            .map(str::to_string)
    });

    let published_at = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

    Some(RawRecord {
        source_name: source_name.to_string(),
        source_type: SourceType::Mail,
        title: message.subject().map(str::to_string),
        body,
        published_at,
        date_hint: None,
        fetched_at,
        author,
        origin_url: None,
    })
}
