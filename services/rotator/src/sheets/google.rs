//! Google Sheets publisher.
//!
//! Each publish makes sure the data tab exists, clears it, and writes the
//! header followed by the candidate rows starting at `A1`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{AccessTokenSource, PublishError, SheetPublisher, SheetRow};
use crate::config::ConfigError;

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Publishes rows into one tab of a Google spreadsheet.
pub struct GoogleSheetsPublisher {
    client: reqwest::Client,
    base_url: Url,
    spreadsheet_id: String,
    sheet_name: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GoogleSheetsPublisher {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::Invalid {
            key: "RUSH_SHEETS_API_URL",
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "RUSH_SHEETS_API_URL",
                reason: format!("{base_url} cannot be used as a base URL"),
            });
        }

        Ok(Self {
            client,
            base_url,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            tokens,
        })
    }

    /// `'{sheet}'` with embedded quotes doubled, as A1 notation requires.
    fn quoted_sheet(&self) -> String {
        format!("'{}'", self.sheet_name.replace('\'', "''"))
    }

    /// `{base}/v4/spreadsheets/{id}/{segments...}`, each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("v4")
                .push("spreadsheets")
                .extend(segments.iter().copied());
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PublishError> {
        let token = self.tokens.access_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        check_status(resp).await
    }

    async fn sheet_exists(&self) -> Result<bool, PublishError> {
        let mut url = self.endpoint(&[&self.spreadsheet_id]);
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let metadata: SpreadsheetMetadata = self
            .send(self.client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Malformed(e.to_string()))?;

        Ok(metadata
            .sheets
            .iter()
            .any(|s| s.properties.title == self.sheet_name))
    }

    async fn create_sheet(&self) -> Result<(), PublishError> {
        let url = self.endpoint(&[&format!("{}:batchUpdate", self.spreadsheet_id)]);
        let body = json!({
            "requests": [
                { "addSheet": { "properties": { "title": self.sheet_name } } }
            ]
        });

        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    /// Create the data tab if it does not exist yet.
    pub async fn ensure_sheet(&self) -> Result<(), PublishError> {
        if self.sheet_exists().await? {
            debug!(sheet = %self.sheet_name, "Data sheet already exists");
            return Ok(());
        }

        info!(sheet = %self.sheet_name, "Creating data sheet");
        self.create_sheet().await
    }

    /// Remove every value from the data tab.
    pub async fn clear_sheet(&self) -> Result<(), PublishError> {
        let range = format!("{}:clear", self.quoted_sheet());
        let url = self.endpoint(&[&self.spreadsheet_id, "values", &range]);

        self.send(self.client.post(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn write_rows(&self, rows: &[SheetRow]) -> Result<(), PublishError> {
        let range = format!("{}!A1", self.quoted_sheet());
        let mut url = self.endpoint(&[&self.spreadsheet_id, "values", &range]);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let header = SheetRow::header();
        let values: Vec<&SheetRow> = std::iter::once(&header).chain(rows).collect();
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        });

        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetPublisher for GoogleSheetsPublisher {
    #[instrument(skip(self, rows), fields(sheet = %self.sheet_name, row_count = rows.len()))]
    async fn publish(&self, rows: &[SheetRow]) -> Result<(), PublishError> {
        self.ensure_sheet().await?;
        self.clear_sheet().await?;
        self.write_rows(rows).await?;

        info!(row_count = rows.len(), "Rotation view published");
        Ok(())
    }
}

async fn check_status(resp: Response) -> Result<Response, PublishError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(PublishError::RateLimited { retry_after_secs });
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PublishError::Auth(format!(
            "status={status}: {body}"
        ))),
        _ => Err(PublishError::Unavailable(format!(
            "sheets request failed (status={status}): {body}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::StaticToken;

    fn publisher(base: &str, sheet: &str) -> GoogleSheetsPublisher {
        GoogleSheetsPublisher::new(
            reqwest::Client::new(),
            base,
            "sheet-1",
            sheet,
            Arc::new(StaticToken::new("t")),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_escapes_sheet_names() {
        let p = publisher("https://sheets.example/", "Rush Data");
        let range = format!("{}!A1", p.quoted_sheet());
        let url = p.endpoint(&["sheet-1", "values", &range]);
        assert_eq!(
            url.as_str(),
            "https://sheets.example/v4/spreadsheets/sheet-1/values/'Rush%20Data'!A1"
        );
    }

    #[test]
    fn test_quoted_sheet_doubles_quotes() {
        let p = publisher("https://sheets.example", "Bob's");
        assert_eq!(p.quoted_sheet(), "'Bob''s'");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = GoogleSheetsPublisher::new(
            reqwest::Client::new(),
            "not a url",
            "sheet-1",
            "data",
            Arc::new(StaticToken::new("t")),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
