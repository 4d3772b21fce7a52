//! Google Sheets v4 backend.
//!
//! Authenticates as a service account: a JWT signed with the account's RSA key
//! is exchanged for an OAuth2 access token, which is cached until shortly
//! before it expires. Every sheet operation is one HTTPS request; failures are
//! returned as-is and never retried.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::SheetError;
use crate::sheet::{Rows, SheetClient};

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service account key file that matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// JWT-bearer assertion claims.
#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    TOKEN_LIFETIME_SECS as u64
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: u32,
    title: String,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// [`SheetClient`] over the Google Sheets REST API.
pub struct GoogleSheetsClient {
    http: Client,
    base_url: Url,
    spreadsheet_id: String,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token: Mutex<Option<AccessToken>>,
    sheet_ids: RwLock<HashMap<String, u32>>,
}

impl GoogleSheetsClient {
    /// Create a client for `spreadsheet_id` from the JSON of a service account key.
    ///
    /// # Errors
    /// * `SheetError::Auth` if the key JSON or its private key cannot be parsed
    /// * `SheetError::Transport` if the HTTP client cannot be built
    pub fn new(spreadsheet_id: &str, key_json: &str) -> Result<Self, SheetError> {
        let key: ServiceAccountKey = serde_json::from_str(key_json)
            .map_err(|e| SheetError::Auth(format!("invalid service account key: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetError::Auth(format!("invalid private key: {e}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SheetError::Transport(e.to_string()))?;

        let base_url =
            Url::parse(SHEETS_API_URL).map_err(|e| SheetError::Transport(e.to_string()))?;

        info!("Using Google spreadsheet {spreadsheet_id} as {}", key.client_email);

        Ok(GoogleSheetsClient {
            http,
            base_url,
            spreadsheet_id: spreadsheet_id.to_string(),
            key,
            encoding_key,
            token: Mutex::new(None),
            sheet_ids: RwLock::new(HashMap::new()),
        })
    }

    async fn access_token(&self) -> Result<String, SheetError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| SheetError::Auth(e.to_string()))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SheetError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetError::Decode(e.to_string()))?;

        debug!("Obtained access token valid for {}s", token.expires_in);
        let value = token.access_token.clone();
        *cached = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(value)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SheetError> {
        build_url(&self.base_url, segments)
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, SheetError> {
        let last = format!("{range}{suffix}");
        self.url(&["v4", "spreadsheets", &self.spreadsheet_id, "values", &last])
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SheetError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SheetError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(SheetError::Remote { status, message })
    }
}

fn build_url(base: &Url, segments: &[&str]) -> Result<Url, SheetError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SheetError::Transport(format!("cannot-be-a-base URL: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Render a cell the way a formatted value would read.
fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn into_rows(values: Vec<Vec<Value>>) -> Rows {
    values
        .into_iter()
        .map(|row| row.into_iter().map(cell_to_string).collect())
        .collect()
}

// RAW stores each cell as the literal string sent; nothing is parsed as a
// boolean, date or formula.
const APPEND_QUERY: [(&str, &str); 2] = [
    ("valueInputOption", "RAW"),
    ("insertDataOption", "INSERT_ROWS"),
];
const UPDATE_QUERY: [(&str, &str); 1] = [("valueInputOption", "RAW")];

fn append_request(http: &Client, url: Url, rows: &Rows) -> RequestBuilder {
    http.post(url)
        .query(&APPEND_QUERY)
        .json(&json!({ "values": rows }))
}

fn update_request(http: &Client, url: Url, range: &str, rows: &Rows) -> RequestBuilder {
    http.put(url)
        .query(&UPDATE_QUERY)
        .json(&json!({ "range": range, "majorDimension": "ROWS", "values": rows }))
}

fn delete_rows_request(sheet_id: u32, start: usize, end: usize) -> Value {
    json!({
        "requests": [{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": start,
                    "endIndex": end,
                }
            }
        }]
    })
}

#[async_trait]
impl SheetClient for GoogleSheetsClient {
    async fn fetch_range(&self, range: &str) -> Result<Rows, SheetError> {
        let url = self.values_url(range, "")?;
        let response = self.send(self.http.get(url)).await?;

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| SheetError::Decode(e.to_string()))?;

        Ok(into_rows(body.values))
    }

    async fn append_rows(&self, range: &str, rows: Rows) -> Result<(), SheetError> {
        let url = self.values_url(range, ":append")?;
        self.send(append_request(&self.http, url, &rows)).await?;
        Ok(())
    }

    async fn update_range(&self, range: &str, rows: Rows) -> Result<(), SheetError> {
        let url = self.values_url(range, "")?;
        self.send(update_request(&self.http, url, range, &rows)).await?;
        Ok(())
    }

    async fn sheet_id(&self, title: &str) -> Result<u32, SheetError> {
        let cached = self
            .sheet_ids
            .read()
            .ok()
            .and_then(|ids| ids.get(title).copied());
        if let Some(id) = cached {
            return Ok(id);
        }

        let url = self.url(&["v4", "spreadsheets", &self.spreadsheet_id])?;
        let request = self
            .http
            .get(url)
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let meta: SpreadsheetMeta = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Decode(e.to_string()))?;

        let mut ids = self.sheet_ids.write().unwrap_or_else(|e| e.into_inner());
        for sheet in meta.sheets {
            ids.insert(sheet.properties.title, sheet.properties.sheet_id);
        }

        ids.get(title)
            .copied()
            .ok_or_else(|| SheetError::UnknownSheet(title.to_string()))
    }

    async fn delete_rows(&self, sheet_id: u32, start: usize, end: usize) -> Result<(), SheetError> {
        let batch = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = self.url(&["v4", "spreadsheets", &batch])?;
        let request = self
            .http
            .post(url)
            .json(&delete_rows_request(sheet_id, start, end));

        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_keep_a1_ranges_readable() {
        let base = Url::parse(SHEETS_API_URL).unwrap();
        let url = build_url(&base, &["v4", "spreadsheets", "abc", "values", "Stories!A2:L2"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Stories!A2:L2"
        );

        let quoted = build_url(&base, &["v4", "spreadsheets", "abc", "values", "'Donor List'!A:C:append"])
            .unwrap();
        assert_eq!(
            quoted.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/'Donor%20List'!A:C:append"
        );
    }

    #[test]
    fn writes_store_cells_verbatim() {
        let http = Client::new();
        let base = Url::parse(SHEETS_API_URL).unwrap();
        let rows: Rows = vec![vec!["=1+1".into(), "true".into(), "2024-05-01T09:30:00.000Z".into()]];

        let url = build_url(&base, &["v4", "spreadsheets", "abc", "values", "Stories!A:L:append"]).unwrap();
        let append = append_request(&http, url, &rows).build().unwrap();
        assert_eq!(append.method(), reqwest::Method::POST);
        assert_eq!(
            append.url().query(),
            Some("valueInputOption=RAW&insertDataOption=INSERT_ROWS")
        );
        let body: Value = serde_json::from_slice(append.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["values"][0][0], "=1+1");
        assert_eq!(body["values"][0][1], "true");

        let url = build_url(&base, &["v4", "spreadsheets", "abc", "values", "Stories!A2:L2"]).unwrap();
        let update = update_request(&http, url, "Stories!A2:L2", &rows).build().unwrap();
        assert_eq!(update.method(), reqwest::Method::PUT);
        assert_eq!(update.url().query(), Some("valueInputOption=RAW"));
        let body: Value = serde_json::from_slice(update.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["range"], "Stories!A2:L2");
        assert_eq!(body["values"][0][1], "true");
    }

    #[test]
    fn cells_are_rendered_as_strings() {
        let rows = into_rows(vec![vec![json!("title"), json!(42), json!(true), Value::Null]]);
        assert_eq!(rows, vec![vec!["title", "42", "true", ""]]);
    }

    #[test]
    fn empty_value_range_decodes_to_no_rows() {
        let body: ValueRange = serde_json::from_str(r#"{"range":"Stories!A1:L1000","majorDimension":"ROWS"}"#).unwrap();
        assert!(into_rows(body.values).is_empty());
    }

    #[test]
    fn delete_request_uses_row_dimension() {
        let body = delete_rows_request(7, 4, 5);
        let range = &body["requests"][0]["deleteDimension"]["range"];
        assert_eq!(range["sheetId"], 7);
        assert_eq!(range["dimension"], "ROWS");
        assert_eq!(range["startIndex"], 4);
        assert_eq!(range["endIndex"], 5);
    }

    #[test]
    fn spreadsheet_metadata_decodes() {
        let meta: SpreadsheetMeta = serde_json::from_str(
            r#"{"sheets":[{"properties":{"sheetId":0,"title":"Stories"}},{"properties":{"sheetId":913,"title":"Users"}}]}"#,
        )
        .unwrap();
        assert_eq!(meta.sheets[1].properties.sheet_id, 913);
        assert_eq!(meta.sheets[1].properties.title, "Users");
    }

    #[test]
    fn key_without_token_uri_uses_google_default() {
        let key: ServiceAccountKey =
            serde_json::from_str(r#"{"client_email":"svc@x.iam","private_key":"pem"}"#).unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn malformed_keys_are_auth_errors() {
        assert!(matches!(
            GoogleSheetsClient::new("abc", "not json"),
            Err(SheetError::Auth(_))
        ));
        assert!(matches!(
            GoogleSheetsClient::new("abc", r#"{"client_email":"svc@x.iam","private_key":"garbage"}"#),
            Err(SheetError::Auth(_))
        ));
    }
}
